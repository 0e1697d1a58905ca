//! Row codec
//!
//! Maps typed records onto entities.
//!
//! ## Entity Layout
//! ```text
//! key:   ┌──────────────────┬──────────────────────────────┐
//!        │ "<table>_"       │ key bytes                    │
//!        └──────────────────┴──────────────────────────────┘
//! value: ┌─────────────┬─────┬──────────────┬─────────────┬─────┬─────
//!        │ name (UTF-8)│ 0x00│ tagged value │ name        │ 0x00│ ...
//!        └─────────────┴─────┴──────────────┴─────────────┴─────┴─────
//! ```
//! Key bytes are the raw bytes for `Bytes` keys and the tagged encoding for
//! every other key type. The value carries every field, the key included.
//!
//! Schemas evolve additively: fields a record does not know are skipped on
//! decode, fields missing from a row keep their `Default` value. A renamed
//! or removed field is not recoverable.

use bytes::{Buf, BufMut};

use crate::entity::Entity;
use crate::error::{Result, StoreError};

use super::value::FieldValue;

/// A record shape with exactly one key field
///
/// ```ignore
/// #[derive(Default)]
/// struct Peer { id: String, port: i32 }
///
/// impl KeyedRecord for Peer {
///     const KEY_FIELD: Option<&'static str> = Some("id");
///
///     fn fields(&self) -> Vec<(&'static str, FieldValue)> {
///         vec![("id", self.id.clone().into()), ("port", self.port.into())]
///     }
///
///     fn set_field(&mut self, name: &str, value: FieldValue) -> Result<bool> {
///         match name {
///             "id" => self.id = value.try_into()?,
///             "port" => self.port = value.try_into()?,
///             _ => return Ok(false),
///         }
///         Ok(true)
///     }
/// }
/// ```
pub trait KeyedRecord: Default {
    /// Name of the key field; `None` makes every encode/decode fail
    const KEY_FIELD: Option<&'static str>;

    /// Every field with its current value, key field included
    fn fields(&self) -> Vec<(&'static str, FieldValue)>;

    /// Assign a decoded field; `Ok(false)` for names the shape does not have
    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<bool>;
}

/// Name of the record's key field
pub fn key_field<T: KeyedRecord>() -> Result<&'static str> {
    T::KEY_FIELD.ok_or_else(|| {
        StoreError::Config(format!(
            "record type {} does not declare a key field",
            std::any::type_name::<T>()
        ))
    })
}

/// Prefix every entity key of `table` starts with
pub fn table_prefix(table: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(table.len() + 1);
    prefix.extend_from_slice(table.as_bytes());
    prefix.push(b'_');
    prefix
}

/// Serialized form of a key value (without the table prefix)
pub fn encode_key(key: &FieldValue) -> Result<Vec<u8>> {
    match key {
        FieldValue::Bytes(raw) => Ok(raw.clone()),
        FieldValue::Null => Err(StoreError::Encoding("key field is null".to_string())),
        other => other.to_bytes(),
    }
}

/// Full entity key of `key` in `table`
pub fn entity_key(table: &str, key: &FieldValue) -> Result<Vec<u8>> {
    let mut full = table_prefix(table);
    full.extend_from_slice(&encode_key(key)?);
    Ok(full)
}

/// Encode a record into an (unpartitioned) entity
pub fn encode<T: KeyedRecord>(table: &str, record: &T) -> Result<Entity> {
    let key_name = key_field::<T>()?;
    let fields = record.fields();

    let key_value = fields
        .iter()
        .find(|(name, _)| *name == key_name)
        .map(|(_, value)| value)
        .ok_or_else(|| {
            StoreError::Config(format!(
                "key field '{}' is not among the fields of {}",
                key_name,
                std::any::type_name::<T>()
            ))
        })?;
    let key = entity_key(table, key_value)?;

    let mut value = Vec::new();
    for (name, field) in &fields {
        put_name(&mut value, name)?;
        field.encode(&mut value)?;
    }

    Ok(Entity {
        key,
        value: Some(value),
        partition: 0,
    })
}

/// Decode one found entity of `table` into a record
pub fn decode_entity<T: KeyedRecord>(table: &str, entity: &Entity) -> Result<T> {
    let key_name = key_field::<T>()?;
    let prefix = table_prefix(table);
    let stored_key = entity.key.strip_prefix(prefix.as_slice()).ok_or_else(|| {
        StoreError::Logic(format!("entity key does not belong to table '{}'", table))
    })?;
    let bytes = entity
        .value
        .as_deref()
        .ok_or_else(|| StoreError::Logic("cannot decode an entity without a value".to_string()))?;

    let mut record = T::default();
    let mut key_value = None;
    let mut buf = bytes;
    while buf.has_remaining() {
        let name = take_name(&mut buf)?;
        let value = FieldValue::decode(&mut buf)?;
        if name == key_name {
            key_value = Some(value.clone());
        }
        // Unknown names are fields of a richer shape; skip them
        record.set_field(&name, value)?;
    }

    let key_value = key_value.ok_or_else(|| {
        StoreError::Encoding(format!("row has no '{}' key field", key_name))
    })?;
    if encode_key(&key_value)? != stored_key {
        return Err(StoreError::Logic(format!(
            "key field '{}' ({}) does not match the stored key bytes",
            key_name,
            key_value.type_name()
        )));
    }

    Ok(record)
}

/// Decode every found entity; entities without a value are skipped
pub fn decode<T: KeyedRecord>(table: &str, entities: &[Entity]) -> Result<Vec<T>> {
    entities
        .iter()
        .filter(|e| e.value.is_some())
        .map(|e| decode_entity(table, e))
        .collect()
}

fn put_name<B: BufMut>(buf: &mut B, name: &str) -> Result<()> {
    if name.as_bytes().contains(&0) {
        return Err(StoreError::Encoding(format!(
            "field name {:?} contains a NUL byte",
            name
        )));
    }
    buf.put_slice(name.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn take_name(buf: &mut &[u8]) -> Result<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| StoreError::Encoding("unterminated field name".to_string()))?;
    let name = std::str::from_utf8(&buf[..end])
        .map_err(|e| StoreError::Encoding(format!("field name is not UTF-8: {}", e)))?
        .to_string();
    buf.advance(end + 1);
    Ok(name)
}
