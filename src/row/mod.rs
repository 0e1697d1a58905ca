//! Row Module
//!
//! The keyed-row mapping layer: typed records ↔ entities.
//!
//! ## Responsibilities
//! - Tagged binary encoding of field values
//! - Record shapes declared through the `KeyedRecord` trait
//! - Named tables with a per-table key prefix and a table registry

mod codec;
mod table;
mod value;

pub use codec::{decode, decode_entity, encode, encode_key, entity_key, key_field, table_prefix, KeyedRecord};
pub use table::{Table, TableDb, TableEntry, REGISTRY_TABLE};
pub use value::{optional, FieldValue};
