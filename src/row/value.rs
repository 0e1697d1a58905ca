//! Tagged field values
//!
//! ## Wire Format
//! ```text
//! ┌─────────┬──────────────────────────────────────────┐
//! │ Tag (1) │ Payload                                  │
//! └─────────┴──────────────────────────────────────────┘
//! ```
//! - 0x00 NULL:  empty
//! - 0x01 BOOL:  1 byte (0 / 1)
//! - 0x02 I32:   4 bytes LE
//! - 0x03 I64:   8 bytes LE
//! - 0x04 U64:   8 bytes LE
//! - 0x05 F64:   8 bytes LE (IEEE 754 bits)
//! - 0x06 STR:   len (4 bytes LE) + UTF-8
//! - 0x07 BYTES: len (4 bytes LE) + raw

use bytes::{Buf, BufMut};

use crate::error::{Result, StoreError};

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_I32: u8 = 0x02;
const TAG_I64: u8 = 0x03;
const TAG_U64: u8 = 0x04;
const TAG_F64: u8 = 0x05;
const TAG_STR: u8 = 0x06;
const TAG_BYTES: u8 = 0x07;

/// A typed field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Name of the variant, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::I32(_) => "i32",
            FieldValue::I64(_) => "i64",
            FieldValue::U64(_) => "u64",
            FieldValue::F64(_) => "f64",
            FieldValue::Str(_) => "string",
            FieldValue::Bytes(_) => "bytes",
        }
    }

    /// Append tag + payload
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            FieldValue::Null => buf.put_u8(TAG_NULL),
            FieldValue::Bool(v) => {
                buf.put_u8(TAG_BOOL);
                buf.put_u8(u8::from(*v));
            }
            FieldValue::I32(v) => {
                buf.put_u8(TAG_I32);
                buf.put_i32_le(*v);
            }
            FieldValue::I64(v) => {
                buf.put_u8(TAG_I64);
                buf.put_i64_le(*v);
            }
            FieldValue::U64(v) => {
                buf.put_u8(TAG_U64);
                buf.put_u64_le(*v);
            }
            FieldValue::F64(v) => {
                buf.put_u8(TAG_F64);
                buf.put_f64_le(*v);
            }
            FieldValue::Str(v) => {
                buf.put_u8(TAG_STR);
                put_len(buf, v.len())?;
                buf.put_slice(v.as_bytes());
            }
            FieldValue::Bytes(v) => {
                buf.put_u8(TAG_BYTES);
                put_len(buf, v.len())?;
                buf.put_slice(v);
            }
        }
        Ok(())
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Read one tagged value, advancing `buf`
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let tag = take_u8(buf)?;
        let value = match tag {
            TAG_NULL => FieldValue::Null,
            TAG_BOOL => match take_u8(buf)? {
                0 => FieldValue::Bool(false),
                1 => FieldValue::Bool(true),
                other => {
                    return Err(StoreError::Encoding(format!("invalid bool byte 0x{:02x}", other)))
                }
            },
            TAG_I32 => {
                need(buf, 4, "i32")?;
                FieldValue::I32(buf.get_i32_le())
            }
            TAG_I64 => {
                need(buf, 8, "i64")?;
                FieldValue::I64(buf.get_i64_le())
            }
            TAG_U64 => {
                need(buf, 8, "u64")?;
                FieldValue::U64(buf.get_u64_le())
            }
            TAG_F64 => {
                need(buf, 8, "f64")?;
                FieldValue::F64(buf.get_f64_le())
            }
            TAG_STR => {
                let raw = take_len_prefixed(buf, "string")?;
                let s = String::from_utf8(raw)
                    .map_err(|e| StoreError::Encoding(format!("string field is not UTF-8: {}", e)))?;
                FieldValue::Str(s)
            }
            TAG_BYTES => FieldValue::Bytes(take_len_prefixed(buf, "bytes")?),
            other => {
                return Err(StoreError::Encoding(format!("unknown value tag 0x{:02x}", other)))
            }
        };
        Ok(value)
    }

    /// Decode a value that must span all of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        let value = Self::decode(&mut buf)?;
        if buf.has_remaining() {
            return Err(StoreError::Encoding(format!(
                "{} trailing bytes after value",
                buf.remaining()
            )));
        }
        Ok(value)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Any integer variant, range-checked into i64
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            FieldValue::I32(v) => Ok(i64::from(*v)),
            FieldValue::I64(v) => Ok(*v),
            FieldValue::U64(v) => i64::try_from(*v)
                .map_err(|_| StoreError::Encoding(format!("{} does not fit in i64", v))),
            other => Err(mismatch("integer", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            FieldValue::Str(s) => Ok(s),
            other => Err(mismatch("string", other)),
        }
    }

    /// Raw bytes of a `Bytes` value
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            FieldValue::Bytes(b) => Ok(b),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

fn mismatch(expected: &str, found: &FieldValue) -> StoreError {
    StoreError::Encoding(format!("expected {}, found {}", expected, found.type_name()))
}

fn put_len<B: BufMut>(buf: &mut B, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| StoreError::Encoding(format!("field of {} bytes is too large", len)))?;
    buf.put_u32_le(len);
    Ok(())
}

fn need<B: Buf>(buf: &B, n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(StoreError::Encoding(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

fn take_u8<B: Buf>(buf: &mut B) -> Result<u8> {
    need(buf, 1, "tag")?;
    Ok(buf.get_u8())
}

fn take_len_prefixed<B: Buf>(buf: &mut B, what: &str) -> Result<Vec<u8>> {
    need(buf, 4, what)?;
    let len = buf.get_u32_le() as usize;
    need(buf, len, what)?;
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

// =============================================================================
// Conversions
// =============================================================================

macro_rules! field_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(v: $ty) -> Self {
                    FieldValue::$variant(v)
                }
            }

            impl TryFrom<FieldValue> for $ty {
                type Error = StoreError;

                fn try_from(value: FieldValue) -> Result<Self> {
                    match value {
                        FieldValue::$variant(v) => Ok(v),
                        other => Err(mismatch(stringify!($ty), &other)),
                    }
                }
            }
        )*
    };
}

field_conversions! {
    bool => Bool,
    i32 => I32,
    i64 => I64,
    u64 => U64,
    f64 => F64,
    String => Str,
    Vec<u8> => Bytes,
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<&[u8]> for FieldValue {
    fn from(v: &[u8]) -> Self {
        FieldValue::Bytes(v.to_vec())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(FieldValue::Null, Into::into)
    }
}

/// Convert a possibly-null value into an optional field
pub fn optional<T>(value: FieldValue) -> Result<Option<T>>
where
    T: TryFrom<FieldValue, Error = StoreError>,
{
    match value {
        FieldValue::Null => Ok(None),
        other => T::try_from(other).map(Some),
    }
}
