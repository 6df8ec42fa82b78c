//! Tagged-field sub-messages.
//!
//! A message is an ordered list of `(ordinal, type tag, value)` triples:
//!
//! ```text
//! [u8: type tag][u16 BE: ordinal][value]
//! ```
//!
//! Fixed-width values are big-endian. Variable-width values (bytes, strings,
//! nested messages) carry a `u32 BE` length prefix. Ordinals are not unique
//! by construction; typed accessors read the first match.

use crate::{LinkError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Wire type tags.
pub mod type_tag {
    pub const INDICATOR: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const I32: u8 = 4;
    pub const I64: u8 = 5;
    pub const BYTES: u8 = 6;
    pub const F64: u8 = 11;
    pub const STRING: u8 = 14;
    pub const MESSAGE: u8 = 15;
}

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Presence-only marker, no payload.
    Indicator,
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Bytes(Bytes),
    Str(String),
    Message(FieldMessage),
}

impl FieldValue {
    fn type_tag(&self) -> u8 {
        match self {
            FieldValue::Indicator => type_tag::INDICATOR,
            FieldValue::Bool(_) => type_tag::BOOL,
            FieldValue::I32(_) => type_tag::I32,
            FieldValue::I64(_) => type_tag::I64,
            FieldValue::F64(_) => type_tag::F64,
            FieldValue::Bytes(_) => type_tag::BYTES,
            FieldValue::Str(_) => type_tag::STRING,
            FieldValue::Message(_) => type_tag::MESSAGE,
        }
    }
}

/// One ordinal-tagged field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub ordinal: u16,
    pub value: FieldValue,
}

/// An ordered sequence of tagged fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldMessage {
    fields: Vec<Field>,
}

impl FieldMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    pub fn with(mut self, ordinal: u16, value: FieldValue) -> Self {
        self.push(ordinal, value);
        self
    }

    pub fn push(&mut self, ordinal: u16, value: FieldValue) {
        self.fields.push(Field { ordinal, value });
    }

    /// First value stored under `ordinal`.
    pub fn get(&self, ordinal: u16) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|f| f.ordinal == ordinal)
            .map(|f| &f.value)
    }

    pub fn get_i32(&self, ordinal: u16) -> Option<i32> {
        match self.get(ordinal)? {
            FieldValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, ordinal: u16) -> Option<i64> {
        match self.get(ordinal)? {
            FieldValue::I64(v) => Some(*v),
            FieldValue::I32(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn get_str(&self, ordinal: u16) -> Option<&str> {
        match self.get(ordinal)? {
            FieldValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_message(&self, ordinal: u16) -> Option<&FieldMessage> {
        match self.get(ordinal)? {
            FieldValue::Message(v) => Some(v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Append the encoded fields to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        for field in &self.fields {
            buf.put_u8(field.value.type_tag());
            buf.put_u16(field.ordinal);
            match &field.value {
                FieldValue::Indicator => {}
                FieldValue::Bool(v) => buf.put_u8(u8::from(*v)),
                FieldValue::I32(v) => buf.put_i32(*v),
                FieldValue::I64(v) => buf.put_i64(*v),
                FieldValue::F64(v) => buf.put_f64(*v),
                FieldValue::Bytes(v) => {
                    buf.put_u32(v.len() as u32);
                    buf.put_slice(v);
                }
                FieldValue::Str(v) => {
                    buf.put_u32(v.len() as u32);
                    buf.put_slice(v.as_bytes());
                }
                FieldValue::Message(v) => {
                    let mut nested = BytesMut::new();
                    v.encode(&mut nested);
                    buf.put_u32(nested.len() as u32);
                    buf.put_slice(&nested);
                }
            }
        }
    }

    /// Decode a complete message; every byte of `buf` must belong to a field.
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        let mut message = FieldMessage::new();
        while buf.has_remaining() {
            need(&buf, 3, "field header")?;
            let tag = buf.get_u8();
            let ordinal = buf.get_u16();
            let value = match tag {
                type_tag::INDICATOR => FieldValue::Indicator,
                type_tag::BOOL => {
                    need(&buf, 1, "bool")?;
                    FieldValue::Bool(buf.get_u8() != 0)
                }
                type_tag::I32 => {
                    need(&buf, 4, "i32")?;
                    FieldValue::I32(buf.get_i32())
                }
                type_tag::I64 => {
                    need(&buf, 8, "i64")?;
                    FieldValue::I64(buf.get_i64())
                }
                type_tag::F64 => {
                    need(&buf, 8, "f64")?;
                    FieldValue::F64(buf.get_f64())
                }
                type_tag::BYTES => FieldValue::Bytes(take_sized(&mut buf, "bytes")?),
                type_tag::STRING => {
                    let raw = take_sized(&mut buf, "string")?;
                    let text = String::from_utf8(raw.to_vec()).map_err(|_| {
                        LinkError::decode(format!("Invalid UTF-8 in string field {}", ordinal))
                    })?;
                    FieldValue::Str(text)
                }
                type_tag::MESSAGE => {
                    let raw = take_sized(&mut buf, "message")?;
                    FieldValue::Message(FieldMessage::decode(raw)?)
                }
                other => {
                    return Err(LinkError::decode(format!(
                        "Unknown type tag {} for field {}",
                        other, ordinal
                    )));
                }
            };
            message.push(ordinal, value);
        }
        Ok(message)
    }
}

fn need(buf: &Bytes, len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(LinkError::decode(format!(
            "Truncated {}: need {} bytes, have {}",
            what,
            len,
            buf.remaining()
        )));
    }
    Ok(())
}

fn take_sized(buf: &mut Bytes, what: &str) -> Result<Bytes> {
    need(buf, 4, what)?;
    let len = buf.get_u32() as usize;
    need(buf, len, what)?;
    Ok(buf.split_to(len))
}
