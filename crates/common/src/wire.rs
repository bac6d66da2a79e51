//! Protobuf wire form of [`Payload`].
//!
//! The layout is the `Payload` message existing producers exchange:
//!
//! ```text
//! message Payload {
//!   map<string, bytes> metadata = 1;
//!   bytes data = 2;
//! }
//! ```
//!
//! The codec seals this form, so an envelope decrypts back to the complete
//! inner payload, metadata included. Unknown fields are skipped on decode.

use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

use crate::payload::Payload;

const METADATA_FIELD: u32 = 1;
const DATA_FIELD: u32 = 2;
const ENTRY_KEY_FIELD: u32 = 1;
const ENTRY_VALUE_FIELD: u32 = 2;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Errors produced when parsing the wire form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// The input ended inside a field.
    #[error("unexpected end of input")]
    Truncated,

    /// A varint ran past 10 bytes.
    #[error("varint overflow")]
    VarintOverflow,

    /// Group wire types (3, 4) and unassigned ones are not accepted.
    #[error("unsupported wire type {0}")]
    UnsupportedWireType(u8),

    /// A known field arrived with the wrong wire type.
    #[error("field {field} has wire type {wire_type}, expected length-delimited")]
    UnexpectedWireType {
        /// Field number.
        field: u32,
        /// Wire type found.
        wire_type: u8,
    },

    /// A metadata key was not valid UTF-8.
    #[error("metadata key is not valid UTF-8")]
    InvalidKey,
}

impl Payload {
    /// Length in bytes of [`to_wire`](Self::to_wire)'s output.
    pub fn encoded_len(&self) -> usize {
        let metadata: usize = self
            .metadata
            .iter()
            .map(|(k, v)| field_len(entry_len(k.as_bytes(), v)))
            .sum();
        let data = if self.data.is_empty() {
            0
        } else {
            field_len(self.data.len())
        };
        metadata + data
    }

    /// Serialise to the protobuf wire form.
    ///
    /// Metadata entries are written in key order; empty `data` is omitted.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        for (key, value) in &self.metadata {
            put_key(&mut buf, METADATA_FIELD, WIRE_LEN);
            put_varint(&mut buf, entry_len(key.as_bytes(), value) as u64);
            put_bytes_field(&mut buf, ENTRY_KEY_FIELD, key.as_bytes());
            put_bytes_field(&mut buf, ENTRY_VALUE_FIELD, value);
        }
        if !self.data.is_empty() {
            put_bytes_field(&mut buf, DATA_FIELD, &self.data);
        }
        buf
    }

    /// Parse the protobuf wire form.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] for truncated or malformed input.
    pub fn from_wire(mut buf: &[u8]) -> Result<Self, WireError> {
        let mut payload = Payload::default();
        while buf.has_remaining() {
            let (field, wire_type) = get_key(&mut buf)?;
            match (field, wire_type) {
                (METADATA_FIELD, WIRE_LEN) => {
                    let (key, value) = get_entry(get_len_delimited(&mut buf)?)?;
                    payload.metadata.insert(key, value);
                }
                (DATA_FIELD, WIRE_LEN) => {
                    payload.data = Bytes::copy_from_slice(get_len_delimited(&mut buf)?);
                }
                (METADATA_FIELD | DATA_FIELD, wire_type) => {
                    return Err(WireError::UnexpectedWireType { field, wire_type })
                }
                (_, wire_type) => skip(&mut buf, wire_type)?,
            }
        }
        Ok(payload)
    }
}

fn get_entry(mut buf: &[u8]) -> Result<(String, Bytes), WireError> {
    let mut key = String::new();
    let mut value = Bytes::new();
    while buf.has_remaining() {
        let (field, wire_type) = get_key(&mut buf)?;
        match (field, wire_type) {
            (ENTRY_KEY_FIELD, WIRE_LEN) => {
                key = String::from_utf8(get_len_delimited(&mut buf)?.to_vec())
                    .map_err(|_| WireError::InvalidKey)?;
            }
            (ENTRY_VALUE_FIELD, WIRE_LEN) => {
                value = Bytes::copy_from_slice(get_len_delimited(&mut buf)?);
            }
            (ENTRY_KEY_FIELD | ENTRY_VALUE_FIELD, wire_type) => {
                return Err(WireError::UnexpectedWireType { field, wire_type })
            }
            (_, wire_type) => skip(&mut buf, wire_type)?,
        }
    }
    Ok((key, value))
}

fn varint_len(value: u64) -> usize {
    ((64 - (value | 1).leading_zeros() as usize) + 6) / 7
}

/// Tag byte + length prefix + body, for field numbers below 16.
fn field_len(body: usize) -> usize {
    1 + varint_len(body as u64) + body
}

fn entry_len(key: &[u8], value: &[u8]) -> usize {
    field_len(key.len()) + field_len(value.len())
}

fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn put_key(buf: &mut Vec<u8>, field: u32, wire_type: u8) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire_type));
}

fn put_bytes_field(buf: &mut Vec<u8>, field: u32, value: &[u8]) {
    put_key(buf, field, WIRE_LEN);
    put_varint(buf, value.len() as u64);
    buf.put_slice(value);
}

fn get_varint(buf: &mut &[u8]) -> Result<u64, WireError> {
    let mut value = 0u64;
    for shift in (0..70).step_by(7) {
        if !buf.has_remaining() {
            return Err(WireError::Truncated);
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte < 0x80 {
            return Ok(value);
        }
    }
    Err(WireError::VarintOverflow)
}

fn get_key(buf: &mut &[u8]) -> Result<(u32, u8), WireError> {
    let key = get_varint(buf)?;
    Ok(((key >> 3) as u32, (key & 0x7) as u8))
}

fn get_len_delimited<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], WireError> {
    let len = usize::try_from(get_varint(buf)?).map_err(|_| WireError::Truncated)?;
    if buf.len() < len {
        return Err(WireError::Truncated);
    }
    let whole: &'a [u8] = *buf;
    let (body, rest) = whole.split_at(len);
    *buf = rest;
    Ok(body)
}

fn advance(buf: &mut &[u8], n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        return Err(WireError::Truncated);
    }
    buf.advance(n);
    Ok(())
}

fn skip(buf: &mut &[u8], wire_type: u8) -> Result<(), WireError> {
    match wire_type {
        WIRE_VARINT => get_varint(buf).map(|_| ()),
        WIRE_FIXED64 => advance(buf, 8),
        WIRE_LEN => get_len_delimited(buf).map(|_| ()),
        WIRE_FIXED32 => advance(buf, 4),
        other => Err(WireError::UnsupportedWireType(other)),
    }
}
