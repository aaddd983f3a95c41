//! Canonical binary encoding.
//!
//! Everything that is hashed, sized or persisted goes through these traits.
//! The format is deterministic:
//!
//! - integers are fixed-width little-endian;
//! - `bool` is one byte, 0 or 1;
//! - sequences carry a `u32` element count;
//! - `Option<T>` is a one-byte tag followed by the value when present;
//! - 32-byte ids are written raw.

use crate::hash::{AssetId, Hash};
use thiserror::Error;

/// Decoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

/// Result type for decoding.
pub type CodecResult<T> = Result<T, CodecError>;

pub trait Encode {
    fn encode(&self, out: &mut Vec<u8>);

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    fn encoded_len(&self) -> usize {
        self.to_bytes().len()
    }
}

pub trait Decode: Sized {
    /// Decode one value, advancing `input` past it.
    fn decode(input: &mut &[u8]) -> CodecResult<Self>;

    /// Decode a value that must occupy all of `data`.
    fn from_bytes(data: &[u8]) -> CodecResult<Self> {
        let mut input = data;
        let value = Self::decode(&mut input)?;
        if !input.is_empty() {
            return Err(CodecError::TrailingBytes(input.len()));
        }
        Ok(value)
    }
}

pub(crate) fn read_bytes<'a>(input: &mut &'a [u8], n: usize) -> CodecResult<&'a [u8]> {
    if input.len() < n {
        return Err(CodecError::UnexpectedEof);
    }
    let (bytes, rest) = input.split_at(n);
    *input = rest;
    Ok(bytes)
}

fn read_array<const N: usize>(input: &mut &[u8]) -> CodecResult<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(read_bytes(input, N)?);
    Ok(out)
}

impl Encode for u8 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }
}

impl Decode for u8 {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(read_bytes(input, 1)?[0])
    }
}

macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }

            impl Decode for $t {
                fn decode(input: &mut &[u8]) -> CodecResult<Self> {
                    Ok(<$t>::from_le_bytes(read_array(input)?))
                }
            }
        )*
    };
}

impl_int!(u16, u32, u64);

impl Encode for bool {
    fn encode(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        match u8::decode(input)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(CodecError::InvalidValue("bool must be 0 or 1")),
        }
    }
}

impl Encode for [u8; 32] {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl Decode for [u8; 32] {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        read_array(input)
    }
}

impl Encode for Hash {
    fn encode(&self, out: &mut Vec<u8>) {
        self.0.encode(out);
    }
}

impl Decode for Hash {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(Hash(read_array(input)?))
    }
}

impl Encode for AssetId {
    fn encode(&self, out: &mut Vec<u8>) {
        self.0.encode(out);
    }
}

impl Decode for AssetId {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        Ok(AssetId(read_array(input)?))
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, out: &mut Vec<u8>) {
        (self.len() as u32).encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        let len = u32::decode(input)? as usize;
        // Every element takes at least one byte.
        if len > input.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(T::decode(input)?);
        }
        Ok(out)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            None => out.push(0),
            Some(value) => {
                out.push(1);
                value.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> CodecResult<Self> {
        match u8::decode(input)? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input)?)),
            _ => Err(CodecError::InvalidValue("option tag must be 0 or 1")),
        }
    }
}
