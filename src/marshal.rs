// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 wire-format codec
//!
//! Implements the framing rules of "TPM 2.0 Structures" over byte buffers:
//! big-endian integers, sized buffers (u16 length prefix), lists (u32 count
//! prefix), sized structures (u16 byte-length prefix, zero meaning absent),
//! raw slices (externally framed), and discriminated unions driven by a
//! sibling selector field. Every other module goes through this one; nothing
//! else interprets raw bytes.

use thiserror::Error;

/// Errors raised while encoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarshalError {
    #[error("value of {0} bytes does not fit in a {1}-bit length prefix")]
    LengthOverflow(usize, u32),
    #[error("union value does not match selector 0x{0:x}")]
    InvalidSelector(u32),
}

/// Errors raised while decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnmarshalError {
    #[error("unexpected end of input: needed {needed} more bytes, {remaining} remain")]
    ShortRead { needed: usize, remaining: usize },
    #[error("declared size {declared} exceeds the {remaining} remaining input bytes")]
    LengthOverflow { declared: usize, remaining: usize },
    #[error("invalid union selector value 0x{0:x}")]
    InvalidSelector(u32),
    #[error("{0} bytes of input remain after unmarshalling")]
    TrailingBytes(usize),
    #[error("invalid encoding for {0}")]
    InvalidValue(&'static str),
}

/// Growable big-endian output buffer for building TPM commands.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    data: Vec<u8>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_bool(&mut self, v: bool) {
        self.data.push(v as u8);
    }

    /// Raw slice: no length prefix, the framing is conveyed externally.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Sized buffer (TPM2B): u16 length prefix followed by the bytes.
    pub fn put_sized_buffer(&mut self, data: &[u8]) -> Result<(), MarshalError> {
        let len =
            u16::try_from(data.len()).map_err(|_| MarshalError::LengthOverflow(data.len(), 16))?;
        self.put_u16(len);
        self.put_bytes(data);
        Ok(())
    }

    /// Sized structure: u16 byte-length prefix followed by the encoded body.
    /// `None` encodes as the two bytes `0x00 0x00`. The body is buffered
    /// first because its length is not known up front.
    pub fn put_sized<T: Marshal>(&mut self, value: Option<&T>) -> Result<(), MarshalError> {
        match value {
            None => {
                self.put_u16(0);
                Ok(())
            }
            Some(v) => {
                let mut body = CommandBuffer::new();
                v.marshal(&mut body)?;
                self.put_sized_buffer(body.as_bytes())
            }
        }
    }

    /// List: u32 element count followed by each element's encoding.
    pub fn put_list<T: Marshal>(&mut self, items: &[T]) -> Result<(), MarshalError> {
        let count =
            u32::try_from(items.len()).map_err(|_| MarshalError::LengthOverflow(items.len(), 32))?;
        self.put_u32(count);
        for item in items {
            item.marshal(self)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Patch a u32 at a fixed position (used for header size fields).
    pub fn update_u32(&mut self, pos: usize, v: u32) {
        self.data[pos..pos + 4].copy_from_slice(&v.to_be_bytes());
    }
}

/// Cursor over received TPM bytes.
#[derive(Debug)]
pub struct ResponseBuffer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ResponseBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], UnmarshalError> {
        if len > self.remaining() {
            return Err(UnmarshalError::ShortRead {
                needed: len - self.remaining(),
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, UnmarshalError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, UnmarshalError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, UnmarshalError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, UnmarshalError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn get_bool(&mut self) -> Result<bool, UnmarshalError> {
        Ok(self.get_u8()? != 0)
    }

    /// Raw slice of externally conveyed length.
    pub fn get_bytes(&mut self, len: usize) -> Result<Vec<u8>, UnmarshalError> {
        Ok(self.take(len)?.to_vec())
    }

    /// Sized buffer (TPM2B): allocates exactly the prefixed length.
    pub fn get_sized_buffer(&mut self) -> Result<Vec<u8>, UnmarshalError> {
        let len = self.get_u16()? as usize;
        if len > self.remaining() {
            return Err(UnmarshalError::LengthOverflow {
                declared: len,
                remaining: self.remaining(),
            });
        }
        self.get_bytes(len)
    }

    /// Sized structure: a zero length prefix decodes as `None`. The body is
    /// parsed from a sub-buffer bounded by the prefix and must consume it
    /// exactly.
    pub fn get_sized<T: Unmarshal>(&mut self) -> Result<Option<T>, UnmarshalError> {
        let len = self.get_u16()? as usize;
        if len == 0 {
            return Ok(None);
        }
        if len > self.remaining() {
            return Err(UnmarshalError::LengthOverflow {
                declared: len,
                remaining: self.remaining(),
            });
        }
        let mut inner = ResponseBuffer::new(self.take(len)?);
        let value = T::unmarshal(&mut inner)?;
        if inner.remaining() != 0 {
            return Err(UnmarshalError::InvalidValue(
                "sized structure body not fully consumed",
            ));
        }
        Ok(Some(value))
    }

    /// List: u32 element count followed by the elements.
    pub fn get_list<T: Unmarshal>(&mut self) -> Result<Vec<T>, UnmarshalError> {
        let count = self.get_u32()? as usize;
        // Every TPM list element occupies at least one byte, so a count
        // beyond the remaining input cannot be honoured.
        if count > self.remaining() {
            return Err(UnmarshalError::LengthOverflow {
                declared: count,
                remaining: self.remaining(),
            });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::unmarshal(self)?);
        }
        Ok(items)
    }

    /// Split off a bounded sub-region (used for the response parameter area
    /// framed by parameterSize).
    pub fn get_region(&mut self, len: usize) -> Result<ResponseBuffer<'a>, UnmarshalError> {
        if len > self.remaining() {
            return Err(UnmarshalError::LengthOverflow {
                declared: len,
                remaining: self.remaining(),
            });
        }
        Ok(ResponseBuffer::new(self.take(len)?))
    }

    pub fn get_remaining(&mut self) -> Vec<u8> {
        let v = self.data[self.pos..].to_vec();
        self.pos = self.data.len();
        v
    }

    /// Asserts that the input was fully consumed.
    pub fn finish(&self) -> Result<(), UnmarshalError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(UnmarshalError::TrailingBytes(n)),
        }
    }
}

/// Types encodable to the TPM wire format.
pub trait Marshal {
    fn marshal(&self, buf: &mut CommandBuffer) -> Result<(), MarshalError>;

    fn to_bytes(&self) -> Result<Vec<u8>, MarshalError> {
        let mut buf = CommandBuffer::new();
        self.marshal(&mut buf)?;
        Ok(buf.into_vec())
    }
}

/// Types decodable from the TPM wire format.
pub trait Unmarshal: Sized {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> Result<Self, UnmarshalError>;

    /// Decodes a complete value and rejects trailing input.
    fn from_bytes_exact(data: &[u8]) -> Result<Self, UnmarshalError> {
        let mut buf = ResponseBuffer::new(data);
        let v = Self::unmarshal(&mut buf)?;
        buf.finish()?;
        Ok(v)
    }
}

macro_rules! primitive_codec {
    ($ty:ty, $put:ident, $get:ident) => {
        impl Marshal for $ty {
            fn marshal(&self, buf: &mut CommandBuffer) -> Result<(), MarshalError> {
                buf.$put(*self);
                Ok(())
            }
        }

        impl Unmarshal for $ty {
            fn unmarshal(buf: &mut ResponseBuffer<'_>) -> Result<Self, UnmarshalError> {
                buf.$get()
            }
        }
    };
}

primitive_codec!(u8, put_u8, get_u8);
primitive_codec!(u16, put_u16, get_u16);
primitive_codec!(u32, put_u32, get_u32);
primitive_codec!(u64, put_u64, get_u64);
primitive_codec!(bool, put_bool, get_bool);
