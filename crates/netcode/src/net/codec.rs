use bytes::{Buf, BufMut, Bytes, BytesMut};
use glam::Vec3;

use super::protocol::PacketType;

pub const MAX_PACKET_SIZE: usize = 1200;
pub const LIST_DELIMITER: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("frame truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("unknown packet type tag {0}")]
    UnknownPacketType(u32),
    #[error("expected {expected:?} packet, found {found:?}")]
    UnexpectedType {
        expected: PacketType,
        found: PacketType,
    },
    #[error("text field is not valid utf-8")]
    InvalidUtf8,
    #[error("text field of {0} bytes does not fit a u16 length prefix")]
    TextTooLong(usize),
    #[error("list value {0:?} contains the list delimiter")]
    DelimiterInValue(String),
    #[error("list values must not be empty")]
    EmptyListValue,
    #[error("frame of {0} bytes exceeds the maximum packet size")]
    Oversized(usize),
}

/// Little-endian frame builder. Text is a `u16` byte length followed by UTF-8.
#[derive(Debug, Default)]
pub struct FrameWriter {
    buf: BytesMut,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn put_vec3(&mut self, value: Vec3) {
        self.put_f32(value.x);
        self.put_f32(value.y);
        self.put_f32(value.z);
    }

    pub fn put_text(&mut self, value: &str) -> Result<(), CodecError> {
        let len = u16::try_from(value.len()).map_err(|_| CodecError::TextTooLong(value.len()))?;
        self.buf.put_u16_le(len);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn put_list(&mut self, values: &[String]) -> Result<(), CodecError> {
        for value in values {
            if value.is_empty() {
                return Err(CodecError::EmptyListValue);
            }
            if value.contains(LIST_DELIMITER) {
                return Err(CodecError::DelimiterInValue(value.clone()));
            }
        }
        let mut joined = String::new();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                joined.push(LIST_DELIMITER);
            }
            joined.push_str(value);
        }
        self.put_text(&joined)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Result<Bytes, CodecError> {
        if self.buf.len() > MAX_PACKET_SIZE {
            return Err(CodecError::Oversized(self.buf.len()));
        }
        Ok(self.buf.freeze())
    }
}

/// Cursor over a received frame. Every read checks the remaining length first.
#[derive(Debug)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < needed {
            return Err(CodecError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn get_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn get_f32(&mut self) -> Result<f32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn get_vec3(&mut self) -> Result<Vec3, CodecError> {
        self.ensure(12)?;
        Ok(Vec3::new(
            self.buf.get_f32_le(),
            self.buf.get_f32_le(),
            self.buf.get_f32_le(),
        ))
    }

    pub fn get_text(&mut self) -> Result<String, CodecError> {
        self.ensure(2)?;
        let len = self.buf.get_u16_le() as usize;
        self.ensure(len)?;
        let (text, rest) = self.buf.split_at(len);
        self.buf = rest;
        std::str::from_utf8(text)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn get_list(&mut self) -> Result<Vec<String>, CodecError> {
        let joined = self.get_text()?;
        if joined.is_empty() {
            return Ok(Vec::new());
        }
        Ok(joined.split(LIST_DELIMITER).map(str::to_owned).collect())
    }
}
