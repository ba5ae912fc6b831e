//! Big-endian cursor over class-file bytes

use super::error::{ClassReadError, ReadResult};

#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn bytes(&mut self, len: usize) -> ReadResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(ClassReadError::UnexpectedEof { offset: self.pos });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn u1(&mut self) -> ReadResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u2(&mut self) -> ReadResult<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u4(&mut self) -> ReadResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u8(&mut self) -> ReadResult<u64> {
        let hi = self.u4()? as u64;
        let lo = self.u4()? as u64;
        Ok((hi << 32) | lo)
    }

    pub fn i1(&mut self) -> ReadResult<i8> {
        Ok(self.u1()? as i8)
    }

    pub fn i2(&mut self) -> ReadResult<i16> {
        Ok(self.u2()? as i16)
    }

    pub fn i4(&mut self) -> ReadResult<i32> {
        Ok(self.u4()? as i32)
    }

    /// Advance to the next multiple of four, measured from the start of the slice
    pub fn align4(&mut self) -> ReadResult<()> {
        let pad = (4 - self.pos % 4) % 4;
        self.bytes(pad).map(|_| ())
    }
}
