use bytes::Bytes;

use crate::error::{StreamError, StreamResult};
use crate::output::{decode_i32, decode_i64};

/// Cursor over an immutable byte buffer.
///
/// Every read records where it started so that exactly one read can be
/// undone with [`shift_back`](Self::shift_back). That is what lets the
/// decoders peek a token and give it back when it is not the expected one.
#[derive(Debug, Clone)]
pub struct BufferInputStream {
    data: Bytes,
    index: usize,
    prev: Option<usize>,
}

impl BufferInputStream {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            index: 0,
            prev: None,
        }
    }

    /// Start reading at `position`.
    pub fn at(data: impl Into<Bytes>, position: usize) -> StreamResult<Self> {
        let mut stream = Self::new(data);
        stream.set_position(position)?;
        Ok(stream)
    }

    pub fn has_data(&self) -> bool {
        self.index < self.data.len()
    }

    pub fn position(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.index
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Jump to an absolute position. Clears the unread slot.
    pub fn set_position(&mut self, position: usize) -> StreamResult<()> {
        if position > self.data.len() {
            return Err(StreamError::PositionOutOfRange {
                position,
                len: self.data.len(),
            });
        }
        self.index = position;
        self.prev = None;
        Ok(())
    }

    /// Undo the most recent read.
    pub fn shift_back(&mut self) -> StreamResult<()> {
        match self.prev.take() {
            Some(prev) => {
                self.index = prev;
                Ok(())
            }
            None => Err(StreamError::NothingToShiftBack),
        }
    }

    fn take(&mut self, needed: usize) -> StreamResult<&[u8]> {
        let start = self.index;
        let end = start
            .checked_add(needed)
            .filter(|end| *end <= self.data.len())
            .ok_or(StreamError::OutOfRange {
                position: start,
                needed,
                len: self.data.len(),
            })?;
        self.prev = Some(start);
        self.index = end;
        Ok(&self.data[start..end])
    }

    fn take_array<const N: usize>(&mut self) -> StreamResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> StreamResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> StreamResult<u32> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> StreamResult<u64> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> StreamResult<i32> {
        Ok(decode_i32(self.read_u32()?))
    }

    pub fn read_i64(&mut self) -> StreamResult<i64> {
        Ok(decode_i64(self.read_u64()?))
    }

    pub fn read_f32(&mut self) -> StreamResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_bool(&mut self) -> StreamResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_char(&mut self) -> StreamResult<char> {
        let raw = self.read_u32()?;
        char::from_u32(raw).ok_or(StreamError::InvalidChar(raw))
    }

    /// Read a length-prefixed string. A following `shift_back` rewinds to
    /// before the length, not just the last character.
    pub fn read_string(&mut self) -> StreamResult<String> {
        let start = self.index;
        let count = self.read_u32()? as usize;
        if count.saturating_mul(4) > self.remaining() {
            self.index = start;
            return Err(StreamError::OutOfRange {
                position: start + 4,
                needed: count.saturating_mul(4),
                len: self.data.len(),
            });
        }
        let mut out = String::with_capacity(count);
        for _ in 0..count {
            match self.read_char() {
                Ok(c) => out.push(c),
                Err(e) => {
                    self.index = start;
                    self.prev = None;
                    return Err(e);
                }
            }
        }
        self.prev = Some(start);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{BufferOutputStream, OutputStream};

    fn written(f: impl FnOnce(&mut BufferOutputStream)) -> BufferInputStream {
        let mut out = BufferOutputStream::new();
        f(&mut out);
        BufferInputStream::new(out.into_inner())
    }

    #[test]
    fn reads_back_every_primitive() {
        let mut input = written(|out| {
            out.write_u8(7);
            out.write_u32(0xDEAD_BEEF);
            out.write_u64(u64::MAX - 1);
            out.write_i32(-123);
            out.write_i64(i64::MIN);
            out.write_f32(-2.5);
            out.write_bool(false);
            out.write_string("héllo");
        });
        assert_eq!(input.read_u8().unwrap(), 7);
        assert_eq!(input.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(input.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(input.read_i32().unwrap(), -123);
        assert_eq!(input.read_i64().unwrap(), i64::MIN);
        assert_eq!(input.read_f32().unwrap(), -2.5);
        assert!(!input.read_bool().unwrap());
        assert_eq!(input.read_string().unwrap(), "héllo");
        assert!(!input.has_data());
    }

    #[test]
    fn shift_back_undoes_one_read() {
        let mut input = written(|out| {
            out.write_u8(1);
            out.write_u8(2);
        });
        assert_eq!(input.read_u8().unwrap(), 1);
        assert_eq!(input.read_u8().unwrap(), 2);
        input.shift_back().unwrap();
        assert_eq!(input.position(), 1);
        assert_eq!(input.shift_back(), Err(StreamError::NothingToShiftBack));
    }

    #[test]
    fn shift_back_after_string_rewinds_length() {
        let mut input = written(|out| out.write_string("ab"));
        input.read_string().unwrap();
        input.shift_back().unwrap();
        assert_eq!(input.position(), 0);
    }

    #[test]
    fn shift_back_without_read_fails() {
        let mut input = BufferInputStream::new(vec![1u8]);
        assert_eq!(input.shift_back(), Err(StreamError::NothingToShiftBack));
    }

    #[test]
    fn read_past_end_is_error() {
        let mut input = BufferInputStream::new(vec![0u8, 1]);
        let err = input.read_u32().unwrap_err();
        assert_eq!(
            err,
            StreamError::OutOfRange {
                position: 0,
                needed: 4,
                len: 2
            }
        );
        assert_eq!(input.position(), 0);
    }

    #[test]
    fn truncated_string_is_error() {
        let mut input = BufferInputStream::new(vec![0u8, 0, 0, 9, 0, 0, 0, 65]);
        assert!(matches!(
            input.read_string(),
            Err(StreamError::OutOfRange { .. })
        ));
        assert_eq!(input.position(), 0);
    }

    #[test]
    fn invalid_code_point_is_error() {
        let mut input = BufferInputStream::new(vec![0u8, 0, 0xD8, 0x00]);
        assert_eq!(input.read_char(), Err(StreamError::InvalidChar(0xD800)));
    }

    #[test]
    fn set_position_bounds_and_clears_unread() {
        let mut input = BufferInputStream::new(vec![1u8, 2, 3]);
        input.read_u8().unwrap();
        input.set_position(2).unwrap();
        assert_eq!(input.shift_back(), Err(StreamError::NothingToShiftBack));
        assert_eq!(input.read_u8().unwrap(), 3);
        assert!(input.set_position(3).is_ok());
        assert!(input.set_position(4).is_err());
    }

    #[test]
    fn at_starts_mid_buffer() {
        let mut input = BufferInputStream::at(vec![9u8, 8, 7], 1).unwrap();
        assert_eq!(input.read_u8().unwrap(), 8);
        assert_eq!(input.remaining(), 1);
    }
}
