const SIGN_32: u32 = 0x8000_0000;
const SIGN_64: u64 = 0x8000_0000_0000_0000;

/// Encode a signed 32-bit value as sign-magnitude.
///
/// `i32::MIN` has no positive counterpart and is written as the bare sign bit.
pub fn encode_i32(value: i32) -> u32 {
    if value < 0 {
        value.unsigned_abs() | SIGN_32
    } else {
        value as u32
    }
}

/// Decode a sign-magnitude 32-bit value. A bare sign bit decodes to `i32::MIN`.
pub fn decode_i32(raw: u32) -> i32 {
    let magnitude = raw & !SIGN_32;
    if raw & SIGN_32 == 0 {
        magnitude as i32
    } else if magnitude == 0 {
        i32::MIN
    } else {
        -(magnitude as i32)
    }
}

/// Encode a signed 64-bit value as sign-magnitude.
pub fn encode_i64(value: i64) -> u64 {
    if value < 0 {
        value.unsigned_abs() | SIGN_64
    } else {
        value as u64
    }
}

/// Decode a sign-magnitude 64-bit value. A bare sign bit decodes to `i64::MIN`.
pub fn decode_i64(raw: u64) -> i64 {
    let magnitude = raw & !SIGN_64;
    if raw & SIGN_64 == 0 {
        magnitude as i64
    } else if magnitude == 0 {
        i64::MIN
    } else {
        -(magnitude as i64)
    }
}

/// Sink for the big-endian wire primitives.
///
/// Implementors provide raw byte appends and a running size; every typed
/// write is derived from those two.
pub trait OutputStream {
    fn write_buffer(&mut self, bytes: &[u8]);

    /// Number of bytes written so far.
    fn size(&self) -> usize;

    fn write_u8(&mut self, value: u8) {
        self.write_buffer(&[value]);
    }

    fn write_u32(&mut self, value: u32) {
        self.write_buffer(&value.to_be_bytes());
    }

    fn write_u64(&mut self, value: u64) {
        self.write_buffer(&value.to_be_bytes());
    }

    fn write_i32(&mut self, value: i32) {
        self.write_u32(encode_i32(value));
    }

    fn write_i64(&mut self, value: i64) {
        self.write_u64(encode_i64(value));
    }

    fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    fn write_char(&mut self, value: char) {
        self.write_u32(u32::from(value));
    }

    /// Character count, then one code point per character.
    fn write_string(&mut self, value: &str) {
        self.write_u32(value.chars().count() as u32);
        for c in value.chars() {
            self.write_char(c);
        }
    }
}

/// Growable in-memory output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferOutputStream {
    buffer: Vec<u8>,
}

impl BufferOutputStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Overwrite bytes that were already written. Used to patch fixed-size
    /// slots such as placeholders.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl OutputStream for BufferOutputStream {
    fn write_buffer(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn size(&self) -> usize {
        self.buffer.len()
    }
}

impl OutputStream for Vec<u8> {
    fn write_buffer(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }

    fn size(&self) -> usize {
        self.len()
    }
}

impl From<BufferOutputStream> for bytes::Bytes {
    fn from(stream: BufferOutputStream) -> Self {
        bytes::Bytes::from(stream.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn negative_i32_sets_sign_bit() {
        let mut out = BufferOutputStream::new();
        out.write_i32(-5);
        assert_eq!(out.buffer(), &[0x80, 0x00, 0x00, 0x05]);
    }

    #[test]
    fn positive_i32_is_plain_big_endian() {
        let mut out = BufferOutputStream::new();
        out.write_i32(0x0102_0304);
        assert_eq!(out.buffer(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn i32_min_encodes_as_bare_sign_bit() {
        assert_eq!(encode_i32(i32::MIN), 0x8000_0000);
        assert_eq!(decode_i32(0x8000_0000), i32::MIN);
        assert_eq!(encode_i64(i64::MIN), SIGN_64);
        assert_eq!(decode_i64(SIGN_64), i64::MIN);
    }

    #[test]
    fn extreme_values_round_trip() {
        for v in [0, 1, -1, i32::MAX, -i32::MAX, i32::MIN] {
            assert_eq!(decode_i32(encode_i32(v)), v);
        }
        for v in [0, 1, -1, i64::MAX, -i64::MAX, i64::MIN] {
            assert_eq!(decode_i64(encode_i64(v)), v);
        }
    }

    #[test]
    fn string_layout() {
        let mut out = BufferOutputStream::new();
        out.write_string("hé");
        assert_eq!(
            out.buffer(),
            &[0, 0, 0, 2, 0, 0, 0, b'h', 0, 0, 0, 0xE9]
        );
    }

    #[test]
    fn f32_bool_u64_layout() {
        let mut out = BufferOutputStream::new();
        out.write_f32(1.0);
        out.write_bool(true);
        out.write_u64(0x0102_0304_0506_0708);
        assert_eq!(
            out.buffer(),
            &[0x3F, 0x80, 0, 0, 1, 1, 2, 3, 4, 5, 6, 7, 8]
        );
        assert_eq!(out.size(), 13);
    }

    #[test]
    fn reset_clears_buffer() {
        let mut out = BufferOutputStream::new();
        out.write_u32(7);
        out.reset();
        assert_eq!(out.size(), 0);
    }

    proptest! {
        #[test]
        fn sign_magnitude_i32_round_trips(v in any::<i32>()) {
            prop_assert_eq!(decode_i32(encode_i32(v)), v);
        }

        #[test]
        fn sign_magnitude_i64_round_trips(v in any::<i64>()) {
            prop_assert_eq!(decode_i64(encode_i64(v)), v);
        }
    }
}
