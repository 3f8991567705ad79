/// One-byte tags of the binary format.
///
/// Value tags are ASCII so hex dumps stay readable. `Redirect` and
/// `RedirectEnd` only occur in concatenated imprint buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Token {
    KeyBegin = b'$',
    KeyEnd = b'%',
    ArrayBegin = b'[',
    ArrayEnd = b']',
    ObjectBegin = b'{',
    ObjectEnd = b'}',
    ValueU8 = b'A',
    ValueI32 = b'F',
    ValueI64 = b'H',
    ValueF32 = b'I',
    ValueNull = b'a',
    ValueBool = b'b',
    ValueString = b'c',
    ValueName = b'd',
    Redirect = 0x1A,
    RedirectEnd = 0x0A,
}

impl Token {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            b'$' => Self::KeyBegin,
            b'%' => Self::KeyEnd,
            b'[' => Self::ArrayBegin,
            b']' => Self::ArrayEnd,
            b'{' => Self::ObjectBegin,
            b'}' => Self::ObjectEnd,
            b'A' => Self::ValueU8,
            b'F' => Self::ValueI32,
            b'H' => Self::ValueI64,
            b'I' => Self::ValueF32,
            b'a' => Self::ValueNull,
            b'b' => Self::ValueBool,
            b'c' => Self::ValueString,
            b'd' => Self::ValueName,
            0x1A => Self::Redirect,
            0x0A => Self::RedirectEnd,
            _ => return None,
        })
    }

    pub fn byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tag_round_trips() {
        for byte in 0..=u8::MAX {
            if let Some(token) = Token::from_byte(byte) {
                assert_eq!(token.byte(), byte);
            }
        }
    }

    #[test]
    fn zero_is_not_a_token() {
        assert_eq!(Token::from_byte(0), None);
    }

    #[test]
    fn tags_are_ascii() {
        assert_eq!(Token::ObjectBegin.byte(), b'{');
        assert_eq!(Token::ValueI32.byte(), b'F');
        assert_eq!(Token::Redirect.byte(), 0x1A);
        assert_eq!(Token::RedirectEnd.byte(), 0x0A);
    }
}
