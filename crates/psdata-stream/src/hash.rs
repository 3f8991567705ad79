use std::fmt;

use serde::{Deserialize, Serialize};

/// 128-bit structural hash, held as two big-endian 64-bit words of the MD5
/// digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DataHash {
    a: u64,
    b: u64,
}

impl DataHash {
    pub const ZERO: Self = Self { a: 0, b: 0 };

    pub const fn from_words(a: u64, b: u64) -> Self {
        Self { a, b }
    }

    pub fn from_digest(digest: [u8; 16]) -> Self {
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        a.copy_from_slice(&digest[..8]);
        b.copy_from_slice(&digest[8..]);
        Self {
            a: u64::from_be_bytes(a),
            b: u64::from_be_bytes(b),
        }
    }

    pub fn words(&self) -> (u64, u64) {
        (self.a, self.b)
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.a.to_be_bytes());
        out[8..].copy_from_slice(&self.b.to_be_bytes());
        out
    }

    /// 32 lowercase hex digits, digest bytes in order.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut out = [0u8; 16];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self::from_digest(out))
    }

    /// Leading 32 bits.
    pub fn to_u32(&self) -> u32 {
        (self.a >> 32) as u32
    }

    /// Leading 64 bits.
    pub fn to_u64(&self) -> u64 {
        self.a
    }
}

impl fmt::Display for DataHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for DataHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataHash({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_bytes_map_to_words() {
        let mut digest = [0u8; 16];
        for (i, b) in digest.iter_mut().enumerate() {
            *b = i as u8;
        }
        let hash = DataHash::from_digest(digest);
        assert_eq!(hash.words(), (0x0001_0203_0405_0607, 0x0809_0A0B_0C0D_0E0F));
        assert_eq!(hash.to_bytes(), digest);
        assert_eq!(hash.to_hex(), "000102030405060708090a0b0c0d0e0f");
        assert_eq!(hash.to_u32(), 0x0001_0203);
        assert_eq!(hash.to_u64(), 0x0001_0203_0405_0607);
    }

    #[test]
    fn hex_round_trip() {
        let hash = DataHash::from_words(u64::MAX, 42);
        assert_eq!(DataHash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert!(DataHash::from_hex("zz").is_err());
    }

    #[test]
    fn serde_round_trip() {
        let hash = DataHash::from_words(1, 2);
        let json = serde_json::to_string(&hash).unwrap();
        let back: DataHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
