use md5::{Digest, Md5};

use crate::hash::DataHash;
use crate::output::OutputStream;

/// Output stream that hashes everything written to it instead of keeping it.
///
/// Finishing consumes the stream, so a digest can only be taken once.
#[derive(Clone, Default)]
pub struct Md5OutputStream {
    context: Md5,
    size: usize,
}

impl Md5OutputStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> DataHash {
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&self.context.finalize());
        DataHash::from_digest(digest)
    }

    /// MD5 of a complete buffer.
    pub fn digest(bytes: &[u8]) -> DataHash {
        let mut stream = Self::new();
        stream.write_buffer(bytes);
        stream.finish()
    }
}

impl OutputStream for Md5OutputStream {
    fn write_buffer(&mut self, bytes: &[u8]) {
        self.context.update(bytes);
        self.size += bytes.len();
    }

    fn size(&self) -> usize {
        self.size
    }
}

impl std::fmt::Debug for Md5OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Md5OutputStream")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
