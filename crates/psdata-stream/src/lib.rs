//! Byte streams for the PsData codecs.
//!
//! Everything on the wire is big-endian. Signed integers use sign-magnitude
//! (high bit = sign, remaining bits = absolute value) and strings are a `u32`
//! character count followed by one `u32` code point per character.
//!
//! [`Md5OutputStream`] accepts the same writes as a buffer but only feeds an
//! MD5 context, which is how structural hashes are combined without building
//! intermediate buffers.

pub mod error;
pub mod hash;
pub mod input;
pub mod md5_stream;
pub mod output;

pub use error::{StreamError, StreamResult};
pub use hash::DataHash;
pub use input::BufferInputStream;
pub use md5_stream::Md5OutputStream;
pub use output::{
    decode_i32, decode_i64, encode_i32, encode_i64, BufferOutputStream, OutputStream,
};
