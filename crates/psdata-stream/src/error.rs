use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("read of {needed} bytes at position {position} runs past end of stream ({len} bytes)")]
    OutOfRange {
        position: usize,
        needed: usize,
        len: usize,
    },

    #[error("shift back without a preceding read")]
    NothingToShiftBack,

    #[error("invalid character code point: {0:#x}")]
    InvalidChar(u32),

    #[error("position {position} is outside stream of {len} bytes")]
    PositionOutOfRange { position: usize, len: usize },
}

pub type StreamResult<T> = Result<T, StreamError>;
