use psdata_stream::StreamError;
use thiserror::Error;

use crate::token::Token;
use crate::tree::NodeId;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("unknown data type: {0}")]
    UnknownType(String),

    #[error("type {type_name} has no field {field}")]
    UnknownField { type_name: String, field: String },

    #[error("field {field} expects {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("node {0} already has a parent")]
    AlreadyAttached(NodeId),

    #[error("attaching {child} under {parent} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },

    #[error("unknown token byte {byte:#04x} at offset {offset}")]
    UnknownToken { byte: u8, offset: usize },

    #[error("expected {expected:?} at offset {offset}")]
    MissingToken { expected: Token, offset: usize },

    #[error("unexpected end of stream at offset {0}")]
    UnexpectedEnd(usize),

    #[error("pop_key({found:?}) does not match open key {expected:?}")]
    UnbalancedKey {
        expected: Option<String>,
        found: String,
    },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("placeholder at offset {offset} was already patched")]
    PlaceholderPatched { offset: usize },

    #[error("broken link: {0}")]
    Link(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no async runtime available: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DataResult<T> = Result<T, DataError>;
