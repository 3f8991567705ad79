//! Observable data trees for game state.
//!
//! A [`DataTree`] owns typed nodes whose fields are declared up front in a
//! [`TypeRegistry`]. Nodes serialize through one visitor protocol
//! ([`DataSerializer`] / [`DataDeserializer`]) into either the compact
//! binary token format or JSON.
//!
//! Every node caches an *imprint*: its own fields in binary form with
//! placeholders where nested objects live. Imprints give a Merkle-style
//! [`DataHash`] over whole subtrees, and can be concatenated into a single
//! redirect-linked buffer that a worker thread replays into any serializer
//! without touching the live tree.

pub mod binary;
pub mod config;
pub mod convert;
pub mod error;
pub mod event;
pub mod field;
pub mod imprint;
pub mod json;
pub mod link;
pub mod protocol;
pub mod registry;
pub mod task;
pub mod token;
pub mod tree;

#[cfg(test)]
pub(crate) mod fixtures;

pub use binary::{
    BinaryDeserializer, BinarySerializer, ImprintBinaryDeserializer, PlainTokens, RedirectTokens,
    TokenStream,
};
pub use config::{FieldConfig, LinkConfig, SchemaConfig, TypeConfig};
pub use convert::{BinaryConvertor, ImprintBinaryConvertor};
pub use error::{DataError, DataResult};
pub use event::{BindHandle, DataEvent, Listener};
pub use field::{FieldDescriptor, FieldKind, FieldMeta, FieldValue};
pub use imprint::{ConcatenatedBuffer, Imprint, ImprintChild, ImprintSerializer, RebuildStats};
pub use json::{JsonDeserializer, JsonSerializer};
pub use link::LinkDescriptor;
pub use protocol::{
    DataAllocator, DataDeserializer, DataRef, DataSerializer, ObjectSlot, MAX_NESTING,
};
pub use psdata_stream::DataHash;
pub use registry::{DataType, DataTypeBuilder, TypeRegistry};
pub use token::Token;
pub use tree::{DataTree, NodeId};
