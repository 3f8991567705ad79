//! Links: fields that hold the key of a node stored elsewhere in the tree.
//!
//! A link pairs a key field of the owner (a string or name, or an array of
//! them) with a collection path from the root. Resolving the link looks the
//! key up in that collection, so `path = "units"` and `key = "7"` resolve to
//! the node at `units.7`. Nothing is cached; every call walks the tree.

use crate::error::{DataError, DataResult};
use crate::field::{FieldKind, FieldValue};
use crate::tree::{DataTree, NodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDescriptor {
    pub name: String,
    /// Dotted path from the root to the collection holding the targets.
    pub path: String,
    /// Owner field holding the key, or an array of keys.
    pub key: String,
    /// Whether an empty key resolves to nothing instead of failing.
    pub nullable: bool,
}

impl LinkDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            key: key.into(),
            nullable: false,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Whether `kind` can hold this link's key. Returns `Some(true)` for an
    /// array of keys, `Some(false)` for a single key.
    pub fn key_shape(kind: &FieldKind) -> Option<bool> {
        match kind {
            FieldKind::String | FieldKind::Name => Some(false),
            FieldKind::Array(item) if matches!(**item, FieldKind::String | FieldKind::Name) => {
                Some(true)
            }
            _ => None,
        }
    }
}

impl DataTree {
    /// Node at a dotted key path below `id`, the inverse of
    /// [`full_key`](Self::full_key). An empty path is `id` itself.
    pub fn find(&self, id: NodeId, path: &str) -> DataResult<Option<NodeId>> {
        let mut node = id;
        let mut inside: Option<&FieldValue> = None;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            let value = match inside {
                None => {
                    let current = self.node(node)?;
                    match current.ty.field_by_key(segment) {
                        Some((index, _)) => &current.values[index],
                        None => return Ok(None),
                    }
                }
                Some(FieldValue::Array(items)) => {
                    match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                        Some(value) => value,
                        None => return Ok(None),
                    }
                }
                Some(FieldValue::Map(entries)) => match entries.get(segment) {
                    Some(value) => value,
                    None => return Ok(None),
                },
                Some(_) => return Ok(None),
            };
            match value {
                FieldValue::Object(Some(child)) => {
                    node = *child;
                    inside = None;
                }
                FieldValue::Array(_) | FieldValue::Map(_) => inside = Some(value),
                _ => return Ok(None),
            }
        }
        Ok(if inside.is_none() { Some(node) } else { None })
    }

    /// Resolve a single-key link. An empty key is `None` for nullable links.
    pub fn link(&self, id: NodeId, name: &str) -> DataResult<Option<NodeId>> {
        let (link, value) = self.link_key(id, name)?;
        let key = match value {
            FieldValue::String(key) | FieldValue::Name(key) => key,
            _ => {
                return Err(DataError::Schema(format!(
                    "link {name} holds several keys; resolve it with links()"
                )))
            }
        };
        if key.is_empty() {
            return if link.nullable {
                Ok(None)
            } else {
                Err(DataError::Link(format!("{name} has an empty key")))
            };
        }
        self.resolve_key(id, &link, key).map(Some)
    }

    /// Resolve a link to every node it names, in key order. Single-key links
    /// yield at most one node.
    pub fn links(&self, id: NodeId, name: &str) -> DataResult<Vec<NodeId>> {
        let (link, value) = self.link_key(id, name)?;
        match value {
            FieldValue::Array(keys) => keys
                .iter()
                .filter_map(FieldValue::as_str)
                .map(|key| self.resolve_key(id, &link, key))
                .collect(),
            _ => Ok(self.link(id, name)?.into_iter().collect()),
        }
    }

    fn link_key(&self, id: NodeId, name: &str) -> DataResult<(LinkDescriptor, &FieldValue)> {
        let ty = self.type_of(id)?;
        let link = ty.link(name).cloned().ok_or_else(|| DataError::UnknownField {
            type_name: ty.name().to_string(),
            field: name.to_string(),
        })?;
        let value = self.get(id, &link.key)?;
        Ok((link, value))
    }

    fn resolve_key(&self, id: NodeId, link: &LinkDescriptor, key: &str) -> DataResult<NodeId> {
        let root = self.root_of(id)?;
        let path = format!("{}.{}", link.path, key);
        self.find(root, &path)?
            .ok_or_else(|| DataError::Link(format!("{}: nothing at {path}", link.name)))
    }
}
