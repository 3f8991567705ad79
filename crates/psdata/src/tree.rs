use std::fmt;
use std::sync::Arc;

use psdata_stream::DataHash;
use serde_json::Value;
use tracing::warn;

use crate::binary::{BinaryDeserializer, BinarySerializer};
use crate::error::{DataError, DataResult};
use crate::event::{DataEvent, Events};
use crate::field::{FieldKind, FieldValue};
use crate::imprint::{Imprint, RebuildStats};
use crate::json::{JsonDeserializer, JsonSerializer};
use crate::protocol::{
    DataAllocator, DataDeserializer, DataRef, DataSerializer, ObjectSlot, MAX_NESTING,
};
use crate::registry::{DataType, TypeRegistry};

/// Handle to a node in a [`DataTree`].
///
/// Slots of destroyed nodes are never reused, so a stale handle reports
/// [`DataError::NodeNotFound`] instead of aliasing a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct Node {
    pub(crate) ty: Arc<DataType>,
    pub(crate) values: Vec<FieldValue>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) data_key: String,
    pub(crate) collection_key: String,
    pub(crate) imprint: Imprint,
    pub(crate) hash: Option<DataHash>,
    pub(crate) stats: RebuildStats,
    pub(crate) changed_pending: bool,
}

/// Arena of typed, observable nodes.
///
/// Parents own their children through object-valued fields; the parent
/// link on each node is a plain handle. All access goes through the tree,
/// which is meant to be driven from a single owner thread.
pub struct DataTree {
    registry: Arc<TypeRegistry>,
    nodes: Vec<Option<Node>>,
    pub(crate) events: Events,
    read_depth: usize,
}

impl DataTree {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            nodes: Vec::new(),
            events: Events::default(),
            read_depth: 0,
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Create a detached node with default field values.
    pub fn create(&mut self, type_name: &str) -> DataResult<NodeId> {
        let ty = self.registry.get(type_name)?;
        let values = ty.fields().iter().map(|f| f.kind.default_value()).collect();
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(Node {
            ty,
            values,
            parent: None,
            data_key: String::new(),
            collection_key: String::new(),
            imprint: Imprint::default(),
            hash: None,
            stats: RebuildStats::default(),
            changed_pending: false,
        }));
        Ok(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn node(&self, id: NodeId) -> DataResult<&Node> {
        self.nodes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(DataError::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> DataResult<&mut Node> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(DataError::NodeNotFound(id))
    }

    pub fn type_of(&self, id: NodeId) -> DataResult<&Arc<DataType>> {
        Ok(&self.node(id)?.ty)
    }

    pub fn parent(&self, id: NodeId) -> DataResult<Option<NodeId>> {
        Ok(self.node(id)?.parent)
    }

    /// Topmost ancestor, or the node itself when detached.
    pub fn root_of(&self, id: NodeId) -> DataResult<NodeId> {
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    /// Direct children in field order.
    pub fn children(&self, id: NodeId) -> DataResult<Vec<NodeId>> {
        Ok(self
            .node(id)?
            .values
            .iter()
            .flat_map(FieldValue::child_ids)
            .collect())
    }

    /// Key under which the parent stores this node: the field name for a
    /// direct object field, the element index or map key inside a collection.
    pub fn data_key(&self, id: NodeId) -> DataResult<&str> {
        Ok(&self.node(id)?.data_key)
    }

    /// Name of the collection field holding this node, empty for direct
    /// object fields.
    pub fn collection_key(&self, id: NodeId) -> DataResult<&str> {
        Ok(&self.node(id)?.collection_key)
    }

    /// Dot-joined key path from the root, e.g. `units.3.weapon`.
    pub fn full_key(&self, id: NodeId) -> DataResult<String> {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(n) = current {
            let node = self.node(n)?;
            if !node.data_key.is_empty() {
                segments.push(node.data_key.as_str());
            }
            if !node.collection_key.is_empty() {
                segments.push(node.collection_key.as_str());
            }
            current = node.parent;
        }
        segments.reverse();
        Ok(segments.join("."))
    }

    fn field_index(&self, id: NodeId, field: &str) -> DataResult<usize> {
        let ty = &self.node(id)?.ty;
        ty.field(field)
            .map(|(i, _)| i)
            .ok_or_else(|| DataError::UnknownField {
                type_name: ty.name().to_string(),
                field: field.to_string(),
            })
    }

    pub fn get(&self, id: NodeId, field: &str) -> DataResult<&FieldValue> {
        let index = self.field_index(id, field)?;
        Ok(&self.node(id)?.values[index])
    }

    /// Set a field. Object values attach the referenced nodes as children;
    /// children no longer referenced are detached but stay alive.
    pub fn set(&mut self, id: NodeId, field: &str, value: impl Into<FieldValue>) -> DataResult<()> {
        let index = self.field_index(id, field)?;
        let value = value.into();
        let kind = self.node(id)?.ty.fields()[index].kind.clone();
        self.check_value(field, &kind, &value)?;
        self.assign(id, index, value)?;
        self.dispatch_events();
        Ok(())
    }

    /// Restore every field to its default. Children are destroyed.
    pub fn reset(&mut self, id: NodeId) -> DataResult<()> {
        self.reset_fields(id)?;
        self.dispatch_events();
        Ok(())
    }

    fn reset_fields(&mut self, id: NodeId) -> DataResult<()> {
        let ty = self.node(id)?.ty.clone();
        for (index, field) in ty.fields().iter().enumerate() {
            let removed = self.assign(id, index, field.kind.default_value())?;
            for child in removed {
                self.free_subtree(child);
            }
        }
        Ok(())
    }

    /// Detach a node from its parent and free it with its whole subtree.
    pub fn destroy(&mut self, id: NodeId) -> DataResult<()> {
        if let Some(parent) = self.node(id)?.parent {
            let index = self
                .node(parent)?
                .values
                .iter()
                .position(|v| v.child_ids().contains(&id))
                .ok_or_else(|| {
                    DataError::Protocol(format!("{parent} does not reference child {id}"))
                })?;
            let mut value = self.node(parent)?.values[index].clone();
            value.remove_child(id);
            self.assign(parent, index, value)?;
        }
        self.free_subtree(id);
        self.dispatch_events();
        Ok(())
    }

    fn free_subtree(&mut self, id: NodeId) {
        let children = self.children(id).unwrap_or_default();
        for child in children {
            self.free_subtree(child);
        }
        self.events.forget_node(id);
        if let Some(slot) = self.nodes.get_mut(id.0 as usize) {
            *slot = None;
        }
    }

    /// Deep copy through the binary codec into a new detached node.
    pub fn copy(&mut self, id: NodeId) -> DataResult<NodeId> {
        let bytes = self.to_binary(id)?;
        let type_name = self.node(id)?.ty.name().to_string();
        let copy = self.create(&type_name)?;
        self.from_binary(copy, bytes, true)?;
        Ok(copy)
    }

    fn check_value(&self, field: &str, kind: &FieldKind, value: &FieldValue) -> DataResult<()> {
        let mismatch = || DataError::TypeMismatch {
            field: field.to_string(),
            expected: kind.to_string(),
            actual: value.kind_name().to_string(),
        };
        match (kind, value) {
            (FieldKind::U8, FieldValue::U8(_))
            | (FieldKind::I32, FieldValue::I32(_))
            | (FieldKind::I64, FieldValue::I64(_))
            | (FieldKind::F32, FieldValue::F32(_))
            | (FieldKind::Bool, FieldValue::Bool(_))
            | (FieldKind::String, FieldValue::String(_))
            | (FieldKind::Object(_), FieldValue::Object(None)) => Ok(()),
            (FieldKind::Name, FieldValue::Name(_) | FieldValue::String(_)) => Ok(()),
            (FieldKind::Object(expected), FieldValue::Object(Some(child))) => {
                let actual = self.node(*child)?.ty.name();
                if actual == expected {
                    Ok(())
                } else {
                    Err(DataError::TypeMismatch {
                        field: field.to_string(),
                        expected: kind.to_string(),
                        actual: format!("object<{actual}>"),
                    })
                }
            }
            (FieldKind::Array(item), FieldValue::Array(items)) => items
                .iter()
                .try_for_each(|v| self.check_value(field, item, v)),
            (FieldKind::Map(item), FieldValue::Map(entries)) => entries
                .values()
                .try_for_each(|v| self.check_value(field, item, v)),
            _ => Err(mismatch()),
        }
    }

    /// Store a field value and keep links, keys, imprint, and events in
    /// step. Returns the children that were detached by the change.
    pub(crate) fn assign(
        &mut self,
        id: NodeId,
        index: usize,
        value: FieldValue,
    ) -> DataResult<Vec<NodeId>> {
        let value = match (&self.node(id)?.ty.fields()[index].kind, value) {
            (FieldKind::Name, FieldValue::String(s)) => FieldValue::Name(s),
            (_, value) => value,
        };
        let node = self.node(id)?;
        if node.values[index] == value {
            return Ok(Vec::new());
        }
        let old_children = node.values[index].child_ids();
        let new_children = value.child_ids();
        for (i, child) in new_children.iter().enumerate() {
            if new_children[..i].contains(child) {
                return Err(DataError::AlreadyAttached(*child));
            }
            if old_children.contains(child) {
                continue;
            }
            if self.node(*child)?.parent.is_some() {
                return Err(DataError::AlreadyAttached(*child));
            }
            if self.is_ancestor_or_self(*child, id)? {
                return Err(DataError::Cycle {
                    parent: id,
                    child: *child,
                });
            }
        }

        self.node_mut(id)?.values[index] = value;

        let removed: Vec<NodeId> = old_children
            .iter()
            .copied()
            .filter(|c| !new_children.contains(c))
            .collect();
        for child in &removed {
            self.detach(id, *child)?;
        }
        for child in &new_children {
            if !old_children.contains(child) {
                self.attach(id, *child)?;
            }
        }
        self.refresh_child_keys(id, index)?;
        self.field_changed(id, index)?;
        Ok(removed)
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, id: NodeId) -> DataResult<bool> {
        let mut current = Some(id);
        while let Some(n) = current {
            if n == candidate {
                return Ok(true);
            }
            current = self.node(n)?.parent;
        }
        Ok(false)
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) -> DataResult<()> {
        self.node_mut(child)?.parent = Some(parent);
        self.emit(child, DataEvent::ADDED_TO_PARENT, false, None);
        self.emit(child, DataEvent::ADDED, true, None);
        Ok(())
    }

    fn detach(&mut self, parent: NodeId, child: NodeId) -> DataResult<()> {
        let node = self.node_mut(child)?;
        node.parent = None;
        node.data_key.clear();
        node.collection_key.clear();
        self.emit(child, DataEvent::REMOVED_FROM_PARENT, false, None);
        self.emit(child, DataEvent::REMOVED, true, Some(parent));
        Ok(())
    }

    fn refresh_child_keys(&mut self, id: NodeId, index: usize) -> DataResult<()> {
        let node = self.node(id)?;
        let field_name = node.ty.fields()[index].name.clone();
        for (key, child) in node.values[index].keyed_children() {
            let (data_key, collection_key) = if key.is_empty() {
                (field_name.clone(), String::new())
            } else {
                (key, field_name.clone())
            };
            let child_node = self.node_mut(child)?;
            if child_node.data_key != data_key || child_node.collection_key != collection_key {
                child_node.data_key = data_key;
                child_node.collection_key = collection_key;
                self.emit(child, DataEvent::NAME_CHANGED, false, None);
            }
        }
        Ok(())
    }

    fn field_changed(&mut self, id: NodeId, index: usize) -> DataResult<()> {
        self.drop_imprint(id)?;
        let meta = self.node(id)?.ty.fields()[index].meta.clone();
        if meta.event {
            self.emit(id, &meta.event_type, meta.bubbles, None);
        }
        self.mark_changed(id);
        Ok(())
    }

    // --- Serialization -----------------------------------------------------

    /// Serialize a node as a nested object of `s`.
    pub fn serialize<S: DataSerializer + ?Sized>(&self, id: NodeId, s: &mut S) -> DataResult<()> {
        s.write_data(DataRef::new(self, id))
    }

    /// Write `key, value, pop_key` for every field of the node.
    pub fn serialize_fields<S: DataSerializer + ?Sized>(
        &self,
        id: NodeId,
        s: &mut S,
    ) -> DataResult<()> {
        let node = self.node(id)?;
        for (field, value) in node.ty.fields().iter().zip(&node.values) {
            let key = field.key();
            s.write_key(key)?;
            self.write_value(value, s)?;
            s.pop_key(key)?;
        }
        Ok(())
    }

    fn write_value<S: DataSerializer + ?Sized>(&self, value: &FieldValue, s: &mut S) -> DataResult<()> {
        match value {
            FieldValue::U8(v) => s.write_u8(*v),
            FieldValue::I32(v) => s.write_i32(*v),
            FieldValue::I64(v) => s.write_i64(*v),
            FieldValue::F32(v) => s.write_f32(*v),
            FieldValue::Bool(v) => s.write_bool(*v),
            FieldValue::String(v) => s.write_string(v),
            FieldValue::Name(v) => s.write_name(v),
            FieldValue::Object(None) => s.write_null(),
            FieldValue::Object(Some(child)) => s.write_data(DataRef::new(self, *child)),
            FieldValue::Array(items) => {
                s.write_array()?;
                for item in items {
                    self.write_value(item, s)?;
                }
                s.pop_array()
            }
            FieldValue::Map(entries) => {
                s.write_object()?;
                for (key, item) in entries {
                    s.write_key(key)?;
                    self.write_value(item, s)?;
                    s.pop_key(key)?;
                }
                s.pop_object()
            }
        }
    }

    /// Read a node from `de`. Without `patch` the node is reset first;
    /// with it, keys missing from the input keep their current values.
    pub fn deserialize<D: DataDeserializer + ?Sized>(
        &mut self,
        id: NodeId,
        de: &mut D,
        patch: bool,
    ) -> DataResult<()> {
        if !patch {
            self.reset_fields(id)?;
        }
        let type_name = self.node(id)?.ty.name().to_string();
        let mut slot = ObjectSlot::new(self, Some(id), DataAllocator::new(type_name));
        let read = de.read_data(&mut slot);
        let current = slot.current();
        self.dispatch_events();
        if !read? {
            return Err(DataError::Protocol(format!("expected an object for {id}")));
        }
        if current != Some(id) {
            return Err(DataError::Protocol(format!("{id} cannot be read as null")));
        }
        Ok(())
    }

    /// Read every key of an open object into the node's fields. Unknown
    /// keys and values of the wrong shape are logged and skipped.
    pub(crate) fn deserialize_fields<D: DataDeserializer + ?Sized>(
        &mut self,
        id: NodeId,
        de: &mut D,
    ) -> DataResult<()> {
        let ty = self.node(id)?.ty.clone();
        while let Some(key) = de.read_key()? {
            match ty.field_by_key(&key) {
                Some((index, field)) => {
                    let current = self.node(id)?.values[index].clone();
                    match self.read_value(&field.kind, &current, de)? {
                        Some(value) => {
                            let removed = self.assign(id, index, value)?;
                            for child in removed {
                                self.free_subtree(child);
                            }
                        }
                        None => {
                            warn!(
                                data_type = ty.name(),
                                field = %field.name,
                                expected = %field.kind,
                                "value has the wrong type; keeping current value"
                            );
                            de.skip_value()?;
                        }
                    }
                }
                None => {
                    warn!(data_type = ty.name(), key = %key, "property not found");
                    de.skip_value()?;
                }
            }
            de.pop_key(&key)?;
        }
        Ok(())
    }

    fn read_value<D: DataDeserializer + ?Sized>(
        &mut self,
        kind: &FieldKind,
        current: &FieldValue,
        de: &mut D,
    ) -> DataResult<Option<FieldValue>> {
        if self.read_depth >= MAX_NESTING {
            return Err(DataError::Protocol(format!(
                "input nested deeper than {MAX_NESTING} values"
            )));
        }
        self.read_depth += 1;
        let value = self.read_nested_value(kind, current, de);
        self.read_depth -= 1;
        value
    }

    fn read_nested_value<D: DataDeserializer + ?Sized>(
        &mut self,
        kind: &FieldKind,
        current: &FieldValue,
        de: &mut D,
    ) -> DataResult<Option<FieldValue>> {
        Ok(match kind {
            FieldKind::U8 => de.read_u8()?.map(FieldValue::U8),
            FieldKind::I32 => de.read_i32()?.map(FieldValue::I32),
            FieldKind::I64 => de.read_i64()?.map(FieldValue::I64),
            FieldKind::F32 => de.read_f32()?.map(FieldValue::F32),
            FieldKind::Bool => de.read_bool()?.map(FieldValue::Bool),
            FieldKind::String => de.read_string()?.map(FieldValue::String),
            FieldKind::Name => de.read_name()?.map(FieldValue::Name),
            FieldKind::Object(type_name) => {
                let existing = current.as_object().flatten();
                let mut slot = ObjectSlot::new(self, existing, DataAllocator::new(type_name.as_str()));
                if de.read_data(&mut slot)? {
                    Some(FieldValue::Object(slot.current()))
                } else {
                    None
                }
            }
            FieldKind::Array(item) => {
                if !de.read_array()? {
                    return Ok(None);
                }
                let old = current.as_array().unwrap_or_default();
                let mut items = Vec::new();
                while de.read_index()? {
                    let existing = old
                        .get(items.len())
                        .cloned()
                        .unwrap_or_else(|| item.default_value());
                    match self.read_value(item, &existing, de)? {
                        Some(value) => items.push(value),
                        None => {
                            warn!(expected = %item, index = items.len(), "array element has the wrong type; skipping");
                            de.skip_value()?;
                        }
                    }
                    de.pop_index()?;
                }
                de.pop_array()?;
                Some(FieldValue::Array(items))
            }
            FieldKind::Map(item) => {
                if !de.read_object()? {
                    return Ok(None);
                }
                let mut entries = std::collections::BTreeMap::new();
                while let Some(key) = de.read_key()? {
                    let existing = current
                        .as_map()
                        .and_then(|m| m.get(&key))
                        .cloned()
                        .unwrap_or_else(|| item.default_value());
                    match self.read_value(item, &existing, de)? {
                        Some(value) => {
                            entries.insert(key.clone(), value);
                        }
                        None => {
                            warn!(expected = %item, key = %key, "map value has the wrong type; skipping");
                            de.skip_value()?;
                        }
                    }
                    de.pop_key(&key)?;
                }
                de.pop_object()?;
                Some(FieldValue::Map(entries))
            }
        })
    }

    pub fn to_json(&self, id: NodeId) -> DataResult<Value> {
        let mut serializer = JsonSerializer::new();
        self.serialize(id, &mut serializer)?;
        serializer.into_value()
    }

    pub fn from_json(&mut self, id: NodeId, value: Value, patch: bool) -> DataResult<()> {
        let mut de = JsonDeserializer::new(value);
        self.deserialize(id, &mut de, patch)
    }

    pub fn to_binary(&self, id: NodeId) -> DataResult<Vec<u8>> {
        let mut serializer = BinarySerializer::new();
        self.serialize(id, &mut serializer)?;
        Ok(serializer.into_output().into_inner())
    }

    pub fn from_binary(&mut self, id: NodeId, bytes: impl Into<bytes::Bytes>, patch: bool) -> DataResult<()> {
        let mut de = BinaryDeserializer::new(bytes);
        self.deserialize(id, &mut de, patch)
    }
}

impl fmt::Debug for DataTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTree")
            .field("nodes", &self.len())
            .field("types", &self.registry.len())
            .finish()
    }
}
