//! Visitor protocol shared by every codec.
//!
//! Writes are stack-disciplined: each `write_key` is closed by a `pop_key`
//! with the same key, each `write_array`/`write_object` by the matching pop.
//! Reads mirror writes as probes. A probe that answers `None`/`false` leaves
//! the input where it was, so callers can try another shape.

use crate::error::DataResult;
use crate::tree::{DataTree, NodeId};

/// Deepest nesting of objects, arrays, and redirects accepted from input.
pub const MAX_NESTING: usize = 64;

/// Borrowed handle to a node, passed to serializers for nested objects.
#[derive(Clone, Copy)]
pub struct DataRef<'a> {
    pub tree: &'a DataTree,
    pub id: NodeId,
}

impl<'a> DataRef<'a> {
    pub fn new(tree: &'a DataTree, id: NodeId) -> Self {
        Self { tree, id }
    }
}

pub trait DataSerializer {
    fn write_key(&mut self, key: &str) -> DataResult<()>;
    fn write_array(&mut self) -> DataResult<()>;
    fn write_object(&mut self) -> DataResult<()>;

    fn write_u8(&mut self, value: u8) -> DataResult<()>;
    fn write_i32(&mut self, value: i32) -> DataResult<()>;
    fn write_i64(&mut self, value: i64) -> DataResult<()>;
    fn write_f32(&mut self, value: f32) -> DataResult<()>;
    fn write_bool(&mut self, value: bool) -> DataResult<()>;
    fn write_string(&mut self, value: &str) -> DataResult<()>;
    fn write_name(&mut self, value: &str) -> DataResult<()>;
    fn write_null(&mut self) -> DataResult<()>;

    /// Write a nested node. The default opens an object, writes the node's
    /// fields through `self`, and closes it.
    fn write_data(&mut self, data: DataRef<'_>) -> DataResult<()> {
        self.write_object()?;
        data.tree.serialize_fields(data.id, self)?;
        self.pop_object()
    }

    fn pop_key(&mut self, key: &str) -> DataResult<()>;
    fn pop_array(&mut self) -> DataResult<()>;
    fn pop_object(&mut self) -> DataResult<()>;
}

pub trait DataDeserializer {
    /// Next key of the current object, or `None` once it is exhausted.
    fn read_key(&mut self) -> DataResult<Option<String>>;
    /// Whether the current array has another element.
    fn read_index(&mut self) -> DataResult<bool>;
    fn read_array(&mut self) -> DataResult<bool>;
    fn read_object(&mut self) -> DataResult<bool>;

    fn read_u8(&mut self) -> DataResult<Option<u8>>;
    fn read_i32(&mut self) -> DataResult<Option<i32>>;
    fn read_i64(&mut self) -> DataResult<Option<i64>>;
    fn read_f32(&mut self) -> DataResult<Option<f32>>;
    fn read_bool(&mut self) -> DataResult<Option<bool>>;
    fn read_string(&mut self) -> DataResult<Option<String>>;
    fn read_name(&mut self) -> DataResult<Option<String>>;
    fn read_null(&mut self) -> DataResult<bool>;

    /// Read a nested node into `slot`: null clears it, an object is read
    /// into the existing instance or a freshly allocated one.
    fn read_data(&mut self, slot: &mut ObjectSlot<'_>) -> DataResult<bool> {
        if self.read_null()? {
            slot.set_null();
            return Ok(true);
        }
        if !self.read_object()? {
            return Ok(false);
        }
        slot.read_fields(self)?;
        self.pop_object()?;
        Ok(true)
    }

    fn pop_key(&mut self, key: &str) -> DataResult<()>;
    fn pop_index(&mut self) -> DataResult<()>;
    fn pop_array(&mut self) -> DataResult<()>;
    fn pop_object(&mut self) -> DataResult<()>;

    /// Consume the value under the current key or index, whatever its shape.
    fn skip_value(&mut self) -> DataResult<()>;
}

/// Creates nodes for object reads that have no instance to reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataAllocator {
    type_name: String,
}

impl DataAllocator {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn allocate(&self, tree: &mut DataTree) -> DataResult<NodeId> {
        tree.create(&self.type_name)
    }
}

/// Destination of a nested-object read.
pub struct ObjectSlot<'a> {
    tree: &'a mut DataTree,
    current: Option<NodeId>,
    allocator: DataAllocator,
}

impl<'a> ObjectSlot<'a> {
    pub fn new(tree: &'a mut DataTree, current: Option<NodeId>, allocator: DataAllocator) -> Self {
        Self {
            tree,
            current,
            allocator,
        }
    }

    pub fn current(&self) -> Option<NodeId> {
        self.current
    }

    pub fn set_null(&mut self) {
        self.current = None;
    }

    pub fn tree(&mut self) -> &mut DataTree {
        self.tree
    }

    /// The instance to read into, allocating one if the slot is empty.
    pub fn instance(&mut self) -> DataResult<NodeId> {
        match self.current {
            Some(id) => Ok(id),
            None => {
                let id = self.allocator.allocate(self.tree)?;
                self.current = Some(id);
                Ok(id)
            }
        }
    }

    /// Read every key of the open object into the slot's instance.
    pub fn read_fields<D: DataDeserializer + ?Sized>(&mut self, de: &mut D) -> DataResult<NodeId> {
        let id = self.instance()?;
        self.tree.deserialize_fields(id, de)?;
        Ok(id)
    }
}
