use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::DataError;
use crate::tree::NodeId;

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    U8,
    I32,
    I64,
    F32,
    Bool,
    String,
    /// Case-insensitive identifier; lower-cased when written.
    Name,
    /// Nested node of the named type, or null.
    Object(String),
    Array(Box<FieldKind>),
    /// String-keyed map, iterated in key order.
    Map(Box<FieldKind>),
}

impl FieldKind {
    pub fn object(type_name: impl Into<String>) -> Self {
        Self::Object(type_name.into())
    }

    pub fn array(item: FieldKind) -> Self {
        Self::Array(Box::new(item))
    }

    pub fn map(item: FieldKind) -> Self {
        Self::Map(Box::new(item))
    }

    pub fn default_value(&self) -> FieldValue {
        match self {
            Self::U8 => FieldValue::U8(0),
            Self::I32 => FieldValue::I32(0),
            Self::I64 => FieldValue::I64(0),
            Self::F32 => FieldValue::F32(0.0),
            Self::Bool => FieldValue::Bool(false),
            Self::String => FieldValue::String(String::new()),
            Self::Name => FieldValue::Name(String::new()),
            Self::Object(_) => FieldValue::Object(None),
            Self::Array(_) => FieldValue::Array(Vec::new()),
            Self::Map(_) => FieldValue::Map(BTreeMap::new()),
        }
    }

    /// Object types referenced anywhere inside this kind.
    pub fn object_types(&self) -> Vec<&str> {
        match self {
            Self::Object(name) => vec![name.as_str()],
            Self::Array(item) | Self::Map(item) => item.object_types(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8 => write!(f, "u8"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::F32 => write!(f, "f32"),
            Self::Bool => write!(f, "bool"),
            Self::String => write!(f, "string"),
            Self::Name => write!(f, "name"),
            Self::Object(name) => write!(f, "object<{name}>"),
            Self::Array(item) => write!(f, "array<{item}>"),
            Self::Map(item) => write!(f, "map<{item}>"),
        }
    }
}

impl FromStr for FieldKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let inner = |prefix: &str| -> Option<&str> {
            s.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('<'))
                .and_then(|rest| rest.strip_suffix('>'))
        };
        if let Some(name) = inner("object") {
            let name = name.trim();
            if name.is_empty() {
                return Err(DataError::Schema("object kind without a type name".into()));
            }
            return Ok(Self::Object(name.to_string()));
        }
        if let Some(item) = inner("array") {
            return Ok(Self::array(item.parse()?));
        }
        if let Some(item) = inner("map") {
            return Ok(Self::map(item.parse()?));
        }
        match s {
            "u8" => Ok(Self::U8),
            "i32" => Ok(Self::I32),
            "i64" => Ok(Self::I64),
            "f32" => Ok(Self::F32),
            "bool" => Ok(Self::Bool),
            "string" => Ok(Self::String),
            "name" => Ok(Self::Name),
            other => Err(DataError::Schema(format!("unknown field kind: {other}"))),
        }
    }
}

/// Runtime value of a field.
///
/// Equality compares `F32` values by their bits, the way they are encoded:
/// `0.0` and `-0.0` differ, and `NaN` equals itself.
#[derive(Debug, Clone)]
pub enum FieldValue {
    U8(u8),
    I32(i32),
    I64(i64),
    F32(f32),
    Bool(bool),
    String(String),
    Name(String),
    Object(Option<NodeId>),
    Array(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::U8(a), Self::U8(b)) => a == b,
            (Self::I32(a), Self::I32(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::F32(a), Self::F32(b)) => a.to_bits() == b.to_bits(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::String(a), Self::String(b)) | (Self::Name(a), Self::Name(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl FieldValue {
    /// Short description used in mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::U8(_) => "u8",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::F32(_) => "f32",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Name(_) => "name",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Self::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) | Self::Name(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<Option<NodeId>> {
        match self {
            Self::Object(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, FieldValue>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Every node referenced by this value, in serialization order.
    pub fn child_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_children(&mut out);
        out
    }

    fn collect_children(&self, out: &mut Vec<NodeId>) {
        match self {
            Self::Object(Some(id)) => out.push(*id),
            Self::Array(items) => items.iter().for_each(|v| v.collect_children(out)),
            Self::Map(entries) => entries.values().for_each(|v| v.collect_children(out)),
            _ => {}
        }
    }

    /// Children paired with the key they are stored under. A direct object
    /// field yields an empty key; collection elements yield their index or
    /// map key, dotted for nested collections.
    pub(crate) fn keyed_children(&self) -> Vec<(String, NodeId)> {
        let mut out = Vec::new();
        self.collect_keyed("", &mut out);
        out
    }

    fn collect_keyed(&self, prefix: &str, out: &mut Vec<(String, NodeId)>) {
        let join = |key: &str| {
            if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{prefix}.{key}")
            }
        };
        match self {
            Self::Object(Some(id)) => out.push((prefix.to_string(), *id)),
            Self::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_keyed(&join(&i.to_string()), out);
                }
            }
            Self::Map(entries) => {
                for (key, item) in entries {
                    item.collect_keyed(&join(key), out);
                }
            }
            _ => {}
        }
    }

    /// Drop every reference to `child`. Array elements are removed, object
    /// slots become null.
    pub(crate) fn remove_child(&mut self, child: NodeId) {
        match self {
            Self::Object(slot) if *slot == Some(child) => *slot = None,
            Self::Array(items) => {
                items.retain(|v| *v != Self::Object(Some(child)));
                items.iter_mut().for_each(|v| v.remove_child(child));
            }
            Self::Map(entries) => {
                entries.retain(|_, v| *v != Self::Object(Some(child)));
                entries.values_mut().for_each(|v| v.remove_child(child));
            }
            _ => {}
        }
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        Self::U8(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<NodeId> for FieldValue {
    fn from(v: NodeId) -> Self {
        Self::Object(Some(v))
    }
}

impl From<Option<NodeId>> for FieldValue {
    fn from(v: Option<NodeId>) -> Self {
        Self::Object(v)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

/// Event behaviour of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    /// Broadcast a changed event when the value changes.
    pub event: bool,
    /// Let the changed event travel up the parent chain.
    pub bubbles: bool,
    pub event_type: String,
}

/// One declared field of a data type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub alias: Option<String>,
    pub kind: FieldKind,
    pub meta: FieldMeta,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        let meta = FieldMeta {
            event: true,
            bubbles: false,
            event_type: format!("{name}Changed"),
        };
        Self {
            name,
            alias: None,
            kind,
            meta,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_event(mut self, event: bool) -> Self {
        self.meta.event = event;
        self
    }

    pub fn with_bubbles(mut self, bubbles: bool) -> Self {
        self.meta.bubbles = bubbles;
        self
    }

    /// Key used on the wire: the alias when present, the name otherwise.
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}
