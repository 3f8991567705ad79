use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DataError, DataResult};
use crate::field::{FieldDescriptor, FieldKind};
use crate::link::LinkDescriptor;
use crate::registry::{DataType, TypeRegistry};

/// Type declarations loaded from TOML.
///
/// ```toml
/// [[types]]
/// name = "Leaf"
/// fields = [{ name = "x", kind = "i32" }]
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub types: Vec<TypeConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeConfig {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<LinkConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    /// `u8 i32 i64 f32 bool string name object<T> array<K> map<K>`
    pub kind: String,
    /// Serialized key, if different from the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Whether changing the field raises its changed event.
    #[serde(default = "default_event")]
    pub event: bool,
    #[serde(default)]
    pub bubbles: bool,
}

/// Key field resolved against a collection path from the root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub name: String,
    pub path: String,
    pub key: String,
    #[serde(default)]
    pub nullable: bool,
}

fn default_event() -> bool {
    true
}

impl SchemaConfig {
    pub fn from_toml_str(s: &str) -> DataResult<Self> {
        toml::from_str(s).map_err(|e| DataError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> DataResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> DataResult<String> {
        toml::to_string_pretty(self).map_err(|e| DataError::Config(e.to_string()))
    }

    /// Build and validate a registry from the declared types.
    pub fn into_registry(self) -> DataResult<TypeRegistry> {
        let mut registry = TypeRegistry::new();
        for ty in self.types {
            let mut builder = DataType::builder(ty.name.as_str());
            for field in ty.fields {
                let kind: FieldKind = field.kind.parse()?;
                let mut descriptor = FieldDescriptor::new(field.name, kind)
                    .with_event(field.event)
                    .with_bubbles(field.bubbles);
                if let Some(alias) = field.alias {
                    descriptor = descriptor.with_alias(alias);
                }
                builder = builder.descriptor(descriptor);
            }
            for link in ty.links {
                builder = builder.link(
                    LinkDescriptor::new(link.name, link.path, link.key).with_nullable(link.nullable),
                );
            }
            registry.register(builder.build()?)?;
        }
        registry.validate()?;
        Ok(registry)
    }
}
