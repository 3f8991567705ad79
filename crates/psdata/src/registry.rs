use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{DataError, DataResult};
use crate::field::{FieldDescriptor, FieldKind};
use crate::link::LinkDescriptor;

/// Ordered field layout of one node type.
#[derive(Debug, Clone)]
pub struct DataType {
    name: String,
    fields: Vec<FieldDescriptor>,
    links: Vec<LinkDescriptor>,
    by_name: HashMap<String, usize>,
    by_key: HashMap<String, usize>,
}

impl DataType {
    pub fn builder(name: impl Into<String>) -> DataTypeBuilder {
        DataTypeBuilder {
            name: name.into(),
            fields: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order. This is also the serialization order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<(usize, &FieldDescriptor)> {
        self.by_name.get(name).map(|&i| (i, &self.fields[i]))
    }

    /// Resolve a serialized key. Falls back to the field name so documents
    /// written before an alias was introduced still load.
    pub fn field_by_key(&self, key: &str) -> Option<(usize, &FieldDescriptor)> {
        self.by_key
            .get(key)
            .or_else(|| self.by_name.get(key))
            .map(|&i| (i, &self.fields[i]))
    }

    pub fn links(&self) -> &[LinkDescriptor] {
        &self.links
    }

    pub fn link(&self, name: &str) -> Option<&LinkDescriptor> {
        self.links.iter().find(|l| l.name == name)
    }

    fn describe(&self) -> Value {
        let fields: Vec<Value> = self
            .fields
            .iter()
            .map(|field| {
                let content = match &field.kind {
                    FieldKind::Array(item) | FieldKind::Map(item) => item.as_ref(),
                    kind => kind,
                };
                let is_array = matches!(field.kind, FieldKind::Array(_));
                let is_map = matches!(field.kind, FieldKind::Map(_));
                json!({
                    "name": field.name,
                    "key": field.key(),
                    "kind": field.kind.to_string(),
                    "content": content.to_string(),
                    "is_array": is_array,
                    "is_map": is_map,
                    "is_container": is_array || is_map,
                    "is_data": matches!(content, FieldKind::Object(_)),
                    "event": field.meta.event,
                    "bubbles": field.meta.bubbles,
                })
            })
            .collect();
        let links: Vec<Value> = self
            .links
            .iter()
            .map(|link| {
                json!({
                    "name": link.name,
                    "path": link.path,
                    "key": link.key,
                    "nullable": link.nullable,
                })
            })
            .collect();
        json!({ "name": self.name, "fields": fields, "links": links })
    }
}

pub struct DataTypeBuilder {
    name: String,
    fields: Vec<FieldDescriptor>,
    links: Vec<LinkDescriptor>,
}

impl DataTypeBuilder {
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor::new(name, kind));
        self
    }

    pub fn descriptor(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn link(mut self, link: LinkDescriptor) -> Self {
        self.links.push(link);
        self
    }

    pub fn build(self) -> DataResult<DataType> {
        if self.name.is_empty() {
            return Err(DataError::Schema("type name must not be empty".into()));
        }
        let mut by_name = HashMap::new();
        let mut by_key = HashMap::new();
        for (i, field) in self.fields.iter().enumerate() {
            if by_name.insert(field.name.clone(), i).is_some() {
                return Err(DataError::Schema(format!(
                    "{}: duplicate field {}",
                    self.name, field.name
                )));
            }
            if by_key.insert(field.key().to_string(), i).is_some() {
                return Err(DataError::Schema(format!(
                    "{}: duplicate key {}",
                    self.name,
                    field.key()
                )));
            }
        }
        for (i, link) in self.links.iter().enumerate() {
            if by_name.contains_key(&link.name) || self.links[..i].iter().any(|l| l.name == link.name) {
                return Err(DataError::Schema(format!(
                    "{}: link {} clashes with another field or link",
                    self.name, link.name
                )));
            }
            let key_kind = by_name.get(&link.key).map(|&k| &self.fields[k].kind);
            if key_kind.and_then(LinkDescriptor::key_shape).is_none() {
                return Err(DataError::Schema(format!(
                    "{}: link {} needs a string, name, or array key field, not {}",
                    self.name, link.name, link.key
                )));
            }
        }
        Ok(DataType {
            name: self.name,
            fields: self.fields,
            links: self.links,
            by_name,
            by_key,
        })
    }
}

/// Set of known node types.
///
/// Built once at start-up and shared behind an `Arc` by every tree that
/// uses it.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, Arc<DataType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ty: DataType) -> DataResult<()> {
        if self.types.contains_key(ty.name()) {
            return Err(DataError::Schema(format!(
                "type {} registered twice",
                ty.name()
            )));
        }
        self.types.insert(ty.name().to_string(), Arc::new(ty));
        Ok(())
    }

    pub fn get(&self, name: &str) -> DataResult<Arc<DataType>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| DataError::UnknownType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &DataType> {
        self.types.values().map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// JSON description of every registered type, in name order.
    pub fn to_schema_json(&self) -> Value {
        let types: Vec<Value> = self.types.values().map(|ty| ty.describe()).collect();
        json!({ "types": types })
    }

    /// Check that every object field points at a registered type.
    pub fn validate(&self) -> DataResult<()> {
        for ty in self.types.values() {
            for field in ty.fields() {
                for target in field.kind.object_types() {
                    if !self.types.contains_key(target) {
                        return Err(DataError::Schema(format!(
                            "{}.{} references unknown type {}",
                            ty.name(),
                            field.name,
                            target
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_alias() {
        let ty = DataType::builder("Unit")
            .field("id", FieldKind::I32)
            .descriptor(FieldDescriptor::new("health", FieldKind::I32).with_alias("hp"))
            .build()
            .unwrap();
        assert_eq!(ty.field("health").unwrap().0, 1);
        assert_eq!(ty.field_by_key("hp").unwrap().0, 1);
        assert_eq!(ty.field_by_key("health").unwrap().0, 1);
        assert!(ty.field_by_key("mana").is_none());
    }

    #[test]
    fn duplicate_fields_rejected() {
        let result = DataType::builder("Unit")
            .field("id", FieldKind::I32)
            .field("id", FieldKind::I64)
            .build();
        assert!(matches!(result, Err(DataError::Schema(_))));

        let result = DataType::builder("Unit")
            .field("hp", FieldKind::I32)
            .descriptor(FieldDescriptor::new("health", FieldKind::I32).with_alias("hp"))
            .build();
        assert!(matches!(result, Err(DataError::Schema(_))));
    }

    #[test]
    fn register_and_validate() {
        let mut registry = TypeRegistry::new();
        registry
            .register(
                DataType::builder("Root")
                    .field("child", FieldKind::object("Leaf"))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        assert!(registry.validate().is_err());

        registry
            .register(DataType::builder("Leaf").build().unwrap())
            .unwrap();
        registry.validate().unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry
            .register(DataType::builder("Leaf").build().unwrap())
            .is_err());
        assert!(matches!(
            registry.get("Missing"),
            Err(DataError::UnknownType(_))
        ));
    }

    #[test]
    fn link_keys_are_validated() {
        let ok = DataType::builder("Order")
            .field("target", FieldKind::String)
            .field("squad", FieldKind::array(FieldKind::Name))
            .link(LinkDescriptor::new("unit", "units", "target"))
            .link(LinkDescriptor::new("members", "units", "squad"))
            .build()
            .unwrap();
        assert_eq!(ok.link("members").unwrap().key, "squad");
        assert!(ok.link("target").is_none());

        let wrong_kind = DataType::builder("Order")
            .field("target", FieldKind::I32)
            .link(LinkDescriptor::new("unit", "units", "target"))
            .build();
        assert!(matches!(wrong_kind, Err(DataError::Schema(_))));

        let missing = DataType::builder("Order")
            .link(LinkDescriptor::new("unit", "units", "target"))
            .build();
        assert!(matches!(missing, Err(DataError::Schema(_))));

        let clash = DataType::builder("Order")
            .field("target", FieldKind::String)
            .link(LinkDescriptor::new("target", "units", "target"))
            .build();
        assert!(matches!(clash, Err(DataError::Schema(_))));
    }

    #[test]
    fn schema_json_describes_fields_and_links() {
        let mut registry = TypeRegistry::new();
        registry
            .register(DataType::builder("Leaf").field("x", FieldKind::I32).build().unwrap())
            .unwrap();
        registry
            .register(
                DataType::builder("Holder")
                    .descriptor(
                        FieldDescriptor::new("items", FieldKind::map(FieldKind::object("Leaf")))
                            .with_alias("it")
                            .with_bubbles(true),
                    )
                    .field("pick", FieldKind::Name)
                    .link(LinkDescriptor::new("picked", "items", "pick").with_nullable(true))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let schema = registry.to_schema_json();
        let types = schema["types"].as_array().unwrap();
        let names: Vec<&str> = types.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Holder", "Leaf"]);
        assert_eq!(
            types[0]["fields"][0],
            json!({
                "name": "items",
                "key": "it",
                "kind": "map<object<Leaf>>",
                "content": "object<Leaf>",
                "is_array": false,
                "is_map": true,
                "is_container": true,
                "is_data": true,
                "event": true,
                "bubbles": true,
            })
        );
        assert_eq!(types[0]["fields"][1]["is_data"], json!(false));
        assert_eq!(
            types[0]["links"],
            json!([{"name": "picked", "path": "items", "key": "pick", "nullable": true}])
        );
        assert_eq!(types[1]["links"], json!([]));
    }
}
