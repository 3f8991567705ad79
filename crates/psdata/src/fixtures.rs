//! Schemas and trees shared by the unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::field::{FieldDescriptor, FieldKind, FieldValue};
use crate::link::LinkDescriptor;
use crate::registry::{DataType, TypeRegistry};
use crate::tree::{DataTree, NodeId};

pub(crate) fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    let types = [
        DataType::builder("Leaf").field("x", FieldKind::I32).build(),
        DataType::builder("Root")
            .field("a", FieldKind::object("Leaf"))
            .field("b", FieldKind::object("Leaf"))
            .build(),
        DataType::builder("Branch")
            .field("label", FieldKind::String)
            .field("left", FieldKind::object("Branch"))
            .field("right", FieldKind::object("Branch"))
            .field("leaf", FieldKind::object("Leaf"))
            .field("bag", FieldKind::object("Everything"))
            .build(),
        DataType::builder("Everything")
            .field("small", FieldKind::U8)
            .descriptor(FieldDescriptor::new("count", FieldKind::I32).with_bubbles(true))
            .descriptor(FieldDescriptor::new("big", FieldKind::I64).with_alias("huge"))
            .field("ratio", FieldKind::F32)
            .descriptor(FieldDescriptor::new("flag", FieldKind::Bool).with_event(false))
            .field("label", FieldKind::String)
            .field("tag", FieldKind::Name)
            .field("child", FieldKind::object("Leaf"))
            .field("leaves", FieldKind::array(FieldKind::object("Leaf")))
            .field("scores", FieldKind::map(FieldKind::I32))
            .field("tagged", FieldKind::map(FieldKind::object("Leaf")))
            .field("grid", FieldKind::array(FieldKind::array(FieldKind::I32)))
            .build(),
        DataType::builder("Roster")
            .field("units", FieldKind::map(FieldKind::object("Leaf")))
            .field("order", FieldKind::object("Order"))
            .build(),
        DataType::builder("Order")
            .field("target_id", FieldKind::String)
            .field("leader_id", FieldKind::Name)
            .field("squad_ids", FieldKind::array(FieldKind::String))
            .link(LinkDescriptor::new("target", "units", "target_id").with_nullable(true))
            .link(LinkDescriptor::new("leader", "units", "leader_id"))
            .link(LinkDescriptor::new("squad", "units", "squad_ids"))
            .build(),
    ];
    for ty in types {
        registry.register(ty.unwrap()).unwrap();
    }
    registry.validate().unwrap();
    Arc::new(registry)
}

pub(crate) fn tree() -> DataTree {
    DataTree::new(registry())
}

pub(crate) fn leaf(t: &mut DataTree, x: i32) -> NodeId {
    let id = t.create("Leaf").unwrap();
    t.set(id, "x", x).unwrap();
    id
}

/// `Root { a: Leaf { x: a }, b: Leaf { x: b } }`
pub(crate) fn sample_root(t: &mut DataTree, a: i32, b: i32) -> NodeId {
    let root = t.create("Root").unwrap();
    let leaf_a = leaf(t, a);
    let leaf_b = leaf(t, b);
    t.set(root, "a", leaf_a).unwrap();
    t.set(root, "b", leaf_b).unwrap();
    root
}

/// A node with every field kind populated and three children.
pub(crate) fn everything(t: &mut DataTree) -> NodeId {
    let id = t.create("Everything").unwrap();
    t.set(id, "small", 7u8).unwrap();
    t.set(id, "count", -42).unwrap();
    t.set(id, "big", i64::MIN).unwrap();
    t.set(id, "ratio", 1.5f32).unwrap();
    t.set(id, "flag", true).unwrap();
    t.set(id, "label", "héllo").unwrap();
    t.set(id, "tag", "Sword").unwrap();

    let first = leaf(t, 1);
    let second = leaf(t, 2);
    t.set(id, "leaves", vec![first, second]).unwrap();

    let mut scores = BTreeMap::new();
    scores.insert("b".to_string(), FieldValue::I32(-2));
    scores.insert("a".to_string(), FieldValue::I32(1));
    t.set(id, "scores", FieldValue::Map(scores)).unwrap();

    let tagged_leaf = leaf(t, 3);
    let mut tagged = BTreeMap::new();
    tagged.insert("k".to_string(), FieldValue::Object(Some(tagged_leaf)));
    t.set(id, "tagged", FieldValue::Map(tagged)).unwrap();

    t.set(
        id,
        "grid",
        FieldValue::Array(vec![
            FieldValue::from(vec![1, 2]),
            FieldValue::Array(Vec::new()),
            FieldValue::from(vec![3]),
        ]),
    )
    .unwrap();
    id
}

fn branch(t: &mut DataTree, label: &str, leaf_x: i32) -> NodeId {
    let id = t.create("Branch").unwrap();
    t.set(id, "label", label).unwrap();
    let l = leaf(t, leaf_x);
    t.set(id, "leaf", l).unwrap();
    id
}

/// Four levels deep: root → left/right branches → their left branches →
/// leaves, plus an `Everything` bag on the root. Siblings share a shape but
/// carry different values.
pub(crate) fn deep_tree(t: &mut DataTree) -> NodeId {
    let root = t.create("Branch").unwrap();
    t.set(root, "label", "root").unwrap();

    let left = branch(t, "l", 1);
    let left_left = branch(t, "ll", 3);
    t.set(left, "left", left_left).unwrap();

    let right = branch(t, "r", 2);
    let right_left = branch(t, "rl", 4);
    t.set(right, "left", right_left).unwrap();

    t.set(root, "left", left).unwrap();
    t.set(root, "right", right).unwrap();
    let bag = everything(t);
    t.set(root, "bag", bag).unwrap();
    root
}

/// Follow an object field.
pub(crate) fn child(t: &DataTree, id: NodeId, field: &str) -> NodeId {
    t.get(id, field).unwrap().as_object().flatten().unwrap()
}
