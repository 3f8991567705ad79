//! Imprints, structural hashes, and concatenated buffers.
//!
//! An imprint is a node's own fields in binary form, `{` through `}`, with
//! every nested object replaced by a zeroed placeholder. Imprints are built
//! lazily and dropped whenever a field of the node changes; dropping also
//! clears the cached hash of every ancestor, stopping at the first one whose
//! hash is already gone.
//!
//! The structural hash of a node without children is the MD5 of its imprint.
//! Otherwise it is the MD5 over the imprint digest followed by each child's
//! hash, children ordered by full key.

use bytes::Bytes;
use psdata_stream::{BufferOutputStream, DataHash, Md5OutputStream, OutputStream};
use tracing::debug;

use crate::binary::{BinarySerializer, ImprintBinaryDeserializer};
use crate::convert::ImprintBinaryConvertor;
use crate::error::{DataError, DataResult};
use crate::protocol::{DataRef, DataSerializer};
use crate::token::Token;
use crate::tree::{DataTree, NodeId};

/// Tag byte plus a `u32` offset.
pub const PLACEHOLDER_LEN: usize = 5;

/// Where a nested object sits inside its parent's imprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImprintChild {
    pub offset: usize,
    pub node: NodeId,
}

#[derive(Debug, Clone, Default)]
pub struct Imprint {
    valid: bool,
    buffer: Bytes,
    children: Vec<ImprintChild>,
    hash: DataHash,
}

impl Imprint {
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    /// Placeholders, sorted by the full key of the child they stand for.
    pub fn children(&self) -> &[ImprintChild] {
        &self.children
    }

    /// MD5 of [`buffer`](Self::buffer) alone.
    pub fn hash(&self) -> DataHash {
        self.hash
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// How often a node's cached artifacts were rebuilt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub imprint_builds: u64,
    pub hash_builds: u64,
}

/// Binary serializer that writes nested objects as placeholders.
#[derive(Default)]
pub struct ImprintSerializer {
    inner: BinarySerializer,
    children: Vec<ImprintChild>,
}

impl ImprintSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> (Bytes, Vec<ImprintChild>) {
        (self.inner.into_output().into(), self.children)
    }
}

impl DataSerializer for ImprintSerializer {
    fn write_key(&mut self, key: &str) -> DataResult<()> {
        self.inner.write_key(key)
    }

    fn write_array(&mut self) -> DataResult<()> {
        self.inner.write_array()
    }

    fn write_object(&mut self) -> DataResult<()> {
        self.inner.write_object()
    }

    fn write_u8(&mut self, value: u8) -> DataResult<()> {
        self.inner.write_u8(value)
    }

    fn write_i32(&mut self, value: i32) -> DataResult<()> {
        self.inner.write_i32(value)
    }

    fn write_i64(&mut self, value: i64) -> DataResult<()> {
        self.inner.write_i64(value)
    }

    fn write_f32(&mut self, value: f32) -> DataResult<()> {
        self.inner.write_f32(value)
    }

    fn write_bool(&mut self, value: bool) -> DataResult<()> {
        self.inner.write_bool(value)
    }

    fn write_string(&mut self, value: &str) -> DataResult<()> {
        self.inner.write_string(value)
    }

    fn write_name(&mut self, value: &str) -> DataResult<()> {
        self.inner.write_name(value)
    }

    fn write_null(&mut self) -> DataResult<()> {
        self.inner.write_null()
    }

    fn write_data(&mut self, data: DataRef<'_>) -> DataResult<()> {
        let output = self.inner.output_mut();
        self.children.push(ImprintChild {
            offset: output.size(),
            node: data.id,
        });
        output.write_buffer(&[0; PLACEHOLDER_LEN]);
        Ok(())
    }

    fn pop_key(&mut self, key: &str) -> DataResult<()> {
        self.inner.pop_key(key)
    }

    fn pop_array(&mut self) -> DataResult<()> {
        self.inner.pop_array()
    }

    fn pop_object(&mut self) -> DataResult<()> {
        self.inner.pop_object()
    }
}

/// A whole subtree flattened into one redirect-linked buffer.
///
/// Children come before their parents. Each segment ends with a redirect
/// end, and reading starts at the root segment, which is the last one.
#[derive(Debug, Clone)]
pub struct ConcatenatedBuffer {
    bytes: Bytes,
    root_offset: usize,
}

impl ConcatenatedBuffer {
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn root_offset(&self) -> usize {
        self.root_offset
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn deserializer(&self) -> DataResult<ImprintBinaryDeserializer> {
        ImprintBinaryDeserializer::imprint(self.bytes.clone(), self.root_offset)
    }

    pub fn convertor(&self) -> DataResult<ImprintBinaryConvertor> {
        ImprintBinaryConvertor::imprint(self.bytes.clone(), self.root_offset)
    }

    /// Replay the buffer into `target` and hand it back.
    pub fn convert_into<S: DataSerializer>(&self, mut target: S) -> DataResult<S> {
        self.convertor()?.convert(&mut target)?;
        Ok(target)
    }
}

impl DataTree {
    /// Invalidate the node's imprint and hash, and the hashes of its
    /// ancestors.
    pub fn drop_imprint(&mut self, id: NodeId) -> DataResult<()> {
        let node = self.node_mut(id)?;
        node.imprint.reset();
        node.hash = None;
        let mut current = node.parent;
        while let Some(ancestor) = current {
            let node = self.node_mut(ancestor)?;
            if node.hash.take().is_none() {
                break;
            }
            current = node.parent;
        }
        Ok(())
    }

    /// The node's imprint, rebuilt if it was dropped.
    pub fn imprint(&mut self, id: NodeId) -> DataResult<&Imprint> {
        if !self.node(id)?.imprint.valid {
            self.rebuild_imprint(id)?;
        }
        Ok(&self.node(id)?.imprint)
    }

    fn rebuild_imprint(&mut self, id: NodeId) -> DataResult<()> {
        let mut serializer = ImprintSerializer::new();
        serializer.write_object()?;
        self.serialize_fields(id, &mut serializer)?;
        serializer.pop_object()?;
        let (buffer, children) = serializer.finish();

        let mut keyed = children
            .into_iter()
            .map(|child| Ok((self.full_key(child.node)?, child)))
            .collect::<DataResult<Vec<_>>>()?;
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        let children: Vec<ImprintChild> = keyed.into_iter().map(|(_, child)| child).collect();

        let hash = Md5OutputStream::digest(&buffer);
        debug!(
            node = %id,
            bytes = buffer.len(),
            children = children.len(),
            hash = %hash,
            "rebuilt imprint"
        );
        let node = self.node_mut(id)?;
        node.imprint = Imprint {
            valid: true,
            buffer,
            children,
            hash,
        };
        node.stats.imprint_builds += 1;
        Ok(())
    }

    /// Structural hash of the subtree rooted at `id`.
    pub fn hash(&mut self, id: NodeId) -> DataResult<DataHash> {
        match self.node(id)?.hash {
            Some(hash) => Ok(hash),
            None => self.rebuild_hash(id),
        }
    }

    fn rebuild_hash(&mut self, id: NodeId) -> DataResult<DataHash> {
        let imprint = self.imprint(id)?;
        let own = imprint.hash;
        let children: Vec<NodeId> = imprint.children.iter().map(|c| c.node).collect();

        let hash = if children.is_empty() {
            own
        } else {
            let mut stream = Md5OutputStream::new();
            let (a, b) = own.words();
            stream.write_u64(a);
            stream.write_u64(b);
            for child in children {
                let (a, b) = self.hash(child)?.words();
                stream.write_u64(a);
                stream.write_u64(b);
            }
            stream.finish()
        };
        debug!(node = %id, hash = %hash, "rebuilt hash");
        let node = self.node_mut(id)?;
        node.hash = Some(hash);
        node.stats.hash_builds += 1;
        Ok(hash)
    }

    /// The cached hash, without rebuilding anything.
    pub fn cached_hash(&self, id: NodeId) -> DataResult<Option<DataHash>> {
        Ok(self.node(id)?.hash)
    }

    pub fn stats(&self, id: NodeId) -> DataResult<RebuildStats> {
        Ok(self.node(id)?.stats)
    }

    /// Flatten the subtree into a single buffer that can be replayed
    /// without the tree.
    pub fn concatenate(&mut self, id: NodeId) -> DataResult<ConcatenatedBuffer> {
        let mut output = BufferOutputStream::new();
        let root_offset = self.concatenate_into(id, &mut output)?;
        debug!(node = %id, bytes = output.size(), root_offset, "concatenated imprints");
        Ok(ConcatenatedBuffer {
            bytes: output.into(),
            root_offset,
        })
    }

    fn concatenate_into(&mut self, id: NodeId, output: &mut BufferOutputStream) -> DataResult<usize> {
        let children = self.imprint(id)?.children.clone();
        let mut targets = Vec::with_capacity(children.len());
        for child in &children {
            targets.push((child.offset, self.concatenate_into(child.node, output)?));
        }

        let mut bytes = self.imprint(id)?.buffer.to_vec();
        for (placeholder, target) in targets {
            let slot = bytes
                .get_mut(placeholder..placeholder + PLACEHOLDER_LEN)
                .ok_or_else(|| {
                    DataError::Protocol(format!("placeholder at {placeholder} is outside the imprint of {id}"))
                })?;
            if slot[0] != 0 {
                return Err(DataError::PlaceholderPatched { offset: placeholder });
            }
            let target = u32::try_from(target).map_err(|_| {
                DataError::Protocol(format!("redirect target {target} does not fit in u32"))
            })?;
            slot[0] = Token::Redirect.byte();
            slot[1..].copy_from_slice(&target.to_be_bytes());
        }

        let start = output.size();
        output.write_buffer(&bytes);
        output.write_u8(Token::RedirectEnd.byte());
        Ok(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, child, deep_tree, leaf, sample_root, tree};
    use crate::json::JsonSerializer;
    use crate::protocol::DataDeserializer;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn imprint_brackets_own_fields() {
        let mut t = tree();
        let id = leaf(&mut t, 1);
        let imprint = t.imprint(id).unwrap().clone();
        assert!(imprint.is_valid());
        assert_eq!(imprint.buffer().first(), Some(&Token::ObjectBegin.byte()));
        assert_eq!(imprint.buffer().last(), Some(&Token::ObjectEnd.byte()));
        assert_eq!(imprint.buffer().to_vec(), t.to_binary(id).unwrap());
        assert_eq!(imprint.hash(), Md5OutputStream::digest(imprint.buffer()));
        assert!(imprint.children().is_empty());
    }

    #[test]
    fn nested_objects_become_placeholders() {
        let mut t = tree();
        let id = fixtures::everything(&mut t);
        let imprint = t.imprint(id).unwrap().clone();
        assert_eq!(imprint.children().len(), 3);
        for c in imprint.children() {
            assert_eq!(
                &imprint.buffer()[c.offset..c.offset + PLACEHOLDER_LEN],
                &[0; PLACEHOLDER_LEN]
            );
        }
        let keys: Vec<String> = imprint
            .children()
            .iter()
            .map(|c| t.full_key(c.node).unwrap())
            .collect();
        assert_eq!(keys, vec!["leaves.0", "leaves.1", "tagged.k"]);
    }

    #[test]
    fn imprint_is_cached_until_dropped() {
        let mut t = tree();
        let id = leaf(&mut t, 1);
        t.imprint(id).unwrap();
        t.imprint(id).unwrap();
        assert_eq!(t.stats(id).unwrap().imprint_builds, 1);
        t.set(id, "x", 2).unwrap();
        assert!(!t.node(id).unwrap().imprint.is_valid());
        t.imprint(id).unwrap();
        assert_eq!(t.stats(id).unwrap().imprint_builds, 2);
    }

    #[test]
    fn leaf_hash_is_imprint_hash() {
        let mut t = tree();
        let id = leaf(&mut t, 5);
        let hash = t.hash(id).unwrap();
        assert_eq!(hash, t.imprint(id).unwrap().hash());
        assert_ne!(hash, DataHash::ZERO);
    }

    #[test]
    fn hash_ignores_identity_and_mutation_order() {
        let mut t = tree();
        let first = sample_root(&mut t, 1, 2);

        let second = t.create("Root").unwrap();
        let b = leaf(&mut t, 0);
        t.set(second, "b", b).unwrap();
        let a = leaf(&mut t, 7);
        t.set(second, "a", a).unwrap();
        t.hash(second).unwrap();
        t.set(b, "x", 2).unwrap();
        t.set(a, "x", 1).unwrap();

        assert_eq!(t.hash(first).unwrap(), t.hash(second).unwrap());
    }

    #[test]
    fn deep_change_changes_root_and_revert_restores_it() {
        let mut t = tree();
        let root = deep_tree(&mut t);
        let before = t.hash(root).unwrap();
        let ll = child(&t, child(&t, root, "left"), "left");
        let deep_leaf = child(&t, ll, "leaf");

        t.set(deep_leaf, "x", 99).unwrap();
        let changed = t.hash(root).unwrap();
        assert_ne!(changed, before);

        t.set(deep_leaf, "x", 3).unwrap();
        assert_eq!(t.hash(root).unwrap(), before);
    }

    #[test]
    fn swapping_sibling_contents_changes_hash() {
        let mut t = tree();
        let one = sample_root(&mut t, 1, 2);
        let other = sample_root(&mut t, 2, 1);
        assert_ne!(t.hash(one).unwrap(), t.hash(other).unwrap());
    }

    #[test]
    fn mutation_dirties_only_ancestors() {
        let mut t = tree();
        let root = deep_tree(&mut t);
        t.hash(root).unwrap();

        let left = child(&t, root, "left");
        let ll = child(&t, left, "left");
        let deep_leaf = child(&t, ll, "leaf");
        let right = child(&t, root, "right");
        let rl = child(&t, right, "left");
        let left_leaf = child(&t, left, "leaf");
        let bag = child(&t, root, "bag");

        let untouched = [right, rl, left_leaf, bag];
        let before: Vec<RebuildStats> = untouched.iter().map(|n| t.stats(*n).unwrap()).collect();
        let ancestors = [ll, left, root];
        let ancestors_before: Vec<RebuildStats> =
            ancestors.iter().map(|n| t.stats(*n).unwrap()).collect();

        t.set(deep_leaf, "x", 42).unwrap();
        for n in ancestors {
            assert_eq!(t.cached_hash(n).unwrap(), None);
        }
        for n in untouched {
            assert!(t.cached_hash(n).unwrap().is_some());
        }

        t.hash(root).unwrap();
        for (n, stats) in untouched.iter().zip(&before) {
            assert_eq!(&t.stats(*n).unwrap(), stats);
        }
        for (n, stats) in ancestors.iter().zip(&ancestors_before) {
            let now = t.stats(*n).unwrap();
            assert_eq!(now.hash_builds, stats.hash_builds + 1);
            assert_eq!(now.imprint_builds, stats.imprint_builds);
        }
        assert_eq!(t.stats(deep_leaf).unwrap().imprint_builds, 2);
    }

    #[test]
    fn attaching_a_child_dirties_parent() {
        let mut t = tree();
        let root = t.create("Root").unwrap();
        let empty = t.hash(root).unwrap();
        let a = leaf(&mut t, 1);
        t.set(root, "a", a).unwrap();
        assert_eq!(t.cached_hash(root).unwrap(), None);
        assert_ne!(t.hash(root).unwrap(), empty);
        t.set(root, "a", None::<NodeId>).unwrap();
        assert_eq!(t.hash(root).unwrap(), empty);
    }

    #[test]
    fn concrete_two_child_layout() {
        let mut t = tree();
        let root = sample_root(&mut t, 1, 2);
        let a = child(&t, root, "a");
        let b = child(&t, root, "b");
        let a_len = t.imprint(a).unwrap().buffer().len();
        let b_len = t.imprint(b).unwrap().buffer().len();
        let root_imprint = t.imprint(root).unwrap().clone();

        let concat = t.concatenate(root).unwrap();
        let bytes = concat.bytes();
        assert_eq!(bytes[a_len], Token::RedirectEnd.byte());
        let b_start = a_len + 1;
        assert_eq!(concat.root_offset(), b_start + b_len + 1);
        assert_eq!(concat.len(), concat.root_offset() + root_imprint.buffer().len() + 1);

        let targets: Vec<(NodeId, u32)> = root_imprint
            .children()
            .iter()
            .map(|c| {
                let at = concat.root_offset() + c.offset;
                assert_eq!(bytes[at], Token::Redirect.byte());
                let mut word = [0u8; 4];
                word.copy_from_slice(&bytes[at + 1..at + PLACEHOLDER_LEN]);
                (c.node, u32::from_be_bytes(word))
            })
            .collect();
        assert_eq!(targets, vec![(a, 0), (b, b_start as u32)]);

        // the cached imprint itself is left unpatched
        let c = root_imprint.children()[0];
        assert_eq!(t.imprint(root).unwrap().buffer()[c.offset], 0);

        let json = concat.convert_into(JsonSerializer::new()).unwrap().into_value().unwrap();
        assert_eq!(json, json!({"a": {"x": 1}, "b": {"x": 2}}));
    }

    #[test]
    fn concatenated_json_matches_direct_json() {
        let mut t = tree();
        let root = deep_tree(&mut t);
        let direct = t.to_json(root).unwrap();
        let concat = t.concatenate(root).unwrap();
        let replayed = concat
            .convert_into(JsonSerializer::new())
            .unwrap()
            .into_value()
            .unwrap();
        assert_eq!(replayed, direct);
    }

    #[test]
    fn concatenated_binary_matches_direct_binary() {
        let mut t = tree();
        let root = deep_tree(&mut t);
        let direct = t.to_binary(root).unwrap();
        let concat = t.concatenate(root).unwrap();
        let replayed = concat
            .convert_into(BinarySerializer::new())
            .unwrap()
            .into_output()
            .into_inner();
        assert_eq!(replayed, direct);
    }

    #[test]
    fn concatenated_buffer_reads_back_into_a_node() {
        let mut t = tree();
        let root = deep_tree(&mut t);
        let concat = t.concatenate(root).unwrap();
        let copy = t.create("Branch").unwrap();
        let mut de = concat.deserializer().unwrap();
        t.deserialize(copy, &mut de, false).unwrap();
        assert_eq!(de.next_token().unwrap(), Some(Token::RedirectEnd));
        assert!(!de.has_data());
        assert_eq!(t.to_json(copy).unwrap(), t.to_json(root).unwrap());
        assert_eq!(t.hash(copy).unwrap(), t.hash(root).unwrap());
    }

    #[test]
    fn probes_roll_back_across_redirects() {
        let mut t = tree();
        let root = sample_root(&mut t, 1, 2);
        let concat = t.concatenate(root).unwrap();
        let mut de = concat.deserializer().unwrap();
        assert!(de.read_object().unwrap());
        assert_eq!(de.read_key().unwrap().as_deref(), Some("a"));
        assert!(!de.read_null().unwrap());
        assert!(!de.read_array().unwrap());
        assert!(de.read_object().unwrap());
        assert_eq!(de.read_key().unwrap().as_deref(), Some("x"));
        assert_eq!(de.read_i32().unwrap(), Some(1));
    }

    #[test]
    fn patched_placeholder_is_rejected() {
        let mut t = tree();
        let root = sample_root(&mut t, 1, 2);
        t.imprint(root).unwrap();
        let node = t.node_mut(root).unwrap();
        let offset = node.imprint.children[0].offset;
        let mut corrupted = node.imprint.buffer.to_vec();
        corrupted[offset] = Token::Redirect.byte();
        node.imprint.buffer = Bytes::from(corrupted);
        assert!(matches!(
            t.concatenate(root),
            Err(DataError::PlaceholderPatched { offset: o }) if o == offset
        ));
    }

    #[test]
    fn detached_leaf_concatenates_alone() {
        let mut t = tree();
        let id = leaf(&mut t, 8);
        let concat = t.concatenate(id).unwrap();
        assert_eq!(concat.root_offset(), 0);
        let json = concat.convert_into(JsonSerializer::new()).unwrap().into_value().unwrap();
        assert_eq!(json, json!({"x": 8}));
    }

    proptest! {
        #[test]
        fn hash_depends_only_on_final_values(start in any::<i32>(), a in any::<i32>(), b in any::<i32>()) {
            let mut t = tree();
            let direct = sample_root(&mut t, a, b);
            let indirect = sample_root(&mut t, start, start);
            t.hash(indirect).unwrap();
            let la = child(&t, indirect, "a");
            let lb = child(&t, indirect, "b");
            t.set(lb, "x", b).unwrap();
            t.set(la, "x", a).unwrap();
            prop_assert_eq!(t.hash(direct).unwrap(), t.hash(indirect).unwrap());
        }
    }
}
