use alloc::vec::Vec;

use crate::raw::{Handle, Node, RawBPlusTreeMap};

use super::BPlusTreeMap;

/// A structural snapshot of one tree node, produced by
/// [`BPlusTreeMap::shape`].
///
/// Ids are opaque but stable between two snapshots with no mutation in
/// between, so tests can assert that a rebalance moved (or did not move) a
/// particular node. Leaves carry their entry keys and chain neighbor ids;
/// internal nodes carry their separator keys and children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShapeNode<K> {
    /// An internal (routing) node.
    Internal {
        /// Opaque node id.
        id: usize,
        /// Separator keys, in order.
        separators: Vec<K>,
        /// Child subtrees, one more than there are separators.
        children: Vec<ShapeNode<K>>,
    },
    /// A leaf node.
    Leaf {
        /// Opaque node id.
        id: usize,
        /// Entry keys, in order.
        keys: Vec<K>,
        /// Id of the previous leaf in the chain.
        prev: Option<usize>,
        /// Id of the next leaf in the chain.
        next: Option<usize>,
    },
}

impl<K> ShapeNode<K> {
    /// Returns `true` for the leaf variant.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, ShapeNode::Leaf { .. })
    }
}

fn shape_of<K: Clone, V>(raw: &RawBPlusTreeMap<K, V>, handle: Handle) -> ShapeNode<K> {
    match raw.node(handle) {
        Node::Leaf(leaf) => ShapeNode::Leaf {
            id: handle.slot(),
            keys: leaf.keys().to_vec(),
            prev: leaf.prev().map(Handle::slot),
            next: leaf.next().map(Handle::slot),
        },
        Node::Internal(internal) => ShapeNode::Internal {
            id: handle.slot(),
            separators: internal.keys().to_vec(),
            children: internal.children().iter().map(|&child| shape_of(raw, child)).collect(),
        },
    }
}

impl<K: Clone, V, C> BPlusTreeMap<K, V, C> {
    /// Dumps the tree structure for debugging and tests.
    ///
    /// An empty map dumps as a single empty leaf. The dump is a plain data
    /// structure with no mandated wire format; compare or `Debug`-print it.
    ///
    /// # Examples
    ///
    /// ```
    /// use leaflink::{BPlusTreeMap, ShapeNode};
    ///
    /// let mut map = BPlusTreeMap::new();
    /// map.insert(1, "a");
    /// map.insert(2, "b");
    ///
    /// match map.shape() {
    ///     ShapeNode::Leaf { keys, .. } => assert_eq!(keys, [1, 2]),
    ///     ShapeNode::Internal { .. } => unreachable!("two entries fit in one leaf"),
    /// }
    /// ```
    ///
    /// # Complexity
    ///
    /// O(n): visits every node and clones every key.
    #[must_use]
    pub fn shape(&self) -> ShapeNode<K> {
        match self.raw.root() {
            Some(root) => shape_of(&self.raw, root),
            None => ShapeNode::Leaf { id: 0, keys: Vec::new(), prev: None, next: None },
        }
    }
}
