use crate::order::TotalOrder;

use super::arena::{Arena, Handle};
use super::node::{InternalNode, LeafNode, MAX_KEYS, Node, SearchResult};

/// The B+ tree structure backing `BPlusTreeMap`.
///
/// This layer owns the arenas and the mutation algebra but is agnostic about
/// key ordering: every method that compares keys receives the order from the
/// public map. The root is absent only while the tree is empty; an empty tree
/// is the canonical cleared state (no nodes, no chain).
pub(crate) struct RawBPlusTreeMap<K, V> {
    /// Arena storing all tree nodes.
    nodes: Arena<Node<K>>,
    /// Arena storing all values, separate from the nodes so value accesses
    /// and node surgery never alias.
    values: Arena<V>,
    /// Handle to the root node, if the tree is non-empty.
    root: Option<Handle>,
    /// Number of entries reachable through the leaf chain.
    len: usize,
    /// Leftmost leaf, where forward iteration starts.
    first_leaf: Option<Handle>,
    /// Rightmost leaf, where backward iteration starts.
    last_leaf: Option<Handle>,
}

impl<K, V> RawBPlusTreeMap<K, V> {
    pub(crate) const fn new() -> Self {
        Self {
            nodes: Arena::new(),
            values: Arena::new(),
            root: None,
            len: 0,
            first_leaf: None,
            last_leaf: None,
        }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Arena::with_capacity(capacity.div_ceil(MAX_KEYS)),
            values: Arena::with_capacity(capacity),
            root: None,
            len: 0,
            first_leaf: None,
            last_leaf: None,
        }
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn capacity(&self) -> usize {
        self.values.capacity()
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.values.clear();
        self.root = None;
        self.len = 0;
        self.first_leaf = None;
        self.last_leaf = None;
    }

    pub(crate) fn root(&self) -> Option<Handle> {
        self.root
    }

    pub(crate) fn first_leaf(&self) -> Option<Handle> {
        self.first_leaf
    }

    pub(crate) fn last_leaf(&self) -> Option<Handle> {
        self.last_leaf
    }

    pub(crate) fn node(&self, handle: Handle) -> &Node<K> {
        self.nodes.get(handle)
    }

    /// Returns a node reference through a raw map pointer.
    ///
    /// # Safety
    /// - `ptr` must point to a valid, allocated `RawBPlusTreeMap<K, V>`.
    pub(crate) unsafe fn node_ptr<'a>(ptr: *const Self, handle: Handle) -> &'a Node<K> {
        // SAFETY: Only the `nodes` arena is touched, so a concurrent borrow of
        // the `values` arena cannot alias.
        unsafe { Arena::get_ptr(core::ptr::addr_of!((*ptr).nodes), handle) }
    }

    pub(crate) fn value(&self, handle: Handle) -> &V {
        self.values.get(handle)
    }

    /// Returns a mutable value reference through a raw map pointer.
    ///
    /// # Safety
    /// - `ptr` must point to a valid, allocated `RawBPlusTreeMap<K, V>`.
    /// - The caller must have logical exclusive access to the value behind
    ///   `handle` and must not hold another reference into the values arena.
    pub(crate) unsafe fn value_mut_ptr<'a>(ptr: *mut Self, handle: Handle) -> &'a mut V {
        // SAFETY: Only the `values` arena is touched; node borrows can't alias.
        unsafe { (*core::ptr::addr_of_mut!((*ptr).values)).get_mut(handle) }
    }

    /// Empties the tree by walking the leaf chain, returning the entries in
    /// order. O(n), no rebalancing.
    pub(crate) fn drain_to_vec(&mut self) -> alloc::vec::Vec<(K, V)> {
        let mut entries = alloc::vec::Vec::with_capacity(self.len);
        let mut cursor = self.first_leaf;

        while let Some(leaf_handle) = cursor {
            let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
            cursor = leaf.next();
            let (keys, value_handles) = leaf.take_entries();

            for (key, value_handle) in keys.into_iter().zip(value_handles) {
                entries.push((key, self.values.take(value_handle)));
            }
        }

        self.clear();
        entries
    }
}

impl<K, V> RawBPlusTreeMap<K, V> {
    /// Descends from the root to the leaf position of `key`.
    pub(crate) fn search<C: TotalOrder<K>>(&self, key: &K, order: &C) -> Option<(Handle, usize)> {
        let mut current = self.root?;

        loop {
            match self.nodes.get(current) {
                Node::Internal(internal) => current = internal.child(internal.route(key, order)),
                Node::Leaf(leaf) => {
                    return match leaf.search(key, order) {
                        SearchResult::Found(index) => Some((current, index)),
                        SearchResult::NotFound(_) => None,
                    };
                }
            }
        }
    }

    pub(crate) fn get<C: TotalOrder<K>>(&self, key: &K, order: &C) -> Option<&V> {
        let (leaf_handle, index) = self.search(key, order)?;
        Some(self.values.get(self.nodes.get(leaf_handle).as_leaf().value(index)))
    }

    pub(crate) fn get_mut<C: TotalOrder<K>>(&mut self, key: &K, order: &C) -> Option<&mut V> {
        let (leaf_handle, index) = self.search(key, order)?;
        let value_handle = self.nodes.get(leaf_handle).as_leaf().value(index);
        Some(self.values.get_mut(value_handle))
    }

    pub(crate) fn get_key_value<C: TotalOrder<K>>(&self, key: &K, order: &C) -> Option<(&K, &V)> {
        let (leaf_handle, index) = self.search(key, order)?;
        let leaf = self.nodes.get(leaf_handle).as_leaf();
        Some((leaf.key(index), self.values.get(leaf.value(index))))
    }

    pub(crate) fn first_key_value(&self) -> Option<(&K, &V)> {
        let leaf = self.nodes.get(self.first_leaf?).as_leaf();
        Some((leaf.key(0), self.values.get(leaf.value(0))))
    }

    pub(crate) fn last_key_value(&self) -> Option<(&K, &V)> {
        let leaf = self.nodes.get(self.last_leaf?).as_leaf();
        let last = leaf.key_count() - 1;
        Some((leaf.key(last), self.values.get(leaf.value(last))))
    }

    /// Position of the first entry with key not less than `key`.
    pub(crate) fn lower_bound<C: TotalOrder<K>>(&self, key: &K, order: &C) -> Option<(Handle, usize)> {
        let (leaf_handle, leaf) = self.descend_to_leaf(key, order)?;
        let index = leaf.keys().partition_point(|entry| order.less(entry, key));
        self.position_or_next(leaf_handle, leaf, index)
    }

    /// Position of the first entry with key strictly greater than `key`.
    pub(crate) fn upper_bound<C: TotalOrder<K>>(&self, key: &K, order: &C) -> Option<(Handle, usize)> {
        let (leaf_handle, leaf) = self.descend_to_leaf(key, order)?;
        let index = leaf.keys().partition_point(|entry| !order.less(key, entry));
        self.position_or_next(leaf_handle, leaf, index)
    }

    /// Position of the last entry with key not greater than `key`.
    pub(crate) fn upper_bound_inclusive<C: TotalOrder<K>>(&self, key: &K, order: &C) -> Option<(Handle, usize)> {
        let (leaf_handle, leaf) = self.descend_to_leaf(key, order)?;
        let index = leaf.keys().partition_point(|entry| !order.less(key, entry));
        self.position_or_prev(leaf_handle, leaf, index)
    }

    /// Position of the last entry with key strictly less than `key`.
    pub(crate) fn lower_bound_exclusive<C: TotalOrder<K>>(&self, key: &K, order: &C) -> Option<(Handle, usize)> {
        let (leaf_handle, leaf) = self.descend_to_leaf(key, order)?;
        let index = leaf.keys().partition_point(|entry| order.less(entry, key));
        self.position_or_prev(leaf_handle, leaf, index)
    }

    fn descend_to_leaf<C: TotalOrder<K>>(&self, key: &K, order: &C) -> Option<(Handle, &LeafNode<K>)> {
        let mut current = self.root?;

        loop {
            match self.nodes.get(current) {
                Node::Internal(internal) => current = internal.child(internal.route(key, order)),
                Node::Leaf(leaf) => return Some((current, leaf)),
            }
        }
    }

    /// Resolves an in-leaf index to a position, hopping to the next leaf when
    /// the index is one past the end.
    fn position_or_next(&self, leaf_handle: Handle, leaf: &LeafNode<K>, index: usize) -> Option<(Handle, usize)> {
        if index < leaf.key_count() {
            Some((leaf_handle, index))
        } else {
            leaf.next().map(|next| (next, 0))
        }
    }

    /// Resolves an in-leaf insertion point to the position just before it,
    /// hopping to the previous leaf from index zero.
    fn position_or_prev(&self, leaf_handle: Handle, leaf: &LeafNode<K>, index: usize) -> Option<(Handle, usize)> {
        if index > 0 {
            Some((leaf_handle, index - 1))
        } else {
            let prev = leaf.prev()?;
            Some((prev, self.nodes.get(prev).as_leaf().key_count() - 1))
        }
    }
}

impl<K: Clone, V> RawBPlusTreeMap<K, V> {
    /// Inserts a key/value pair, returning the previous value if the key was
    /// already present.
    ///
    /// Splitting is preemptive and top-down: a full root grows the tree by one
    /// level, and every full child is split before the descent enters it, so
    /// no split ever propagates back up.
    pub(crate) fn insert<C: TotalOrder<K>>(&mut self, key: K, value: V, order: &C) -> Option<V> {
        let Some(root) = self.root else {
            let value_handle = self.values.alloc(value);
            let mut leaf = LeafNode::new();
            leaf.push(key, value_handle);
            let leaf_handle = self.nodes.alloc(Node::Leaf(leaf));
            self.root = Some(leaf_handle);
            self.first_leaf = Some(leaf_handle);
            self.last_leaf = Some(leaf_handle);
            self.len = 1;
            return None;
        };

        let root = if self.nodes.get(root).is_full() {
            let mut new_root = InternalNode::new();
            new_root.push_first_child(root);
            let new_root_handle = self.nodes.alloc(Node::Internal(new_root));
            self.split_child(new_root_handle, 0);
            self.root = Some(new_root_handle);
            new_root_handle
        } else {
            root
        };

        self.insert_non_full(root, key, value, order)
    }

    /// Inserts into the subtree at `node`, which is guaranteed not full.
    fn insert_non_full<C: TotalOrder<K>>(&mut self, node: Handle, key: K, value: V, order: &C) -> Option<V> {
        match self.nodes.get(node) {
            Node::Leaf(leaf) => match leaf.search(&key, order) {
                SearchResult::Found(index) => {
                    // Replace in place; the existing value slot is reused.
                    let value_handle = leaf.value(index);
                    Some(core::mem::replace(self.values.get_mut(value_handle), value))
                }
                SearchResult::NotFound(index) => {
                    let value_handle = self.values.alloc(value);
                    self.nodes.get_mut(node).as_leaf_mut().insert(index, key, value_handle);
                    self.len += 1;
                    None
                }
            },
            Node::Internal(internal) => {
                let mut child_index = internal.route(&key, order);
                let child = internal.child(child_index);

                if self.nodes.get(child).is_full() {
                    self.split_child(node, child_index);
                    // The split put a fresh separator at `child_index`;
                    // anything not less than it belongs to the new right node.
                    let internal = self.nodes.get(node).as_internal();
                    if !order.less(&key, internal.key(child_index)) {
                        child_index += 1;
                    }
                }

                let child = self.nodes.get(node).as_internal().child(child_index);
                self.insert_non_full(child, key, value, order)
            }
        }
    }

    /// Splits the full child at `child_index` of `parent`, inserting the
    /// promoted separator and the new right node into the parent.
    fn split_child(&mut self, parent: Handle, child_index: usize) {
        let child = self.nodes.get(parent).as_internal().child(child_index);

        let (separator, right_handle) = match self.nodes.get_mut(child) {
            Node::Leaf(leaf) => {
                let (separator, mut right) = leaf.split();

                let old_next = leaf.next();
                right.set_prev(Some(child));
                right.set_next(old_next);
                let right_handle = self.nodes.alloc(Node::Leaf(right));

                self.nodes.get_mut(child).as_leaf_mut().set_next(Some(right_handle));
                if let Some(next) = old_next {
                    self.nodes.get_mut(next).as_leaf_mut().set_prev(Some(right_handle));
                }
                if self.last_leaf == Some(child) {
                    self.last_leaf = Some(right_handle);
                }

                (separator, right_handle)
            }
            Node::Internal(internal) => {
                let (promoted, right) = internal.split();
                (promoted, self.nodes.alloc(Node::Internal(right)))
            }
        };

        self.nodes.get_mut(parent).as_internal_mut().insert_separator(child_index, separator, right_handle);
    }

    /// Removes `key`, returning the entry if it was present.
    pub(crate) fn remove_entry<C: TotalOrder<K>>(&mut self, key: &K, order: &C) -> Option<(K, V)> {
        let root = self.root?;
        let removed = self.remove_from(root, key, order);

        // Only the root may run out of separators; it then collapses into its
        // sole remaining child and the tree loses one level.
        if let Node::Internal(internal) = self.nodes.get(root)
            && internal.key_count() == 0
        {
            let sole_child = internal.child(0);
            self.nodes.free(root);
            self.root = Some(sole_child);
        }

        let (removed_key, value_handle) = removed?;
        let removed_value = self.values.take(value_handle);
        self.len -= 1;

        if self.len == 0 {
            self.clear();
        }

        Some((removed_key, removed_value))
    }

    /// Recursive descent of the removal.
    ///
    /// Precondition: `node` is the root or holds at least `t` keys/entries, so
    /// one removal below it can never underflow it.
    fn remove_from<C: TotalOrder<K>>(&mut self, node: Handle, key: &K, order: &C) -> Option<(K, Handle)> {
        let internal = match self.nodes.get_mut(node) {
            Node::Leaf(leaf) => {
                return match leaf.search(key, order) {
                    SearchResult::Found(index) => Some(leaf.remove(index)),
                    SearchResult::NotFound(_) => None,
                };
            }
            Node::Internal(internal) => internal,
        };

        let index = internal.separator_lower_bound(key, order);
        // A separator equal to the key is a copy of the smallest key of the
        // subtree to its right; the live entry is down that child.
        let matches_separator = index < internal.key_count() && !order.less(key, internal.key(index));
        let mut child_index = if matches_separator { index + 1 } else { index };

        if self.nodes.get(self.nodes.get(node).as_internal().child(child_index)).is_at_minimum() {
            child_index = if matches_separator {
                self.fill_right_of_separator(node, index)
            } else {
                self.fill_child(node, child_index)
            };
        }

        let child = self.nodes.get(node).as_internal().child(child_index);
        let removed = self.remove_from(child, key, order);

        if removed.is_some() && matches_separator {
            self.refresh_separator(node, key, order);
        }

        removed
    }

    /// Re-copies a separator equal to the just-removed key from the new
    /// smallest key of its right subtree, keeping separators exact copies.
    /// The separator may have vanished already if the fill merged around it.
    fn refresh_separator<C: TotalOrder<K>>(&mut self, node: Handle, key: &K, order: &C) {
        let internal = self.nodes.get(node).as_internal();
        let index = internal.separator_lower_bound(key, order);
        if index >= internal.key_count() || order.less(key, internal.key(index)) {
            return;
        }

        let mut current = internal.child(index + 1);
        let replacement = loop {
            match self.nodes.get(current) {
                Node::Internal(internal) => current = internal.child(0),
                Node::Leaf(leaf) => break leaf.first_key().expect("leaf on a removal path is non-empty").clone(),
            }
        };

        self.nodes.get_mut(node).as_internal_mut().set_key(index, replacement);
    }

    /// Fills the underfull right child of the separator at `index` when the
    /// key being removed equals that separator. Borrowing from the left child
    /// rotates the in-order predecessor in and overwrites the separator with
    /// it; when neither neighbor can lend, the merge pairs the two children
    /// *around the matched separator*, so the recursion continues into the
    /// merged node still holding the key. Returns the index to descend into.
    fn fill_right_of_separator(&mut self, parent: Handle, index: usize) -> usize {
        let internal = self.nodes.get(parent).as_internal();
        let child_count = internal.child_count();

        if self.nodes.get(internal.child(index)).can_lend() {
            self.borrow_from_prev(parent, index + 1);
            index + 1
        } else if index + 2 < child_count
            && self.nodes.get(self.nodes.get(parent).as_internal().child(index + 2)).can_lend()
        {
            self.borrow_from_next(parent, index + 1);
            index + 1
        } else {
            self.merge_children(parent, index);
            index
        }
    }

    /// Brings the child at `child_index` up to at least `t` keys/entries by
    /// borrowing from a sibling or merging with one. Returns the index the
    /// child ends up at (one lower if it was merged into its left sibling).
    fn fill_child(&mut self, parent: Handle, child_index: usize) -> usize {
        let internal = self.nodes.get(parent).as_internal();
        let child_count = internal.child_count();

        if child_index > 0 && self.nodes.get(internal.child(child_index - 1)).can_lend() {
            self.borrow_from_prev(parent, child_index);
            child_index
        } else if child_index + 1 < child_count
            && self.nodes.get(self.nodes.get(parent).as_internal().child(child_index + 1)).can_lend()
        {
            self.borrow_from_next(parent, child_index);
            child_index
        } else if child_index + 1 < child_count {
            self.merge_children(parent, child_index);
            child_index
        } else {
            self.merge_children(parent, child_index - 1);
            child_index - 1
        }
    }

    /// Rotates the left sibling's last key/entry through the parent into the
    /// front of the underfull child.
    fn borrow_from_prev(&mut self, parent: Handle, child_index: usize) {
        let internal = self.nodes.get(parent).as_internal();
        let left = internal.child(child_index - 1);
        let child = internal.child(child_index);

        if self.nodes.get(child).is_leaf() {
            let (key, value) = self.nodes.get_mut(left).as_leaf_mut().pop();
            let separator = key.clone();
            self.nodes.get_mut(child).as_leaf_mut().push_front(key, value);
            self.nodes.get_mut(parent).as_internal_mut().set_key(child_index - 1, separator);
        } else {
            let (left_key, left_child) = self.nodes.get_mut(left).as_internal_mut().pop_last();
            let separator = self.nodes.get_mut(parent).as_internal_mut().replace_key(child_index - 1, left_key);
            self.nodes.get_mut(child).as_internal_mut().push_first(separator, left_child);
        }
    }

    /// Rotates the right sibling's first key/entry through the parent into the
    /// back of the underfull child.
    fn borrow_from_next(&mut self, parent: Handle, child_index: usize) {
        let internal = self.nodes.get(parent).as_internal();
        let child = internal.child(child_index);
        let right = internal.child(child_index + 1);

        if self.nodes.get(child).is_leaf() {
            let right_leaf = self.nodes.get_mut(right).as_leaf_mut();
            let (key, value) = right_leaf.pop_front();
            let separator = right_leaf.first_key().expect("lending leaf keeps at least one entry").clone();
            self.nodes.get_mut(child).as_leaf_mut().push(key, value);
            self.nodes.get_mut(parent).as_internal_mut().set_key(child_index, separator);
        } else {
            let (right_key, right_child) = self.nodes.get_mut(right).as_internal_mut().pop_first();
            let separator = self.nodes.get_mut(parent).as_internal_mut().replace_key(child_index, right_key);
            self.nodes.get_mut(child).as_internal_mut().push_last(separator, right_child);
        }
    }

    /// Merges the children at `index` and `index + 1` around separator
    /// `index`, freeing the right node. For leaves the separator is simply
    /// dropped (it was a copy) and the chain is respliced around the freed
    /// leaf; for internal nodes it is pulled down between the key runs.
    fn merge_children(&mut self, parent: Handle, index: usize) {
        let (separator, right_handle) = self.nodes.get_mut(parent).as_internal_mut().remove_separator(index);
        let left_handle = self.nodes.get(parent).as_internal().child(index);

        match self.nodes.take(right_handle) {
            Node::Leaf(right) => {
                let left = self.nodes.get_mut(left_handle).as_leaf_mut();
                left.merge_with_right(right);

                if let Some(next) = self.nodes.get(left_handle).as_leaf().next() {
                    self.nodes.get_mut(next).as_leaf_mut().set_prev(Some(left_handle));
                }
                if self.last_leaf == Some(right_handle) {
                    self.last_leaf = Some(left_handle);
                }
            }
            Node::Internal(right) => {
                self.nodes.get_mut(left_handle).as_internal_mut().merge_with_right(separator, right);
            }
        }
    }
}

impl<K: Clone, V: Clone> Clone for RawBPlusTreeMap<K, V> {
    fn clone(&self) -> Self {
        let mut clone = Self::with_capacity(self.len);

        let Some(root) = self.root else {
            return clone;
        };

        fn clone_subtree<K: Clone, V: Clone>(
            source: &RawBPlusTreeMap<K, V>,
            target: &mut RawBPlusTreeMap<K, V>,
            leaves: &mut alloc::vec::Vec<Handle>,
            node: Handle,
        ) -> Handle {
            match source.nodes.get(node) {
                Node::Leaf(leaf) => {
                    let mut new_leaf = LeafNode::new();
                    for index in 0..leaf.key_count() {
                        let value = source.values.get(leaf.value(index)).clone();
                        new_leaf.push(leaf.key(index).clone(), target.values.alloc(value));
                    }
                    // The chain is rebuilt from `leaves` once the walk is done.
                    let handle = target.nodes.alloc(Node::Leaf(new_leaf));
                    leaves.push(handle);
                    handle
                }
                Node::Internal(internal) => {
                    let mut new_internal = InternalNode::new();
                    new_internal.push_first_child(clone_subtree(source, target, leaves, internal.child(0)));
                    for index in 0..internal.key_count() {
                        let child = clone_subtree(source, target, leaves, internal.child(index + 1));
                        new_internal.push_last(internal.key(index).clone(), child);
                    }
                    target.nodes.alloc(Node::Internal(new_internal))
                }
            }
        }

        let mut leaves = alloc::vec::Vec::new();
        let new_root = clone_subtree(self, &mut clone, &mut leaves, root);

        for window_start in 1..leaves.len() {
            let (prev, next) = (leaves[window_start - 1], leaves[window_start]);
            clone.nodes.get_mut(prev).as_leaf_mut().set_next(Some(next));
            clone.nodes.get_mut(next).as_leaf_mut().set_prev(Some(prev));
        }

        clone.root = Some(new_root);
        clone.len = self.len;
        clone.first_leaf = leaves.first().copied();
        clone.last_leaf = leaves.last().copied();
        clone
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::super::node::{MAX_KEYS, MIN_KEYS};
    use super::*;
    use crate::order::NaturalOrder;
    use alloc::format;
    use alloc::string::String;
    use alloc::vec;
    use alloc::vec::Vec;
    use proptest::prelude::*;

    impl<K: Clone + core::fmt::Debug, V> RawBPlusTreeMap<K, V> {
        /// Walks the whole tree and asserts every structural invariant:
        /// occupancy bounds, uniform leaf depth, strictly ascending keys,
        /// separator bounds and exact separator copies, chain agreement in
        /// both directions, and the length counter.
        pub(crate) fn validate_invariants<C: TotalOrder<K>>(&self, order: &C) {
            let Some(root) = self.root else {
                assert_eq!(self.len, 0, "empty tree must have len 0");
                assert!(self.first_leaf.is_none(), "empty tree must have no first leaf");
                assert!(self.last_leaf.is_none(), "empty tree must have no last leaf");
                return;
            };

            let mut errors: Vec<String> = Vec::new();
            let mut leaves: Vec<Handle> = Vec::new();
            let mut leaf_depth: Option<usize> = None;

            let (_, _, entry_count) =
                self.validate_node(root, 0, true, &mut leaf_depth, &mut leaves, &mut errors, order);

            self.validate_chain(&leaves, &mut errors);

            if entry_count != self.len {
                errors.push(format!("len is {} but the leaves hold {entry_count} entries", self.len));
            }

            assert!(errors.is_empty(), "tree invariant violations:\n{}", errors.join("\n"));
        }

        #[allow(clippy::too_many_arguments)]
        fn validate_node<C: TotalOrder<K>>(
            &self,
            handle: Handle,
            depth: usize,
            is_root: bool,
            leaf_depth: &mut Option<usize>,
            leaves: &mut Vec<Handle>,
            errors: &mut Vec<String>,
            order: &C,
        ) -> (Option<K>, Option<K>, usize) {
            // Returns (min key, max key, entry count) of the subtree.
            let node = self.nodes.get(handle);
            let keys: Vec<K> = match node {
                Node::Leaf(leaf) => leaf.keys().to_vec(),
                Node::Internal(internal) => internal.keys().to_vec(),
            };

            for pair in keys.windows(2) {
                if !order.less(&pair[0], &pair[1]) {
                    errors.push(format!("keys out of order at {handle:?}: {:?} !< {:?}", pair[0], pair[1]));
                }
            }

            // A non-empty tree never keeps an empty leaf root or a
            // separator-less internal root.
            let min_keys = if is_root { 1 } else { MIN_KEYS };
            if keys.len() < min_keys || keys.len() > MAX_KEYS {
                errors.push(format!(
                    "occupancy violation at {handle:?}: {} keys outside [{min_keys}, {MAX_KEYS}]",
                    keys.len()
                ));
            }

            match node {
                Node::Leaf(leaf) => {
                    match *leaf_depth {
                        None => *leaf_depth = Some(depth),
                        Some(expected) if depth != expected => {
                            errors.push(format!("leaf {handle:?} at depth {depth}, expected {expected}"));
                        }
                        Some(_) => {}
                    }
                    leaves.push(handle);
                    (keys.first().cloned(), keys.last().cloned(), keys.len())
                }
                Node::Internal(internal) => {
                    if internal.child_count() != keys.len() + 1 {
                        errors.push(format!(
                            "internal {handle:?} has {} children for {} separators",
                            internal.child_count(),
                            keys.len()
                        ));
                    }

                    let mut subtree_min: Option<K> = None;
                    let mut subtree_max: Option<K> = None;
                    let mut entry_count = 0;

                    for (index, &child) in internal.children().iter().enumerate() {
                        let (child_min, child_max, child_count) =
                            self.validate_node(child, depth + 1, false, leaf_depth, leaves, errors, order);
                        entry_count += child_count;

                        if index == 0 {
                            subtree_min = child_min.clone();
                        }
                        subtree_max = child_max.clone();

                        // Separator `index` bounds child `index` strictly from
                        // above and is an exact copy of the smallest key of
                        // child `index + 1`.
                        if index < keys.len()
                            && let Some(child_max) = &child_max
                            && !order.less(child_max, &keys[index])
                        {
                            errors.push(format!(
                                "child {index} of {handle:?} reaches {child_max:?}, not below separator {:?}",
                                keys[index]
                            ));
                        }
                        if index > 0
                            && let Some(child_min) = &child_min
                            && !order.equivalent(child_min, &keys[index - 1])
                        {
                            errors.push(format!(
                                "separator {:?} of {handle:?} is not the smallest key {child_min:?} of its right subtree",
                                keys[index - 1]
                            ));
                        }
                    }

                    (subtree_min, subtree_max, entry_count)
                }
            }
        }

        fn validate_chain(&self, leaves: &[Handle], errors: &mut Vec<String>) {
            if self.first_leaf != leaves.first().copied() {
                errors.push(format!("first_leaf is {:?}, leftmost leaf is {:?}", self.first_leaf, leaves.first()));
            }
            if self.last_leaf != leaves.last().copied() {
                errors.push(format!("last_leaf is {:?}, rightmost leaf is {:?}", self.last_leaf, leaves.last()));
            }

            let mut forward = Vec::new();
            let mut cursor = self.first_leaf;
            while let Some(handle) = cursor {
                forward.push(handle);
                cursor = self.nodes.get(handle).as_leaf().next();
            }
            if forward != leaves {
                errors.push(format!("forward chain {forward:?} disagrees with tree order {leaves:?}"));
            }

            let mut backward = Vec::new();
            let mut cursor = self.last_leaf;
            while let Some(handle) = cursor {
                backward.push(handle);
                cursor = self.nodes.get(handle).as_leaf().prev();
            }
            backward.reverse();
            if backward != leaves {
                errors.push(format!("backward chain {backward:?} disagrees with tree order {leaves:?}"));
            }
        }
    }

    /// Keys of every leaf, in chain order.
    fn leaf_keys<K: Clone, V>(map: &RawBPlusTreeMap<K, V>) -> Vec<Vec<K>> {
        let mut leaves = Vec::new();
        let mut cursor = map.first_leaf();
        while let Some(handle) = cursor {
            let leaf = map.node(handle).as_leaf();
            leaves.push(leaf.keys().to_vec());
            cursor = leaf.next();
        }
        leaves
    }

    fn root_separators<K: Clone, V>(map: &RawBPlusTreeMap<K, V>) -> Vec<K> {
        map.root().map_or_else(Vec::new, |root| map.node(root).as_internal().keys().to_vec())
    }

    fn populate(keys: &[i32]) -> RawBPlusTreeMap<i32, String> {
        let mut map = RawBPlusTreeMap::new();
        for &key in keys {
            map.insert(key, format!("v{key}"), &NaturalOrder);
        }
        map.validate_invariants(&NaturalOrder);
        map
    }

    // These tests run at MIN_DEGREE = 3: nodes hold 2..=5 keys, so the sixth
    // insertion is the first split.

    #[test]
    fn sixth_insert_splits_the_root_leaf() {
        let map = populate(&[10, 20, 30, 40, 50, 60]);

        assert_eq!(map.len(), 6);
        // The separator is a copy of the first key of the new right leaf.
        assert_eq!(root_separators(&map), [40]);
        assert_eq!(leaf_keys(&map), [vec![10, 20, 30], vec![40, 50, 60]]);

        let root = map.node(map.root().unwrap()).as_internal();
        let (left, right) = (root.child(0), root.child(1));
        assert_eq!(map.node(left).as_leaf().next(), Some(right));
        assert_eq!(map.node(right).as_leaf().prev(), Some(left));
        assert_eq!(map.first_leaf(), Some(left));
        assert_eq!(map.last_leaf(), Some(right));
    }

    #[test]
    fn reinserting_a_key_replaces_the_value_in_place() {
        let mut map = RawBPlusTreeMap::new();
        assert_eq!(map.insert(10, "a", &NaturalOrder), None);
        assert_eq!(map.insert(10, "b", &NaturalOrder), Some("a"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&10, &NaturalOrder), Some(&"b"));
        map.validate_invariants(&NaturalOrder);
    }

    #[test]
    fn underfull_leaf_borrows_from_its_next_sibling() {
        let mut map = populate(&[10, 20, 30, 40, 50, 60]);

        map.remove_entry(&10, &NaturalOrder).unwrap();
        assert_eq!(leaf_keys(&map), [vec![20, 30], vec![40, 50, 60]]);

        // The left leaf is at the floor, so the removal first borrows 40
        // through the parent; the separator becomes the right leaf's new
        // first key.
        map.remove_entry(&20, &NaturalOrder).unwrap();
        assert_eq!(leaf_keys(&map), [vec![30, 40], vec![50, 60]]);
        assert_eq!(root_separators(&map), [50]);
        assert_eq!(map.len(), 4);
        map.validate_invariants(&NaturalOrder);
    }

    #[test]
    fn merge_of_the_last_two_leaves_collapses_the_root() {
        let mut map = populate(&[10, 20, 30, 40, 50, 60]);

        for key in [10, 20, 30] {
            map.remove_entry(&key, &NaturalOrder).unwrap();
            map.validate_invariants(&NaturalOrder);
        }

        // Neither leaf could lend, so they merged and the emptied internal
        // root was replaced by the merged leaf.
        assert_eq!(map.len(), 3);
        assert!(map.node(map.root().unwrap()).is_leaf());
        assert_eq!(leaf_keys(&map), [vec![40, 50, 60]]);
    }

    #[test]
    fn removing_a_key_equal_to_a_separator_substitutes_the_predecessor() {
        let mut map = populate(&[10, 20, 30, 40, 50, 60]);
        map.remove_entry(&60, &NaturalOrder).unwrap();
        assert_eq!(leaf_keys(&map), [vec![10, 20, 30], vec![40, 50]]);
        assert_eq!(root_separators(&map), [40]);

        // 40 is both the root separator and the right leaf's first entry. The
        // right leaf is at the floor, so the predecessor 30 rotates in from
        // the left leaf and overwrites the separator before 40 is removed.
        map.remove_entry(&40, &NaturalOrder).unwrap();
        assert_eq!(root_separators(&map), [30]);
        assert_eq!(leaf_keys(&map), [vec![10, 20], vec![30, 50]]);
        assert_eq!(map.search(&40, &NaturalOrder), None);
        assert_eq!(map.len(), 4);
        map.validate_invariants(&NaturalOrder);
    }

    #[test]
    fn removing_a_key_equal_to_a_separator_refreshes_the_copy() {
        let mut map = populate(&[10, 20, 30, 40, 50, 60]);

        // The right leaf has an entry to spare, so 40 is removed from it
        // directly and the separator copy is refreshed to the new smallest
        // key of the right subtree.
        map.remove_entry(&40, &NaturalOrder).unwrap();
        assert_eq!(root_separators(&map), [50]);
        assert_eq!(leaf_keys(&map), [vec![10, 20, 30], vec![50, 60]]);
        assert_eq!(map.search(&40, &NaturalOrder), None);
        map.validate_invariants(&NaturalOrder);
    }

    #[test]
    fn separator_key_removal_merges_around_the_matched_separator() {
        let mut map = populate(&[10, 20, 30, 40, 50, 60, 70, 80, 90]);
        assert_eq!(root_separators(&map), [40, 70]);

        for key in [10, 50, 90] {
            map.remove_entry(&key, &NaturalOrder).unwrap();
        }
        assert_eq!(leaf_keys(&map), [vec![20, 30], vec![40, 60], vec![70, 80]]);

        // 40 equals the first root separator and neither neighbor of its
        // right child can lend: the two children around that separator merge
        // and the removal continues inside the merged leaf.
        map.remove_entry(&40, &NaturalOrder).unwrap();
        assert_eq!(leaf_keys(&map), [vec![20, 30, 60], vec![70, 80]]);
        assert_eq!(root_separators(&map), [70]);
        assert_eq!(map.search(&40, &NaturalOrder), None);
        assert_eq!(map.len(), 5);
        map.validate_invariants(&NaturalOrder);
    }

    #[test]
    fn ascending_insertions_split_only_at_the_right_edge() {
        let mut map = RawBPlusTreeMap::new();
        for key in 0..200 {
            map.insert(key, key, &NaturalOrder);
            map.validate_invariants(&NaturalOrder);
        }
        assert_eq!(map.len(), 200);
        let collected: Vec<i32> = leaf_keys(&map).concat();
        assert_eq!(collected, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn descending_insertions_split_only_at_the_left_edge() {
        let mut map = RawBPlusTreeMap::new();
        for key in (0..200).rev() {
            map.insert(key, key, &NaturalOrder);
            map.validate_invariants(&NaturalOrder);
        }
        assert_eq!(map.len(), 200);
        let collected: Vec<i32> = leaf_keys(&map).concat();
        assert_eq!(collected, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn draining_a_deep_tree_in_either_direction_empties_it() {
        for ascending in [true, false] {
            let mut map = populate(&(0..128).collect::<Vec<_>>());
            let mut keys: Vec<i32> = (0..128).collect();
            if !ascending {
                keys.reverse();
            }

            for key in keys {
                assert!(map.remove_entry(&key, &NaturalOrder).is_some());
                map.validate_invariants(&NaturalOrder);
            }

            assert_eq!(map.len(), 0);
            assert!(map.root().is_none());
        }
    }

    #[test]
    fn removing_an_absent_key_changes_nothing() {
        let mut map = populate(&[10, 20, 30, 40, 50, 60]);
        let entries_before = leaf_keys(&map);

        assert_eq!(map.remove_entry(&35, &NaturalOrder), None);
        assert_eq!(map.len(), 6);
        assert_eq!(leaf_keys(&map), entries_before);
        for key in [10, 20, 30, 40, 50, 60] {
            assert!(map.search(&key, &NaturalOrder).is_some());
        }
        map.validate_invariants(&NaturalOrder);
    }

    #[test]
    fn bounds_land_on_the_expected_entries() {
        let map = populate(&[10, 20, 30, 40, 50, 60]);
        let key_at = |position: Option<(Handle, usize)>| {
            position.map(|(handle, index)| *map.node(handle).as_leaf().key(index))
        };

        assert_eq!(key_at(map.lower_bound(&25, &NaturalOrder)), Some(30));
        assert_eq!(key_at(map.lower_bound(&30, &NaturalOrder)), Some(30));
        assert_eq!(key_at(map.lower_bound(&61, &NaturalOrder)), None);
        assert_eq!(key_at(map.upper_bound(&30, &NaturalOrder)), Some(40));
        assert_eq!(key_at(map.upper_bound(&60, &NaturalOrder)), None);
        assert_eq!(key_at(map.upper_bound_inclusive(&35, &NaturalOrder)), Some(30));
        assert_eq!(key_at(map.upper_bound_inclusive(&5, &NaturalOrder)), None);
        assert_eq!(key_at(map.lower_bound_exclusive(&40, &NaturalOrder)), Some(30));
        assert_eq!(key_at(map.lower_bound_exclusive(&10, &NaturalOrder)), None);
    }

    #[test]
    fn cloning_preserves_entries_and_chain() {
        let map = populate(&(0..64).collect::<Vec<_>>());
        let clone = map.clone();
        clone.validate_invariants(&NaturalOrder);
        assert_eq!(clone.len(), map.len());
        assert_eq!(leaf_keys(&clone).concat(), leaf_keys(&map).concat());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Insert(i16, u32),
        Remove(i16),
        Get(i16),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        // A narrow key range forces overwrites and remove hits.
        let key = -48i16..48;
        prop_oneof![
            5 => (key.clone(), any::<u32>()).prop_map(|(k, v)| Op::Insert(k, v)),
            4 => key.clone().prop_map(Op::Remove),
            2 => key.prop_map(Op::Get),
        ]
    }

    proptest! {
        /// Random op sequences must match `std::collections::BTreeMap` and
        /// keep every invariant after every single operation.
        #[test]
        fn behaves_like_btreemap(ops in prop::collection::vec(op_strategy(), 0..400)) {
            let mut map: RawBPlusTreeMap<i16, u32> = RawBPlusTreeMap::new();
            let mut model = std::collections::BTreeMap::new();

            for op in ops {
                match op {
                    Op::Insert(key, value) => {
                        prop_assert_eq!(map.insert(key, value, &NaturalOrder), model.insert(key, value));
                    }
                    Op::Remove(key) => {
                        prop_assert_eq!(map.remove_entry(&key, &NaturalOrder), model.remove_entry(&key));
                    }
                    Op::Get(key) => {
                        prop_assert_eq!(map.get(&key, &NaturalOrder), model.get(&key));
                    }
                }

                prop_assert_eq!(map.len(), model.len());
                map.validate_invariants(&NaturalOrder);
            }

            let drained = map.drain_to_vec();
            let expected: Vec<(i16, u32)> = model.into_iter().collect();
            prop_assert_eq!(drained, expected);
        }

        /// Inserting a permutation of distinct keys and removing them in a
        /// second, independent permutation returns the tree to the canonical
        /// empty state.
        #[test]
        fn insert_all_remove_all_round_trips(
            insert_order in Just((0i32..96).collect::<Vec<_>>()).prop_shuffle(),
            remove_order in Just((0i32..96).collect::<Vec<_>>()).prop_shuffle(),
        ) {
            let mut map = RawBPlusTreeMap::new();
            for &key in &insert_order {
                prop_assert!(map.insert(key, key, &NaturalOrder).is_none());
            }
            map.validate_invariants(&NaturalOrder);
            prop_assert_eq!(map.len(), 96);

            for &key in &remove_order {
                prop_assert!(map.remove_entry(&key, &NaturalOrder).is_some());
                map.validate_invariants(&NaturalOrder);
            }

            prop_assert_eq!(map.len(), 0);
            prop_assert!(map.root().is_none());
            prop_assert!(map.first_leaf().is_none());
        }
    }
}
