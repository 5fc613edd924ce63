use super::BPlusTreeMap;
use crate::raw::RawBPlusTreeMap;

impl<K, V, C> BPlusTreeMap<K, V, C> {
    /// Creates an empty map ordered by `order`, with room for at least
    /// `capacity` entries before the arenas reallocate.
    ///
    /// # Examples
    ///
    /// ```
    /// use leaflink::BPlusTreeMap;
    ///
    /// let reverse = |a: &i32, b: &i32| b < a;
    /// let map: BPlusTreeMap<i32, i32, _> = BPlusTreeMap::with_capacity_and_order(64, reverse);
    /// assert!(map.is_empty());
    /// ```
    #[must_use]
    pub fn with_capacity_and_order(capacity: usize, order: C) -> Self {
        BPlusTreeMap { raw: RawBPlusTreeMap::with_capacity(capacity), order }
    }

    /// Returns the number of entries the map can hold before its arenas
    /// reallocate.
    ///
    /// # Examples
    ///
    /// ```
    /// use leaflink::BPlusTreeMap;
    ///
    /// let map: BPlusTreeMap<i32, i32> = BPlusTreeMap::with_capacity(64);
    /// assert!(map.capacity() >= 64);
    /// ```
    ///
    /// # Complexity
    ///
    /// O(1)
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }
}

impl<K, V, C: Default> BPlusTreeMap<K, V, C> {
    /// Creates an empty map with room for at least `capacity` entries before
    /// the arenas reallocate.
    ///
    /// # Examples
    ///
    /// ```
    /// use leaflink::BPlusTreeMap;
    ///
    /// let map: BPlusTreeMap<i32, i32> = BPlusTreeMap::with_capacity(32);
    /// assert!(map.is_empty());
    /// ```
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_order(capacity, C::default())
    }
}
