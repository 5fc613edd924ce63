use core::cmp::Ordering;

/// A strict total order over keys of type `K`.
///
/// The tree stores a value of this type and evaluates exactly one relation,
/// [`less`](TotalOrder::less). Two keys are considered equal when neither is
/// less than the other, so the relation must be a strict weak ordering that is
/// total and pure: `less(a, b)` may not depend on anything but `a` and `b`,
/// and must never report both `less(a, b)` and `less(b, a)`.
///
/// It is a logic error for the order of a key to change while it is in a map
/// (for example through interior mutability). The behavior resulting from such
/// a logic error is unspecified but memory-safe.
///
/// Any `Fn(&K, &K) -> bool` closure is a `TotalOrder`, and [`NaturalOrder`]
/// bridges to [`Ord`] for keys that have a natural ordering.
///
/// # Examples
///
/// ```
/// use leaflink::{BPlusTreeMap, TotalOrder};
///
/// struct ByLength;
///
/// impl TotalOrder<&str> for ByLength {
///     fn less(&self, a: &&str, b: &&str) -> bool {
///         a.len() < b.len()
///     }
/// }
///
/// let mut map = BPlusTreeMap::with_order(ByLength);
/// map.insert("kiwi", 1);
/// map.insert("fig", 2);
/// map.insert("papaya", 3);
///
/// let keys: Vec<_> = map.keys().copied().collect();
/// assert_eq!(keys, ["fig", "kiwi", "papaya"]);
/// ```
pub trait TotalOrder<K: ?Sized> {
    /// Returns `true` if `a` is strictly less than `b`.
    fn less(&self, a: &K, b: &K) -> bool;

    /// Returns `true` if `a` and `b` are equivalent under the order.
    ///
    /// Defined as `!less(a, b) && !less(b, a)`; implementors should not
    /// override this with anything inconsistent with [`less`](Self::less).
    #[inline]
    fn equivalent(&self, a: &K, b: &K) -> bool {
        !self.less(a, b) && !self.less(b, a)
    }
}

/// Orders keys by their [`Ord`] implementation.
///
/// This is the default order of [`BPlusTreeMap`](crate::BPlusTreeMap), making
/// `BPlusTreeMap<K, V>` behave like the standard library's ordered maps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: ?Sized + Ord> TotalOrder<K> for NaturalOrder {
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        matches!(a.cmp(b), Ordering::Less)
    }

    #[inline]
    fn equivalent(&self, a: &K, b: &K) -> bool {
        matches!(a.cmp(b), Ordering::Equal)
    }
}

impl<K: ?Sized, F> TotalOrder<K> for F
where
    F: Fn(&K, &K) -> bool,
{
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        self(a, b)
    }
}
