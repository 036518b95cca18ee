//! Key orderings for [`AvlStore`](crate::AvlStore).

use std::cmp::Ordering;

/// Total order over store keys.
///
/// Distinct keys may compare `Equal`. Lookups still match only the exact
/// key, and inserting a key that ties with a live one is refused as a
/// duplicate.
pub trait KeyComparator {
    fn compare(&self, a: u64, b: u64) -> Ordering;
}

/// Unsigned ascending order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NaturalOrder;

impl KeyComparator for NaturalOrder {
    fn compare(&self, a: u64, b: u64) -> Ordering {
        a.cmp(&b)
    }
}

/// Unsigned descending order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReverseOrder;

impl KeyComparator for ReverseOrder {
    fn compare(&self, a: u64, b: u64) -> Ordering {
        b.cmp(&a)
    }
}

impl<F> KeyComparator for F
where
    F: Fn(u64, u64) -> Ordering,
{
    fn compare(&self, a: u64, b: u64) -> Ordering {
        self(a, b)
    }
}
