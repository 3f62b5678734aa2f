//! Arena storage for graph nodes and location identities.
//!
//! Nodes are never freed individually: a replaced or deleted node keeps its
//! slot (and its index) for diagnostics, and the whole arena is dropped with
//! the graph. Indices are therefore stable for the lifetime of a compilation.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// =============================================================================
// Typed ID
// =============================================================================

/// A type-safe index into an [`Arena`].
///
/// The marker keeps ids of different arenas apart (a `LocationId` can never
/// be passed where a `NodeId` is expected). Traits are implemented by hand so
/// `Id<T>` is `Copy`/`Eq`/`Hash` regardless of `T`.
pub struct Id<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Id<T> {
    /// Create an ID from a raw index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Id {
            index,
            _marker: PhantomData,
        }
    }

    /// Raw index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.index)
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.index)
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Append-only storage addressed by [`Id`].
#[derive(Debug, Clone)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Arena<T> {
    #[inline]
    pub fn new() -> Self {
        Arena { items: Vec::new() }
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Store an item and return its ID.
    #[inline]
    pub fn alloc(&mut self, item: T) -> Id<T> {
        let index = self.items.len() as u32;
        self.items.push(item);
        Id::new(index)
    }

    #[inline]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.items.get(id.as_usize())
    }

    #[inline]
    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        self.items.get_mut(id.as_usize())
    }

    #[inline]
    pub fn contains(&self, id: Id<T>) -> bool {
        id.as_usize() < self.items.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over all items with their IDs, in allocation order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (Id::new(i as u32), item))
    }

    /// Iterate over all IDs, in allocation order.
    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = Id<T>> {
        (0..self.items.len() as u32).map(Id::new)
    }

    /// The ID the next allocation will receive.
    #[inline]
    pub fn next_id(&self) -> Id<T> {
        Id::new(self.items.len() as u32)
    }

    #[inline]
    pub fn reserve(&mut self, additional: usize) {
        self.items.reserve(additional);
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: Id<T>) -> &Self::Output {
        &self.items[id.as_usize()]
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut Self::Output {
        &mut self.items[id.as_usize()]
    }
}

// =============================================================================
// Secondary Map
// =============================================================================

/// Side table keyed by arena IDs, grown on demand.
///
/// The graph keeps its usage multimap here so the node struct itself only
/// carries forward (input) edges.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V> {
    values: Vec<V>,
    _marker: PhantomData<fn() -> K>,
}

impl<K, V: Default + Clone> SecondaryMap<K, V> {
    pub fn new() -> Self {
        SecondaryMap {
            values: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Grow the map so `len` keys are addressable.
    pub fn resize(&mut self, len: usize) {
        if len > self.values.len() {
            self.values.resize(len, V::default());
        }
    }

    pub fn get(&self, id: Id<K>) -> Option<&V> {
        self.values.get(id.as_usize())
    }

    /// Mutable access, growing the map if `id` is past the end.
    pub fn entry(&mut self, id: Id<K>) -> &mut V {
        self.resize(id.as_usize() + 1);
        &mut self.values[id.as_usize()]
    }
}

impl<K, V: Default + Clone> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Bit Set
// =============================================================================

/// Dense bit set over arena indices, used for traversal bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSet {
    bits: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        BitSet { bits: Vec::new() }
    }

    pub fn with_capacity(n: usize) -> Self {
        BitSet {
            bits: vec![0; n.div_ceil(64)],
        }
    }

    /// Set a bit. Returns `true` if it was not set before.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        let word = index / 64;
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        let mask = 1u64 << (index % 64);
        let fresh = self.bits[word] & mask == 0;
        self.bits[word] |= mask;
        fresh
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.bits
            .get(index / 64)
            .is_some_and(|word| word & (1u64 << (index % 64)) != 0)
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Slot {
        value: i32,
    }

    #[test]
    fn test_arena_ids_are_stable() {
        let mut arena: Arena<Slot> = Arena::new();

        let a = arena.alloc(Slot { value: 1 });
        let b = arena.alloc(Slot { value: 2 });

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert!(arena.contains(b));
        assert!(!arena.contains(Id::new(2)));

        arena[a].value = 10;
        assert_eq!(arena[a].value, 10);
        assert_eq!(arena[b].value, 2);
    }

    #[test]
    fn test_arena_iteration_order() {
        let mut arena: Arena<Slot> = Arena::new();
        for value in 0..4 {
            arena.alloc(Slot { value });
        }

        let values: Vec<_> = arena.iter().map(|(_, s)| s.value).collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
        assert_eq!(arena.ids().count(), 4);
    }

    #[test]
    fn test_secondary_map_grows_on_entry() {
        let mut map: SecondaryMap<Slot, Vec<u32>> = SecondaryMap::new();
        assert!(map.get(Id::new(5)).is_none());

        map.entry(Id::new(5)).push(7);
        assert_eq!(map.get(Id::new(5)), Some(&vec![7]));
        assert_eq!(map.get(Id::new(0)), Some(&vec![]));
    }

    #[test]
    fn test_bit_set_insert_reports_freshness() {
        let mut set = BitSet::with_capacity(10);

        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert!(set.insert(130));

        assert!(set.contains(3));
        assert!(set.contains(130));
        assert!(!set.contains(4));
        assert_eq!(set.count(), 2);
    }
}
