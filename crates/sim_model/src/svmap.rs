//! Ordered sparse vector map.
//!
//! Stores values in a vector kept sorted by each value's key. Reads are
//! O(log n) binary searches; inserts are O(n) worst case. The intended use
//! is construction-time insertion in (mostly) ascending key order followed by
//! random-access reads, which this layout serves with cache-friendly scans
//! and deterministic iteration order.

use serde::{Deserialize, Serialize};

/// Implemented by values stored in a [`SparseVectorMap`]; the map is indexed
/// by the value returned from [`key`](MapKey::key).
pub trait MapKey {
    /// The key type.
    type Key: Ord + Copy + std::fmt::Debug;

    /// The key under which this value is stored.
    fn key(&self) -> Self::Key;
}

/// Error returned by [`SparseVectorMap::filter`] when the filter callable
/// replaces an element with one whose key differs from the original.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("filter returned an element with key {returned} in place of key {original}")]
pub struct BadFilteredKey {
    /// Key of the element handed to the filter.
    pub original: String,
    /// Key of the element the filter returned.
    pub returned: String,
}

/// An ordered container indexed by the stored values' keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SparseVectorMap<T: MapKey> {
    data: Vec<T>,
}

impl<T: MapKey> Default for SparseVectorMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MapKey> SparseVectorMap<T> {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create a map from an already-filled vector.
    ///
    /// If `sorted` is false the data is sorted by key first.
    #[must_use]
    pub fn from_vec(mut data: Vec<T>, sorted: bool) -> Self {
        if !sorted {
            data.sort_by_key(MapKey::key);
        }
        Self { data }
    }

    /// Index of `key`, or `None` if absent.
    fn find_index(&self, key: T::Key) -> Option<usize> {
        self.data.binary_search_by_key(&key, MapKey::key).ok()
    }

    /// Insert a value, keeping the vector sorted by key.
    ///
    /// If the key is already present the existing value is left in place and
    /// a reference to it is returned; otherwise the new value is inserted.
    pub fn insert(&mut self, val: T) -> &mut T {
        match self.data.binary_search_by_key(&val.key(), MapKey::key) {
            Ok(idx) => &mut self.data[idx],
            Err(idx) => {
                self.data.insert(idx, val);
                &mut self.data[idx]
            }
        }
    }

    /// Look up a value by key.
    #[must_use]
    pub fn get(&self, key: T::Key) -> Option<&T> {
        self.find_index(key).map(|i| &self.data[i])
    }

    /// Look up a value by key, mutably.
    pub fn get_mut(&mut self, key: T::Key) -> Option<&mut T> {
        self.find_index(key).map(|i| &mut self.data[i])
    }

    /// Returns `true` if the key is present.
    #[must_use]
    pub fn contains(&self, key: T::Key) -> bool {
        self.find_index(key).is_some()
    }

    /// Number of values stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the map holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Remove all values.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Iterate values in ascending key order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    /// Iterate values mutably in ascending key order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.data.iter_mut()
    }

    /// Apply a filter to every element in key order.
    ///
    /// The callable receives each element by value and returns either a
    /// replacement (which must report the same key) or `None` to remove the
    /// element. After filtering, the storage is compacted and shrunk.
    ///
    /// # Errors
    ///
    /// Returns [`BadFilteredKey`] if a replacement's key differs from the
    /// original's. The elements processed up to that point are kept; the
    /// offending replacement is dropped.
    pub fn filter<F>(&mut self, mut f: F) -> Result<(), BadFilteredKey>
    where
        F: FnMut(T) -> Option<T>,
    {
        let old = std::mem::take(&mut self.data);
        for item in old {
            let key = item.key();
            if let Some(replacement) = f(item) {
                if replacement.key() != key {
                    return Err(BadFilteredKey {
                        original: format!("{key:?}"),
                        returned: format!("{:?}", replacement.key()),
                    });
                }
                self.data.push(replacement);
            }
        }
        self.data.shrink_to_fit();
        Ok(())
    }

    /// Drain all values out of the map, leaving it empty.
    pub fn take_all(&mut self) -> Vec<T> {
        std::mem::take(&mut self.data)
    }
}

impl<T: MapKey> std::ops::Index<T::Key> for SparseVectorMap<T> {
    type Output = T;

    /// Panics if the key is absent; use [`get`](SparseVectorMap::get) when
    /// absence is a possibility.
    fn index(&self, key: T::Key) -> &T {
        match self.get(key) {
            Some(v) => v,
            None => panic!("key {key:?} not present in SparseVectorMap"),
        }
    }
}

impl<T: MapKey> std::ops::IndexMut<T::Key> for SparseVectorMap<T> {
    fn index_mut(&mut self, key: T::Key) -> &mut T {
        match self.find_index(key) {
            Some(i) => &mut self.data[i],
            None => panic!("key {key:?} not present in SparseVectorMap"),
        }
    }
}

impl<'a, T: MapKey> IntoIterator for &'a SparseVectorMap<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl<T: MapKey> IntoIterator for SparseVectorMap<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Item {
        id: u32,
        tag: String,
    }

    impl MapKey for Item {
        type Key = u32;
        fn key(&self) -> u32 {
            self.id
        }
    }

    fn item(id: u32, tag: &str) -> Item {
        Item {
            id,
            tag: tag.to_string(),
        }
    }

    #[test]
    fn test_insert_keeps_ascending_order() {
        let mut map = SparseVectorMap::new();
        map.insert(item(5, "e"));
        map.insert(item(1, "a"));
        map.insert(item(3, "c"));
        let keys: Vec<u32> = map.iter().map(|i| i.id).collect();
        assert_eq!(keys, vec![1, 3, 5]);
    }

    #[test]
    fn test_insert_duplicate_returns_existing() {
        let mut map = SparseVectorMap::new();
        map.insert(item(1, "first"));
        let existing = map.insert(item(1, "second"));
        assert_eq!(existing.tag, "first");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_lookup() {
        let mut map = SparseVectorMap::new();
        for id in [2, 4, 6, 8] {
            map.insert(item(id, "x"));
        }
        assert!(map.contains(6));
        assert!(!map.contains(5));
        assert_eq!(map.get(8).unwrap().id, 8);
        assert!(map.get(0).is_none());
    }

    #[test]
    fn test_filter_removes_and_replaces() {
        let mut map = SparseVectorMap::new();
        for id in 0..6 {
            map.insert(item(id, "keep"));
        }
        // Remove odd keys, retag even keys.
        map.filter(|i| {
            if i.id % 2 == 0 {
                Some(Item {
                    tag: "even".to_string(),
                    ..i
                })
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(map.len(), 3);
        let keys: Vec<u32> = map.iter().map(|i| i.id).collect();
        assert_eq!(keys, vec![0, 2, 4]);
        assert!(map.iter().all(|i| i.tag == "even"));
    }

    #[test]
    fn test_filter_rejects_changed_key() {
        let mut map = SparseVectorMap::new();
        map.insert(item(1, "a"));
        let err = map.filter(|mut i| {
            i.id = 99;
            Some(i)
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_from_vec_unsorted() {
        let map = SparseVectorMap::from_vec(vec![item(3, "c"), item(1, "a")], false);
        let keys: Vec<u32> = map.iter().map(|i| i.id).collect();
        assert_eq!(keys, vec![1, 3]);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut map = SparseVectorMap::new();
        map.insert(item(1, "a"));
        map.insert(item(2, "b"));
        let bytes = rmp_serde::to_vec(&map).unwrap();
        let restored: SparseVectorMap<Item> = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get(2).unwrap().tag, "b");
    }
}
