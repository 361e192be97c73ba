//! Owned entity map with explicit default insertion.

use std::borrow::Borrow;
use std::collections::BTreeMap;

/// Loan entities keyed by user address or loan id.
///
/// Entities are created only through [`EntityMap::get_or_insert_with_default`];
/// plain lookups never insert.
#[derive(Debug, Clone)]
pub struct EntityMap<K, V> {
    entries: BTreeMap<K, V>,
}

impl<K: Ord, V> Default for EntityMap<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V> EntityMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entity under `key`, created with `V::default()` if absent.
    pub fn get_or_insert_with_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        self.entries.entry(key).or_default()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.get_mut(key)
    }

    /// Replace the entity under `key`.
    pub fn insert(&mut self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_does_not_insert() {
        let mut map: EntityMap<String, u32> = EntityMap::new();
        assert!(map.get("0x1").is_none());
        assert!(map.get_mut("0x1").is_none());
        assert!(map.is_empty());

        *map.get_or_insert_with_default("0x1".to_string()) += 2;
        *map.get_or_insert_with_default("0x1".to_string()) += 3;
        assert_eq!(map.get("0x1"), Some(&5));
        assert_eq!(map.len(), 1);

        map.clear();
        assert!(map.is_empty());
    }
}
