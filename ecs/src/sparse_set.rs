/// Typed sparse set storing components of type `T`.
///
/// Uses a sparse array (entity index → dense index) and a dense array
/// (contiguous component data + entity mapping) for O(1) insert/remove/get
/// and cache-friendly iteration. Removal swaps the last dense element into
/// the vacated slot, so dense order is not insertion order after a removal.
#[derive(Debug, Clone)]
pub struct SparseSet<T> {
    /// `entity_index -> dense_index`. `None` means the entity does not have
    /// this component.
    sparse: Vec<Option<u32>>,
    /// Component values, contiguous for iteration.
    dense: Vec<T>,
    /// Entity indices corresponding to each dense element.
    entities: Vec<u32>,
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SparseSet<T> {
    /// Creates a new empty sparse set.
    pub fn new() -> Self {
        Self {
            sparse: Vec::new(),
            dense: Vec::new(),
            entities: Vec::new(),
        }
    }

    /// Inserts a component for the given entity index.
    ///
    /// Returns the previous value if the entity already had this component.
    pub fn insert(&mut self, entity_index: u32, value: T) -> Option<T> {
        let idx = entity_index as usize;

        if idx >= self.sparse.len() {
            self.sparse.resize(idx + 1, None);
        }

        if let Some(dense_idx) = self.sparse[idx] {
            Some(std::mem::replace(&mut self.dense[dense_idx as usize], value))
        } else {
            self.sparse[idx] = Some(self.dense.len() as u32);
            self.dense.push(value);
            self.entities.push(entity_index);
            None
        }
    }

    /// Removes a component for the given entity index.
    pub fn remove(&mut self, entity_index: u32) -> Option<T> {
        let dense_idx = (*self.sparse.get(entity_index as usize)?)? as usize;
        self.sparse[entity_index as usize] = None;

        let last_dense = self.dense.len() - 1;
        if dense_idx != last_dense {
            let swapped_entity = self.entities[last_dense];
            self.sparse[swapped_entity as usize] = Some(dense_idx as u32);
        }

        self.entities.swap_remove(dense_idx);
        Some(self.dense.swap_remove(dense_idx))
    }

    /// Returns a reference to the component for the given entity index.
    pub fn get(&self, entity_index: u32) -> Option<&T> {
        let dense_idx = (*self.sparse.get(entity_index as usize)?)? as usize;
        Some(&self.dense[dense_idx])
    }

    /// Returns a mutable reference to the component for the given entity index.
    pub fn get_mut(&mut self, entity_index: u32) -> Option<&mut T> {
        let dense_idx = (*self.sparse.get(entity_index as usize)?)? as usize;
        Some(&mut self.dense[dense_idx])
    }

    /// Returns whether the entity has this component.
    pub fn contains(&self, entity_index: u32) -> bool {
        matches!(self.sparse.get(entity_index as usize), Some(Some(_)))
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Iterates over `(entity_index, &component)` pairs in dense order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.entities.iter().copied().zip(self.dense.iter())
    }

    /// Iterates over `(entity_index, &mut component)` pairs in dense order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.entities.iter().copied().zip(self.dense.iter_mut())
    }

    /// Entity indices in dense order.
    pub fn entities(&self) -> &[u32] {
        &self.entities
    }

    /// Component values in dense order.
    pub fn values(&self) -> &[T] {
        &self.dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_insert_get() {
        let mut set = SparseSet::new();
        assert_eq!(set.insert(5, "five"), None);
        assert_eq!(set.insert(5, "FIVE"), Some("five"));
        assert_eq!(set.get(5), Some(&"FIVE"));
        assert_eq!(set.get(4), None);
        assert_eq!(set.get(100), None);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_swap_remove_keeps_mapping() {
        let mut set = SparseSet::new();
        set.insert(0, 'a');
        set.insert(1, 'b');
        set.insert(2, 'c');

        assert_eq!(set.remove(0), Some('a'));
        assert_eq!(set.entities(), &[2, 1]);
        assert_eq!(set.get(2), Some(&'c'));
        assert_eq!(set.get(1), Some(&'b'));
        assert!(!set.contains(0));
        assert_eq!(set.remove(0), None);
    }

    #[test]
    fn test_remove_last() {
        let mut set = SparseSet::new();
        set.insert(3, 1.0f32);
        assert_eq!(set.remove(3), Some(1.0));
        assert!(set.is_empty());
    }

    #[test]
    fn test_iter_mut() {
        let mut set = SparseSet::new();
        set.insert(1, 10);
        set.insert(7, 70);
        for (_, v) in set.iter_mut() {
            *v += 1;
        }
        let collected: Vec<_> = set.iter().map(|(e, v)| (e, *v)).collect();
        assert_eq!(collected, vec![(1, 11), (7, 71)]);
    }

    #[rstest]
    #[case(&[0, 1, 2, 3], 0)]
    #[case(&[0, 1, 2, 3], 3)]
    #[case(&[9, 4, 7], 4)]
    #[case(&[5], 5)]
    fn test_remove_preserves_remaining(#[case] indices: &[u32], #[case] removed: u32) {
        let mut set = SparseSet::new();
        for &i in indices {
            set.insert(i, i * 100);
        }

        assert_eq!(set.remove(removed), Some(removed * 100));
        assert_eq!(set.len(), indices.len() - 1);
        for &i in indices.iter().filter(|&&i| i != removed) {
            assert_eq!(set.get(i), Some(&(i * 100)));
        }
    }
}
