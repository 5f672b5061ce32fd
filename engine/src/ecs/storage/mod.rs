//! Dense component storage.
//!
//! A [`ComponentManager<T>`] stores components of one type in a contiguous array, with a
//! parallel array of owning entities and a sparse [`EntityIndex`] mapping each entity back to
//! its row:
//!
//! ```text
//!   entities:   [ e7 ][ e2 ][ e9 ]       row i is owned by entities[i]
//!   components: [ c7 ][ c2 ][ c9 ]
//!   index:      e2 -> 1, e7 -> 0, e9 -> 2
//! ```
//!
//! Systems iterate the dense arrays directly, which is what makes it cheap to dispatch one job
//! per component. Removal swaps the last row into the hole, so row order is only stable under
//! [`remove_keep_sorted`](ComponentManager::remove_keep_sorted), which the hierarchy relies on.
//!
//! Invariant: `components.len() == entities.len()` and for every row `i`,
//! `index.get(entities[i]) == Some(i)`.

pub mod index;

use std::ops::{Index, IndexMut};

pub use index::EntityIndex;

use crate::ecs::entity::Entity;

#[derive(Debug, Clone)]
pub struct ComponentManager<T> {
    components: Vec<T>,
    entities: Vec<Entity>,
    lookup: EntityIndex,
}

impl<T> Default for ComponentManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ComponentManager<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            components: Vec::with_capacity(capacity),
            entities: Vec::with_capacity(capacity),
            lookup: EntityIndex::new(),
        }
    }

    /// Remove every component.
    pub fn clear(&mut self) {
        self.components.clear();
        self.entities.clear();
        self.lookup.clear();
    }

    /// Attach a default component to `entity` and return it.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is invalid or already has a component in this manager.
    pub fn create(&mut self, entity: Entity) -> &mut T
    where
        T: Default,
    {
        self.insert(entity, T::default())
    }

    /// Attach `component` to `entity` and return it.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is invalid or already has a component in this manager.
    pub fn insert(&mut self, entity: Entity, component: T) -> &mut T {
        assert!(entity.is_valid(), "cannot attach a component to the invalid entity");
        assert!(
            !self.lookup.contains(entity),
            "entity {entity} already has a component in this manager"
        );

        let row = self.components.len();
        self.lookup.insert(entity, row);
        self.entities.push(entity);
        self.components.push(component);
        &mut self.components[row]
    }

    /// Remove the component of `entity`, moving the last row into its place.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let row = self.lookup.remove(entity)?;
        let component = self.components.swap_remove(row);
        self.entities.swap_remove(row);
        if let Some(&moved) = self.entities.get(row) {
            self.lookup.insert(moved, row);
        }
        Some(component)
    }

    /// Remove the component of `entity`, shifting later rows down to preserve order.
    pub fn remove_keep_sorted(&mut self, entity: Entity) -> Option<T> {
        let row = self.lookup.remove(entity)?;
        let component = self.components.remove(row);
        self.entities.remove(row);
        for (i, &moved) in self.entities.iter().enumerate().skip(row) {
            self.lookup.insert(moved, i);
        }
        Some(component)
    }

    /// Move the row at `from` to `to`, shifting the rows in between by one.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of bounds.
    pub fn move_item(&mut self, from: usize, to: usize) {
        assert!(from < self.len() && to < self.len(), "row out of bounds");
        if from == to {
            return;
        }

        let range = if from < to {
            self.components[from..=to].rotate_left(1);
            self.entities[from..=to].rotate_left(1);
            from..=to
        } else {
            self.components[to..=from].rotate_right(1);
            self.entities[to..=from].rotate_right(1);
            to..=from
        };
        for i in range {
            self.lookup.insert(self.entities[i], i);
        }
    }

    /// Move every component of `other` into this manager, leaving `other` empty.
    ///
    /// # Panics
    ///
    /// Panics if an entity has a component in both managers.
    pub fn merge(&mut self, other: &mut ComponentManager<T>) {
        self.components.reserve(other.len());
        self.entities.reserve(other.len());
        for (entity, component) in other.entities.drain(..).zip(other.components.drain(..)) {
            self.insert(entity, component);
        }
        other.lookup.clear();
    }

    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.lookup.contains(entity)
    }

    #[inline]
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.lookup.get(entity).map(|row| &self.components[row])
    }

    #[inline]
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.lookup.get(entity).map(|row| &mut self.components[row])
    }

    /// Row of `entity`'s component.
    #[inline]
    pub fn index_of(&self, entity: Entity) -> Option<usize> {
        self.lookup.get(entity)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// The entity owning row `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    #[inline]
    pub fn entity(&self, row: usize) -> Entity {
        self.entities[row]
    }

    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[inline]
    pub fn components(&self) -> &[T] {
        &self.components
    }

    #[inline]
    pub fn components_mut(&mut self) -> &mut [T] {
        &mut self.components
    }

    /// Entity/component pairs in row order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.entities.iter().copied().zip(self.components.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.entities.iter().copied().zip(self.components.iter_mut())
    }

    /// Read-only entity lookup alongside mutable component access.
    ///
    /// Jobs that write components by row but resolve other rows by entity need both at once.
    #[inline]
    pub fn split_mut(&mut self) -> (Lookup<'_>, &mut [T]) {
        (
            Lookup {
                entities: &self.entities,
                index: &self.lookup,
            },
            &mut self.components,
        )
    }

    #[inline]
    pub fn lookup(&self) -> Lookup<'_> {
        Lookup {
            entities: &self.entities,
            index: &self.lookup,
        }
    }
}

impl<T> Index<usize> for ComponentManager<T> {
    type Output = T;

    #[inline]
    fn index(&self, row: usize) -> &T {
        &self.components[row]
    }
}

impl<T> IndexMut<usize> for ComponentManager<T> {
    #[inline]
    fn index_mut(&mut self, row: usize) -> &mut T {
        &mut self.components[row]
    }
}

/// The entity side of a [`ComponentManager`], detached from its components.
#[derive(Debug, Clone, Copy)]
pub struct Lookup<'a> {
    entities: &'a [Entity],
    index: &'a EntityIndex,
}

impl Lookup<'_> {
    #[inline]
    pub fn index_of(&self, entity: Entity) -> Option<usize> {
        self.index.get(entity)
    }

    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.index.contains(entity)
    }

    #[inline]
    pub fn entity(&self, row: usize) -> Entity {
        self.entities[row]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: u32) -> Entity {
        Entity::from_raw(id)
    }

    fn manager(ids: &[u32]) -> ComponentManager<u32> {
        let mut manager = ComponentManager::new();
        for &id in ids {
            manager.insert(entity(id), id * 10);
        }
        manager
    }

    fn assert_consistent(manager: &ComponentManager<u32>) {
        assert_eq!(manager.components().len(), manager.entities().len());
        for (row, &e) in manager.entities().iter().enumerate() {
            assert_eq!(manager.index_of(e), Some(row));
            assert_eq!(manager[row], e.id() * 10);
        }
    }

    // ==== Create / Insert ====

    #[test]
    fn create_attaches_default_component() {
        // Given
        let mut manager = ComponentManager::<u32>::new();

        // When
        *manager.create(entity(5)) += 3;

        // Then
        assert!(manager.contains(entity(5)));
        assert_eq!(manager.get(entity(5)), Some(&3));
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.entity(0), entity(5));
    }

    #[test]
    #[should_panic]
    fn duplicate_insert_panics() {
        let mut manager = manager(&[1]);
        manager.insert(entity(1), 0);
    }

    #[test]
    #[should_panic]
    fn invalid_entity_panics() {
        let mut manager = ComponentManager::<u32>::new();
        manager.insert(Entity::INVALID, 0);
    }

    // ==== Remove ====

    #[test]
    fn remove_swaps_last_into_hole() {
        // Given
        let mut manager = manager(&[1, 2, 3, 4]);

        // When
        let removed = manager.remove(entity(2));

        // Then
        assert_eq!(removed, Some(20));
        assert_eq!(manager.entities(), &[entity(1), entity(4), entity(3)]);
        assert!(!manager.contains(entity(2)));
        assert_consistent(&manager);
    }

    #[test]
    fn remove_last_and_missing() {
        let mut manager = manager(&[1, 2]);
        assert_eq!(manager.remove(entity(2)), Some(20));
        assert_eq!(manager.remove(entity(2)), None);
        assert_eq!(manager.remove(entity(9)), None);
        assert_consistent(&manager);
    }

    #[test]
    fn remove_keep_sorted_preserves_order() {
        // Given
        let mut manager = manager(&[1, 2, 3, 4]);

        // When
        manager.remove_keep_sorted(entity(2));

        // Then
        assert_eq!(manager.entities(), &[entity(1), entity(3), entity(4)]);
        assert_consistent(&manager);
    }

    // ==== Reorder / Merge ====

    #[test]
    fn move_item_forward_and_back() {
        // Given
        let mut manager = manager(&[1, 2, 3, 4]);

        // When
        manager.move_item(0, 2);

        // Then
        assert_eq!(manager.entities(), &[entity(2), entity(3), entity(1), entity(4)]);
        assert_consistent(&manager);

        // When
        manager.move_item(3, 0);

        // Then
        assert_eq!(manager.entities(), &[entity(4), entity(2), entity(3), entity(1)]);
        assert_consistent(&manager);
    }

    #[test]
    fn merge_moves_everything() {
        // Given
        let mut left = manager(&[1, 2]);
        let mut right = manager(&[7, 8]);

        // When
        left.merge(&mut right);

        // Then
        assert_eq!(left.len(), 4);
        assert!(right.is_empty());
        assert!(!right.contains(entity(7)));
        assert_eq!(left.get(entity(8)), Some(&80));
        assert_consistent(&left);
    }

    #[test]
    fn clear_empties_lookup() {
        let mut manager = manager(&[1, 2, 3]);
        manager.clear();
        assert!(manager.is_empty());
        assert_eq!(manager.index_of(entity(1)), None);
    }

    // ==== Access ====

    #[test]
    fn split_mut_resolves_while_writing() {
        // Given
        let mut manager = manager(&[1, 2, 3]);

        // When
        let (lookup, components) = manager.split_mut();
        if let Some(row) = lookup.index_of(entity(3)) {
            components[row] = 0;
        }

        // Then
        assert_eq!(manager.get(entity(3)), Some(&0));
    }

    #[test]
    fn iter_pairs_entities_with_components() {
        let mut manager = manager(&[4, 5]);
        for (_, value) in manager.iter_mut() {
            *value += 1;
        }
        let pairs: Vec<_> = manager.iter().map(|(e, &v)| (e.id(), v)).collect();
        assert_eq!(pairs, vec![(4, 41), (5, 51)]);
    }
}
