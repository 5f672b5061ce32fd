//! Entity handles.
//!
//! An [`Entity`] is an opaque, non-zero 32 bit id. It carries no data of its own: components
//! stored in [`ComponentManager`](crate::ecs::ComponentManager)s are associated with it, and a
//! component can reference another entity (a parent, a mesh, a material) by storing its handle.
//!
//! Ids are handed out by an [`Allocator`] in increasing order and are never reused, so a stale
//! handle simply stops resolving once its components are removed. Id `0` is reserved for
//! [`Entity::INVALID`], the "no entity" value used by references that aren't set.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// An entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Entity(u32);

impl Entity {
    /// The "no entity" handle.
    pub const INVALID: Self = Self(0);

    /// Construct a handle from a raw id.
    #[inline]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// The raw id.
    #[inline]
    pub const fn id(&self) -> u32 {
        self.0
    }

    /// The id as an index, for entity-keyed side tables.
    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out unique entity ids. Safe to share between threads.
#[derive(Debug)]
pub struct Allocator {
    next_id: AtomicU32,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator {
    pub const fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
        }
    }

    /// Allocate a fresh entity.
    #[inline]
    pub fn alloc(&self) -> Entity {
        Entity(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocate `count` consecutive entities.
    pub fn alloc_many(&self, count: u32) -> impl Iterator<Item = Entity> + use<> {
        let first = self.next_id.fetch_add(count, Ordering::Relaxed);
        (first..first + count).map(Entity)
    }

    /// Upper bound (exclusive) of every id handed out so far.
    #[inline]
    pub fn id_bound(&self) -> u32 {
        self.next_id.load(Ordering::Relaxed)
    }
}
