use crate::ecs::entity::Entity;

/// A block-based sparse index from entity ids to dense component rows.
///
/// The id space is divided into fixed-size blocks, and memory is only allocated for blocks that
/// contain at least one entry. Within a block a dense vector holds the mappings, so lookups are
/// two array indexings with no hashing.
///
/// Entity ids are allocated sequentially and entities created together tend to get components
/// together, so ids stored in one manager cluster into a few blocks.
///
/// | Operation | Time | Memory |
/// |-----------|------|--------|
/// | `insert()` | O(1) amortized | Allocates block on first use |
/// | `get()` | O(1) | No allocation |
/// | `remove()` | O(1) | No deallocation (leaves `None`) |
#[derive(Debug, Clone)]
pub struct EntityIndex {
    block_size: usize,
    /// Outer Vec is indexed by `id / block_size`, inner by `id % block_size`.
    blocks: Vec<Option<Box<[Option<usize>]>>>,
}

impl EntityIndex {
    pub const DEFAULT_BLOCK_SIZE: usize = 256;

    #[inline]
    pub const fn new() -> Self {
        Self::new_with_block_size(Self::DEFAULT_BLOCK_SIZE)
    }

    /// # Panics
    ///
    /// Debug builds panic if `block_size` is 0.
    #[inline]
    pub const fn new_with_block_size(block_size: usize) -> Self {
        debug_assert!(block_size > 0, "block_size must be greater than 0");
        Self {
            block_size,
            blocks: Vec::new(),
        }
    }

    #[inline]
    fn indices(&self, entity: Entity) -> (usize, usize) {
        let index = entity.index();
        (index / self.block_size, index % self.block_size)
    }

    /// Map `entity` to `row`, replacing any previous mapping.
    pub fn insert(&mut self, entity: Entity, row: usize) {
        let (block_index, within_block_index) = self.indices(entity);
        if block_index >= self.blocks.len() {
            self.blocks.resize_with(block_index + 1, || None);
        }
        let block_size = self.block_size;
        let block = self.blocks[block_index]
            .get_or_insert_with(|| vec![None; block_size].into_boxed_slice());
        block[within_block_index] = Some(row);
    }

    #[inline]
    pub fn get(&self, entity: Entity) -> Option<usize> {
        let (block_index, within_block_index) = self.indices(entity);
        let block = self.blocks.get(block_index)?.as_ref()?;
        block[within_block_index]
    }

    /// Remove the mapping for `entity`, returning its row.
    pub fn remove(&mut self, entity: Entity) -> Option<usize> {
        let (block_index, within_block_index) = self.indices(entity);
        let block = self.blocks.get_mut(block_index)?.as_mut()?;
        block[within_block_index].take()
    }

    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    /// Drop every mapping and every block.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Number of blocks actually allocated.
    pub fn allocated_block_count(&self) -> usize {
        self.blocks.iter().filter(|block| block.is_some()).count()
    }
}

impl Default for EntityIndex {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
