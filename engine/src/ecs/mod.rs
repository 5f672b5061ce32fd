pub mod entity;
pub mod storage;

pub use entity::{Allocator, Entity};
pub use storage::{ComponentManager, EntityIndex, Lookup};
