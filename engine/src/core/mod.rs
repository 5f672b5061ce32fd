pub mod logger;
pub mod memory;
pub mod sync;
pub mod tasks;
pub mod time;

pub use tasks::{Context, DisjointSlice, JobArgs, Priority, Scheduler};
pub use time::Time;
