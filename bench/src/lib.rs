//! Benchmarks for the tessel engine.
//!
//! - **Microbenchmarks**: job submission, dispatch and the allocators in isolation
//! - **Scenario benchmarks**: full scene frames (city, crowd) and a raw scheduler workload
//!   (particles)
//! - **Frame timing**: per-frame statistics over long runs, with fixed-step accumulation
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p tessel_bench
//!
//! # Run one group
//! cargo bench -p tessel_bench -- scenario/city
//! ```
//!
//! Results are written to `target/criterion/` with HTML reports.

pub mod fixtures;
pub mod frame_timer;
pub mod scenarios;
