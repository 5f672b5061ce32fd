//! Realistic workloads with representative entity counts.
//!
//! - **City**: static buildings with attached props, moving vehicles, lights, decals, probes
//! - **Crowd**: animated characters, some animations sharing targets
//! - **Particles**: raw scheduler dispatch over flat arrays, no scene involved

pub mod city;
pub mod crowd;
pub mod particles;

pub use city::{CityConfig, CityScenario};
pub use crowd::{CrowdConfig, CrowdScenario};
pub use particles::{ParticleConfig, ParticleScenario};

/// Common trait for benchmark scenarios.
pub trait Scenario {
    /// Human-readable name of the scenario.
    fn name(&self) -> &'static str;

    /// What this scenario stresses.
    fn description(&self) -> &'static str;

    /// Number of simulated things (entities or particles).
    fn entity_count(&self) -> usize;

    /// Spawn everything.
    fn setup(&mut self);

    /// Run one frame.
    fn update(&mut self);

    /// Remove everything setup spawned.
    fn teardown(&mut self);
}
