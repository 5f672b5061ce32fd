//! Particle benchmark scenario.
//!
//! Simulates a high-volume particle system directly on the job scheduler:
//! - 100,000 particles in flat arrays (position, velocity, lifetime)
//! - One dispatch integrating motion and aging, counting deaths per group in shared memory
//! - Dead particles respawned serially
//!
//! This scenario tests dispatch throughput and group scratch memory without any scene
//! bookkeeping on top.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tessel_engine::core::tasks::{DisjointSlice, Priority, Scheduler};

use crate::fixtures::scheduler;
use crate::scenarios::Scenario;

/// Configuration for the particle benchmark.
#[derive(Debug, Clone)]
pub struct ParticleConfig {
    pub particle_count: usize,
    pub delta_time: f32,
    pub group_size: u32,
    pub seed: u64,
    pub threads: u32,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            particle_count: 100_000,
            delta_time: 1.0 / 60.0,
            group_size: 256,
            seed: 12345,
            threads: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Particle {
    position: Vec3,
    velocity: Vec3,
    remaining: f32,
}

const GRAVITY: Vec3 = Vec3::new(0.0, -9.81, 0.0);

fn spawn(rng: &mut ChaCha8Rng) -> Particle {
    Particle {
        position: Vec3::new(rng.gen_range(-1.0..1.0), 0.0, rng.gen_range(-1.0..1.0)),
        velocity: Vec3::new(rng.gen_range(-2.0..2.0), rng.gen_range(5.0..15.0), rng.gen_range(-2.0..2.0)),
        remaining: rng.gen_range(1.0..5.0),
    }
}

/// Particle benchmark scenario.
pub struct ParticleScenario {
    config: ParticleConfig,
    scheduler: Scheduler,
    rng: ChaCha8Rng,
    particles: Vec<Particle>,
    respawned: usize,
}

impl ParticleScenario {
    pub fn new() -> Self {
        Self::with_config(ParticleConfig::default())
    }

    pub fn with_config(config: ParticleConfig) -> Self {
        Self {
            scheduler: scheduler(config.threads),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            particles: Vec::new(),
            respawned: 0,
            config,
        }
    }

    pub fn current_count(&self) -> usize {
        self.particles.len()
    }

    /// Particles respawned since setup.
    pub fn respawned(&self) -> usize {
        self.respawned
    }

    /// Integrate every particle and return how many died.
    fn simulate(&mut self) -> u32 {
        let dt = self.config.delta_time;
        let deaths = AtomicU32::new(0);
        let particles = DisjointSlice::new(&mut self.particles);
        let group_size = self.config.group_size;
        self.scheduler.scope(Priority::High, |ctx| {
            let deaths = &deaths;
            self.scheduler.dispatch_shared(ctx, particles.len() as u32, group_size, size_of::<u32>(), move |mut args| {
                // SAFETY: one job per particle.
                let particle = unsafe { particles.get_mut(args.job_index as usize) };
                particle.velocity += GRAVITY * dt;
                particle.position += particle.velocity * dt;
                particle.remaining -= dt;

                let (first, last) = (args.is_first_job_in_group, args.is_last_job_in_group);
                let dead = args.shared::<u32>();
                if first {
                    *dead = 0;
                }
                if particle.remaining <= 0.0 {
                    *dead += 1;
                }
                if last {
                    deaths.fetch_add(*dead, Ordering::Relaxed);
                }
            });
        });
        deaths.into_inner()
    }
}

impl Default for ParticleScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for ParticleScenario {
    fn name(&self) -> &'static str {
        "particles"
    }

    fn description(&self) -> &'static str {
        "High-volume particle integration dispatched over the scheduler, with respawn"
    }

    fn entity_count(&self) -> usize {
        self.config.particle_count
    }

    fn setup(&mut self) {
        let rng = &mut self.rng;
        self.particles = (0..self.config.particle_count).map(|_| spawn(rng)).collect();
    }

    fn update(&mut self) {
        if self.simulate() == 0 {
            return;
        }
        for particle in &mut self.particles {
            if particle.remaining <= 0.0 {
                *particle = spawn(&mut self.rng);
                self.respawned += 1;
            }
        }
    }

    fn teardown(&mut self) {
        self.particles.clear();
        self.respawned = 0;
    }
}
