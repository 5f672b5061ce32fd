//! A data-oriented scene runtime.
//!
//! - [`core`] holds the job scheduler, the allocators, the frame clock and logging.
//! - [`ecs`] holds entities and the dense component storage everything else is built on.
//! - [`gfx`] is the graphics device contract the scene uploads through, with a headless backend.
//! - [`scene`] owns the component managers of a world and runs its per-frame update.

pub mod core;
pub mod ecs;
pub mod gfx;
pub mod scene;
