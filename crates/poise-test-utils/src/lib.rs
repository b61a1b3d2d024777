//! Shared test fixtures and utilities for poise crates.
//!
//! Provides synthetic planar legs with known Jacobians, a static kinematics
//! provider, a linear inverted pendulum plant, mock solvers and listeners,
//! and deterministic RNG setup.

pub mod kinematics;
pub mod mocks;
pub mod rng;
pub mod scenario;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use kinematics::{PlanarLeg, StaticKinematics};
pub use mocks::{FailingSolver, RecordingListener};
pub use rng::{deterministic_pushes, random_push, seeded_rng};
pub use scenario::{LipmPlant, biped, feet_at_rest, single_leg, tick_time};
