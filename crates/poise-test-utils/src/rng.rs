//! Deterministic RNG utilities for reproducible disturbance scenarios.

use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Create a deterministic `ChaCha8Rng` from a seed.
///
/// All test randomization should go through this to ensure reproducibility.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Horizontal velocity kick with each axis uniform in `[-max, max]`.
pub fn random_push<R: Rng>(rng: &mut R, max: f64) -> Vector2<f64> {
    if max <= 0.0 {
        return Vector2::zeros();
    }
    Vector2::new(rng.gen_range(-max..=max), rng.gen_range(-max..=max))
}

/// `count` pushes from a fixed seed.
pub fn deterministic_pushes(count: usize, max: f64, seed: u64) -> Vec<Vector2<f64>> {
    let mut rng = seeded_rng(seed);
    (0..count).map(|_| random_push(&mut rng, max)).collect()
}
