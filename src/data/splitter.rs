// ============================================================
// Layer 4 — Dev Subset Splitter
// ============================================================
// Quick ELR runs train on a random fraction of the samples
// instead of the whole split ("--dev").
//
// The shuffle is seeded so the same seed always picks the same
// samples, and a run can be repeated on exactly the same subset.
//
// Uses Fisher-Yates shuffle via rand::seq::SliceRandom.
//
// Reference: rand crate documentation

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Fraction of the samples a dev run keeps.
pub const DEV_FRACTION: f64 = 0.2;

/// Seeded shuffle of `samples`, split into (first `fraction`, rest).
pub fn split_seeded<T>(mut samples: Vec<T>, fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let split_at = ((total as f64) * fraction.clamp(0.0, 1.0)).round() as usize;
    let rest     = samples.split_off(split_at.min(total));

    tracing::debug!(
        "Dataset split: {} kept, {} dropped (seed {})",
        samples.len(),
        rest.len(),
        seed,
    );

    (samples, rest)
}

/// Indices of the samples a dev run trains on, in shuffled order.
pub fn dev_subset_indices(total: usize, seed: u64) -> Vec<usize> {
    split_seeded((0..total).collect(), DEV_FRACTION, seed).0
}
