//! Bounded-memory sampling of an unbounded stream, plus the order statistics calibration needs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub median: f32,
    pub std_dev: f32,
    pub count: usize,
}

/// Uniform sample of everything offered so far, never larger than `capacity`.
///
/// The first `capacity` values are kept as-is. After that the i-th value (1-based) replaces a
/// random slot with probability `capacity / i`.
#[derive(Clone, Debug)]
pub struct ReservoirStats {
    capacity: usize,
    samples: Vec<i32>,
    seen: u64,
    rng: StdRng,
}

impl ReservoirStats {
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, StdRng::seed_from_u64(seed))
    }

    fn with_rng(capacity: usize, rng: StdRng) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: Vec::with_capacity(capacity),
            seen: 0,
            rng,
        }
    }

    pub fn offer(&mut self, value: i32) {
        if self.samples.len() < self.capacity {
            self.samples.push(value);
        } else {
            let slot = self.rng.gen_range(0..=self.seen);
            if let Ok(slot) = usize::try_from(slot) {
                if slot < self.capacity {
                    self.samples[slot] = value;
                }
            }
        }
        self.seen += 1;
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.seen = 0;
    }

    /// Median and population standard deviation of the retained samples.
    pub fn summary(&self) -> Option<Summary> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let count = sorted.len();
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
        } else {
            sorted[mid] as f64
        };

        let mean = sorted.iter().map(|v| *v as f64).sum::<f64>() / count as f64;
        let variance = sorted
            .iter()
            .map(|v| {
                let d = *v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / count as f64;

        Some(Summary {
            median: median as f32,
            std_dev: variance.sqrt() as f32,
            count,
        })
    }
}
