//! Fixed-length convolution over the newest samples of a history buffer.
//!
//! Kernels are stored in dot-product order: oldest coefficient first, so the last coefficient
//! multiplies the newest sample.

use std::collections::VecDeque;

pub const DEFAULT_WINDOW: usize = 21;

pub trait FilterSample: Copy {
    fn to_f32(self) -> f32;
}

impl FilterSample for i32 {
    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl FilterSample for u32 {
    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl FilterSample for f32 {
    fn to_f32(self) -> f32 {
        self
    }
}

/// Bounded oldest-to-newest history; pushing into a full history drops the oldest value.
#[derive(Clone, Debug)]
pub struct History<T> {
    capacity: usize,
    values: VecDeque<T>,
}

impl<T: Copy> History<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: T) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn last(&self) -> Option<T> {
        self.values.back().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = T> + ExactSizeIterator + '_ {
        self.values.iter().copied()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    coeffs: Vec<f32>,
}

impl Kernel {
    pub fn raw(coeffs: Vec<f32>) -> Self {
        Self { coeffs }
    }

    /// Kernel rescaled so its coefficients sum to one. A zero-sum kernel is kept as given.
    pub fn normalized(coeffs: Vec<f32>) -> Self {
        let sum: f32 = coeffs.iter().sum();
        if sum == 0.0 {
            return Self::raw(coeffs);
        }
        Self {
            coeffs: coeffs.into_iter().map(|c| c / sum).collect(),
        }
    }

    pub fn moving_average(len: usize) -> Self {
        Self::normalized(vec![1.0; len.max(1)])
    }

    /// First-order Savitzky–Golay fit evaluated at the newest sample: a lag-free level estimate
    /// for signals that move linearly across the window.
    pub fn savgol_level(len: usize) -> Self {
        let fit = LinearFit::new(len);
        let coeffs = fit
            .offsets()
            .map(|x| 1.0 / fit.n + (x - fit.mean) * (0.0 - fit.mean) / fit.sxx)
            .collect();
        Self::normalized(coeffs)
    }

    /// First-order Savitzky–Golay slope, in input units per sample. Antisymmetric, sums to zero.
    pub fn savgol_slope(len: usize) -> Self {
        let fit = LinearFit::new(len);
        let coeffs = fit.offsets().map(|x| (x - fit.mean) / fit.sxx).collect();
        Self::raw(coeffs)
    }

    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn coeffs(&self) -> &[f32] {
        &self.coeffs
    }

    /// Dot product of the newest `len()` values with the kernel. Missing older values count as zero.
    pub fn apply<T: FilterSample>(&self, history: &History<T>) -> f32 {
        self.coeffs
            .iter()
            .rev()
            .zip(history.iter().rev())
            .map(|(c, v)| c * v.to_f32())
            .sum()
    }
}

/// Sample offsets `-(len-1)..=0` relative to the newest sample, with their least-squares moments.
struct LinearFit {
    len: usize,
    n: f32,
    mean: f32,
    sxx: f32,
}

impl LinearFit {
    fn new(len: usize) -> Self {
        let len = len.max(2);
        let n = len as f32;
        let mean = -(n - 1.0) / 2.0;
        let sxx = n * (n * n - 1.0) / 12.0;
        Self { len, n, mean, sxx }
    }

    fn offsets(&self) -> impl Iterator<Item = f32> {
        let len = self.len;
        (0..len).map(move |j| j as f32 - (len - 1) as f32)
    }
}
