//! Online fragment-length distribution.
//!
//! A smoothed log-space histogram over `[0, max_len)`. Observations arrive
//! with a log-space weight and are spread over neighbouring bins by a
//! binomial kernel, so the learned PMF stays smooth even early in the
//! stream. A Gaussian prior keeps every length strictly positive.

use std::sync::Mutex;

use crate::math::{self, LOG_0};

/// Default histogram bound (bp).
pub const DEFAULT_MAX_LEN: usize = 800;
/// Default prior mean fragment length.
pub const DEFAULT_MEAN: f64 = 200.0;
/// Default prior standard deviation.
pub const DEFAULT_SD: f64 = 80.0;
/// Default kernel half-width.
pub const DEFAULT_KERNEL_N: usize = 4;
/// Default kernel shape.
pub const DEFAULT_KERNEL_P: f64 = 0.5;
/// Default prior scale.
pub const DEFAULT_ALPHA: f64 = 1.0;

struct FldInner {
    hist: Vec<f64>,
    cached_total: f64,
    total_valid: bool,
}

/// Thread-shared fragment-length distribution.
///
/// A single mutex guards the histogram; updates are sampled sparsely during
/// burn-in and stop entirely afterwards, so contention is negligible.
pub struct FragLenDist {
    kernel: Vec<f64>,
    kernel_n: usize,
    max_len: usize,
    inner: Mutex<FldInner>,
}

impl Default for FragLenDist {
    fn default() -> Self {
        Self::new(
            DEFAULT_ALPHA,
            DEFAULT_MAX_LEN,
            DEFAULT_MEAN,
            DEFAULT_SD,
            DEFAULT_KERNEL_N,
            DEFAULT_KERNEL_P,
        )
    }
}

impl FragLenDist {
    pub fn new(
        alpha: f64,
        max_len: usize,
        mean: f64,
        sd: f64,
        kernel_n: usize,
        kernel_p: f64,
    ) -> Self {
        assert!(max_len > 0);
        // Gaussian prior scaled by alpha.
        let log_alpha = alpha.ln();
        let norm = -(sd * (2.0 * std::f64::consts::PI).sqrt()).ln();
        let hist: Vec<f64> = (0..max_len)
            .map(|i| {
                let z = (i as f64 - mean) / sd;
                log_alpha + norm - 0.5 * z * z
            })
            .collect();

        // Binomial(2n, p) kernel in log space, 2n+1 taps.
        let n = 2 * kernel_n;
        let kernel: Vec<f64> = (0..=n)
            .map(|i| {
                log_binomial_coeff(n, i)
                    + i as f64 * kernel_p.ln()
                    + (n - i) as f64 * (1.0 - kernel_p).ln()
            })
            .collect();

        Self {
            kernel,
            kernel_n,
            max_len,
            inner: Mutex::new(FldInner {
                hist,
                cached_total: LOG_0,
                total_valid: false,
            }),
        }
    }

    /// Record an observed fragment length with the given log-space weight.
    ///
    /// The weight is spread over `[len - n, len + n]` by the kernel; bins
    /// outside the histogram are clamped to the boundary so no mass is lost.
    pub fn add_val(&self, len: usize, log_weight: f64) {
        let len = len.min(self.max_len - 1);
        let mut inner = self.inner.lock().unwrap();
        for (i, &k) in self.kernel.iter().enumerate() {
            let bin = (len as isize + i as isize - self.kernel_n as isize)
                .clamp(0, self.max_len as isize - 1) as usize;
            inner.hist[bin] = math::log_add(inner.hist[bin], log_weight + k);
        }
        inner.total_valid = false;
    }

    /// Log-PMF at `len`, lazily renormalized. Out-of-range lengths clamp to
    /// the nearest bin, so the result is a finite floor rather than -inf.
    pub fn pmf(&self, len: usize) -> f64 {
        let len = len.min(self.max_len - 1);
        let mut inner = self.inner.lock().unwrap();
        if !inner.total_valid {
            let total = math::log_sum_exp(inner.hist.iter().copied());
            inner.cached_total = total;
            inner.total_valid = true;
        }
        inner.hist[len] - inner.cached_total
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

/// ln(C(n, k))
fn log_binomial_coeff(n: usize, k: usize) -> f64 {
    ln_factorial(n) - ln_factorial(k) - ln_factorial(n - k)
}

fn ln_factorial(n: usize) -> f64 {
    (2..=n).map(|i| (i as f64).ln()).sum()
}
