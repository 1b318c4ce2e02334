//! Log-space arithmetic used throughout the online EM.
//!
//! All probabilities and masses in the quantification core are carried in
//! log space; `LOG_0` (= -inf) means "no mass".

/// log(0)
pub const LOG_0: f64 = f64::NEG_INFINITY;

/// log(1)
pub const LOG_1: f64 = 0.0;

/// log(0.5)
pub const LOG_ONEHALF: f64 = -std::f64::consts::LN_2;

/// Numerically stable log(exp(a) + exp(b)).
///
/// Handles `LOG_0` operands without producing NaN.
pub fn log_add(a: f64, b: f64) -> f64 {
    if a == LOG_0 {
        return b;
    }
    if b == LOG_0 {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// log(Σ exp(x_i)) over an iterator of log-space values.
pub fn log_sum_exp<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    values.into_iter().fold(LOG_0, log_add)
}
