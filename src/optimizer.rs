//! Weight-update rules and the hyperparameters that drive them.
//!
//! Both engines funnel every connection through [`apply_update`] (the device
//! engine re-states the same arithmetic in WGSL), so the two backends only
//! ever differ by floating-point width.

use crate::activation::Activation;
use crate::net::ConnectionState;

/// Divisor floor for Adam, added to `sqrt(v)` before dividing.
pub const ADAM_EPSILON: f64 = 1e-8;

/// Which update rule the network applies after gradients are computed.
///
/// Discriminants are fixed: they are the `u8` tag in the persistence header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Optimizer {
    Momentum = 0,
    Adam = 1,
}

impl TryFrom<u8> for Optimizer {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, u8> {
        match tag {
            0 => Ok(Optimizer::Momentum),
            1 => Ok(Optimizer::Adam),
            other => Err(other),
        }
    }
}

/// Everything tunable about a training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingParams {
    /// Learning rate (eta).
    pub learning_rate: f64,
    /// Momentum coefficient (alpha), only read by [`Optimizer::Momentum`].
    pub momentum: f64,
    pub optimizer: Optimizer,
    /// Nonlinearity applied by every neuron.
    pub activation: Activation,
    pub beta1: f64,
    pub beta2: f64,
    /// Divide Adam's accumulators by `1 - beta^t` before the step. Off by
    /// default: the raw accumulators converge fine at this scale.
    pub bias_correction: bool,
}

impl Default for TrainingParams {
    fn default() -> Self {
        TrainingParams {
            learning_rate: 0.1,
            momentum: 0.5,
            optimizer: Optimizer::Momentum,
            activation: Activation::Sigmoid,
            beta1: 0.9,
            beta2: 0.999,
            bias_correction: false,
        }
    }
}

/// Bias-correction divisors for a given step count, `(1 - b1^t, 1 - b2^t)`.
///
/// Returns `(1.0, 1.0)` when correction is disabled or before the first
/// step, which leaves the raw accumulators untouched.
pub fn adam_correction(params: &TrainingParams, step: u64) -> (f64, f64) {
    if !params.bias_correction || step == 0 {
        return (1.0, 1.0);
    }
    let t = step as f64;
    (
        1.0 - params.beta1.powf(t),
        1.0 - params.beta2.powf(t),
    )
}

/// Applies one optimizer step to a single connection, in place.
///
/// `gradient` is the destination neuron's gradient, `input` the value that
/// flowed over this connection in the forward pass (1.0 for the bias).
/// `correction` comes from [`adam_correction`] and is `(1.0, 1.0)` for the
/// uncorrected form.
pub fn apply_update(
    conn: &mut ConnectionState,
    gradient: f64,
    input: f64,
    params: &TrainingParams,
    correction: (f64, f64),
) {
    match params.optimizer {
        Optimizer::Momentum => {
            let delta = params.learning_rate * gradient * input + params.momentum * conn.delta;
            conn.delta = delta;
            conn.weight += delta;
        }
        Optimizer::Adam => {
            let g = gradient * input;
            conn.m = params.beta1 * conn.m + (1.0 - params.beta1) * g;
            conn.v = params.beta2 * conn.v + (1.0 - params.beta2) * g * g;
            let m_hat = conn.m / correction.0;
            let v_hat = conn.v / correction.1;
            conn.weight += params.learning_rate * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
        }
    }
}
