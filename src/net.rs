//! The backend-agnostic data model and the engine contract.
//!
//! A network is fully described by a [`Topology`], an optimizer choice and a
//! flat list of [`ConnectionState`] records in one fixed traversal order:
//! layer ascending (the input layer owns no connections), destination neuron
//! ascending, incoming connection ascending with the bias slot last. Both
//! engines build from a [`NetworkSnapshot`] in that order and can emit one
//! back, which is what makes host and device state interchangeable on disk.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::activation::Activation;
use crate::error::NetError;
use crate::optimizer::{Optimizer, TrainingParams};

/// Smoothing span of the running training-error average.
pub const ERROR_SMOOTHING: f64 = 100.0;

/// Layer widths, input first. Validated on construction and immutable after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology(Vec<usize>);

impl Topology {
    /// Requires at least two layers, every width nonzero, and a total
    /// connection count that fits in `usize`.
    pub fn new(widths: Vec<usize>) -> Result<Self, NetError> {
        if widths.len() < 2 || widths.iter().any(|&w| w == 0) {
            return Err(NetError::InvalidTopology { widths });
        }
        if checked_connection_count(&widths).is_none() {
            return Err(NetError::InvalidTopology { widths });
        }
        Ok(Topology(widths))
    }

    pub fn widths(&self) -> &[usize] {
        &self.0
    }

    pub fn num_layers(&self) -> usize {
        self.0.len()
    }

    pub fn input_width(&self) -> usize {
        self.0[0]
    }

    pub fn output_width(&self) -> usize {
        self.0[self.0.len() - 1]
    }

    /// Total connection records: for each non-input layer,
    /// `width * (previous width + 1)` (the +1 is the bias input).
    pub fn connection_count(&self) -> usize {
        // cannot overflow: widths were bounds-checked on construction
        self.0.windows(2).map(|w| w[1] * (w[0] + 1)).sum()
    }
}

/// The connection count of `widths`, or `None` when the arithmetic would
/// overflow. Widths arrive from untrusted files, so the multiply and the
/// running sum both stay checked.
pub(crate) fn checked_connection_count(widths: &[usize]) -> Option<usize> {
    let mut total = 0usize;
    for w in widths.windows(2) {
        let per = w[0].checked_add(1)?.checked_mul(w[1])?;
        total = total.checked_add(per)?;
    }
    Some(total)
}

/// Per-connection numeric state. `delta` backs the momentum rule, `m`/`v`
/// back Adam; the fields not owned by the active optimizer stay zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConnectionState {
    pub weight: f64,
    pub delta: f64,
    pub m: f64,
    pub v: f64,
}

/// The complete numeric state of a network, engine-independent.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSnapshot {
    pub topology: Topology,
    pub optimizer: Optimizer,
    /// One record per connection in the fixed traversal order.
    pub connections: Vec<ConnectionState>,
}

impl NetworkSnapshot {
    /// Fresh random state: weights uniform in `-0.5..0.5`, accumulators
    /// zero. `seed` pins the generator for reproducible tests; `None` draws
    /// from OS entropy.
    pub fn random(topology: Topology, optimizer: Optimizer, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };
        let connections = (0..topology.connection_count())
            .map(|_| ConnectionState {
                weight: rng.random_range(-0.5..0.5),
                ..ConnectionState::default()
            })
            .collect();
        NetworkSnapshot {
            topology,
            optimizer,
            connections,
        }
    }

    /// Rejects a snapshot whose record count disagrees with its topology.
    pub fn check_counts(&self) -> Result<(), NetError> {
        let expected = self.topology.connection_count();
        if self.connections.len() != expected {
            return Err(NetError::ConnectionCountMismatch {
                expected,
                got: self.connections.len(),
            });
        }
        Ok(())
    }
}

/// The operations every backend implements identically.
pub trait Network {
    /// Runs one forward pass. `inputs` must match the input width exactly;
    /// on mismatch nothing is mutated.
    fn feed_forward(&mut self, inputs: &[f64]) -> Result<(), NetError>;

    /// Computes gradients against `targets` and applies one optimizer step
    /// to every weight. Requires a prior successful
    /// [`feed_forward`](Network::feed_forward); on any contract error
    /// nothing is mutated.
    fn back_propagate(&mut self, targets: &[f64]) -> Result<(), NetError>;

    /// Output-layer activations from the most recent forward pass.
    fn results(&self) -> Result<Vec<f64>, NetError>;

    fn topology(&self) -> &Topology;

    fn set_activation(&mut self, kind: Activation);

    fn set_training_parameters(&mut self, params: TrainingParams);

    fn training_parameters(&self) -> TrainingParams;

    /// Smoothed RMS training error over recent `back_propagate` calls.
    fn recent_average_error(&self) -> f64;

    /// Full numeric state in the fixed traversal order. The device engine
    /// reads its buffers back, so this can fail.
    fn snapshot(&self) -> Result<NetworkSnapshot, NetError>;

    /// Writes the current state to `path` in the `.nnw` format.
    fn save(&self, path: &str) -> Result<(), NetError> {
        crate::codec::write_file(path, &self.snapshot()?)
    }
}

/// Folds one sample's RMS output error into the running average.
pub(crate) fn fold_error(avg: f64, outputs: &[f64], targets: &[f64]) -> f64 {
    let sum_sq: f64 = outputs
        .iter()
        .zip(targets)
        .map(|(o, t)| (t - o) * (t - o))
        .sum();
    let rms = (sum_sq / outputs.len() as f64).sqrt();
    (avg * ERROR_SMOOTHING + rms) / (ERROR_SMOOTHING + 1.0)
}
