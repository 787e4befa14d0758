//! Convergence training loop over a fixed sample set.
//!
//! One pass feeds every sample forward and backpropagates it. A pass counts
//! as clean when every sample's worst output error stays inside the margin;
//! training stops after enough consecutive clean passes, or reports
//! non-convergence once the pass budget runs out. Non-convergence is an
//! outcome, not an error.

use crate::error::NetError;
use crate::net::Network;

/// One input/target pair.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub inputs: Vec<f64>,
    pub targets: Vec<f64>,
}

impl TrainingSample {
    pub fn new(inputs: Vec<f64>, targets: Vec<f64>) -> Self {
        TrainingSample { inputs, targets }
    }
}

/// Stopping criterion.
#[derive(Debug, Clone, Copy)]
pub struct TrainOptions {
    /// Give up after this many passes over the full sample set.
    pub max_passes: u64,
    /// Per-output absolute error a clean pass must stay within.
    pub margin: f64,
    /// Consecutive clean passes required before declaring convergence.
    pub required_successes: u32,
}

impl Default for TrainOptions {
    fn default() -> Self {
        TrainOptions {
            max_passes: 500_000,
            margin: 0.1,
            required_successes: 3,
        }
    }
}

/// How a training run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Converged { passes: u64 },
    DidNotConverge,
}

/// Trains `net` on `samples` until the stopping criterion is met.
pub fn train(
    net: &mut dyn Network,
    samples: &[TrainingSample],
    options: &TrainOptions,
) -> Result<Outcome, NetError> {
    let mut consecutive = 0u32;
    for pass in 1..=options.max_passes {
        let mut clean = true;
        for sample in samples {
            net.feed_forward(&sample.inputs)?;
            net.back_propagate(&sample.targets)?;
            let outputs = net.results()?;
            let worst = outputs
                .iter()
                .zip(&sample.targets)
                .map(|(o, t)| (t - o).abs())
                .fold(0.0f64, f64::max);
            if worst > options.margin {
                clean = false;
            }
        }

        if clean {
            consecutive += 1;
            if consecutive >= options.required_successes {
                log::info!(
                    "converged after {pass} passes (recent avg error {:.6})",
                    net.recent_average_error()
                );
                return Ok(Outcome::Converged { passes: pass });
            }
        } else {
            consecutive = 0;
        }

        if pass % 50_000 == 0 {
            log::debug!(
                "pass {pass}: recent avg error {:.6}",
                net.recent_average_error()
            );
        }
    }
    log::warn!(
        "did not converge within {} passes (recent avg error {:.6})",
        options.max_passes,
        net.recent_average_error()
    );
    Ok(Outcome::DidNotConverge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostNetwork;
    use crate::net::Topology;
    use crate::optimizer::Optimizer;

    #[test]
    fn gives_up_at_the_pass_budget() {
        let topology = Topology::new(vec![2, 2, 1]).unwrap();
        let mut net = HostNetwork::new(topology, Optimizer::Momentum, Some(1)).unwrap();
        // XOR cannot be learned in 2 passes
        let samples = vec![
            TrainingSample::new(vec![0.0, 0.0], vec![0.0]),
            TrainingSample::new(vec![1.0, 1.0], vec![0.0]),
            TrainingSample::new(vec![0.0, 1.0], vec![1.0]),
            TrainingSample::new(vec![1.0, 0.0], vec![1.0]),
        ];
        let options = TrainOptions {
            max_passes: 2,
            ..TrainOptions::default()
        };
        assert_eq!(
            train(&mut net, &samples, &options).unwrap(),
            Outcome::DidNotConverge
        );
    }

    #[test]
    fn contract_errors_surface_instead_of_looping() {
        let topology = Topology::new(vec![2, 2, 1]).unwrap();
        let mut net = HostNetwork::new(topology, Optimizer::Momentum, Some(1)).unwrap();
        let samples = vec![TrainingSample::new(vec![0.0], vec![0.0])];
        assert!(train(&mut net, &samples, &TrainOptions::default()).is_err());
    }
}
