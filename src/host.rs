//! The sequential in-process engine.
//!
//! Layers of neurons, each non-input neuron owning its incoming connections
//! (bias slot last). Every pass walks the layers in a strict order on one
//! thread, which makes the host engine the arithmetic reference the device
//! engine is checked against.

use crate::activation::Activation;
use crate::error::NetError;
use crate::net::{fold_error, Network, NetworkSnapshot, Topology};
use crate::optimizer::{adam_correction, apply_update, Optimizer, TrainingParams};

#[derive(Debug, Clone)]
struct Neuron {
    output: f64,
    gradient: f64,
    /// Incoming connections, one per previous-layer neuron plus the bias.
    /// Empty on the input layer.
    connections: Vec<crate::net::ConnectionState>,
}

/// Sequential engine over host memory, all state in `f64`.
#[derive(Debug, Clone)]
pub struct HostNetwork {
    topology: Topology,
    layers: Vec<Vec<Neuron>>,
    params: TrainingParams,
    avg_error: f64,
    step: u64,
    fed_forward: bool,
}

impl HostNetwork {
    /// Builds a freshly initialized network. `seed` pins the weight
    /// generator for reproducible runs.
    pub fn new(
        topology: Topology,
        optimizer: Optimizer,
        seed: Option<u64>,
    ) -> Result<Self, NetError> {
        let snapshot = NetworkSnapshot::random(topology, optimizer, seed);
        Self::from_snapshot(&snapshot)
    }

    /// Reconstructs a network from saved or transferred state.
    pub fn from_snapshot(snapshot: &NetworkSnapshot) -> Result<Self, NetError> {
        snapshot.check_counts()?;
        let widths = snapshot.topology.widths();
        let mut records = snapshot.connections.iter().copied();

        let mut layers = Vec::with_capacity(widths.len());
        layers.push(
            (0..widths[0])
                .map(|_| Neuron {
                    output: 0.0,
                    gradient: 0.0,
                    connections: Vec::new(),
                })
                .collect::<Vec<_>>(),
        );
        for pair in widths.windows(2) {
            let inputs = pair[0] + 1;
            let layer = (0..pair[1])
                .map(|_| Neuron {
                    output: 0.0,
                    gradient: 0.0,
                    connections: records.by_ref().take(inputs).collect(),
                })
                .collect();
            layers.push(layer);
        }

        let params = TrainingParams {
            optimizer: snapshot.optimizer,
            ..TrainingParams::default()
        };
        Ok(HostNetwork {
            topology: snapshot.topology.clone(),
            layers,
            params,
            avg_error: 0.0,
            step: 0,
            fed_forward: false,
        })
    }
}

impl Network for HostNetwork {
    fn feed_forward(&mut self, inputs: &[f64]) -> Result<(), NetError> {
        let expected = self.topology.input_width();
        if inputs.len() != expected {
            return Err(NetError::ShapeMismatch {
                what: "input",
                expected,
                got: inputs.len(),
            });
        }

        for (neuron, &value) in self.layers[0].iter_mut().zip(inputs) {
            neuron.output = value;
        }

        let activation = self.params.activation;
        for l in 1..self.layers.len() {
            let (prev_layers, rest) = self.layers.split_at_mut(l);
            let prev = &prev_layers[l - 1];
            for neuron in &mut rest[0] {
                let mut sum = 0.0;
                for (conn, source) in neuron.connections.iter().zip(prev) {
                    sum += conn.weight * source.output;
                }
                // bias input is the last slot, fixed at 1.0
                sum += neuron.connections[prev.len()].weight;
                neuron.output = activation.forward(sum);
            }
        }

        self.fed_forward = true;
        Ok(())
    }

    fn back_propagate(&mut self, targets: &[f64]) -> Result<(), NetError> {
        if !self.fed_forward {
            return Err(NetError::NotFedForward);
        }
        let expected = self.topology.output_width();
        if targets.len() != expected {
            return Err(NetError::ShapeMismatch {
                what: "target",
                expected,
                got: targets.len(),
            });
        }

        let params = self.params;
        let activation = params.activation;
        let last = self.layers.len() - 1;

        for (neuron, &target) in self.layers[last].iter_mut().zip(targets) {
            neuron.gradient = (target - neuron.output) * activation.derivative(neuron.output);
        }

        // Hidden gradients, last hidden layer first, against the weights as
        // they stood during the forward pass.
        for l in (1..last).rev() {
            let (current, next_layers) = self.layers.split_at_mut(l + 1);
            let next = &next_layers[0];
            for (n, neuron) in current[l].iter_mut().enumerate() {
                let dow: f64 = next
                    .iter()
                    .map(|down| down.connections[n].weight * down.gradient)
                    .sum();
                neuron.gradient = activation.derivative(neuron.output) * dow;
            }
        }

        self.step += 1;
        let correction = adam_correction(&params, self.step);
        for l in 1..self.layers.len() {
            let (prev_layers, rest) = self.layers.split_at_mut(l);
            let prev = &prev_layers[l - 1];
            for neuron in &mut rest[0] {
                let gradient = neuron.gradient;
                for (j, conn) in neuron.connections.iter_mut().enumerate() {
                    let input = if j < prev.len() { prev[j].output } else { 1.0 };
                    apply_update(conn, gradient, input, &params, correction);
                }
            }
        }

        let outputs: Vec<f64> = self.layers[last].iter().map(|n| n.output).collect();
        self.avg_error = fold_error(self.avg_error, &outputs, targets);
        Ok(())
    }

    fn results(&self) -> Result<Vec<f64>, NetError> {
        if !self.fed_forward {
            return Err(NetError::NotFedForward);
        }
        let last = self.layers.len() - 1;
        Ok(self.layers[last].iter().map(|n| n.output).collect())
    }

    fn topology(&self) -> &Topology {
        &self.topology
    }

    fn set_activation(&mut self, kind: Activation) {
        self.params.activation = kind;
    }

    fn set_training_parameters(&mut self, params: TrainingParams) {
        self.params = params;
    }

    fn training_parameters(&self) -> TrainingParams {
        self.params
    }

    fn recent_average_error(&self) -> f64 {
        self.avg_error
    }

    fn snapshot(&self) -> Result<NetworkSnapshot, NetError> {
        let connections = self
            .layers
            .iter()
            .skip(1)
            .flat_map(|layer| layer.iter().flat_map(|n| n.connections.iter().copied()))
            .collect();
        Ok(NetworkSnapshot {
            topology: self.topology.clone(),
            optimizer: self.params.optimizer,
            connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ConnectionState;

    fn tiny_net(optimizer: Optimizer) -> HostNetwork {
        let topology = Topology::new(vec![2, 2, 1]).unwrap();
        HostNetwork::new(topology, optimizer, Some(42)).unwrap()
    }

    #[test]
    fn wrong_input_length_leaves_state_untouched() {
        let mut net = tiny_net(Optimizer::Momentum);
        let before = net.snapshot().unwrap();
        assert!(matches!(
            net.feed_forward(&[1.0, 2.0, 3.0]),
            Err(NetError::ShapeMismatch { what: "input", .. })
        ));
        assert!(net.results().is_err());
        assert_eq!(net.snapshot().unwrap(), before);
    }

    #[test]
    fn backprop_before_forward_is_rejected() {
        let mut net = tiny_net(Optimizer::Momentum);
        assert!(matches!(
            net.back_propagate(&[0.5]),
            Err(NetError::NotFedForward)
        ));
        assert_eq!(net.recent_average_error(), 0.0);
    }

    #[test]
    fn wrong_target_length_leaves_weights_untouched() {
        let mut net = tiny_net(Optimizer::Momentum);
        net.feed_forward(&[0.0, 1.0]).unwrap();
        let before = net.snapshot().unwrap();
        assert!(matches!(
            net.back_propagate(&[0.5, 0.5]),
            Err(NetError::ShapeMismatch { what: "target", .. })
        ));
        assert_eq!(net.snapshot().unwrap(), before);
    }

    #[test]
    fn repeated_forward_passes_are_deterministic() {
        let mut net = tiny_net(Optimizer::Momentum);
        net.feed_forward(&[0.25, 0.75]).unwrap();
        let first = net.results().unwrap();
        net.feed_forward(&[0.25, 0.75]).unwrap();
        assert_eq!(net.results().unwrap(), first);
    }

    #[test]
    fn single_neuron_forward_and_momentum_step_match_hand_values() {
        // 1-input, 1-output net with fixed weights: w = 0.5, bias = -0.25.
        let topology = Topology::new(vec![1, 1]).unwrap();
        let snapshot = NetworkSnapshot {
            topology,
            optimizer: Optimizer::Momentum,
            connections: vec![
                ConnectionState {
                    weight: 0.5,
                    ..ConnectionState::default()
                },
                ConnectionState {
                    weight: -0.25,
                    ..ConnectionState::default()
                },
            ],
        };
        let mut net = HostNetwork::from_snapshot(&snapshot).unwrap();
        net.set_activation(Activation::Sigmoid);

        net.feed_forward(&[1.0]).unwrap();
        let y = 1.0 / (1.0 + (-0.25f64).exp());
        let out = net.results().unwrap()[0];
        assert!((out - y).abs() < 1e-12);

        net.back_propagate(&[1.0]).unwrap();
        let grad = (1.0 - y) * y * (1.0 - y);
        let after = net.snapshot().unwrap();
        // w += eta * grad * input; bias input is 1.0
        assert!((after.connections[0].weight - (0.5 + 0.1 * grad * 1.0)).abs() < 1e-12);
        assert!((after.connections[1].weight - (-0.25 + 0.1 * grad)).abs() < 1e-12);
    }

    #[test]
    fn activation_rides_the_training_parameters() {
        let topology = Topology::new(vec![1, 1]).unwrap();
        let snapshot = NetworkSnapshot {
            topology,
            optimizer: Optimizer::Momentum,
            connections: vec![
                ConnectionState {
                    weight: 0.5,
                    ..ConnectionState::default()
                },
                ConnectionState {
                    weight: -0.25,
                    ..ConnectionState::default()
                },
            ],
        };
        let mut net = HostNetwork::from_snapshot(&snapshot).unwrap();

        net.set_training_parameters(TrainingParams {
            activation: Activation::Tanh,
            ..TrainingParams::default()
        });
        assert_eq!(net.training_parameters().activation, Activation::Tanh);
        net.feed_forward(&[1.0]).unwrap();
        assert!((net.results().unwrap()[0] - 0.25f64.tanh()).abs() < 1e-12);

        // the convenience setter writes through to the same parameter
        net.set_activation(Activation::Relu);
        assert_eq!(net.training_parameters().activation, Activation::Relu);
        net.feed_forward(&[1.0]).unwrap();
        assert!((net.results().unwrap()[0] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn snapshot_round_trips_through_from_snapshot() {
        let mut net = tiny_net(Optimizer::Adam);
        net.set_training_parameters(TrainingParams {
            optimizer: Optimizer::Adam,
            ..TrainingParams::default()
        });
        net.feed_forward(&[1.0, 0.0]).unwrap();
        net.back_propagate(&[1.0]).unwrap();

        let snap = net.snapshot().unwrap();
        let mut restored = HostNetwork::from_snapshot(&snap).unwrap();
        restored.feed_forward(&[1.0, 0.0]).unwrap();
        net.feed_forward(&[1.0, 0.0]).unwrap();
        assert_eq!(restored.results().unwrap(), net.results().unwrap());
    }

    #[test]
    fn training_error_decreases_on_a_fixed_sample() {
        let mut net = tiny_net(Optimizer::Momentum);
        net.feed_forward(&[1.0, 0.0]).unwrap();
        let initial = (1.0 - net.results().unwrap()[0]).abs();
        for _ in 0..200 {
            net.feed_forward(&[1.0, 0.0]).unwrap();
            net.back_propagate(&[1.0]).unwrap();
        }
        net.feed_forward(&[1.0, 0.0]).unwrap();
        let residual = (1.0 - net.results().unwrap()[0]).abs();
        assert!(residual < initial);
        assert!(residual < 0.2, "residual error {residual}");
    }
}
