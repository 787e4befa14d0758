//! Integration tests over the public contract: training convergence,
//! persistence round-trips and backend parity. Device cases gate themselves
//! on adapter availability so the suite passes on GPU-less machines.

use ffnet::codec;
use ffnet::host::HostNetwork;
use ffnet::net::{Network, NetworkSnapshot, Topology};
use ffnet::optimizer::{Optimizer, TrainingParams};
use ffnet::trainer::{train, Outcome, TrainOptions, TrainingSample};

fn gate_samples(truth_table: [f64; 4]) -> Vec<TrainingSample> {
    vec![
        TrainingSample::new(vec![0.0, 0.0], vec![truth_table[0]]),
        TrainingSample::new(vec![0.0, 1.0], vec![truth_table[1]]),
        TrainingSample::new(vec![1.0, 0.0], vec![truth_table[2]]),
        TrainingSample::new(vec![1.0, 1.0], vec![truth_table[3]]),
    ]
}

fn temp_path(name: &str) -> String {
    std::env::temp_dir()
        .join(format!("ffnet_{}_{name}", std::process::id()))
        .to_string_lossy()
        .into_owned()
}

/// An unlucky initialization can park gradient descent in a local minimum,
/// so convergence gets a few fixed seeds before the test gives up.
fn converges(samples: &[TrainingSample]) -> Option<HostNetwork> {
    for seed in [42, 7, 1337] {
        let topology = Topology::new(vec![2, 3, 1]).unwrap();
        let mut net = HostNetwork::new(topology, Optimizer::Momentum, Some(seed)).unwrap();
        let outcome = train(&mut net, samples, &TrainOptions::default()).unwrap();
        if matches!(outcome, Outcome::Converged { .. }) {
            return Some(net);
        }
    }
    None
}

#[test]
fn xor_converges_on_host() {
    let samples = gate_samples([0.0, 1.0, 1.0, 0.0]);
    let mut net = converges(&samples).expect("xor did not converge under any seed");

    for sample in &samples {
        net.feed_forward(&sample.inputs).unwrap();
        let out = net.results().unwrap()[0];
        assert!(
            (out - sample.targets[0]).abs() <= 0.1,
            "{:?} -> {out}",
            sample.inputs
        );
    }
}

#[test]
fn and_converges_on_host() {
    let samples = gate_samples([0.0, 0.0, 0.0, 1.0]);
    assert!(converges(&samples).is_some(), "and did not converge");
}

#[test]
fn trained_network_survives_save_and_load() {
    let topology = Topology::new(vec![2, 3, 1]).unwrap();
    let mut net = HostNetwork::new(topology, Optimizer::Momentum, Some(11)).unwrap();
    let samples = gate_samples([0.0, 1.0, 1.0, 1.0]);
    train(&mut net, &samples, &TrainOptions::default()).unwrap();

    let path = temp_path("or.nnw");
    net.save(&path).unwrap();
    let mut restored = HostNetwork::from_snapshot(&codec::read_file(&path).unwrap()).unwrap();
    std::fs::remove_file(&path).unwrap();

    // host state is f64 end to end, so the reload is bit-exact
    for sample in &samples {
        net.feed_forward(&sample.inputs).unwrap();
        restored.feed_forward(&sample.inputs).unwrap();
        assert_eq!(net.results().unwrap(), restored.results().unwrap());
    }
}

#[test]
fn adam_state_survives_save_and_load() {
    let topology = Topology::new(vec![2, 2, 1]).unwrap();
    let mut net = HostNetwork::new(topology, Optimizer::Adam, Some(3)).unwrap();
    net.set_training_parameters(TrainingParams {
        optimizer: Optimizer::Adam,
        learning_rate: 0.01,
        ..TrainingParams::default()
    });
    net.feed_forward(&[1.0, 0.0]).unwrap();
    net.back_propagate(&[1.0]).unwrap();

    let path = temp_path("adam.nnw");
    net.save(&path).unwrap();
    let loaded = codec::read_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let original = net.snapshot().unwrap();
    assert_eq!(loaded.optimizer, Optimizer::Adam);
    for (a, b) in loaded.connections.iter().zip(&original.connections) {
        assert_eq!(a.weight, b.weight);
        assert_eq!(a.m, b.m);
        assert_eq!(a.v, b.v);
        // momentum delta is not part of the adam layout
        assert_eq!(a.delta, 0.0);
    }
}

#[test]
fn factory_load_rejects_garbage() {
    let path = temp_path("garbage.nnw");
    std::fs::write(&path, b"definitely not a network").unwrap();
    assert!(ffnet::factory::load_from_file(&path).is_err());
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn factory_network_trains_through_the_trait_object() {
    let topology = Topology::new(vec![2, 2, 1]).unwrap();
    let mut net =
        ffnet::factory::create_new_seeded(topology, Optimizer::Momentum, Some(5)).unwrap();
    let samples = gate_samples([0.0, 0.0, 0.0, 1.0]);
    let options = TrainOptions {
        max_passes: 20_000,
        ..TrainOptions::default()
    };
    // outcome depends on the backend's precision; the contract is that
    // training runs without error and error tracking moves
    train(net.as_mut(), &samples, &options).unwrap();
    assert!(net.recent_average_error() > 0.0);
}

#[cfg(feature = "wgpu")]
mod device {
    use super::*;
    use ffnet::device::net::DeviceNetwork;

    fn snapshot_pair(optimizer: Optimizer) -> Option<(HostNetwork, DeviceNetwork)> {
        if !ffnet::factory::device_available() {
            return None;
        }
        let topology = Topology::new(vec![2, 3, 1]).unwrap();
        let snapshot = NetworkSnapshot::random(topology, optimizer, Some(21));
        let host = HostNetwork::from_snapshot(&snapshot).unwrap();
        let device = DeviceNetwork::from_snapshot(&snapshot).unwrap();
        Some((host, device))
    }

    #[test]
    fn forward_pass_matches_host_within_f32_tolerance() {
        let Some((mut host, mut device)) = snapshot_pair(Optimizer::Momentum) else {
            return;
        };
        host.feed_forward(&[1.0, 0.0]).unwrap();
        device.feed_forward(&[1.0, 0.0]).unwrap();
        let h = host.results().unwrap();
        let d = device.results().unwrap();
        assert_eq!(h.len(), d.len());
        for (a, b) in h.iter().zip(&d) {
            assert!((a - b).abs() < 1e-3, "host {a} vs device {b}");
        }
    }

    #[test]
    fn one_training_step_matches_host_within_f32_tolerance() {
        let Some((mut host, mut device)) = snapshot_pair(Optimizer::Momentum) else {
            return;
        };
        for net in [&mut host as &mut dyn Network, &mut device as &mut dyn Network] {
            net.feed_forward(&[0.0, 1.0]).unwrap();
            net.back_propagate(&[1.0]).unwrap();
        }
        let h = host.snapshot().unwrap();
        let d = device.snapshot().unwrap();
        for (a, b) in h.connections.iter().zip(&d.connections) {
            assert!(
                (a.weight - b.weight).abs() < 1e-3,
                "host {} vs device {}",
                a.weight,
                b.weight
            );
            assert!((a.delta - b.delta).abs() < 1e-3);
        }
    }

    #[test]
    fn adam_training_step_matches_host_within_f32_tolerance() {
        let Some((mut host, mut device)) = snapshot_pair(Optimizer::Adam) else {
            return;
        };
        for net in [&mut host as &mut dyn Network, &mut device as &mut dyn Network] {
            net.feed_forward(&[0.0, 1.0]).unwrap();
            net.back_propagate(&[1.0]).unwrap();
        }
        let h = host.snapshot().unwrap();
        let d = device.snapshot().unwrap();
        for (a, b) in h.connections.iter().zip(&d.connections) {
            assert!(
                (a.weight - b.weight).abs() < 1e-3,
                "host {} vs device {}",
                a.weight,
                b.weight
            );
            assert!((a.m - b.m).abs() < 1e-3);
            assert!((a.v - b.v).abs() < 1e-3);
        }
    }

    #[test]
    fn adam_device_state_round_trips_through_the_codec() {
        let Some((_, mut device)) = snapshot_pair(Optimizer::Adam) else {
            return;
        };
        device.feed_forward(&[1.0, 1.0]).unwrap();
        device.back_propagate(&[0.0]).unwrap();

        let path = temp_path("device_adam.nnw");
        device.save(&path).unwrap();
        let restored = codec::read_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let snapshot = device.snapshot().unwrap();
        assert_eq!(restored.optimizer, Optimizer::Adam);
        for (a, b) in restored.connections.iter().zip(&snapshot.connections) {
            assert_eq!(a.weight, b.weight);
            assert_eq!(a.m, b.m);
            assert_eq!(a.v, b.v);
        }
    }

    #[test]
    fn device_state_round_trips_through_the_codec() {
        let Some((_, mut device)) = snapshot_pair(Optimizer::Momentum) else {
            return;
        };
        device.feed_forward(&[1.0, 1.0]).unwrap();
        device.back_propagate(&[0.0]).unwrap();

        let path = temp_path("device.nnw");
        device.save(&path).unwrap();
        let restored = codec::read_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let snapshot = device.snapshot().unwrap();
        assert_eq!(restored.topology, snapshot.topology);
        for (a, b) in restored.connections.iter().zip(&snapshot.connections) {
            assert_eq!(a.weight, b.weight);
            assert_eq!(a.delta, b.delta);
        }
    }
}
