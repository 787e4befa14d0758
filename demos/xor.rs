//! Trains an XOR gate through the factory, saves it and replays it.
//!
//! Run with `cargo run --example xor`. `RUST_LOG=info` shows which backend
//! the factory picked.

use ffnet::error::NetError;
use ffnet::net::{Network, Topology};
use ffnet::trainer::{train, Outcome, TrainOptions, TrainingSample};

const MODEL_PATH: &str = "XOR_Gate.nnw";

fn main() -> Result<(), NetError> {
    env_logger::init();

    let samples = vec![
        TrainingSample::new(vec![0.0, 0.0], vec![0.0]),
        TrainingSample::new(vec![0.0, 1.0], vec![1.0]),
        TrainingSample::new(vec![1.0, 0.0], vec![1.0]),
        TrainingSample::new(vec![1.0, 1.0], vec![0.0]),
    ];

    let topology = Topology::new(vec![2, 3, 1])?;
    let mut net = ffnet::factory::create_new(topology)?;

    match train(net.as_mut(), &samples, &TrainOptions::default())? {
        Outcome::Converged { passes } => println!("XOR converged after {passes} passes"),
        Outcome::DidNotConverge => {
            println!("XOR did not converge, saving anyway");
        }
    }

    net.save(MODEL_PATH)?;
    println!("saved {MODEL_PATH}");

    let mut restored = ffnet::factory::load_from_file(MODEL_PATH)?;
    for sample in &samples {
        restored.feed_forward(&sample.inputs)?;
        let out = restored.results()?[0];
        println!(
            "{:?} -> {out:.4} (target {:.1})",
            sample.inputs, sample.targets[0]
        );
    }
    Ok(())
}
