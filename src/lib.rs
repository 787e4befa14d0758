//! ffnet: a small feed-forward neural network engine with two interchangeable
//! compute backends.
//!
//! The same contract — build from a topology, feed forward, backpropagate,
//! read results, save/load — is implemented twice: once as a sequential
//! in-process engine ([`host`]) and once as a data-parallel WGPU engine
//! ([`device`], behind the `wgpu` feature). The [`factory`] probes for an
//! accelerator and hands back whichever backend it could construct, and the
//! [`codec`] round-trips the full numeric state of either through one binary
//! format, so a network trained on one backend can be reloaded on the other.
//!
//! # Modules
//!
//! - [`activation`] — activation kinds and their derivatives.
//! - [`optimizer`] — momentum and Adam weight-update rules, hyperparameters.
//! - [`net`] — the shared [`net::Network`] contract, topology and snapshot types.
//! - [`host`] — the sequential engine.
//! - [`device`] — the WGPU engine (feature `wgpu`).
//! - [`codec`] — `.nnw` binary persistence.
//! - [`factory`] — backend probing and construction.
//! - [`trainer`] — convergence training loop over a fixed sample set.
//!
//! # Example
//!
//! ```no_run
//! use ffnet::net::{Network, Topology};
//!
//! fn main() -> Result<(), ffnet::error::NetError> {
//!     let topology = Topology::new(vec![2, 3, 1])?;
//!     let mut net = ffnet::factory::create_new(topology)?;
//!     net.feed_forward(&[0.0, 1.0])?;
//!     println!("{:?}", net.results()?);
//!     Ok(())
//! }
//! ```

pub mod activation;
pub mod codec;
#[cfg(feature = "wgpu")]
pub mod device;
pub mod error;
pub mod factory;
pub mod host;
pub mod net;
pub mod optimizer;
pub mod trainer;
