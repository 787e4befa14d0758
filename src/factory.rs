//! Backend probing and construction.
//!
//! Callers ask for "a network"; the factory prefers the accelerator when one
//! can actually be acquired and silently falls back to the host engine
//! otherwise (the fallback is logged, never an error). Every constructor
//! returns a boxed [`Network`], so downstream code never branches on which
//! backend it got.

use crate::error::NetError;
use crate::net::{Network, NetworkSnapshot, Topology};
use crate::optimizer::Optimizer;

use crate::host::HostNetwork;

/// Whether an accelerator can be acquired right now.
///
/// Probing actually requests an adapter and device, so a `true` here means
/// construction is expected to succeed, not merely that a driver exists.
pub fn device_available() -> bool {
    #[cfg(feature = "wgpu")]
    {
        crate::device::DeviceContext::available()
    }
    #[cfg(not(feature = "wgpu"))]
    {
        false
    }
}

/// Builds a freshly initialized network on the best available backend,
/// seeding the weights from OS entropy.
pub fn create_new(topology: Topology) -> Result<Box<dyn Network>, NetError> {
    create_new_seeded(topology, Optimizer::Momentum, None)
}

/// Like [`create_new`] with an explicit optimizer and weight seed.
pub fn create_new_seeded(
    topology: Topology,
    optimizer: Optimizer,
    seed: Option<u64>,
) -> Result<Box<dyn Network>, NetError> {
    let snapshot = NetworkSnapshot::random(topology, optimizer, seed);
    from_snapshot(&snapshot)
}

/// Loads persisted state and reconstructs it on the best available backend.
pub fn load_from_file(path: &str) -> Result<Box<dyn Network>, NetError> {
    let snapshot = crate::codec::read_file(path)?;
    from_snapshot(&snapshot)
}

/// Builds a network from existing state, device first, host on fallback.
pub fn from_snapshot(snapshot: &NetworkSnapshot) -> Result<Box<dyn Network>, NetError> {
    snapshot.check_counts()?;

    #[cfg(feature = "wgpu")]
    {
        match crate::device::net::DeviceNetwork::from_snapshot(snapshot) {
            Ok(net) => {
                log::info!("constructed device backend");
                return Ok(Box::new(net));
            }
            Err(e) => {
                log::warn!("device backend unavailable ({e}), falling back to host");
            }
        }
    }

    log::info!("constructed host backend");
    Ok(Box::new(HostNetwork::from_snapshot(snapshot)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_new_always_yields_a_working_network() {
        let topology = Topology::new(vec![2, 3, 1]).unwrap();
        let mut net = create_new(topology).unwrap();
        net.feed_forward(&[0.5, 0.5]).unwrap();
        assert_eq!(net.results().unwrap().len(), 1);
    }

    #[test]
    fn load_from_missing_file_is_an_io_error() {
        assert!(matches!(
            load_from_file("/nonexistent/net.nnw"),
            Err(NetError::Io(_))
        ));
    }

    #[test]
    fn undersized_snapshot_is_rejected_before_backend_choice() {
        let topology = Topology::new(vec![2, 2]).unwrap();
        let mut snapshot = NetworkSnapshot::random(topology, Optimizer::Momentum, Some(0));
        snapshot.connections.truncate(1);
        assert!(matches!(
            from_snapshot(&snapshot),
            Err(NetError::ConnectionCountMismatch { .. })
        ));
    }
}
