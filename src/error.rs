//! Error taxonomy shared by both engines, the codec and the factory.
//!
//! Three families: contract violations (caller handed the engine something
//! with the wrong shape, or called operations out of order), resource
//! failures (the accelerator broke underneath a live network) and
//! persistence failures (a `.nnw` file that cannot be trusted).

use std::fmt;

use briny::prelude::ValidationError;

#[cfg(feature = "wgpu")]
use crate::device::DeviceError;

/// Every way a network operation can fail.
#[derive(Debug)]
pub enum NetError {
    /// An input or target slice whose length does not match the topology.
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    /// A topology with fewer than two layers or a zero-width layer.
    InvalidTopology { widths: Vec<usize> },
    /// `back_propagate` was called before any successful `feed_forward`.
    NotFedForward,
    /// A snapshot whose connection list disagrees with its topology.
    ConnectionCountMismatch { expected: usize, got: usize },
    /// A malformed or truncated persistence payload.
    Persistence(String),
    /// File I/O underneath save/load.
    Io(std::io::Error),
    /// The accelerator failed after construction; the instance is dead.
    #[cfg(feature = "wgpu")]
    Device(DeviceError),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::ShapeMismatch {
                what,
                expected,
                got,
            } => write!(f, "{what} length mismatch: expected {expected}, got {got}"),
            NetError::InvalidTopology { widths } => {
                write!(f, "invalid topology {widths:?}: need >= 2 layers, all widths > 0")
            }
            NetError::NotFedForward => {
                write!(f, "back_propagate called before any feed_forward")
            }
            NetError::ConnectionCountMismatch { expected, got } => {
                write!(f, "connection count mismatch: topology implies {expected}, got {got}")
            }
            NetError::Persistence(msg) => write!(f, "persistence error: {msg}"),
            NetError::Io(e) => write!(f, "i/o error: {e}"),
            #[cfg(feature = "wgpu")]
            NetError::Device(e) => write!(f, "device error: {e}"),
        }
    }
}

impl std::error::Error for NetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetError::Io(e) => Some(e),
            #[cfg(feature = "wgpu")]
            NetError::Device(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(e: std::io::Error) -> Self {
        NetError::Io(e)
    }
}

impl From<ValidationError> for NetError {
    fn from(_: ValidationError) -> Self {
        NetError::Persistence("payload failed validation".into())
    }
}

#[cfg(feature = "wgpu")]
impl From<DeviceError> for NetError {
    fn from(e: DeviceError) -> Self {
        NetError::Device(e)
    }
}
