//! `.nnw` binary persistence for [`NetworkSnapshot`]s.
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! [magic: b"nnw1"][optimizer: u8][len: u64][widths: u64 * len][records...]
//! ```
//!
//! Each record covers one connection in the snapshot's traversal order:
//! `weight, delta` under momentum, `weight, m, v` under Adam, all `f64`.
//! State fields the file's optimizer does not carry are zero-filled on load.
//! A decoded payload only becomes a snapshot after passing `briny`
//! validation; short reads, trailing bytes and degenerate topologies are all
//! rejected before any network is built.

use std::fs;

use briny::prelude::*;

use crate::error::NetError;
use crate::net::{ConnectionState, NetworkSnapshot, Topology};
use crate::optimizer::Optimizer;

const MAGIC: &[u8; 4] = b"nnw1";

/// Upper bound on topology length; anything past this is a corrupt header,
/// not a real network.
const MAX_LAYERS: u64 = 1024;

/// Upper bound on a single layer width, for the same reason.
const MAX_WIDTH: u64 = 1 << 24;

/// Scalars per record for the given optimizer.
fn record_width(optimizer: Optimizer) -> usize {
    match optimizer {
        Optimizer::Momentum => 2,
        Optimizer::Adam => 3,
    }
}

/// Decoded-but-untrusted payload; only [`Validate`] turns it into state.
struct PackedSnapshot {
    widths: Vec<usize>,
    optimizer: Optimizer,
    /// Flat record scalars, `record_width` per connection.
    values: Vec<f64>,
}

impl Validate for PackedSnapshot {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.widths.len() < 2 || self.widths.iter().any(|&w| w == 0) {
            return Err(ValidationError);
        }
        // widths are attacker-controlled here, keep the arithmetic checked
        let connections =
            crate::net::checked_connection_count(&self.widths).ok_or(ValidationError)?;
        let expected = connections
            .checked_mul(record_width(self.optimizer))
            .ok_or(ValidationError)?;
        if self.values.len() != expected {
            return Err(ValidationError);
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// Serializes a snapshot to the `.nnw` byte layout.
pub fn encode(snapshot: &NetworkSnapshot) -> Result<Vec<u8>, NetError> {
    snapshot.check_counts()?;
    let widths = snapshot.topology.widths();
    let width = record_width(snapshot.optimizer);

    let mut out = Vec::with_capacity(
        MAGIC.len() + 1 + 8 + widths.len() * 8 + snapshot.connections.len() * width * 8,
    );
    out.extend_from_slice(MAGIC);
    out.push(snapshot.optimizer as u8);
    out.extend_from_slice(&(widths.len() as u64).to_le_bytes());
    for &w in widths {
        out.extend_from_slice(&(w as u64).to_le_bytes());
    }
    for conn in &snapshot.connections {
        out.extend_from_slice(&conn.weight.to_le_bytes());
        match snapshot.optimizer {
            Optimizer::Momentum => {
                out.extend_from_slice(&conn.delta.to_le_bytes());
            }
            Optimizer::Adam => {
                out.extend_from_slice(&conn.m.to_le_bytes());
                out.extend_from_slice(&conn.v.to_le_bytes());
            }
        }
    }
    Ok(out)
}

fn take<'a>(bytes: &'a [u8], at: &mut usize, n: usize) -> Result<&'a [u8], NetError> {
    let end = at
        .checked_add(n)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| NetError::Persistence("truncated payload".into()))?;
    let slice = &bytes[*at..end];
    *at = end;
    Ok(slice)
}

fn read_u64(bytes: &[u8], at: &mut usize) -> Result<u64, NetError> {
    let raw = take(bytes, at, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Ok(u64::from_le_bytes(buf))
}

fn read_f64(bytes: &[u8], at: &mut usize) -> Result<f64, NetError> {
    let raw = take(bytes, at, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Ok(f64::from_le_bytes(buf))
}

/// Deserializes a `.nnw` payload into a validated snapshot.
pub fn decode(bytes: &[u8]) -> Result<NetworkSnapshot, NetError> {
    let mut at = 0usize;

    if take(bytes, &mut at, MAGIC.len())? != MAGIC {
        return Err(NetError::Persistence("bad magic header".into()));
    }
    let tag = take(bytes, &mut at, 1)?[0];
    let optimizer = Optimizer::try_from(tag)
        .map_err(|t| NetError::Persistence(format!("unknown optimizer tag {t}")))?;

    let len = read_u64(bytes, &mut at)?;
    if len > MAX_LAYERS {
        return Err(NetError::Persistence(format!(
            "topology length {len} exceeds limit {MAX_LAYERS}"
        )));
    }
    let mut widths = Vec::with_capacity(len as usize);
    for _ in 0..len {
        let w = read_u64(bytes, &mut at)?;
        if w > MAX_WIDTH {
            return Err(NetError::Persistence(format!(
                "layer width {w} exceeds limit {MAX_WIDTH}"
            )));
        }
        widths.push(w as usize);
    }

    let width = record_width(optimizer);
    let mut values = Vec::new();
    while at < bytes.len() {
        for _ in 0..width {
            values.push(read_f64(bytes, &mut at)?);
        }
    }

    let packed = PackedSnapshot {
        widths,
        optimizer,
        values,
    };
    let packed = TrustedData::new(packed)?.into_inner();

    let topology =
        Topology::new(packed.widths).map_err(|e| NetError::Persistence(e.to_string()))?;
    let connections = packed
        .values
        .chunks_exact(width)
        .map(|record| match optimizer {
            Optimizer::Momentum => ConnectionState {
                weight: record[0],
                delta: record[1],
                ..ConnectionState::default()
            },
            Optimizer::Adam => ConnectionState {
                weight: record[0],
                m: record[1],
                v: record[2],
                ..ConnectionState::default()
            },
        })
        .collect();

    Ok(NetworkSnapshot {
        topology,
        optimizer,
        connections,
    })
}

/// Writes a snapshot to disk.
pub fn write_file(path: &str, snapshot: &NetworkSnapshot) -> Result<(), NetError> {
    let bytes = encode(snapshot)?;
    fs::write(path, bytes)?;
    log::debug!("saved network state to {path}");
    Ok(())
}

/// Reads and validates a snapshot from disk.
pub fn read_file(path: &str) -> Result<NetworkSnapshot, NetError> {
    let bytes = fs::read(path)?;
    let snapshot = decode(&bytes)?;
    log::debug!(
        "loaded network state from {path} ({} layers, {} connections)",
        snapshot.topology.num_layers(),
        snapshot.connections.len()
    );
    Ok(snapshot)
}
