use std::sync::Mutex;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::model::{ManualMarker, TacticalZone};
use crate::replica::SeqOp;

/// Replicated operation tagged with its target sequence; this is the wire
/// unit exchanged between peers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum ReplicaOp {
    Zone(SeqOp<TacticalZone>),
    Marker(SeqOp<ManualMarker>),
}

/// Opaque peer-to-peer channel identified by a shared room name.
/// Wire-level discovery and signaling live behind this trait; the core
/// only publishes operations and receives status events.
pub trait ReplicationTransport: Send + Sync {
    fn publish(&self, op: &ReplicaOp) -> Result<()>;
}

/// Standalone operation: ops stay local.
pub struct NullTransport;

impl ReplicationTransport for NullTransport {
    fn publish(&self, _op: &ReplicaOp) -> Result<()> {
        Ok(())
    }
}

/// Captures published ops, for tests and loopback bridging between
/// in-process replicas.
#[derive(Default)]
pub struct RecordingTransport {
    ops: Mutex<Vec<ReplicaOp>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything published so far.
    pub fn take(&self) -> Vec<ReplicaOp> {
        match self.ops.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn published(&self) -> usize {
        match self.ops.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl ReplicationTransport for RecordingTransport {
    fn publish(&self, op: &ReplicaOp) -> Result<()> {
        let mut guard = self
            .ops
            .lock()
            .map_err(|_| anyhow::anyhow!("transport buffer poisoned"))?;
        guard.push(op.clone());
        Ok(())
    }
}
