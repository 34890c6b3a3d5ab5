use std::collections::VecDeque;

use serde_json::{Map, Value};

use crate::model::{ManualMarker, TacticalZone};

/// Durable mutation intent captured while disconnected.
///
/// Intents rather than closures: replay stays inspectable, loggable and
/// serializable, and a failed intent cannot poison the ones behind it.
#[derive(Clone, Debug)]
pub enum PendingOp {
    AddZone(TacticalZone),
    RemoveZone(String),
    AddMarker(ManualMarker),
    UpdateMarker { id: String, fields: Map<String, Value> },
    DeleteMarker(String),
}

/// FIFO queue of durable mutations awaiting reconnect.
#[derive(Default)]
pub struct OfflineQueue {
    pending: VecDeque<PendingOp>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, op: PendingOp) {
        self.pending.push_back(op);
    }

    /// Remove and return the next intent. The caller executes it *after*
    /// removal, so a failure partway through a flush never re-runs
    /// already-applied intents.
    pub fn next(&mut self) -> Option<PendingOp> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
