use serde::{Deserialize, Serialize};

/// Raw status values surfaced by the replication transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    Connected,
    Connecting,
    Disconnected,
}

/// Two-state connectivity exposed to subscribers. `connecting` counts as
/// disconnected: durable mutations keep queueing until the channel is up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Connected,
    Disconnected,
}

/// Edge produced by a status event, used to drive the offline queue flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    CameOnline,
    WentOffline,
}

/// Tracks transport connectivity, event-driven (never polled).
pub struct SessionMonitor {
    status: PeerStatus,
}

impl SessionMonitor {
    pub fn new() -> Self {
        Self {
            status: PeerStatus::Disconnected,
        }
    }

    pub fn status(&self) -> PeerStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == PeerStatus::Connected
    }

    /// Apply a transport status event; returns the edge, if any. The
    /// offline→online edge fires at most once per reconnect, so the
    /// queue flush it triggers runs exactly once.
    pub fn apply(&mut self, status: TransportStatus) -> Option<Transition> {
        let next = match status {
            TransportStatus::Connected => PeerStatus::Connected,
            TransportStatus::Connecting | TransportStatus::Disconnected => {
                PeerStatus::Disconnected
            }
        };
        let transition = match (self.status, next) {
            (PeerStatus::Disconnected, PeerStatus::Connected) => Some(Transition::CameOnline),
            (PeerStatus::Connected, PeerStatus::Disconnected) => Some(Transition::WentOffline),
            _ => None,
        };
        self.status = next;
        transition
    }
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}
