use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Durable entities expose a stable identity used for entity-granularity
/// conflict resolution in the replication layer.
pub trait DurableEntity {
    fn entity_id(&self) -> &str;
}

/// Mint a client-side identity for a new durable entity.
///
/// UUIDv7 is time-ordered like the bare-timestamp ids it replaces, but
/// carries enough randomness that two peers minting at the same millisecond
/// cannot collide.
pub fn durable_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::now_v7())
}

/// Live agent record. Local-only, overwritten on every update, never
/// replicated or persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub is_violation: bool,
    #[serde(default)]
    pub status: Option<String>,
    pub last_seen: DateTime<Utc>,
    /// Attribute overlay from ingested payloads; newer fields win.
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

/// Per-agent trajectory, ring-buffer capped (oldest point evicted first).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Track {
    pub agent_id: String,
    /// `[lon, lat]` pairs, newest last.
    pub path: Vec<[f64; 2]>,
}

/// Transient threat alert. Auto-removed a fixed TTL after creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreatAlert {
    pub id: String,
    pub severity: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentPriority {
    Critical,
    High,
}

/// Entry in the bounded incident log, deduplicated by id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub priority: IncidentPriority,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// Durable shared zone: identity plus free-form geometry/metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TacticalZone {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl DurableEntity for TacticalZone {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// Durable manually-placed marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManualMarker {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl DurableEntity for ManualMarker {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// Candidate marker produced by the external discovery workflow.
/// Local list, upserted by identity with last-write-wins field merge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingMarker {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Credentials forwarded to the persistence collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerminalAuth {
    pub ftp_user: String,
    pub ftp_password: String,
}

/// Unsaved marker being edited; retained locally until the persistence
/// collaborator confirms it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerDraft {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub ip: String,
    pub auth: TerminalAuth,
    #[serde(default)]
    pub channels: Vec<String>,
}
