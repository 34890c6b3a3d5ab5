//! Normalization boundary for loosely-shaped external payloads.
//!
//! Tracking feeds, alert feeds and UI callers all speak slightly different
//! dialects (`agent_id` vs `id` vs `user_id`, `lat` vs `latitude`, ...).
//! Every fallback chain lives here, once; the rest of the crate only sees
//! typed records.

use serde_json::{Map, Value};

use crate::model::{durable_id, ManualMarker, PendingMarker, TacticalZone};

/// Extract an identity from the first present key.
/// Accepts strings and numbers; numbers are stringified.
fn ident_from(raw: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match raw.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Extract a finite coordinate from the first *present* key.
/// A present-but-malformed value does not fall through to later aliases.
fn coord_from(raw: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        let Some(value) = raw.get(*key) else { continue };
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        };
        return parsed.filter(|f| f.is_finite());
    }
    None
}

/// Validated position update.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionUpdate {
    pub agent_id: String,
    pub lat: f64,
    pub lon: f64,
    /// Full original object, merged into the agent's attribute overlay.
    pub attrs: Map<String, Value>,
}

impl PositionUpdate {
    /// Returns `None` when identity is absent or a coordinate is not a
    /// finite number; callers drop such updates silently.
    pub fn from_value(raw: &Value) -> Option<Self> {
        let agent_id = ident_from(raw, &["agent_id", "id", "user_id"])?;
        let lat = coord_from(raw, &["lat", "latitude"])?;
        let lon = coord_from(raw, &["lon", "longitude"])?;
        let attrs = raw.as_object().cloned().unwrap_or_default();
        Some(Self {
            agent_id,
            lat,
            lon,
            attrs,
        })
    }
}

/// Agent identity aliases without the coordinate requirement
/// (attribute-only updates).
pub fn agent_ref(raw: &Value) -> Option<String> {
    ident_from(raw, &["agent_id", "id", "user_id"])
}

/// Generic entity identity aliases (incidents, pending markers).
pub fn entity_ref(raw: &Value) -> Option<String> {
    ident_from(raw, &["id", "incident_id", "pending", "pending_id"])
}

/// First boolean among the known zone-violation aliases, else the caller's
/// fallback, else `false`.
pub fn violation_flag(raw: &Value, fallback: Option<bool>) -> bool {
    for key in [
        "isViolation",
        "violation",
        "in_violation",
        "zone_violation",
        "inside_polygon",
    ] {
        if let Some(Value::Bool(b)) = raw.get(key) {
            return *b;
        }
    }
    fallback.unwrap_or(false)
}

/// Normalized threat alert payload.
#[derive(Clone, Debug)]
pub struct AlertPayload {
    pub id: String,
    pub severity: String,
    pub secret_type: String,
    pub object_ref: String,
    pub snippet: String,
    pub fields: Map<String, Value>,
}

impl AlertPayload {
    pub fn from_value(raw: &Value) -> Self {
        let id = ident_from(raw, &["id"]).unwrap_or_else(|| durable_id("threat"));
        let severity = raw
            .get("severity")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();
        let secret_type = raw
            .get("secret_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_uppercase();
        let object_ref = match raw.get("object_id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "N/A".to_string(),
        };
        let snippet = raw
            .get("snippet")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let fields = raw.as_object().cloned().unwrap_or_default();
        Self {
            id,
            severity,
            secret_type,
            object_ref,
            snippet,
            fields,
        }
    }

    /// Human-readable line mirrored into the incident log.
    pub fn description(&self) -> String {
        format!(
            "[DARKNET_DUMP] Leak: {} | Target: OBJ_{} | Dump: {}",
            self.secret_type, self.object_ref, self.snippet
        )
    }
}

/// Build a zone from a free-form payload, minting an id when absent.
pub fn zone_from_value(raw: Value) -> TacticalZone {
    let id = entity_ref(&raw).unwrap_or_else(|| durable_id("zone"));
    let mut properties = raw.as_object().cloned().unwrap_or_default();
    properties.remove("id");
    TacticalZone { id, properties }
}

/// Build a marker from a free-form payload, minting an id when absent.
/// Missing or malformed coordinates default to the origin; the UI always
/// supplies them in practice.
pub fn marker_from_value(raw: Value) -> ManualMarker {
    let id = entity_ref(&raw).unwrap_or_else(|| durable_id("marker"));
    let lat = coord_from(&raw, &["lat", "latitude"]).unwrap_or(0.0);
    let lon = coord_from(&raw, &["lon", "longitude"]).unwrap_or(0.0);
    let mut properties = raw.as_object().cloned().unwrap_or_default();
    properties.remove("id");
    ManualMarker {
        id,
        lat,
        lon,
        properties,
    }
}

/// Build a pending marker from a discovery payload.
pub fn pending_marker_from_value(raw: Value) -> PendingMarker {
    let id = entity_ref(&raw).unwrap_or_else(|| durable_id("pending"));
    let mut properties = raw.as_object().cloned().unwrap_or_default();
    properties.remove("id");
    PendingMarker { id, properties }
}
