use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::debug;

use crate::config::TrackerConfig;
use crate::model::{durable_id, Agent, Incident, IncidentPriority, ThreatAlert, Track};
use crate::payload::{self, AlertPayload, PositionUpdate};


/// Bounded ephemeral state: live agent positions, capped trajectory
/// history, TTL-bound threat alerts and the incident log.
///
/// Nothing here is replicated or persisted. Alert expiry is an explicit
/// min-heap of `(deadline, id)` drained by the owner's scheduler tick, so
/// tests control time fully; every method takes `now` for the same reason.
pub struct EphemeralTracker {
    cfg: TrackerConfig,
    pub(crate) agents: HashMap<String, Agent>,
    pub(crate) tracks: HashMap<String, Track>,
    pub(crate) alerts: HashMap<String, ThreatAlert>,
    /// Newest first, capped at `incident_capacity`.
    pub(crate) incidents: Vec<Incident>,
    expiry: BinaryHeap<Reverse<(DateTime<Utc>, String)>>,
}

impl EphemeralTracker {
    pub fn new(cfg: TrackerConfig) -> Self {
        Self {
            cfg,
            agents: HashMap::new(),
            tracks: HashMap::new(),
            alerts: HashMap::new(),
            incidents: Vec::new(),
            expiry: BinaryHeap::new(),
        }
    }

    /// Apply a raw position update. Invalid payloads are dropped silently
    /// (state unchanged); returns whether state changed.
    pub fn update_position(&mut self, raw: &Value, now: DateTime<Utc>) -> bool {
        let Some(update) = PositionUpdate::from_value(raw) else {
            debug!("position update dropped: missing identity or non-finite coordinates");
            return false;
        };
        self.apply_position(update, raw, now);
        true
    }

    /// Apply each update in order. The caller publishes a single snapshot
    /// for the whole batch.
    pub fn batch_update_positions(&mut self, raws: &[Value], now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for raw in raws {
            changed |= self.update_position(raw, now);
        }
        changed
    }

    fn apply_position(&mut self, update: PositionUpdate, raw: &Value, now: DateTime<Utc>) {
        let agent = self
            .agents
            .entry(update.agent_id.clone())
            .or_insert_with(|| Agent {
                id: update.agent_id.clone(),
                lat: None,
                lon: None,
                is_violation: false,
                status: None,
                last_seen: now,
                attrs: serde_json::Map::new(),
            });

        for (key, value) in update.attrs {
            agent.attrs.insert(key, value);
        }
        if let Some(status) = agent.attrs.get("status").and_then(Value::as_str) {
            agent.status = Some(status.to_string());
        }
        agent.is_violation = payload::violation_flag(raw, Some(agent.is_violation));
        agent.lat = Some(update.lat);
        agent.lon = Some(update.lon);
        agent.last_seen = now;

        let track = self
            .tracks
            .entry(update.agent_id.clone())
            .or_insert_with(|| Track {
                agent_id: update.agent_id.clone(),
                path: Vec::new(),
            });
        track.path.push([update.lon, update.lat]);
        if track.path.len() > self.cfg.track_capacity {
            let excess = track.path.len() - self.cfg.track_capacity;
            track.path.drain(..excess);
        }
    }

    /// Attribute-only merge (no track append): status, violation flag and
    /// arbitrary fields. Coordinates are updated only when present and
    /// finite.
    pub fn update_agent(&mut self, raw: &Value, now: DateTime<Utc>) -> bool {
        let Some(agent_id) = payload::agent_ref(raw) else {
            debug!("agent update dropped: missing identity");
            return false;
        };

        let agent = self.agents.entry(agent_id.clone()).or_insert_with(|| Agent {
            id: agent_id.clone(),
            lat: None,
            lon: None,
            is_violation: false,
            status: None,
            last_seen: now,
            attrs: serde_json::Map::new(),
        });

        agent.is_violation = payload::violation_flag(raw, Some(agent.is_violation));
        if let Some(fields) = raw.as_object() {
            for (key, value) in fields {
                agent.attrs.insert(key.clone(), value.clone());
            }
        }
        if let Some(update) = PositionUpdate::from_value(raw) {
            agent.lat = Some(update.lat);
            agent.lon = Some(update.lon);
        }
        if let Some(status) = raw.get("status").and_then(Value::as_str) {
            agent.status = Some(status.to_string());
        }
        agent.last_seen = now;
        true
    }

    /// Store a threat alert, schedule its removal one TTL from now, and
    /// mirror it into the incident log.
    ///
    /// Re-ingesting an identity does NOT cancel the earlier deadline: each
    /// ingestion pushes its own expiry entry and the earliest one fires.
    pub fn ingest_alert(&mut self, raw: &Value, now: DateTime<Utc>) -> bool {
        if !raw.is_object() {
            debug!("alert dropped: payload is not an object");
            return false;
        }
        let alert = AlertPayload::from_value(raw);

        self.alerts.insert(
            alert.id.clone(),
            ThreatAlert {
                id: alert.id.clone(),
                severity: alert.severity.clone(),
                created_at: now,
                payload: alert.fields.clone(),
            },
        );
        let deadline = now + Duration::seconds(self.cfg.alert_ttl_secs);
        self.expiry.push(Reverse((deadline, alert.id.clone())));

        let priority = if alert.severity == "CRITICAL" {
            IncidentPriority::Critical
        } else {
            IncidentPriority::High
        };
        self.push_incident(Incident {
            id: alert.id.clone(),
            priority,
            timestamp: now,
            description: alert.description(),
            extra: serde_json::Map::new(),
        });
        true
    }

    /// Idempotent; no-op when the alert is absent.
    pub fn remove_alert(&mut self, id: &str) -> bool {
        self.alerts.remove(id).is_some()
    }

    /// Pop every due expiry entry and remove the matching alerts. Entries
    /// whose alert was already removed are discarded quietly.
    pub fn drain_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        loop {
            match self.expiry.peek() {
                Some(Reverse((deadline, _))) if *deadline <= now => {}
                _ => break,
            }
            if let Some(Reverse((_, id))) = self.expiry.pop() {
                if self.alerts.remove(&id).is_some() {
                    debug!(alert = %id, "threat alert expired");
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Direct incident ingestion. Identity is minted when absent.
    pub fn upsert_incident(&mut self, raw: &Value, now: DateTime<Utc>) -> bool {
        let Some(fields) = raw.as_object() else {
            return false;
        };
        let id = payload::entity_ref(raw).unwrap_or_else(|| durable_id("incident"));
        let priority = match raw.get("priority").and_then(Value::as_str) {
            Some("CRITICAL") => IncidentPriority::Critical,
            _ => IncidentPriority::High,
        };
        let description = raw
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.push_incident(Incident {
            id,
            priority,
            timestamp: now,
            description,
            extra: fields.clone(),
        });
        true
    }

    pub fn remove_incident(&mut self, id: &str) -> bool {
        let before = self.incidents.len();
        self.incidents.retain(|incident| incident.id != id);
        self.incidents.len() != before
    }

    /// Deduplicate by id: merge into the existing record in place so the
    /// original log position is preserved; otherwise prepend and truncate.
    fn push_incident(&mut self, incident: Incident) {
        if let Some(existing) = self.incidents.iter_mut().find(|i| i.id == incident.id) {
            existing.priority = incident.priority;
            existing.timestamp = incident.timestamp;
            if !incident.description.is_empty() {
                existing.description = incident.description;
            }
            for (key, value) in incident.extra {
                existing.extra.insert(key, value);
            }
            return;
        }
        self.incidents.insert(0, incident);
        self.incidents.truncate(self.cfg.incident_capacity);
    }
}
