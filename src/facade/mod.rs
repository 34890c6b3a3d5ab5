use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::{ClientError, ObjectsClient, SavedObject};
use crate::cluster::{self, Bounds, ClusterFeature, ClusterPoint};
use crate::config::{ClusterConfig, TacsyncConfig};
use crate::model::{
    Agent, Incident, ManualMarker, MarkerDraft, PendingMarker, TacticalZone, ThreatAlert, Track,
};
use crate::offline::{OfflineQueue, PendingOp};
use crate::payload;
use crate::replica::ReplicatedSequence;
use crate::session::{PeerStatus, SessionMonitor, Transition, TransportStatus};
use crate::tracker::EphemeralTracker;
use crate::transport::{ReplicaOp, ReplicationTransport};

#[cfg(test)]
mod tests;

/// Immutable combined-state snapshot published to subscribers.
/// Versions increase strictly; a batched update yields exactly one.
#[derive(Clone, Debug, Serialize)]
pub struct TacticalSnapshot {
    pub version: u64,
    pub peer_status: PeerStatus,
    pub agents: BTreeMap<String, Agent>,
    pub tracks: BTreeMap<String, Track>,
    pub threat_alerts: BTreeMap<String, ThreatAlert>,
    pub incidents: Vec<Incident>,
    pub tactical_zones: Vec<TacticalZone>,
    pub manual_markers: Vec<ManualMarker>,
    pub pending_markers: Vec<PendingMarker>,
    pub draft_marker: Option<MarkerDraft>,
}

struct Core {
    tracker: EphemeralTracker,
    zones: ReplicatedSequence<TacticalZone>,
    markers: ReplicatedSequence<ManualMarker>,
    pending_markers: Vec<PendingMarker>,
    draft: Option<MarkerDraft>,
    queue: OfflineQueue,
    session: SessionMonitor,
    version: u64,
}

/// Single coordination point for the shared operational picture.
///
/// Explicitly constructed and dependency-injected: config and transport
/// arrive at construction, there are no globals. All state lives behind
/// one lock, so every accepted mutation is atomic with respect to the
/// snapshot it publishes; async timer and network callbacks re-enter
/// through the same lock and can never interleave with a mutation.
pub struct TacticalState {
    inner: Mutex<Core>,
    snapshot_tx: broadcast::Sender<Arc<TacticalSnapshot>>,
    transport: Arc<dyn ReplicationTransport>,
    cluster_cfg: ClusterConfig,
}

impl TacticalState {
    pub fn new(cfg: &TacsyncConfig, transport: Arc<dyn ReplicationTransport>) -> Arc<Self> {
        let (snapshot_tx, _) = broadcast::channel(256);
        let (peer, _) = Uuid::new_v4().as_u64_pair();
        info!(room = %cfg.replication.room, peer = peer, "tactical state initialized");
        Arc::new(Self {
            inner: Mutex::new(Core {
                tracker: EphemeralTracker::new(cfg.tracker.clone()),
                zones: ReplicatedSequence::new(peer),
                markers: ReplicatedSequence::new(peer),
                pending_markers: Vec::new(),
                draft: None,
                queue: OfflineQueue::new(),
                session: SessionMonitor::new(),
                version: 0,
            }),
            snapshot_tx,
            transport,
            cluster_cfg: cfg.cluster.clone(),
        })
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, core: &mut Core) {
        core.version += 1;
        let snapshot = Arc::new(Self::render(core));
        // No subscribers is fine.
        let _ = self.snapshot_tx.send(snapshot);
    }

    fn render(core: &Core) -> TacticalSnapshot {
        TacticalSnapshot {
            version: core.version,
            peer_status: core.session.status(),
            agents: core
                .tracker
                .agents
                .iter()
                .map(|(id, agent)| (id.clone(), agent.clone()))
                .collect(),
            tracks: core
                .tracker
                .tracks
                .iter()
                .map(|(id, track)| (id.clone(), track.clone()))
                .collect(),
            threat_alerts: core
                .tracker
                .alerts
                .iter()
                .map(|(id, alert)| (id.clone(), alert.clone()))
                .collect(),
            incidents: core.tracker.incidents.clone(),
            tactical_zones: core.zones.to_vec(),
            manual_markers: core.markers.to_vec(),
            pending_markers: core.pending_markers.clone(),
            draft_marker: core.draft.clone(),
        }
    }

    /// Current state without subscribing.
    pub fn snapshot(&self) -> Arc<TacticalSnapshot> {
        let core = self.core();
        Arc::new(Self::render(&core))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TacticalSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    // ── ephemeral state ────────────────────────────────────────────────

    pub fn update_position(&self, raw: &Value) {
        let mut core = self.core();
        if core.tracker.update_position(raw, Utc::now()) {
            self.publish(&mut core);
        }
    }

    /// Applies every update, then publishes one snapshot for the batch.
    pub fn batch_update_positions(&self, raws: &[Value]) {
        let mut core = self.core();
        if core.tracker.batch_update_positions(raws, Utc::now()) {
            self.publish(&mut core);
        }
    }

    pub fn update_agent(&self, raw: &Value) {
        let mut core = self.core();
        if core.tracker.update_agent(raw, Utc::now()) {
            self.publish(&mut core);
        }
    }

    pub fn ingest_alert(&self, raw: &Value) {
        let mut core = self.core();
        if core.tracker.ingest_alert(raw, Utc::now()) {
            self.publish(&mut core);
        }
    }

    pub fn remove_alert(&self, id: &str) {
        let mut core = self.core();
        if core.tracker.remove_alert(id) {
            self.publish(&mut core);
        }
    }

    pub fn upsert_incident(&self, raw: &Value) {
        let mut core = self.core();
        if core.tracker.upsert_incident(raw, Utc::now()) {
            self.publish(&mut core);
        }
    }

    pub fn remove_incident(&self, id: &str) {
        let mut core = self.core();
        if core.tracker.remove_incident(id) {
            self.publish(&mut core);
        }
    }

    /// Scheduler tick: drain due alert expiries. Safe to call after the
    /// owner has otherwise shut down; an empty drain publishes nothing.
    pub fn tick(&self, now: DateTime<Utc>) {
        let mut core = self.core();
        if core.tracker.drain_expired(now) > 0 {
            self.publish(&mut core);
        }
    }

    // ── durable state ──────────────────────────────────────────────────

    /// Add a tactical zone. Returns the (possibly minted) identity.
    pub fn add_zone(&self, raw: Value) -> String {
        let zone = payload::zone_from_value(raw);
        let id = zone.id.clone();
        let mut core = self.core();
        if core.session.is_connected() {
            let op = core.zones.append(zone);
            self.send(ReplicaOp::Zone(op));
            self.publish(&mut core);
        } else {
            debug!(zone = %id, "offline, zone mutation queued");
            core.queue.enqueue(PendingOp::AddZone(zone));
        }
        id
    }

    pub fn remove_zone(&self, id: &str) {
        let mut core = self.core();
        if core.session.is_connected() {
            if let Err(e) = Self::apply_zone_removal(&mut core, id)
                .map(|op| self.send(ReplicaOp::Zone(op)))
            {
                debug!(zone = %id, error = %e, "zone removal dropped");
                return;
            }
            self.publish(&mut core);
        } else {
            core.queue.enqueue(PendingOp::RemoveZone(id.to_string()));
        }
    }

    /// Add a manually placed marker. Returns the identity.
    pub fn add_marker(&self, raw: Value) -> String {
        let marker = payload::marker_from_value(raw);
        let id = marker.id.clone();
        let mut core = self.core();
        if core.session.is_connected() {
            let op = core.markers.append(marker);
            self.send(ReplicaOp::Marker(op));
            self.publish(&mut core);
        } else {
            debug!(marker = %id, "offline, marker mutation queued");
            core.queue.enqueue(PendingOp::AddMarker(marker));
        }
        id
    }

    /// Merge fields into an existing marker. Expressed in the replica as
    /// delete + insert at the same slot; concurrent updates to the same
    /// marker resolve last-writer-wins at entity granularity.
    pub fn update_marker(&self, id: &str, fields: Map<String, Value>) {
        let mut core = self.core();
        if core.session.is_connected() {
            match Self::apply_marker_update(&mut core, id, &fields) {
                Ok(ops) => {
                    for op in ops {
                        self.send(op);
                    }
                    self.publish(&mut core);
                }
                Err(e) => debug!(marker = %id, error = %e, "marker update dropped"),
            }
        } else {
            core.queue.enqueue(PendingOp::UpdateMarker {
                id: id.to_string(),
                fields,
            });
        }
    }

    pub fn delete_marker(&self, id: &str) {
        let mut core = self.core();
        if core.session.is_connected() {
            if let Err(e) = Self::apply_marker_removal(&mut core, id)
                .map(|op| self.send(ReplicaOp::Marker(op)))
            {
                debug!(marker = %id, error = %e, "marker removal dropped");
                return;
            }
            self.publish(&mut core);
        } else {
            core.queue.enqueue(PendingOp::DeleteMarker(id.to_string()));
        }
    }

    /// Deliver an operation replicated from a peer. Duplicate deliveries
    /// are no-ops in the replica and publish nothing.
    pub fn apply_remote(&self, op: ReplicaOp) {
        let mut core = self.core();
        let changed = match op {
            ReplicaOp::Zone(op) => {
                let before = core.zones.to_vec();
                core.zones.apply(op);
                core.zones.to_vec() != before
            }
            ReplicaOp::Marker(op) => {
                let before = core.markers.to_vec();
                core.markers.apply(op);
                core.markers.to_vec() != before
            }
        };
        if changed {
            self.publish(&mut core);
        }
    }

    fn send(&self, op: ReplicaOp) {
        if let Err(e) = self.transport.publish(&op) {
            warn!(error = %e, "replication publish failed");
        }
    }

    fn apply_zone_removal(core: &mut Core, id: &str) -> anyhow::Result<crate::replica::SeqOp<TacticalZone>> {
        let index = core
            .zones
            .position_of(id)
            .ok_or_else(|| anyhow!("unknown zone '{id}'"))?;
        core.zones
            .remove_at(index)
            .ok_or_else(|| anyhow!("zone index {index} vanished"))
    }

    fn apply_marker_removal(core: &mut Core, id: &str) -> anyhow::Result<crate::replica::SeqOp<ManualMarker>> {
        let index = core
            .markers
            .position_of(id)
            .ok_or_else(|| anyhow!("unknown marker '{id}'"))?;
        core.markers
            .remove_at(index)
            .ok_or_else(|| anyhow!("marker index {index} vanished"))
    }

    fn apply_marker_update(
        core: &mut Core,
        id: &str,
        fields: &Map<String, Value>,
    ) -> anyhow::Result<Vec<ReplicaOp>> {
        let index = core
            .markers
            .position_of(id)
            .ok_or_else(|| anyhow!("unknown marker '{id}'"))?;
        let mut merged = core
            .markers
            .get(index)
            .ok_or_else(|| anyhow!("marker index {index} vanished"))?;
        for (key, value) in fields {
            match key.as_str() {
                "lat" => {
                    if let Some(lat) = value.as_f64().filter(|f| f.is_finite()) {
                        merged.lat = lat;
                    }
                }
                "lon" => {
                    if let Some(lon) = value.as_f64().filter(|f| f.is_finite()) {
                        merged.lon = lon;
                    }
                }
                _ => {
                    merged.properties.insert(key.clone(), value.clone());
                }
            }
        }
        let ops = core
            .markers
            .replace_at(index, merged)
            .ok_or_else(|| anyhow!("marker index {index} vanished"))?;
        Ok(ops.into_iter().map(ReplicaOp::Marker).collect())
    }

    // ── pending markers (local discovery workflow) ─────────────────────

    pub fn set_pending_markers(&self, raw: &Value) {
        let mut core = self.core();
        core.pending_markers = match raw.as_array() {
            Some(items) => items
                .iter()
                .map(|item| payload::pending_marker_from_value(item.clone()))
                .collect(),
            None => Vec::new(),
        };
        self.publish(&mut core);
    }

    /// Upsert by identity with last-write-wins field merge, newest first.
    pub fn upsert_pending_marker(&self, raw: Value) {
        let pending = payload::pending_marker_from_value(raw);
        let mut core = self.core();
        if let Some(existing) = core
            .pending_markers
            .iter_mut()
            .find(|p| p.id == pending.id)
        {
            for (key, value) in pending.properties {
                existing.properties.insert(key, value);
            }
        } else {
            core.pending_markers.insert(0, pending);
        }
        self.publish(&mut core);
    }

    pub fn remove_pending_marker(&self, id: &str) {
        let mut core = self.core();
        let before = core.pending_markers.len();
        core.pending_markers.retain(|p| p.id != id);
        if core.pending_markers.len() != before {
            self.publish(&mut core);
        }
    }

    // ── draft marker + persistence collaborator ────────────────────────

    pub fn set_draft_marker(&self, draft: MarkerDraft) {
        let mut core = self.core();
        core.draft = Some(draft);
        self.publish(&mut core);
    }

    pub fn clear_draft_marker(&self) {
        let mut core = self.core();
        if core.draft.take().is_some() {
            self.publish(&mut core);
        }
    }

    /// Persist the current draft through the objects collaborator. On
    /// success the confirmed marker joins durable state and the draft is
    /// cleared; on failure the draft is retained unchanged for a
    /// user-initiated retry. The request is awaited outside the state
    /// lock, so teardown during the round-trip leaves a consistent core.
    pub async fn persist_draft(&self, objects: &ObjectsClient) -> Result<bool, ClientError> {
        let draft = { self.core().draft.clone() };
        let Some(draft) = draft else {
            return Ok(false);
        };

        let saved = objects.create(&draft).await?;
        self.finish_draft_persist(draft, saved);
        Ok(true)
    }

    /// Completion half of `persist_draft`, re-entering the lock after the
    /// round-trip. The draft is cleared only if it is still the one that
    /// was persisted; a draft replaced mid-flight stays for its own
    /// persist call.
    fn finish_draft_persist(&self, draft: MarkerDraft, saved: SavedObject) {
        let marker = saved.into_marker(&draft);
        let mut core = self.core();
        if core.draft.as_ref() == Some(&draft) {
            core.draft = None;
        }
        if core.session.is_connected() {
            let op = core.markers.append(marker);
            self.send(ReplicaOp::Marker(op));
        } else {
            core.queue.enqueue(PendingOp::AddMarker(marker));
        }
        self.publish(&mut core);
    }

    // ── connectivity ───────────────────────────────────────────────────

    /// Feed a transport status event through the session monitor. The
    /// offline→online edge flushes the queue exactly once.
    pub fn transport_status(&self, status: TransportStatus) {
        let mut core = self.core();
        match core.session.apply(status) {
            Some(Transition::CameOnline) => {
                info!(queued = core.queue.len(), "peer session online, flushing queue");
                self.flush_queue(&mut core);
                self.publish(&mut core);
            }
            Some(Transition::WentOffline) => {
                info!("peer session offline, durable mutations will queue");
                self.publish(&mut core);
            }
            None => {}
        }
    }

    /// Replay queued intents strictly FIFO. Each is removed before it
    /// runs; a failing intent is logged and skipped so it cannot corrupt
    /// the remainder of the batch.
    fn flush_queue(&self, core: &mut Core) {
        while let Some(op) = core.queue.next() {
            if let Err(e) = self.apply_pending(core, op) {
                warn!(error = %e, "queued mutation failed, skipping");
            }
        }
    }

    fn apply_pending(&self, core: &mut Core, op: PendingOp) -> anyhow::Result<()> {
        match op {
            PendingOp::AddZone(zone) => {
                let op = core.zones.append(zone);
                self.send(ReplicaOp::Zone(op));
            }
            PendingOp::RemoveZone(id) => {
                let op = Self::apply_zone_removal(core, &id)?;
                self.send(ReplicaOp::Zone(op));
            }
            PendingOp::AddMarker(marker) => {
                let op = core.markers.append(marker);
                self.send(ReplicaOp::Marker(op));
            }
            PendingOp::UpdateMarker { id, fields } => {
                for op in Self::apply_marker_update(core, &id, &fields)? {
                    self.send(op);
                }
            }
            PendingOp::DeleteMarker(id) => {
                let op = Self::apply_marker_removal(core, &id)?;
                self.send(ReplicaOp::Marker(op));
            }
        }
        Ok(())
    }

    // ── derived views ──────────────────────────────────────────────────

    /// Project agents and markers through the spatial aggregator for the
    /// given zoom and viewport. Input order is fixed (agents sorted by
    /// id, then markers in sequence order) so the output is deterministic
    /// for a given state.
    pub fn clusters(&self, zoom: f64, bounds: Bounds) -> Vec<ClusterFeature> {
        let core = self.core();
        let mut points: Vec<ClusterPoint> = core
            .tracker
            .agents
            .values()
            .filter_map(|agent| {
                let (lat, lon) = (agent.lat?, agent.lon?);
                Some(ClusterPoint {
                    id: agent.id.clone(),
                    lon,
                    lat,
                })
            })
            .collect();
        points.sort_by(|a, b| a.id.cmp(&b.id));
        for marker in core.markers.to_vec() {
            points.push(ClusterPoint {
                id: marker.id.clone(),
                lon: marker.lon,
                lat: marker.lat,
            });
        }
        cluster::cluster(&points, zoom, bounds, &self.cluster_cfg)
    }
}
