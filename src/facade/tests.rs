use super::*;
use crate::transport::RecordingTransport;
use chrono::Duration;
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;

fn state() -> Arc<TacticalState> {
    TacticalState::new(&TacsyncConfig::default(), Arc::new(NullTransportForTest))
}

struct NullTransportForTest;

impl ReplicationTransport for NullTransportForTest {
    fn publish(&self, _op: &ReplicaOp) -> anyhow::Result<()> {
        Ok(())
    }
}

fn connected(state: &TacticalState) {
    state.transport_status(TransportStatus::Connected);
}

fn drain<T: Clone>(rx: &mut tokio::sync::broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

#[test]
fn test_worked_example_two_position_updates() {
    let state = state();
    state.update_position(&json!({"agent_id": "42", "lat": 53.9, "lon": 27.56}));
    state.update_position(&json!({"agent_id": "42", "lat": 53.91, "lon": 27.57}));

    let snapshot = state.snapshot();
    assert_eq!(snapshot.agents["42"].lat, Some(53.91));
    assert_eq!(snapshot.tracks["42"].path, vec![[27.56, 53.9], [27.57, 53.91]]);
}

#[test]
fn test_batch_publishes_exactly_one_snapshot() {
    let state = state();
    let mut rx = state.subscribe();

    let updates = vec![
        json!({"agent_id": "a", "lat": 1.0, "lon": 2.0}),
        json!({"agent_id": "b", "lat": 3.0, "lon": 4.0}),
        json!({"agent_id": "c", "lat": 5.0, "lon": 6.0}),
    ];
    state.batch_update_positions(&updates);

    let snapshots = drain(&mut rx);
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].agents.len(), 3);

    // Content equals three sequential updates.
    let sequential = self::state();
    for raw in &updates {
        sequential.update_position(raw);
    }
    let a = snapshots[0].clone();
    let b = sequential.snapshot();
    assert_eq!(
        a.agents.keys().collect::<Vec<_>>(),
        b.agents.keys().collect::<Vec<_>>()
    );
    for (id, agent) in &a.agents {
        assert_eq!(agent.lat, b.agents[id].lat);
        assert_eq!(agent.lon, b.agents[id].lon);
    }
    assert_eq!(
        serde_json::to_value(&a.tracks).unwrap(),
        serde_json::to_value(&b.tracks).unwrap()
    );
}

#[test]
fn test_rejected_update_publishes_nothing() {
    let state = state();
    let mut rx = state.subscribe();

    state.update_position(&json!({"lat": 1.0, "lon": 2.0}));
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn test_versions_increase_strictly() {
    let state = state();
    let mut rx = state.subscribe();

    state.update_position(&json!({"agent_id": "a", "lat": 1.0, "lon": 2.0}));
    state.ingest_alert(&json!({"id": "t1", "severity": "HIGH"}));
    state.remove_alert("t1");

    let versions: Vec<u64> = drain(&mut rx).iter().map(|s| s.version).collect();
    assert_eq!(versions.len(), 3);
    assert!(versions.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_critical_alert_mirrors_incident_and_expires() {
    let state = state();
    state.ingest_alert(&json!({"severity": "CRITICAL", "object_id": 7}));

    let snapshot = state.snapshot();
    assert_eq!(snapshot.threat_alerts.len(), 1);
    assert_eq!(snapshot.incidents.len(), 1);
    assert_eq!(
        snapshot.incidents[0].priority,
        crate::model::IncidentPriority::Critical
    );

    state.tick(Utc::now() + Duration::seconds(31));
    let snapshot = state.snapshot();
    assert!(snapshot.threat_alerts.is_empty());
    // The mirrored incident outlives the alert.
    assert_eq!(snapshot.incidents.len(), 1);
}

#[test]
fn test_tick_without_due_alerts_publishes_nothing() {
    let state = state();
    state.ingest_alert(&json!({"id": "t1", "severity": "HIGH"}));
    let mut rx = state.subscribe();

    state.tick(Utc::now() + Duration::seconds(5));
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn test_offline_mutations_queue_and_flush_in_order() {
    let transport = Arc::new(RecordingTransport::new());
    let state = TacticalState::new(&TacsyncConfig::default(), transport.clone());

    // Disconnected from the start: both zones queue, nothing replicates.
    state.add_zone(json!({"id": "zone-a", "kind": "patrol"}));
    state.add_zone(json!({"id": "zone-b", "kind": "restricted"}));
    assert!(state.snapshot().tactical_zones.is_empty());
    assert_eq!(transport.published(), 0);

    connected(&state);

    let zones = state.snapshot().tactical_zones.clone();
    assert_eq!(zones.len(), 2);
    // FIFO: zone-a applied before zone-b.
    assert_eq!(zones[0].id, "zone-a");
    assert_eq!(zones[1].id, "zone-b");
    assert_eq!(transport.published(), 2);
}

#[test]
fn test_flush_runs_once_per_reconnect() {
    let transport = Arc::new(RecordingTransport::new());
    let state = TacticalState::new(&TacsyncConfig::default(), transport.clone());

    state.add_zone(json!({"id": "zone-a"}));
    connected(&state);
    assert_eq!(transport.published(), 1);

    // Redundant connected events replay nothing.
    connected(&state);
    connected(&state);
    assert_eq!(transport.published(), 1);
    assert_eq!(state.snapshot().tactical_zones.len(), 1);
}

#[test]
fn test_failing_queued_mutation_is_skipped() {
    let state = state();

    // Update for a marker that will not exist at flush time, then a zone
    // that must still land.
    state.update_marker("ghost", serde_json::Map::new());
    state.add_zone(json!({"id": "zone-a"}));

    connected(&state);

    let snapshot = state.snapshot();
    assert_eq!(snapshot.tactical_zones.len(), 1);
    assert!(snapshot.manual_markers.is_empty());
}

#[test]
fn test_online_mutations_apply_immediately() {
    let transport = Arc::new(RecordingTransport::new());
    let state = TacticalState::new(&TacsyncConfig::default(), transport.clone());
    connected(&state);

    let id = state.add_marker(json!({"lat": 53.9, "lon": 27.56, "name": "relay"}));
    assert_eq!(state.snapshot().manual_markers.len(), 1);
    assert_eq!(transport.published(), 1);

    let mut fields = serde_json::Map::new();
    fields.insert("name".to_string(), json!("relay-2"));
    state.update_marker(&id, fields);
    let markers = state.snapshot().manual_markers.clone();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].properties["name"], json!("relay-2"));

    state.delete_marker(&id);
    assert!(state.snapshot().manual_markers.is_empty());
}

#[test]
fn test_remote_ops_replicate_between_peers() {
    let transport_a = Arc::new(RecordingTransport::new());
    let a = TacticalState::new(&TacsyncConfig::default(), transport_a.clone());
    let b = state();
    connected(&a);
    connected(&b);

    a.add_zone(json!({"id": "zone-a", "kind": "patrol"}));
    a.add_marker(json!({"id": "m-1", "lat": 1.0, "lon": 2.0}));

    // Deliver A's ops to B in reverse order.
    for op in transport_a.take().into_iter().rev() {
        b.apply_remote(op);
    }

    let sa = a.snapshot();
    let sb = b.snapshot();
    assert_eq!(
        serde_json::to_value(&sa.tactical_zones).unwrap(),
        serde_json::to_value(&sb.tactical_zones).unwrap()
    );
    assert_eq!(
        serde_json::to_value(&sa.manual_markers).unwrap(),
        serde_json::to_value(&sb.manual_markers).unwrap()
    );
}

#[test]
fn test_peer_status_surfaces_in_snapshot() {
    let state = state();
    assert_eq!(state.snapshot().peer_status, PeerStatus::Disconnected);

    connected(&state);
    assert_eq!(state.snapshot().peer_status, PeerStatus::Connected);

    state.transport_status(TransportStatus::Connecting);
    assert_eq!(state.snapshot().peer_status, PeerStatus::Disconnected);
}

#[test]
fn test_pending_marker_upsert_merges_by_identity() {
    let state = state();

    state.upsert_pending_marker(json!({"pending_id": "p1", "ip": "10.0.0.5"}));
    state.upsert_pending_marker(json!({"pending_id": "p2", "ip": "10.0.0.6"}));
    state.upsert_pending_marker(json!({"pending_id": "p1", "label": "camera"}));

    let pending = state.snapshot().pending_markers.clone();
    assert_eq!(pending.len(), 2);
    // Newest first; p1 kept its original slot.
    assert_eq!(pending[0].id, "p2");
    assert_eq!(pending[1].id, "p1");
    assert_eq!(pending[1].properties["ip"], json!("10.0.0.5"));
    assert_eq!(pending[1].properties["label"], json!("camera"));

    state.remove_pending_marker("p1");
    assert_eq!(state.snapshot().pending_markers.len(), 1);
}

fn draft(title: &str) -> MarkerDraft {
    MarkerDraft {
        lat: 53.9,
        lon: 27.56,
        title: title.to_string(),
        address: String::new(),
        description: String::new(),
        image: String::new(),
        ip: String::new(),
        auth: crate::model::TerminalAuth {
            ftp_user: String::new(),
            ftp_password: String::new(),
        },
        channels: Vec::new(),
    }
}

#[test]
fn test_draft_marker_lifecycle() {
    let state = state();
    let draft = draft("Relay");

    state.set_draft_marker(draft.clone());
    assert_eq!(state.snapshot().draft_marker, Some(draft));

    state.clear_draft_marker();
    assert_eq!(state.snapshot().draft_marker, None);
}

#[test]
fn test_persist_completion_clears_unchanged_draft() {
    let state = state();
    connected(&state);
    let draft = draft("Relay");
    state.set_draft_marker(draft.clone());

    let saved: SavedObject = serde_json::from_value(json!({"id": "obj-9"})).unwrap();
    state.finish_draft_persist(draft, saved);

    let snapshot = state.snapshot();
    assert_eq!(snapshot.draft_marker, None);
    assert_eq!(snapshot.manual_markers.len(), 1);
    assert_eq!(snapshot.manual_markers[0].id, "obj-9");
}

#[test]
fn test_draft_replaced_during_persist_is_kept() {
    let state = state();
    connected(&state);
    let first = draft("Relay");
    state.set_draft_marker(first.clone());

    // Round-trip starts against the first draft...
    let in_flight = state.snapshot().draft_marker.clone().unwrap();

    // ...and the user begins a new draft before it completes.
    let second = draft("Relay North");
    state.set_draft_marker(second.clone());

    let saved: SavedObject = serde_json::from_value(json!({"id": "obj-1"})).unwrap();
    state.finish_draft_persist(in_flight, saved);

    let snapshot = state.snapshot();
    // The newer draft survives the stale completion; the persisted
    // marker still joined durable state.
    assert_eq!(snapshot.draft_marker, Some(second));
    assert_eq!(snapshot.manual_markers.len(), 1);
    assert_eq!(snapshot.manual_markers[0].id, "obj-1");
}

#[test]
fn test_duplicate_remote_delivery_publishes_nothing() {
    let transport_a = Arc::new(RecordingTransport::new());
    let a = TacticalState::new(&TacsyncConfig::default(), transport_a.clone());
    let b = state();
    connected(&a);
    connected(&b);

    a.add_zone(json!({"id": "zone-a"}));
    let ops = transport_a.take();

    let mut rx = b.subscribe();
    for op in &ops {
        b.apply_remote(op.clone());
    }
    assert_eq!(drain(&mut rx).len(), 1);

    // Redelivery changes nothing and stays silent.
    let version = b.snapshot().version;
    for op in ops {
        b.apply_remote(op);
    }
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(b.snapshot().version, version);
}

#[test]
fn test_clusters_project_agents_and_markers() {
    let state = state();
    connected(&state);

    state.update_position(&json!({"agent_id": "a", "lat": 53.9, "lon": 27.56}));
    state.update_position(&json!({"agent_id": "b", "lat": 53.91, "lon": 27.57}));
    state.add_marker(json!({"id": "m-1", "lat": -30.0, "lon": 100.0}));

    let bounds = Bounds::new(-180.0, -85.0, 180.0, 85.0);
    let features = state.clusters(2.0, bounds);

    let clustered: Vec<_> = features.iter().filter(|f| f.cluster).collect();
    assert_eq!(clustered.len(), 1);
    assert_eq!(clustered[0].members, vec!["a".to_string(), "b".to_string()]);
    assert!(features.iter().any(|f| f.id == "m-1" && !f.cluster));
}
