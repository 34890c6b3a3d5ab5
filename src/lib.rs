// Domain model (agents, tracks, alerts, durable entities)
pub mod model;

// Ingress payload normalization
pub mod payload;

// Bounded ephemeral state (positions, tracks, alerts, incidents)
pub mod tracker;

// Deterministic spatial aggregation for rendering
pub mod cluster;

// Conflict-free replicated sequences for durable shared state
pub mod replica;

// Offline mutation queue
pub mod offline;

// Peer session connectivity monitor
pub mod session;

// Replication transport interface
pub mod transport;

// Tactical state facade (single coordination point)
pub mod facade;

// External REST collaborators
pub mod clients;

// Configuration
pub mod config;
