use serde::Deserialize;

/// Complete tacsync configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TacsyncConfig {
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Replication transport configuration (fixed deployment values, not part
/// of the core contract)
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationConfig {
    /// Shared room name identifying the peer channel
    #[serde(default = "default_room")]
    pub room: String,
    /// Signaling endpoint for peer discovery
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,
}

fn default_room() -> String {
    "tactical-room".to_string()
}

fn default_signaling_url() -> String {
    "wss://signal.tactical.local".to_string()
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            room: default_room(),
            signaling_url: default_signaling_url(),
        }
    }
}

/// Ephemeral tracker bounds
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Maximum trajectory points retained per agent
    #[serde(default = "default_track_capacity")]
    pub track_capacity: usize,
    /// Seconds a threat alert lives before auto-removal
    #[serde(default = "default_alert_ttl_secs")]
    pub alert_ttl_secs: i64,
    /// Maximum incident log entries
    #[serde(default = "default_incident_capacity")]
    pub incident_capacity: usize,
}

fn default_track_capacity() -> usize {
    50
}

fn default_alert_ttl_secs() -> i64 {
    30
}

fn default_incident_capacity() -> usize {
    50
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_capacity: default_track_capacity(),
            alert_ttl_secs: default_alert_ttl_secs(),
            incident_capacity: default_incident_capacity(),
        }
    }
}

/// Spatial aggregation tuning
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Cluster radius in screen pixels (512px world tile convention)
    #[serde(default = "default_radius_px")]
    pub radius_px: f64,
    /// Fraction of the viewport span included beyond each edge, so points
    /// just outside the boundary do not pop in and out while panning
    #[serde(default = "default_margin_fraction")]
    pub margin_fraction: f64,
    /// Zoom clamp bounds
    #[serde(default = "default_min_zoom")]
    pub min_zoom: f64,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: f64,
}

fn default_radius_px() -> f64 {
    64.0
}

fn default_margin_fraction() -> f64 {
    0.2
}

fn default_min_zoom() -> f64 {
    0.0
}

fn default_max_zoom() -> f64 {
    22.0
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            radius_px: default_radius_px(),
            margin_fraction: default_margin_fraction(),
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
        }
    }
}

/// External REST collaborator endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL for the discovery/persistence collaborator
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Forward-geocoding search endpoint
    #[serde(default = "default_geocode_url")]
    pub geocode_url: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_geocode_url() -> String {
    "https://nominatim.openstreetmap.org/search".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            geocode_url: default_geocode_url(),
        }
    }
}

/// Expiry scheduler tick
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// How often the alert expiry queue is drained (milliseconds)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<TacsyncConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: TacsyncConfig = toml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TacsyncConfig::default();
        assert_eq!(config.tracker.track_capacity, 50);
        assert_eq!(config.tracker.alert_ttl_secs, 30);
        assert_eq!(config.tracker.incident_capacity, 50);
        assert_eq!(config.replication.room, "tactical-room");
        assert_eq!(config.cluster.radius_px, 64.0);
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [replication]
            room = "ops-west"
            signaling_url = "wss://signal.example.net"

            [tracker]
            track_capacity = 100
            alert_ttl_secs = 60
            incident_capacity = 25

            [cluster]
            radius_px = 48.0
            margin_fraction = 0.1

            [api]
            base_url = "http://10.0.0.5:8000"

            [scheduler]
            tick_interval_ms = 250
        "#;

        let config: TacsyncConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.replication.room, "ops-west");
        assert_eq!(config.tracker.track_capacity, 100);
        assert_eq!(config.tracker.alert_ttl_secs, 60);
        assert_eq!(config.cluster.radius_px, 48.0);
        assert_eq!(config.api.base_url, "http://10.0.0.5:8000");
        assert_eq!(config.scheduler.tick_interval_ms, 250);
    }

    #[test]
    fn test_partial_config() {
        // Missing sections use defaults
        let toml = r#"
            [tracker]
            alert_ttl_secs = 15
        "#;

        let config: TacsyncConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.tracker.alert_ttl_secs, 15);
        assert_eq!(config.tracker.track_capacity, 50); // Default
        assert_eq!(config.cluster.margin_fraction, 0.2); // Default
    }
}
