//! External REST collaborators: device discovery, object persistence and
//! forward geocoding. Failures surface as typed error states and are
//! never retried automatically; retry is a user-initiated action.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::model::{durable_id, ManualMarker, MarkerDraft, TerminalAuth};

/// Typed error state for collaborator calls.
#[derive(Debug)]
pub enum ClientError {
    /// Transport-level failure (refused connection, timeout, DNS).
    Network(String),
    /// The collaborator answered but refused the request.
    Rejected(String),
    /// Response body did not match the documented shape.
    Malformed(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Network(msg) => write!(f, "network error: {}", msg),
            ClientError::Rejected(msg) => write!(f, "request rejected: {}", msg),
            ClientError::Malformed(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Network(e.to_string())
    }
}

// ── discovery ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct DiscoverRequest<'a> {
    ip: &'a str,
    username: &'a str,
    password: &'a str,
}

/// Successful discovery result for a probed terminal.
#[derive(Clone, Debug, Deserialize)]
pub struct TerminalProfile {
    pub status: String,
    #[serde(rename = "type", default)]
    pub terminal_type: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
}

/// `POST /api/terminals/discover` collaborator.
pub struct DiscoveryClient {
    http: reqwest::Client,
    base_url: String,
}

impl DiscoveryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn discover(
        &self,
        ip: &str,
        username: &str,
        password: &str,
    ) -> Result<TerminalProfile, ClientError> {
        let response = self
            .http
            .post(format!("{}/api/terminals/discover", self.base_url))
            .json(&DiscoverRequest {
                ip,
                username,
                password,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Rejected(format!(
                "discovery returned HTTP {}",
                response.status()
            )));
        }
        let profile: TerminalProfile = response
            .json()
            .await
            .map_err(|e| ClientError::Malformed(e.to_string()))?;
        if profile.status != "success" {
            return Err(ClientError::Rejected(format!(
                "discovery status '{}'",
                profile.status
            )));
        }
        Ok(profile)
    }
}

// ── object persistence ─────────────────────────────────────────────────

#[derive(Serialize)]
struct NewObjectRequest<'a> {
    title: &'a str,
    name: &'a str,
    address: &'a str,
    description: &'a str,
    image: &'a str,
    ip: &'a str,
    lat: f64,
    lon: f64,
    terminal_auth: &'a TerminalAuth,
    channels: &'a [String],
}

/// Persisted object echoed by the collaborator. Every field is optional;
/// the caller falls back to its draft for anything missing.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SavedObject {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

impl SavedObject {
    /// Build the durable marker from the echoed object, falling back to
    /// the draft for fields the collaborator omitted.
    pub fn into_marker(self, draft: &MarkerDraft) -> ManualMarker {
        let id = match self.id {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => durable_id("marker"),
        };
        let name = self.name.unwrap_or_else(|| draft.title.clone());
        let mut properties = serde_json::Map::new();
        properties.insert("name".to_string(), json!(name));
        properties.insert("title".to_string(), json!(name));
        properties.insert(
            "address".to_string(),
            json!(self.address.unwrap_or_else(|| draft.address.clone())),
        );
        properties.insert(
            "description".to_string(),
            json!(self.description.unwrap_or_else(|| draft.description.clone())),
        );
        properties.insert(
            "image".to_string(),
            json!(self.image.unwrap_or_else(|| draft.image.clone())),
        );
        properties.insert(
            "ip".to_string(),
            json!(self.ip.unwrap_or_else(|| draft.ip.clone())),
        );
        properties.insert("channels".to_string(), json!(draft.channels));
        ManualMarker {
            id,
            lat: self.lat.unwrap_or(draft.lat),
            lon: self.lon.unwrap_or(draft.lon),
            properties,
        }
    }
}

/// `POST /api/objects` collaborator.
pub struct ObjectsClient {
    http: reqwest::Client,
    base_url: String,
}

impl ObjectsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn create(&self, draft: &MarkerDraft) -> Result<SavedObject, ClientError> {
        let response = self
            .http
            .post(format!("{}/api/objects", self.base_url))
            .json(&NewObjectRequest {
                title: &draft.title,
                name: &draft.title,
                address: &draft.address,
                description: &draft.description,
                image: &draft.image,
                ip: &draft.ip,
                lat: draft.lat,
                lon: draft.lon,
                terminal_auth: &draft.auth,
                channels: &draft.channels,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Rejected(format!(
                "object persistence returned HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Malformed(e.to_string()))
    }
}

// ── geocoding ──────────────────────────────────────────────────────────

/// Camera-fly target produced by a geocode lookup; never persisted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraTarget {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Deserialize)]
struct GeocodeHit {
    lat: String,
    lon: String,
}

/// Forward geocoding against a Nominatim-style search endpoint.
pub struct GeocodeClient {
    http: reqwest::Client,
    endpoint: String,
}

impl GeocodeClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Look up a free-text address. `Ok(None)` when the query is empty or
    /// yields no usable hit.
    pub async fn forward(&self, address: &str) -> Result<Option<CameraTarget>, ClientError> {
        let query = address.trim();
        if query.is_empty() {
            return Ok(None);
        }

        let url = format!(
            "{}?format=json&limit=1&q={}",
            self.endpoint,
            urlencoding::encode(query)
        );
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Rejected(format!(
                "geocoder returned HTTP {}",
                response.status()
            )));
        }
        let hits: Vec<GeocodeHit> = response
            .json()
            .await
            .map_err(|e| ClientError::Malformed(e.to_string()))?;

        let Some(hit) = hits.first() else {
            return Ok(None);
        };
        match (hit.lat.parse::<f64>(), hit.lon.parse::<f64>()) {
            (Ok(lat), Ok(lon)) if lat.is_finite() && lon.is_finite() => {
                Ok(Some(CameraTarget { lat, lon }))
            }
            _ => Ok(None),
        }
    }
}
