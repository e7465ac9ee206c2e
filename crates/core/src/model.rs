use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::time::EpochMs;

/// A running service as seen by topology discovery. Rebuilt on every run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    /// Base URL the service answers on, e.g. `http://localhost:3001`.
    pub address: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Where an endpoint came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EndpointSource {
    /// Reported by the service's own introspection path.
    Introspected,
    /// Declared in the manifest.
    Static,
    /// Derived from the gateway's forwarding configuration.
    GatewayDerived,
}

impl EndpointSource {
    fn precedence(self) -> u8 {
        match self {
            EndpointSource::Introspected => 2,
            EndpointSource::Static => 1,
            EndpointSource::GatewayDerived => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EndpointRole {
    /// Liveness/health path; eligible for wait-mode retries.
    Health,
    Route,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub service: String,
    /// Upper-cased HTTP method.
    pub method: String,
    pub path: String,
    pub source: EndpointSource,
    pub role: EndpointRole,
    /// Backend service a gateway-derived route forwards to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl Endpoint {
    pub fn route(
        service: impl Into<String>,
        method: impl AsRef<str>,
        path: impl Into<String>,
        source: EndpointSource,
    ) -> Self {
        Self {
            service: service.into(),
            method: method.as_ref().trim().to_ascii_uppercase(),
            path: path.into(),
            source,
            role: EndpointRole::Route,
            backend: None,
        }
    }

    pub fn health(service: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            role: EndpointRole::Health,
            ..Self::route(service, "GET", path, EndpointSource::Static)
        }
    }

    pub fn with_backend(mut self, backend: Option<String>) -> Self {
        self.backend = backend;
        self
    }

    pub fn is_health(&self) -> bool {
        self.role == EndpointRole::Health
    }

    /// Only GET-class methods may be invoked by passive validation.
    pub fn is_idempotent(&self) -> bool {
        matches!(self.method.as_str(), "GET" | "HEAD")
    }

    /// Route templates such as `/users/:id`, `/files/*path` or `/items/{id}`
    /// cannot be requested literally.
    pub fn is_template(&self) -> bool {
        self.path
            .split('/')
            .any(|seg| seg.starts_with(':') || seg.starts_with('*') || seg.contains('{'))
    }
}

/// Merge endpoint lists for one service, keyed by (method, path).
///
/// On conflict the higher-precedence source wins (introspected over static over
/// gateway-derived); the health role sticks if either side carried it.
pub fn dedup_endpoints(endpoints: impl IntoIterator<Item = Endpoint>) -> Vec<Endpoint> {
    let mut merged: BTreeMap<(String, String), Endpoint> = BTreeMap::new();
    for ep in endpoints {
        let key = (ep.method.clone(), ep.path.clone());
        match merged.get_mut(&key) {
            None => {
                merged.insert(key, ep);
            }
            Some(existing) => {
                let health = existing.is_health() || ep.is_health();
                if ep.source.precedence() > existing.source.precedence() {
                    let backend = ep.backend.clone().or_else(|| existing.backend.take());
                    *existing = ep;
                    existing.backend = backend;
                }
                if health {
                    existing.role = EndpointRole::Health;
                }
            }
        }
    }
    merged.into_values().collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Refused,
    Other,
}

impl TransportErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Refused => "connection refused",
            TransportErrorKind::Other => "transport error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The target answered with an HTTP status.
    Status { code: u16 },
    /// A `tcp://` target accepted the connection.
    Connected,
    /// No usable response.
    Transport {
        kind: TransportErrorKind,
        detail: String,
    },
}

/// What a health payload said about the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum HealthVerdict {
    Healthy,
    Unhealthy { reported: String },
}

impl HealthVerdict {
    /// Interpret a health response body.
    ///
    /// A JSON object whose `status` names a failure is unhealthy; anything else,
    /// including a non-JSON body, counts as plain liveness.
    pub fn from_body(body: &[u8]) -> Self {
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
            return HealthVerdict::Healthy;
        };
        let Some(status) = value.get("status").and_then(|s| s.as_str()) else {
            return HealthVerdict::Healthy;
        };
        match status.trim().to_ascii_lowercase().as_str() {
            "unhealthy" | "fail" | "failed" | "down" | "error" | "critical" => {
                HealthVerdict::Unhealthy {
                    reported: status.to_string(),
                }
            }
            _ => HealthVerdict::Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeResult {
    pub endpoint: Endpoint,
    pub url: String,
    pub outcome: ProbeOutcome,
    pub latency_ms: u64,
    pub at_ms: EpochMs,
    /// Parsed payload verdict, present only for health endpoints that answered 2xx.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthVerdict>,
}

impl ProbeResult {
    pub fn status(&self) -> Option<u16> {
        match self.outcome {
            ProbeOutcome::Status { code } => Some(code),
            ProbeOutcome::Connected | ProbeOutcome::Transport { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        match self.outcome {
            ProbeOutcome::Status { code } => (200..300).contains(&code),
            ProbeOutcome::Connected => true,
            ProbeOutcome::Transport { .. } => false,
        }
    }

    /// 2xx and, for health endpoints, a payload that does not report failure.
    pub fn is_healthy(&self) -> bool {
        self.is_success() && !matches!(self.health, Some(HealthVerdict::Unhealthy { .. }))
    }
}
