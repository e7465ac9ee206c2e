use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::TransportErrorKind;

/// Target used for issues that concern a whole service rather than one route.
pub const SERVICE_TARGET: &str = "-";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Closed set of issue kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    NoSourceFiles,
    PlatformUnreachable,
    InstanceStopped,
    ServiceUnreachable,
    HealthUnhealthy,
    #[serde(rename = "http_5xx")]
    Http5xx,
    #[serde(rename = "http_4xx_unexpected")]
    Http4xxUnexpected,
    GatewayBackendUnreachable,
    GatewayRouteMissing,
    StaticRouteMissing,
    SlowResponse,
}

impl IssueKind {
    pub const ALL: [IssueKind; 11] = [
        IssueKind::NoSourceFiles,
        IssueKind::PlatformUnreachable,
        IssueKind::InstanceStopped,
        IssueKind::ServiceUnreachable,
        IssueKind::HealthUnhealthy,
        IssueKind::Http5xx,
        IssueKind::Http4xxUnexpected,
        IssueKind::GatewayBackendUnreachable,
        IssueKind::GatewayRouteMissing,
        IssueKind::StaticRouteMissing,
        IssueKind::SlowResponse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IssueKind::NoSourceFiles => "no_source_files",
            IssueKind::PlatformUnreachable => "platform_unreachable",
            IssueKind::InstanceStopped => "instance_stopped",
            IssueKind::ServiceUnreachable => "service_unreachable",
            IssueKind::HealthUnhealthy => "health_unhealthy",
            IssueKind::Http5xx => "http_5xx",
            IssueKind::Http4xxUnexpected => "http_4xx_unexpected",
            IssueKind::GatewayBackendUnreachable => "gateway_backend_unreachable",
            IssueKind::GatewayRouteMissing => "gateway_route_missing",
            IssueKind::StaticRouteMissing => "static_route_missing",
            IssueKind::SlowResponse => "slow_response",
        }
    }

    /// Advisory kinds are warnings; everything else is an error.
    pub fn severity(self) -> Severity {
        match self {
            IssueKind::StaticRouteMissing | IssueKind::SlowResponse => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IssueKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown issue kind '{s}'"))
    }
}

/// Content-derived identity of an issue: the same logical problem produces the
/// same key in every run. Rendered as `service:kind:target`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct IssueKey {
    pub service: String,
    pub kind: IssueKind,
    pub target: String,
}

impl IssueKey {
    pub fn new(service: impl Into<String>, kind: IssueKind, target: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            kind,
            target: target.into(),
        }
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.service, self.kind, self.target)
    }
}

impl FromStr for IssueKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The target is last so route paths containing ':' survive.
        let mut parts = s.splitn(3, ':');
        let (Some(service), Some(kind), Some(target)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("issue key '{s}' is not of the form service:kind:target"));
        };
        if service.is_empty() || target.is_empty() {
            return Err(format!("issue key '{s}' has an empty service or target"));
        }
        Ok(IssueKey::new(service, kind.parse()?, target))
    }
}

impl From<IssueKey> for String {
    fn from(key: IssueKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for IssueKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Kind-specific facts behind an issue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Finding {
    NoSourceFiles {
        dir: String,
    },
    PlatformUnreachable {
        reason: String,
    },
    InstanceStopped,
    ServiceUnreachable {
        path: String,
        error: TransportErrorKind,
        detail: String,
    },
    HealthUnhealthy {
        path: String,
        status: u16,
        reported: Option<String>,
    },
    #[serde(rename = "http_5xx")]
    Http5xx {
        path: String,
        status: u16,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        unhealthy_backends: Vec<String>,
    },
    #[serde(rename = "http_4xx_unexpected")]
    Http4xxUnexpected {
        path: String,
        status: u16,
    },
    GatewayBackendUnreachable {
        path: String,
        status: u16,
        backends: Vec<String>,
    },
    GatewayRouteMissing {
        path: String,
        backend: Option<String>,
    },
    StaticRouteMissing {
        path: String,
        status: u16,
    },
    SlowResponse {
        path: String,
        latency_ms: u64,
        threshold_ms: u64,
    },
}

impl Finding {
    pub fn kind(&self) -> IssueKind {
        match self {
            Finding::NoSourceFiles { .. } => IssueKind::NoSourceFiles,
            Finding::PlatformUnreachable { .. } => IssueKind::PlatformUnreachable,
            Finding::InstanceStopped => IssueKind::InstanceStopped,
            Finding::ServiceUnreachable { .. } => IssueKind::ServiceUnreachable,
            Finding::HealthUnhealthy { .. } => IssueKind::HealthUnhealthy,
            Finding::Http5xx { .. } => IssueKind::Http5xx,
            Finding::Http4xxUnexpected { .. } => IssueKind::Http4xxUnexpected,
            Finding::GatewayBackendUnreachable { .. } => IssueKind::GatewayBackendUnreachable,
            Finding::GatewayRouteMissing { .. } => IssueKind::GatewayRouteMissing,
            Finding::StaticRouteMissing { .. } => IssueKind::StaticRouteMissing,
            Finding::SlowResponse { .. } => IssueKind::SlowResponse,
        }
    }

    /// Key target: the route for route-level findings, `-` for service-level ones.
    pub fn target(&self) -> &str {
        match self {
            Finding::NoSourceFiles { .. }
            | Finding::PlatformUnreachable { .. }
            | Finding::InstanceStopped
            | Finding::ServiceUnreachable { .. } => SERVICE_TARGET,
            Finding::HealthUnhealthy { path, .. }
            | Finding::Http5xx { path, .. }
            | Finding::Http4xxUnexpected { path, .. }
            | Finding::GatewayBackendUnreachable { path, .. }
            | Finding::GatewayRouteMissing { path, .. }
            | Finding::StaticRouteMissing { path, .. }
            | Finding::SlowResponse { path, .. } => path.as_str(),
        }
    }

    fn message(&self, service: &str) -> String {
        match self {
            Finding::NoSourceFiles { dir } => {
                format!("{service}: source directory '{dir}' is missing or has no source files")
            }
            Finding::PlatformUnreachable { reason } => {
                format!("container runtime could not be queried: {reason}")
            }
            Finding::InstanceStopped => format!("{service} is declared but not running"),
            Finding::ServiceUnreachable { path, error, detail } => {
                format!("{service} did not respond on {path}: {} ({detail})", error.as_str())
            }
            Finding::HealthUnhealthy {
                path,
                status,
                reported,
            } => match reported {
                Some(r) => format!("{service} health {path} reports '{r}' (HTTP {status})"),
                None => format!("{service} health {path} returned HTTP {status}"),
            },
            Finding::Http5xx {
                path,
                status,
                unhealthy_backends,
            } if !unhealthy_backends.is_empty() => format!(
                "{service} {path} returned HTTP {status}; unhealthy backends: {}",
                unhealthy_backends.join(", ")
            ),
            Finding::Http5xx { path, status, .. } => {
                format!("{service} {path} returned HTTP {status}")
            }
            Finding::Http4xxUnexpected { path, status } => format!(
                "{service} advertises {path} but it answered HTTP {status} (route table mismatch)"
            ),
            Finding::GatewayBackendUnreachable {
                path,
                status,
                backends,
            } => format!(
                "{service} {path} returned HTTP {status} while backends [{}] report healthy (stale routing)",
                backends.join(", ")
            ),
            Finding::GatewayRouteMissing { path, backend } => match backend {
                Some(b) => format!("{service} has no working route {path} (forwards to {b})"),
                None => format!("{service} has no working route {path}"),
            },
            Finding::StaticRouteMissing { path, status } => format!(
                "{service} declared route {path} answered HTTP {status}; the static route list may be stale"
            ),
            Finding::SlowResponse {
                path,
                latency_ms,
                threshold_ms,
            } => format!("{service} {path} took {latency_ms}ms (threshold {threshold_ms}ms)"),
        }
    }

    fn suggestion(&self, service: &str) -> String {
        match self {
            Finding::NoSourceFiles { dir } => {
                format!("restore the sources under '{dir}' or fix source_dir for {service}")
            }
            Finding::PlatformUnreachable { .. } => {
                "start the container runtime and check the runtime list_command".to_string()
            }
            Finding::InstanceStopped => format!("start {service}"),
            Finding::ServiceUnreachable { .. } => {
                format!("restart {service} and check that it binds the configured address")
            }
            Finding::HealthUnhealthy { .. } => {
                format!("inspect {service} logs for failing dependencies, then restart it")
            }
            Finding::Http5xx {
                unhealthy_backends, ..
            } if !unhealthy_backends.is_empty() => format!(
                "fix the unhealthy backends first: {}",
                unhealthy_backends.join(", ")
            ),
            Finding::Http5xx { path, .. } => {
                format!("inspect {service} logs for the handler serving {path}")
            }
            Finding::Http4xxUnexpected { path, .. } => format!(
                "redeploy {service}; the running build does not serve {path} that it registers"
            ),
            Finding::GatewayBackendUnreachable { .. } => {
                format!("restart {service} to refresh its upstream resolution")
            }
            Finding::GatewayRouteMissing { path, .. } => {
                format!("add or fix the forwarding rule for {path} in the {service} config")
            }
            Finding::StaticRouteMissing { path, .. } => {
                format!("remove {path} from static_routes of {service} or restore the handler")
            }
            Finding::SlowResponse { path, .. } => {
                format!("profile {service} {path}")
            }
        }
    }
}

/// A mechanically safe, idempotent remediation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Remediation {
    Start { service: String },
    Restart { service: String },
}

impl Remediation {
    pub fn service(&self) -> &str {
        match self {
            Remediation::Start { service } | Remediation::Restart { service } => service,
        }
    }
}

/// One detected problem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub key: IssueKey,
    pub severity: Severity,
    pub message: String,
    pub suggestion: String,
    pub auto_fixable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<Remediation>,
    /// Display form of the remediation command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_command: Option<String>,
    pub detail: Finding,
}

impl Issue {
    pub fn new(service: impl Into<String>, finding: Finding) -> Self {
        let service = service.into();
        let kind = finding.kind();
        Self {
            key: IssueKey::new(service.clone(), kind, finding.target()),
            severity: kind.severity(),
            message: finding.message(&service),
            suggestion: finding.suggestion(&service),
            auto_fixable: false,
            remediation: None,
            fix_command: None,
            detail: finding,
        }
    }

    /// Attach a remediation together with its rendered command line.
    pub fn with_remediation(mut self, remediation: Remediation, command: &[String]) -> Self {
        self.fix_command = Some(command.join(" "));
        self.remediation = Some(remediation);
        self.auto_fixable = true;
        self
    }

    pub fn kind(&self) -> IssueKind {
        self.key.kind
    }

    pub fn service(&self) -> &str {
        &self.key.service
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips_through_text_with_colons_in_target() {
        let key = IssueKey::new("review", IssueKind::Http4xxUnexpected, "/sessions/:id");
        let text = key.to_string();
        assert_eq!(text, "review:http_4xx_unexpected:/sessions/:id");
        assert_eq!(text.parse::<IssueKey>().unwrap(), key);
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!("portal".parse::<IssueKey>().is_err());
        assert!("portal:bogus:-".parse::<IssueKey>().is_err());
        assert!(":health_unhealthy:/health".parse::<IssueKey>().is_err());
    }

    #[test]
    fn severity_follows_kind() {
        assert_eq!(IssueKind::SlowResponse.severity(), Severity::Warning);
        assert_eq!(IssueKind::StaticRouteMissing.severity(), Severity::Warning);
        assert_eq!(IssueKind::Http5xx.severity(), Severity::Error);
        assert!(Severity::Error > Severity::Warning);
    }

    #[test]
    fn kind_serializes_with_taxonomy_names() {
        for kind in IssueKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn issue_key_derives_from_finding() {
        let issue = Issue::new("portal", Finding::InstanceStopped);
        assert_eq!(issue.key.to_string(), "portal:instance_stopped:-");
        assert!(!issue.auto_fixable);

        let issue = issue.with_remediation(
            Remediation::Start {
                service: "portal".into(),
            },
            &["docker-compose".into(), "up".into(), "-d".into(), "portal".into()],
        );
        assert!(issue.auto_fixable);
        assert_eq!(issue.fix_command.as_deref(), Some("docker-compose up -d portal"));
    }
}
