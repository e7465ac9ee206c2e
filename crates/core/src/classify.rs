//! Probe results and discovery facts to issues.
//!
//! Classification is a pure function of its input plus the backend health
//! snapshot needed to tell a stale gateway from a broken backend.

use std::collections::{BTreeMap, BTreeSet};

use crate::issue::{Finding, Issue, Remediation};
use crate::manifest::Manifest;
use crate::model::{EndpointSource, HealthVerdict, ProbeOutcome, ProbeResult};
use crate::safety::render_template;

/// Service name used for issues about the container runtime itself.
pub const PLATFORM_SERVICE: &str = "platform";

#[derive(Debug, Clone)]
pub struct Classifier {
    start_command: Vec<String>,
    restart_command: Vec<String>,
    slow_threshold_ms: u64,
    gateway: Option<String>,
    backend_health: BTreeMap<String, bool>,
}

impl Classifier {
    pub fn new(manifest: &Manifest) -> Self {
        Self {
            start_command: manifest.runtime.start_command.clone(),
            restart_command: manifest.runtime.restart_command.clone(),
            slow_threshold_ms: manifest.probe.slow_threshold_ms,
            gateway: manifest.gateway_name().map(str::to_string),
            backend_health: BTreeMap::new(),
        }
    }

    /// Health of each backend as seen by this run's health probes. Backends
    /// missing from the map count as unhealthy.
    pub fn with_backend_health(mut self, health: BTreeMap<String, bool>) -> Self {
        self.backend_health = health;
        self
    }

    pub fn stopped(&self, service: &str) -> Issue {
        self.remediate(
            Issue::new(service, Finding::InstanceStopped),
            &self.start_command,
            Remediation::Start {
                service: service.to_string(),
            },
        )
    }

    pub fn platform_unreachable(&self, reason: impl Into<String>) -> Issue {
        Issue::new(
            PLATFORM_SERVICE,
            Finding::PlatformUnreachable {
                reason: reason.into(),
            },
        )
    }

    pub fn no_source_files(&self, service: &str, dir: impl Into<String>) -> Issue {
        Issue::new(service, Finding::NoSourceFiles { dir: dir.into() })
    }

    pub fn probe(&self, result: &ProbeResult) -> Option<Issue> {
        let ep = &result.endpoint;
        let service = ep.service.as_str();
        let path = ep.path.clone();

        let code = match &result.outcome {
            ProbeOutcome::Transport { kind, detail } => {
                let issue = Issue::new(
                    service,
                    Finding::ServiceUnreachable {
                        path,
                        error: *kind,
                        detail: detail.clone(),
                    },
                );
                return Some(self.restart(issue, service));
            }
            ProbeOutcome::Connected => return self.slow(result),
            ProbeOutcome::Status { code } => *code,
        };

        if ep.is_health() {
            let unhealthy = match &result.health {
                Some(HealthVerdict::Unhealthy { reported }) => Some(reported.clone()),
                _ => None,
            };
            if !(200..300).contains(&code) || unhealthy.is_some() {
                let issue = Issue::new(
                    service,
                    Finding::HealthUnhealthy {
                        path,
                        status: code,
                        reported: unhealthy,
                    },
                );
                return Some(self.restart(issue, service));
            }
            return self.slow(result);
        }

        if (500..600).contains(&code) {
            let finding = if ep.source == EndpointSource::GatewayDerived {
                self.gateway_5xx(path, code, ep.backend.as_deref())
            } else {
                Finding::Http5xx {
                    path,
                    status: code,
                    unhealthy_backends: Vec::new(),
                }
            };
            let stale_gateway = matches!(finding, Finding::GatewayBackendUnreachable { .. });
            let issue = Issue::new(service, finding);
            return Some(if stale_gateway {
                self.restart(issue, service)
            } else {
                issue
            });
        }

        let missing = code == 404 || code == 410;
        let finding = match ep.source {
            EndpointSource::GatewayDerived if code == 404 => Finding::GatewayRouteMissing {
                path,
                backend: ep.backend.clone(),
            },
            EndpointSource::Introspected if missing => {
                Finding::Http4xxUnexpected { path, status: code }
            }
            EndpointSource::Static if missing => Finding::StaticRouteMissing { path, status: code },
            _ if (200..300).contains(&code) => return self.slow(result),
            _ => return None,
        };
        Some(Issue::new(service, finding))
    }

    fn gateway_5xx(&self, path: String, status: u16, backend: Option<&str>) -> Finding {
        let backends: BTreeSet<String> = match backend {
            Some(b) => BTreeSet::from([b.to_string()]),
            None => self
                .backend_health
                .keys()
                .filter(|b| self.gateway.as_deref() != Some(b.as_str()))
                .cloned()
                .collect(),
        };
        let unhealthy: Vec<String> = backends
            .iter()
            .filter(|b| !self.backend_health.get(*b).copied().unwrap_or(false))
            .cloned()
            .collect();

        if !backends.is_empty() && unhealthy.is_empty() {
            Finding::GatewayBackendUnreachable {
                path,
                status,
                backends: backends.into_iter().collect(),
            }
        } else {
            Finding::Http5xx {
                path,
                status,
                unhealthy_backends: unhealthy,
            }
        }
    }

    fn slow(&self, result: &ProbeResult) -> Option<Issue> {
        if self.slow_threshold_ms == 0 || result.latency_ms <= self.slow_threshold_ms {
            return None;
        }
        Some(Issue::new(
            result.endpoint.service.as_str(),
            Finding::SlowResponse {
                path: result.endpoint.path.clone(),
                latency_ms: result.latency_ms,
                threshold_ms: self.slow_threshold_ms,
            },
        ))
    }

    fn restart(&self, issue: Issue, service: &str) -> Issue {
        self.remediate(
            issue,
            &self.restart_command,
            Remediation::Restart {
                service: service.to_string(),
            },
        )
    }

    fn remediate(&self, issue: Issue, template: &[String], remediation: Remediation) -> Issue {
        if template.is_empty() {
            return issue;
        }
        let command = render_template(template, remediation.service());
        issue.with_remediation(remediation, &command)
    }
}

/// Per-service health from this run's health probes: a service is healthy
/// only if every one of its health endpoints is.
pub fn backend_health(results: &[ProbeResult]) -> BTreeMap<String, bool> {
    let mut health: BTreeMap<String, bool> = BTreeMap::new();
    for r in results.iter().filter(|r| r.endpoint.is_health()) {
        let entry = health.entry(r.endpoint.service.clone()).or_insert(true);
        *entry &= r.is_healthy();
    }
    health
}
