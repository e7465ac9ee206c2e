//! Endpoint discovery.
//!
//! Services that opt into introspection are asked for their live route table;
//! a structured answer is trusted as-is. Anything else falls back to the
//! manifest's static routes and downgrades the service's confidence.

use std::time::Duration;

use healthgate_core::manifest::ServiceSpec;
use healthgate_core::{
    dedup_endpoints, ConfidenceLevel, DiscoveryConfidence, Endpoint, EndpointSource,
};
use serde::Deserialize;

use crate::context::RunContext;
use crate::util::bounded;

#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
    pub service: String,
    pub endpoints: Vec<Endpoint>,
    pub confidence: DiscoveryConfidence,
}

#[derive(Debug, Deserialize)]
struct RouteEntry {
    #[serde(default = "default_method")]
    method: String,
    path: String,
}

fn default_method() -> String {
    "GET".to_string()
}

/// `{"service": "...", "count": N, "routes": [...]}` or a bare route list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntrospectionPayload {
    Table {
        #[serde(default)]
        service: Option<String>,
        #[serde(default)]
        count: Option<usize>,
        routes: Vec<RouteEntry>,
    },
    Bare(Vec<RouteEntry>),
}

impl IntrospectionPayload {
    fn into_routes(self, service: &str) -> Vec<RouteEntry> {
        match self {
            IntrospectionPayload::Table {
                service: reported,
                count,
                routes,
            } => {
                if let Some(reported) = reported.filter(|r| r != service) {
                    tracing::debug!(
                        %service,
                        %reported,
                        "introspection reports a different service name"
                    );
                }
                if let Some(count) = count.filter(|c| *c != routes.len()) {
                    tracing::debug!(
                        %service,
                        count,
                        listed = routes.len(),
                        "introspection count mismatch"
                    );
                }
                routes
            }
            IntrospectionPayload::Bare(routes) => routes,
        }
    }
}

/// Outcome of asking one service for its route table.
#[derive(Debug)]
pub enum Introspection {
    Routes(Vec<Endpoint>),
    /// Why the static list has to stand in.
    Unavailable(String),
}

/// Interpret an introspection response. `status` is the HTTP status.
pub fn interpret_introspection(
    service: &str,
    introspection_path: &str,
    status: u16,
    body: &[u8],
) -> Introspection {
    if matches!(status, 403 | 404 | 410) {
        return Introspection::Unavailable(format!("introspection disabled (HTTP {status})"));
    }
    if !(200..300).contains(&status) {
        return Introspection::Unavailable(format!("introspection returned HTTP {status}"));
    }
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return Introspection::Unavailable(format!("undecodable introspection body: {e}")),
    };
    if value.get("disabled").and_then(|d| d.as_bool()) == Some(true) {
        return Introspection::Unavailable("introspection disabled by service".to_string());
    }
    let payload: IntrospectionPayload = match serde_json::from_value(value) {
        Ok(p) => p,
        Err(e) => return Introspection::Unavailable(format!("unexpected introspection shape: {e}")),
    };
    let endpoints = payload
        .into_routes(service)
        .into_iter()
        .filter(|r| r.path.starts_with('/') && r.path != introspection_path)
        .map(|r| Endpoint::route(service, &r.method, r.path, EndpointSource::Introspected))
        .collect();
    Introspection::Routes(endpoints)
}

async fn introspect(
    client: reqwest::Client,
    service: String,
    url: String,
    introspection_path: String,
    timeout: Duration,
) -> Introspection {
    let fetch = async {
        let resp = client.get(&url).send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?;
        Ok::<_, reqwest::Error>((status, body))
    };
    match tokio::time::timeout(timeout, fetch).await {
        Ok(Ok((status, body))) => {
            interpret_introspection(&service, &introspection_path, status, &body)
        }
        Ok(Err(e)) => Introspection::Unavailable(format!("introspection request failed: {e}")),
        Err(_) => Introspection::Unavailable(format!(
            "introspection timed out after {}ms",
            timeout.as_millis()
        )),
    }
}

fn static_endpoints(spec: &ServiceSpec) -> Vec<Endpoint> {
    spec.static_routes
        .iter()
        .map(|r| Endpoint::route(&spec.name, &r.method, &r.path, EndpointSource::Static))
        .collect()
}

/// Merge discovered routes with the health endpoint and dedup.
fn assemble(
    spec: &ServiceSpec,
    routes: Vec<Endpoint>,
    confidence: DiscoveryConfidence,
) -> ServiceEndpoints {
    let endpoints = dedup_endpoints(
        std::iter::once(Endpoint::health(&spec.name, &spec.health_path)).chain(routes),
    );
    ServiceEndpoints {
        service: spec.name.clone(),
        endpoints,
        confidence,
    }
}

/// Discover endpoints for the named services, introspecting through the
/// bounded pool. Unknown names are skipped.
pub async fn discover(ctx: &RunContext, services: &[String]) -> Vec<ServiceEndpoints> {
    let mut out = Vec::new();
    let mut to_introspect = Vec::new();

    for name in services {
        let Some(spec) = ctx.manifest.service(name) else {
            continue;
        };
        if ctx.manifest.is_gateway(name) {
            let mut routes = ctx.gateway_endpoints.clone();
            routes.extend(static_endpoints(spec));
            let confidence = if ctx.gateway_endpoints.is_empty() {
                DiscoveryConfidence::because(ConfidenceLevel::Static, "no forwarding routes found")
            } else {
                DiscoveryConfidence::new(ConfidenceLevel::GatewayDerived)
            };
            out.push(assemble(spec, routes, confidence));
        } else if spec.introspect {
            to_introspect.push(spec.clone());
        } else {
            out.push(assemble(
                spec,
                static_endpoints(spec),
                DiscoveryConfidence::new(ConfidenceLevel::Static),
            ));
        }
    }

    let path = ctx.manifest.probe.introspection_path.clone();
    let timeout = ctx.probe_timeout();
    let client = ctx.client.clone();
    let answers = bounded(to_introspect.clone(), ctx.concurrency(), |spec| {
        let url = format!("{}{}", spec.address.trim_end_matches('/'), path);
        introspect(client.clone(), spec.name, url, path.clone(), timeout)
    })
    .await;

    for (spec, answer) in to_introspect.iter().zip(answers) {
        let discovered = match answer {
            Introspection::Routes(routes) => {
                tracing::debug!(service = %spec.name, routes = routes.len(), "routes introspected");
                assemble(spec, routes, DiscoveryConfidence::new(ConfidenceLevel::Introspected))
            }
            Introspection::Unavailable(reason) => {
                tracing::info!(service = %spec.name, %reason, "falling back to static routes");
                assemble(
                    spec,
                    static_endpoints(spec),
                    DiscoveryConfidence::because(ConfidenceLevel::StaticFallback, reason),
                )
            }
        };
        out.push(discovered);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_table_and_bare_payloads() {
        let table = br#"{"service":"portal","count":2,"routes":[
            {"method":"GET","path":"/"},{"method":"POST","path":"/login","handler":"x"}]}"#;
        let answer = interpret_introspection("portal", "/debug/routes", 200, table);
        let Introspection::Routes(eps) = answer else {
            panic!("expected routes");
        };
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[1].method, "POST");

        let bare = br#"[{"path":"/a"},{"method":"get","path":"/debug/routes"}]"#;
        let answer = interpret_introspection("portal", "/debug/routes", 200, bare);
        let Introspection::Routes(eps) = answer else {
            panic!("expected routes");
        };
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].source, EndpointSource::Introspected);
    }

    #[test]
    fn disabled_or_broken_introspection_falls_back() {
        for (status, body) in [
            (404, &b""[..]),
            (403, &b""[..]),
            (200, &br#"{"disabled":true}"#[..]),
            (200, &b"<html>"[..]),
            (200, &br#"{"routes":"nope"}"#[..]),
            (500, &b""[..]),
        ] {
            assert!(matches!(
                interpret_introspection("svc", "/debug/routes", status, body),
                Introspection::Unavailable(_)
            ));
        }
    }
}
