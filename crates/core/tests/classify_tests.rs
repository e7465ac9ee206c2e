use std::collections::BTreeMap;

use healthgate_core::classify::{backend_health, Classifier};
use healthgate_core::manifest::Manifest;
use healthgate_core::{
    Endpoint, EndpointSource, Finding, HealthVerdict, IssueKind, ProbeOutcome, ProbeResult,
    Remediation, Severity, TransportErrorKind, SERVICE_TARGET,
};

const MANIFEST: &str = r#"
[probe]
slow_threshold_ms = 1000

[gateway]
service = "nginx"

[[services]]
name = "portal"
address = "http://localhost:3001"

[[services]]
name = "review"
address = "http://localhost:8081"

[[services]]
name = "nginx"
address = "http://localhost:8080"
"#;

fn classifier() -> Classifier {
    Classifier::new(&Manifest::from_toml_str(MANIFEST).unwrap())
}

fn result(endpoint: Endpoint, code: u16) -> ProbeResult {
    ProbeResult {
        url: format!("http://test{}", endpoint.path),
        endpoint,
        outcome: ProbeOutcome::Status { code },
        latency_ms: 10,
        at_ms: 0,
        health: None,
    }
}

fn gateway_route(path: &str, backend: &str) -> Endpoint {
    Endpoint::route("nginx", "GET", path, EndpointSource::GatewayDerived)
        .with_backend(Some(backend.to_string()))
}

#[test]
fn success_raises_nothing() {
    let c = classifier();
    for code in [200, 204, 301, 401, 403, 405, 422] {
        let r = result(Endpoint::route("portal", "GET", "/", EndpointSource::Introspected), code);
        assert!(c.probe(&r).is_none(), "status {code} should not raise");
    }
}

#[test]
fn health_failures_are_restartable() {
    let c = classifier();
    let issue = c.probe(&result(Endpoint::health("portal", "/health"), 503)).unwrap();
    assert_eq!(issue.kind(), IssueKind::HealthUnhealthy);
    assert_eq!(issue.key.target, "/health");
    assert!(issue.auto_fixable);
    assert_eq!(issue.fix_command.as_deref(), Some("docker-compose restart portal"));

    let mut degraded = result(Endpoint::health("portal", "/health"), 200);
    degraded.health = Some(HealthVerdict::Unhealthy {
        reported: "degraded-db".into(),
    });
    let issue = c.probe(&degraded).unwrap();
    assert!(matches!(
        issue.detail,
        Finding::HealthUnhealthy { status: 200, reported: Some(ref r), .. } if r == "degraded-db"
    ));
}

#[test]
fn transport_failure_is_service_level() {
    let c = classifier();
    let r = ProbeResult {
        outcome: ProbeOutcome::Transport {
            kind: TransportErrorKind::Timeout,
            detail: "deadline elapsed".into(),
        },
        ..result(Endpoint::route("review", "GET", "/api", EndpointSource::Static), 0)
    };
    let issue = c.probe(&r).unwrap();
    assert_eq!(issue.kind(), IssueKind::ServiceUnreachable);
    assert_eq!(issue.key.target, SERVICE_TARGET);
    assert_eq!(
        issue.remediation,
        Some(Remediation::Restart {
            service: "review".into()
        })
    );
}

#[test]
fn route_404_depends_on_where_the_route_came_from() {
    let c = classifier();
    let introspected = c
        .probe(&result(Endpoint::route("portal", "GET", "/api", EndpointSource::Introspected), 404))
        .unwrap();
    assert_eq!(introspected.kind(), IssueKind::Http4xxUnexpected);
    assert_eq!(introspected.severity, Severity::Error);
    assert!(!introspected.auto_fixable);

    let declared = c
        .probe(&result(Endpoint::route("portal", "GET", "/old", EndpointSource::Static), 410))
        .unwrap();
    assert_eq!(declared.kind(), IssueKind::StaticRouteMissing);
    assert_eq!(declared.severity, Severity::Warning);

    let gw = c.probe(&result(gateway_route("/review/", "review"), 404)).unwrap();
    assert_eq!(gw.kind(), IssueKind::GatewayRouteMissing);
    assert!(!gw.auto_fixable);
}

#[test]
fn gateway_5xx_with_healthy_backend_is_stale_routing() {
    let c = classifier().with_backend_health(BTreeMap::from([
        ("portal".to_string(), true),
        ("review".to_string(), true),
    ]));
    let issue = c.probe(&result(gateway_route("/review/", "review"), 502)).unwrap();
    assert_eq!(issue.kind(), IssueKind::GatewayBackendUnreachable);
    assert_eq!(issue.service(), "nginx");
    assert_eq!(issue.fix_command.as_deref(), Some("docker-compose restart nginx"));
}

#[test]
fn gateway_5xx_with_unhealthy_backend_blames_the_backend() {
    let c = classifier().with_backend_health(BTreeMap::from([
        ("portal".to_string(), true),
        ("review".to_string(), false),
    ]));
    let issue = c.probe(&result(gateway_route("/review/", "review"), 502)).unwrap();
    assert_eq!(issue.kind(), IssueKind::Http5xx);
    assert!(!issue.auto_fixable);
    match issue.detail {
        Finding::Http5xx {
            unhealthy_backends, ..
        } => assert_eq!(unhealthy_backends, vec!["review".to_string()]),
        other => panic!("unexpected finding {other:?}"),
    }
}

#[test]
fn gateway_5xx_with_unprobed_backend_is_not_blamed_on_gateway() {
    let c = classifier();
    let issue = c.probe(&result(gateway_route("/review/", "review"), 504)).unwrap();
    assert_eq!(issue.kind(), IssueKind::Http5xx);
}

#[test]
fn slow_success_is_a_warning() {
    let c = classifier();
    let mut r = result(Endpoint::route("portal", "GET", "/", EndpointSource::Static), 200);
    r.latency_ms = 1500;
    let issue = c.probe(&r).unwrap();
    assert_eq!(issue.kind(), IssueKind::SlowResponse);
    assert_eq!(issue.severity, Severity::Warning);

    r.latency_ms = 1000;
    assert!(c.probe(&r).is_none());
}

#[test]
fn stopped_and_platform_issues() {
    let c = classifier();
    let stopped = c.stopped("review");
    assert_eq!(stopped.key.to_string(), "review:instance_stopped:-");
    assert_eq!(stopped.fix_command.as_deref(), Some("docker-compose up -d review"));

    let platform = c.platform_unreachable("docker-compose: not found");
    assert_eq!(platform.kind(), IssueKind::PlatformUnreachable);
    assert!(!platform.auto_fixable);

    let src = c.no_source_files("portal", "cmd/portal");
    assert_eq!(src.kind(), IssueKind::NoSourceFiles);
    assert!(src.is_error());
}

#[test]
fn backend_health_requires_every_health_probe() {
    let mut bad = result(Endpoint::health("review", "/ready"), 200);
    bad.health = Some(HealthVerdict::Unhealthy {
        reported: "down".into(),
    });
    let results = vec![
        result(Endpoint::health("portal", "/health"), 200),
        result(Endpoint::health("review", "/health"), 200),
        bad,
        result(Endpoint::route("nginx", "GET", "/", EndpointSource::GatewayDerived), 200),
    ];
    let health = backend_health(&results);
    assert_eq!(health.get("portal"), Some(&true));
    assert_eq!(health.get("review"), Some(&false));
    assert!(!health.contains_key("nginx"));
}

#[test]
fn accepted_connection_counts_as_healthy() {
    let c = classifier();
    let connected = |latency_ms| ProbeResult {
        url: "tcp://localhost:5432".into(),
        endpoint: Endpoint::health("portal", "/health"),
        outcome: ProbeOutcome::Connected,
        latency_ms,
        at_ms: 0,
        health: None,
    };
    assert!(connected(5).is_healthy());
    assert!(c.probe(&connected(5)).is_none());
    let slow = c.probe(&connected(1500)).unwrap();
    assert_eq!(slow.kind(), IssueKind::SlowResponse);
}
