use healthgate_core::graph::DependencyGraph;
use healthgate_core::manifest::{env_key, Manifest};
use healthgate_core::ConfigError;

const MANIFEST: &str = r#"
[probe]
timeout_ms = 2000

[gateway]
service = "nginx"
public_address = "http://localhost:3000"

[[services]]
name = "postgres"
address = "http://localhost:5433"

[[services]]
name = "portal"
address = "http://localhost:3001"
depends_on = ["postgres"]
introspect = true
static_routes = [{ path = "/" }, { method = "post", path = "/login" }]

[[services]]
name = "review-api"
address = "http://localhost:8081"
health_path = "/healthz"
depends_on = ["postgres"]

[[services]]
name = "nginx"
address = "http://localhost:8080"
depends_on = ["portal", "review-api"]
"#;

fn parse(text: &str) -> Manifest {
    Manifest::from_toml_str(text).unwrap()
}

#[test]
fn defaults_fill_unset_sections() {
    let m = parse(MANIFEST);
    m.validate().unwrap();
    assert_eq!(m.probe.timeout_ms, 2000);
    assert_eq!(m.probe.concurrency, 8);
    assert_eq!(m.probe.introspection_path, "/debug/routes");
    assert_eq!(m.wait.max_wait_secs, 120);
    assert_eq!(m.repair.settle_delay_ms, 5000);
    assert_eq!(m.repair.recovery_wait_secs, 60);
    assert_eq!(m.state.dir, "~/.healthgate");
    assert_eq!(m.service("portal").unwrap().health_path, "/health");
    assert_eq!(m.service("review-api").unwrap().health_path, "/healthz");
    assert_eq!(m.service("portal").unwrap().static_routes[0].method, "GET");
}

#[test]
fn env_overrides_addresses() {
    let mut m = parse(MANIFEST);
    assert_eq!(env_key("review-api"), "HEALTHGATE_REVIEW_API_URL");
    m.apply_env_overrides(|k| match k {
        "HEALTHGATE_REVIEW_API_URL" => Some("http://10.0.0.5:9000".into()),
        "HEALTHGATE_GATEWAY_URL" => Some("https://edge.example".into()),
        _ => None,
    });
    assert_eq!(m.service("review-api").unwrap().address, "http://10.0.0.5:9000");
    assert_eq!(m.service("portal").unwrap().address, "http://localhost:3001");
    assert_eq!(m.gateway_address().as_deref(), Some("https://edge.example"));
}

#[test]
fn renders_remediation_commands() {
    let m = parse(MANIFEST);
    assert_eq!(
        m.restart_command("nginx").unwrap(),
        vec!["docker-compose", "restart", "nginx"]
    );
    assert_eq!(
        m.start_command("portal").unwrap(),
        vec!["docker-compose", "up", "-d", "portal"]
    );
}

#[test]
fn empty_remediation_template_disables_it() {
    let text = format!("[runtime]\nrestart_command = []\n{MANIFEST}");
    let m = parse(&text);
    m.validate().unwrap();
    assert!(m.restart_command("portal").is_none());
    assert!(m.start_command("portal").is_some());
}

#[test]
fn rejects_unknown_dependency() {
    let m = parse(
        r#"
[[services]]
name = "api"
address = "http://localhost:1"
depends_on = ["cache"]
"#,
    );
    assert!(matches!(
        m.validate(),
        Err(ConfigError::UnknownDependency { dependency, .. }) if dependency == "cache"
    ));
}

#[test]
fn rejects_cycles_before_anything_else_runs() {
    let m = parse(
        r#"
[[services]]
name = "a"
address = "http://localhost:1"
depends_on = ["b"]

[[services]]
name = "b"
address = "http://localhost:2"
depends_on = ["c"]

[[services]]
name = "c"
address = "http://localhost:3"
depends_on = ["a"]
"#,
    );
    match m.validate() {
        Err(ConfigError::DependencyCycle(path)) => {
            assert_eq!(path.first(), path.last());
            assert_eq!(path.len(), 4);
        }
        other => panic!("expected cycle, got {other:?}"),
    }
}

#[test]
fn rejects_unsafe_remediation_templates() {
    let text = format!(
        "[runtime]\nrestart_command = [\"bash\", \"-c\", \"restart {{service}}\"]\n{MANIFEST}"
    );
    assert!(matches!(
        parse(&text).validate(),
        Err(ConfigError::UnsafeRemediation { .. })
    ));

    let text = format!(
        "[runtime]\nrestart_command = [\"docker-compose\", \"down\", \"{{service}}\"]\n{MANIFEST}"
    );
    assert!(matches!(
        parse(&text).validate(),
        Err(ConfigError::UnsafeRemediation { .. })
    ));
}

#[test]
fn rejects_structural_mistakes() {
    assert!(matches!(parse("").validate(), Err(ConfigError::NoServices)));

    let dup = r#"
[[services]]
name = "a"
address = "http://localhost:1"
[[services]]
name = "a"
address = "http://localhost:2"
"#;
    assert!(matches!(parse(dup).validate(), Err(ConfigError::DuplicateService(n)) if n == "a"));

    let gw = r#"
[gateway]
service = "edge"
[[services]]
name = "a"
address = "http://localhost:1"
"#;
    assert!(matches!(parse(gw).validate(), Err(ConfigError::UnknownGateway(_))));

    let zero = r#"
[probe]
concurrency = 0
[[services]]
name = "a"
address = "http://localhost:1"
"#;
    assert!(matches!(parse(zero).validate(), Err(ConfigError::Invalid { .. })));

    let bad_addr = r#"
[[services]]
name = "a"
address = "localhost:1"
"#;
    assert!(matches!(parse(bad_addr).validate(), Err(ConfigError::Invalid { .. })));

    assert!(matches!(
        Manifest::from_toml_str("[[services]\nname ="),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn load_resolves_relative_paths_against_manifest_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path();
    let path = dir.join("healthgate.toml");
    std::fs::write(&path, MANIFEST).unwrap();

    let m = Manifest::load(&path).unwrap();
    assert_eq!(m.resolve("docker/nginx.conf"), dir.join("docker/nginx.conf"));
    assert_eq!(
        m.resolve("/etc/nginx/nginx.conf"),
        std::path::PathBuf::from("/etc/nginx/nginx.conf")
    );

    let graph = DependencyGraph::from_manifest(&m).unwrap();
    assert_eq!(graph.gateway(), Some("nginx"));
}

#[test]
fn load_reports_missing_file() {
    let err = Manifest::load(std::path::Path::new("/nonexistent/healthgate.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn tcp_services_are_connectivity_only() {
    let ok = r#"
[[services]]
name = "postgres"
address = "tcp://localhost:5432"
"#;
    let manifest = parse(ok);
    manifest.validate().unwrap();
    assert!(manifest.service("postgres").unwrap().is_tcp());

    for bad in [
        "address = \"tcp://localhost\"",
        "address = \"tcp://:5432\"",
        "address = \"tcp://localhost:5432\"\nintrospect = true",
        "address = \"tcp://localhost:5432\"\nstatic_routes = [{ path = \"/\" }]",
    ] {
        let text = format!("[[services]]\nname = \"postgres\"\n{bad}\n");
        assert!(
            matches!(parse(&text).validate(), Err(ConfigError::Invalid { .. })),
            "{bad} should be rejected"
        );
    }

    let tcp_gateway = r#"
[gateway]
service = "edge"
[[services]]
name = "edge"
address = "tcp://localhost:80"
"#;
    assert!(matches!(parse(tcp_gateway).validate(), Err(ConfigError::Invalid { .. })));
}
