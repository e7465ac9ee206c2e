#![allow(dead_code)]

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use healthgate_core::manifest::Manifest;
use healthgate_runner::{CommandOutcome, RunContext, RunOptions, Runtime, RuntimeError, StateStore};

/// Runtime and probe settings small enough for tests. Services, gateway and
/// overrides are appended by each test.
pub const FAST: &str = r#"
[runtime]
list_command = ["compose", "ps"]
start_command = ["compose", "up", "{service}"]
restart_command = ["compose", "restart", "{service}"]

[probe]
timeout_ms = 400
concurrency = 4
slow_threshold_ms = 0

[wait]
max_wait_secs = 2
backoff_step_ms = 50

[repair]
settle_delay_ms = 10
recovery_wait_secs = 1
command_timeout_ms = 1000
"#;

type Hook = Box<dyn Fn(&[String]) + Send + Sync>;

/// In-memory runtime. `compose up <svc>` marks the service running; every
/// command is recorded and handed to the optional hook.
pub struct FakeRuntime {
    running: Mutex<BTreeSet<String>>,
    unreachable: bool,
    fail_commands: bool,
    executed: Mutex<Vec<Vec<String>>>,
    hook: Option<Hook>,
}

impl FakeRuntime {
    pub fn with_running(names: &[&str]) -> Self {
        Self {
            running: Mutex::new(names.iter().map(|s| s.to_string()).collect()),
            unreachable: false,
            fail_commands: false,
            executed: Mutex::new(Vec::new()),
            hook: None,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::with_running(&[])
        }
    }

    pub fn failing_commands(mut self) -> Self {
        self.fail_commands = true;
        self
    }

    pub fn on_execute(mut self, hook: impl Fn(&[String]) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn executed(&self) -> Vec<Vec<String>> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn running_services(&self) -> Result<BTreeSet<String>, RuntimeError> {
        if self.unreachable {
            return Err(RuntimeError::Failed {
                program: "compose".into(),
                code: Some(1),
                stderr: "Cannot connect to the Docker daemon".into(),
            });
        }
        Ok(self.running.lock().unwrap().clone())
    }

    async fn execute(
        &self,
        argv: &[String],
        _timeout: Duration,
    ) -> Result<CommandOutcome, RuntimeError> {
        self.executed.lock().unwrap().push(argv.to_vec());
        if let Some(hook) = &self.hook {
            hook(argv);
        }
        if self.fail_commands {
            return Ok(CommandOutcome {
                argv: argv.to_vec(),
                code: Some(1),
                stdout: String::new(),
                stderr: "no such service".into(),
                duration_ms: 1,
            });
        }
        if argv.get(1).map(String::as_str) == Some("up") {
            if let Some(service) = argv.get(2) {
                self.running.lock().unwrap().insert(service.clone());
            }
        }
        Ok(CommandOutcome {
            argv: argv.to_vec(),
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 1,
        })
    }
}

/// Serve `router` on an ephemeral local port; returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// An address nothing listens on.
pub async fn closed_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// A listener that accepts connections and never answers. Keep the returned
/// handle alive for the duration of the test.
pub async fn hung_address() -> (String, tokio::net::TcpListener) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (format!("http://{addr}"), listener)
}

/// Health endpoint whose answer follows `healthy`.
pub fn toggled_health(healthy: Arc<AtomicBool>) -> Router {
    Router::new().route(
        "/health",
        axum::routing::get(move || {
            let healthy = healthy.clone();
            async move {
                if healthy.load(Ordering::SeqCst) {
                    axum::Json(serde_json::json!({ "status": "ok" }))
                } else {
                    axum::Json(serde_json::json!({ "status": "unhealthy", "db": "down" }))
                }
            }
        }),
    )
}

pub fn healthy_service() -> Router {
    Router::new().route(
        "/health",
        axum::routing::get(|| async { axum::Json(serde_json::json!({ "status": "ok" })) }),
    )
}

pub fn context(
    manifest_toml: &str,
    runtime: Arc<FakeRuntime>,
    state: &Path,
    options: RunOptions,
) -> RunContext {
    let mut manifest = Manifest::from_toml_str(manifest_toml).unwrap();
    manifest.base_dir = state.to_path_buf();
    manifest.validate().unwrap();
    RunContext::new(manifest, runtime, StateStore::new(state.join("state")), options).unwrap()
}
