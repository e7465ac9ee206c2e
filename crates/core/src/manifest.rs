//! Deployment manifest (`healthgate.toml`).
//!
//! Everything except `[[services]]` has conservative defaults, so a minimal
//! manifest is just a list of services with their addresses.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::DependencyGraph;
use crate::safety::{render_template, validate_remediation_template};

pub const DEFAULT_MANIFEST: &str = "healthgate.toml";

/// Environment variable overriding the gateway's public address.
pub const GATEWAY_URL_ENV: &str = "HEALTHGATE_GATEWAY_URL";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub wait: WaitConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,

    /// Directory relative paths in the manifest are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Prints one running service name per line.
    #[serde(default = "default_list_command")]
    pub list_command: Vec<String>,
    /// Empty disables the `start` remediation.
    #[serde(default = "default_start_command")]
    pub start_command: Vec<String>,
    /// Empty disables the `restart` remediation.
    #[serde(default = "default_restart_command")]
    pub restart_command: Vec<String>,
    #[serde(default = "default_runtime_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_introspection_path")]
    pub introspection_path: String,
    /// 0 disables `slow_response`.
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepairConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_recovery_wait_secs")]
    pub recovery_wait_secs: u64,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateConfig {
    /// Shell-expanded by the runner.
    #[serde(default = "default_state_dir")]
    pub dir: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Name of the `[[services]]` entry that is the gateway.
    pub service: String,
    /// Address public routes are probed on. Defaults to the service address.
    #[serde(default)]
    pub public_address: Option<String>,
    /// nginx-style forwarding config to derive routes from.
    #[serde(default)]
    pub config_path: Option<String>,
    /// Extra routes, for gateways whose config cannot be parsed.
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

/// Scheme of services checked by opening a TCP connection, e.g. datastores.
pub const TCP_SCHEME: &str = "tcp://";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    /// `http(s)://host:port`, or `tcp://host:port` for a connectivity check.
    pub address: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Checked for source files before probing.
    #[serde(default)]
    pub source_dir: Option<String>,
    /// Query the introspection path for the live route table.
    #[serde(default)]
    pub introspect: bool,
    #[serde(default)]
    pub static_routes: Vec<RouteSpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteSpec {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    /// Backend service a gateway route forwards to.
    #[serde(default)]
    pub backend: Option<String>,
}

impl ServiceSpec {
    /// Checked by connecting only; has no HTTP surface.
    pub fn is_tcp(&self) -> bool {
        self.address.starts_with(TCP_SCHEME)
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn default_list_command() -> Vec<String> {
    argv(&["docker-compose", "ps", "--services", "--filter", "status=running"])
}
fn default_start_command() -> Vec<String> {
    argv(&["docker-compose", "up", "-d", "{service}"])
}
fn default_restart_command() -> Vec<String> {
    argv(&["docker-compose", "restart", "{service}"])
}
fn default_runtime_timeout_ms() -> u64 {
    5_000
}
fn default_probe_timeout_ms() -> u64 {
    5_000
}
fn default_concurrency() -> usize {
    8
}
fn default_introspection_path() -> String {
    "/debug/routes".to_string()
}
fn default_slow_threshold_ms() -> u64 {
    2_000
}
fn default_max_wait_secs() -> u64 {
    120
}
fn default_backoff_step_ms() -> u64 {
    1_000
}
fn default_settle_delay_ms() -> u64 {
    5_000
}
fn default_recovery_wait_secs() -> u64 {
    60
}
fn default_command_timeout_ms() -> u64 {
    60_000
}
fn default_state_dir() -> String {
    "~/.healthgate".to_string()
}
fn default_health_path() -> String {
    "/health".to_string()
}
fn default_method() -> String {
    "GET".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            list_command: default_list_command(),
            start_command: default_start_command(),
            restart_command: default_restart_command(),
            timeout_ms: default_runtime_timeout_ms(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_probe_timeout_ms(),
            concurrency: default_concurrency(),
            introspection_path: default_introspection_path(),
            slow_threshold_ms: default_slow_threshold_ms(),
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: default_max_wait_secs(),
            backoff_step_ms: default_backoff_step_ms(),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            recovery_wait_secs: default_recovery_wait_secs(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

/// `HEALTHGATE_<SERVICE>_URL`, upper-cased with `-` and `.` mapped to `_`.
pub fn env_key(service: &str) -> String {
    let name: String = service
        .chars()
        .map(|c| match c {
            '-' | '.' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    format!("HEALTHGATE_{name}_URL")
}

impl Manifest {
    /// Read, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest = Self::from_toml_str(&text)?;
        manifest.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        manifest.apply_env_overrides(|key| std::env::var(key).ok());
        manifest.validate()?;
        tracing::debug!(
            path = %path.display(),
            services = manifest.services.len(),
            "manifest loaded"
        );
        Ok(manifest)
    }

    /// Parse only; call [`Manifest::validate`] before use.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for svc in &mut self.services {
            if let Some(url) = lookup(&env_key(&svc.name)).filter(|u| !u.trim().is_empty()) {
                tracing::debug!(service = %svc.name, %url, "address overridden from environment");
                svc.address = url.trim().to_string();
            }
        }
        if let Some(gw) = &mut self.gateway {
            if let Some(url) = lookup(GATEWAY_URL_ENV).filter(|u| !u.trim().is_empty()) {
                gw.public_address = Some(url.trim().to_string());
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.services.is_empty() {
            return Err(ConfigError::NoServices);
        }

        let mut names = BTreeSet::new();
        for svc in &self.services {
            if svc.name.trim().is_empty() {
                return Err(invalid("services.name", "must not be empty"));
            }
            if !names.insert(svc.name.as_str()) {
                return Err(ConfigError::DuplicateService(svc.name.clone()));
            }
            let field = format!("services.{}.address", svc.name);
            if svc.is_tcp() {
                check_tcp_service(&field, svc)?;
            } else {
                check_address(&field, &svc.address)?;
            }
            check_path(&format!("services.{}.health_path", svc.name), &svc.health_path)?;
            for route in &svc.static_routes {
                check_path(&format!("services.{}.static_routes", svc.name), &route.path)?;
            }
        }

        for svc in &self.services {
            for dep in &svc.depends_on {
                if !names.contains(dep.as_str()) {
                    return Err(ConfigError::UnknownDependency {
                        service: svc.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        if let Some(gw) = &self.gateway {
            let Some(gateway) = self.service(&gw.service) else {
                return Err(ConfigError::UnknownGateway(gw.service.clone()));
            };
            if gateway.is_tcp() {
                return Err(invalid(
                    &format!("services.{}.address", gw.service),
                    "the gateway must be an http(s) service",
                ));
            }
            if let Some(addr) = &gw.public_address {
                check_address("gateway.public_address", addr)?;
            }
            for route in &gw.routes {
                check_path("gateway.routes", &route.path)?;
                if let Some(backend) = &route.backend {
                    if !names.contains(backend.as_str()) {
                        return Err(ConfigError::UnknownDependency {
                            service: gw.service.clone(),
                            dependency: backend.clone(),
                        });
                    }
                }
            }
        }

        if self.runtime.list_command.is_empty() {
            return Err(invalid("runtime.list_command", "must not be empty"));
        }
        if !self.runtime.start_command.is_empty() {
            validate_remediation_template("start_command", &self.runtime.start_command)?;
        }
        if !self.runtime.restart_command.is_empty() {
            validate_remediation_template("restart_command", &self.runtime.restart_command)?;
        }

        if self.probe.concurrency == 0 {
            return Err(invalid("probe.concurrency", "must be at least 1"));
        }
        if self.probe.timeout_ms == 0 {
            return Err(invalid("probe.timeout_ms", "must be positive"));
        }
        if self.runtime.timeout_ms == 0 {
            return Err(invalid("runtime.timeout_ms", "must be positive"));
        }
        check_path("probe.introspection_path", &self.probe.introspection_path)?;

        DependencyGraph::from_manifest(self)?;
        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    pub fn gateway_name(&self) -> Option<&str> {
        self.gateway.as_ref().map(|g| g.service.as_str())
    }

    pub fn is_gateway(&self, service: &str) -> bool {
        self.gateway_name() == Some(service)
    }

    /// Address gateway-derived routes are sent to.
    pub fn gateway_address(&self) -> Option<String> {
        let gw = self.gateway.as_ref()?;
        gw.public_address
            .clone()
            .or_else(|| self.service(&gw.service).map(|s| s.address.clone()))
    }

    /// Resolve a manifest-relative path.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    pub fn start_command(&self, service: &str) -> Option<Vec<String>> {
        (!self.runtime.start_command.is_empty())
            .then(|| render_template(&self.runtime.start_command, service))
    }

    pub fn restart_command(&self, service: &str) -> Option<Vec<String>> {
        (!self.runtime.restart_command.is_empty())
            .then(|| render_template(&self.runtime.restart_command, service))
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn check_address(field: &str, address: &str) -> Result<(), ConfigError> {
    if address.starts_with("http://") || address.starts_with("https://") {
        Ok(())
    } else {
        Err(invalid(field, &format!("'{address}' is not an http(s) URL")))
    }
}

fn check_tcp_service(field: &str, svc: &ServiceSpec) -> Result<(), ConfigError> {
    let authority = &svc.address[TCP_SCHEME.len()..];
    let port = authority.rsplit_once(':').map(|(host, port)| (host, port.parse::<u16>()));
    if !matches!(port, Some((host, Ok(_))) if !host.is_empty()) {
        return Err(invalid(field, &format!("'{}' is not tcp://host:port", svc.address)));
    }
    if svc.introspect || !svc.static_routes.is_empty() {
        return Err(invalid(field, "tcp services take no introspection or static routes"));
    }
    Ok(())
}

fn check_path(field: &str, path: &str) -> Result<(), ConfigError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(invalid(field, &format!("'{path}' must start with '/'")))
    }
}
