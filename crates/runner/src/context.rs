use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use healthgate_core::gateway::{parse_forwarding_config, GatewayRoute};
use healthgate_core::graph::DependencyGraph;
use healthgate_core::manifest::Manifest;
use healthgate_core::{ConfigError, Endpoint, EndpointSource, IssueKey, RunMode};

use crate::runtime::Runtime;
use crate::store::StateStore;
use crate::util::ms;

/// Per-invocation switches, usually straight from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub wait: bool,
    /// Overrides `wait.max_wait_secs`.
    pub max_wait: Option<Duration>,
    pub retest: bool,
    /// Keys to retest; empty means every error key of the latest run.
    pub only: Vec<IssueKey>,
    /// Ignore the baseline and rediscover everything.
    pub full: bool,
    pub autofix: bool,
    pub dry_run: bool,
    pub progressive: bool,
    pub diff: bool,
}

impl RunOptions {
    pub fn mode(&self) -> RunMode {
        RunMode {
            retest: self.retest && !self.full,
            wait: self.wait,
            autofix: self.autofix,
            dry_run: self.dry_run,
            progressive: self.progressive,
        }
    }
}

/// Everything one validation run needs. Built once per invocation.
pub struct RunContext {
    pub manifest: Manifest,
    pub graph: DependencyGraph,
    /// Gateway routes from the forwarding config and the manifest, as
    /// gateway-derived endpoints.
    pub gateway_endpoints: Vec<Endpoint>,
    pub client: reqwest::Client,
    pub runtime: Arc<dyn Runtime>,
    pub store: StateStore,
    pub options: RunOptions,
}

impl RunContext {
    pub fn new(
        manifest: Manifest,
        runtime: Arc<dyn Runtime>,
        store: StateStore,
        options: RunOptions,
    ) -> Result<Self> {
        let mut graph = DependencyGraph::from_manifest(&manifest)?;

        let routes = load_gateway_routes(&manifest)?;
        let names = manifest.service_names();
        let gateway_endpoints = gateway_endpoints(&manifest, &routes, &names);
        graph.add_gateway_backends(gateway_endpoints.iter().filter_map(|e| e.backend.as_deref()));

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("healthgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;

        Ok(Self {
            manifest,
            graph,
            gateway_endpoints,
            client,
            runtime,
            store,
            options,
        })
    }

    pub fn probe_timeout(&self) -> Duration {
        ms(self.manifest.probe.timeout_ms)
    }

    pub fn concurrency(&self) -> usize {
        self.manifest.probe.concurrency
    }

    pub fn wait_budget(&self) -> Duration {
        self.options
            .max_wait
            .unwrap_or_else(|| Duration::from_secs(self.manifest.wait.max_wait_secs))
    }

    pub fn backoff_step(&self) -> Duration {
        ms(self.manifest.wait.backoff_step_ms)
    }

    /// Base URL an endpoint is requested against.
    pub fn base_url(&self, endpoint: &Endpoint) -> Option<String> {
        if endpoint.source == EndpointSource::GatewayDerived {
            return self.manifest.gateway_address();
        }
        self.manifest
            .service(&endpoint.service)
            .map(|s| s.address.clone())
    }
}

fn load_gateway_routes(manifest: &Manifest) -> Result<Vec<GatewayRoute>> {
    let Some(path) = manifest.gateway.as_ref().and_then(|g| g.config_path.as_ref()) else {
        return Ok(Vec::new());
    };
    let path = manifest.resolve(path);
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let routes = parse_forwarding_config(&text);
    tracing::debug!(path = %path.display(), routes = routes.len(), "gateway config parsed");
    Ok(routes)
}

fn gateway_endpoints(
    manifest: &Manifest,
    routes: &[GatewayRoute],
    names: &[String],
) -> Vec<Endpoint> {
    let Some(gw) = &manifest.gateway else {
        return Vec::new();
    };
    let parsed = routes.iter().map(|r| {
        Endpoint::route(&gw.service, "GET", &r.path, EndpointSource::GatewayDerived)
            .with_backend(r.backend(names).cloned())
    });
    let declared = gw.routes.iter().map(|r| {
        Endpoint::route(&gw.service, &r.method, &r.path, EndpointSource::GatewayDerived)
            .with_backend(r.backend.clone())
    });
    parsed.chain(declared).collect()
}
