//! Service dependency DAG.
//!
//! Edges point from a service to the services it depends on. The gateway
//! implicitly depends on every backend its routes forward to.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::ConfigError;
use crate::manifest::Manifest;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    upstream: BTreeMap<String, BTreeSet<String>>,
    gateway: Option<String>,
}

impl DependencyGraph {
    pub fn new(services: impl IntoIterator<Item = String>, gateway: Option<String>) -> Self {
        Self {
            upstream: services.into_iter().map(|s| (s, BTreeSet::new())).collect(),
            gateway,
        }
    }

    /// Build from declared dependencies and the gateway's explicit routes.
    /// Fails on unknown dependencies and on cycles.
    pub fn from_manifest(manifest: &Manifest) -> Result<Self, ConfigError> {
        let mut graph = Self::new(
            manifest.service_names(),
            manifest.gateway_name().map(str::to_string),
        );
        for svc in &manifest.services {
            for dep in &svc.depends_on {
                if !graph.contains(dep) {
                    return Err(ConfigError::UnknownDependency {
                        service: svc.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                graph.add_edge(&svc.name, dep);
            }
        }
        if let Some(gw) = &manifest.gateway {
            for backend in gw.routes.iter().filter_map(|r| r.backend.as_ref()) {
                if backend != &gw.service && graph.contains(backend) {
                    graph.add_edge(&gw.service, backend);
                }
            }
        }
        if let Some(cycle) = graph.find_cycle() {
            return Err(ConfigError::DependencyCycle(cycle));
        }
        Ok(graph)
    }

    pub fn contains(&self, service: &str) -> bool {
        self.upstream.contains_key(service)
    }

    /// `from` depends on `to`. Both are inserted if missing.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.upstream.entry(to.to_string()).or_default();
        self.upstream
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    /// Record backends discovered from the gateway's forwarding config.
    ///
    /// Unknown names are ignored, as is any edge that would close a cycle.
    pub fn add_gateway_backends<'a>(&mut self, backends: impl IntoIterator<Item = &'a str>) {
        let Some(gw) = self.gateway.clone() else {
            return;
        };
        for backend in backends {
            if backend == gw || !self.contains(backend) {
                continue;
            }
            if self.upstream(backend).contains(&gw) {
                tracing::warn!(
                    gateway = %gw,
                    %backend,
                    "backend depends on the gateway; edge skipped"
                );
                continue;
            }
            self.add_edge(&gw, backend);
        }
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.upstream.keys().map(String::as_str)
    }

    pub fn gateway(&self) -> Option<&str> {
        self.gateway.as_deref()
    }

    pub fn is_gateway(&self, service: &str) -> bool {
        self.gateway.as_deref() == Some(service)
    }

    pub fn direct_upstream(&self, service: &str) -> BTreeSet<String> {
        self.upstream.get(service).cloned().unwrap_or_default()
    }

    /// Every service `service` transitively depends on.
    pub fn upstream(&self, service: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = vec![service];
        while let Some(cur) = stack.pop() {
            if let Some(deps) = self.upstream.get(cur) {
                for dep in deps {
                    if seen.insert(dep.clone()) {
                        stack.push(dep);
                    }
                }
            }
        }
        seen.remove(service);
        seen
    }

    /// Every service that transitively depends on `service`.
    pub fn dependents(&self, service: &str) -> BTreeSet<String> {
        self.upstream
            .keys()
            .filter(|s| s.as_str() != service && self.upstream(s).contains(service))
            .cloned()
            .collect()
    }

    /// Longest dependency chain below `service`; 0 for services with no
    /// dependencies and for unknown names.
    pub fn depth(&self, service: &str) -> usize {
        let mut memo = BTreeMap::new();
        self.depth_memo(service, &mut memo, &mut BTreeSet::new())
    }

    fn depth_memo<'a>(
        &'a self,
        service: &'a str,
        memo: &mut BTreeMap<&'a str, usize>,
        visiting: &mut BTreeSet<&'a str>,
    ) -> usize {
        if let Some(d) = memo.get(service) {
            return *d;
        }
        // Guards against cycles in graphs that skipped validation.
        if !visiting.insert(service) {
            return 0;
        }
        let d = self
            .upstream
            .get(service)
            .map(|deps| {
                deps.iter()
                    .map(|dep| self.depth_memo(dep, memo, visiting) + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        visiting.remove(service);
        memo.insert(service, d);
        d
    }

    /// Services grouped by depth, datastores first. The gateway always forms
    /// the final layer on its own.
    pub fn layers(&self) -> Vec<Vec<String>> {
        let mut by_depth: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for svc in self.upstream.keys() {
            if self.is_gateway(svc) {
                continue;
            }
            by_depth.entry(self.depth(svc)).or_default().push(svc.clone());
        }
        let mut layers: Vec<Vec<String>> = by_depth.into_values().collect();
        if let Some(gw) = self.gateway.as_ref().filter(|g| self.contains(g)) {
            layers.push(vec![gw.clone()]);
        }
        layers
    }

    /// First cycle found, as a closed path (`a -> b -> a`).
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            node: &'a str,
            graph: &'a BTreeMap<String, BTreeSet<String>>,
            marks: &mut BTreeMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            match marks.get(node) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| *n == node).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(node.to_string());
                    return Some(cycle);
                }
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            path.push(node);
            if let Some(deps) = graph.get(node) {
                for dep in deps {
                    if let Some(cycle) = visit(dep, graph, marks, path) {
                        return Some(cycle);
                    }
                }
            }
            path.pop();
            marks.insert(node, Mark::Done);
            None
        }

        let mut marks = BTreeMap::new();
        for node in self.upstream.keys() {
            let mut path = Vec::new();
            if let Some(cycle) = visit(node, &self.upstream, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }
}
