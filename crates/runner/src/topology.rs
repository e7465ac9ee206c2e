use std::collections::BTreeSet;

use healthgate_core::ServiceDescriptor;

use crate::context::RunContext;
use crate::runtime::RuntimeError;

/// Declared services split by whether the runtime reports them running.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub running: Vec<ServiceDescriptor>,
    pub stopped: Vec<String>,
}

impl Topology {
    pub fn running_names(&self) -> BTreeSet<String> {
        self.running.iter().map(|s| s.name.clone()).collect()
    }
}

/// Query the runtime and resolve addresses for the running subset.
///
/// Running services that are not declared are ignored; declared services
/// that are absent end up in `stopped`.
pub async fn discover_topology(ctx: &RunContext) -> Result<Topology, RuntimeError> {
    let live = ctx.runtime.running_services().await?;
    let mut topology = Topology::default();
    for spec in &ctx.manifest.services {
        if live.contains(&spec.name) {
            topology.running.push(ServiceDescriptor {
                name: spec.name.clone(),
                address: spec.address.clone(),
                depends_on: ctx.graph.direct_upstream(&spec.name).into_iter().collect(),
            });
        } else {
            topology.stopped.push(spec.name.clone());
        }
    }
    tracing::debug!(
        running = topology.running.len(),
        stopped = topology.stopped.len(),
        "topology discovered"
    );
    Ok(topology)
}
