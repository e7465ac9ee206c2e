//! Run orchestration: scope, preflight, topology, discovery, probing,
//! classification, optional repair, persistence.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::Result;
use healthgate_core::classify::{backend_health, Classifier, PLATFORM_SERVICE};
use healthgate_core::diff::DiffResult;
use healthgate_core::{
    ConfidenceLevel, DiscoveryConfidence, Endpoint, Issue, IssueKey, RunBuilder, RunScope,
    ValidationRun, WaitOutcome,
};
use tokio::time::Instant;

use crate::context::RunContext;
use crate::discovery::discover;
use crate::preflight::check_sources;
use crate::probe::{plan_probes, probe_plan};
use crate::repair::{repair, RepairAttempt};
use crate::topology::discover_topology;

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: ValidationRun,
    /// Present when a diff was requested.
    pub diff: Option<DiffResult>,
    pub repairs: Vec<RepairAttempt>,
}

pub async fn run(ctx: &RunContext) -> Result<RunOutcome> {
    let baseline = ctx.store.latest()?;
    let scope = resolve_scope(ctx, baseline.as_ref());
    let mut builder = RunBuilder::new(ctx.options.mode(), scope.clone());
    tracing::info!(run_id = %builder.run_id(), ?scope, "validation started");

    if let (RunScope::Services(_), Some(base)) = (&scope, baseline.as_ref()) {
        carry_over(&mut builder, base, &scope);
    }

    let classifier = Classifier::new(&ctx.manifest);
    builder.extend(check_sources(&ctx.manifest, &classifier, &scope));

    match discover_topology(ctx).await {
        Err(e) => {
            tracing::error!(error = %e, "runtime query failed; nothing probed");
            builder.push(classifier.platform_unreachable(e.to_string()));
            builder.set_service_counts(ctx.manifest.services.len(), 0);
        }
        Ok(topology) => {
            builder.set_service_counts(ctx.manifest.services.len(), topology.running.len());
            for name in topology.stopped.iter().filter(|s| scope.includes(s)) {
                builder.push(classifier.stopped(name));
                builder.set_confidence(name, DiscoveryConfidence::new(ConfidenceLevel::NotRunning));
            }

            let running = topology.running_names();
            let targets: Vec<String> = ctx
                .manifest
                .service_names()
                .into_iter()
                .filter(|s| scope.includes(s) && running.contains(s))
                .collect();

            let wait_budget = ctx.options.wait.then(|| ctx.wait_budget());
            if ctx.options.progressive {
                validate_layers(ctx, &mut builder, &running, &targets, wait_budget).await;
            } else {
                let probed =
                    probe_services(ctx, &targets, &BTreeMap::new(), &running, wait_budget).await;
                probed.apply(&mut builder);
            }
        }
    }

    let repairs = if ctx.options.autofix || ctx.options.dry_run {
        repair(ctx, &mut builder).await
    } else {
        Vec::new()
    };

    let run = builder.finish(&ctx.graph);
    ctx.store.save(&run)?;
    tracing::info!(
        run_id = %run.run_id,
        errors = run.summary.errors,
        warnings = run.summary.warnings,
        repaired = run.repaired.len(),
        "validation finished"
    );

    let diff = if ctx.options.diff {
        ctx.store.diff()?
    } else {
        None
    };
    Ok(RunOutcome { run, diff, repairs })
}

/// Full unless retesting against a baseline. A retest covers the services
/// named by the selected keys, defaulting to every error key of the baseline.
pub fn resolve_scope(ctx: &RunContext, baseline: Option<&ValidationRun>) -> RunScope {
    if !ctx.options.retest || ctx.options.full {
        return RunScope::Full;
    }
    let Some(base) = baseline else {
        tracing::info!("no previous run to retest; validating everything");
        return RunScope::Full;
    };
    let keys: BTreeSet<IssueKey> = if ctx.options.only.is_empty() {
        base.error_keys()
    } else {
        ctx.options.only.iter().cloned().collect()
    };

    let mut services = BTreeSet::new();
    for key in keys {
        if key.service == PLATFORM_SERVICE {
            return RunScope::Full;
        }
        if ctx.manifest.service(&key.service).is_some() {
            services.insert(key.service);
        } else {
            tracing::warn!(%key, "key names an undeclared service; ignored");
        }
    }
    RunScope::Services(services)
}

/// Out-of-scope issues and confidence stay as the baseline recorded them.
fn carry_over(builder: &mut RunBuilder, baseline: &ValidationRun, scope: &RunScope) {
    for issue in baseline.issues.iter().filter(|i| !scope.includes(i.service())) {
        builder.push(issue.clone());
    }
    for (service, confidence) in baseline.confidence.iter().filter(|(s, _)| !scope.includes(s)) {
        builder.set_confidence(service.clone(), confidence.clone());
    }
}

/// Probe layer by layer and stop after the first layer with errors.
async fn validate_layers(
    ctx: &RunContext,
    builder: &mut RunBuilder,
    running: &BTreeSet<String>,
    targets: &[String],
    wait_budget: Option<Duration>,
) {
    let deadline = wait_budget.map(|b| Instant::now() + b);
    let mut health = BTreeMap::new();
    let mut wait: Option<WaitOutcome> = None;
    let layers = ctx.graph.layers();

    for (idx, layer) in layers.iter().enumerate() {
        let layer_targets: Vec<String> = layer
            .iter()
            .filter(|s| targets.contains(s))
            .cloned()
            .collect();

        if !layer_targets.is_empty() {
            let budget = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let probed = probe_services(ctx, &layer_targets, &health, running, budget).await;
            health.extend(probed.health.clone());
            if let Some(w) = &probed.wait {
                wait = Some(merge_wait(wait.take(), w));
            }
            probed.apply(builder);
        }

        let failed: Vec<&str> = layer
            .iter()
            .filter(|s| builder.scope().includes(s))
            .filter(|s| builder.issues().any(|i| i.service() == s.as_str() && i.is_error()))
            .map(String::as_str)
            .collect();
        if !failed.is_empty() {
            let reason = format!("layer {} failed: {}", idx + 1, failed.join(", "));
            let skipped: Vec<String> = layers[idx + 1..]
                .iter()
                .flatten()
                .filter(|s| targets.contains(s))
                .cloned()
                .collect();
            if !skipped.is_empty() {
                tracing::info!(%reason, skipped = ?skipped, "progressive validation halted");
            }
            for service in skipped {
                builder.set_confidence(
                    service,
                    DiscoveryConfidence::because(ConfidenceLevel::NotProbed, reason.clone()),
                );
            }
            break;
        }
    }

    if let Some(w) = wait {
        builder.set_wait(w);
    }
}

fn merge_wait(acc: Option<WaitOutcome>, next: &WaitOutcome) -> WaitOutcome {
    let Some(mut acc) = acc else {
        return next.clone();
    };
    acc.elapsed_ms += next.elapsed_ms;
    acc.wait_budget_exhausted |= next.wait_budget_exhausted;
    acc.unhealthy.extend(next.unhealthy.iter().cloned());
    acc.unhealthy.sort();
    acc.unhealthy.dedup();
    acc
}

/// What probing a set of services produced.
#[derive(Debug, Default)]
pub(crate) struct Probed {
    pub issues: Vec<Issue>,
    /// Backend health after this probe, including what was already known.
    pub health: BTreeMap<String, bool>,
    pub confidence: Vec<(String, DiscoveryConfidence)>,
    pub probed: usize,
    pub skipped: usize,
    pub wait: Option<WaitOutcome>,
}

impl Probed {
    fn apply(self, builder: &mut RunBuilder) {
        builder.extend(self.issues);
        for (service, confidence) in self.confidence {
            builder.set_confidence(service, confidence);
        }
        builder.add_endpoint_counts(self.probed, self.skipped);
        if let Some(wait) = self.wait {
            builder.set_wait(wait);
        }
    }
}

/// Discover, probe and classify `services`. Only issues of `services` are
/// returned; the gateway's backends are health-probed when their state is
/// not already in `known_health`.
pub(crate) async fn probe_services(
    ctx: &RunContext,
    services: &[String],
    known_health: &BTreeMap<String, bool>,
    running: &BTreeSet<String>,
    wait_budget: Option<Duration>,
) -> Probed {
    if services.is_empty() {
        return Probed::default();
    }

    let discovered = discover(ctx, services).await;
    let mut endpoints: Vec<Endpoint> = discovered
        .iter()
        .flat_map(|d| d.endpoints.iter().cloned())
        .collect();
    for backend in backends_needing_health(ctx, services, known_health, running) {
        if let Some(spec) = ctx.manifest.service(&backend) {
            endpoints.push(Endpoint::health(&spec.name, &spec.health_path));
        }
    }

    let plan = plan_probes(ctx, endpoints);
    for ep in &plan.skipped {
        tracing::debug!(
            service = %ep.service,
            method = %ep.method,
            path = %ep.path,
            "endpoint skipped"
        );
    }
    let (results, wait) = probe_plan(ctx, &plan, wait_budget).await;

    let mut health = known_health.clone();
    health.extend(backend_health(&results));
    let classifier = Classifier::new(&ctx.manifest).with_backend_health(health.clone());
    let issues = results
        .iter()
        .filter(|r| services.contains(&r.endpoint.service))
        .filter_map(|r| classifier.probe(r))
        .collect();

    Probed {
        issues,
        health,
        confidence: discovered
            .into_iter()
            .map(|d| (d.service, d.confidence))
            .collect(),
        probed: plan.targets.len(),
        skipped: plan.skipped.len(),
        wait,
    }
}

fn backends_needing_health(
    ctx: &RunContext,
    services: &[String],
    known_health: &BTreeMap<String, bool>,
    running: &BTreeSet<String>,
) -> Vec<String> {
    let Some(gw) = ctx.graph.gateway() else {
        return Vec::new();
    };
    if !services.iter().any(|s| s == gw) {
        return Vec::new();
    }
    ctx.graph
        .direct_upstream(gw)
        .into_iter()
        .filter(|b| running.contains(b) && !services.contains(b) && !known_health.contains_key(b))
        .collect()
}
