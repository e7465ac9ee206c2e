//! Probe engine.
//!
//! Every probe is a single read-only request with its own deadline, so a hung
//! target turns into a transport failure instead of stalling the run.

use std::time::Duration;

use healthgate_core::manifest::TCP_SCHEME;
use healthgate_core::{
    now_ms, Endpoint, HealthVerdict, ProbeOutcome, ProbeResult, TransportErrorKind, WaitOutcome,
};
use tokio::time::Instant;

use crate::context::RunContext;
use crate::util::{bounded, elapsed_ms};

#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub endpoint: Endpoint,
    pub url: String,
}

/// Endpoints split into what will be requested and what must not be.
#[derive(Debug, Clone, Default)]
pub struct ProbePlan {
    pub targets: Vec<ProbeTarget>,
    /// Non-idempotent methods and route templates.
    pub skipped: Vec<Endpoint>,
}

impl ProbePlan {
    pub fn health_targets(&self) -> Vec<ProbeTarget> {
        self.targets
            .iter()
            .filter(|t| t.endpoint.is_health())
            .cloned()
            .collect()
    }

    pub fn route_targets(&self) -> Vec<ProbeTarget> {
        self.targets
            .iter()
            .filter(|t| !t.endpoint.is_health())
            .cloned()
            .collect()
    }
}

pub fn plan_probes(ctx: &RunContext, endpoints: impl IntoIterator<Item = Endpoint>) -> ProbePlan {
    let mut plan = ProbePlan::default();
    for endpoint in endpoints {
        if !endpoint.is_idempotent() || endpoint.is_template() {
            plan.skipped.push(endpoint);
            continue;
        }
        let Some(base) = ctx.base_url(&endpoint) else {
            plan.skipped.push(endpoint);
            continue;
        };
        let url = if base.starts_with(TCP_SCHEME) {
            base
        } else {
            format!("{}{}", base.trim_end_matches('/'), endpoint.path)
        };
        plan.targets.push(ProbeTarget { endpoint, url });
    }
    plan
}

/// Issue one request, or open one connection for a `tcp://` target. Never
/// fails: problems become transport outcomes.
pub async fn probe_one(
    client: reqwest::Client,
    target: ProbeTarget,
    timeout: Duration,
) -> ProbeResult {
    let at_ms = now_ms();
    let started = Instant::now();

    let (outcome, health) = match target.url.strip_prefix(TCP_SCHEME) {
        Some(authority) => (connect(authority, timeout).await, None),
        None => request(&client, &target, timeout).await,
    };

    let result = ProbeResult {
        endpoint: target.endpoint,
        url: target.url,
        outcome,
        latency_ms: elapsed_ms(started),
        at_ms,
        health,
    };
    tracing::trace!(
        url = %result.url,
        outcome = ?result.outcome,
        latency_ms = result.latency_ms,
        "probe"
    );
    result
}

async fn connect(authority: &str, timeout: Duration) -> ProbeOutcome {
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(authority)).await {
        Ok(Ok(_stream)) => ProbeOutcome::Connected,
        Ok(Err(e)) => ProbeOutcome::Transport {
            kind: if e.kind() == std::io::ErrorKind::ConnectionRefused {
                TransportErrorKind::Refused
            } else {
                TransportErrorKind::Other
            },
            detail: e.to_string(),
        },
        Err(_) => timed_out(timeout),
    }
}

fn timed_out(timeout: Duration) -> ProbeOutcome {
    ProbeOutcome::Transport {
        kind: TransportErrorKind::Timeout,
        detail: format!("no response within {}ms", timeout.as_millis()),
    }
}

async fn request(
    client: &reqwest::Client,
    target: &ProbeTarget,
    timeout: Duration,
) -> (ProbeOutcome, Option<HealthVerdict>) {
    let want_body = target.endpoint.is_health();

    let request = if target.endpoint.method == "HEAD" {
        client.head(&target.url)
    } else {
        client.get(&target.url)
    };

    let exchange = async {
        let resp = request.send().await?;
        let code = resp.status().as_u16();
        let body = if want_body && resp.status().is_success() {
            Some(resp.bytes().await?)
        } else {
            None
        };
        Ok::<_, reqwest::Error>((code, body))
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok((code, body))) => (
            ProbeOutcome::Status { code },
            body.map(|b| HealthVerdict::from_body(&b)),
        ),
        Ok(Err(e)) => (transport_outcome(&e), None),
        Err(_) => (timed_out(timeout), None),
    }
}

fn transport_outcome(e: &reqwest::Error) -> ProbeOutcome {
    let kind = if e.is_timeout() {
        TransportErrorKind::Timeout
    } else if e.is_connect() {
        TransportErrorKind::Refused
    } else {
        TransportErrorKind::Other
    };
    ProbeOutcome::Transport {
        kind,
        detail: error_chain(e),
    }
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}

/// Probe every target once through the bounded pool. Results keep the order
/// of `targets`.
pub async fn probe_all(
    client: &reqwest::Client,
    targets: Vec<ProbeTarget>,
    concurrency: usize,
    timeout: Duration,
) -> Vec<ProbeResult> {
    bounded(targets, concurrency, |t| probe_one(client.clone(), t, timeout)).await
}

/// Retry health targets with linear backoff until all are healthy or the
/// wall-clock `budget` runs out. Returns the last result for every target.
///
/// The first attempt always runs and every attempt gets the full `timeout`;
/// the budget only decides whether another attempt is scheduled.
pub async fn wait_for_health(
    client: &reqwest::Client,
    targets: Vec<ProbeTarget>,
    concurrency: usize,
    timeout: Duration,
    budget: Duration,
    step: Duration,
) -> (Vec<ProbeResult>, WaitOutcome) {
    let started = Instant::now();
    let deadline = started + budget;
    let mut pending = targets;
    let mut settled: Vec<ProbeResult> = Vec::new();
    let mut attempt: u32 = 0;

    let exhausted = loop {
        attempt += 1;
        let results = probe_all(client, pending, concurrency, timeout).await;

        let (healthy, failing): (Vec<_>, Vec<_>) =
            results.into_iter().partition(|r| r.is_healthy());
        settled.extend(healthy);
        if failing.is_empty() {
            break false;
        }

        let delay = step.saturating_mul(attempt);
        if Instant::now() + delay >= deadline {
            settled.extend(failing);
            break true;
        }
        tracing::debug!(
            attempt,
            waiting = failing.len(),
            delay_ms = delay.as_millis() as u64,
            "health not ready"
        );
        tokio::time::sleep(delay).await;
        pending = failing
            .into_iter()
            .map(|r| ProbeTarget {
                endpoint: r.endpoint,
                url: r.url,
            })
            .collect();
    };

    let mut unhealthy: Vec<String> = settled
        .iter()
        .filter(|r| !r.is_healthy())
        .map(|r| r.endpoint.service.clone())
        .collect();
    unhealthy.sort();
    unhealthy.dedup();

    let outcome = WaitOutcome {
        budget_ms: budget.as_millis() as u64,
        elapsed_ms: elapsed_ms(started),
        wait_budget_exhausted: exhausted,
        unhealthy,
    };
    if exhausted {
        tracing::warn!(
            unhealthy = ?outcome.unhealthy,
            budget_ms = outcome.budget_ms,
            "wait budget exhausted"
        );
    }
    (settled, outcome)
}

/// Plan, then probe: health endpoints through wait mode when `wait_budget` is
/// set, everything else exactly once.
pub async fn probe_plan(
    ctx: &RunContext,
    plan: &ProbePlan,
    wait_budget: Option<Duration>,
) -> (Vec<ProbeResult>, Option<WaitOutcome>) {
    let timeout = ctx.probe_timeout();
    let concurrency = ctx.concurrency();
    match wait_budget {
        None => (
            probe_all(&ctx.client, plan.targets.clone(), concurrency, timeout).await,
            None,
        ),
        Some(budget) => {
            let (mut results, wait) = wait_for_health(
                &ctx.client,
                plan.health_targets(),
                concurrency,
                timeout,
                budget,
                ctx.backoff_step(),
            )
            .await;
            let routes = plan.route_targets();
            results.extend(probe_all(&ctx.client, routes, concurrency, timeout).await);
            (results, Some(wait))
        }
    }
}
