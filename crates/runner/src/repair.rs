//! Auto-repair.
//!
//! Repairs run serially in remediation order, one attempt per issue. After a
//! command succeeds and the settle delay passes, only the affected service is
//! probed again; the issue counts as repaired if its key does not come back.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use healthgate_core::classify::Classifier;
use healthgate_core::priority::remediation_order;
use healthgate_core::{
    ConfidenceLevel, DiscoveryConfidence, Issue, IssueKey, IssueKind, Remediation, RunBuilder,
};
use serde::Serialize;

use crate::context::RunContext;
use crate::engine::probe_services;
use crate::util::ms;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RepairStatus {
    Repaired,
    /// The command ran but the issue reproduced.
    StillFailing,
    CommandFailed(String),
    /// Dry run: the command was not executed.
    Planned,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairAttempt {
    pub key: IssueKey,
    pub command: Vec<String>,
    #[serde(flatten)]
    pub status: RepairStatus,
}

/// Kinds a re-probe can confirm or clear.
fn reprobe_can_clear(kind: IssueKind) -> bool {
    !matches!(kind, IssueKind::NoSourceFiles | IssueKind::PlatformUnreachable)
}

fn command_for(ctx: &RunContext, remediation: &Remediation) -> Option<Vec<String>> {
    match remediation {
        Remediation::Start { service } => ctx.manifest.start_command(service),
        Remediation::Restart { service } => ctx.manifest.restart_command(service),
    }
}

pub async fn repair(ctx: &RunContext, builder: &mut RunBuilder) -> Vec<RepairAttempt> {
    let candidates: Vec<Issue> = builder
        .issues()
        .filter(|i| i.auto_fixable && builder.scope().includes(i.service()))
        .cloned()
        .collect();
    let ordered = remediation_order(&ctx.graph, candidates);
    let settle = ms(ctx.manifest.repair.settle_delay_ms);
    let command_timeout = ms(ctx.manifest.repair.command_timeout_ms);

    let mut attempts = Vec::new();
    for issue in ordered {
        // An earlier repair of the same service may already have cleared it.
        if !builder.contains(&issue.key) {
            continue;
        }
        let Some(remediation) = issue.remediation.as_ref() else {
            continue;
        };
        let Some(command) = command_for(ctx, remediation) else {
            continue;
        };

        if ctx.options.dry_run {
            tracing::info!(
                key = %issue.key,
                command = %command.join(" "),
                "dry run: would execute"
            );
            attempts.push(RepairAttempt {
                key: issue.key.clone(),
                command,
                status: RepairStatus::Planned,
            });
            continue;
        }

        tracing::info!(key = %issue.key, command = %command.join(" "), "repairing");
        let failure = match ctx.runtime.execute(&command, command_timeout).await {
            Ok(out) if out.success() => None,
            Ok(out) => Some(format!("exit status {:?}: {}", out.code, out.stderr.trim())),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            tracing::warn!(key = %issue.key, %reason, "repair command failed");
            attempts.push(RepairAttempt {
                key: issue.key.clone(),
                command,
                status: RepairStatus::CommandFailed(reason),
            });
            continue;
        }

        tokio::time::sleep(settle).await;

        let service = remediation.service();
        let status = match reprobe(ctx, service).await {
            Some(Reprobed {
                issues: fresh,
                confidence,
                running,
            }) => {
                builder.set_confidence(service, confidence);
                builder.set_service_counts(ctx.manifest.services.len(), running);
                let fresh_keys: BTreeSet<IssueKey> = fresh.iter().map(|i| i.key.clone()).collect();
                let stale: Vec<IssueKey> = builder
                    .issues()
                    .filter(|i| i.service() == service && reprobe_can_clear(i.kind()))
                    .map(|i| i.key.clone())
                    .collect();
                for key in &stale {
                    builder.remove(key);
                }
                let cleared = !fresh_keys.contains(&issue.key);
                if cleared {
                    builder.mark_repaired(&issue.key);
                }
                builder.extend(fresh);
                if cleared {
                    RepairStatus::Repaired
                } else {
                    RepairStatus::StillFailing
                }
            }
            None => RepairStatus::StillFailing,
        };
        tracing::info!(key = %issue.key, ?status, "repair verified");
        attempts.push(RepairAttempt {
            key: issue.key.clone(),
            command,
            status,
        });
    }
    attempts
}

/// What re-probing one service after a repair found.
struct Reprobed {
    issues: Vec<Issue>,
    confidence: DiscoveryConfidence,
    /// Declared services the runtime now reports running.
    running: usize,
}

/// Fresh state for one service, or `None` if the runtime cannot be queried.
async fn reprobe(ctx: &RunContext, service: &str) -> Option<Reprobed> {
    let classifier = Classifier::new(&ctx.manifest);
    let running = match ctx.runtime.running_services().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "runtime query failed during repair verification");
            return None;
        }
    };
    let declared_running = ctx
        .manifest
        .services
        .iter()
        .filter(|s| running.contains(&s.name))
        .count();
    if !running.contains(service) {
        return Some(Reprobed {
            issues: vec![classifier.stopped(service)],
            confidence: DiscoveryConfidence::new(ConfidenceLevel::NotRunning),
            running: declared_running,
        });
    }
    let recovery = Duration::from_secs(ctx.manifest.repair.recovery_wait_secs);
    let probed = probe_services(
        ctx,
        &[service.to_string()],
        &BTreeMap::new(),
        &running,
        Some(recovery),
    )
    .await;
    let confidence = probed
        .confidence
        .into_iter()
        .find(|(name, _)| name == service)
        .map(|(_, c)| c)
        .unwrap_or_else(|| DiscoveryConfidence::new(ConfidenceLevel::Static));
    Some(Reprobed {
        issues: probed.issues,
        confidence,
        running: declared_running,
    })
}
