//! Report rendering: a JSON document for agents, a grouped summary for humans.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use healthgate_core::diff::DiffResult;
use healthgate_core::hashing::issue_fingerprint;
use healthgate_core::{
    ConfidenceLevel, DiscoveryConfidence, EpochMs, Issue, IssueKey, IssueKind, RunMode, RunScope,
    Severity, Summary, ValidationRun, WaitOutcome,
};
use serde::Serialize;

use crate::engine::RunOutcome;
use crate::repair::{RepairAttempt, RepairStatus};

#[derive(Debug, Serialize)]
pub struct IssueView<'a> {
    pub key: String,
    pub fingerprint: String,
    pub kind: IssueKind,
    pub severity: Severity,
    pub service: &'a str,
    pub target: &'a str,
    pub message: &'a str,
    pub suggestion: &'a str,
    pub auto_fixable: bool,
    pub fix_command: Option<&'a str>,
}

impl<'a> From<&'a Issue> for IssueView<'a> {
    fn from(issue: &'a Issue) -> Self {
        Self {
            key: issue.key.to_string(),
            fingerprint: issue_fingerprint(&issue.key),
            kind: issue.kind(),
            severity: issue.severity,
            service: &issue.key.service,
            target: &issue.key.target,
            message: &issue.message,
            suggestion: &issue.suggestion,
            auto_fixable: issue.auto_fixable,
            fix_command: issue.fix_command.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub run_id: &'a str,
    pub started_at_ms: EpochMs,
    pub finished_at_ms: EpochMs,
    pub mode: RunMode,
    pub scope: &'a RunScope,
    pub summary: Summary,
    pub confidence: &'a BTreeMap<String, DiscoveryConfidence>,
    pub issues: Vec<IssueView<'a>>,
    pub repaired: &'a [IssueKey],
    #[serde(skip_serializing_if = "no_repairs")]
    pub repairs: &'a [RepairAttempt],
    pub wait: Option<&'a WaitOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<&'a DiffResult>,
}

fn no_repairs(repairs: &&[RepairAttempt]) -> bool {
    repairs.is_empty()
}

impl<'a> RunReport<'a> {
    pub fn new(outcome: &'a RunOutcome) -> Self {
        let run: &ValidationRun = &outcome.run;
        Self {
            run_id: &run.run_id,
            started_at_ms: run.started_at_ms,
            finished_at_ms: run.finished_at_ms,
            mode: run.mode,
            scope: &run.scope,
            summary: run.summary,
            confidence: &run.confidence,
            issues: run.issues.iter().map(IssueView::from).collect(),
            repaired: &run.repaired,
            repairs: &outcome.repairs,
            wait: run.wait.as_ref(),
            diff: outcome.diff.as_ref(),
        }
    }
}

pub fn render_json(outcome: &RunOutcome) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&RunReport::new(outcome))
}

fn mark(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "✗",
        Severity::Warning => "⚠",
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// Summary, then issues grouped by service in remediation order, the
/// suggested commands for fixable issues, repairs, the wait outcome and the
/// diff.
pub fn render_human(outcome: &RunOutcome) -> String {
    let run = &outcome.run;
    let s = &run.summary;
    let mut out = String::new();

    let scope = match &run.scope {
        RunScope::Full => "full".to_string(),
        RunScope::Services(services) if services.is_empty() => {
            "retest (nothing selected)".to_string()
        }
        RunScope::Services(services) => {
            format!("retest: {}", services.iter().cloned().collect::<Vec<_>>().join(", "))
        }
    };
    let _ = writeln!(out, "healthgate run {} ({scope})", run.run_id);
    let _ = writeln!(
        out,
        "{} {}  {} {}  ({}/{} services running, {} endpoints probed, {} skipped)",
        mark(Severity::Error),
        plural(s.errors, "error"),
        mark(Severity::Warning),
        plural(s.warnings, "warning"),
        s.services_running,
        s.services_expected,
        s.endpoints_probed,
        s.endpoints_skipped,
    );

    if run.issues.is_empty() {
        let _ = writeln!(out, "\n✓ no issues found");
    }

    let mut groups: Vec<(&str, Vec<&Issue>)> = Vec::new();
    for issue in &run.issues {
        match groups.iter_mut().find(|(svc, _)| *svc == issue.service()) {
            Some((_, items)) => items.push(issue),
            None => groups.push((issue.service(), vec![issue])),
        }
    }
    for (service, issues) in groups {
        let _ = writeln!(out, "\n{service}");
        if let Some(c) = run.confidence.get(service) {
            if let Some(reason) = &c.reason {
                let _ = writeln!(out, "  (routes: {:?}, {reason})", c.level);
            }
        }
        for issue in issues {
            let _ = writeln!(
                out,
                "  {} {} {}: {}",
                mark(issue.severity),
                issue.kind(),
                issue.key.target,
                issue.message
            );
            let _ = writeln!(out, "      hint: {}", issue.suggestion);
        }
    }

    let commands: Vec<&str> = run
        .issues
        .iter()
        .filter(|i| i.auto_fixable)
        .filter_map(|i| i.fix_command.as_deref())
        .collect();
    if !commands.is_empty() {
        let _ = writeln!(out, "\nsuggested commands (in order):");
        for (n, cmd) in commands.iter().enumerate() {
            let _ = writeln!(out, "  {}. {cmd}", n + 1);
        }
    }

    let not_probed: Vec<(&String, &DiscoveryConfidence)> = run
        .confidence
        .iter()
        .filter(|(_, c)| c.level == ConfidenceLevel::NotProbed)
        .collect();
    if !not_probed.is_empty() {
        let _ = writeln!(out, "\nnot probed:");
        for (service, c) in not_probed {
            let _ = writeln!(out, "  - {service} ({})", c.reason.as_deref().unwrap_or("skipped"));
        }
    }

    if !outcome.repairs.is_empty() {
        let _ = writeln!(out, "\nrepairs:");
        for attempt in &outcome.repairs {
            let status = match &attempt.status {
                RepairStatus::Repaired => "✓ repaired".to_string(),
                RepairStatus::StillFailing => "✗ still failing".to_string(),
                RepairStatus::CommandFailed(reason) => format!("✗ command failed: {reason}"),
                RepairStatus::Planned => "would run".to_string(),
            };
            let _ = writeln!(out, "  {} [{}] {status}", attempt.key, attempt.command.join(" "));
        }
    }

    if let Some(wait) = &run.wait {
        if wait.wait_budget_exhausted {
            let _ = writeln!(
                out,
                "\nwait budget of {}ms exhausted; still unhealthy: {}",
                wait.budget_ms,
                wait.unhealthy.join(", ")
            );
        } else {
            let _ = writeln!(out, "\nall health endpoints ready after {}ms", wait.elapsed_ms);
        }
    }

    if let Some(diff) = &outcome.diff {
        let _ = writeln!(
            out,
            "\nsince previous run: {} resolved, {} new, {} persisting",
            diff.resolved.len(),
            diff.new.len(),
            diff.persisting.len()
        );
        for key in &diff.resolved {
            let _ = writeln!(out, "  ✓ {key}");
        }
        for key in &diff.new {
            let _ = writeln!(out, "  + {key}");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthgate_core::graph::DependencyGraph;
    use healthgate_core::{Finding, Remediation, RunBuilder};

    fn outcome() -> RunOutcome {
        let mut b = RunBuilder::new(RunMode::default(), RunScope::Full);
        b.push(
            Issue::new("portal", Finding::InstanceStopped).with_remediation(
                Remediation::Start {
                    service: "portal".into(),
                },
                &["docker-compose".into(), "up".into(), "-d".into(), "portal".into()],
            ),
        );
        b.push(Issue::new(
            "review",
            Finding::StaticRouteMissing {
                path: "/old".into(),
                status: 404,
            },
        ));
        RunOutcome {
            run: b.finish(&DependencyGraph::default()),
            diff: None,
            repairs: Vec::new(),
        }
    }

    #[test]
    fn json_carries_flat_issue_fields() {
        let json: serde_json::Value =
            serde_json::from_str(&render_json(&outcome()).unwrap()).unwrap();
        let issue = &json["issues"][0];
        assert_eq!(issue["key"], "portal:instance_stopped:-");
        assert_eq!(issue["kind"], "instance_stopped");
        assert_eq!(issue["severity"], "error");
        assert_eq!(issue["fingerprint"].as_str().unwrap().len(), 12);
        assert_eq!(issue["fix_command"], "docker-compose up -d portal");
        assert_eq!(json["summary"]["errors"], 1);
        assert_eq!(json["summary"]["warnings"], 1);
        assert!(json.get("diff").is_none());
    }

    #[test]
    fn human_output_lists_fixable_commands_after_the_issues() {
        let text = render_human(&outcome());
        assert!(text.contains("✗ 1 error"));
        assert!(text.contains("⚠ 1 warning"));
        assert!(text.contains("hint: remove /old"));
        let portal = text.find("\nportal").unwrap();
        let review = text.find("\nreview").unwrap();
        let commands = text.find("suggested commands (in order):").unwrap();
        assert!(portal < review && review < commands);
        let listed: Vec<&str> = text[commands..]
            .lines()
            .skip(1)
            .take_while(|l| l.starts_with("  "))
            .collect();
        assert_eq!(listed, vec!["  1. docker-compose up -d portal"]);
    }
}
