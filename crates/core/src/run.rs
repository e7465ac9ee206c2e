use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::graph::DependencyGraph;
use crate::issue::{Issue, IssueKey};
use crate::priority::remediation_order;
use crate::time::{now_ms, EpochMs};

pub fn new_run_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Flags the run was started with.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunMode {
    pub retest: bool,
    pub wait: bool,
    pub autofix: bool,
    pub dry_run: bool,
    pub progressive: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "services", rename_all = "snake_case")]
pub enum RunScope {
    #[default]
    Full,
    Services(BTreeSet<String>),
}

impl RunScope {
    pub fn includes(&self, service: &str) -> bool {
        match self {
            RunScope::Full => true,
            RunScope::Services(s) => s.contains(service),
        }
    }
}

/// How much of a service's route table could be trusted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    /// The live route table came from introspection.
    Introspected,
    /// Introspection is not configured; static routes only.
    Static,
    /// Introspection failed; static routes stood in.
    StaticFallback,
    /// Routes came from the gateway's forwarding config.
    GatewayDerived,
    /// Skipped because an earlier layer failed.
    NotProbed,
    NotRunning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryConfidence {
    pub level: ConfidenceLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DiscoveryConfidence {
    pub fn new(level: ConfidenceLevel) -> Self {
        Self {
            level,
            reason: None,
        }
    }

    pub fn because(level: ConfidenceLevel, reason: impl Into<String>) -> Self {
        Self {
            level,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summary {
    pub errors: usize,
    pub warnings: usize,
    pub total: usize,
    pub services_expected: usize,
    pub services_running: usize,
    pub endpoints_probed: usize,
    pub endpoints_skipped: usize,
}

/// Result of waiting for health endpoints to come up.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitOutcome {
    pub budget_ms: u64,
    pub elapsed_ms: u64,
    pub wait_budget_exhausted: bool,
    /// Services still unhealthy when waiting stopped.
    pub unhealthy: Vec<String>,
}

/// One completed validation run. Never modified after [`RunBuilder::finish`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationRun {
    pub run_id: String,
    pub started_at_ms: EpochMs,
    pub finished_at_ms: EpochMs,
    pub mode: RunMode,
    pub scope: RunScope,
    pub summary: Summary,
    pub confidence: BTreeMap<String, DiscoveryConfidence>,
    /// In remediation order.
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub repaired: Vec<IssueKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitOutcome>,
}

impl ValidationRun {
    pub fn keys(&self) -> BTreeSet<IssueKey> {
        self.issues.iter().map(|i| i.key.clone()).collect()
    }

    pub fn error_keys(&self) -> BTreeSet<IssueKey> {
        self.issues
            .iter()
            .filter(|i| i.is_error())
            .map(|i| i.key.clone())
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(Issue::is_error)
    }

    pub fn issue(&self, key: &IssueKey) -> Option<&Issue> {
        self.issues.iter().find(|i| &i.key == key)
    }
}

/// Accumulates one run. Issue keys stay unique: a second issue with the same
/// key replaces the first only if it is more severe.
#[derive(Debug, Clone)]
pub struct RunBuilder {
    run_id: String,
    started_at_ms: EpochMs,
    mode: RunMode,
    scope: RunScope,
    issues: BTreeMap<IssueKey, Issue>,
    confidence: BTreeMap<String, DiscoveryConfidence>,
    repaired: Vec<IssueKey>,
    wait: Option<WaitOutcome>,
    summary: Summary,
}

impl RunBuilder {
    pub fn new(mode: RunMode, scope: RunScope) -> Self {
        Self {
            run_id: new_run_id(),
            started_at_ms: now_ms(),
            mode,
            scope,
            issues: BTreeMap::new(),
            confidence: BTreeMap::new(),
            repaired: Vec::new(),
            wait: None,
            summary: Summary::default(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn scope(&self) -> &RunScope {
        &self.scope
    }

    pub fn push(&mut self, issue: Issue) {
        match self.issues.get(&issue.key) {
            Some(existing) if existing.severity >= issue.severity => {}
            _ => {
                self.issues.insert(issue.key.clone(), issue);
            }
        }
    }

    pub fn extend(&mut self, issues: impl IntoIterator<Item = Issue>) {
        for issue in issues {
            self.push(issue);
        }
    }

    pub fn contains(&self, key: &IssueKey) -> bool {
        self.issues.contains_key(key)
    }

    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues.values()
    }

    pub fn remove(&mut self, key: &IssueKey) -> Option<Issue> {
        self.issues.remove(key)
    }

    pub fn mark_repaired(&mut self, key: &IssueKey) {
        self.issues.remove(key);
        if !self.repaired.contains(key) {
            self.repaired.push(key.clone());
        }
    }

    pub fn has_errors(&self) -> bool {
        self.issues.values().any(Issue::is_error)
    }

    pub fn set_confidence(&mut self, service: impl Into<String>, confidence: DiscoveryConfidence) {
        self.confidence.insert(service.into(), confidence);
    }

    pub fn set_service_counts(&mut self, expected: usize, running: usize) {
        self.summary.services_expected = expected;
        self.summary.services_running = running;
    }

    pub fn add_endpoint_counts(&mut self, probed: usize, skipped: usize) {
        self.summary.endpoints_probed += probed;
        self.summary.endpoints_skipped += skipped;
    }

    pub fn set_wait(&mut self, wait: WaitOutcome) {
        self.wait = Some(wait);
    }

    /// Seal the run, ordering issues for remediation.
    pub fn finish(self, graph: &DependencyGraph) -> ValidationRun {
        let issues = remediation_order(graph, self.issues.into_values().collect());
        let errors = issues.iter().filter(|i| i.is_error()).count();
        let summary = Summary {
            errors,
            warnings: issues.len() - errors,
            total: issues.len(),
            ..self.summary
        };
        ValidationRun {
            run_id: self.run_id,
            started_at_ms: self.started_at_ms,
            finished_at_ms: now_ms(),
            mode: self.mode,
            scope: self.scope,
            summary,
            confidence: self.confidence,
            issues,
            repaired: self.repaired,
            wait: self.wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{Finding, IssueKind, Severity};

    #[test]
    fn builder_keeps_keys_unique() {
        let mut b = RunBuilder::new(RunMode::default(), RunScope::Full);
        b.push(Issue::new("a", Finding::InstanceStopped));
        b.push(Issue::new("a", Finding::InstanceStopped));
        let graph = DependencyGraph::new(["a".to_string()], None);
        let run = b.finish(&graph);
        assert_eq!(run.issues.len(), 1);
        assert_eq!(run.summary.errors, 1);
        assert_eq!(run.summary.total, 1);
    }

    #[test]
    fn repaired_keys_leave_the_issue_set() {
        let mut b = RunBuilder::new(RunMode::default(), RunScope::Full);
        let issue = Issue::new("a", Finding::InstanceStopped);
        let key = issue.key.clone();
        b.push(issue);
        b.push(Issue::new(
            "a",
            Finding::SlowResponse {
                path: "/".into(),
                latency_ms: 5,
                threshold_ms: 1,
            },
        ));
        b.mark_repaired(&key);
        let run = b.finish(&DependencyGraph::default());
        assert_eq!(run.repaired, vec![key]);
        assert_eq!(run.issues.len(), 1);
        assert_eq!(run.issues[0].kind(), IssueKind::SlowResponse);
        assert_eq!(run.issues[0].severity, Severity::Warning);
        assert!(!run.has_errors());
    }

    #[test]
    fn scope_serializes_tagged() {
        let scope = RunScope::Services(BTreeSet::from(["nginx".to_string()]));
        let json = serde_json::to_value(&scope).unwrap();
        assert_eq!(json["type"], "services");
        assert_eq!(json["services"][0], "nginx");
        assert!(RunScope::Full.includes("anything"));
        assert!(!scope.includes("portal"));
    }
}
