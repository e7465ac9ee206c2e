//! Dependency-aware remediation order.

use std::collections::BTreeSet;

use crate::graph::DependencyGraph;
use crate::issue::{Issue, Severity};

/// Order issues so that fixing them top to bottom never works on a service
/// whose upstream is still broken.
///
/// Issues on services with no open issue upstream come first, most severe
/// first. Blocked issues follow, shallowest service first, so a gateway issue
/// always lands after the unresolved issues of every backend it depends on,
/// warnings included. Ties break on the key.
pub fn remediation_order(graph: &DependencyGraph, issues: Vec<Issue>) -> Vec<Issue> {
    let failing: BTreeSet<String> = issues.iter().map(|i| i.service().to_string()).collect();

    let mut keyed: Vec<_> = issues
        .into_iter()
        .map(|issue| {
            let blocked = graph
                .upstream(issue.service())
                .iter()
                .any(|up| failing.contains(up));
            let depth = graph.depth(issue.service());
            let rank = severity_rank(issue.severity);
            let sort_key = if blocked {
                (1u8, depth, rank as usize)
            } else {
                (0u8, rank as usize, depth)
            };
            (sort_key, issue)
        })
        .collect();

    keyed.sort_by(|(a, ia), (b, ib)| a.cmp(b).then_with(|| ia.key.cmp(&ib.key)));
    keyed.into_iter().map(|(_, issue)| issue).collect()
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::Error => 0,
        Severity::Warning => 1,
    }
}
