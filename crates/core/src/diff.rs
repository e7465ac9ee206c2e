//! Run-to-run comparison by issue key.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::issue::IssueKey;
use crate::run::ValidationRun;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffResult {
    /// In the previous run only.
    pub resolved: BTreeSet<IssueKey>,
    /// In the current run only.
    pub new: BTreeSet<IssueKey>,
    pub persisting: BTreeSet<IssueKey>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty() && self.new.is_empty() && self.persisting.is_empty()
    }
}

pub fn diff_keys(previous: &BTreeSet<IssueKey>, current: &BTreeSet<IssueKey>) -> DiffResult {
    DiffResult {
        resolved: previous.difference(current).cloned().collect(),
        new: current.difference(previous).cloned().collect(),
        persisting: previous.intersection(current).cloned().collect(),
    }
}

/// With no previous run every current key is new.
pub fn diff_runs(previous: Option<&ValidationRun>, current: &ValidationRun) -> DiffResult {
    let prev = previous.map(ValidationRun::keys).unwrap_or_default();
    diff_keys(&prev, &current.keys())
}
