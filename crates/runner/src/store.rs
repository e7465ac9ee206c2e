//! Persisted run state: the latest run and the one before it.
//!
//! Each file is replaced by writing a sibling `.tmp` and renaming it over the
//! target, so a crash leaves either the old or the new document, never a torn
//! one.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use healthgate_core::diff::{diff_runs, DiffResult};
use healthgate_core::manifest::Manifest;
use healthgate_core::ValidationRun;

const LATEST: &str = "latest.json";
const PREVIOUS: &str = "previous.json";

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `state.dir` from the manifest, `~` expanded, unless overridden.
    pub fn from_manifest(manifest: &Manifest, dir_override: Option<&Path>) -> Self {
        match dir_override {
            Some(dir) => Self::new(dir),
            None => {
                let expanded = shellexpand::tilde(&manifest.state.dir).to_string();
                Self::new(manifest.resolve(&expanded))
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(LATEST)
    }

    pub fn previous_path(&self) -> PathBuf {
        self.dir.join(PREVIOUS)
    }

    pub fn latest(&self) -> Result<Option<ValidationRun>> {
        read_run(&self.latest_path())
    }

    pub fn previous(&self) -> Result<Option<ValidationRun>> {
        read_run(&self.previous_path())
    }

    /// Rotate latest into previous, then write `run` as latest.
    pub fn save(&self, run: &ValidationRun) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create state dir {}", self.dir.display()))?;

        let latest = self.latest_path();
        if latest.exists() {
            let bytes =
                std::fs::read(&latest).with_context(|| format!("read {}", latest.display()))?;
            write_atomic(&self.previous_path(), &bytes)?;
        }

        let json = serde_json::to_vec_pretty(run).context("serialize run")?;
        write_atomic(&latest, &json)?;
        tracing::debug!(run_id = %run.run_id, dir = %self.dir.display(), "run saved");
        Ok(())
    }

    /// Diff of the two stored runs; everything is new when only one exists.
    pub fn diff(&self) -> Result<Option<DiffResult>> {
        let Some(latest) = self.latest()? else {
            return Ok(None);
        };
        let previous = self.previous()?;
        Ok(Some(diff_runs(previous.as_ref(), &latest)))
    }
}

fn read_run(path: &Path) -> Result<Option<ValidationRun>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let run = serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(run))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}
