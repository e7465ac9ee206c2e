use std::path::Path;

use healthgate_core::classify::Classifier;
use healthgate_core::manifest::Manifest;
use healthgate_core::{Issue, RunScope};
use walkdir::{DirEntry, WalkDir};

const SOURCE_EXTENSIONS: &[&str] = &["go", "rs", "py", "js", "ts", "java", "rb"];

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// True if `dir` exists and holds at least one source file at any depth.
pub fn has_source_files(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .any(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| SOURCE_EXTENSIONS.contains(&x))
        })
}

/// `no_source_files` for every in-scope service whose `source_dir` is
/// missing or empty of sources.
pub fn check_sources(manifest: &Manifest, classifier: &Classifier, scope: &RunScope) -> Vec<Issue> {
    manifest
        .services
        .iter()
        .filter(|s| scope.includes(&s.name))
        .filter_map(|s| {
            let dir = s.source_dir.as_ref()?;
            if has_source_files(&manifest.resolve(dir)) {
                None
            } else {
                tracing::warn!(service = %s.name, %dir, "no source files");
                Some(classifier.no_source_files(&s.name, dir.as_str()))
            }
        })
        .collect()
}
