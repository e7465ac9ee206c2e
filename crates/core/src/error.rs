use std::path::PathBuf;

/// Configuration defects. These are the only conditions that abort a run, and
/// they are all detected before any probe is issued.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("manifest declares no services")]
    NoServices,

    #[error("service '{0}' is declared more than once")]
    DuplicateService(String),

    #[error("service '{service}' depends on undeclared service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("gateway service '{0}' is not declared in [[services]]")]
    UnknownGateway(String),

    #[error("unsafe remediation command '{label}': {reason}")]
    UnsafeRemediation { label: String, reason: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}
