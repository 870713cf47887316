use thiserror::Error;

/// Errors from the hotspot store and galaxy index (both backed by `rusqlite`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration '{name}' failed: {source}")]
    Migration {
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid density inputs: mass={mass}, inner_radius={inner}, outer_radius={outer}")]
    InvalidDensity { mass: f64, inner: f64, outer: f64 },

    #[error("no row for system={system:?} body={body:?}")]
    NotFound { system: String, body: String },

    #[error("csv overlay error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from tailing and parsing journal files.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("io error reading journal: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed journal line {line}: {source}")]
    Json {
        line: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("no journal files found in {0}")]
    NoJournalFound(std::path::PathBuf),
}

/// Errors loading or saving the config store.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("atomic write to {path} failed: {source}")]
    AtomicWrite {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors writing or amending session reports.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("atomic write to {path} failed: {source}")]
    AtomicWrite {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session report at {0} has no matching CSV row for its timestamp")]
    MissingCsvRow(std::path::PathBuf),

    #[error("session report at {0} could not be parsed")]
    MalformedReport(std::path::PathBuf),
}

/// Initializes the crate-wide `tracing` subscriber. Call once at process start.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("elitemining_core=info,elitemining_daemon=info")
        }))
        .init();
}
