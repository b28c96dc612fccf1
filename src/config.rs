use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_LOG_FILTER: &str = "warn";

/// Runtime configuration loaded from environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    /// SQLite file holding the saved applications.
    pub db_path: PathBuf,

    /// Quiet period after the last change before the collection is saved.
    pub debounce: Duration,

    /// Log filter used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Config {
    /// Optional environment variables:
    /// - JOBTRACK_DB: database path (default: platform data dir, `jobtrack.db`)
    /// - JOBTRACK_DEBOUNCE_MS: save debounce window in milliseconds (default: 300)
    /// - JOBTRACK_LOG: log filter (default: warn)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup("JOBTRACK_DB")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);

        let debounce = lookup("JOBTRACK_DEBOUNCE_MS")
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_DEBOUNCE_MS));

        let log_filter = lookup("JOBTRACK_LOG")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Self {
            db_path,
            debounce,
            log_filter,
        }
    }
}

fn default_db_path() -> PathBuf {
    // Use XDG data directory or fallback
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobtrack") {
        proj_dirs.data_dir().join("jobtrack.db")
    } else {
        PathBuf::from("jobtrack.db")
    }
}
