use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context as _;
use atelier_core::history::HistoryConfig;
use atelier_generation::GenerationApiConfig;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Workspace document location (default: `./workspace.json`).
    pub workspace_path: PathBuf,
    pub history_capacity: usize,
    pub history_debounce: Duration,
    pub persist_debounce: Duration,
    /// Assets kept by the in-memory library (default: `12`).
    pub recent_asset_limit: usize,
    /// Generation proxy; `None` when `GENERATION_API_URL` is unset.
    pub generation: Option<GenerationApiConfig>,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default              |
    /// |---------------------------|----------------------|
    /// | `WORKSPACE_PATH`          | `./workspace.json`   |
    /// | `HISTORY_CAPACITY`        | `50`                 |
    /// | `HISTORY_DEBOUNCE_MS`     | `1000`               |
    /// | `PERSIST_DEBOUNCE_MS`     | `500`                |
    /// | `RECENT_ASSET_LIMIT`      | `12`                 |
    /// | `GENERATION_API_URL`      | unset                |
    /// | `GENERATION_API_KEY`      | unset                |
    /// | `GENERATION_TIMEOUT_SECS` | `120`                |
    pub fn from_env() -> anyhow::Result<Self> {
        let workspace_path =
            PathBuf::from(std::env::var("WORKSPACE_PATH").unwrap_or_else(|_| "./workspace.json".into()));

        let history_capacity = parse_var("HISTORY_CAPACITY", 50usize)?;
        let history_debounce = Duration::from_millis(parse_var("HISTORY_DEBOUNCE_MS", 1000u64)?);
        let persist_debounce = Duration::from_millis(parse_var("PERSIST_DEBOUNCE_MS", 500u64)?);
        let recent_asset_limit = parse_var("RECENT_ASSET_LIMIT", 12usize)?;

        let generation = match std::env::var("GENERATION_API_URL") {
            Ok(url) if !url.trim().is_empty() => Some(GenerationApiConfig {
                api_url: url,
                api_key: std::env::var("GENERATION_API_KEY").ok(),
                timeout: Duration::from_secs(parse_var("GENERATION_TIMEOUT_SECS", 120u64)?),
            }),
            _ => None,
        };

        Ok(Self {
            workspace_path,
            history_capacity,
            history_debounce,
            persist_debounce,
            recent_asset_limit,
            generation,
        })
    }

    pub fn history(&self) -> HistoryConfig {
        HistoryConfig {
            capacity: self.history_capacity,
            debounce: self.history_debounce,
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}
