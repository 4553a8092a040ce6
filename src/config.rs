use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{JournalError, Result};

pub const ENV_DATABASE: &str = "TRADING_JOURNAL_DB";
pub const ENV_DEMO_FILE: &str = "TRADING_JOURNAL_DEMO_FILE";
pub const ENV_LOG: &str = "TRADING_JOURNAL_LOG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Persistent document store
    Sqlite { path: PathBuf },
    /// Demo fallback; snapshot file optional
    Local { path: Option<PathBuf> },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Local { path: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = if let Some(path) = lookup(ENV_DATABASE) {
            BackendConfig::Sqlite {
                path: PathBuf::from(path),
            }
        } else if let Some(path) = lookup(ENV_DEMO_FILE) {
            BackendConfig::Local {
                path: Some(PathBuf::from(path)),
            }
        } else {
            BackendConfig::Local { path: None }
        };

        let config = Self {
            backend,
            log_filter: lookup(ENV_LOG).unwrap_or_else(default_log_filter),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            JournalError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = serde_json::from_str(&content).map_err(|e| {
            JournalError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let empty = match &self.backend {
            BackendConfig::Sqlite { path } => path.as_os_str().is_empty(),
            BackendConfig::Local { path: Some(path) } => path.as_os_str().is_empty(),
            BackendConfig::Local { path: None } => false,
        };
        if empty {
            return Err(JournalError::ConfigError(
                "Storage path must not be empty".to_string(),
            ));
        }
        if self.log_filter.trim().is_empty() {
            return Err(JournalError::ConfigError(
                "Log filter must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_demo(&self) -> bool {
        matches!(self.backend, BackendConfig::Local { .. })
    }

    /// Install the global logger. A second call is a no-op.
    pub fn init_logging(&self) {
        let _ = env_logger::Builder::new()
            .parse_filters(&self.log_filter)
            .format_timestamp_secs()
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_unconfigured_falls_back_to_demo() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend, BackendConfig::Local { path: None });
        assert!(config.is_demo());
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_database_takes_precedence() {
        let config = AppConfig::from_lookup(lookup(&[
            (ENV_DATABASE, "/tmp/journal.db"),
            (ENV_DEMO_FILE, "/tmp/demo.json"),
            (ENV_LOG, "debug"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Sqlite {
                path: PathBuf::from("/tmp/journal.db")
            }
        );
        assert!(!config.is_demo());
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn test_empty_path_rejected() {
        let err = AppConfig::from_lookup(lookup(&[(ENV_DATABASE, "")])).unwrap_err();
        assert!(matches!(err, JournalError::ConfigError(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"backend": {"kind": "local", "path": "demo.json"}}"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Local {
                path: Some(PathBuf::from("demo.json"))
            }
        );
        assert_eq!(config.log_filter, "info");

        assert!(AppConfig::from_file(&dir.path().join("missing.json")).is_err());
    }
}
