//! Configuration
//!
//! Two layers:
//! - [`QueryConfig`]: per-call read options handed to the datastore
//!   unchanged, plus the planner toggles for client-side fallbacks.
//! - [`Config`]: the JSON configuration file used by the CLI (kind
//!   registry, default query options, dataset for the in-memory datastore).

mod errors;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{Record, ANCESTOR_PROPERTY, KEY_PROPERTY};
use crate::observability::Severity;
use crate::planner::KindMetadata;
use crate::stream::ErrorConvention;

pub use errors::{ConfigError, ConfigResult};

/// Read consistency requested from the datastore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadConsistency {
    #[default]
    Strong,
    Eventual,
}

/// Per-query execution options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub read_consistency: ReadConsistency,
    /// Records fetched per backend round trip
    pub chunk_size: Option<u32>,
    /// Per-call deadline override in milliseconds
    pub deadline_ms: Option<u64>,
    /// Evaluate filters the datastore cannot express client-side
    pub allow_in_memory_filter: bool,
    /// Evaluate joins the merge join cannot handle client-side
    pub allow_in_memory_join: bool,
    /// Error family surfaced to callers
    pub error_convention: ErrorConvention,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            read_consistency: ReadConsistency::Strong,
            chunk_size: None,
            deadline_ms: None,
            allow_in_memory_filter: false,
            allow_in_memory_join: false,
            error_convention: ErrorConvention::Datastore,
        }
    }
}

impl QueryConfig {
    pub fn allows_stale_reads(&self) -> bool {
        self.read_consistency == ReadConsistency::Eventual
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    pub fn with_in_memory_filter(mut self, allow: bool) -> Self {
        self.allow_in_memory_filter = allow;
        self
    }

    pub fn with_in_memory_join(mut self, allow: bool) -> Self {
        self.allow_in_memory_join = allow;
        self
    }

    pub fn with_error_convention(mut self, convention: ErrorConvention) -> Self {
        self.error_convention = convention;
        self
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.chunk_size == Some(0) {
            return Err(ConfigError::invalid("query.chunk_size must be > 0"));
        }
        if self.deadline_ms == Some(0) {
            return Err(ConfigError::invalid("query.deadline_ms must be > 0"));
        }
        Ok(())
    }
}

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Known kinds and their metadata
    pub kinds: BTreeMap<String, KindMetadata>,

    /// Default options for every query
    #[serde(default)]
    pub query: QueryConfig,

    /// JSON array of records loaded into the in-memory datastore
    #[serde(default)]
    pub dataset: Option<PathBuf>,

    /// Minimum log severity (default "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load and validate configuration from file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: Config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.kinds.is_empty() {
            return Err(ConfigError::invalid("at least one kind must be declared"));
        }

        for (kind, meta) in &self.kinds {
            if kind.is_empty() {
                return Err(ConfigError::invalid("kind names must be non-empty"));
            }
            for property in [&meta.id_property, &meta.parent_property].into_iter().flatten() {
                if property == KEY_PROPERTY || property == ANCESTOR_PROPERTY {
                    return Err(ConfigError::invalid(format!(
                        "kind '{}' maps reserved property '{}'",
                        kind, property
                    )));
                }
            }
            if meta.id_property.is_some() && meta.id_property == meta.parent_property {
                return Err(ConfigError::invalid(format!(
                    "kind '{}' uses the same property for identifier and parent",
                    kind
                )));
            }
        }

        self.query.validate()?;
        self.severity()?;
        Ok(())
    }

    /// Parsed minimum log severity
    pub fn severity(&self) -> ConfigResult<Severity> {
        Severity::parse(&self.log_level).ok_or_else(|| {
            ConfigError::invalid(format!("invalid log_level '{}'", self.log_level))
        })
    }

    /// Reads the configured dataset, or an empty one when none is set
    pub fn load_dataset(&self) -> ConfigResult<Vec<Record>> {
        let path = match &self.dataset {
            Some(path) => path,
            None => return Ok(Vec::new()),
        };
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_with_defaults() {
        let file = write_config(r#"{"kinds": {"Book": {"id_property": "id"}}}"#);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.query, QueryConfig::default());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.kinds["Book"].id_property.as_deref(), Some("id"));
        assert!(config.load_dataset().unwrap().is_empty());
    }

    #[test]
    fn test_query_section() {
        let file = write_config(
            r#"{
                "kinds": {"Book": {}},
                "query": {
                    "read_consistency": "eventual",
                    "deadline_ms": 250,
                    "allow_in_memory_filter": true,
                    "error_convention": "persistence"
                }
            }"#,
        );
        let config = Config::load(file.path()).unwrap();

        assert!(config.query.allows_stale_reads());
        assert_eq!(config.query.deadline(), Some(Duration::from_millis(250)));
        assert!(config.query.allow_in_memory_filter);
        assert!(!config.query.allow_in_memory_join);
        assert_eq!(config.query.error_convention, ErrorConvention::Persistence);
    }

    #[test]
    fn test_rejects_reserved_property() {
        let file = write_config(r#"{"kinds": {"Book": {"id_property": "__key__"}}}"#);
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let file = write_config(r#"{"kinds": {"Book": {}}, "query": {"chunk_size": 0}}"#);
        let err = Config::load(file.path()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[test]
    fn test_rejects_bad_json_and_missing_file() {
        let file = write_config("{not json");
        assert_eq!(Config::load(file.path()).unwrap_err().code(), "CONFIG_PARSE_FAILED");

        let missing = Path::new("/nonexistent/kvquery.json");
        assert_eq!(Config::load(missing).unwrap_err().code(), "CONFIG_READ_FAILED");
    }

    #[test]
    fn test_load_dataset() {
        let data = write_config(
            r#"[{"key": {"kind": "Book", "id": 1}, "properties": {"title": "Dune"}}]"#,
        );
        let file = write_config(&format!(
            r#"{{"kinds": {{"Book": {{}}}}, "dataset": {:?}}}"#,
            data.path().display().to_string()
        ));
        let config = Config::load(file.path()).unwrap();
        let records = config.load_dataset().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("title").and_then(|v| v.as_text()), Some("Dune"));
    }
}
