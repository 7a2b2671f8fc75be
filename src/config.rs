use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::retry::BackoffPolicy;

/// Largest accepted `max_backoff_seconds`.
pub const MAX_BACKOFF_LIMIT_SECONDS: f64 = 3600.0;

/// Flags sent next to `items` on every upsert request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyOptions {
    /// Replace properties instead of patching them.
    pub replace: bool,
    /// Ignore items whose `existingVersion` is stale instead of failing.
    pub skip_on_version_conflict: bool,
    /// Create missing direct-relation targets.
    pub auto_create_direct_relations: bool,
    /// Create missing edge start nodes.
    pub auto_create_start_nodes: bool,
    /// Create missing edge end nodes.
    pub auto_create_end_nodes: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            replace: false,
            skip_on_version_conflict: false,
            auto_create_direct_relations: true,
            auto_create_start_nodes: false,
            auto_create_end_nodes: false,
        }
    }
}

impl ApplyOptions {
    pub(crate) fn to_body_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("replace".into(), Value::Bool(self.replace));
        fields.insert(
            "skipOnVersionConflict".into(),
            Value::Bool(self.skip_on_version_conflict),
        );
        fields.insert(
            "autoCreateDirectRelations".into(),
            Value::Bool(self.auto_create_direct_relations),
        );
        fields.insert(
            "autoCreateStartNodes".into(),
            Value::Bool(self.auto_create_start_nodes),
        );
        fields.insert(
            "autoCreateEndNodes".into(),
            Value::Bool(self.auto_create_end_nodes),
        );
        fields
    }
}

/// Tuning knobs for [`crate::InstancesClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Items per upsert request.
    pub create_limit: usize,
    /// Items per delete request.
    pub delete_limit: usize,
    /// Requested parallelism; capped by the pool ceilings.
    pub max_workers: usize,
    /// Base of the exponential backoff, in seconds.
    pub backoff_factor: f64,
    /// Longest single backoff, in seconds.
    pub max_backoff_seconds: f64,
    /// Retries allowed per failure category and task lineage.
    pub max_retries_per_category: u32,
    /// Randomize backoff sleeps.
    pub jitter: bool,
    /// Gzip request bodies.
    pub compress: bool,
    /// Upsert flags.
    pub apply: ApplyOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            create_limit: 1000,
            delete_limit: 1000,
            max_workers: 5,
            backoff_factor: 0.5,
            max_backoff_seconds: 30.0,
            max_retries_per_category: 10,
            jitter: true,
            compress: true,
            apply: ApplyOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { path: None, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.create_limit == 0 {
            return Err(ConfigError::Invalid("create_limit must be positive"));
        }
        if self.delete_limit == 0 {
            return Err(ConfigError::Invalid("delete_limit must be positive"));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be positive"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(ConfigError::Invalid(
                "backoff_factor must be a non-negative number",
            ));
        }
        if !self.max_backoff_seconds.is_finite() || self.max_backoff_seconds < 0.0 {
            return Err(ConfigError::Invalid(
                "max_backoff_seconds must be a non-negative number",
            ));
        }
        if self.max_backoff_seconds > MAX_BACKOFF_LIMIT_SECONDS {
            return Err(ConfigError::Invalid(
                "max_backoff_seconds must not exceed one hour",
            ));
        }
        Ok(())
    }

    /// Backoff policy shared by every tracker of a call.
    pub fn policy(&self) -> Arc<BackoffPolicy> {
        Arc::new(BackoffPolicy {
            backoff_factor: self.backoff_factor,
            max_backoff_seconds: self.max_backoff_seconds,
            max_retries_per_category: self.max_retries_per_category,
            jitter: self.jitter,
        })
    }

    /// Sets the upsert batch size.
    pub fn create_limit(mut self, limit: usize) -> Self {
        self.create_limit = limit;
        self
    }

    /// Sets the delete batch size.
    pub fn delete_limit(mut self, limit: usize) -> Self {
        self.delete_limit = limit;
        self
    }

    /// Sets the requested parallelism.
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Sets backoff factor and cap, in seconds.
    pub fn backoff(mut self, factor: f64, max_seconds: f64) -> Self {
        self.backoff_factor = factor;
        self.max_backoff_seconds = max_seconds;
        self
    }

    /// Sets the per-category retry budget.
    pub fn max_retries_per_category(mut self, retries: u32) -> Self {
        self.max_retries_per_category = retries;
        self
    }

    /// Enables or disables backoff jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Enables or disables gzip request bodies.
    pub fn compress(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    /// Sets the upsert flags.
    pub fn apply_options(mut self, options: ApplyOptions) -> Self {
        self.apply = options;
        self
    }
}

/// Failure to load or validate an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The TOML was malformed.
    #[error("failed to parse config: {source}")]
    Parse {
        /// File that was parsed, if any.
        path: Option<PathBuf>,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.create_limit, 1000);
        assert!(config.compress);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            create_limit = 200
            max_workers = 8

            [apply]
            replace = true
            "#,
        )
        .unwrap();
        assert_eq!(config.create_limit, 200);
        assert_eq!(config.delete_limit, 1000);
        assert_eq!(config.max_workers, 8);
        assert!(config.apply.replace);
        assert!(config.apply.auto_create_direct_relations);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = EngineConfig::from_toml_str("delete_limit = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("delete_limit")));
        let err = EngineConfig::default().backoff(-1.0, 5.0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = EngineConfig::default().backoff(1e20, 1e20).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("max_backoff_seconds")));
        EngineConfig::default()
            .backoff(1e20, MAX_BACKOFF_LIMIT_SECONDS)
            .validate()
            .unwrap();
        assert!(matches!(
            EngineConfig::from_toml_str("max_workers = \"many\""),
            Err(ConfigError::Parse { path: None, .. })
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "compress = false\nmax_retries_per_category = 3").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert!(!config.compress);
        assert_eq!(config.policy().max_retries_per_category, 3);
    }

    #[test]
    fn body_fields_use_wire_names() {
        let fields = ApplyOptions::default().to_body_fields();
        assert_eq!(fields["autoCreateDirectRelations"], Value::Bool(true));
        assert_eq!(fields["replace"], Value::Bool(false));
    }
}
