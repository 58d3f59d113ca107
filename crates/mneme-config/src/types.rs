//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [memory]                 # durable store, index artifact, lock bounds
//! [embedding]              # provider chain
//! [embedding.remote]       # HTTP embedding service
//! [embedding.local]        # in-process model
//! [logging]                # console / file logging
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding the remote embedding service URL.
pub const EMBED_URL_ENV: &str = "MNEME_EMBED_URL";

/// Environment variable overriding the local embedding model name.
pub const EMBED_MODEL_ENV: &str = "MNEME_EMBED_MODEL";

/// Environment variable carrying the remote embedding service token.
pub const EMBED_API_KEY_ENV: &str = "MNEME_EMBED_API_KEY";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "MNEME_DATA_DIR";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// Maps to the full TOML config file. All sections are optional so that
/// partial configs (e.g., project-local overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MnemeConfig {
    /// Memory store configuration.
    pub memory: Option<MemoryConfig>,

    /// Embedding provider chain configuration.
    pub embedding: Option<EmbeddingConfig>,

    /// Logging configuration.
    pub logging: Option<LoggingConfig>,
}

impl MnemeConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: MnemeConfig) {
        if other.memory.is_some() {
            self.memory = other.memory;
        }

        if other.embedding.is_some() {
            self.embedding = other.embedding;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Effective memory section (defaults when absent).
    pub fn memory(&self) -> MemoryConfig {
        self.memory.clone().unwrap_or_default()
    }

    /// Effective embedding section (defaults when absent).
    pub fn embedding(&self) -> EmbeddingConfig {
        self.embedding.clone().unwrap_or_default()
    }

    /// Effective logging section (defaults when absent).
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Apply `MNEME_*` environment overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply environment-style overrides using a custom lookup.
    ///
    /// Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(EMBED_URL_ENV) {
            let embedding = self.embedding.get_or_insert_with(EmbeddingConfig::default);
            embedding.remote.url = Some(url);
            embedding.remote.enabled = true;
        }

        if let Some(model) = get(EMBED_MODEL_ENV) {
            let embedding = self.embedding.get_or_insert_with(EmbeddingConfig::default);
            embedding.local.model_name = model;
        }

        if let Some(key) = get(EMBED_API_KEY_ENV) {
            let embedding = self.embedding.get_or_insert_with(EmbeddingConfig::default);
            embedding.remote.api_key = Some(key);
        }

        if let Some(dir) = get(DATA_DIR_ENV) {
            let memory = self.memory.get_or_insert_with(MemoryConfig::default);
            memory.data_dir = Some(PathBuf::from(dir));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Memory store configuration.
///
/// ```toml
/// [memory]
/// data_dir = "~/.local/share/mneme"
/// database = "memories.sqlite"
/// index_file = "memories.index"
/// accelerated_index = true
/// busy_timeout_secs = 30
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Directory holding the database and the index artifact.
    /// Defaults to the platform data dir (`~/.local/share/mneme` on Linux).
    pub data_dir: Option<PathBuf>,
    /// Database file. Relative paths are resolved from `data_dir`.
    pub database: PathBuf,
    /// Index artifact file. Relative paths are resolved from `data_dir`.
    pub index_file: PathBuf,
    /// Whether the sqlite-vec accelerated index is used.
    /// When false every search is a brute-force scan.
    pub accelerated_index: bool,
    /// How long SQLite waits on a locked database before failing.
    pub busy_timeout_secs: u64,
    /// How long an operation waits for the store lock before failing.
    pub lock_timeout_secs: u64,
    /// Default number of search results.
    pub search_limit: usize,
    /// Default number of entries returned by list.
    pub list_limit: usize,
    /// Default batch size for re-embedding.
    pub reembed_batch_size: usize,
    /// Default corpus bound for compaction.
    pub compaction_max_entries: usize,
    /// Character budget for fallback compaction summaries.
    pub summary_char_budget: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database: PathBuf::from("memories.sqlite"),
            index_file: PathBuf::from("memories.index"),
            accelerated_index: true,
            busy_timeout_secs: 30,
            lock_timeout_secs: 60,
            search_limit: 6,
            list_limit: 200,
            reembed_batch_size: 128,
            compaction_max_entries: 1000,
            summary_char_budget: 2000,
        }
    }
}

impl MemoryConfig {
    /// Effective data directory.
    pub fn effective_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mneme")
        })
    }

    /// Absolute path of the database file.
    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.database)
    }

    /// Absolute path of the index artifact.
    pub fn index_path(&self) -> PathBuf {
        self.resolve(&self.index_file)
    }

    /// SQLite busy timeout.
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }

    /// Store lock timeout.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    fn resolve(&self, path: &PathBuf) -> PathBuf {
        if path.is_absolute() {
            path.clone()
        } else {
            self.effective_data_dir().join(path)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Embedding provider chain configuration.
///
/// Providers are tried in order: remote service, local model, then the
/// deterministic character fallback, which always succeeds.
///
/// ```toml
/// [embedding]
/// fallback_dimensions = 384
///
/// [embedding.remote]
/// url = "http://127.0.0.1:9000/embed"
/// model = "embed_service"
/// timeout_secs = 60
///
/// [embedding.local]
/// model_name = "all-MiniLM-L6-v2"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Remote embedding service settings.
    pub remote: RemoteEmbeddingConfig,
    /// Local in-process model settings.
    pub local: LocalEmbeddingConfig,
    /// Dimensions of the character fallback vectors.
    pub fallback_dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            remote: RemoteEmbeddingConfig::default(),
            local: LocalEmbeddingConfig::default(),
            fallback_dimensions: 384,
        }
    }
}

impl EmbeddingConfig {
    /// Whether the remote section carries a token in plain text.
    pub fn has_plaintext_api_key(&self) -> bool {
        self.remote.api_key.is_some()
    }
}

/// Remote embedding service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteEmbeddingConfig {
    /// Whether the remote provider is part of the chain.
    pub enabled: bool,
    /// Endpoint accepting `{"texts": [...]}`.
    pub url: Option<String>,
    /// Provenance tag recorded on vectors produced by this service.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Bearer token (prefer `MNEME_EMBED_API_KEY`).
    pub api_key: Option<String>,
}

impl Default for RemoteEmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: Some("http://127.0.0.1:9000/embed".to_string()),
            model: "embed_service".to_string(),
            timeout_secs: 60,
            api_key: None,
        }
    }
}

impl RemoteEmbeddingConfig {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Local embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalEmbeddingConfig {
    /// Whether the local provider is part of the chain.
    pub enabled: bool,
    /// Model name, used as the provenance tag.
    pub model_name: String,
    /// Path to the ONNX model file.
    pub model_path: Option<PathBuf>,
    /// Path to the tokenizer.json file.
    pub tokenizer_path: Option<PathBuf>,
    /// Output dimensions of the model.
    pub dimensions: usize,
}

impl Default for LocalEmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_name: "all-MiniLM-L6-v2".to_string(),
            model_path: None,
            tokenizer_path: None,
            dimensions: 384,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration section.
///
/// ```toml
/// [logging]
/// filter = "mneme=debug,info"
/// directory = "~/.local/state/mneme/logs"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive for the console layer.
    pub filter: String,
    /// Directory for daily-rolling JSON log files. No file logging when unset.
    pub directory: Option<PathBuf>,
    /// Emit console output as JSON instead of human-readable lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "mneme_memory=info,mneme_embed=info,mneme_config=info,warn".to_string(),
            directory: None,
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_config() {
        let config = MnemeConfig::new();
        assert!(config.memory.is_none());
        assert!(config.embedding.is_none());
        assert!(config.logging.is_none());

        let memory = config.memory();
        assert_eq!(memory.search_limit, 6);
        assert_eq!(memory.list_limit, 200);
        assert_eq!(memory.reembed_batch_size, 128);
        assert!(memory.accelerated_index);
    }

    #[test]
    fn test_parse_memory_section() {
        let toml = r#"
[memory]
data_dir = "/var/lib/mneme"
accelerated_index = false
busy_timeout_secs = 5
"#;
        let config = MnemeConfig::from_toml(toml).unwrap();
        let memory = config.memory.unwrap();
        assert!(!memory.accelerated_index);
        assert_eq!(memory.busy_timeout(), Duration::from_secs(5));
        assert_eq!(
            memory.database_path(),
            PathBuf::from("/var/lib/mneme/memories.sqlite")
        );
        assert_eq!(
            memory.index_path(),
            PathBuf::from("/var/lib/mneme/memories.index")
        );
        // Unspecified fields keep their defaults
        assert_eq!(memory.lock_timeout_secs, 60);
    }

    #[test]
    fn test_absolute_database_path_is_kept() {
        let memory = MemoryConfig {
            data_dir: Some(PathBuf::from("/data")),
            database: PathBuf::from("/elsewhere/db.sqlite"),
            ..Default::default()
        };
        assert_eq!(memory.database_path(), PathBuf::from("/elsewhere/db.sqlite"));
    }

    #[test]
    fn test_parse_embedding_section() {
        let toml = r#"
[embedding]
fallback_dimensions = 128

[embedding.remote]
url = "http://embed.local/embed"
model = "bge-small"
timeout_secs = 3

[embedding.local]
enabled = false
"#;
        let config = MnemeConfig::from_toml(toml).unwrap();
        let embedding = config.embedding();
        assert_eq!(embedding.fallback_dimensions, 128);
        assert_eq!(
            embedding.remote.url.as_deref(),
            Some("http://embed.local/embed")
        );
        assert_eq!(embedding.remote.model, "bge-small");
        assert_eq!(embedding.remote.timeout(), Duration::from_secs(3));
        assert!(!embedding.local.enabled);
        assert_eq!(embedding.local.model_name, "all-MiniLM-L6-v2");
    }

    #[test]
    fn test_merge_override() {
        let mut base = MnemeConfig::from_toml(
            r#"
[memory]
search_limit = 10

[logging]
filter = "debug"
"#,
        )
        .unwrap();
        let overlay = MnemeConfig::from_toml(
            r#"
[memory]
search_limit = 3
"#,
        )
        .unwrap();

        base.merge(overlay);
        assert_eq!(base.memory().search_limit, 3);
        // Sections absent from the overlay are preserved
        assert_eq!(base.logging().filter, "debug");
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (EMBED_URL_ENV, "http://override/embed"),
            (EMBED_MODEL_ENV, "paraphrase-MiniLM"),
            (DATA_DIR_ENV, "/tmp/mneme-data"),
            (EMBED_API_KEY_ENV, ""),
        ]
        .into_iter()
        .collect();

        let mut config = MnemeConfig::new();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        let embedding = config.embedding();
        assert_eq!(embedding.remote.url.as_deref(), Some("http://override/embed"));
        assert_eq!(embedding.local.model_name, "paraphrase-MiniLM");
        // Empty values are ignored
        assert!(embedding.remote.api_key.is_none());
        assert_eq!(
            config.memory().effective_data_dir(),
            PathBuf::from("/tmp/mneme-data")
        );
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut config = MnemeConfig::new();
        config.memory = Some(MemoryConfig {
            compaction_max_entries: 50,
            ..Default::default()
        });
        let text = config.to_toml().unwrap();
        let parsed = MnemeConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.memory().compaction_max_entries, 50);
        assert!(parsed.embedding.is_none());
    }
}
