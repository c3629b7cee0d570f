use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub source: SourceConfig,
    pub chunking: ChunkingConfig,
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

/// Local persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    /// Ingestion cursor file, rewritten atomically after each scan.
    pub cursor_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// External drop folder configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub folder: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_scan_deadline")]
    pub scan_deadline_secs: u64,
    /// Maximum number of source files ingested concurrently within one scan.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Chunk packing configuration (characters, not tokens)
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size_chars: usize,
    pub chunk_overlap_chars: usize,
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    /// "openai" (any OpenAI-compatible endpoint) or "hash" (deterministic, offline)
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embeddings_base_url")]
    pub base_url: String,
    pub batch_size: usize,
    pub dimensions: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Per-request timeout for the embeddings endpoint.
    #[serde(default = "default_embeddings_timeout")]
    pub timeout_secs: u64,
}

/// Remote vector store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_sync_deadline")]
    pub sync_deadline_secs: u64,
    /// Failed uploads allowed before a record is parked as Failed.
    #[serde(default = "default_max_sync_attempts")]
    pub max_sync_attempts: u32,
    /// Maximum pending records drained per sync cycle.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            collection: default_collection(),
            api_key_env: None,
            timeout_secs: default_remote_timeout(),
            sync_interval_secs: default_sync_interval(),
            sync_deadline_secs: default_sync_deadline(),
            max_sync_attempts: default_max_sync_attempts(),
            batch_limit: default_batch_limit(),
        }
    }
}

/// Which store(s) answer retrieval queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    #[default]
    Local,
    Remote,
    Both,
}

/// Retrieval configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub mode: RetrievalMode,
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default)]
    pub min_score: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::Local,
            default_k: default_k(),
            min_score: None,
        }
    }
}

/// Document metadata extraction configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataConfig {
    /// Lowercase file-name keyword -> category label
    #[serde(default)]
    pub categories: BTreeMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["pdf".to_string(), "md".to_string(), "txt".to_string()]
}

fn default_scan_interval() -> u64 {
    60
}

fn default_scan_deadline() -> u64 {
    600
}

fn default_workers() -> usize {
    4
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_embeddings_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embeddings_timeout() -> u64 {
    30
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_collection() -> String {
    "ragsync_chunks".to_string()
}

fn default_remote_timeout() -> u64 {
    30
}

fn default_sync_interval() -> u64 {
    30
}

fn default_sync_deadline() -> u64 {
    300
}

fn default_max_sync_attempts() -> u32 {
    5
}

fn default_batch_limit() -> usize {
    500
}

fn default_k() -> usize {
    5
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in RAGSYNC_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("RAGSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml_str(&config_str)?;
        config.validate_environment()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string (no filesystem or env checks).
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size_chars == 0 {
            anyhow::bail!("chunking.chunk_size_chars must be greater than 0");
        }

        if self.chunking.chunk_overlap_chars >= self.chunking.chunk_size_chars {
            anyhow::bail!("chunking.chunk_overlap_chars must be less than chunk_size_chars");
        }

        if self.embeddings.batch_size == 0 {
            anyhow::bail!("embeddings.batch_size must be greater than 0");
        }

        if self.embeddings.dimensions == 0 {
            anyhow::bail!("embeddings.dimensions must be greater than 0");
        }

        if self.embeddings.max_attempts == 0 {
            anyhow::bail!("embeddings.max_attempts must be at least 1");
        }
        if self.embeddings.timeout_secs == 0 {
            anyhow::bail!("embeddings.timeout_secs must be greater than 0");
        }

        match self.embeddings.provider.as_str() {
            "openai" => {
                if self.embeddings.model.is_empty() {
                    anyhow::bail!("embeddings.model is required for the openai provider");
                }
                url::Url::parse(&self.embeddings.base_url).with_context(|| {
                    format!("embeddings.base_url is not a valid URL: {}", self.embeddings.base_url)
                })?;
            }
            "hash" => {}
            other => anyhow::bail!("Unknown embeddings.provider: {} (expected openai or hash)", other),
        }

        if self.source.workers == 0 {
            anyhow::bail!("source.workers must be greater than 0");
        }

        if self.source.scan_interval_secs == 0 || self.remote.sync_interval_secs == 0 {
            anyhow::bail!("scan and sync intervals must be greater than 0");
        }

        if self.retrieval.default_k == 0 {
            anyhow::bail!("retrieval.default_k must be greater than 0");
        }

        if let Some(min_score) = self.retrieval.min_score {
            if !(-1.0..=1.0).contains(&min_score) {
                anyhow::bail!("retrieval.min_score must be between -1.0 and 1.0");
            }
        }

        if self.retrieval.mode != RetrievalMode::Local && !self.remote.enabled {
            anyhow::bail!(
                "retrieval.mode = {:?} requires [remote] enabled = true",
                self.retrieval.mode
            );
        }

        if self.remote.enabled {
            url::Url::parse(&self.remote.url)
                .with_context(|| format!("remote.url is not a valid URL: {:?}", self.remote.url))?;
            if self.remote.collection.is_empty() {
                anyhow::bail!("remote.collection must not be empty");
            }
            if self.remote.max_sync_attempts == 0 {
                anyhow::bail!("remote.max_sync_attempts must be at least 1");
            }
            if self.remote.batch_limit == 0 {
                anyhow::bail!("remote.batch_limit must be greater than 0");
            }
        }

        Ok(())
    }

    /// Checks that depend on the process environment and filesystem.
    fn validate_environment(&self) -> Result<()> {
        if !self.source.folder.is_dir() {
            anyhow::bail!(
                "source.folder must be an existing directory: {}",
                self.source.folder.display()
            );
        }

        if self.embeddings.provider == "openai" {
            std::env::var(&self.embeddings.api_key_env).with_context(|| {
                format!(
                    "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                    self.embeddings.api_key_env
                )
            })?;
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.storage.db_path
    }

    /// Get the external drop folder
    pub fn source_folder(&self) -> &Path {
        &self.source.folder
    }

    /// API key for the remote store, if one is configured.
    pub fn remote_api_key(&self) -> Option<String> {
        self.remote
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn base_config(folder: &str) -> String {
        format!(
            r#"
[storage]
db_path = "./test.db"
cursor_path = "./cursor.json"
log_level = "debug"

[source]
folder = "{}"
workers = 2

[chunking]
chunk_size_chars = 1000
chunk_overlap_chars = 100

[embeddings]
provider = "openai"
model = "text-embedding-3-small"
api_key_env = "RAGSYNC_TEST_OPENAI_KEY"
batch_size = 64
dimensions = 1536
"#,
            folder
        )
    }

    fn escaped(path: &Path) -> String {
        path.to_str().unwrap().replace('\\', "\\\\")
    }

    #[test]
    fn test_parse_defaults() {
        let config = Config::from_toml_str(&base_config("/tmp/drop")).unwrap();
        assert_eq!(config.storage.log_level, "debug");
        assert_eq!(config.source.workers, 2);
        assert_eq!(config.source.extensions, vec!["pdf", "md", "txt"]);
        assert_eq!(config.embeddings.max_attempts, 3);
        assert_eq!(config.embeddings.timeout_secs, 30);
        assert!(!config.remote.enabled);
        assert_eq!(config.retrieval.mode, RetrievalMode::Local);
        assert_eq!(config.retrieval.default_k, 5);
        assert!(config.metadata.categories.is_empty());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let toml = base_config("/tmp/drop").replace("chunk_overlap_chars = 100", "chunk_overlap_chars = 1000");
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap_chars"));
    }

    #[test]
    fn test_remote_mode_requires_remote_enabled() {
        let toml = format!("{}\n[retrieval]\nmode = \"both\"\n", base_config("/tmp/drop"));
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("requires [remote]"));

        let toml = format!(
            "{}\n[remote]\nenabled = true\nurl = \"http://localhost:6333\"\n\n[retrieval]\nmode = \"both\"\n",
            base_config("/tmp/drop")
        );
        let config = Config::from_toml_str(&toml).unwrap();
        assert_eq!(config.retrieval.mode, RetrievalMode::Both);
        assert_eq!(config.remote.collection, "ragsync_chunks");
        assert_eq!(config.remote.max_sync_attempts, 5);
    }

    #[test]
    fn test_embeddings_timeout() {
        let toml = base_config("/tmp/drop").replace("dimensions = 1536", "dimensions = 1536\ntimeout_secs = 5");
        assert_eq!(Config::from_toml_str(&toml).unwrap().embeddings.timeout_secs, 5);

        let toml = base_config("/tmp/drop").replace("dimensions = 1536", "dimensions = 1536\ntimeout_secs = 0");
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("embeddings.timeout_secs"));
    }

    #[test]
    fn test_invalid_remote_url() {
        let toml = format!("{}\n[remote]\nenabled = true\nurl = \"not a url\"\n", base_config("/tmp/drop"));
        assert!(Config::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_unknown_provider() {
        let toml = base_config("/tmp/drop").replace("provider = \"openai\"", "provider = \"word2vec\"");
        let err = Config::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("word2vec"));
    }

    #[test]
    fn test_metadata_categories() {
        let toml = format!(
            "{}\n[metadata.categories]\ncontract = \"Contract Law\"\ncyber = \"Cyber Law\"\n",
            base_config("/tmp/drop")
        );
        let config = Config::from_toml_str(&toml).unwrap();
        assert_eq!(config.metadata.categories.get("contract").unwrap(), "Contract Law");
    }

    #[test]
    fn test_config_load_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, base_config(&escaped(temp_dir.path()))).unwrap();

        std::env::set_var("RAGSYNC_CONFIG", config_path.to_str().unwrap());
        std::env::set_var("RAGSYNC_TEST_OPENAI_KEY", "test-key");
        let config = Config::load();
        std::env::remove_var("RAGSYNC_CONFIG");
        std::env::remove_var("RAGSYNC_TEST_OPENAI_KEY");

        let config = config.expect("config should load");
        assert_eq!(config.embeddings.batch_size, 64);
        assert_eq!(config.source_folder(), temp_dir.path());
    }

    #[test]
    fn test_config_missing_api_key() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, base_config(&escaped(temp_dir.path()))).unwrap();

        std::env::set_var("RAGSYNC_CONFIG", config_path.to_str().unwrap());
        std::env::remove_var("RAGSYNC_TEST_OPENAI_KEY");
        let config = Config::load();
        std::env::remove_var("RAGSYNC_CONFIG");

        let err = config.unwrap_err();
        assert!(err.to_string().contains("RAGSYNC_TEST_OPENAI_KEY"));
    }

    #[test]
    fn test_config_missing_folder() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let missing = temp_dir.path().join("does-not-exist");
        let toml = base_config(&escaped(&missing)).replace("provider = \"openai\"", "provider = \"hash\"");
        fs::write(&config_path, toml).unwrap();

        std::env::set_var("RAGSYNC_CONFIG", config_path.to_str().unwrap());
        let config = Config::load();
        std::env::remove_var("RAGSYNC_CONFIG");

        assert!(config.unwrap_err().to_string().contains("source.folder"));
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        std::env::set_var("RAGSYNC_CONFIG", "nonexistent.toml");
        let config = Config::load();
        std::env::remove_var("RAGSYNC_CONFIG");
        assert!(config.is_err());
    }
}
