use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::embedding::EmbeddingBackend;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub citations: CitationsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size as a character budget (≈800–1500 tokens).
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Whole paragraphs carried over into the next chunk.
    #[serde(default = "default_overlap_paragraphs")]
    pub overlap_paragraphs: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_paragraphs: default_overlap_paragraphs(),
        }
    }
}

fn default_max_chars() -> usize {
    4000
}
fn default_overlap_paragraphs() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Vector candidates fetched = match_count × fan_out.
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    /// Per-phase timeout for the vector and lexical candidate queries.
    #[serde(default = "default_phase_timeout_ms")]
    pub phase_timeout_ms: u64,
    /// Max age of the reverse-citation snapshot before the live join is
    /// preferred.
    #[serde(default = "default_snapshot_max_age_secs")]
    pub snapshot_max_age_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fan_out: default_fan_out(),
            semantic_weight: default_semantic_weight(),
            phase_timeout_ms: default_phase_timeout_ms(),
            snapshot_max_age_secs: default_snapshot_max_age_secs(),
        }
    }
}

fn default_fan_out() -> usize {
    5
}
fn default_semantic_weight() -> f64 {
    crate::models::DEFAULT_SEMANTIC_WEIGHT
}
fn default_phase_timeout_ms() -> u64 {
    2_000
}
fn default_snapshot_max_age_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Which backend of the closed set to use; "disabled" turns embedding
    /// off (lexical-only operation).
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Endpoint of the embedding API for the selected backend.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Concurrent in-flight batches per backend.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            endpoint: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            workers: default_workers(),
        }
    }
}

fn default_backend() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "LEXSEARCH_EMBED_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_workers() -> usize {
    4
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.backend != "disabled"
    }

    /// The configured backend descriptor, if embedding is enabled.
    pub fn backend_descriptor(&self) -> Option<EmbeddingBackend> {
        EmbeddingBackend::parse(&self.backend)
    }
}

/// Recognized citation grammars. The report-code registry is configurable
/// so new jurisdictions can be added without touching extraction logic.
#[derive(Debug, Deserialize, Clone)]
pub struct CitationsConfig {
    /// Court codes for the neutral form `[year] CODE number`.
    #[serde(default = "default_neutral_codes")]
    pub neutral_codes: Vec<String>,
    /// Report series codes for the form `[year] volume CODE page`.
    #[serde(default = "default_report_codes")]
    pub report_codes: Vec<String>,
    /// Characters at the start of a document treated as the header/caption
    /// region when classifying self-identifying citations.
    #[serde(default = "default_header_chars")]
    pub header_chars: usize,
}

impl Default for CitationsConfig {
    fn default() -> Self {
        Self {
            neutral_codes: default_neutral_codes(),
            report_codes: default_report_codes(),
            header_chars: default_header_chars(),
        }
    }
}

fn default_neutral_codes() -> Vec<String> {
    [
        "HKCFA", "HKCA", "HKCFI", "HKDC", "HKFC", "HKLT", "UKSC", "UKHL", "UKPC", "HCA",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_report_codes() -> Vec<String> {
    ["HKLR", "HKLRD", "HKCFAR", "HKC", "WLR", "AC"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_header_chars() -> usize {
    2000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be >= 1");
    }

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }

    if config.retrieval.fan_out == 0 {
        anyhow::bail!("retrieval.fan_out must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.semantic_weight) {
        anyhow::bail!("retrieval.semantic_weight must be in [0.0, 1.0]");
    }

    if config.embedding.is_enabled() {
        if config.embedding.backend_descriptor().is_none() {
            anyhow::bail!(
                "Unknown embedding backend: '{}'. Must be one of: {}, or disabled.",
                config.embedding.backend,
                EmbeddingBackend::ALL
                    .iter()
                    .map(|b| b.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
    }

    if config.citations.neutral_codes.is_empty() && config.citations.report_codes.is_empty() {
        anyhow::bail!("citations registry must declare at least one code");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexsearch.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let (_dir, path) = write_config("[db]\npath = \"/tmp/lex.sqlite\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.max_chars, 4000);
        assert_eq!(config.retrieval.fan_out, 5);
        assert!((config.retrieval.semantic_weight - 0.7).abs() < 1e-9);
        assert!(!config.embedding.is_enabled());
        assert!(config.citations.neutral_codes.contains(&"HKCFI".to_string()));
    }

    #[test]
    fn test_rejects_bad_weight() {
        let (_dir, path) = write_config(
            "[db]\npath = \"/tmp/lex.sqlite\"\n[retrieval]\nsemantic_weight = 1.4\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let (_dir, path) =
            write_config("[db]\npath = \"/tmp/lex.sqlite\"\n[embedding]\nbackend = \"mystery\"\n");
        assert!(load_config(&path).is_err());
    }
}
