//! Configuration management for the retrieval engine
//!
//! All tunables live here: branch timeouts, fusion constants, boost factors,
//! budget shares and cache TTLs. Loaded from TOML, validated before use.

use crate::error::{BraidError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Dual-path retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Per-branch timeout in milliseconds
    pub branch_timeout_ms: u64,
    /// Candidate pool size when reranking widens the search
    pub rerank_pool_size: usize,
    /// Default number of results when the query does not say
    pub default_top_k: usize,
    /// Hard cap on top_k
    pub max_top_k: usize,
    /// Maximum accepted query length in characters
    pub max_query_len: usize,
    /// Similarity above which two results count as near-duplicates
    pub diversity_threshold: f32,
    /// Boost for chunks younger than `recency_days`
    pub recency_boost: f32,
    /// Age cutoff for the recency boost, in days
    pub recency_days: i64,
    /// Boost for chunks owned by the requesting user
    pub ownership_boost: f32,
    /// Boost for chunks whose source is marked high-quality
    pub quality_boost: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            branch_timeout_ms: 400,
            rerank_pool_size: 50,
            default_top_k: 10,
            max_top_k: 100,
            max_query_len: 1024,
            diversity_threshold: 0.9,
            recency_boost: 1.2,
            recency_days: 7,
            ownership_boost: 1.1,
            quality_boost: 1.15,
        }
    }
}

/// Rank fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// RRF smoothing constant (typically 60)
    pub rrf_k: f32,
    /// Semantic weight for CombSum when intent gives no steer
    pub semantic_weight: f32,
    /// Keyword weight for CombSum when intent gives no steer
    pub keyword_weight: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            semantic_weight: 0.5,
            keyword_weight: 0.5,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name (e.g., "all-MiniLM-L6-v2")
    pub model: String,
    /// Embedding dimension (must match the model)
    pub dimension: usize,
    /// Query-embedding cache capacity (entries)
    pub cache_capacity: u64,
    /// Query-embedding cache TTL in seconds
    pub cache_ttl_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            cache_capacity: 10_000,
            cache_ttl_secs: 3600,
        }
    }
}

/// Context assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Share of max_tokens reserved for the prompt
    pub prompt_share: f32,
    /// Share of max_tokens available to assembled context (hard ceiling)
    pub context_share: f32,
    /// Share of max_tokens reserved for the model response
    pub response_share: f32,
    /// Tokenizer model; "cl100k_base" counts exactly, anything else
    /// falls back to the chars/4 approximation
    pub tokenizer: String,
    /// Per-chunk token count cache capacity
    pub token_cache_capacity: u64,
    /// Minimum query-term overlap for a sentence to survive extractive
    /// compression
    pub extractive_cutoff: f32,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            prompt_share: 0.3,
            context_share: 0.5,
            response_share: 0.2,
            tokenizer: "cl100k_base".to_string(),
            token_cache_capacity: 50_000,
            extractive_cutoff: 0.1,
        }
    }
}

/// Assembled-context cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache capacity (entries)
    pub capacity: u64,
    /// Entry TTL in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            ttl_secs: 3600,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BraidError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| BraidError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let config: Config = toml::from_str(&content)?;

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| BraidError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }
}
