use crate::config::Config;
use crate::error::{BraidError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_retrieval(config, &mut errors);
        Self::validate_fusion(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_assembly(config, &mut errors);
        Self::validate_cache(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BraidError::ConfigValidation { errors })
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let r = &config.retrieval;

        if r.branch_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "retrieval.branch_timeout_ms",
                "Branch timeout must be greater than 0",
            ));
        }

        if r.default_top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.default_top_k",
                "default_top_k must be greater than 0",
            ));
        }

        if r.default_top_k > r.max_top_k {
            errors.push(ValidationError::new(
                "retrieval.default_top_k",
                format!(
                    "default_top_k ({}) exceeds max_top_k ({})",
                    r.default_top_k, r.max_top_k
                ),
            ));
        }

        if !(0.0..=1.0).contains(&r.diversity_threshold) {
            errors.push(ValidationError::new(
                "retrieval.diversity_threshold",
                "diversity_threshold must be in [0, 1]",
            ));
        }

        for (path, boost) in [
            ("retrieval.recency_boost", r.recency_boost),
            ("retrieval.ownership_boost", r.ownership_boost),
            ("retrieval.quality_boost", r.quality_boost),
        ] {
            if boost < 1.0 {
                errors.push(ValidationError::new(
                    path,
                    "Boost factors must be >= 1.0",
                ));
            }
        }
    }

    fn validate_fusion(config: &Config, errors: &mut Vec<ValidationError>) {
        let f = &config.fusion;

        if f.rrf_k <= 0.0 {
            errors.push(ValidationError::new(
                "fusion.rrf_k",
                "RRF k constant must be positive",
            ));
        }

        if f.semantic_weight <= 0.0 || f.keyword_weight <= 0.0 {
            errors.push(ValidationError::new(
                "fusion.semantic_weight",
                "Fusion weights must be positive",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let e = &config.embedding;

        if e.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if e.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }
    }

    fn validate_assembly(config: &Config, errors: &mut Vec<ValidationError>) {
        let a = &config.assembly;

        let total = a.prompt_share + a.context_share + a.response_share;
        if (total - 1.0).abs() > 0.001 {
            errors.push(ValidationError::new(
                "assembly",
                format!("Budget shares must sum to 1.0, got {}", total),
            ));
        }

        if a.context_share <= 0.0 {
            errors.push(ValidationError::new(
                "assembly.context_share",
                "Context share must be positive",
            ));
        }

        if !(0.0..=1.0).contains(&a.extractive_cutoff) {
            errors.push(ValidationError::new(
                "assembly.extractive_cutoff",
                "extractive_cutoff must be in [0, 1]",
            ));
        }
    }

    fn validate_cache(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.cache.ttl_secs == 0 {
            errors.push(ValidationError::new(
                "cache.ttl_secs",
                "Cache TTL must be greater than 0",
            ));
        }
    }
}
