use crate::chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::database::QdrantConfig;
use crate::error::{RagError, Result};
use crate::openai::OpenAiConfig;
use crate::orchestration::{IngestPolicy, RateLimit, RetryPolicy};
use crate::prompt::GenerationParams;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Everything the binary needs, read from the environment
pub struct Settings {
    pub openai: OpenAiConfig,
    pub qdrant: QdrantConfig,
    pub chunking: ChunkingConfig,
    pub generation: GenerationParams,
    pub policy: IngestPolicy,
}

impl Settings {
    /// Load settings from environment variables
    pub fn from_env() -> Result<Self> {
        let openai = OpenAiConfig::from_env()?;
        let qdrant = QdrantConfig::from_env(openai.embed_dim)?;

        let chunking = ChunkingConfig::new(
            env_parse("CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            env_parse("CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP)?,
        )?;

        let defaults = GenerationParams::default();
        let generation = GenerationParams {
            max_tokens: env_parse("GEN_MAX_TOKENS", defaults.max_tokens)?,
            temperature: env_parse("GEN_TEMPERATURE", defaults.temperature)?,
        };

        Ok(Settings {
            openai,
            qdrant,
            chunking,
            generation,
            policy: policy_from_env()?,
        })
    }
}

fn policy_from_env() -> Result<IngestPolicy> {
    let defaults = IngestPolicy::default();
    let retry = RetryPolicy {
        max_attempts: env_parse("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
        initial_backoff: Duration::from_millis(env_parse("RETRY_INITIAL_BACKOFF_MS", 500)?),
        max_backoff: Duration::from_millis(env_parse("RETRY_MAX_BACKOFF_MS", 8000)?),
    };

    let rate_limit = match env::var("INGEST_RATE_LIMIT").ok() {
        Some(limit) => Some(RateLimit {
            limit: parse_value("INGEST_RATE_LIMIT", &limit)?,
            period: Duration::from_secs(env_parse("INGEST_RATE_PERIOD_SECS", 4 * 60 * 60)?),
        }),
        None => None,
    };

    let throttle = match env::var("INGEST_THROTTLE_LIMIT").ok() {
        Some(limit) => Some(RateLimit {
            limit: parse_value("INGEST_THROTTLE_LIMIT", &limit)?,
            period: Duration::from_secs(env_parse("INGEST_THROTTLE_PERIOD_SECS", 60)?),
        }),
        None => None,
    };

    let per_source_concurrency = env_parse(
        "INGEST_PER_SOURCE_CONCURRENCY",
        defaults.per_source_concurrency,
    )?;
    if per_source_concurrency == 0 {
        return Err(RagError::Configuration(
            "INGEST_PER_SOURCE_CONCURRENCY must be at least 1".to_string(),
        ));
    }

    Ok(IngestPolicy {
        retry,
        per_source_concurrency,
        rate_limit,
        throttle,
    })
}

/// Read a string variable, falling back to `default` when unset
pub(crate) fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse a variable, falling back to `default` when unset
pub(crate) fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| RagError::Configuration(format!("invalid value for {}: {:?} ({})", key, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<usize>("CHUNK_SIZE", " 1200 ").unwrap(), 1200);
        let err = parse_value::<usize>("CHUNK_SIZE", "big").unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
        assert!(err.to_string().contains("CHUNK_SIZE"));
    }

    #[test]
    fn test_env_parse_falls_back_to_default() {
        let value: u32 = env_parse("PDF_RAG_TEST_SURELY_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_throttle_is_read_from_env() {
        env::set_var("INGEST_THROTTLE_LIMIT", "2");
        env::set_var("INGEST_THROTTLE_PERIOD_SECS", "60");
        let policy = policy_from_env();
        env::remove_var("INGEST_THROTTLE_LIMIT");
        env::remove_var("INGEST_THROTTLE_PERIOD_SECS");

        assert_eq!(
            policy.unwrap().throttle,
            Some(RateLimit {
                limit: 2,
                period: Duration::from_secs(60),
            })
        );
    }
}
