//! Common error types for NameGnome Serve

use thiserror::Error;

/// Common result type for NameGnome operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared across the pipeline.
///
/// Every variant carries a stable machine code (see [`Error::code`]) so API
/// responses and CLI exit paths stay consistent across releases.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed inputs (unknown media type, bad paths, invalid plan payloads)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-unique entity resolution awaiting a user choice
    #[error("Disambiguation required for field '{field}': {candidate_count} candidates")]
    DisambiguationRequired {
        field: String,
        candidate_count: usize,
        token: String,
    },

    /// Provider failed after retries, or an offline cache miss
    #[error("Provider unavailable: {provider} (offline={offline})")]
    ProviderUnavailable { provider: String, offline: bool },

    /// Source fingerprint mismatch at apply time
    #[error("Stale plan: {0}")]
    StalePlan(String),

    /// Another apply holds the root lock
    #[error("Root is locked by job {active_job_id}")]
    Locked {
        active_job_id: String,
        acquired_at: i64,
    },

    /// Rename failed (permission, collision under skip, cross-device)
    #[error("Filesystem error: {0}")]
    Filesystem(String),

    /// LLM output rejected by schema validation
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// Storage corruption or missing configuration; no retry
    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Stable machine code for user-visible errors.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::DisambiguationRequired { .. } => "DISAMBIGUATION_REQUIRED",
            Error::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            Error::StalePlan(_) => "STALE_PLAN",
            Error::Locked { .. } => "LOCKED",
            Error::Filesystem(_) => "FILESYSTEM_ERROR",
            Error::SchemaViolation(_) => "SCHEMA_VIOLATION",
            Error::Fatal(_) => "FATAL",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(
            Error::Locked {
                active_job_id: "j".into(),
                acquired_at: 0
            }
            .code(),
            "LOCKED"
        );
        assert_eq!(
            Error::ProviderUnavailable {
                provider: "tvdb".into(),
                offline: true
            }
            .code(),
            "PROVIDER_UNAVAILABLE"
        );
    }

    #[test]
    fn provider_unavailable_mentions_offline() {
        let err = Error::ProviderUnavailable {
            provider: "tvdb".into(),
            offline: true,
        };
        assert!(err.to_string().contains("offline"));
    }
}
