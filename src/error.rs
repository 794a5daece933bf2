//! Error types for the market-digest library.
//!
//! Three failure scopes map to three types:
//!
//! * [`DigestError`] (fatal): the run cannot produce a report at all
//!   (missing credentials, a stage exhausted its retries, the document could
//!   not be written). Returned as `Err(DigestError)` from the controller and
//!   the renderer.
//!
//! * [`ProviderError`]: a single failed call to an external collaborator
//!   (language model, search, market data, message channel). The stage runner
//!   converts these into a failed [`crate::stage::StageResult`]; they never
//!   escape it.
//!
//! * [`ResourceIssue`] (non-fatal): an image could not be fetched or a
//!   font is missing. Recorded on the render report, rendering continues.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the market-digest library.
#[derive(Debug, Error)]
pub enum DigestError {
    // ── Configuration errors ─────────────────────────────────────────────
    /// One or more required settings are absent from the environment.
    #[error("Missing required environment variables: {}\nSet them in your shell or a .env file.", keys.join(", "))]
    MissingConfig { keys: Vec<String> },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configured LLM provider could not be initialised.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Pipeline errors ──────────────────────────────────────────────────
    /// A stage exhausted its retries; the whole run is aborted.
    #[error("Stage '{stage}' failed after {attempts} attempt(s): {detail}")]
    StageFailed {
        stage: String,
        attempts: u32,
        detail: String,
    },

    /// A translation was stored before the primary-language entry.
    #[error("Cannot store '{language}' before primary language '{primary}'")]
    PrimaryLanguageMissing { primary: String, language: String },

    /// The content store handed to the renderer holds no language entries.
    #[error("Content store is empty; nothing to render")]
    NoContent,

    // ── Output errors ────────────────────────────────────────────────────
    /// The PDF document could not be assembled.
    #[error("Document rendering failed: {0}")]
    RenderFailed(String),

    /// Could not create or write the output document.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DigestError {
    /// `true` for errors raised before any stage runs (exit code 2 in the CLI).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DigestError::MissingConfig { .. }
                | DigestError::InvalidConfig(_)
                | DigestError::ProviderNotConfigured { .. }
        )
    }
}

/// A single failed call to an external collaborator.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ProviderError {
    /// HTTP 429 or an equivalent provider signal.
    #[error("Rate limit exceeded for provider '{provider}'")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// The call did not complete within the stage timeout.
    #[error("Call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider answered but the payload was unusable.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Authentication rejected (401/403).
    #[error("Authentication error from provider '{provider}': {detail}")]
    Auth { provider: String, detail: String },

    /// Network-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider returned an error response.
    #[error("API error: {0}")]
    Api(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Malformed(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

/// A non-fatal resource failure recorded while rendering.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ResourceIssue {
    /// An image could not be fetched, decoded, or cached.
    #[error("Image '{location}' unavailable: {detail}")]
    ImageUnavailable { location: String, detail: String },

    /// A preferred font family is not installed; the fallback was used.
    #[error("Font '{family}' not found; using '{fallback}'")]
    FontMissing { family: String, fallback: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_lists_every_key() {
        let e = DigestError::MissingConfig {
            keys: vec!["TAVILY_API_KEY".into(), "TELEGRAM_CHAT_ID".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("TAVILY_API_KEY, TELEGRAM_CHAT_ID"), "got: {msg}");
        assert!(e.is_configuration());
    }

    #[test]
    fn stage_failed_display_names_stage_and_attempts() {
        let e = DigestError::StageFailed {
            stage: "format".into(),
            attempts: 4,
            detail: "Rate limit exceeded for provider 'openai'".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("'format'"));
        assert!(msg.contains("4 attempt"));
        assert!(!e.is_configuration());
    }

    #[test]
    fn rate_limit_display() {
        let e = ProviderError::RateLimited {
            provider: "groq".into(),
            retry_after_secs: Some(60),
        };
        assert!(e.to_string().contains("groq"));
    }

    #[test]
    fn font_missing_display() {
        let issue = ResourceIssue::FontMissing {
            family: "NotoSansHebrew".into(),
            fallback: "Helvetica".into(),
        };
        assert!(issue.to_string().contains("NotoSansHebrew"));
        assert!(issue.to_string().contains("Helvetica"));
    }
}
