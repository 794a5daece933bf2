//! External collaborators, each behind an explicit capability trait.
//!
//! Stage agents receive exactly the capabilities they need at construction
//! (a search agent gets a [`SearchProvider`], a delivery adapter gets a
//! [`MessageChannel`]). Concrete HTTP implementations live in the
//! submodules; tests substitute in-process fakes.
//!
//! ```text
//! CompletionModel    ── llm       (edgequake-llm providers)
//! SearchProvider     ── tavily    (news + image search)
//! MarketDataProvider ── yahoo     (quotes + PNG chart)
//! MessageChannel     ── telegram  (sendMessage / sendPhoto)
//! ```

pub mod llm;
pub mod tavily;
pub mod telegram;
pub mod yahoo;

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A rendered request for the language model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Role and standing rules.
    pub system: String,
    /// Task instructions plus the context threaded from the prior stage.
    pub user: String,
}

/// Free-text completion capability.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Short identifier for logs ("openai/gpt-4.1-mini").
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError>;
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
    pub published_date: Option<String>,
    pub score: f64,
}

/// News and image search capability.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ProviderError>;

    /// Image URLs relevant to `query`. Defaults to none.
    async fn search_images(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<String>, ProviderError> {
        let _ = (query, max_results);
        Ok(Vec::new())
    }
}

/// Latest price data for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
    /// PNG line chart of the requested period, if one was drawn.
    pub chart_path: Option<PathBuf>,
}

/// Market data capability.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Quotes for `symbols` over `period`. Symbols that fail individually are
    /// omitted from the result rather than failing the whole call.
    async fn quotes(&self, symbols: &[String], period: &str) -> Result<Vec<Quote>, ProviderError>;
}

/// A message bound for a chat target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub chat_id: String,
    pub text: String,
    pub image_path: Option<PathBuf>,
}

/// Receipt from a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: Option<i64>,
}

/// Message delivery capability.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Hard limit on characters per message.
    fn max_message_chars(&self) -> usize {
        4096
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, ProviderError>;
}

/// Map an HTTP status to the matching [`ProviderError`].
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Auth {
            provider: provider.to_string(),
            detail: truncate(body, 200),
        },
        429 => ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs: None,
        },
        _ => ProviderError::Api(format!("{provider}: HTTP {status}: {}", truncate(body, 200))),
    }
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{cut}\u{2026}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_maps_auth_and_rate_limit() {
        let e = status_error("tavily", reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert!(matches!(e, ProviderError::Auth { .. }));
        let e = status_error("tavily", reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(e, ProviderError::RateLimited { .. }));
        let e = status_error("tavily", reqwest::StatusCode::BAD_GATEWAY, "upstream");
        assert!(e.to_string().contains("502"));
    }

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate("שלום עולם", 4), "שלום\u{2026}");
        assert_eq!(truncate("short", 10), "short");
    }
}
