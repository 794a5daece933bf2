//! Per-language message delivery.
//!
//! The adapter walks the content store in language order and pushes each
//! variant to the message channel. Every language is delivered and retried
//! independently: one language failing never stops the others, and delivery
//! results never feed back into the content store.

use crate::error::ProviderError;
use crate::providers::{MessageChannel, OutgoingMessage};
use crate::render::style::language_name;
use crate::store::{parse_image_line, ContentStore, LanguageContent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

/// Outcome for one language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub language: String,
    pub delivered: bool,
    pub message_ids: Vec<i64>,
    pub error: Option<String>,
    /// Total send attempts across all messages for this language.
    pub attempts: u32,
}

/// Delivery outcomes in content-store order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DeliveryReport {
    pub fn delivered_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.delivered).count()
    }

    pub fn all_delivered(&self) -> bool {
        self.outcomes.iter().all(|o| o.delivered)
    }

    pub fn failed_languages(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.delivered)
            .map(|o| o.language.as_str())
            .collect()
    }

    /// One-line status, e.g. `"3/4 languages delivered (failed: he)"`.
    pub fn summary(&self) -> String {
        let mut s = format!(
            "{}/{} languages delivered",
            self.delivered_count(),
            self.outcomes.len()
        );
        let failed = self.failed_languages();
        if !failed.is_empty() {
            s.push_str(&format!(" (failed: {})", failed.join(", ")));
        }
        s
    }
}

/// Longest wait between two send attempts.
pub const MAX_SEND_BACKOFF: Duration = Duration::from_secs(60);

/// Sends every language variant to one chat target.
pub struct DeliveryAdapter {
    channel: Arc<dyn MessageChannel>,
    chat_id: String,
    retries: u32,
    retry_backoff_ms: u64,
}

impl DeliveryAdapter {
    pub fn new(channel: Arc<dyn MessageChannel>, chat_id: impl Into<String>) -> Self {
        Self {
            channel,
            chat_id: chat_id.into(),
            retries: 2,
            retry_backoff_ms: 2_000,
        }
    }

    pub fn with_retries(mut self, retries: u32, backoff_ms: u64) -> Self {
        self.retries = retries;
        self.retry_backoff_ms = backoff_ms;
        self
    }

    /// Wait before the 1-based retry number `retry`: doubling from the base,
    /// capped at [`MAX_SEND_BACKOFF`].
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.checked_pow(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor)).min(MAX_SEND_BACKOFF)
    }

    /// Deliver every language in `store`. Never fails; per-language errors
    /// are recorded on the report.
    pub async fn deliver(&self, store: &ContentStore) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for (language, content) in store.iter() {
            let outcome = self.deliver_language(language, content).await;
            if outcome.delivered {
                info!("Delivered '{}' in {} message(s)", language, outcome.message_ids.len());
            } else {
                warn!(
                    "Delivery of '{}' failed: {}",
                    language,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
            report.outcomes.push(outcome);
        }
        report
    }

    async fn deliver_language(&self, language: &str, content: &LanguageContent) -> DeliveryOutcome {
        let mut messages = Vec::new();
        if let Some(path) = content.images.iter().find_map(|i| i.local_path.clone()) {
            messages.push(OutgoingMessage {
                chat_id: self.chat_id.clone(),
                text: header(language),
                image_path: Some(path),
            });
        }
        let body = format_message(language, &content.text);
        for chunk in split_message(&body, self.channel.max_message_chars()) {
            messages.push(OutgoingMessage {
                chat_id: self.chat_id.clone(),
                text: chunk,
                image_path: None,
            });
        }

        let mut outcome = DeliveryOutcome {
            language: language.to_string(),
            delivered: true,
            message_ids: Vec::new(),
            error: None,
            attempts: 0,
        };
        for message in &messages {
            match self.send_with_retry(message, &mut outcome.attempts).await {
                Ok(id) => outcome.message_ids.extend(id),
                Err(e) => {
                    outcome.delivered = false;
                    outcome.error = Some(e.to_string());
                    break;
                }
            }
        }
        outcome
    }

    async fn send_with_retry(
        &self,
        message: &OutgoingMessage,
        attempts: &mut u32,
    ) -> Result<Option<i64>, ProviderError> {
        let mut last_err = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                sleep(self.backoff(attempt)).await;
            }
            *attempts += 1;
            match self.channel.send(message).await {
                Ok(receipt) => return Ok(receipt.message_id),
                Err(e) => {
                    warn!("Send attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ProviderError::Api("no send attempted".into())))
    }
}

fn header(language: &str) -> String {
    format!("*Daily Market Summary ({})*", language_name(language))
}

/// Convert stored markdown into a chat message: language header, `#` lines
/// as bold lines, `*` bullets as `•`, image lines removed, and the legacy
/// markdown specials escaped in body text.
pub fn format_message(language: &str, text: &str) -> String {
    let mut out = header(language);
    out.push_str("\n\n");
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !out.ends_with("\n\n") {
                out.push('\n');
            }
            continue;
        }
        if parse_image_line(trimmed).is_some() {
            continue;
        }
        if let Some(heading) = trimmed.strip_prefix('#') {
            let heading = heading.trim_start_matches('#').trim();
            out.push_str(&format!("*{}*\n", escape_markdown(heading)));
        } else if let Some(item) = trimmed.strip_prefix("* ") {
            out.push_str(&format!("• {}\n", escape_markdown(item.trim())));
        } else {
            out.push_str(&escape_markdown(trimmed));
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}

/// Escape the characters legacy chat markdown treats as entities.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Split `text` into chunks of at most `limit` characters, breaking on line
/// boundaries where possible.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let needed = if current.is_empty() { line_len } else { line_len + 1 };
        if current_len + needed > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > limit {
            // Hard-wrap a single over-long line.
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}
