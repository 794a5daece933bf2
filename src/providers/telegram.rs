//! Telegram Bot API message channel.

use crate::error::{DigestError, ProviderError};
use crate::providers::{status_error, truncate, DeliveryReceipt, MessageChannel, OutgoingMessage};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const API_BASE: &str = "https://api.telegram.org";

/// Telegram's limit on photo captions.
pub const MAX_CAPTION_CHARS: usize = 1024;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<SentMessage>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

pub struct TelegramChannel {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramChannel {
    pub fn new(bot_token: &str, timeout_secs: u64) -> Result<Self, DigestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DigestError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: format!("{API_BASE}/bot{bot_token}"),
        })
    }

    /// Replace the bot URL (tests, self-hosted Bot API servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn send_text(&self, message: &OutgoingMessage) -> Result<reqwest::Response, ProviderError> {
        let body = SendMessage {
            chat_id: &message.chat_id,
            text: &message.text,
            parse_mode: "Markdown",
        };
        Ok(self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&body)
            .send()
            .await?)
    }

    async fn send_photo(
        &self,
        message: &OutgoingMessage,
        path: &std::path::Path,
    ) -> Result<reqwest::Response, ProviderError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ProviderError::Api(format!("read {}: {}", path.display(), e)))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chart.png".to_string());
        let photo = Part::bytes(bytes).file_name(file_name).mime_str("image/png")?;
        let form = Form::new()
            .text("chat_id", message.chat_id.clone())
            .text("caption", truncate(&message.text, MAX_CAPTION_CHARS - 1))
            .text("parse_mode", "Markdown")
            .part("photo", photo);
        Ok(self
            .client
            .post(format!("{}/sendPhoto", self.base_url))
            .multipart(form)
            .send()
            .await?)
    }
}

#[async_trait]
impl MessageChannel for TelegramChannel {
    async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, ProviderError> {
        let response = match &message.image_path {
            Some(path) => self.send_photo(message, path).await?,
            None => self.send_text(message).await?,
        };
        let status = response.status();
        let body = response.text().await?;
        let receipt = parse_response(status, &body)?;
        debug!("telegram: sent message {:?}", receipt.message_id);
        Ok(receipt)
    }
}

fn parse_response(status: reqwest::StatusCode, body: &str) -> Result<DeliveryReceipt, ProviderError> {
    let parsed: Option<ApiResponse> = serde_json::from_str(body).ok();
    match parsed {
        Some(api) if api.ok => Ok(DeliveryReceipt {
            message_id: api.result.map(|r| r.message_id),
        }),
        Some(api) if status.as_u16() == 429 => Err(ProviderError::RateLimited {
            provider: "telegram".into(),
            retry_after_secs: api.parameters.and_then(|p| p.retry_after),
        }),
        Some(api) if status.is_success() => Err(ProviderError::Api(format!(
            "telegram: {}",
            api.description.unwrap_or_else(|| "Unknown error".into())
        ))),
        _ if !status.is_success() => Err(status_error("telegram", status, body)),
        _ => Err(ProviderError::Malformed(format!("telegram: {}", truncate(body, 200)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn ok_response_yields_message_id() {
        let receipt = parse_response(StatusCode::OK, r#"{"ok":true,"result":{"message_id":42}}"#).unwrap();
        assert_eq!(receipt.message_id, Some(42));
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = parse_response(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"ok":false,"description":"Too Many Requests","parameters":{"retry_after":7}}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ProviderError::RateLimited {
                provider: "telegram".into(),
                retry_after_secs: Some(7)
            }
        );
    }

    #[test]
    fn bad_request_and_auth() {
        let err = parse_response(
            StatusCode::BAD_REQUEST,
            r#"{"ok":false,"description":"Bad Request: can't parse entities"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("400"));

        let err = parse_response(StatusCode::UNAUTHORIZED, r#"{"ok":false,"description":"Unauthorized"}"#)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Auth { .. }));
    }

    #[test]
    fn garbage_body_is_malformed() {
        let err = parse_response(StatusCode::OK, "<html>").unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
