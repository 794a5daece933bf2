//! Language-model completion through `edgequake-llm`.

use crate::config::PipelineConfig;
use crate::error::{DigestError, ProviderError};
use crate::providers::{CompletionModel, Prompt};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// A [`CompletionModel`] backed by any `edgequake-llm` provider.
pub struct EdgequakeModel {
    provider: Arc<dyn LLMProvider>,
    label: String,
    options: CompletionOptions,
}

impl EdgequakeModel {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
            options: CompletionOptions::default(),
        }
    }

    /// Resolve the provider from `config` and apply its sampling settings.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, DigestError> {
        let (provider, label) = resolve_provider(config)?;
        Ok(Self {
            provider,
            label,
            options: build_options(config),
        })
    }
}

#[async_trait]
impl CompletionModel for EdgequakeModel {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let messages = vec![
            ChatMessage::system(prompt.system.as_str()),
            ChatMessage::user(prompt.user.as_str()),
        ];
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| classify_error(&self.label, &e.to_string()))?;
        debug!(
            "{}: {} input tokens, {} output tokens",
            self.label, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, DigestError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| DigestError::ProviderNotConfigured {
        provider: name.to_string(),
        hint: format!("{e}"),
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. a pre-built provider on the config
/// 2. `provider_name` (+ optional `model`) on the config
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` in the environment
/// 4. `GROQ_API_KEY` present → groq, `OPENAI_API_KEY` present → openai
/// 5. full auto-detection via [`ProviderFactory::from_env`]
///
/// Returns the provider and a label for logs.
pub fn resolve_provider(config: &PipelineConfig) -> Result<(Arc<dyn LLMProvider>, String), DigestError> {
    if let Some(provider) = &config.provider {
        return Ok((Arc::clone(provider), "custom".to_string()));
    }

    if let Some(name) = &config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return Ok((create_provider(name, model)?, format!("{name}/{model}")));
    }

    if let (Ok(name), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !name.is_empty() && !model.is_empty() {
            let label = format!("{name}/{model}");
            return Ok((create_provider(&name, &model)?, label));
        }
    }

    for (key, name, default_model) in [
        ("GROQ_API_KEY", "groq", "llama-3.3-70b-versatile"),
        ("OPENAI_API_KEY", "openai", DEFAULT_MODEL),
    ] {
        if std::env::var(key).map(|v| !v.is_empty()).unwrap_or(false) {
            let model = config.model.as_deref().unwrap_or(default_model);
            return Ok((create_provider(name, model)?, format!("{name}/{model}")));
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DigestError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                 Set GROQ_API_KEY, OPENAI_API_KEY, or ANTHROPIC_API_KEY, or pass --provider.\n\
                 Error: {e}"
            ),
        })?;
    Ok((provider, "auto".to_string()))
}

/// Map a provider error message onto [`ProviderError`].
pub fn classify_error(provider: &str, message: &str) -> ProviderError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
        ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs: None,
        }
    } else if lower.contains("401") || lower.contains("403") || lower.contains("unauthorized") || lower.contains("api key") {
        ProviderError::Auth {
            provider: provider.to_string(),
            detail: message.to_string(),
        }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ProviderError::Timeout { secs: 0 }
    } else if lower.contains("connect") || lower.contains("dns") || lower.contains("network") {
        ProviderError::Transport(message.to_string())
    } else {
        ProviderError::Api(message.to_string())
    }
}
