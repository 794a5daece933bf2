//! Configuration types for a daily pipeline run.
//!
//! All run behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The config is constructed once by the caller and
//! handed to every component (controller, renderer, delivery adapter) at
//! construction; nothing reads settings from global state afterwards.
//!
//! Secrets live separately in [`Credentials`] so a config can be logged with
//! `{:?}` without leaking API keys.

use crate::error::DigestError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Hard upper bound for the summary word ceiling.
pub const MAX_SUMMARY_WORDS_CAP: usize = 500;

/// Upper bound for stage retries and delivery retries.
pub const MAX_RETRIES_CAP: u32 = 10;

/// Default news queries run by the search stage.
pub const DEFAULT_SEARCH_QUERIES: &[&str] = &[
    "US stock market news today",
    "S&P 500 NASDAQ Dow Jones market close",
    "Federal Reserve interest rates",
    "US economic indicators",
    "major stock movements today",
];

/// Configuration for one pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use market_digest::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .translation_languages(["hi", "ar"])
///     .inter_call_delay_ms(10_000)
///     .max_retries(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.translation_languages, vec!["hi", "ar"]);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Language the summary is written in; always the first document section. Default: "en".
    pub primary_language: String,

    /// Translation targets, in the order they are produced and rendered. Default: hi, ar, he.
    pub translation_languages: Vec<String>,

    /// Minimum spacing between consecutive model calls, in milliseconds. Default: 25 000.
    ///
    /// Upstream per-minute rate limits reject back-to-back completions; the
    /// controller waits this long between search→summarize, summarize→format,
    /// and before every translation.
    pub inter_call_delay_ms: u64,

    /// Retries per stage after the first attempt. Default: 2 (three attempts total).
    pub max_retries: u32,

    /// Initial retry delay in milliseconds; doubles after every attempt. Default: 2 000.
    pub retry_backoff_ms: u64,

    /// Per-attempt timeout for a stage, in seconds. `None` disables it. Default: 120.
    pub stage_timeout_secs: Option<u64>,

    /// Number of translations allowed in flight at once. Default: 1 (sequential).
    pub translation_concurrency: usize,

    /// Word ceiling enforced on the summarize stage output. Range: 50–500. Default: 250.
    pub max_summary_words: usize,

    /// Queries the search stage runs against the search provider.
    pub search_queries: Vec<String>,

    /// Ticker symbols included in the market snapshot. Empty disables it.
    pub market_symbols: Vec<String>,

    /// History range requested for each symbol (e.g. "1d", "5d", "1mo"). Default: "5d".
    pub market_period: String,

    /// Directory receiving `market_summary_<date>.pdf`. Default: "outputs".
    pub output_dir: PathBuf,

    /// Directory for fetched images and charts; emptied by cleanup.
    pub scratch_dir: PathBuf,

    /// Directory scanned for script-specific fonts (e.g. NotoSansArabic). Default: "fonts".
    pub font_dir: PathBuf,

    /// Also consult system-installed fonts. Default: true.
    pub load_system_fonts: bool,

    /// Timeout for a single image download, in seconds. Default: 10.
    pub image_timeout_secs: u64,

    /// Retries per language when delivering messages. Default: 2.
    pub delivery_retries: u32,

    /// Title printed on the cover page.
    pub report_title: String,

    /// LLM model identifier. If None, the provider default is used.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens generated per stage call. Default: 2048.
    pub max_tokens: usize,

    /// Per-stage progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            primary_language: "en".to_string(),
            translation_languages: vec!["hi".into(), "ar".into(), "he".into()],
            inter_call_delay_ms: 25_000,
            max_retries: 2,
            retry_backoff_ms: 2_000,
            stage_timeout_secs: Some(120),
            translation_concurrency: 1,
            max_summary_words: 250,
            search_queries: DEFAULT_SEARCH_QUERIES.iter().map(|q| q.to_string()).collect(),
            market_symbols: vec!["^GSPC".into(), "^IXIC".into(), "^DJI".into()],
            market_period: "5d".to_string(),
            output_dir: PathBuf::from("outputs"),
            scratch_dir: std::env::temp_dir().join("market-digest"),
            font_dir: PathBuf::from("fonts"),
            load_system_fonts: true,
            image_timeout_secs: 10,
            delivery_retries: 2,
            report_title: "Daily Market Summary".to_string(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 2048,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("primary_language", &self.primary_language)
            .field("translation_languages", &self.translation_languages)
            .field("inter_call_delay_ms", &self.inter_call_delay_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("stage_timeout_secs", &self.stage_timeout_secs)
            .field("translation_concurrency", &self.translation_concurrency)
            .field("max_summary_words", &self.max_summary_words)
            .field("market_symbols", &self.market_symbols)
            .field("output_dir", &self.output_dir)
            .field("scratch_dir", &self.scratch_dir)
            .field("font_dir", &self.font_dir)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }

    /// Primary language followed by every translation target, deduplicated.
    pub fn languages(&self) -> Vec<String> {
        let mut all = vec![self.primary_language.clone()];
        for lang in &self.translation_languages {
            if !all.contains(lang) {
                all.push(lang.clone());
            }
        }
        all
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn primary_language(mut self, lang: impl Into<String>) -> Self {
        self.config.primary_language = normalise_language(&lang.into());
        self
    }

    pub fn translation_languages<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.translation_languages = langs
            .into_iter()
            .map(|l| normalise_language(&l.into()))
            .filter(|l| !l.is_empty())
            .collect();
        self
    }

    pub fn inter_call_delay_ms(mut self, ms: u64) -> Self {
        self.config.inter_call_delay_ms = ms;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn stage_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.stage_timeout_secs = secs;
        self
    }

    pub fn translation_concurrency(mut self, n: usize) -> Self {
        self.config.translation_concurrency = n.max(1);
        self
    }

    pub fn max_summary_words(mut self, n: usize) -> Self {
        self.config.max_summary_words = n;
        self
    }

    pub fn search_queries<I, S>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.search_queries = queries.into_iter().map(Into::into).collect();
        self
    }

    pub fn market_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.market_symbols = symbols
            .into_iter()
            .map(|s| s.into().trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    pub fn market_period(mut self, period: impl Into<String>) -> Self {
        self.config.market_period = period.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = dir.into();
        self
    }

    pub fn font_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.font_dir = dir.into();
        self
    }

    pub fn load_system_fonts(mut self, v: bool) -> Self {
        self.config.load_system_fonts = v;
        self
    }

    pub fn image_timeout_secs(mut self, secs: u64) -> Self {
        self.config.image_timeout_secs = secs.max(1);
        self
    }

    pub fn delivery_retries(mut self, n: u32) -> Self {
        self.config.delivery_retries = n;
        self
    }

    pub fn report_title(mut self, title: impl Into<String>) -> Self {
        self.config.report_title = title.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, DigestError> {
        let c = &self.config;
        if c.primary_language.is_empty() {
            return Err(DigestError::InvalidConfig(
                "Primary language must not be empty".into(),
            ));
        }
        if c.translation_languages.contains(&c.primary_language) {
            return Err(DigestError::InvalidConfig(format!(
                "Translation targets must not include the primary language '{}'",
                c.primary_language
            )));
        }
        let mut seen = Vec::with_capacity(c.translation_languages.len());
        for lang in &c.translation_languages {
            if seen.contains(&lang) {
                return Err(DigestError::InvalidConfig(format!(
                    "Translation language '{lang}' listed twice"
                )));
            }
            seen.push(lang);
        }
        if !(50..=MAX_SUMMARY_WORDS_CAP).contains(&c.max_summary_words) {
            return Err(DigestError::InvalidConfig(format!(
                "Summary word ceiling must be 50–{MAX_SUMMARY_WORDS_CAP}, got {}",
                c.max_summary_words
            )));
        }
        if c.search_queries.is_empty() {
            return Err(DigestError::InvalidConfig(
                "At least one search query is required".into(),
            ));
        }
        if c.max_retries > MAX_RETRIES_CAP || c.delivery_retries > MAX_RETRIES_CAP {
            return Err(DigestError::InvalidConfig(format!(
                "Retries must be at most {MAX_RETRIES_CAP} (stage: {}, delivery: {})",
                c.max_retries, c.delivery_retries
            )));
        }
        Ok(self.config)
    }
}

/// Lower-case and trim a language code ("HI " → "hi").
pub fn normalise_language(code: &str) -> String {
    code.trim().to_lowercase()
}

/// Parse a comma-separated language list such as `"hi,ar,he"`.
pub fn parse_language_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(normalise_language)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Secrets required by the concrete collaborators.
///
/// Kept apart from [`PipelineConfig`] so the config can be printed freely.
#[derive(Clone)]
pub struct Credentials {
    pub search_api_key: String,
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("search_api_key", &"<redacted>")
            .field("telegram_bot_token", &"<redacted>")
            .field("telegram_chat_id", &self.telegram_chat_id)
            .finish()
    }
}

impl Credentials {
    pub const REQUIRED: [&'static str; 3] =
        ["TAVILY_API_KEY", "TELEGRAM_BOT_TOKEN", "TELEGRAM_CHAT_ID"];

    /// Read every required key from the process environment.
    ///
    /// All missing keys are reported together, before any stage runs.
    pub fn from_env() -> Result<Self, DigestError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Credentials::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DigestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let values: Vec<Option<String>> = Self::REQUIRED
            .iter()
            .map(|key| lookup(key).filter(|v| !v.trim().is_empty()))
            .collect();

        let missing: Vec<String> = Self::REQUIRED
            .iter()
            .zip(&values)
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(DigestError::MissingConfig { keys: missing });
        }

        let mut values = values.into_iter().flatten();
        match (values.next(), values.next(), values.next()) {
            (Some(search_api_key), Some(telegram_bot_token), Some(telegram_chat_id)) => Ok(Self {
                search_api_key,
                telegram_bot_token,
                telegram_chat_id,
            }),
            _ => Err(DigestError::Internal("credential lookup mismatch".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_build() {
        let config = PipelineConfig::builder().build().expect("defaults are valid");
        assert_eq!(config.primary_language, "en");
        assert_eq!(config.languages(), vec!["en", "hi", "ar", "he"]);
        assert_eq!(config.inter_call_delay(), Duration::from_secs(25));
    }

    #[test]
    fn languages_are_normalised() {
        let config = PipelineConfig::builder()
            .translation_languages([" AR", "He "])
            .build()
            .unwrap();
        assert_eq!(config.translation_languages, vec!["ar", "he"]);
    }

    #[test]
    fn primary_language_cannot_be_a_target() {
        let err = PipelineConfig::builder()
            .translation_languages(["en", "hi"])
            .build()
            .unwrap_err();
        assert!(matches!(err, DigestError::InvalidConfig(_)));
    }

    #[test]
    fn duplicate_targets_rejected() {
        let err = PipelineConfig::builder()
            .translation_languages(["hi", "ar", "hi"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("'hi' listed twice"));
    }

    #[test]
    fn word_ceiling_bounds() {
        assert!(PipelineConfig::builder().max_summary_words(600).build().is_err());
        assert!(PipelineConfig::builder().max_summary_words(10).build().is_err());
        assert!(PipelineConfig::builder().max_summary_words(500).build().is_ok());
    }

    #[test]
    fn retry_counts_are_bounded() {
        assert!(PipelineConfig::builder().delivery_retries(MAX_RETRIES_CAP).build().is_ok());
        assert!(PipelineConfig::builder().delivery_retries(64).build().is_err());
        assert!(PipelineConfig::builder().max_retries(MAX_RETRIES_CAP + 1).build().is_err());
    }

    #[test]
    fn parse_language_list_skips_blanks() {
        assert_eq!(parse_language_list("hi, AR,,he"), vec!["hi", "ar", "he"]);
        assert!(parse_language_list("").is_empty());
    }

    #[test]
    fn credentials_report_all_missing_keys() {
        let env: HashMap<&str, &str> = HashMap::from([("TAVILY_API_KEY", "tvly-1")]);
        let err = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap_err();
        match err {
            DigestError::MissingConfig { keys } => {
                assert_eq!(keys, vec!["TELEGRAM_BOT_TOKEN", "TELEGRAM_CHAT_ID"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn blank_credentials_count_as_missing() {
        let err = Credentials::from_lookup(|k| {
            Some(if k == "TELEGRAM_CHAT_ID" { "  ".into() } else { "x".into() })
        })
        .unwrap_err();
        assert!(err.to_string().contains("TELEGRAM_CHAT_ID"));
    }

    #[test]
    fn credentials_debug_redacts_secrets() {
        let creds = Credentials::from_lookup(|k| Some(format!("secret-{k}"))).unwrap();
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("secret-TAVILY_API_KEY"));
        assert!(dbg.contains("secret-TELEGRAM_CHAT_ID"));
    }
}
