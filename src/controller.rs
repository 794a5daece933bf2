//! The daily pipeline: search → summarize → format → translate × N → deliver.
//!
//! ## Context threading
//!
//! ```text
//! ""  ──▶ search ──findings──▶ summarize ──summary──▶ format ──formatted──┬──▶ translate:hi
//!                                                                       ├──▶ translate:ar
//!                                                                       └──▶ translate:he
//! ```
//!
//! Each stage's cleaned output is the next stage's only context. Every
//! translation receives the formatted primary text, so all language sections
//! share its title and image line.
//!
//! ## Pacing
//!
//! A [`Pacer`] holds the next model call back until `inter_call_delay` has
//! passed since the previous one finished: between search and summarize,
//! summarize and format, and before every translation.
//!
//! ## Failure policy
//!
//! A stage that exhausts its retries aborts the run with
//! [`DigestError::StageFailed`]. Nothing after it runs: no further
//! translations and no delivery. Results gathered so far stay in the
//! execution log. Delivery itself is recorded but never aborts.

use crate::config::{Credentials, PipelineConfig};
use crate::delivery::{DeliveryAdapter, DeliveryReport};
use crate::error::{DigestError, ResourceIssue};
use crate::pipeline::{CompletionAgent, FormattingAgent, Pacer, ResearchAgent, StageRunner};
use crate::progress::ProgressCallback;
use crate::providers::llm::EdgequakeModel;
use crate::providers::tavily::TavilySearch;
use crate::providers::telegram::TelegramChannel;
use crate::providers::yahoo::YahooMarketData;
use crate::providers::{CompletionModel, MarketDataProvider, MessageChannel, SearchProvider};
use crate::render::DocumentRenderer;
use crate::scratch::TempFileRegistry;
use crate::stage::{Stage, StageKind, StageResult};
use crate::store::{extract_image_refs, ContentStore};
use chrono::{Local, NaiveDate};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Timeout for search, market-data, and chat API requests.
const HTTP_TIMEOUT_SECS: u64 = 30;

/// The external services a run talks to.
pub struct Collaborators {
    pub model: Arc<dyn CompletionModel>,
    pub search: Arc<dyn SearchProvider>,
    pub market: Option<Arc<dyn MarketDataProvider>>,
    pub channel: Arc<dyn MessageChannel>,
    pub chat_id: String,
}

impl Collaborators {
    /// The production set: `edgequake-llm`, Tavily, Yahoo Finance, Telegram.
    ///
    /// Market data is omitted when no symbols are configured.
    pub fn from_credentials(
        config: &PipelineConfig,
        credentials: &Credentials,
        scratch: Arc<TempFileRegistry>,
    ) -> Result<Self, DigestError> {
        let model = EdgequakeModel::from_config(config)?;
        let search = TavilySearch::new(&credentials.search_api_key, HTTP_TIMEOUT_SECS)?;
        let market: Option<Arc<dyn MarketDataProvider>> = if config.market_symbols.is_empty() {
            None
        } else {
            Some(Arc::new(YahooMarketData::new(scratch, HTTP_TIMEOUT_SECS)?))
        };
        let channel = TelegramChannel::new(&credentials.telegram_bot_token, HTTP_TIMEOUT_SECS)?;
        Ok(Self {
            model: Arc::new(model),
            search: Arc::new(search),
            market,
            channel: Arc::new(channel),
            chat_id: credentials.telegram_chat_id.clone(),
        })
    }
}

/// Outcome of a full run: pipeline, delivery, and document.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub document_path: PathBuf,
    pub pages: usize,
    pub languages: Vec<String>,
    pub delivery: DeliveryReport,
    pub stages: Vec<StageResult>,
    pub render_issues: Vec<ResourceIssue>,
}

/// Sequences the stages of one daily run.
pub struct PipelineController {
    config: PipelineConfig,
    search: Stage,
    summarize: Stage,
    format: Stage,
    translations: Vec<Stage>,
    runner: StageRunner,
    delivery: DeliveryAdapter,
    scratch: Arc<TempFileRegistry>,
    log: Vec<StageResult>,
    last_delivery: Option<DeliveryReport>,
}

impl PipelineController {
    pub fn new(config: PipelineConfig, collaborators: Collaborators, scratch: Arc<TempFileRegistry>) -> Self {
        let Collaborators {
            model,
            search,
            market,
            channel,
            chat_id,
        } = collaborators;
        let timeout = config.stage_timeout();

        let mut research = ResearchAgent::new(
            Arc::clone(&model),
            Arc::clone(&search),
            config.search_queries.clone(),
        );
        if let Some(market) = market {
            research = research.with_market_data(
                market,
                config.market_symbols.clone(),
                config.market_period.clone(),
            );
        }

        let search_stage = Stage::new(StageKind::Search, Arc::new(research))
            .with_retries(config.max_retries)
            .with_timeout(timeout);
        let summarize = Stage::new(
            StageKind::Summarize,
            Arc::new(CompletionAgent::new(Arc::clone(&model))),
        )
        .with_retries(config.max_retries)
        .with_timeout(timeout)
        .with_max_words(config.max_summary_words);
        let format = Stage::new(
            StageKind::Format,
            Arc::new(FormattingAgent::new(Arc::clone(&model)).with_image_search(search)),
        )
        .with_retries(config.max_retries)
        .with_timeout(timeout);

        let translator: Arc<CompletionAgent> = Arc::new(CompletionAgent::new(model));
        let translations = config
            .translation_languages
            .iter()
            .map(|language| {
                Stage::new(
                    StageKind::Translate {
                        language: language.clone(),
                    },
                    translator.clone(),
                )
                .with_retries(config.max_retries)
                .with_timeout(timeout)
            })
            .collect();

        let runner = StageRunner::new(config.retry_backoff_ms).with_progress(config.progress_callback.clone());
        let delivery = DeliveryAdapter::new(channel, chat_id)
            .with_retries(config.delivery_retries, config.retry_backoff_ms);

        Self {
            config,
            search: search_stage,
            summarize,
            format,
            translations,
            runner,
            delivery,
            scratch,
            log: Vec::new(),
            last_delivery: None,
        }
    }

    /// Stage labels in execution order, delivery included.
    pub fn plan(&self) -> Vec<String> {
        let mut plan: Vec<String> = [&self.search, &self.summarize, &self.format]
            .into_iter()
            .chain(self.translations.iter())
            .map(|s| s.name.clone())
            .collect();
        plan.push(StageKind::Deliver.label());
        plan
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Every stage result of the latest run, in completion order.
    pub fn execution_log(&self) -> &[StageResult] {
        &self.log
    }

    pub fn last_delivery(&self) -> Option<&DeliveryReport> {
        self.last_delivery.as_ref()
    }

    /// Run every stage and deliver. Returns the content store on success.
    pub async fn run_daily_pipeline(&mut self) -> Result<ContentStore, DigestError> {
        let progress = self.config.progress_callback.clone();
        let total = self.plan().len();
        self.log.clear();
        self.last_delivery = None;

        info!(
            "Starting daily pipeline: {} stage(s), languages {:?}",
            total,
            self.config.languages()
        );
        if let Some(cb) = &progress {
            cb.on_run_start(total);
        }
        let outcome = self.run_stages(progress.as_ref(), total).await;
        if let Some(cb) = &progress {
            cb.on_run_complete(outcome.is_ok());
        }
        outcome
    }

    async fn run_stages(
        &mut self,
        progress: Option<&ProgressCallback>,
        total: usize,
    ) -> Result<ContentStore, DigestError> {
        let mut pacer = Pacer::new(self.config.inter_call_delay());

        let result = execute(&self.runner, progress, &self.search, "", 1, total).await;
        pacer.mark();
        let findings = self.record(result)?;

        pacer.wait().await;
        let result = execute(&self.runner, progress, &self.summarize, &findings, 2, total).await;
        pacer.mark();
        let summary = self.record(result)?;

        pacer.wait().await;
        let result = execute(&self.runner, progress, &self.format, &summary, 3, total).await;
        pacer.mark();
        let formatted = self.record(result)?;

        let mut store = ContentStore::new(self.config.primary_language.clone());
        let mut images = extract_image_refs(&formatted);
        for chart in self.search.agent().attachments() {
            if !images.iter().any(|i| i.source == chart.source) {
                images.push(chart);
            }
        }
        store.put(self.config.primary_language.clone(), formatted.clone(), images)?;

        let translated = self.translate(&mut pacer, progress, &formatted, total).await;
        let languages = self.config.translation_languages.clone();
        for (language, result) in languages.iter().zip(translated) {
            let text = self.record(result)?;
            store.put_markdown(language.clone(), text)?;
        }

        if let Some(cb) = progress {
            cb.on_stage_start(&StageKind::Deliver.label(), total, total);
        }
        let report = self.delivery.deliver(&store).await;
        let attempts = report.outcomes.iter().map(|o| o.attempts).sum::<u32>().max(1);
        let result = if report.all_delivered() {
            StageResult::succeeded(StageKind::Deliver.label(), report.summary(), attempts)
        } else {
            StageResult::failed(StageKind::Deliver.label(), report.summary(), attempts)
        };
        if let Some(cb) = progress {
            if result.success {
                cb.on_stage_complete(&result.stage, result.output.len());
            } else {
                cb.on_stage_error(&result.stage, &report.summary());
            }
        }
        info!("Delivery: {}", report.summary());
        self.log.push(result);
        self.last_delivery = Some(report);

        info!("Pipeline complete: {} language(s)", store.len());
        Ok(store)
    }

    /// Translation results in configured language order.
    ///
    /// Sequentially, the first failure stops further calls. Concurrently,
    /// task `i` starts `i + 1` gaps after the format call, so no two calls
    /// start closer than the configured delay, and the results are
    /// re-ordered after collection.
    async fn translate(
        &self,
        pacer: &mut Pacer,
        progress: Option<&ProgressCallback>,
        formatted: &str,
        total: usize,
    ) -> Vec<StageResult> {
        let concurrency = self.config.translation_concurrency;
        if concurrency <= 1 {
            let mut results = Vec::with_capacity(self.translations.len());
            for (i, stage) in self.translations.iter().enumerate() {
                pacer.wait().await;
                let result = execute(&self.runner, progress, stage, formatted, 4 + i, total).await;
                pacer.mark();
                let failed = !result.success;
                results.push(result);
                if failed {
                    break;
                }
            }
            return results;
        }

        debug!("Translating with concurrency {}", concurrency);
        let runner = &self.runner;
        let gate = pacer.clone();
        let mut results: Vec<(usize, StageResult)> = stream::iter(self.translations.iter().enumerate())
            .map(move |(i, stage)| {
                let mut pacer = gate.staggered(i as u32);
                async move {
                    pacer.wait().await;
                    (i, execute(runner, progress, stage, formatted, 4 + i, total).await)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        pacer.mark();
        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, r)| r).collect()
    }

    /// Append to the log; a failed result becomes the run's abort error.
    fn record(&mut self, result: StageResult) -> Result<String, DigestError> {
        let outcome = if result.success {
            Ok(result.output.clone())
        } else {
            Err(DigestError::StageFailed {
                stage: result.stage.clone(),
                attempts: result.attempts,
                detail: result.error.clone().unwrap_or_else(|| "Unknown error".into()),
            })
        };
        self.log.push(result);
        if let Err(e) = &outcome {
            error!("Aborting run: {}", e);
        }
        outcome
    }

    /// Remove every temporary file of this run. Safe to call repeatedly.
    pub fn cleanup(&self) -> usize {
        let removed = self.scratch.cleanup();
        debug!("Cleanup removed {} temporary file(s)", removed);
        removed
    }

    /// Pipeline, delivery, then the dated document. Temporary files are
    /// released whatever the outcome.
    pub async fn run(&mut self, renderer: &mut DocumentRenderer) -> Result<RunReport, DigestError> {
        self.run_for_date(renderer, Local::now().date_naive()).await
    }

    pub async fn run_for_date(
        &mut self,
        renderer: &mut DocumentRenderer,
        date: NaiveDate,
    ) -> Result<RunReport, DigestError> {
        let outcome = self.run_inner(renderer, date).await;
        self.cleanup();
        outcome
    }

    async fn run_inner(
        &mut self,
        renderer: &mut DocumentRenderer,
        date: NaiveDate,
    ) -> Result<RunReport, DigestError> {
        let store = self.run_daily_pipeline().await?;
        let rendered = renderer.render_for_date(&store, date).await?;
        Ok(RunReport {
            document_path: rendered.path,
            pages: rendered.pages,
            languages: store.languages().into_iter().map(String::from).collect(),
            delivery: self.last_delivery.clone().unwrap_or_default(),
            stages: self.log.clone(),
            render_issues: rendered.issues,
        })
    }
}

/// Run one stage with progress events around it.
async fn execute(
    runner: &StageRunner,
    progress: Option<&ProgressCallback>,
    stage: &Stage,
    context: &str,
    index: usize,
    total: usize,
) -> StageResult {
    info!("[{}/{}] {}", index, total, stage.name);
    if let Some(cb) = progress {
        cb.on_stage_start(&stage.name, index, total);
    }
    let result = runner.run(stage, context).await;
    if let Some(cb) = progress {
        match &result.error {
            None => cb.on_stage_complete(&stage.name, result.output.len()),
            Some(e) => cb.on_stage_error(&stage.name, e),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::providers::{DeliveryReceipt, OutgoingMessage, Prompt};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct ScriptedModel;

    #[async_trait]
    impl CompletionModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
            Ok(format!("# Out\n* {}", prompt.system.lines().next().unwrap_or_default()))
        }
    }

    struct NoSearch;

    #[async_trait]
    impl SearchProvider for NoSearch {
        async fn search(&self, _q: &str, _n: usize) -> Result<Vec<crate::providers::SearchHit>, ProviderError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageChannel for Recorder {
        async fn send(&self, message: &OutgoingMessage) -> Result<DeliveryReceipt, ProviderError> {
            self.sent.lock().push(message.text.clone());
            Ok(DeliveryReceipt { message_id: Some(1) })
        }
    }

    fn controller(config: PipelineConfig) -> PipelineController {
        let scratch = Arc::new(TempFileRegistry::new(std::env::temp_dir().join("md-controller-test")));
        PipelineController::new(
            config,
            Collaborators {
                model: Arc::new(ScriptedModel),
                search: Arc::new(NoSearch),
                market: None,
                channel: Arc::new(Recorder::default()),
                chat_id: "@desk".into(),
            },
            scratch,
        )
    }

    #[test]
    fn plan_lists_every_stage() {
        let config = PipelineConfig::builder().translation_languages(["hi", "ar"]).build().unwrap();
        assert_eq!(
            controller(config).plan(),
            vec!["search", "summarize", "format", "translate:hi", "translate:ar", "deliver"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stores_languages_in_configured_order() {
        let config = PipelineConfig::builder()
            .translation_languages(["he", "hi"])
            .inter_call_delay_ms(1_000)
            .build()
            .unwrap();
        let mut c = controller(config);
        let store = c.run_daily_pipeline().await.unwrap();
        assert_eq!(store.languages(), vec!["en", "he", "hi"]);
        let names: Vec<&str> = c.execution_log().iter().map(|r| r.stage.as_str()).collect();
        assert_eq!(
            names,
            vec!["search", "summarize", "format", "translate:he", "translate:hi", "deliver"]
        );
        assert!(c.last_delivery().unwrap().all_delivered());
    }
}
