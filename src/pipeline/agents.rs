//! Stage agents: the capability each stage is constructed with.
//!
//! | Agent | Capabilities | Stages |
//! |---|---|---|
//! | [`ResearchAgent`] | search + market data + model | search |
//! | [`CompletionAgent`] | model | summarize, translate |
//! | [`FormattingAgent`] | model + image search | format |
//!
//! Agents return `Err(ProviderError)` for a failed attempt; the runner
//! decides whether to retry.

use crate::error::ProviderError;
use crate::pipeline::postprocess::clean_stage_output;
use crate::prompts::{build_prompt, with_image_candidates};
use crate::providers::{CompletionModel, MarketDataProvider, Quote, SearchHit, SearchProvider};
use crate::stage::Stage;
use crate::store::{extract_image_refs, ImageRef};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Performs the work of one stage.
#[async_trait]
pub trait StageAgent: Send + Sync {
    async fn perform(&self, stage: &Stage, context: &str) -> Result<String, ProviderError>;

    /// Images gathered as a side effect of the last successful attempt
    /// (market charts). Defaults to none.
    fn attachments(&self) -> Vec<ImageRef> {
        Vec::new()
    }
}

// ── Completion ───────────────────────────────────────────────────────────────

/// Sends the stage brief plus context to the model and returns its answer.
pub struct CompletionAgent {
    model: Arc<dyn CompletionModel>,
}

impl CompletionAgent {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl StageAgent for CompletionAgent {
    async fn perform(&self, stage: &Stage, context: &str) -> Result<String, ProviderError> {
        let prompt = build_prompt(stage, context);
        debug!(
            "{}: prompting {} ({} chars of context)",
            stage.name,
            self.model.name(),
            context.len()
        );
        self.model.complete(&prompt).await
    }
}

// ── Research ─────────────────────────────────────────────────────────────────

/// Runs the news queries, compiles a market snapshot, and has the model
/// extract the facts.
pub struct ResearchAgent {
    model: Arc<dyn CompletionModel>,
    search: Arc<dyn SearchProvider>,
    market: Option<Arc<dyn MarketDataProvider>>,
    queries: Vec<String>,
    symbols: Vec<String>,
    period: String,
    results_per_query: usize,
    charts: Mutex<Vec<ImageRef>>,
}

impl ResearchAgent {
    pub fn new(
        model: Arc<dyn CompletionModel>,
        search: Arc<dyn SearchProvider>,
        queries: Vec<String>,
    ) -> Self {
        Self {
            model,
            search,
            market: None,
            queries,
            symbols: Vec::new(),
            period: "5d".into(),
            results_per_query: 5,
            charts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_market_data(
        mut self,
        market: Arc<dyn MarketDataProvider>,
        symbols: Vec<String>,
        period: impl Into<String>,
    ) -> Self {
        self.market = Some(market);
        self.symbols = symbols;
        self.period = period.into();
        self
    }

    pub fn with_results_per_query(mut self, n: usize) -> Self {
        self.results_per_query = n.max(1);
        self
    }

    /// Run every query; a failing query contributes nothing. When every
    /// query fails the model still gets the market snapshot and an empty
    /// article list.
    async fn gather_hits(&self) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = Vec::new();
        let mut failed = 0usize;

        for query in &self.queries {
            match self.search.search(query, self.results_per_query).await {
                Ok(found) => {
                    debug!("Query '{}': {} hit(s)", query, found.len());
                    hits.extend(found);
                }
                Err(e) => {
                    warn!("Query '{}' failed: {}", query, e);
                    failed += 1;
                }
            }
        }

        if failed > 0 && failed == self.queries.len() {
            warn!("Every search query failed ({}); continuing without articles", failed);
        }
        rank_hits(hits)
    }

    async fn snapshot(&self) -> Vec<Quote> {
        let Some(market) = &self.market else {
            return Vec::new();
        };
        if self.symbols.is_empty() {
            return Vec::new();
        }
        match market.quotes(&self.symbols, &self.period).await {
            Ok(quotes) => quotes,
            Err(e) => {
                warn!("Market snapshot unavailable: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl StageAgent for ResearchAgent {
    async fn perform(&self, stage: &Stage, context: &str) -> Result<String, ProviderError> {
        let hits = self.gather_hits().await;
        let quotes = self.snapshot().await;
        info!(
            "Research: {} unique article(s), {} quote(s)",
            hits.len(),
            quotes.len()
        );

        let charts: Vec<ImageRef> = quotes
            .iter()
            .filter_map(|q| {
                q.chart_path.as_ref().map(|p| {
                    let mut image = ImageRef::new(
                        p.display().to_string(),
                        format!("{} ({})", q.symbol, self.period),
                    );
                    image.local_path = Some(p.clone());
                    image
                })
            })
            .collect();
        *self.charts.lock() = charts;

        let mut findings = compile_findings(&hits, &quotes);
        if !context.trim().is_empty() {
            findings = format!("{}\n\n{}", context.trim(), findings);
        }
        let prompt = build_prompt(stage, &findings);
        self.model.complete(&prompt).await
    }

    fn attachments(&self) -> Vec<ImageRef> {
        self.charts.lock().clone()
    }
}

/// De-duplicate by URL (keeping the best score) and order by descending
/// relevance.
pub fn rank_hits(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut unique: Vec<SearchHit> = Vec::with_capacity(hits.len());
    for hit in hits {
        match unique.iter_mut().find(|h| h.url == hit.url) {
            Some(existing) if existing.score < hit.score => *existing = hit,
            Some(_) => {}
            None => unique.push(hit),
        }
    }
    unique.sort_by(|a, b| b.score.total_cmp(&a.score));
    unique
}

/// Render hits and quotes as the findings text handed to the model.
pub fn compile_findings(hits: &[SearchHit], quotes: &[Quote]) -> String {
    let mut out = String::new();
    if !quotes.is_empty() {
        out.push_str("Market snapshot:\n");
        for q in quotes {
            let _ = writeln!(
                out,
                "- {}: {:.2} ({:+.2}, {:+.2}%), volume {}",
                q.symbol, q.price, q.change, q.change_percent, q.volume
            );
        }
        out.push('\n');
    }
    if hits.is_empty() {
        out.push_str("News: no articles found.\n");
        return out;
    }
    out.push_str("News:\n");
    for (i, hit) in hits.iter().enumerate() {
        let _ = write!(out, "{}. {} <{}>", i + 1, hit.title, hit.url);
        if let Some(date) = &hit.published_date {
            let _ = write!(out, " [{date}]");
        }
        let _ = writeln!(out, "\n   {}", hit.content.trim().replace('\n', " "));
    }
    out
}

// ── Formatting ───────────────────────────────────────────────────────────────

/// Formats the summary and guarantees at least one image line when the
/// search provider offers a candidate.
pub struct FormattingAgent {
    model: Arc<dyn CompletionModel>,
    images: Option<Arc<dyn SearchProvider>>,
    image_query: String,
}

impl FormattingAgent {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self {
            model,
            images: None,
            image_query: "stock market trend chart today".into(),
        }
    }

    pub fn with_image_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.images = Some(search);
        self
    }

    pub fn with_image_query(mut self, query: impl Into<String>) -> Self {
        self.image_query = query.into();
        self
    }

    async fn candidates(&self) -> Vec<String> {
        let Some(search) = &self.images else {
            return Vec::new();
        };
        match search.search_images(&self.image_query, 3).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("Image search failed: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl StageAgent for FormattingAgent {
    async fn perform(&self, stage: &Stage, context: &str) -> Result<String, ProviderError> {
        let candidates = self.candidates().await;
        let prompt = build_prompt(stage, &with_image_candidates(context, &candidates));
        let raw = self.model.complete(&prompt).await?;

        let mut formatted = clean_stage_output(&raw);
        if extract_image_refs(&formatted).is_empty() {
            if let Some(url) = candidates.first() {
                debug!("Format output has no image; appending {}", url);
                formatted.push_str(&format!("\n![Market trend]({url})\n"));
            }
        }
        Ok(formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Prompt;
    use crate::stage::StageKind;

    struct EchoModel;

    #[async_trait]
    impl CompletionModel for EchoModel {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
            Ok(prompt.user.clone())
        }
    }

    struct FixedSearch {
        fail: bool,
    }

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(&self, query: &str, _max: usize) -> Result<Vec<SearchHit>, ProviderError> {
            if self.fail {
                return Err(ProviderError::Transport("offline".into()));
            }
            Ok(vec![SearchHit {
                title: format!("About {query}"),
                url: "https://news.example.net/a".into(),
                content: "Stocks rallied.".into(),
                published_date: None,
                score: 0.5,
            }])
        }

        async fn search_images(&self, _q: &str, _max: usize) -> Result<Vec<String>, ProviderError> {
            Ok(vec!["https://img.finance.net/spx.png".into()])
        }
    }

    fn hit(url: &str, score: f64) -> SearchHit {
        SearchHit {
            title: url.into(),
            url: url.into(),
            content: String::new(),
            published_date: None,
            score,
        }
    }

    #[test]
    fn rank_hits_dedups_and_sorts() {
        let ranked = rank_hits(vec![hit("a", 0.2), hit("b", 0.9), hit("a", 0.7)]);
        let urls: Vec<(&str, f64)> = ranked.iter().map(|h| (h.url.as_str(), h.score)).collect();
        assert_eq!(urls, vec![("b", 0.9), ("a", 0.7)]);
    }

    #[test]
    fn findings_include_snapshot() {
        let quotes = vec![Quote {
            symbol: "^GSPC".into(),
            price: 5000.0,
            change: 25.5,
            change_percent: 0.51,
            volume: 1_000,
            chart_path: None,
        }];
        let text = compile_findings(&[], &quotes);
        assert!(text.contains("^GSPC: 5000.00 (+25.50, +0.51%), volume 1000"));
        assert!(text.contains("no articles found"));
    }

    #[tokio::test]
    async fn research_dedups_across_queries() {
        let agent = Arc::new(ResearchAgent::new(
            Arc::new(EchoModel),
            Arc::new(FixedSearch { fail: false }),
            vec!["q1".into(), "q2".into()],
        ));
        let stage = Stage::new(StageKind::Search, agent.clone());
        let out = agent.perform(&stage, "").await.unwrap();
        assert_eq!(out.matches("https://news.example.net/a").count(), 1);
    }

    #[tokio::test]
    async fn research_continues_when_every_query_fails() {
        let agent = Arc::new(ResearchAgent::new(
            Arc::new(EchoModel),
            Arc::new(FixedSearch { fail: true }),
            vec!["q1".into(), "q2".into()],
        ));
        let stage = Stage::new(StageKind::Search, agent.clone());
        let out = agent.perform(&stage, "").await.unwrap();
        assert!(out.contains("no articles found"));
    }

    struct PlainModel;

    #[async_trait]
    impl CompletionModel for PlainModel {
        fn name(&self) -> &str {
            "plain"
        }

        async fn complete(&self, _prompt: &Prompt) -> Result<String, ProviderError> {
            Ok("# Daily Wrap\n* Stocks rose".into())
        }
    }

    #[tokio::test]
    async fn formatter_appends_candidate_image() {
        let agent = Arc::new(
            FormattingAgent::new(Arc::new(PlainModel))
                .with_image_search(Arc::new(FixedSearch { fail: false })),
        );
        let stage = Stage::new(StageKind::Format, agent.clone());
        let out = agent.perform(&stage, "summary").await.unwrap();
        assert!(out.ends_with("![Market trend](https://img.finance.net/spx.png)\n"));
    }

    #[tokio::test]
    async fn prompt_carries_word_ceiling() {
        let agent = Arc::new(CompletionAgent::new(Arc::new(EchoModel)));
        let stage = Stage::new(StageKind::Summarize, agent.clone()).with_max_words(120);
        let prompt = build_prompt(&stage, "notes");
        assert!(prompt.system.contains("under 120 words"));
        assert!(prompt.user.contains("\"\"\"\nnotes\n\"\"\""));
    }
}
