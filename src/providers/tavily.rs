//! Web search through the Tavily API.

use crate::error::{DigestError, ProviderError};
use crate::providers::{status_error, SearchHit, SearchProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const ENDPOINT: &str = "https://api.tavily.com/search";

/// Financial news outlets news searches are restricted to.
pub const NEWS_DOMAINS: &[&str] = &[
    "reuters.com",
    "bloomberg.com",
    "cnbc.com",
    "marketwatch.com",
    "wsj.com",
    "ft.com",
    "yahoo.com/finance",
    "investing.com",
];

/// Chart-heavy sites used for image searches.
pub const IMAGE_DOMAINS: &[&str] = &[
    "tradingview.com",
    "investing.com",
    "marketwatch.com",
    "bloomberg.com",
    "reuters.com",
    "cnbc.com",
];

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: String,
    search_depth: &'a str,
    include_answer: bool,
    include_images: bool,
    include_raw_content: bool,
    max_results: usize,
    include_domains: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<ResultItem>,
    #[serde(default)]
    images: Vec<ImageItem>,
}

#[derive(Debug, Deserialize)]
struct ResultItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    published_date: Option<String>,
    #[serde(default)]
    score: f64,
}

/// Tavily returns bare URLs, or objects when image descriptions are requested.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ImageItem {
    Url(String),
    Described { url: String },
}

impl ImageItem {
    fn into_url(self) -> String {
        match self {
            ImageItem::Url(url) | ImageItem::Described { url } => url,
        }
    }
}

pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>, timeout_secs: u64) -> Result<Self, DigestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DigestError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: ENDPOINT.to_string(),
        })
    }

    /// Point at a different endpoint (a proxy or a local stub).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn post(&self, request: &SearchRequest<'_>) -> Result<SearchResponse, ProviderError> {
        let response = self.client.post(&self.endpoint).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("tavily", status, &body));
        }
        response
            .json::<SearchResponse>()
            .await
            .map_err(|e| ProviderError::Malformed(format!("tavily: {e}")))
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ProviderError> {
        let request = SearchRequest {
            api_key: &self.api_key,
            query: query.to_string(),
            search_depth: "advanced",
            include_answer: true,
            include_images: true,
            include_raw_content: false,
            max_results,
            include_domains: NEWS_DOMAINS,
        };
        let response = self.post(&request).await?;
        let hits = into_hits(response);
        debug!("tavily '{}': {} hit(s)", query, hits.len());
        Ok(hits)
    }

    async fn search_images(&self, query: &str, max_results: usize) -> Result<Vec<String>, ProviderError> {
        let request = SearchRequest {
            api_key: &self.api_key,
            query: format!("{query} chart graph financial"),
            search_depth: "basic",
            include_answer: false,
            include_images: true,
            include_raw_content: false,
            max_results,
            include_domains: IMAGE_DOMAINS,
        };
        let response = self.post(&request).await?;
        Ok(response
            .images
            .into_iter()
            .map(ImageItem::into_url)
            .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
            .take(max_results)
            .collect())
    }
}

/// The synthesised answer, when present, leads the hits with a top score.
fn into_hits(response: SearchResponse) -> Vec<SearchHit> {
    let mut hits = Vec::with_capacity(response.results.len() + 1);
    if let Some(answer) = response.answer.filter(|a| !a.trim().is_empty()) {
        hits.push(SearchHit {
            title: "AI Summary".to_string(),
            url: String::new(),
            content: answer,
            published_date: Some(chrono::Utc::now().to_rfc3339()),
            score: 1.0,
        });
    }
    hits.extend(response.results.into_iter().map(|r| SearchHit {
        title: r.title,
        url: r.url,
        content: r.content,
        published_date: r.published_date.filter(|d| !d.is_empty()),
        score: r.score,
    }));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_leads_the_hits() {
        let response: SearchResponse = serde_json::from_str(
            r#"{
                "answer": "Stocks rose.",
                "results": [
                    {"title": "Dow gains", "url": "https://cnbc.com/a", "content": "Dow up 1%", "score": 0.8},
                    {"title": "Fed", "url": "https://reuters.com/b", "content": "Rates held", "published_date": ""}
                ],
                "images": ["https://x.com/a.png"]
            }"#,
        )
        .unwrap();
        let hits = into_hits(response);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "AI Summary");
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[1].url, "https://cnbc.com/a");
        assert_eq!(hits[2].published_date, None);
        assert_eq!(hits[2].score, 0.0);
    }

    #[test]
    fn image_items_accept_both_shapes() {
        let response: SearchResponse = serde_json::from_str(
            r#"{"images": ["https://a/1.png", {"url": "https://a/2.png", "description": "chart"}]}"#,
        )
        .unwrap();
        let urls: Vec<String> = response.images.into_iter().map(ImageItem::into_url).collect();
        assert_eq!(urls, vec!["https://a/1.png", "https://a/2.png"]);
    }

    #[test]
    fn request_serialises_domains() {
        let request = SearchRequest {
            api_key: "k",
            query: "fed".into(),
            search_depth: "advanced",
            include_answer: true,
            include_images: true,
            include_raw_content: false,
            max_results: 5,
            include_domains: NEWS_DOMAINS,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["search_depth"], "advanced");
        assert_eq!(json["include_domains"][0], "reuters.com");
    }
}
