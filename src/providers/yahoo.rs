//! Index and equity quotes from the Yahoo Finance chart endpoint.
//!
//! For each symbol the daily history over `period` is fetched, the last two
//! closes give price and change, and a small line chart of the closes is
//! drawn into the scratch directory.

use crate::error::{DigestError, ProviderError};
use crate::providers::{status_error, MarketDataProvider, Quote};
use crate::scratch::TempFileRegistry;
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use serde::Deserialize;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const ENDPOINT: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; market-digest/0.3)";

const CHART_WIDTH: u32 = 800;
const CHART_HEIGHT: u32 = 480;
const CHART_PAD: u32 = 40;

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

/// Closing prices and volumes with gaps removed.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    pub closes: Vec<f64>,
    pub volumes: Vec<u64>,
}

pub struct YahooMarketData {
    client: reqwest::Client,
    endpoint: String,
    scratch: Arc<TempFileRegistry>,
    charts: bool,
}

impl YahooMarketData {
    pub fn new(scratch: Arc<TempFileRegistry>, timeout_secs: u64) -> Result<Self, DigestError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DigestError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: ENDPOINT.to_string(),
            scratch,
            charts: true,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Skip chart drawing.
    pub fn without_charts(mut self) -> Self {
        self.charts = false;
        self
    }

    async fn history(&self, symbol: &str, period: &str) -> Result<History, ProviderError> {
        let url = format!("{}/{}", self.endpoint, symbol);
        let response = self
            .client
            .get(&url)
            .query(&[("range", period), ("interval", "1d")])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("yahoo", status, &body));
        }
        let envelope: ChartEnvelope = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("yahoo {symbol}: {e}")))?;
        parse_history(symbol, envelope)
    }

    async fn quote(&self, symbol: &str, period: &str) -> Result<Quote, ProviderError> {
        let history = self.history(symbol, period).await?;
        let mut quote = quote_from_history(symbol, &history)
            .ok_or_else(|| ProviderError::Malformed(format!("yahoo {symbol}: no closing prices")))?;

        if self.charts && history.closes.len() > 1 {
            let closes = history.closes.clone();
            let png = tokio::task::spawn_blocking(move || draw_chart(&closes))
                .await
                .map_err(|e| ProviderError::Api(format!("chart task failed: {e}")))?;
            match png.and_then(|bytes| {
                self.scratch
                    .write(&format!("chart-{}-", sanitise(symbol)), ".png", &bytes)
                    .map_err(|e| e.to_string())
            }) {
                Ok(path) => quote.chart_path = Some(path),
                Err(e) => warn!("Chart for {} not saved: {}", symbol, e),
            }
        }
        Ok(quote)
    }
}

#[async_trait]
impl MarketDataProvider for YahooMarketData {
    async fn quotes(&self, symbols: &[String], period: &str) -> Result<Vec<Quote>, ProviderError> {
        let mut quotes = Vec::with_capacity(symbols.len());
        let mut last_err = None;
        for symbol in symbols {
            match self.quote(symbol, period).await {
                Ok(q) => {
                    debug!("{}: {:.2} ({:+.2}%)", q.symbol, q.price, q.change_percent);
                    quotes.push(q);
                }
                Err(e) => {
                    warn!("Quote for {} failed: {}", symbol, e);
                    last_err = Some(e);
                }
            }
        }
        match (quotes.is_empty(), last_err) {
            (true, Some(e)) => Err(e),
            _ => Ok(quotes),
        }
    }
}

fn parse_history(symbol: &str, envelope: ChartEnvelope) -> Result<History, ProviderError> {
    if let Some(err) = envelope.chart.error {
        return Err(ProviderError::Api(format!("yahoo {symbol}: {}", err.description)));
    }
    let series = envelope
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
        .and_then(|r| r.indicators.quote.into_iter().next())
        .unwrap_or_default();

    // Closes and volumes are index-aligned; drop days without a close.
    let mut history = History {
        closes: Vec::new(),
        volumes: Vec::new(),
    };
    for (i, close) in series.close.iter().enumerate() {
        if let Some(c) = close {
            history.closes.push(*c);
            history
                .volumes
                .push(series.volume.get(i).copied().flatten().unwrap_or(0));
        }
    }
    Ok(history)
}

/// Price is the last close; change is against the previous close, or zero
/// with a single data point.
pub fn quote_from_history(symbol: &str, history: &History) -> Option<Quote> {
    let price = *history.closes.last()?;
    let prev = if history.closes.len() > 1 {
        history.closes[history.closes.len() - 2]
    } else {
        price
    };
    let change = price - prev;
    let change_percent = if prev != 0.0 { change / prev * 100.0 } else { 0.0 };
    Some(Quote {
        symbol: symbol.to_string(),
        price: round2(price),
        change: round2(change),
        change_percent: round2(change_percent),
        volume: history.volumes.last().copied().unwrap_or(0),
        chart_path: None,
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn sanitise(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Draw `closes` as a line chart over a light grid, PNG-encoded.
pub fn draw_chart(closes: &[f64]) -> Result<Vec<u8>, String> {
    if closes.len() < 2 {
        return Err("need at least two points".into());
    }
    let mut img = RgbImage::from_pixel(CHART_WIDTH, CHART_HEIGHT, Rgb([255, 255, 255]));
    let grid = Rgb([225, 228, 232]);
    let line = Rgb([26, 115, 232]);

    let plot_w = CHART_WIDTH - 2 * CHART_PAD;
    let plot_h = CHART_HEIGHT - 2 * CHART_PAD;
    for i in 0..=4 {
        let y = CHART_PAD + plot_h * i / 4;
        for x in CHART_PAD..=CHART_PAD + plot_w {
            img.put_pixel(x, y, grid);
        }
    }

    let min = closes.iter().copied().fold(f64::INFINITY, f64::min);
    let max = closes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = if (max - min).abs() < f64::EPSILON { 1.0 } else { max - min };
    let point = |i: usize, v: f64| -> (i64, i64) {
        let x = CHART_PAD as f64 + plot_w as f64 * i as f64 / (closes.len() - 1) as f64;
        let y = CHART_PAD as f64 + plot_h as f64 * (1.0 - (v - min) / span);
        (x.round() as i64, y.round() as i64)
    };

    for (i, pair) in closes.windows(2).enumerate() {
        let a = point(i, pair[0]);
        let b = point(i + 1, pair[1]);
        draw_line(&mut img, a, b, line);
    }

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| e.to_string())?;
    Ok(out.into_inner())
}

/// Bresenham, two pixels thick.
fn draw_line(img: &mut RgbImage, (x0, y0): (i64, i64), (x1, y1): (i64, i64), color: Rgb<u8>) {
    let (dx, dy) = ((x1 - x0).abs(), -(y1 - y0).abs());
    let (sx, sy) = (if x0 < x1 { 1 } else { -1 }, if y0 < y1 { 1 } else { -1 });
    let (mut x, mut y, mut err) = (x0, y0, dx + dy);
    loop {
        for (px, py) in [(x, y), (x, y + 1)] {
            if px >= 0 && py >= 0 && (px as u32) < img.width() && (py as u32) < img.height() {
                img.put_pixel(px as u32, py as u32, color);
            }
        }
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: &str) -> ChartEnvelope {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn history_skips_missing_closes() {
        let env = envelope(
            r#"{"chart":{"result":[{"indicators":{"quote":[
                {"close":[100.0,null,102.0],"volume":[10,20,30]}
            ]}}],"error":null}}"#,
        );
        let history = parse_history("^GSPC", env).unwrap();
        assert_eq!(history.closes, vec![100.0, 102.0]);
        assert_eq!(history.volumes, vec![10, 30]);
    }

    #[test]
    fn chart_error_is_reported() {
        let env = envelope(
            r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#,
        );
        let err = parse_history("NOPE", env).unwrap_err();
        assert!(err.to_string().contains("No data found"));
    }

    #[test]
    fn quote_change_against_previous_close() {
        let history = History {
            closes: vec![4000.0, 4100.0, 4141.0],
            volumes: vec![1, 2, 3],
        };
        let q = quote_from_history("^GSPC", &history).unwrap();
        assert_eq!(q.price, 4141.0);
        assert_eq!(q.change, 41.0);
        assert_eq!(q.change_percent, 1.0);
        assert_eq!(q.volume, 3);
    }

    #[test]
    fn single_point_has_zero_change() {
        let history = History {
            closes: vec![50.0],
            volumes: vec![],
        };
        let q = quote_from_history("AAPL", &history).unwrap();
        assert_eq!(q.change, 0.0);
        assert_eq!(q.change_percent, 0.0);
        assert!(quote_from_history("AAPL", &History { closes: vec![], volumes: vec![] }).is_none());
    }

    #[test]
    fn chart_is_a_png() {
        let png = draw_chart(&[1.0, 3.0, 2.0, 5.0]).unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!((img.width(), img.height()), (CHART_WIDTH, CHART_HEIGHT));
        assert!(draw_chart(&[1.0]).is_err());
        assert!(draw_chart(&[2.0, 2.0]).is_ok());
    }

    #[test]
    fn symbol_sanitised_for_file_names() {
        assert_eq!(sanitise("^GSPC"), "gspc");
        assert_eq!(sanitise("BRK.B"), "brkb");
    }
}
