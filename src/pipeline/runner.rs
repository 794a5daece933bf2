//! Stage execution with retry, backoff, timeout, and output validation.
//!
//! ## Retry Strategy
//!
//! Rate-limit (429) and transient transport errors are frequent with hosted
//! models. A stage with `max_retries = R` is attempted at most `R + 1` times
//! with the same input; before retry `n` the runner sleeps
//! `retry_backoff_ms * 2^(n-1)`. With a 2 s base and two retries the wait
//! sequence is 2 s → 4 s.
//!
//! An attempt fails when the agent returns an error, the per-stage timeout
//! elapses, the cleaned output is empty, or it exceeds the stage's word
//! ceiling.

use crate::error::ProviderError;
use crate::pipeline::postprocess::clean_stage_output;
use crate::progress::ProgressCallback;
use crate::stage::{word_count, Stage, StageResult};
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Runs one stage to completion or exhaustion.
#[derive(Clone)]
pub struct StageRunner {
    retry_backoff_ms: u64,
    progress: Option<ProgressCallback>,
}

impl StageRunner {
    pub fn new(retry_backoff_ms: u64) -> Self {
        Self {
            retry_backoff_ms,
            progress: None,
        }
    }

    pub fn with_progress(mut self, cb: Option<ProgressCallback>) -> Self {
        self.progress = cb;
        self
    }

    /// Backoff before the 1-based retry number `retry`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    /// Run `stage` against `context`.
    ///
    /// Always returns a [`StageResult`]; failures never propagate out of
    /// here. The controller inspects `result.success` to decide whether to
    /// abort.
    pub async fn run(&self, stage: &Stage, context: &str) -> StageResult {
        let start = Instant::now();
        let mut last_err = String::from("Unknown error");

        for attempt in 0..=stage.max_retries {
            if attempt > 0 {
                let backoff = self.backoff(attempt);
                warn!(
                    "{}: retry {}/{} after {:?}",
                    stage.name, attempt, stage.max_retries, backoff
                );
                if let Some(cb) = &self.progress {
                    cb.on_stage_retry(&stage.name, attempt + 1, &last_err);
                }
                sleep(backoff).await;
            }

            match self.attempt(stage, context).await {
                Ok(output) => {
                    debug!(
                        "{}: {} chars, {} words in {:?} ({} attempt(s))",
                        stage.name,
                        output.len(),
                        word_count(&output),
                        start.elapsed(),
                        attempt + 1
                    );
                    return StageResult::succeeded(&stage.name, output, attempt + 1);
                }
                Err(err) => {
                    warn!("{}: attempt {} failed: {}", stage.name, attempt + 1, err);
                    last_err = err;
                }
            }
        }

        StageResult::failed(&stage.name, last_err, stage.max_retries + 1)
    }

    async fn attempt(&self, stage: &Stage, context: &str) -> Result<String, String> {
        let call = stage.agent().perform(stage, context);
        let raw = match stage.timeout {
            Some(limit) => match timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    secs: limit.as_secs(),
                }),
            },
            None => call.await,
        }
        .map_err(|e| e.to_string())?;

        let output = clean_stage_output(&raw);
        if output.trim().is_empty() {
            return Err("Empty output".to_string());
        }
        if let Some(max) = stage.max_words {
            let words = word_count(&output);
            if words > max {
                return Err(format!("Output has {words} words; ceiling is {max}"));
            }
        }
        Ok(output)
    }
}
