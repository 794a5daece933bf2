//! Stage definitions and per-stage results.
//!
//! A [`Stage`] is built once when the pipeline is assembled and never
//! mutated afterwards. Its capability (the [`StageAgent`] that performs the
//! work) is injected at construction. Running a stage produces a
//! [`StageResult`], which the controller appends to its execution log.

use crate::pipeline::agents::StageAgent;
use crate::prompts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Which step of the daily pipeline a stage performs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageKind {
    Search,
    Summarize,
    Format,
    Translate { language: String },
    Deliver,
}

impl StageKind {
    /// Stable identifier used for logs and progress events
    /// (`"search"`, `"translate:hi"`, ...).
    pub fn label(&self) -> String {
        match self {
            StageKind::Search => "search".into(),
            StageKind::Summarize => "summarize".into(),
            StageKind::Format => "format".into(),
            StageKind::Translate { language } => format!("translate:{language}"),
            StageKind::Deliver => "deliver".into(),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// One unit of pipeline work.
#[derive(Clone)]
pub struct Stage {
    pub name: String,
    pub kind: StageKind,
    /// Who the agent acts as ("financial news researcher").
    pub role: String,
    /// Task description handed to the agent.
    pub instructions: String,
    /// Free-text output contract.
    pub expected_output: String,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
    /// Word ceiling; an output over it fails the attempt.
    pub max_words: Option<usize>,
    agent: Arc<dyn StageAgent>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .field("max_words", &self.max_words)
            .finish()
    }
}

impl Stage {
    /// A stage of `kind` with the stock role, instructions, and output
    /// contract for that kind.
    pub fn new(kind: StageKind, agent: Arc<dyn StageAgent>) -> Self {
        let brief = prompts::brief_for(&kind);
        Self {
            name: kind.label(),
            role: brief.role,
            instructions: brief.instructions,
            expected_output: brief.expected_output,
            kind,
            max_retries: 0,
            timeout: None,
            max_words: None,
            agent,
        }
    }

    pub fn with_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_words(mut self, n: usize) -> Self {
        self.max_words = Some(n);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn agent(&self) -> &Arc<dyn StageAgent> {
        &self.agent
    }

    /// Target language for translation stages.
    pub fn language(&self) -> Option<&str> {
        match &self.kind {
            StageKind::Translate { language } => Some(language),
            _ => None,
        }
    }
}

/// Outcome of running one stage, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    /// Raw text output; empty on failure.
    pub output: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    /// Attempts made, including the first.
    pub attempts: u32,
}

impl StageResult {
    pub fn succeeded(stage: impl Into<String>, output: impl Into<String>, attempts: u32) -> Self {
        Self {
            stage: stage.into(),
            output: output.into(),
            timestamp: Utc::now(),
            success: true,
            error: None,
            attempts,
        }
    }

    pub fn failed(stage: impl Into<String>, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            stage: stage.into(),
            output: String::new(),
            timestamp: Utc::now(),
            success: false,
            error: Some(error.into()),
            attempts,
        }
    }
}

/// Whitespace-separated word count, ignoring markdown bullet and heading
/// markers.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .filter(|w| !matches!(*w, "*" | "-" | "+" | "#" | "##" | "###"))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(StageKind::Search.label(), "search");
        assert_eq!(
            StageKind::Translate { language: "he".into() }.label(),
            "translate:he"
        );
    }

    #[test]
    fn word_count_skips_markers() {
        assert_eq!(word_count("# Title\n* point one\n* point two"), 5);
        assert_eq!(word_count("   "), 0);
    }

    #[test]
    fn failed_result_has_no_output() {
        let r = StageResult::failed("format", "timeout", 3);
        assert!(!r.success);
        assert!(r.output.is_empty());
        assert_eq!(r.error.as_deref(), Some("timeout"));
        assert_eq!(r.attempts, 3);
    }
}
