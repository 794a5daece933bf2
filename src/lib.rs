//! # market-digest
//!
//! Produce a daily US market summary in several languages, deliver it to a
//! chat channel, and render it as a multi-section PDF.
//!
//! ## Pipeline Overview
//!
//! ```text
//! search ──▶ summarize ──▶ format ──▶ translate × N ──▶ deliver
//!   │                                      │
//!   │ news + market snapshot               └─▶ ContentStore ──▶ PDF
//!   └─ Tavily, Yahoo Finance                   (en, hi, ar, he)   cover, contents,
//!                                                                 one section per
//!                                                                 language, appendix
//! ```
//!
//! 1. [`controller::PipelineController`] runs each [`stage::Stage`] through
//!    the [`pipeline::StageRunner`] (retry with exponential backoff, timeout,
//!    output clean-up) and threads each output into the next stage.
//! 2. Outputs land in a [`store::ContentStore`], ordered by language.
//! 3. [`delivery::DeliveryAdapter`] pushes every language to the chat.
//! 4. [`render::DocumentRenderer`] writes `market_summary_<date>.pdf` with
//!    right-to-left alignment and font fallback per language.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use market_digest::{Collaborators, Credentials, DocumentRenderer, PipelineConfig, PipelineController, TempFileRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .translation_languages(["hi", "ar", "he"])
//!         .build()?;
//!     let credentials = Credentials::from_env()?;
//!     let scratch = Arc::new(TempFileRegistry::new(config.scratch_dir.clone()));
//!
//!     let collaborators = Collaborators::from_credentials(&config, &credentials, scratch.clone())?;
//!     let mut renderer = DocumentRenderer::new(&config, scratch.clone())?;
//!     let mut controller = PipelineController::new(config, collaborators, scratch);
//!
//!     let report = controller.run(&mut renderer).await?;
//!     println!("{}: {}", report.document_path.display(), report.delivery.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `market-digest` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! market-digest = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod controller;
pub mod delivery;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod providers;
pub mod render;
pub mod scratch;
pub mod stage;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Credentials, PipelineConfig, PipelineConfigBuilder};
pub use controller::{Collaborators, PipelineController, RunReport};
pub use delivery::{DeliveryAdapter, DeliveryOutcome, DeliveryReport};
pub use error::{DigestError, ProviderError, ResourceIssue};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use render::{DocumentRenderer, RenderReport};
pub use scratch::TempFileRegistry;
pub use stage::{Stage, StageKind, StageResult};
pub use store::{ContentStore, ImageRef, LanguageContent};
