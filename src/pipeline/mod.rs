//! Stage execution machinery.
//!
//! ## Data Flow
//!
//! ```text
//! agents ──▶ postprocess ──▶ runner ──▶ controller
//! (model/search)  (cleanup)   (retry)    (sequence, pacing)
//! ```
//!
//! 1. [`agents`]: the capability each stage is built with
//! 2. [`postprocess`]: deterministic cleanup of model output
//! 3. [`runner`]: attempts, backoff, timeout, output contract checks
//! 4. [`pacing`]: minimum gap between consecutive model calls

pub mod agents;
pub mod pacing;
pub mod postprocess;
pub mod runner;

pub use agents::{CompletionAgent, FormattingAgent, ResearchAgent, StageAgent};
pub use pacing::Pacer;
pub use runner::StageRunner;
