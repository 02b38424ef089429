//! Terminal output pipeline: sanitize, batch, detect prompts.
//!
//! Raw PTY bytes flow Sanitizer → Coalescer → event publisher. The
//! sanitizer is stateful so escape sequences split across read chunks are
//! still removed; the coalescer bounds event rate during terminal redraws.

pub mod coalescer;
pub mod prompt;
pub mod sanitizer;

pub use coalescer::{Batch, Coalescer};
pub use prompt::{PromptDetector, PromptEvent};
pub use sanitizer::Sanitizer;
