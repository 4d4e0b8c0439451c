//! Transfer pipeline - from raw input to a confirmed token transfer
//!
//! This module provides:
//! - Debouncing of rapidly edited input
//! - The observable state machine and its snapshots
//! - The actor that drives preparation, submission and confirmation

pub mod debounce;
pub mod engine;
pub mod state;

pub use debounce::Debouncer;
pub use engine::TransferPipeline;
pub use state::{PipelineSnapshot, PipelineState, TokenBalance};
