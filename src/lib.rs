//! Transfer pipeline - debounced, cancellable ERC-20 transfer submission
//!
//! Turns rapidly edited input (token, recipient, amount) into a validated,
//! simulated, broadcast and confirmed `transfer` call against a remote ledger
//! reached only through fallible async capabilities.

pub mod chain;
pub mod config;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod pipeline;
pub mod tx;

pub use chain::{EthereumLedger, Ledger};
pub use config::Settings;
pub use error::{ErrorCategory, PipelineError};
pub use metadata::{MetadataResolver, TokenMetadata};
pub use pipeline::{PipelineSnapshot, PipelineState, TokenBalance, TransferPipeline};
pub use tx::TransferRequest;
