//! Error types for the transfer pipeline
//!
//! Every stage has its own error enum so callers can match on exactly what
//! went wrong; [`PipelineError`] wraps them for the UI-visible error slot.

use ethers::types::{Address, TxHash};
use thiserror::Error;

/// Outcome of a failed remote call, as reported by a ledger capability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote answered and refused the request (revert, bad token, nonce conflict...)
    #[error("rejected by remote: {reason}")]
    Rejected { reason: String },

    /// The request never got a usable answer
    #[error("transport failure: {message}")]
    Transport { message: String },
}

impl RemoteError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        RemoteError::Rejected {
            reason: reason.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        RemoteError::Transport {
            message: message.into(),
        }
    }
}

/// Result type for ledger capabilities
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Malformed display amount
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("amount must not be negative")]
    Negative,

    #[error("amount {0:?} is not a decimal number")]
    NotNumeric(String),

    #[error("amount has {found} fractional digits but the token allows {max}")]
    TooManyDecimals { max: u8, found: usize },

    #[error("amount does not fit in 256 bits")]
    Overflow,
}

/// Token decimals could not be resolved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("malformed token address {0:?}")]
    MalformedAddress(String),

    #[error("{address:?} is not a token contract: {reason}")]
    NotAToken { address: Address, reason: String },

    #[error("network error resolving decimals for {address:?}: {message}")]
    Network { address: Address, message: String },
}

/// Preparing (validating + simulating) a transfer failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrepareError {
    #[error("invalid recipient address {0:?}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("decimals resolved for {found:?} cannot be used for token {expected:?}")]
    TokenMismatch { expected: Address, found: Address },

    #[error("simulation failed: {reason}")]
    Simulation { reason: String },

    #[error("network error during simulation: {message}")]
    Network { message: String },
}

/// Broadcasting a prepared transfer failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("broadcast rejected: {reason}")]
    Rejected { reason: String },

    #[error("network error during broadcast: {message}")]
    Network { message: String },
}

/// A submitted transfer did not end up successfully included
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationError {
    #[error("transaction {tx_hash:?} reverted in block {block:?}")]
    Reverted { tx_hash: TxHash, block: Option<u64> },

    #[error("transaction {tx_hash:?} not confirmed after {waited_secs}s")]
    Timeout { tx_hash: TxHash, waited_secs: u64 },

    #[error("receipt for {tx_hash:?} unavailable: {message}")]
    Unavailable { tx_hash: TxHash, message: String },
}

/// Coarse error category exposed to the host UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    InputValidation,
    Metadata,
    Simulation,
    Network,
    Submit,
    Confirmation,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InputValidation => "input_validation",
            ErrorCategory::Metadata => "metadata",
            ErrorCategory::Simulation => "simulation",
            ErrorCategory::Network => "network",
            ErrorCategory::Submit => "submit",
            ErrorCategory::Confirmation => "confirmation",
        }
    }
}

/// Any error surfaced by the pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("prepare failed: {0}")]
    Prepare(#[from] PrepareError),

    #[error("submit failed: {0}")]
    Submit(#[from] SubmitError),

    #[error("confirmation failed: {0}")]
    Confirmation(#[from] ConfirmationError),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Prepare(e) => match e {
                PrepareError::InvalidAddress(_) | PrepareError::InvalidAmount(_) => {
                    ErrorCategory::InputValidation
                }
                PrepareError::Metadata(MetadataError::Network { .. }) => ErrorCategory::Network,
                PrepareError::Metadata(_) | PrepareError::TokenMismatch { .. } => {
                    ErrorCategory::Metadata
                }
                PrepareError::Simulation { .. } => ErrorCategory::Simulation,
                PrepareError::Network { .. } => ErrorCategory::Network,
            },
            PipelineError::Submit(SubmitError::Network { .. }) => ErrorCategory::Network,
            PipelineError::Submit(_) => ErrorCategory::Submit,
            PipelineError::Confirmation(_) => ErrorCategory::Confirmation,
        }
    }

    /// Check if repeating the same action without editing input may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Prepare(PrepareError::Network { .. })
                | PipelineError::Prepare(PrepareError::Metadata(MetadataError::Network { .. }))
                | PipelineError::Submit(_)
        )
    }
}
