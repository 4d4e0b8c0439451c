//! Observable pipeline state

use crate::chain::{ConfirmationResult, ConfirmationStatus};
use crate::error::{ConfirmationError, PipelineError};
use crate::tx::{PendingTransaction, PreparedTransaction, TransferRequest};

use chrono::{DateTime, Utc};
use ethers::types::{TxHash, U256};

/// Where the current transfer is in its lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    /// Nothing prepared: input incomplete, settling, or last prepare failed
    Idle,
    Preparing {
        generation: u64,
    },
    Ready(PreparedTransaction),
    Submitting(PreparedTransaction),
    Pending {
        prepared: PreparedTransaction,
        pending: PendingTransaction,
    },
    Confirmed {
        prepared: PreparedTransaction,
        pending: PendingTransaction,
        result: ConfirmationResult,
    },
    Failed {
        prepared: PreparedTransaction,
        pending: PendingTransaction,
        error: ConfirmationError,
    },
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Preparing { .. } => "preparing",
            PipelineState::Ready(_) => "ready",
            PipelineState::Submitting(_) => "submitting",
            PipelineState::Pending { .. } => "pending",
            PipelineState::Confirmed { .. } => "confirmed",
            PipelineState::Failed { .. } => "failed",
        }
    }

    /// Prepared transaction backing this state, if any
    pub fn prepared(&self) -> Option<&PreparedTransaction> {
        match self {
            PipelineState::Ready(prepared) | PipelineState::Submitting(prepared) => Some(prepared),
            PipelineState::Pending { prepared, .. }
            | PipelineState::Confirmed { prepared, .. }
            | PipelineState::Failed { prepared, .. } => Some(prepared),
            PipelineState::Idle | PipelineState::Preparing { .. } => None,
        }
    }

    /// Broadcast transaction, once there is one
    pub fn pending(&self) -> Option<&PendingTransaction> {
        match self {
            PipelineState::Pending { pending, .. }
            | PipelineState::Confirmed { pending, .. }
            | PipelineState::Failed { pending, .. } => Some(pending),
            _ => None,
        }
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        self.pending().map(|pending| pending.tx_hash)
    }

    /// A transaction is on the wire; input edits no longer restart preparation
    pub fn is_outstanding(&self) -> bool {
        matches!(
            self,
            PipelineState::Submitting(_) | PipelineState::Pending { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Confirmed { .. } | PipelineState::Failed { .. }
        )
    }
}

/// Point-in-time view of a pipeline, published on every transition
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    /// Latest input, including edits not yet settled
    pub request: TransferRequest,
    /// Input as of the last time the debouncer settled
    pub settled: Option<TransferRequest>,
    /// Generation of the most recent prepare cycle
    pub generation: u64,
    pub last_error: Option<PipelineError>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineSnapshot {
    pub(crate) fn initial() -> Self {
        Self {
            state: PipelineState::Idle,
            request: TransferRequest::default(),
            settled: None,
            generation: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_preparing(&self) -> bool {
        matches!(self.state, PipelineState::Preparing { .. })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, PipelineState::Ready(_))
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.state, PipelineState::Submitting(_))
    }

    pub fn is_confirming(&self) -> bool {
        matches!(self.state, PipelineState::Pending { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.state,
            PipelineState::Confirmed {
                result: ConfirmationResult {
                    status: ConfirmationStatus::Included,
                    ..
                },
                ..
            }
        )
    }

    pub fn is_error(&self) -> bool {
        self.last_error.is_some()
    }
}

/// Token balance of an owner, scaled for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    pub raw: U256,
    pub decimals: u8,
    pub formatted: String,
}
