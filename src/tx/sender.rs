//! Broadcasting of prepared transfers

use super::prepare::PreparedTransaction;
use crate::chain::Broadcaster;
use crate::error::{RemoteError, SubmitError};

use chrono::{DateTime, Utc};
use ethers::types::TxHash;
use std::sync::Arc;
use tracing::{info, warn};

/// A broadcast transfer awaiting inclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransaction {
    pub tx_hash: TxHash,
    pub submitted_at: DateTime<Utc>,
}

/// Hands prepared descriptors to the network
pub struct TransactionSubmitter {
    broadcaster: Arc<dyn Broadcaster>,
}

impl TransactionSubmitter {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { broadcaster }
    }

    /// Broadcast `prepared` once; no retry
    pub async fn submit(
        &self,
        prepared: &PreparedTransaction,
    ) -> Result<PendingTransaction, SubmitError> {
        crate::metrics::record_remote_call("broadcast");

        match self.broadcaster.broadcast(&prepared.descriptor).await {
            Ok(tx_hash) => {
                info!(
                    "Transaction sent: {:?} (generation {})",
                    tx_hash, prepared.generation
                );
                crate::metrics::record_tx_submitted();
                Ok(PendingTransaction {
                    tx_hash,
                    submitted_at: Utc::now(),
                })
            }
            Err(RemoteError::Rejected { reason }) => {
                warn!("Broadcast rejected: {}", reason);
                Err(SubmitError::Rejected { reason })
            }
            Err(RemoteError::Transport { message }) => {
                warn!("Broadcast transport failure: {}", message);
                Err(SubmitError::Network { message })
            }
        }
    }
}
