//! Confirmation tracking for submitted transfers
//!
//! A submitted transaction is polled at a fixed interval until its receipt is
//! terminal. Polling is bounded in time and in consecutive transport failures,
//! and stops as soon as the [`Tracking`] handle is dropped.

use super::{ConfirmationResult, ConfirmationStatus, ReceiptSource};
use crate::config::PipelineConfig;
use crate::error::{ConfirmationError, RemoteError};

use ethers::types::TxHash;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Creates one [`Tracking`] per submitted transaction
pub struct ConfirmationTracker {
    receipts: Arc<dyn ReceiptSource>,
    poll_interval: Duration,
    timeout: Duration,
    max_consecutive_failures: u32,
}

impl ConfirmationTracker {
    pub fn new(receipts: Arc<dyn ReceiptSource>, config: &PipelineConfig) -> Self {
        Self {
            receipts,
            poll_interval: config.poll_interval(),
            timeout: config.confirmation_timeout(),
            max_consecutive_failures: config.max_consecutive_poll_failures.max(1),
        }
    }

    /// Start observing `tx_hash`; the first poll happens immediately
    pub fn track(&self, tx_hash: TxHash) -> Tracking {
        let poll = PollLoop {
            receipts: self.receipts.clone(),
            tx_hash,
            poll_interval: self.poll_interval,
            timeout: self.timeout,
            deadline: Instant::now() + self.timeout,
            max_consecutive_failures: self.max_consecutive_failures,
            failures: 0,
            polls: 0,
        };

        debug!("Tracking {:?} for confirmation", tx_hash);

        let observations = stream::unfold(Some(poll), |state| async move {
            let mut poll = state?;
            let item = poll.next_observation().await;
            let terminal = match &item {
                Ok(result) => result.status.is_terminal(),
                Err(_) => true,
            };
            Some((item, if terminal { None } else { Some(poll) }))
        })
        .boxed();

        Tracking {
            tx_hash,
            observations,
            outcome: None,
        }
    }
}

struct PollLoop {
    receipts: Arc<dyn ReceiptSource>,
    tx_hash: TxHash,
    poll_interval: Duration,
    timeout: Duration,
    deadline: Instant,
    max_consecutive_failures: u32,
    failures: u32,
    polls: u32,
}

impl PollLoop {
    async fn next_observation(&mut self) -> Result<ConfirmationResult, ConfirmationError> {
        loop {
            if self.polls > 0 {
                let now = Instant::now();
                if now >= self.deadline {
                    return Err(self.timed_out());
                }
                tokio::time::sleep(self.poll_interval.min(self.deadline - now)).await;
            }
            if Instant::now() >= self.deadline {
                return Err(self.timed_out());
            }
            self.polls += 1;

            crate::metrics::record_remote_call("query_receipt");
            match self.receipts.query_receipt(self.tx_hash).await {
                Ok(result) => {
                    self.failures = 0;
                    debug!(
                        "Poll {} for {:?}: {:?}",
                        self.polls, self.tx_hash, result.status
                    );
                    return Ok(result);
                }
                Err(RemoteError::Transport { message }) | Err(RemoteError::Rejected { reason: message }) => {
                    self.failures += 1;
                    if self.failures >= self.max_consecutive_failures {
                        warn!(
                            "Giving up on receipt for {:?} after {} failed polls: {}",
                            self.tx_hash, self.failures, message
                        );
                        return Err(ConfirmationError::Unavailable {
                            tx_hash: self.tx_hash,
                            message,
                        });
                    }
                    warn!(
                        "Receipt poll failed for {:?} ({}/{}): {}",
                        self.tx_hash, self.failures, self.max_consecutive_failures, message
                    );
                }
            }
        }
    }

    fn timed_out(&self) -> ConfirmationError {
        warn!(
            "Transaction {:?} not confirmed within {:?}",
            self.tx_hash, self.timeout
        );
        ConfirmationError::Timeout {
            tx_hash: self.tx_hash,
            waited_secs: self.timeout.as_secs(),
        }
    }
}

/// Finite sequence of observations for one transaction.
///
/// Ends after the first `Included`/`Reverted` result or error and cannot be
/// restarted. Dropping it stops polling.
pub struct Tracking {
    tx_hash: TxHash,
    observations: BoxStream<'static, Result<ConfirmationResult, ConfirmationError>>,
    outcome: Option<Result<ConfirmationResult, ConfirmationError>>,
}

impl Tracking {
    pub fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    /// Wait for the next observation; `None` once the outcome is known
    pub async fn next(&mut self) -> Option<Result<ConfirmationResult, ConfirmationError>> {
        if self.outcome.is_some() {
            return None;
        }

        let item = self.observations.next().await?;
        match &item {
            Ok(result) if result.status.is_terminal() => {
                info!(
                    "Transaction {:?} {:?} in block {:?}",
                    self.tx_hash, result.status, result.block
                );
                self.outcome = Some(item.clone());
            }
            Ok(_) => {}
            Err(_) => self.outcome = Some(item.clone()),
        }
        Some(item)
    }

    /// Drive the sequence to its end and return the terminal observation
    pub async fn outcome(mut self) -> Result<ConfirmationResult, ConfirmationError> {
        while self.next().await.is_some() {}
        self.outcome
            .unwrap_or_else(|| Err(ConfirmationError::Unavailable {
                tx_hash: self.tx_hash,
                message: "tracking ended without an outcome".to_string(),
            }))
    }

    pub fn is_loading(&self) -> bool {
        self.outcome.is_none()
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            Some(Ok(ConfirmationResult {
                status: ConfirmationStatus::Included,
                ..
            }))
        )
    }

    pub fn is_failure(&self) -> bool {
        self.outcome.is_some() && !self.is_success()
    }
}
