//! Validation, base-unit conversion and simulation of a transfer request

use super::gas::GasEstimate;
use super::units::DisplayAmount;
use crate::chain::{parse_address, TransferDescriptor, TransferSimulator};
use crate::error::{PrepareError, RemoteError};
use crate::metadata::TokenMetadata;

use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::{debug, info};

/// Raw user input, exactly as typed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferRequest {
    pub token: String,
    pub recipient: String,
    /// Decimal string in display units (e.g. `"10.5"`)
    pub amount: String,
}

impl TransferRequest {
    pub fn new(
        token: impl Into<String>,
        recipient: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            recipient: recipient.into(),
            amount: amount.into(),
        }
    }

    /// All three fields hold something worth preparing
    pub fn is_complete(&self) -> bool {
        !self.token.trim().is_empty()
            && !self.recipient.trim().is_empty()
            && !self.amount.trim().is_empty()
    }
}

/// A transfer that passed validation and simulation
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTransaction {
    pub descriptor: TransferDescriptor,
    pub estimated_cost: GasEstimate,
    /// Input snapshot this was prepared from
    pub request: TransferRequest,
    pub token: TokenMetadata,
    pub recipient: Address,
    /// Amount in base units
    pub amount: U256,
    pub generation: u64,
}

/// Turns a settled request into a broadcast-ready transaction
pub struct TransactionPreparer {
    simulator: Arc<dyn TransferSimulator>,
}

impl TransactionPreparer {
    pub fn new(simulator: Arc<dyn TransferSimulator>) -> Self {
        Self { simulator }
    }

    /// Check recipient and amount syntax without touching the remote
    pub fn validate(request: &TransferRequest) -> Result<(Address, DisplayAmount), PrepareError> {
        let recipient = parse_address(&request.recipient)
            .ok_or_else(|| PrepareError::InvalidAddress(request.recipient.clone()))?;

        let display_amount = DisplayAmount::parse(&request.amount)?;

        Ok((recipient, display_amount))
    }

    /// Validate, scale and simulate `request`, short-circuiting on the first failure.
    ///
    /// `token` must be the metadata resolved for `request.token`.
    pub async fn prepare(
        &self,
        request: &TransferRequest,
        token: TokenMetadata,
        generation: u64,
    ) -> Result<PreparedTransaction, PrepareError> {
        let (recipient, display_amount) = Self::validate(request)?;

        let expected = parse_address(&request.token).unwrap_or_default();
        if expected != token.address {
            return Err(PrepareError::TokenMismatch {
                expected,
                found: token.address,
            });
        }
        let amount = display_amount.to_base_units(token.decimals)?;

        debug!(
            "Simulating transfer of {} base units of {:?} to {:?} (generation {})",
            amount, token.address, recipient, generation
        );

        crate::metrics::record_remote_call("simulate_transfer");
        let simulation = self
            .simulator
            .simulate_transfer(token.address, recipient, amount)
            .await
            .map_err(|e| match e {
                RemoteError::Rejected { reason } => PrepareError::Simulation { reason },
                RemoteError::Transport { message } => PrepareError::Network { message },
            })?;

        info!(
            "Prepared transfer generation {}: gas limit {}, max cost {} wei",
            generation, simulation.estimated_cost.gas_limit, simulation.estimated_cost.total_cost
        );

        Ok(PreparedTransaction {
            descriptor: simulation.descriptor,
            estimated_cost: simulation.estimated_cost,
            request: request.clone(),
            token,
            recipient,
            amount,
            generation,
        })
    }
}
