//! Chain module - the remote ledger as seen by the pipeline
//!
//! This module provides:
//! - One trait per remote capability the pipeline consumes
//! - Address format validation
//! - An ethers-backed ledger with multi-RPC failover
//! - Receipt polling until a submitted transfer is included or reverted

pub mod address;
pub mod confirmation;
pub mod provider;

pub use address::{parse_address, validate_address_format};
pub use confirmation::{ConfirmationTracker, Tracking};
pub use provider::EthereumLedger;

use crate::error::RemoteResult;
use crate::tx::gas::GasEstimate;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TxHash, U256};

/// Broadcast-ready payload produced by a successful simulation.
///
/// Opaque to the pipeline; only the ledger that produced it knows how to send it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferDescriptor {
    tx: TypedTransaction,
}

impl TransferDescriptor {
    pub fn new(tx: TypedTransaction) -> Self {
        Self { tx }
    }

    pub fn transaction(&self) -> &TypedTransaction {
        &self.tx
    }

    /// Hex-encoded calldata, for logs
    pub fn calldata_hex(&self) -> String {
        self.tx
            .data()
            .map(|data| hex::encode(data))
            .unwrap_or_default()
    }
}

/// Result of a dry-run transfer
#[derive(Debug, Clone, PartialEq)]
pub struct Simulation {
    pub descriptor: TransferDescriptor,
    pub estimated_cost: GasEstimate,
}

/// Inclusion status of a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Included,
    Reverted,
    StillPending,
}

impl ConfirmationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConfirmationStatus::StillPending)
    }
}

/// One observation of a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationResult {
    pub status: ConfirmationStatus,
    /// Block the transaction was included in, if any
    pub block: Option<u64>,
}

impl ConfirmationResult {
    pub fn still_pending() -> Self {
        Self {
            status: ConfirmationStatus::StillPending,
            block: None,
        }
    }

    pub fn included(block: u64) -> Self {
        Self {
            status: ConfirmationStatus::Included,
            block: Some(block),
        }
    }

    pub fn reverted(block: u64) -> Self {
        Self {
            status: ConfirmationStatus::Reverted,
            block: Some(block),
        }
    }
}

/// Reads `decimals()` of a token contract
#[async_trait]
pub trait DecimalsSource: Send + Sync {
    async fn query_decimals(&self, token: Address) -> RemoteResult<u8>;
}

/// Dry-runs a token transfer and prices it
#[async_trait]
pub trait TransferSimulator: Send + Sync {
    async fn simulate_transfer(
        &self,
        token: Address,
        recipient: Address,
        amount: U256,
    ) -> RemoteResult<Simulation>;
}

/// Sends a prepared transfer to the network
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, descriptor: &TransferDescriptor) -> RemoteResult<TxHash>;
}

/// Looks up the receipt of a submitted transaction
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    async fn query_receipt(&self, tx_hash: TxHash) -> RemoteResult<ConfirmationResult>;
}

/// Reads a token balance, for display next to the amount field
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn query_balance(&self, token: Address, owner: Address) -> RemoteResult<U256>;
}

/// Everything the pipeline needs from the ledger
pub trait Ledger:
    DecimalsSource + TransferSimulator + Broadcaster + ReceiptSource + BalanceSource
{
}

impl<T> Ledger for T where
    T: DecimalsSource + TransferSimulator + Broadcaster + ReceiptSource + BalanceSource
{
}
