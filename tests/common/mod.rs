//! Scriptable in-memory ledger shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ethers::types::{Address, TransactionRequest, TxHash, U256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use transfer_pipeline::chain::{
    parse_address, BalanceSource, Broadcaster, ConfirmationResult, DecimalsSource, ReceiptSource,
    Simulation, TransferDescriptor, TransferSimulator,
};
use transfer_pipeline::config::PipelineConfig;
use transfer_pipeline::error::{RemoteError, RemoteResult};
use transfer_pipeline::tx::gas::{GasEstimate, GasPrice};
use transfer_pipeline::{MetadataResolver, PipelineSnapshot, TransferPipeline};

pub const TOKEN: &str = "0xf5d5Ea0a5E86C543bEC01a9e4f513525365a86fD";
pub const RECIPIENT: &str = "0x47566C6c8f70E4F16Aa3E7D8eED4a2bDb3f4925b";
pub const OTHER_RECIPIENT: &str = "0x1111111111111111111111111111111111111111";

/// Hash every successful broadcast reports unless scripted otherwise
pub fn tx_hash_abc() -> TxHash {
    TxHash::from_low_u64_be(0xabc)
}

pub fn address(s: &str) -> Address {
    parse_address(s).expect("test address")
}

pub fn config() -> PipelineConfig {
    PipelineConfig {
        debounce_ms: 500,
        confirmation_poll_interval_ms: 1_000,
        confirmation_timeout_secs: 30,
        max_consecutive_poll_failures: 3,
    }
}

pub struct FakeLedger {
    pub decimals: u8,
    pub decimals_delay: Duration,
    pub simulate_delays: Mutex<HashMap<Address, Duration>>,
    pub simulate_error: Mutex<Option<RemoteError>>,
    pub broadcast_delay: Mutex<Duration>,
    /// Consumed front to back; empty means success with [`tx_hash_abc`]
    pub broadcast_results: Mutex<VecDeque<RemoteResult<TxHash>>>,
    /// Consumed front to back; empty means still pending
    pub receipts: Mutex<VecDeque<RemoteResult<ConfirmationResult>>>,
    pub balance: U256,

    pub decimals_calls: AtomicUsize,
    pub simulate_calls: Mutex<Vec<(Address, Address, U256)>>,
    pub broadcast_calls: AtomicUsize,
    pub receipt_calls: AtomicUsize,
}

impl FakeLedger {
    pub fn new(decimals: u8) -> Self {
        Self {
            decimals,
            decimals_delay: Duration::ZERO,
            simulate_delays: Mutex::new(HashMap::new()),
            simulate_error: Mutex::new(None),
            broadcast_delay: Mutex::new(Duration::ZERO),
            broadcast_results: Mutex::new(VecDeque::new()),
            receipts: Mutex::new(VecDeque::new()),
            balance: U256::zero(),
            decimals_calls: AtomicUsize::new(0),
            simulate_calls: Mutex::new(Vec::new()),
            broadcast_calls: AtomicUsize::new(0),
            receipt_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_decimals_delay(mut self, delay: Duration) -> Self {
        self.decimals_delay = delay;
        self
    }

    pub fn with_balance(mut self, balance: U256) -> Self {
        self.balance = balance;
        self
    }

    pub fn delay_simulation_for(&self, recipient: &str, delay: Duration) {
        self.simulate_delays
            .lock()
            .unwrap()
            .insert(address(recipient), delay);
    }

    pub fn fail_simulation(&self, error: RemoteError) {
        *self.simulate_error.lock().unwrap() = Some(error);
    }

    pub fn delay_broadcast(&self, delay: Duration) {
        *self.broadcast_delay.lock().unwrap() = delay;
    }

    pub fn script_broadcasts(&self, results: Vec<RemoteResult<TxHash>>) {
        self.broadcast_results.lock().unwrap().extend(results);
    }

    pub fn script_receipts(&self, results: Vec<RemoteResult<ConfirmationResult>>) {
        self.receipts.lock().unwrap().extend(results);
    }

    pub fn simulations(&self) -> Vec<(Address, Address, U256)> {
        self.simulate_calls.lock().unwrap().clone()
    }

    pub fn decimals_queries(&self) -> usize {
        self.decimals_calls.load(Ordering::SeqCst)
    }

    pub fn broadcasts(&self) -> usize {
        self.broadcast_calls.load(Ordering::SeqCst)
    }

    pub fn receipt_polls(&self) -> usize {
        self.receipt_calls.load(Ordering::SeqCst)
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl DecimalsSource for FakeLedger {
    async fn query_decimals(&self, _token: Address) -> RemoteResult<u8> {
        self.decimals_calls.fetch_add(1, Ordering::SeqCst);
        pause(self.decimals_delay).await;
        Ok(self.decimals)
    }
}

#[async_trait]
impl TransferSimulator for FakeLedger {
    async fn simulate_transfer(
        &self,
        token: Address,
        recipient: Address,
        amount: U256,
    ) -> RemoteResult<Simulation> {
        self.simulate_calls
            .lock()
            .unwrap()
            .push((token, recipient, amount));
        let delay = self
            .simulate_delays
            .lock()
            .unwrap()
            .get(&recipient)
            .copied()
            .unwrap_or_default();
        pause(delay).await;

        if let Some(error) = self.simulate_error.lock().unwrap().clone() {
            return Err(error);
        }

        Ok(Simulation {
            descriptor: TransferDescriptor::new(TransactionRequest::new().to(token).into()),
            estimated_cost: GasEstimate::new(
                U256::from(60_000),
                GasPrice::Legacy(U256::from(1_000_000_000u64)),
            ),
        })
    }
}

#[async_trait]
impl Broadcaster for FakeLedger {
    async fn broadcast(&self, _descriptor: &TransferDescriptor) -> RemoteResult<TxHash> {
        self.broadcast_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.broadcast_delay.lock().unwrap();
        pause(delay).await;

        self.broadcast_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(tx_hash_abc()))
    }
}

#[async_trait]
impl ReceiptSource for FakeLedger {
    async fn query_receipt(&self, _tx_hash: TxHash) -> RemoteResult<ConfirmationResult> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        self.receipts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ConfirmationResult::still_pending()))
    }
}

#[async_trait]
impl BalanceSource for FakeLedger {
    async fn query_balance(&self, _token: Address, _owner: Address) -> RemoteResult<U256> {
        Ok(self.balance)
    }
}

/// Pipeline over `ledger` with its own resolver
pub fn spawn_pipeline(ledger: &Arc<FakeLedger>) -> TransferPipeline {
    let resolver = Arc::new(MetadataResolver::new(ledger.clone()));
    TransferPipeline::spawn(ledger.clone(), resolver, &config())
}

/// Wait for `predicate`, failing the test instead of hanging
pub async fn wait_until(
    pipeline: &TransferPipeline,
    what: &str,
    predicate: impl FnMut(&PipelineSnapshot) -> bool,
) -> PipelineSnapshot {
    match tokio::time::timeout(Duration::from_secs(600), pipeline.wait_for(predicate)).await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => panic!("pipeline stopped while waiting for {}", what),
        Err(_) => panic!(
            "timed out waiting for {} (state: {})",
            what,
            pipeline.snapshot().state.name()
        ),
    }
}
