//! Ethers-backed ledger with multi-RPC support and automatic failover
//!
//! Implements every remote capability of the pipeline against a JSON-RPC node:
//! ERC-20 `decimals()`/`balanceOf()` reads, `transfer()` simulation and gas
//! pricing, local signing and raw broadcast, and receipt lookups.

use super::{
    BalanceSource, Broadcaster, ConfirmationResult, DecimalsSource, ReceiptSource, Simulation,
    TransferDescriptor, TransferSimulator,
};
use crate::config::{ChainConfig, GasPriceStrategy};
use crate::error::{RemoteError, RemoteResult};
use crate::tx::gas::{GasEstimate, GasEstimator, GasPrice};

use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockId, BlockNumber, Bytes, Eip1559TransactionRequest, TransactionRequest, TxHash,
    U256, U64,
};
use ethers::utils::id;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Multi-provider ledger client with automatic failover
pub struct EthereumLedger {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    /// Signs broadcasts; its address is the sender of every simulation
    wallet: LocalWallet,
    gas_estimator: GasEstimator,
}

impl EthereumLedger {
    /// Create a ledger client for one chain
    pub fn new(config: ChainConfig, wallet: LocalWallet) -> RemoteResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RemoteError::transport(format!(
                "no valid RPC providers for chain {}",
                config.chain_id
            )));
        }

        let wallet = wallet.with_chain_id(config.chain_id);
        let gas_estimator = GasEstimator::new(
            config.gas_limit_buffer_percent,
            config.gas_price_buffer_percent,
        );

        info!(
            "Ledger for chain {} ({}) ready with {} provider(s), sender {:?}",
            config.name,
            config.chain_id,
            http_providers.len(),
            wallet.address()
        );

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            wallet,
            gas_estimator,
        })
    }

    /// Load the signing key from the environment variable `var`
    pub fn wallet_from_env(var: &str) -> RemoteResult<LocalWallet> {
        let key = std::env::var(var).map_err(|_| {
            RemoteError::rejected(format!("no wallet configured: set {}", var))
        })?;
        key.trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| RemoteError::rejected(format!("invalid private key: {}", e)))
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Address every transfer is sent from
    pub fn sender(&self) -> Address {
        self.wallet.address()
    }

    /// Run `call` against each provider in turn until one answers.
    ///
    /// A JSON-RPC error response is an answer (the node refused) and is not
    /// retried on another provider.
    async fn with_failover<T, F, Fut>(&self, operation: &str, mut call: F) -> RemoteResult<T>
    where
        F: FnMut(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;

        for _ in 0..self.http_providers.len() {
            match call(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => match classify(e) {
                    rejected @ RemoteError::Rejected { .. } => return Err(rejected),
                    RemoteError::Transport { message } => {
                        warn!(
                            "{} failed on chain {}: {}",
                            operation, self.config.chain_id, message
                        );
                        last_error = Some(message);
                        self.failover();
                    }
                },
            }
        }

        Err(RemoteError::transport(format!(
            "{}: all providers failed (last error: {})",
            operation,
            last_error.unwrap_or_default()
        )))
    }

    /// `eth_call` with the wallet as sender
    async fn read(&self, operation: &str, to: Address, data: Bytes) -> RemoteResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.wallet.address())
            .to(to)
            .data(data)
            .into();

        self.with_failover(operation, |provider| {
            let tx = tx.clone();
            async move { provider.call(&tx, None).await }
        })
        .await
    }

    /// Get current gas price based on chain strategy
    async fn get_gas_price(&self) -> RemoteResult<GasPrice> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => {
                let price = self
                    .with_failover("gas price", |provider| async move {
                        provider.get_gas_price().await
                    })
                    .await?;
                Ok(GasPrice::Legacy(price))
            }
            GasPriceStrategy::Eip1559 => self.estimate_eip1559_fees().await,
        }
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(&self) -> RemoteResult<GasPrice> {
        let block = self
            .with_failover("latest block", |provider| async move {
                provider.get_block(BlockNumber::Latest).await
            })
            .await?
            .ok_or_else(|| RemoteError::transport("no latest block"))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| RemoteError::rejected("chain does not report a base fee"))?;

        // 2 gwei tip
        let priority_fee = U256::from(2_000_000_000u64);

        // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
        let max_fee = base_fee * 2 + priority_fee;

        // Cap at configured max
        let max_gwei = U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64);
        let max_fee = std::cmp::min(max_fee, max_gwei);

        Ok(GasPrice::Eip1559 {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: std::cmp::min(priority_fee, max_fee),
        })
    }

    /// Build the priced `transfer` transaction; the nonce is filled at broadcast
    fn build_transfer_tx(
        &self,
        token: Address,
        data: Bytes,
        gas_limit: U256,
        gas_price: &GasPrice,
    ) -> TypedTransaction {
        match gas_price {
            GasPrice::Legacy(price) => TransactionRequest::new()
                .from(self.wallet.address())
                .to(token)
                .data(data)
                .gas(gas_limit)
                .gas_price(*price)
                .chain_id(self.config.chain_id)
                .into(),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .from(self.wallet.address())
                .to(token)
                .data(data)
                .gas(gas_limit)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                .chain_id(self.config.chain_id)
                .into(),
        }
    }
}

#[async_trait]
impl DecimalsSource for EthereumLedger {
    async fn query_decimals(&self, token: Address) -> RemoteResult<u8> {
        let raw = self
            .read("decimals", token, call_data("decimals()", &[]))
            .await?;

        match decode_uint(&raw) {
            Some(decimals) if decimals <= U256::from(u8::MAX) => Ok(decimals.as_u32() as u8),
            Some(decimals) => Err(RemoteError::rejected(format!(
                "decimals() returned out-of-range value {}",
                decimals
            ))),
            None => Err(RemoteError::rejected(
                "decimals() returned no data; address is not an ERC-20 contract",
            )),
        }
    }
}

#[async_trait]
impl TransferSimulator for EthereumLedger {
    async fn simulate_transfer(
        &self,
        token: Address,
        recipient: Address,
        amount: U256,
    ) -> RemoteResult<Simulation> {
        let data = call_data(
            "transfer(address,uint256)",
            &[Token::Address(recipient), Token::Uint(amount)],
        );

        // Tokens that signal failure by returning false instead of reverting
        let returned = self.read("simulate transfer", token, data.clone()).await?;
        if !returned.is_empty() {
            match abi::decode(&[ParamType::Bool], &returned) {
                Ok(tokens) if tokens.first() == Some(&Token::Bool(false)) => {
                    return Err(RemoteError::rejected("transfer() returned false"));
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(RemoteError::rejected(format!(
                        "transfer() returned undecodable data: {}",
                        e
                    )))
                }
            }
        }

        let probe: TypedTransaction = TransactionRequest::new()
            .from(self.wallet.address())
            .to(token)
            .data(data.clone())
            .into();
        let estimated_gas = self
            .with_failover("estimate gas", |provider| {
                let probe = probe.clone();
                async move { provider.estimate_gas(&probe, None).await }
            })
            .await?;

        let gas_limit = self.gas_estimator.buffered_gas_limit(estimated_gas);
        let gas_price = self.gas_estimator.buffered_price(self.get_gas_price().await?);
        let tx = self.build_transfer_tx(token, data, gas_limit, &gas_price);

        Ok(Simulation {
            descriptor: TransferDescriptor::new(tx),
            estimated_cost: GasEstimate::new(gas_limit, gas_price),
        })
    }
}

#[async_trait]
impl Broadcaster for EthereumLedger {
    async fn broadcast(&self, descriptor: &TransferDescriptor) -> RemoteResult<TxHash> {
        let sender = self.wallet.address();
        let nonce = self
            .with_failover("nonce", |provider| async move {
                provider
                    .get_transaction_count(sender, Some(BlockId::Number(BlockNumber::Pending)))
                    .await
            })
            .await?;

        let mut tx = descriptor.transaction().clone();
        tx.set_nonce(nonce);

        let signature = self.wallet.sign_transaction(&tx).await.map_err(|e| {
            error!("Failed to sign transaction: {}", e);
            RemoteError::rejected(format!("signing failed: {}", e))
        })?;
        let raw = tx.rlp_signed(&signature);

        // A broadcast is sent to one provider only; failing over could double-send
        let send_timeout = Duration::from_secs(self.config.send_timeout_secs);
        match timeout(send_timeout, self.http().send_raw_transaction(raw)).await {
            Ok(Ok(pending)) => {
                let tx_hash = pending.tx_hash();
                info!("Transaction sent: {:?} with nonce {}", tx_hash, nonce);
                Ok(tx_hash)
            }
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => {
                warn!("Transaction send timeout after {:?}", send_timeout);
                Err(RemoteError::transport("send transaction timed out"))
            }
        }
    }
}

#[async_trait]
impl ReceiptSource for EthereumLedger {
    async fn query_receipt(&self, tx_hash: TxHash) -> RemoteResult<ConfirmationResult> {
        let receipt = self
            .with_failover("receipt", |provider| async move {
                provider.get_transaction_receipt(tx_hash).await
            })
            .await?;

        let Some(receipt) = receipt else {
            return Ok(ConfirmationResult::still_pending());
        };
        let Some(block) = receipt.block_number.map(|b| b.as_u64()) else {
            return Ok(ConfirmationResult::still_pending());
        };

        if receipt.status != Some(U64::from(1)) {
            return Ok(ConfirmationResult::reverted(block));
        }

        let required = self.config.confirmation_blocks.max(1);
        if required > 1 {
            let head = self
                .with_failover("block number", |provider| async move {
                    provider.get_block_number().await
                })
                .await?
                .as_u64();
            let confirmations = head.saturating_sub(block) + 1;
            if confirmations < required {
                debug!(
                    "Transaction {:?} has {} / {} confirmations on chain {}",
                    tx_hash, confirmations, required, self.config.chain_id
                );
                return Ok(ConfirmationResult::still_pending());
            }
        }

        Ok(ConfirmationResult::included(block))
    }
}

#[async_trait]
impl BalanceSource for EthereumLedger {
    async fn query_balance(&self, token: Address, owner: Address) -> RemoteResult<U256> {
        let raw = self
            .read(
                "balanceOf",
                token,
                call_data("balanceOf(address)", &[Token::Address(owner)]),
            )
            .await?;

        decode_uint(&raw)
            .ok_or_else(|| RemoteError::rejected("balanceOf() returned no data"))
    }
}

/// Selector of `signature` followed by the ABI-encoded arguments
fn call_data(signature: &str, args: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(args));
    data.into()
}

fn decode_uint(raw: &Bytes) -> Option<U256> {
    match abi::decode(&[ParamType::Uint(256)], raw).ok()?.first()? {
        Token::Uint(value) => Some(*value),
        _ => None,
    }
}

/// JSON-RPC error responses are the node refusing; anything else is transport
fn classify(err: ProviderError) -> RemoteError {
    match err.as_error_response() {
        Some(response) => RemoteError::rejected(response.message.clone()),
        None => RemoteError::transport(err.to_string()),
    }
}
