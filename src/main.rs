//! Transfer Pipeline CLI - send one ERC-20 transfer and wait for its receipt
//!
//! Usage: `transfer-pipeline <token> <recipient> <amount>`
//!
//! The input is fed through the same debounced pipeline a UI would drive; the
//! outcome is printed as JSON.

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use transfer_pipeline::config::LoggingConfig;
use transfer_pipeline::tx::units::format_base_units;
use transfer_pipeline::{
    metrics, EthereumLedger, MetadataResolver, PipelineSnapshot, PipelineState, Settings,
    TransferPipeline, TransferRequest,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [token, recipient, amount] = args.as_slice() else {
        bail!("usage: transfer-pipeline <token> <recipient> <amount>");
    };

    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logging(&settings.logging);

    info!("Starting Transfer Pipeline v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Loaded configuration for chain {} ({})",
        settings.chain.name, settings.chain.chain_id
    );

    let wallet = EthereumLedger::wallet_from_env(&settings.wallet.private_key_env)
        .context("Failed to load signing key")?;
    let ledger = Arc::new(
        EthereumLedger::new(settings.chain.clone(), wallet)
            .context("Failed to connect to chain")?,
    );
    let resolver = Arc::new(MetadataResolver::new(ledger.clone()));
    let pipeline = TransferPipeline::spawn(ledger.clone(), resolver, &settings.pipeline);
    info!("Pipeline {} initialized", pipeline.id());

    pipeline.set_request(TransferRequest::new(
        token.as_str(),
        recipient.as_str(),
        amount.as_str(),
    ));

    let outcome = tokio::select! {
        outcome = drive(&pipeline) => outcome,
        _ = shutdown_signal() => {
            warn!("Shutdown signal received, abandoning transfer");
            None
        }
    };

    let snapshot = outcome.unwrap_or_else(|| pipeline.snapshot());

    match pipeline.balance_of(ledger.sender()).await {
        Ok(balance) => info!("Sender balance: {}", balance.formatted),
        Err(e) => warn!("Balance unavailable: {}", e),
    }

    println!("{}", serde_json::to_string_pretty(&summary(&snapshot))?);

    if settings.metrics.enabled {
        print!("{}", metrics::render());
    }

    let succeeded = snapshot.is_success();
    pipeline.shutdown().await;
    info!("Transfer Pipeline stopped");

    if !succeeded {
        bail!("transfer did not complete ({})", snapshot.state.name());
    }
    Ok(())
}

/// Wait for preparation, submit once, then wait for a terminal state
async fn drive(pipeline: &TransferPipeline) -> Option<PipelineSnapshot> {
    let prepared = pipeline
        .wait_for(|s| {
            s.is_ready() || (s.settled.is_some() && matches!(s.state, PipelineState::Idle))
        })
        .await?;

    if !prepared.is_ready() {
        match &prepared.last_error {
            Some(e) => error!("Preparation failed: {}", e),
            None => error!("Input incomplete; nothing to prepare"),
        }
        return Some(prepared);
    }

    pipeline.submit();

    pipeline
        .wait_for(|s| s.state.is_terminal() || (s.is_ready() && s.is_error()))
        .await
}

fn summary(snapshot: &PipelineSnapshot) -> serde_json::Value {
    let mut out = json!({
        "state": snapshot.state.name(),
        "token": snapshot.request.token,
        "recipient": snapshot.request.recipient,
        "amount": snapshot.request.amount,
    });

    if let Some(prepared) = snapshot.state.prepared() {
        out["amount_base_units"] = json!(prepared.amount.to_string());
        out["decimals"] = json!(prepared.token.decimals);
        out["gas_limit"] = json!(prepared.estimated_cost.gas_limit.to_string());
        out["max_cost_eth"] = json!(format_base_units(prepared.estimated_cost.total_cost, 18));
    }
    if let Some(pending) = snapshot.state.pending() {
        out["tx_hash"] = json!(format!("{:?}", pending.tx_hash));
        out["submitted_at"] = json!(pending.submitted_at.to_rfc3339());
    }
    if let PipelineState::Confirmed { result, .. } = &snapshot.state {
        out["block"] = json!(result.block);
    }
    if let Some(e) = &snapshot.last_error {
        out["error"] = json!({
            "category": e.category().as_str(),
            "message": e.to_string(),
            "retryable": e.is_retryable(),
        });
    }

    out
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,transfer_pipeline=debug,hyper=warn"));

    // Logs go to stderr so stdout carries only the JSON summary
    let (json_layer, text_layer) = if config.json {
        (Some(fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (
            None,
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
