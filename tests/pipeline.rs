mod common;

use common::*;
use ethers::types::U256;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use transfer_pipeline::chain::{ConfirmationResult, ConfirmationStatus};
use transfer_pipeline::error::{ConfirmationError, RemoteError};
use transfer_pipeline::{
    ErrorCategory, MetadataResolver, PipelineState, TransferPipeline, TransferRequest,
};

#[tokio::test(start_paused = true)]
async fn test_rapid_edits_prepare_only_final_value() {
    let ledger = Arc::new(FakeLedger::new(6));
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_token(TOKEN);
    pipeline.set_recipient(RECIPIENT);
    for amount in ["1", "10", "10.", "10.5"] {
        pipeline.set_amount(amount);
        sleep(Duration::from_millis(100)).await;
    }

    let ready = wait_until(&pipeline, "ready", |s| s.is_ready()).await;

    let simulations = ledger.simulations();
    assert_eq!(simulations.len(), 1);
    assert_eq!(simulations[0].2, U256::from(10_500_000u64));
    assert_eq!(ready.state.prepared().unwrap().amount, U256::from(10_500_000u64));
    assert_eq!(ledger.decimals_queries(), 1);
    assert_eq!(ready.settled.unwrap().amount, "10.5");
}

#[tokio::test(start_paused = true)]
async fn test_non_numeric_amount_never_simulates() {
    let ledger = Arc::new(FakeLedger::new(18));
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "abc"));
    let snapshot = wait_until(&pipeline, "error", |s| s.is_error()).await;

    assert_eq!(snapshot.state, PipelineState::Idle);
    assert_eq!(
        snapshot.last_error.unwrap().category(),
        ErrorCategory::InputValidation
    );
    assert!(ledger.simulations().is_empty());
    assert_eq!(ledger.decimals_queries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_prepare_result_is_discarded() {
    let ledger = Arc::new(FakeLedger::new(18));
    ledger.delay_simulation_for(RECIPIENT, Duration::from_secs(3));
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    wait_until(&pipeline, "first prepare", |s| s.is_preparing()).await;

    // Old simulation is still outstanding when the recipient changes
    pipeline.set_recipient(OTHER_RECIPIENT);
    let ready = wait_until(&pipeline, "ready", |s| s.is_ready()).await;
    assert_eq!(
        ready.state.prepared().unwrap().recipient,
        address(OTHER_RECIPIENT)
    );

    sleep(Duration::from_secs(5)).await;

    let after = pipeline.snapshot();
    assert_eq!(after.state, ready.state);
    assert_eq!(after.generation, ready.generation);
    assert_eq!(ledger.simulations().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stale_result_during_newer_prepare_is_discarded() {
    let ledger = Arc::new(FakeLedger::new(18));
    ledger.delay_simulation_for(RECIPIENT, Duration::from_secs(3));
    ledger.delay_simulation_for(OTHER_RECIPIENT, Duration::from_secs(4));
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    let first = wait_until(&pipeline, "first prepare", |s| s.is_preparing()).await;

    pipeline.set_recipient(OTHER_RECIPIENT);
    let second = wait_until(&pipeline, "second prepare", |s| {
        s.is_preparing() && s.generation > first.generation
    })
    .await;

    // First simulation lands here, second still has a second to go
    sleep(Duration::from_secs(3)).await;
    let during = pipeline.snapshot();
    assert_eq!(during.state, second.state);
    assert_eq!(during.generation, second.generation);
    assert!(!during.is_error());
    assert_eq!(ledger.simulations().len(), 2);

    let ready = wait_until(&pipeline, "ready", |s| s.is_ready()).await;
    assert_eq!(ready.generation, second.generation);
    assert_eq!(
        ready.state.prepared().unwrap().recipient,
        address(OTHER_RECIPIENT)
    );
}

#[tokio::test(start_paused = true)]
async fn test_pipelines_share_one_decimals_query() {
    let ledger = Arc::new(FakeLedger::new(18).with_decimals_delay(Duration::from_millis(200)));
    let resolver = Arc::new(MetadataResolver::new(ledger.clone()));
    let first = TransferPipeline::spawn(ledger.clone(), resolver.clone(), &config());
    let second = TransferPipeline::spawn(ledger.clone(), resolver.clone(), &config());

    first.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    second.set_request(TransferRequest::new(TOKEN.to_lowercase(), RECIPIENT, "2"));

    wait_until(&first, "first ready", |s| s.is_ready()).await;
    wait_until(&second, "second ready", |s| s.is_ready()).await;

    assert_eq!(ledger.decimals_queries(), 1);
    assert_eq!(resolver.cached_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_submit_is_ignored_outside_ready() {
    let ledger = Arc::new(FakeLedger::new(18));
    ledger.delay_simulation_for(RECIPIENT, Duration::from_secs(2));
    ledger.delay_broadcast(Duration::from_secs(2));
    let pipeline = spawn_pipeline(&ledger);

    // Idle
    pipeline.submit();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(pipeline.snapshot().state, PipelineState::Idle);

    // Preparing
    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    wait_until(&pipeline, "preparing", |s| s.is_preparing()).await;
    pipeline.submit();
    wait_until(&pipeline, "ready", |s| s.is_ready()).await;
    sleep(Duration::from_secs(1)).await;
    assert!(pipeline.snapshot().is_ready());
    assert_eq!(ledger.broadcasts(), 0);

    // Ready -> Submitting
    pipeline.submit();
    wait_until(&pipeline, "submitting", |s| s.is_submitting()).await;

    // Submitting
    pipeline.submit();
    wait_until(&pipeline, "pending", |s| s.is_confirming()).await;

    // Pending
    pipeline.submit();
    sleep(Duration::from_secs(3)).await;
    assert!(pipeline.snapshot().is_confirming());
    assert_eq!(ledger.broadcasts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transfer_reaches_confirmed() {
    let ledger = Arc::new(FakeLedger::new(18));
    ledger.script_receipts(vec![
        Ok(ConfirmationResult::still_pending()),
        Ok(ConfirmationResult::included(100)),
    ]);
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    let ready = wait_until(&pipeline, "ready", |s| s.is_ready()).await;
    assert_eq!(
        ready.state.prepared().unwrap().amount,
        U256::from_dec_str("1000000000000000000").unwrap()
    );

    pipeline.submit();
    let pending = wait_until(&pipeline, "pending", |s| s.is_confirming()).await;
    assert_eq!(pending.state.tx_hash(), Some(tx_hash_abc()));

    let done = wait_until(&pipeline, "confirmed", |s| s.state.is_terminal()).await;
    assert!(done.is_success());
    assert!(!done.is_error());
    match done.state {
        PipelineState::Confirmed { result, pending, .. } => {
            assert_eq!(result.status, ConfirmationStatus::Included);
            assert_eq!(result.block, Some(100));
            assert_eq!(pending.tx_hash, tx_hash_abc());
        }
        other => panic!("expected Confirmed, got {}", other.name()),
    }
    assert_eq!(ledger.receipt_polls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_simulation_revert_returns_to_idle() {
    let ledger = Arc::new(FakeLedger::new(18));
    ledger.fail_simulation(RemoteError::rejected(
        "execution reverted: ERC20: transfer amount exceeds balance",
    ));
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1000"));
    let failed = wait_until(&pipeline, "prepare error", |s| s.is_error()).await;

    assert_eq!(failed.state, PipelineState::Idle);
    let error = failed.last_error.unwrap();
    assert_eq!(error.category(), ErrorCategory::Simulation);
    assert!(error.to_string().contains("exceeds balance"));

    pipeline.submit();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(ledger.broadcasts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_submit_failure_allows_retry() {
    let ledger = Arc::new(FakeLedger::new(18));
    ledger.script_broadcasts(vec![Err(RemoteError::rejected("nonce too low"))]);
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    wait_until(&pipeline, "ready", |s| s.is_ready()).await;

    pipeline.submit();
    let rejected = wait_until(&pipeline, "submit error", |s| s.is_ready() && s.is_error()).await;
    assert_eq!(
        rejected.last_error.unwrap().category(),
        ErrorCategory::Submit
    );

    // Same input, no re-entry
    pipeline.submit();
    let pending = wait_until(&pipeline, "pending", |s| s.is_confirming()).await;
    assert!(!pending.is_error());
    assert_eq!(ledger.broadcasts(), 2);
    assert_eq!(ledger.simulations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_submit_failure_after_edit_prepares_latest_input() {
    let ledger = Arc::new(FakeLedger::new(18));
    ledger.delay_broadcast(Duration::from_secs(2));
    ledger.script_broadcasts(vec![Err(RemoteError::rejected("replacement underpriced"))]);
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    wait_until(&pipeline, "ready", |s| s.is_ready()).await;
    pipeline.submit();
    wait_until(&pipeline, "submitting", |s| s.is_submitting()).await;

    pipeline.set_amount("500");
    let rejected = wait_until(&pipeline, "submit error", |s| s.is_error()).await;
    assert_eq!(rejected.state, PipelineState::Idle);
    assert_eq!(
        rejected.last_error.unwrap().category(),
        ErrorCategory::Submit
    );

    let ready = wait_until(&pipeline, "ready with new amount", |s| s.is_ready()).await;
    let prepared = ready.state.prepared().unwrap();
    assert_eq!(prepared.request.amount, "500");
    assert_eq!(
        prepared.amount,
        U256::from_dec_str("500000000000000000000").unwrap()
    );
    assert_eq!(ledger.simulations().len(), 2);

    // The retry sends the replacement, never the rejected transfer
    pipeline.submit();
    let pending = wait_until(&pipeline, "pending", |s| s.is_confirming()).await;
    assert_eq!(pending.state.prepared().unwrap().request.amount, "500");
    assert_eq!(ledger.broadcasts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reverted_receipt_fails_until_next_edit() {
    let ledger = Arc::new(FakeLedger::new(18));
    ledger.script_receipts(vec![Ok(ConfirmationResult::reverted(55))]);
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    wait_until(&pipeline, "ready", |s| s.is_ready()).await;
    pipeline.submit();

    let failed = wait_until(&pipeline, "failed", |s| s.state.is_terminal()).await;
    match &failed.state {
        PipelineState::Failed { error, .. } => assert_eq!(
            *error,
            ConfirmationError::Reverted {
                tx_hash: tx_hash_abc(),
                block: Some(55),
            }
        ),
        other => panic!("expected Failed, got {}", other.name()),
    }
    assert_eq!(
        failed.last_error.unwrap().category(),
        ErrorCategory::Confirmation
    );

    // Terminal until the input changes
    pipeline.submit();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(ledger.broadcasts(), 1);

    pipeline.set_amount("2");
    let idle = wait_until(&pipeline, "idle", |s| s.state == PipelineState::Idle).await;
    assert!(!idle.is_error());
    wait_until(&pipeline, "ready again", |s| s.is_ready()).await;
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_times_out() {
    let ledger = Arc::new(FakeLedger::new(18));
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    wait_until(&pipeline, "ready", |s| s.is_ready()).await;
    pipeline.submit();

    let failed = wait_until(&pipeline, "timeout", |s| s.state.is_terminal()).await;
    assert!(matches!(
        failed.state,
        PipelineState::Failed {
            error: ConfirmationError::Timeout { waited_secs: 30, .. },
            ..
        }
    ));

    // Polling stops with the timeout
    let polls = ledger.receipt_polls();
    assert!(polls <= 31);
    sleep(Duration::from_secs(60)).await;
    assert_eq!(ledger.receipt_polls(), polls);
}

#[tokio::test(start_paused = true)]
async fn test_edit_while_pending_keeps_transaction() {
    let ledger = Arc::new(FakeLedger::new(18));
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    wait_until(&pipeline, "ready", |s| s.is_ready()).await;
    pipeline.submit();
    wait_until(&pipeline, "pending", |s| s.is_confirming()).await;

    pipeline.set_amount("5");
    sleep(Duration::from_secs(2)).await;

    let snapshot = pipeline.snapshot();
    assert!(snapshot.is_confirming());
    assert_eq!(snapshot.request.amount, "5");
    assert_eq!(snapshot.state.tx_hash(), Some(tx_hash_abc()));
    assert_eq!(ledger.simulations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_edit_while_pending_is_prepared_after_confirmation() {
    let ledger = Arc::new(FakeLedger::new(18));
    ledger.script_receipts(vec![
        Ok(ConfirmationResult::still_pending()),
        Ok(ConfirmationResult::included(100)),
    ]);
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    wait_until(&pipeline, "ready", |s| s.is_ready()).await;
    pipeline.submit();
    wait_until(&pipeline, "pending", |s| s.is_confirming()).await;

    pipeline.set_amount("5");
    let done = wait_until(&pipeline, "confirmed", |s| s.state.is_terminal()).await;
    assert!(done.is_success());
    assert_eq!(done.state.prepared().unwrap().request.amount, "1");

    let ready = wait_until(&pipeline, "ready with new amount", |s| s.is_ready()).await;
    assert_eq!(
        ready.state.prepared().unwrap().amount,
        U256::from_dec_str("5000000000000000000").unwrap()
    );
    assert_eq!(ledger.simulations().len(), 2);
    assert_eq!(ledger.broadcasts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_polling() {
    let ledger = Arc::new(FakeLedger::new(18));
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    wait_until(&pipeline, "ready", |s| s.is_ready()).await;
    pipeline.submit();
    wait_until(&pipeline, "pending", |s| s.is_confirming()).await;
    sleep(Duration::from_millis(2_500)).await;

    pipeline.shutdown().await;
    let polls = ledger.receipt_polls();
    assert!(polls >= 1);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(ledger.receipt_polls(), polls);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_cancels_pending_debounce() {
    let ledger = Arc::new(FakeLedger::new(18));
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    sleep(Duration::from_millis(100)).await;
    drop(pipeline);

    sleep(Duration::from_secs(5)).await;
    assert!(ledger.simulations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_balance_of_settled_token() {
    let ledger = Arc::new(FakeLedger::new(6).with_balance(U256::from(1_234_500u64)));
    let pipeline = spawn_pipeline(&ledger);

    pipeline.set_request(TransferRequest::new(TOKEN, RECIPIENT, "1"));
    wait_until(&pipeline, "ready", |s| s.is_ready()).await;

    let balance = pipeline.balance_of(address(RECIPIENT)).await.unwrap();
    assert_eq!(balance.raw, U256::from(1_234_500u64));
    assert_eq!(balance.decimals, 6);
    assert_eq!(balance.formatted, "1.2345");
}
