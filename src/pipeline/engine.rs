//! Transfer pipeline orchestration
//!
//! One actor task per pipeline owns every piece of mutable state. Input edits
//! and `submit()` arrive as commands; remote work runs in spawned tasks that
//! report back tagged with the generation they were started for, so a result
//! that no longer matches the current input is recognised and dropped.

use super::debounce::Debouncer;
use super::state::{PipelineSnapshot, PipelineState, TokenBalance};
use crate::chain::{
    BalanceSource, ConfirmationResult, ConfirmationStatus, ConfirmationTracker, Ledger, Tracking,
};
use crate::config::PipelineConfig;
use crate::error::{
    ConfirmationError, MetadataError, PipelineError, PrepareError, RemoteError, SubmitError,
};
use crate::metadata::MetadataResolver;
use crate::tx::units::format_base_units;
use crate::tx::{
    PendingTransaction, PreparedTransaction, TransactionPreparer, TransactionSubmitter,
    TransferRequest,
};

use chrono::Utc;
use ethers::types::Address;
use std::future::pending;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

enum Command {
    Edit(Edit),
    Submit,
    Shutdown,
}

enum Edit {
    Token(String),
    Recipient(String),
    Amount(String),
    Request(TransferRequest),
}

impl Edit {
    fn apply(self, request: &mut TransferRequest) {
        match self {
            Edit::Token(token) => request.token = token,
            Edit::Recipient(recipient) => request.recipient = recipient,
            Edit::Amount(amount) => request.amount = amount,
            Edit::Request(replacement) => *request = replacement,
        }
    }
}

/// Completion of remote work started by the actor
enum Event {
    Prepared {
        generation: u64,
        result: Result<PreparedTransaction, PrepareError>,
    },
    Submitted {
        generation: u64,
        result: Result<PendingTransaction, SubmitError>,
    },
}

/// Handle to a running transfer pipeline.
///
/// Dropping the handle stops the pipeline: pending debounce, in-flight remote
/// calls and confirmation polling are all cancelled.
pub struct TransferPipeline {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PipelineSnapshot>,
    resolver: Arc<MetadataResolver>,
    balances: Arc<dyn BalanceSource>,
    task: Option<JoinHandle<()>>,
}

impl TransferPipeline {
    /// Start a pipeline on the current tokio runtime
    pub fn spawn<L>(ledger: Arc<L>, resolver: Arc<MetadataResolver>, config: &PipelineConfig) -> Self
    where
        L: Ledger + 'static,
    {
        let id = Uuid::new_v4();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (publisher, state) = watch::channel(PipelineSnapshot::initial());

        let actor = PipelineActor {
            id,
            preparer: Arc::new(TransactionPreparer::new(ledger.clone())),
            submitter: Arc::new(TransactionSubmitter::new(ledger.clone())),
            tracker: ConfirmationTracker::new(ledger.clone(), config),
            resolver: resolver.clone(),
            debouncer: Debouncer::new(config.debounce()),
            snapshot: PipelineSnapshot::initial(),
            tracking: None,
            tasks: JoinSet::new(),
            events,
            publisher,
        };
        let task = tokio::spawn(actor.run(command_rx, event_rx));

        Self {
            id,
            commands,
            state,
            resolver,
            balances: ledger,
            task: Some(task),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn set_token(&self, token: impl Into<String>) {
        self.send(Command::Edit(Edit::Token(token.into())));
    }

    pub fn set_recipient(&self, recipient: impl Into<String>) {
        self.send(Command::Edit(Edit::Recipient(recipient.into())));
    }

    pub fn set_amount(&self, amount: impl Into<String>) {
        self.send(Command::Edit(Edit::Amount(amount.into())));
    }

    /// Replace all three fields as one edit
    pub fn set_request(&self, request: TransferRequest) {
        self.send(Command::Edit(Edit::Request(request)));
    }

    /// Broadcast the prepared transaction; ignored unless the pipeline is ready
    pub fn submit(&self) {
        self.send(Command::Submit);
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state transition
    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.state.clone()
    }

    /// Wait until a snapshot satisfies `predicate`; `None` if the pipeline stopped first
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&PipelineSnapshot) -> bool,
    ) -> Option<PipelineSnapshot> {
        let mut state = self.subscribe();
        let snapshot = state.wait_for(predicate).await.ok()?;
        Some(snapshot.clone())
    }

    /// Balance of `owner` in the token of the last settled input
    pub async fn balance_of(&self, owner: Address) -> Result<TokenBalance, MetadataError> {
        let token = self
            .snapshot()
            .settled
            .map(|request| request.token)
            .unwrap_or_default();
        let metadata = self.resolver.resolve(&token).await?;

        crate::metrics::record_remote_call("query_balance");
        let raw = self
            .balances
            .query_balance(metadata.address, owner)
            .await
            .map_err(|e| match e {
                RemoteError::Rejected { reason } => MetadataError::NotAToken {
                    address: metadata.address,
                    reason,
                },
                RemoteError::Transport { message } => MetadataError::Network {
                    address: metadata.address,
                    message,
                },
            })?;

        Ok(TokenBalance {
            raw,
            decimals: metadata.decimals,
            formatted: format_base_units(raw, metadata.decimals),
        })
    }

    /// Stop the pipeline and wait for its task to finish
    pub async fn shutdown(mut self) {
        self.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Pipeline {} task failed: {}", self.id, e);
            }
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Pipeline {} already stopped; command dropped", self.id);
        }
    }
}

impl Drop for TransferPipeline {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct PipelineActor {
    id: Uuid,
    preparer: Arc<TransactionPreparer>,
    submitter: Arc<TransactionSubmitter>,
    tracker: ConfirmationTracker,
    resolver: Arc<MetadataResolver>,
    debouncer: Debouncer<TransferRequest>,
    snapshot: PipelineSnapshot,
    tracking: Option<Tracking>,
    /// In-flight prepare and submit calls; aborted when the actor stops
    tasks: JoinSet<()>,
    events: mpsc::UnboundedSender<Event>,
    publisher: watch::Sender<PipelineSnapshot>,
}

impl PipelineActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        info!("Transfer pipeline {} started", self.id);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Edit(edit)) => self.on_edit(edit),
                    Some(Command::Submit) => self.on_submit(),
                    Some(Command::Shutdown) | None => break,
                },

                request = self.debouncer.settled() => self.on_settled(request),

                Some(event) = events.recv() => match event {
                    Event::Prepared { generation, result } => self.on_prepared(generation, result),
                    Event::Submitted { generation, result } => self.on_submitted(generation, result),
                },

                observation = next_observation(&mut self.tracking) => self.on_observation(observation),

                Some(joined) = self.tasks.join_next() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Pipeline {} worker panicked: {}", self.id, e);
                        }
                    }
                }
            }
        }

        if self.tracking.is_some() {
            info!("Pipeline {} stopped while tracking a transaction", self.id);
        }
        info!("Transfer pipeline {} stopped", self.id);
    }

    fn on_edit(&mut self, edit: Edit) {
        edit.apply(&mut self.snapshot.request);

        if self.snapshot.state.is_outstanding() {
            debug!(
                "Pipeline {}: input edited while {}; outstanding transaction kept",
                self.id,
                self.snapshot.state.name()
            );
            self.publish();
            return;
        }

        // Any prepare still in flight now reports a stale generation
        self.snapshot.generation += 1;
        self.snapshot.state = PipelineState::Idle;
        self.snapshot.last_error = None;
        self.tracking = None;
        self.debouncer.push(self.snapshot.request.clone());
        self.publish();
    }

    fn on_settled(&mut self, request: TransferRequest) {
        self.snapshot.settled = Some(request.clone());

        if !request.is_complete() {
            debug!("Pipeline {}: settled input incomplete", self.id);
            self.snapshot.state = PipelineState::Idle;
            self.publish();
            return;
        }

        self.snapshot.generation += 1;
        let generation = self.snapshot.generation;
        self.snapshot.state = PipelineState::Preparing { generation };
        self.publish();
        crate::metrics::record_prepare_started();

        debug!(
            "Pipeline {}: preparing generation {} ({} -> {})",
            self.id, generation, request.amount, request.recipient
        );

        let resolver = self.resolver.clone();
        let preparer = self.preparer.clone();
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let result = prepare_request(&resolver, &preparer, &request, generation).await;
            let _ = events.send(Event::Prepared { generation, result });
        });
    }

    fn on_prepared(&mut self, generation: u64, result: Result<PreparedTransaction, PrepareError>) {
        let current = matches!(
            self.snapshot.state,
            PipelineState::Preparing { generation: g } if g == generation
        );
        if !current || generation != self.snapshot.generation {
            debug!(
                "Pipeline {}: discarding stale prepare result for generation {} (current {})",
                self.id, generation, self.snapshot.generation
            );
            crate::metrics::record_prepare_stale();
            return;
        }

        match result {
            Ok(prepared) => {
                info!(
                    "Pipeline {}: transfer ready (generation {}, calldata 0x{})",
                    self.id,
                    generation,
                    prepared.descriptor.calldata_hex()
                );
                self.snapshot.state = PipelineState::Ready(prepared);
                self.snapshot.last_error = None;
            }
            Err(e) => {
                self.snapshot.state = PipelineState::Idle;
                self.surface(e.into());
            }
        }
        self.publish();
    }

    fn on_submit(&mut self) {
        let PipelineState::Ready(prepared) = &self.snapshot.state else {
            debug!(
                "Pipeline {}: submit ignored while {}",
                self.id,
                self.snapshot.state.name()
            );
            return;
        };

        let prepared = prepared.clone();
        let generation = prepared.generation;
        info!("Pipeline {}: submitting generation {}", self.id, generation);

        self.snapshot.state = PipelineState::Submitting(prepared.clone());
        self.snapshot.last_error = None;
        self.publish();

        let submitter = self.submitter.clone();
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let result = submitter.submit(&prepared).await;
            let _ = events.send(Event::Submitted { generation, result });
        });
    }

    fn on_submitted(&mut self, generation: u64, result: Result<PendingTransaction, SubmitError>) {
        let prepared = match &self.snapshot.state {
            PipelineState::Submitting(prepared) if prepared.generation == generation => {
                prepared.clone()
            }
            _ => {
                warn!(
                    "Pipeline {}: broadcast result for generation {} arrived while {}",
                    self.id,
                    generation,
                    self.snapshot.state.name()
                );
                return;
            }
        };

        match result {
            Ok(pending) => {
                info!(
                    "Pipeline {}: transaction {:?} pending confirmation",
                    self.id, pending.tx_hash
                );
                self.tracking = Some(self.tracker.track(pending.tx_hash));
                self.snapshot.state = PipelineState::Pending { prepared, pending };
            }
            Err(e) if prepared.request != self.snapshot.request => {
                // Input moved on while broadcasting; the old transaction is no longer wanted
                self.snapshot.state = PipelineState::Idle;
                self.surface(e.into());
                self.rearm();
            }
            Err(e) => {
                // Same prepared transaction stays available for another attempt
                self.snapshot.state = PipelineState::Ready(prepared);
                self.surface(e.into());
            }
        }
        self.publish();
    }

    fn on_observation(
        &mut self,
        observation: Option<Result<ConfirmationResult, ConfirmationError>>,
    ) {
        let (prepared, pending) = match &self.snapshot.state {
            PipelineState::Pending { prepared, pending } => (prepared.clone(), *pending),
            _ => {
                self.tracking = None;
                return;
            }
        };
        let prepared_request = prepared.request.clone();

        match observation {
            Some(Ok(result)) if result.status == ConfirmationStatus::StillPending => {
                debug!("Pipeline {}: {:?} still pending", self.id, pending.tx_hash);
                return;
            }
            Some(Ok(result)) if result.status == ConfirmationStatus::Included => {
                let latency = (Utc::now() - pending.submitted_at).num_milliseconds() as f64 / 1000.0;
                crate::metrics::record_tx_confirmed(latency.max(0.0));
                info!(
                    "Pipeline {}: transaction {:?} confirmed in block {:?}",
                    self.id, pending.tx_hash, result.block
                );
                self.snapshot.state = PipelineState::Confirmed {
                    prepared,
                    pending,
                    result,
                };
            }
            Some(Ok(result)) => {
                self.fail(
                    prepared,
                    pending,
                    ConfirmationError::Reverted {
                        tx_hash: pending.tx_hash,
                        block: result.block,
                    },
                );
            }
            Some(Err(error)) => self.fail(prepared, pending, error),
            None => {
                self.fail(
                    prepared,
                    pending,
                    ConfirmationError::Unavailable {
                        tx_hash: pending.tx_hash,
                        message: "confirmation tracking ended".to_string(),
                    },
                );
            }
        }

        self.tracking = None;
        if self.snapshot.request != prepared_request {
            self.rearm();
        }
        self.publish();
    }

    /// Schedule the current input for preparation after an outstanding
    /// transaction stops holding the pipeline
    fn rearm(&mut self) {
        debug!(
            "Pipeline {}: input edited while outstanding, preparing it next",
            self.id
        );
        self.snapshot.generation += 1;
        self.debouncer.push(self.snapshot.request.clone());
    }

    fn fail(
        &mut self,
        prepared: PreparedTransaction,
        pending: PendingTransaction,
        error: ConfirmationError,
    ) {
        crate::metrics::record_tx_failed();
        self.snapshot.state = PipelineState::Failed {
            prepared,
            pending,
            error: error.clone(),
        };
        self.surface(error.into());
    }

    fn surface(&mut self, error: PipelineError) {
        let category = error.category();
        warn!(
            "Pipeline {}: {} error: {}",
            self.id,
            category.as_str(),
            error
        );
        crate::metrics::record_error(category);
        self.snapshot.last_error = Some(error);
    }

    fn publish(&mut self) {
        self.snapshot.updated_at = Utc::now();
        self.publisher.send_replace(self.snapshot.clone());
    }
}

/// Cheap input checks first, then decimals, then the simulated transfer
async fn prepare_request(
    resolver: &MetadataResolver,
    preparer: &TransactionPreparer,
    request: &TransferRequest,
    generation: u64,
) -> Result<PreparedTransaction, PrepareError> {
    TransactionPreparer::validate(request)?;
    let token = resolver.resolve(&request.token).await?;
    preparer.prepare(request, token, generation).await
}

/// Next observation of the tracked transaction; never resolves without one
async fn next_observation(
    tracking: &mut Option<Tracking>,
) -> Option<Result<ConfirmationResult, ConfirmationError>> {
    match tracking {
        Some(tracking) => tracking.next().await,
        None => pending().await,
    }
}
