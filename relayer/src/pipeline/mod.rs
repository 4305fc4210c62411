//! One pipeline per event stream. The engine owns the recovery pass, the
//! live subscription loop and the submission retry loop; stream-specific
//! knowledge (event decoding, destination call building) lives in a
//! `StreamHandler` implementation per stream.

mod burn;
mod governance;
mod lock;

pub use burn::BurnHandler;
pub use governance::GovernanceHandler;
pub use lock::LockHandler;

use std::{fmt, sync::Arc};

use bridge_common::{
    abi::AbiError,
    rpc::RpcError,
    types::RawEvent,
    H160, H256, U256,
};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::time::sleep;

use crate::{
    chain::{EventFilter, Ledger, RevertReason, SubmitError},
    config::{SUBMIT_ATTEMPTS, SUBMIT_RETRY_DELAY},
    confirmation::ConfirmationGate,
    storage::{RelayerStorage, StorageError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Locked,
    Burned,
    ProposalPassed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Locked => "Locked",
            EventKind::Burned => "Burned",
            EventKind::ProposalPassed => "ProposalPassed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Typed payload carried by a source event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Transfer { user: H160, amount: U256 },
    Governance { proposal_id: U256, data: Vec<u8> },
}

// An observed source event, immutable once decoded
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub stream_id: &'static str,
    pub kind: EventKind,
    pub nonce: u64,
    pub block_number: u64,
    pub tx_hash: H256,
    pub payload: EventPayload,
}

// A destination call ready for the retry loop
#[derive(Debug, Clone)]
pub struct Submission {
    pub to: H160,
    pub calldata: Vec<u8>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Submission {
    pub fn new(to: H160, calldata: Vec<u8>) -> Self {
        Self {
            to,
            calldata,
            attempts: 0,
            last_error: None,
        }
    }
}

// What a handler wants done with a decoded event
pub enum Dispatch {
    Submit(Submission),
    // not an error: the event is marked processed and never revisited
    Skip(String),
}

// Stream-specific knowledge injected into the engine
pub trait StreamHandler: Send + Sync {
    fn stream_id(&self) -> &'static str;
    fn kind(&self) -> EventKind;
    fn source_filter(&self) -> EventFilter;
    fn decode(&self, event: &RawEvent) -> Result<EventRecord, AbiError>;
    fn dispatch(&self, record: &EventRecord) -> Dispatch;
}

// Errors that must stop the process: without a working store the
// exactly-once guarantees cannot be maintained, and a dead source
// endpoint during the startup recovery pass is a startup failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("source ledger failure during recovery: {0}")]
    Recovery(#[from] RpcError),
}

// Terminal state of one `process` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    // destination transaction mined and marked
    Relayed,
    // dedup hit, replay-map hit, or handler skip: marked (or already was)
    AlreadyDone,
    // confirmation depth not met yet; will be seen again
    Deferred,
    // undecodable payload, dropped
    Undecodable,
    // all submission attempts failed; eligible again on the next recovery
    Abandoned,
    // relayer role missing on the destination; not marked, needs operator
    Blocked,
}

pub struct Pipeline {
    handler: Box<dyn StreamHandler>,
    source: Arc<dyn Ledger>,
    destination: Arc<dyn Ledger>,
    storage: Arc<RelayerStorage>,
    gate: ConfirmationGate,
}

impl Pipeline {
    pub fn new(
        handler: Box<dyn StreamHandler>,
        source: Arc<dyn Ledger>,
        destination: Arc<dyn Ledger>,
        storage: Arc<RelayerStorage>,
        gate: ConfirmationGate,
    ) -> Self {
        Self {
            handler,
            source,
            destination,
            storage,
            gate,
        }
    }

    pub fn stream_id(&self) -> &'static str {
        self.handler.stream_id()
    }

    // Historical backfill from the persisted cursor up to the head captured
    // at the start of the pass. Events still inside the confirmation window
    // are deferred; they stay reachable through the live scan window or the
    // next recovery. Events that exhausted their submission attempts hold
    // the cursor back so the next pass re-observes them.
    pub async fn recover(&self) -> Result<(), PipelineError> {
        let stream_id = self.stream_id();
        let cursor = self.storage.get_cursor(stream_id)?;
        let head = self.source.head_block().await?;
        if cursor >= head {
            debug!("[{}] recovery: cursor {} already at head {}", stream_id, cursor, head);
            return Ok(());
        }

        info!(
            "[{}] recovery: scanning blocks {}..={}",
            stream_id,
            cursor + 1,
            head
        );
        let filter = self.handler.source_filter();
        let events = self
            .source
            .query_events(&filter, cursor + 1, head)
            .await?;
        if !events.is_empty() {
            info!("[{}] recovery: {} events to replay", stream_id, events.len());
        }

        // An event that exhausted its attempts (or is blocked on a missing
        // role) must stay ahead of the cursor to be retried, so the pass
        // stops there; later events are rescanned next time and dedup makes
        // that safe.
        let mut held_back: Option<u64> = None;
        for event in &events {
            let outcome = self.process(event, head).await?;
            if matches!(outcome, ProcessOutcome::Abandoned | ProcessOutcome::Blocked) {
                held_back = Some(event.block_number);
                break;
            }
        }

        let target = match held_back {
            Some(block) => block.saturating_sub(1).min(head),
            None => head,
        };
        self.storage.set_cursor(stream_id, target)?;
        debug!("[{}] recovery: cursor advanced to {}", stream_id, target);
        Ok(())
    }

    // Subscribe to new events and drive each through the confirmation gate
    // in polling mode, then through the critical section. One event at a
    // time, end to end.
    pub async fn start_live(&self) -> Result<(), PipelineError> {
        let stream_id = self.stream_id();
        let filter = self.handler.source_filter();
        let mut events = self.source.subscribe(&filter).await;
        info!("[{}] live subscription started", stream_id);

        while let Some(event) = events.recv().await {
            let head = self.gate.wait(self.source.as_ref(), event.block_number).await;
            self.process(&event, head).await?;
        }
        debug!("[{}] live subscription closed", stream_id);
        Ok(())
    }

    // The critical section: decode, check confirmations against the head
    // the caller saw, dedup, then submit with bounded retries. Persistence
    // failures abort the relayer; everything else resolves to an outcome.
    pub async fn process(
        &self,
        event: &RawEvent,
        head_at_check: u64,
    ) -> Result<ProcessOutcome, PipelineError> {
        let stream_id = self.stream_id();

        let record = match self.handler.decode(event) {
            Ok(record) => record,
            Err(e) => {
                error!(
                    "[{}] undecodable event at block {} tx {:#x}: {}",
                    stream_id, event.block_number, event.tx_hash, e
                );
                return Ok(ProcessOutcome::Undecodable);
            }
        };

        if !self.gate.check(record.block_number, head_at_check) {
            debug!(
                "[{}] nonce {} at block {} not yet confirmed (head {}, depth {})",
                stream_id,
                record.nonce,
                record.block_number,
                head_at_check,
                self.gate.depth()
            );
            return Ok(ProcessOutcome::Deferred);
        }

        let kind = record.kind.as_str();
        if self.storage.is_processed(stream_id, record.nonce, kind)? {
            debug!("[{}] nonce {} already processed", stream_id, record.nonce);
            return Ok(ProcessOutcome::AlreadyDone);
        }

        let mut submission = match self.handler.dispatch(&record) {
            Dispatch::Submit(submission) => submission,
            Dispatch::Skip(reason) => {
                warn!("[{}] skipping nonce {}: {}", stream_id, record.nonce, reason);
                self.storage
                    .mark_processed(stream_id, record.nonce, kind, None)?;
                self.storage.set_cursor(stream_id, record.block_number)?;
                return Ok(ProcessOutcome::AlreadyDone);
            }
        };

        for attempt in 1..=SUBMIT_ATTEMPTS {
            submission.attempts = attempt;
            match self
                .destination
                .submit_tx(submission.to, submission.calldata.clone())
                .await
            {
                Ok(receipt) => {
                    // the mark is the acknowledgement; it must be durable
                    // before the cursor moves
                    self.storage
                        .mark_processed(stream_id, record.nonce, kind, Some(receipt.tx_hash))?;
                    self.storage.set_cursor(stream_id, record.block_number)?;
                    info!(
                        "[{}] nonce {} relayed to {} in tx {:#x}",
                        stream_id,
                        record.nonce,
                        self.destination.name(),
                        receipt.tx_hash
                    );
                    return Ok(ProcessOutcome::Relayed);
                }
                Err(SubmitError::Revert(RevertReason::NonceAlreadyProcessed)) => {
                    // destination replay map got there first (earlier run,
                    // or a crash between mining and marking)
                    info!(
                        "[{}] nonce {} already settled on {}, recording locally",
                        stream_id,
                        record.nonce,
                        self.destination.name()
                    );
                    self.storage
                        .mark_processed(stream_id, record.nonce, kind, None)?;
                    self.storage.set_cursor(stream_id, record.block_number)?;
                    return Ok(ProcessOutcome::AlreadyDone);
                }
                Err(SubmitError::Revert(RevertReason::ZeroAmount)) => {
                    error!(
                        "[{}] destination rejected nonce {}: zero amount; marking so it is never retried",
                        stream_id, record.nonce
                    );
                    self.storage
                        .mark_processed(stream_id, record.nonce, kind, None)?;
                    self.storage.set_cursor(stream_id, record.block_number)?;
                    return Ok(ProcessOutcome::AlreadyDone);
                }
                Err(SubmitError::Revert(RevertReason::AccessControl)) => {
                    error!(
                        "[{}] relayer lacks the required role on {}; nonce {} left unmarked, operator intervention required",
                        stream_id,
                        self.destination.name(),
                        record.nonce
                    );
                    return Ok(ProcessOutcome::Blocked);
                }
                Err(e) => {
                    warn!(
                        "[{}] submission attempt {}/{} for nonce {} failed: {}",
                        stream_id, attempt, SUBMIT_ATTEMPTS, record.nonce, e
                    );
                    submission.last_error = Some(e.to_string());
                    if attempt < SUBMIT_ATTEMPTS {
                        sleep(SUBMIT_RETRY_DELAY).await;
                    }
                }
            }
        }

        error!(
            "[{}] abandoning nonce {} after {} attempts; last error: {}",
            stream_id,
            record.nonce,
            SUBMIT_ATTEMPTS,
            submission.last_error.as_deref().unwrap_or("unknown")
        );
        Ok(ProcessOutcome::Abandoned)
    }
}
