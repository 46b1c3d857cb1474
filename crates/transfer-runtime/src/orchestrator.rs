//! Sequential batch orchestration
//!
//! Chunks run strictly one after another. Within a chunk the stages are
//! `Start -> ResolveAndBuild -> SubmitProvisioning -> SubmitTransfer -> ChunkDone`;
//! provisioning is skipped when every destination account exists, and the
//! transfer envelope is only submitted after provisioning is confirmed.

use crate::{
    assembler::{AssembledChunk, TransactionAssembler, TransactionEnvelope},
    event_stream::{BatchEvent, EventStream},
    planner::{partition, transport_capacity, TransportCapacity},
    retry::RetryPolicy,
    submission::{ConfirmationSettings, SigningSubmissionClient},
    BatchResult, Chunk, ChunkFailure, ChunkResult, ChunkStage, FailurePolicy, Result, SolConnection,
    SubmissionResult, TransactionSigner, TransferConfig, TransferRequest,
};
use solana_sdk::pubkey::Pubkey;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, error, info, warn};

/// Resolved and built chunks of a run that submits nothing
#[derive(Debug, Default)]
pub struct DryRun {
    pub chunks: Vec<AssembledChunk>,
    /// First chunk that could not be assembled; later chunks are not examined
    pub failure: Option<ChunkFailure>,
}

/// Drives a batch of transfer requests through planning, assembly and submission
pub struct BatchOrchestrator<C, S> {
    config: TransferConfig,
    sender: Pubkey,
    capacity: TransportCapacity,
    max_per_chunk: usize,
    assembler: TransactionAssembler<C>,
    submitter: SigningSubmissionClient<C, S>,
    events: EventStream,
    stop_requested: Arc<AtomicBool>,
}

impl<C: SolConnection, S: TransactionSigner> BatchOrchestrator<C, S> {
    /// Create a new orchestrator. Fails when the configuration is invalid or
    /// the chunk size exceeds what one transaction can carry. An unset chunk
    /// size becomes the transport capacity.
    pub fn new(connection: Arc<C>, signer: Arc<S>, config: TransferConfig) -> Result<Self> {
        config.validate()?;

        let sender = signer.pubkey();
        let capacity = transport_capacity(&sender);
        let max_per_chunk = match config.max_per_chunk {
            Some(size) => {
                capacity.check(size)?;
                size
            }
            None => capacity.max_per_chunk(),
        };

        let retry = RetryPolicy::new(config.retry.clone());
        let assembler = TransactionAssembler::new(
            connection.clone(),
            sender,
            config.max_concurrent_lookups,
            retry.clone(),
        );
        let submitter = SigningSubmissionClient::new(
            connection,
            signer,
            retry,
            ConfirmationSettings {
                timeout: config.confirm_timeout(),
                poll_interval: config.poll_interval(),
            },
        );

        info!(
            "Orchestrator ready: sender {}, {} per chunk (capacity {}), commitment {}",
            sender,
            max_per_chunk,
            capacity.max_per_chunk(),
            config.commitment
        );

        Ok(Self {
            config,
            sender,
            capacity,
            max_per_chunk,
            assembler,
            submitter,
            events: EventStream::new(),
            stop_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Share an externally owned stop flag (e.g. set by a signal handler)
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_requested = flag;
        self
    }

    pub fn sender(&self) -> Pubkey {
        self.sender
    }

    pub fn capacity(&self) -> TransportCapacity {
        self.capacity
    }

    /// Chunk size in effect
    pub fn max_per_chunk(&self) -> usize {
        self.max_per_chunk
    }

    pub fn events(&self) -> &EventStream {
        &self.events
    }

    /// Request a stop. The chunk in flight finishes; no further chunk starts.
    pub fn stop(&self) {
        info!("Stop requested; finishing the current chunk");
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Partition `requests` under the configured chunk size
    pub fn plan(&self, requests: &[TransferRequest]) -> Result<Vec<Chunk>> {
        let chunks = partition(requests, self.max_per_chunk)?;
        info!(
            "Planned {} transfers into {} chunks of at most {}",
            requests.len(),
            chunks.len(),
            self.max_per_chunk
        );
        self.events.emit(BatchEvent::BatchPlanned {
            requests: requests.len(),
            chunks: chunks.len(),
            max_per_chunk: self.max_per_chunk,
        });
        Ok(chunks)
    }

    /// Resolve and build every chunk without signing or sending
    pub async fn dry_run(&self, requests: &[TransferRequest]) -> Result<DryRun> {
        let mut report = DryRun::default();

        for chunk in self.plan(requests)? {
            match self.assembler.assemble(&chunk).await {
                Ok(assembled) => {
                    info!(
                        "Chunk {}: would provision {} accounts and transfer {} NFTs",
                        chunk.index,
                        assembled.provisioning.len(),
                        assembled.transfer.len()
                    );
                    report.chunks.push(assembled);
                }
                Err(e) => {
                    let failure = ChunkFailure {
                        index: chunk.index,
                        stage: ChunkStage::ResolveAndBuild,
                        recipient: Some(e.recipient),
                        error: e.error,
                    };
                    error!("Dry run stopped: {}", failure);
                    report.failure = Some(failure);
                    break;
                }
            }
        }
        Ok(report)
    }

    /// Run the whole batch.
    ///
    /// Only planning errors are returned as `Err`; chunk failures are recorded
    /// in the result according to the failure policy.
    pub async fn run(&self, requests: &[TransferRequest]) -> Result<BatchResult> {
        let chunks = self.plan(requests)?;
        let mut result = BatchResult {
            planned_chunks: chunks.len(),
            ..BatchResult::default()
        };

        for chunk in &chunks {
            if self.is_stop_requested() {
                warn!(
                    "Stopping before chunk {} of {}",
                    chunk.index + 1,
                    result.planned_chunks
                );
                result.cancelled = true;
                break;
            }

            let ok = self.process_chunk(chunk, result.planned_chunks, &mut result).await;
            if !ok && self.config.failure_policy == FailurePolicy::FailFast {
                error!("Halting batch after chunk {} failed", chunk.index);
                break;
            }
        }

        info!(
            "Batch finished: {} of {} NFTs transferred, {} chunks completed, {} failed{}",
            result.transferred(),
            requests.len(),
            result.chunks.iter().filter(|c| c.is_complete()).count(),
            result.failures.len(),
            if result.cancelled { " (stopped)" } else { "" }
        );
        self.events.emit(BatchEvent::BatchFinished {
            transferred: result.transferred(),
            completed_chunks: result.chunks.iter().filter(|c| c.is_complete()).count(),
            failed_chunks: result.failures.len(),
            cancelled: result.cancelled,
        });

        Ok(result)
    }

    /// Send one NFT in a single transaction, creating the recipient's
    /// account in the same transaction when it is missing.
    pub async fn send_single(&self, request: &TransferRequest) -> Result<SubmissionResult> {
        info!("Sending {} to {}", request.mint, request.recipient);
        let envelope = self.assembler.assemble_single(request).await?;
        self.submitter.submit(&envelope, self.config.commitment).await
    }

    fn enter(&self, index: usize, stage: ChunkStage) {
        debug!("Chunk {} -> {}", index, stage);
        self.events.emit(BatchEvent::ChunkStage { index, stage });
    }

    fn record_failure(&self, result: &mut BatchResult, failure: ChunkFailure) -> bool {
        error!("{}", failure);
        self.events.emit(BatchEvent::ChunkFailed {
            index: failure.index,
            stage: failure.stage,
            error: failure.error.to_string(),
        });
        result.failures.push(failure);
        false
    }

    async fn submit(
        &self,
        index: usize,
        envelope: &TransactionEnvelope,
    ) -> Result<SubmissionResult> {
        let submission = self.submitter.submit(envelope, self.config.commitment).await?;
        self.events.emit(BatchEvent::TransactionConfirmed {
            index,
            kind: envelope.kind,
            signature: submission.signature.to_string(),
            commitment: submission.commitment,
            attempts: submission.attempts,
        });
        Ok(submission)
    }

    /// Drive one chunk to `ChunkDone`. Returns `false` when it failed.
    async fn process_chunk(&self, chunk: &Chunk, total: usize, result: &mut BatchResult) -> bool {
        let index = chunk.index;
        self.enter(index, ChunkStage::Start);
        info!("Processing chunk {}/{} ({} transfers)", index + 1, total, chunk.len());

        self.enter(index, ChunkStage::ResolveAndBuild);
        let assembled = match self.assembler.assemble(chunk).await {
            Ok(assembled) => assembled,
            Err(e) => {
                return self.record_failure(
                    result,
                    ChunkFailure {
                        index,
                        stage: ChunkStage::ResolveAndBuild,
                        recipient: Some(e.recipient),
                        error: e.error,
                    },
                )
            }
        };
        self.events.emit(BatchEvent::AccountsResolved {
            index,
            existing: assembled.existing,
            to_provision: assembled.new_accounts.len(),
        });

        let mut chunk_result = ChunkResult {
            index,
            size: chunk.len(),
            provisioned: 0,
            provisioning: None,
            transfer: None,
        };

        if assembled.needs_provisioning() {
            self.enter(index, ChunkStage::SubmitProvisioning);
            match self.submit(index, &assembled.provisioning).await {
                Ok(submission) => {
                    info!(
                        "Chunk {}: created {} token accounts ({})",
                        index,
                        assembled.new_accounts.len(),
                        submission.signature
                    );
                    chunk_result.provisioned = assembled.new_accounts.len();
                    chunk_result.provisioning = Some(submission);
                }
                Err(error) => {
                    return self.record_failure(
                        result,
                        ChunkFailure {
                            index,
                            stage: ChunkStage::SubmitProvisioning,
                            recipient: None,
                            error,
                        },
                    )
                }
            }
        } else {
            debug!("Chunk {}: all destination accounts exist", index);
            self.events.emit(BatchEvent::ProvisioningSkipped { index });
        }

        self.enter(index, ChunkStage::SubmitTransfer);
        match self.submit(index, &assembled.transfer).await {
            Ok(submission) => {
                info!(
                    "Chunk {}: transferred {} NFTs ({})",
                    index,
                    chunk.len(),
                    submission.signature
                );
                chunk_result.transfer = Some(submission);
            }
            Err(error) => {
                // Accounts created by a confirmed provisioning transaction stay created
                if chunk_result.provisioning.is_some() {
                    result.chunks.push(chunk_result);
                }
                return self.record_failure(
                    result,
                    ChunkFailure {
                        index,
                        stage: ChunkStage::SubmitTransfer,
                        recipient: None,
                        error,
                    },
                );
            }
        }

        self.enter(index, ChunkStage::ChunkDone);
        result.chunks.push(chunk_result);
        true
    }
}
