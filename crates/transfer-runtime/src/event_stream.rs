//! Batch progress event streaming

use crate::{ChunkStage, CommitmentTier, EnvelopeKind};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error};

/// Progress events emitted while a batch runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchEvent {
    /// Requests were partitioned
    BatchPlanned {
        requests: usize,
        chunks: usize,
        max_per_chunk: usize,
    },

    /// A chunk entered a stage
    ChunkStage { index: usize, stage: ChunkStage },

    /// Recipient accounts of a chunk were resolved
    AccountsResolved {
        index: usize,
        existing: usize,
        to_provision: usize,
    },

    /// Every destination account existed; no provisioning transaction sent
    ProvisioningSkipped { index: usize },

    /// Transaction reached the requested commitment
    TransactionConfirmed {
        index: usize,
        kind: EnvelopeKind,
        signature: String,
        commitment: CommitmentTier,
        attempts: u32,
    },

    /// Chunk failed
    ChunkFailed {
        index: usize,
        stage: ChunkStage,
        error: String,
    },

    /// Run finished, stopped, or halted
    BatchFinished {
        transferred: usize,
        completed_chunks: usize,
        failed_chunks: usize,
        cancelled: bool,
    },
}

/// Broadcast channel for batch events. Events with no subscribers are dropped.
pub struct EventStream {
    sender: broadcast::Sender<BatchEvent>,
}

impl EventStream {
    /// Create a new event stream
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self { sender }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }

    /// Emit an event
    pub fn emit(&self, event: BatchEvent) {
        debug!("Emitting event: {:?}", event);

        if let Err(e) = self.sender.send(event) {
            debug!("No receivers for event: {:?}", e.0);
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive the next event, skipping over lag; `None` once the stream closes
pub async fn next_event(receiver: &mut broadcast::Receiver<BatchEvent>) -> Option<BatchEvent> {
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                error!("Event stream lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
