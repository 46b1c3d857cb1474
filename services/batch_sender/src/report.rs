//! Run summaries and progress lines

use nft_transfer_runtime::{
    BatchEvent, BatchResult, ChunkResult, ChunkStage, DryRun, ParsedInput,
};
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Serialize)]
pub struct RejectedEntry {
    pub line: usize,
    pub content: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct FailureEntry {
    pub chunk: usize,
    pub stage: ChunkStage,
    pub recipient: Option<String>,
    pub error: String,
    pub signature: Option<String>,
}

/// Serializable outcome of a batch run
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub requested: usize,
    pub transferred: usize,
    pub planned_chunks: usize,
    pub cancelled: bool,
    pub success: bool,
    pub chunks: Vec<ChunkResult>,
    pub failures: Vec<FailureEntry>,
    pub rejected: Vec<RejectedEntry>,
}

impl BatchReport {
    pub fn new(input: &ParsedInput, result: &BatchResult) -> Self {
        Self {
            requested: input.requests.len(),
            transferred: result.transferred(),
            planned_chunks: result.planned_chunks,
            cancelled: result.cancelled,
            success: result.is_success() && input.rejected.is_empty(),
            chunks: result.chunks.clone(),
            failures: result
                .failures
                .iter()
                .map(|f| FailureEntry {
                    chunk: f.index,
                    stage: f.stage,
                    recipient: f.recipient.map(|r| r.to_string()),
                    error: f.error.to_string(),
                    signature: f.error.signature().map(|s| s.to_string()),
                })
                .collect(),
            rejected: input
                .rejected
                .iter()
                .map(|r| RejectedEntry {
                    line: r.line,
                    content: r.content.clone(),
                    error: r.error.to_string(),
                })
                .collect(),
        }
    }

    /// Human-readable summary
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Transferred {} of {} NFTs in {} of {} chunks",
            self.transferred,
            self.requested,
            self.chunks.iter().filter(|c| c.is_complete()).count(),
            self.planned_chunks
        );

        for chunk in &self.chunks {
            let provisioning = chunk
                .provisioning
                .as_ref()
                .map_or_else(|| "-".to_string(), |p| p.signature.to_string());
            let transfer = chunk
                .transfer
                .as_ref()
                .map_or_else(|| "-".to_string(), |t| t.signature.to_string());
            let _ = writeln!(
                out,
                "  chunk {}: {} transfers, {} accounts created, provisioning {}, transfer {}",
                chunk.index, chunk.size, chunk.provisioned, provisioning, transfer
            );
        }

        for failure in &self.failures {
            let _ = write!(out, "  FAILED chunk {} at {}", failure.chunk, failure.stage);
            if let Some(recipient) = &failure.recipient {
                let _ = write!(out, " (recipient {recipient})");
            }
            let _ = writeln!(out, ": {}", failure.error);
        }

        if !self.rejected.is_empty() {
            let _ = writeln!(out, "  {} input rows rejected:", self.rejected.len());
            for row in &self.rejected {
                let _ = writeln!(out, "    line {}: {}", row.line, row.error);
            }
        }

        if self.cancelled {
            let _ = writeln!(out, "  Run stopped before all chunks were processed");
        }
        out
    }
}

/// Human-readable plan of a dry run
pub fn render_dry_run(report: &DryRun) -> String {
    let mut out = String::new();
    let provisions: usize = report.chunks.iter().map(|c| c.provisioning.len()).sum();
    let transfers: usize = report.chunks.iter().map(|c| c.transfer.len()).sum();
    let _ = writeln!(
        out,
        "Dry run: {} chunks, {} accounts to create, {} transfers",
        report.chunks.len(),
        provisions,
        transfers
    );
    for chunk in &report.chunks {
        let _ = writeln!(
            out,
            "  chunk {}: {} existing, {} to create, {} transfers",
            chunk.index,
            chunk.existing,
            chunk.provisioning.len(),
            chunk.transfer.len()
        );
    }
    if let Some(failure) = &report.failure {
        let _ = writeln!(out, "  {failure}");
    }
    out
}

/// One-line description of a progress event; `None` for events not worth a line
pub fn describe_event(event: &BatchEvent) -> Option<String> {
    match event {
        BatchEvent::BatchPlanned {
            requests, chunks, ..
        } => Some(format!("{requests} transfers planned in {chunks} chunks")),
        BatchEvent::AccountsResolved {
            index,
            existing,
            to_provision,
        } => Some(format!(
            "chunk {index}: {existing} accounts exist, {to_provision} to create"
        )),
        BatchEvent::TransactionConfirmed {
            index,
            kind,
            signature,
            commitment,
            ..
        } => Some(format!("chunk {index}: {kind} {signature} {commitment}")),
        BatchEvent::ProvisioningSkipped { index } => {
            Some(format!("chunk {index}: all accounts exist, provisioning skipped"))
        }
        BatchEvent::ChunkFailed {
            index,
            stage,
            error,
        } => Some(format!("chunk {index} failed at {stage}: {error}")),
        BatchEvent::ChunkStage { .. } | BatchEvent::BatchFinished { .. } => None,
    }
}
