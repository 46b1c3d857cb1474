//! Pipeline data model

use crate::core::{CommitmentTier, TransferError};
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::fmt;

/// One NFT to deliver: a mint and the wallet that should receive it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferRequest {
    pub mint: Pubkey,
    pub recipient: Pubkey,
}

impl TransferRequest {
    pub fn new(mint: Pubkey, recipient: Pubkey) -> Self {
        Self { mint, recipient }
    }

    /// Build a request from untrusted strings, validating both addresses
    pub fn parse(mint: &str, recipient: &str) -> crate::Result<Self> {
        Ok(Self {
            mint: crate::address::validate_address(mint)?,
            recipient: crate::address::validate_address(recipient)?,
        })
    }
}

/// Decoded SPL token account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAccountState {
    pub address: Pubkey,
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
    pub delegate: Option<Pubkey>,
    pub delegated_amount: u64,
    pub is_initialized: bool,
    pub is_frozen: bool,
    pub is_native: bool,
    pub rent_exempt_reserve: Option<u64>,
    pub close_authority: Option<Pubkey>,
}

/// Ordered slice of the request list submitted as one provisioning/transfer pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position in the plan
    pub index: usize,
    pub requests: Vec<TransferRequest>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Kind of transaction assembled for a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// Associated token account creation
    Provisioning,
    /// One-unit transfers
    Transfer,
    /// Provisioning and transfer in one transaction (single-request sends)
    Combined,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeKind::Provisioning => write!(f, "provisioning"),
            EnvelopeKind::Transfer => write!(f, "transfer"),
            EnvelopeKind::Combined => write!(f, "combined"),
        }
    }
}

/// Outcome of one confirmed network round trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub signature: Signature,
    pub confirmed: bool,
    pub error: Option<String>,
    pub commitment: CommitmentTier,
    /// Number of times the envelope was stamped and sent
    pub attempts: u32,
}

/// Stage of the per-chunk state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStage {
    Start,
    ResolveAndBuild,
    SubmitProvisioning,
    SubmitTransfer,
    ChunkDone,
}

impl fmt::Display for ChunkStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkStage::Start => write!(f, "start"),
            ChunkStage::ResolveAndBuild => write!(f, "resolve-and-build"),
            ChunkStage::SubmitProvisioning => write!(f, "submit-provisioning"),
            ChunkStage::SubmitTransfer => write!(f, "submit-transfer"),
            ChunkStage::ChunkDone => write!(f, "done"),
        }
    }
}

/// Results recorded for a chunk that got at least one transaction confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub index: usize,
    /// Number of transfer requests in the chunk
    pub size: usize,
    /// Number of accounts created by the provisioning transaction
    pub provisioned: usize,
    /// `None` when no account needed creating
    pub provisioning: Option<SubmissionResult>,
    /// `None` when the transfer stage did not complete
    pub transfer: Option<SubmissionResult>,
}

impl ChunkResult {
    pub fn is_complete(&self) -> bool {
        self.transfer.as_ref().is_some_and(|t| t.confirmed)
    }
}

/// Failure of one chunk
#[derive(Debug)]
pub struct ChunkFailure {
    pub index: usize,
    pub stage: ChunkStage,
    /// Recipient whose account lookup failed, when the failure is per-recipient
    pub recipient: Option<Pubkey>,
    pub error: TransferError,
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk {} failed at {}", self.index, self.stage)?;
        if let Some(recipient) = self.recipient {
            write!(f, " for recipient {recipient}")?;
        }
        write!(f, ": {}", self.error)
    }
}

/// Aggregated outcome of a batch run
#[derive(Debug, Default)]
pub struct BatchResult {
    /// One entry per chunk with confirmed on-chain effects, in plan order
    pub chunks: Vec<ChunkResult>,
    /// Failed chunks in plan order; at most one under the fail-fast policy
    pub failures: Vec<ChunkFailure>,
    /// Total number of chunks in the plan
    pub planned_chunks: usize,
    /// The run stopped between chunks on request
    pub cancelled: bool,
}

impl BatchResult {
    /// First failure, which ends the batch under the fail-fast policy
    pub fn terminal_error(&self) -> Option<&ChunkFailure> {
        self.failures.first()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
            && !self.cancelled
            && self.chunks.len() == self.planned_chunks
            && self.chunks.iter().all(ChunkResult::is_complete)
    }

    /// Number of NFTs whose transfer transaction confirmed
    pub fn transferred(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.is_complete())
            .map(|c| c.size)
            .sum()
    }

    /// Signature pairs of every chunk, in order
    pub fn signatures(&self) -> Vec<(Option<Signature>, Option<Signature>)> {
        self.chunks
            .iter()
            .map(|c| {
                (
                    c.provisioning.as_ref().map(|p| p.signature),
                    c.transfer.as_ref().map(|t| t.signature),
                )
            })
            .collect()
    }
}
