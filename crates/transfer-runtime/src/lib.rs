//! NFT Transfer Runtime
//!
//! Off-chain pipeline that distributes pre-minted NFTs to many recipients.
//! Requests are split into chunks sized to fit one transaction; each chunk
//! creates missing associated token accounts, then moves one unit per request.

pub mod address;
pub mod assembler;
pub mod connection;
pub mod core;
pub mod event_stream;
pub mod input;
pub mod instructions;
pub mod orchestrator;
pub mod planner;
pub mod resolver;
pub mod retry;
pub mod signer;
pub mod submission;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// ================================
// Re-exports
// ================================

pub use address::validate_address;
pub use assembler::{AssembledChunk, RecipientError, TransactionAssembler, TransactionEnvelope};
pub use connection::{FreshnessToken, RpcConnection, SolConnection};
pub use crate::core::{
    CommitmentTier, ErrorKind, FailurePolicy, Result, RetryConfig, TransferConfig, TransferError,
};
pub use event_stream::{BatchEvent, EventStream};
pub use input::{parse_requests, read_requests, ParsedInput, RejectedRow};
pub use orchestrator::{BatchOrchestrator, DryRun};
pub use planner::{partition, transport_capacity, TransportCapacity};
pub use resolver::{associated_token_address, TokenAccountResolver};
pub use retry::RetryPolicy;
pub use signer::{KeypairSigner, TransactionSigner};
pub use submission::{ConfirmationSettings, SigningSubmissionClient};
pub use types::{
    BatchResult, Chunk, ChunkFailure, ChunkResult, ChunkStage, EnvelopeKind, SubmissionResult,
    TokenAccountState, TransferRequest,
};

// Re-export commonly used Solana types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
