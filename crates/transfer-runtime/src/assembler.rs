//! Per-chunk transaction assembly
//!
//! Resolves every recipient's associated token account, then builds the
//! provisioning envelope (accounts that must be created) and the transfer
//! envelope (one-unit transfers in request order).

use crate::{
    instructions::{build_provision, build_request_transfer},
    resolver::TokenAccountResolver,
    retry::RetryPolicy,
    Chunk, EnvelopeKind, Result, SolConnection, TransferError, TransferRequest,
};
use futures::{stream, StreamExt};
use solana_sdk::{
    instruction::Instruction, message::Message, pubkey::Pubkey, transaction::Transaction,
};
use std::{collections::HashSet, fmt, sync::Arc};
use tracing::{debug, info};

/// Ordered instructions destined for one transaction, paid by `payer`.
///
/// Carries no freshness token; one is attached at signing time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEnvelope {
    pub kind: EnvelopeKind,
    pub payer: Pubkey,
    pub instructions: Vec<Instruction>,
}

impl TransactionEnvelope {
    pub fn new(kind: EnvelopeKind, payer: Pubkey, instructions: Vec<Instruction>) -> Self {
        Self {
            kind,
            payer,
            instructions,
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Unsigned transaction for this envelope; signing sets the blockhash
    pub fn unsigned_transaction(&self) -> Transaction {
        Transaction::new_unsigned(Message::new(&self.instructions, Some(&self.payer)))
    }
}

/// Both envelopes of a chunk
#[derive(Debug, Clone)]
pub struct AssembledChunk {
    pub index: usize,
    pub provisioning: TransactionEnvelope,
    pub transfer: TransactionEnvelope,
    /// Associated token accounts the provisioning envelope creates
    pub new_accounts: Vec<Pubkey>,
    /// Recipients whose account already existed
    pub existing: usize,
}

impl AssembledChunk {
    pub fn needs_provisioning(&self) -> bool {
        !self.provisioning.is_empty()
    }
}

/// Fatal lookup failure attributed to a recipient
#[derive(Debug)]
pub struct RecipientError {
    pub recipient: Pubkey,
    pub error: TransferError,
}

impl fmt::Display for RecipientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recipient {}: {}", self.recipient, self.error)
    }
}

/// Builds envelopes for chunks of transfer requests
pub struct TransactionAssembler<C> {
    resolver: TokenAccountResolver<C>,
    sender: Pubkey,
    max_concurrent_lookups: usize,
    retry: RetryPolicy,
}

impl<C: SolConnection> TransactionAssembler<C> {
    /// Create a new assembler; `sender` pays for provisioning and owns the NFTs
    pub fn new(
        connection: Arc<C>,
        sender: Pubkey,
        max_concurrent_lookups: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            resolver: TokenAccountResolver::new(connection),
            sender,
            max_concurrent_lookups: max_concurrent_lookups.max(1),
            retry,
        }
    }

    /// Look up `request`'s destination account. `Ok(false)` when it must be created.
    async fn destination_exists(&self, request: &TransferRequest) -> Result<bool> {
        let lookup = self
            .retry
            .run("getAccountInfo", || {
                self.resolver.resolve(&request.recipient, &request.mint)
            })
            .await;

        match lookup {
            Ok(_) => Ok(true),
            Err(e) if e.is_account_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Resolve all recipients of `chunk` and build its two envelopes.
    ///
    /// Lookups run concurrently up to the configured bound; results are
    /// consumed in request order so the first failing recipient is reported.
    pub async fn assemble(
        &self,
        chunk: &Chunk,
    ) -> std::result::Result<AssembledChunk, RecipientError> {
        let lookups: Vec<(TransferRequest, Result<bool>)> =
            stream::iter(chunk.requests.iter().copied())
                .map(|request| async move { (request, self.destination_exists(&request).await) })
                .buffered(self.max_concurrent_lookups)
                .collect()
                .await;

        let mut provisions = Vec::new();
        let mut transfers = Vec::with_capacity(chunk.len());
        let mut new_accounts = Vec::new();
        let mut scheduled = HashSet::new();
        let mut existing = 0;

        for (request, lookup) in lookups {
            let exists = lookup.map_err(|error| RecipientError {
                recipient: request.recipient,
                error,
            })?;

            if exists {
                existing += 1;
            } else {
                let ata = crate::associated_token_address(&request.recipient, &request.mint);
                if scheduled.insert(ata) {
                    provisions.push(build_provision(
                        &self.sender,
                        &request.recipient,
                        &request.mint,
                    ));
                    new_accounts.push(ata);
                }
            }

            let transfer = build_request_transfer(&self.sender, &request).map_err(|error| {
                RecipientError {
                    recipient: request.recipient,
                    error,
                }
            })?;
            transfers.push(transfer);
        }

        debug!(
            "Chunk {}: {} existing accounts, {} to provision",
            chunk.index,
            existing,
            new_accounts.len()
        );

        Ok(AssembledChunk {
            index: chunk.index,
            provisioning: TransactionEnvelope::new(
                EnvelopeKind::Provisioning,
                self.sender,
                provisions,
            ),
            transfer: TransactionEnvelope::new(EnvelopeKind::Transfer, self.sender, transfers),
            new_accounts,
            existing,
        })
    }

    /// Single transaction that provisions the recipient's account when
    /// missing and then transfers.
    pub async fn assemble_single(&self, request: &TransferRequest) -> Result<TransactionEnvelope> {
        let mut instructions = Vec::with_capacity(2);
        if !self.destination_exists(request).await? {
            info!(
                "Recipient {} has no account for mint {}; creating it in the same transaction",
                request.recipient, request.mint
            );
            instructions.push(build_provision(&self.sender, &request.recipient, &request.mint));
        }
        instructions.push(build_request_transfer(&self.sender, request)?);

        Ok(TransactionEnvelope::new(EnvelopeKind::Combined, self.sender, instructions))
    }
}
