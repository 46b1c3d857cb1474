//! Network capability consumed by the pipeline

use crate::{Result, TransferError};
use async_trait::async_trait;
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_config::RpcSendTransactionConfig};
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{Transaction, TransactionError},
};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::debug;

/// Recent blockhash plus the last block height at which it is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessToken {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Status of a signature at a given commitment: `None` while unseen,
/// `Some(Err(_))` when the transaction executed and failed.
pub type SignatureStatus = Option<std::result::Result<(), TransactionError>>;

/// Remote ledger operations. Implementations are shared and never mutated.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SolConnection: Send + Sync {
    /// Fetch an account, `None` when it does not exist
    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>>;

    async fn get_latest_blockhash(&self) -> Result<FreshnessToken>;

    async fn get_block_height(&self) -> Result<u64>;

    /// Send a signed transaction, returning its signature
    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature>;

    async fn get_signature_status(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<SignatureStatus>;
}

/// `SolConnection` over the nonblocking JSON-RPC client
pub struct RpcConnection {
    rpc_client: Arc<RpcClient>,
    commitment: CommitmentConfig,
    timeout: Duration,
    skip_preflight: bool,
}

impl RpcConnection {
    /// Create a connection; `commitment` applies to reads and blockhash fetches
    pub fn new(rpc_url: String, commitment: CommitmentConfig, timeout: Duration) -> Self {
        let rpc_client = Arc::new(RpcClient::new_with_timeout_and_commitment(
            rpc_url, timeout, commitment,
        ));
        Self::with_client(rpc_client, commitment, timeout)
    }

    pub fn with_client(
        rpc_client: Arc<RpcClient>,
        commitment: CommitmentConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            rpc_client,
            commitment,
            timeout,
            skip_preflight: false,
        }
    }

    pub fn with_skip_preflight(mut self, skip_preflight: bool) -> Self {
        self.skip_preflight = skip_preflight;
        self
    }

    pub fn rpc_url(&self) -> String {
        self.rpc_client.url()
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        debug!("RPC {}", operation);
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| TransferError::Timeout {
                operation,
                after: self.timeout,
            })?
    }
}

#[async_trait]
impl SolConnection for RpcConnection {
    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>> {
        self.bounded("getAccountInfo", async {
            let response = self
                .rpc_client
                .get_account_with_commitment(pubkey, self.commitment)
                .await?;
            Ok(response.value)
        })
        .await
    }

    async fn get_latest_blockhash(&self) -> Result<FreshnessToken> {
        self.bounded("getLatestBlockhash", async {
            let (blockhash, last_valid_block_height) = self
                .rpc_client
                .get_latest_blockhash_with_commitment(self.commitment)
                .await?;
            Ok(FreshnessToken {
                blockhash,
                last_valid_block_height,
            })
        })
        .await
    }

    async fn get_block_height(&self) -> Result<u64> {
        self.bounded("getBlockHeight", async {
            Ok(self
                .rpc_client
                .get_block_height_with_commitment(self.commitment)
                .await?)
        })
        .await
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: self.skip_preflight,
            preflight_commitment: Some(self.commitment.commitment),
            // Resends are driven by the submission client
            max_retries: Some(0),
            ..RpcSendTransactionConfig::default()
        };
        self.bounded("sendTransaction", async {
            Ok(self
                .rpc_client
                .send_transaction_with_config(transaction, config)
                .await?)
        })
        .await
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<SignatureStatus> {
        self.bounded("getSignatureStatuses", async {
            Ok(self
                .rpc_client
                .get_signature_status_with_commitment(signature, commitment)
                .await?)
        })
        .await
    }
}
