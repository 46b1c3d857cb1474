//! Core runtime types: configuration and error handling

use serde::{Deserialize, Serialize};
use solana_client::client_error::ClientError;
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    pubkey::Pubkey,
    signature::Signature,
    transaction::TransactionError,
};
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;

// ================================
// Configuration Types
// ================================

/// Confirmation tier awaited after a transaction is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentTier {
    Processed,
    Confirmed,
    #[default]
    Finalized,
}

impl CommitmentTier {
    pub fn as_config(self) -> CommitmentConfig {
        CommitmentConfig::from(self)
    }
}

impl From<CommitmentTier> for CommitmentConfig {
    fn from(tier: CommitmentTier) -> Self {
        let commitment = match tier {
            CommitmentTier::Processed => CommitmentLevel::Processed,
            CommitmentTier::Confirmed => CommitmentLevel::Confirmed,
            CommitmentTier::Finalized => CommitmentLevel::Finalized,
        };
        CommitmentConfig { commitment }
    }
}

impl fmt::Display for CommitmentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitmentTier::Processed => write!(f, "processed"),
            CommitmentTier::Confirmed => write!(f, "confirmed"),
            CommitmentTier::Finalized => write!(f, "finalized"),
        }
    }
}

impl FromStr for CommitmentTier {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(CommitmentTier::Processed),
            "confirmed" => Ok(CommitmentTier::Confirmed),
            "finalized" => Ok(CommitmentTier::Finalized),
            other => Err(TransferError::InvalidConfiguration(format!(
                "unknown commitment tier: {other}"
            ))),
        }
    }
}

/// What the orchestrator does after a chunk fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Halt the batch at the first failed chunk
    #[default]
    FailFast,
    /// Record the failure and move on to the next chunk
    ContinueOnError,
}

/// Retry configuration for network-class failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial retry delay in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum transfer requests per chunk; the transport capacity when unset
    #[serde(default)]
    pub max_per_chunk: Option<usize>,

    /// Commitment awaited for every submitted transaction
    #[serde(default)]
    pub commitment: CommitmentTier,

    /// Number of account lookups issued concurrently within a chunk
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,

    /// Timeout applied to each RPC round trip (seconds)
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    /// Timeout for a sent transaction to reach the requested commitment (seconds)
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,

    /// Interval between signature status polls (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Skip preflight simulation when sending
    #[serde(default)]
    pub skip_preflight: bool,

    /// Behaviour after a failed chunk
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_per_chunk: None,
            commitment: CommitmentTier::default(),
            max_concurrent_lookups: default_max_concurrent_lookups(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            skip_preflight: false,
            failure_policy: FailurePolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl TransferConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_per_chunk == Some(0) {
            return Err(TransferError::InvalidConfiguration(
                "max_per_chunk must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_lookups == 0 {
            return Err(TransferError::InvalidConfiguration(
                "max_concurrent_lookups must be at least 1".to_string(),
            ));
        }
        if self.rpc_timeout_secs == 0 || self.confirm_timeout_secs == 0 {
            return Err(TransferError::InvalidConfiguration(
                "timeouts must be non-zero".to_string(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(TransferError::InvalidConfiguration(
                "retry.initial_delay_ms exceeds retry.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

// Default values
fn default_max_retries() -> usize {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_max_concurrent_lookups() -> usize {
    8
}
fn default_rpc_timeout_secs() -> u64 {
    30
}
fn default_confirm_timeout_secs() -> u64 {
    90
}
fn default_poll_interval_ms() -> u64 {
    1_000
}

// ================================
// Error Types
// ================================

/// Coarse classification used by callers and the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    AccountLookup,
    Execution,
    Network,
    Signing,
    Configuration,
    Io,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Invalid address {input:?}: {reason}")]
    InvalidAddress { input: String, reason: String },

    #[error("Token account not found: {0}")]
    AccountNotFound(Pubkey),

    #[error("Token account {address} is owned by {owner}, expected {expected}")]
    InvalidAccountOwner {
        address: Pubkey,
        owner: Pubkey,
        expected: Pubkey,
    },

    #[error("Token account {address} has {len} bytes, expected {expected}")]
    InvalidAccountSize {
        address: Pubkey,
        len: usize,
        expected: usize,
    },

    #[error("Invalid token account data at {address}: {reason}")]
    InvalidAccountData { address: Pubkey, reason: String },

    #[error("Token account {0} is frozen")]
    AccountFrozen(Pubkey),

    #[error("RPC error: {0}")]
    Rpc(Box<ClientError>),

    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Blockhash expired before transaction {0} was observed")]
    BlockhashExpired(Signature),

    #[error("Transaction {0} was not confirmed in time; outcome unknown")]
    ConfirmationTimeout(Signature),

    #[error("Signer rejected transaction: {0}")]
    SigningRejected(String),

    #[error("Transaction execution failed{}: {error}", fmt_signature(.signature))]
    Execution {
        signature: Option<Signature>,
        error: TransactionError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Input error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_signature(signature: &Option<Signature>) -> String {
    signature
        .map(|s| format!(" ({s})"))
        .unwrap_or_default()
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::InvalidAddress { .. } => ErrorKind::Validation,
            TransferError::AccountNotFound(_)
            | TransferError::InvalidAccountOwner { .. }
            | TransferError::InvalidAccountSize { .. }
            | TransferError::InvalidAccountData { .. }
            | TransferError::AccountFrozen(_) => ErrorKind::AccountLookup,
            TransferError::Rpc(_)
            | TransferError::Timeout { .. }
            | TransferError::BlockhashExpired(_)
            | TransferError::ConfirmationTimeout(_) => ErrorKind::Network,
            TransferError::SigningRejected(_) => ErrorKind::Signing,
            TransferError::Execution { .. } => ErrorKind::Execution,
            TransferError::InvalidConfiguration(_) => ErrorKind::Configuration,
            TransferError::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the failure is transient and the operation may be attempted again.
    ///
    /// A confirmation timeout is network-class but not retryable: the transaction
    /// may still land, so sending a fresh copy could transfer twice.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Rpc(_)
                | TransferError::Timeout { .. }
                | TransferError::BlockhashExpired(_)
        )
    }

    /// The recoverable lookup outcome that means "provision this account"
    pub fn is_account_not_found(&self) -> bool {
        matches!(self, TransferError::AccountNotFound(_))
    }

    /// Signature of the transaction this error concerns, when one was sent
    pub fn signature(&self) -> Option<Signature> {
        match self {
            TransferError::BlockhashExpired(signature)
            | TransferError::ConfirmationTimeout(signature) => Some(*signature),
            TransferError::Execution { signature, .. } => *signature,
            _ => None,
        }
    }
}

impl From<ClientError> for TransferError {
    fn from(err: ClientError) -> Self {
        // Preflight simulation failures come back as RPC errors carrying the
        // transaction error; those are decided outcomes, not transport faults.
        match err.get_transaction_error() {
            Some(error) => Self::Execution {
                signature: None,
                error,
            },
            None => Self::Rpc(Box::new(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
