//! Exclusive signing capability

use crate::{Result, TransferError};
use async_trait::async_trait;
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    transaction::Transaction,
};

/// Entity that signs transactions for the fee payer / token authority.
///
/// Implementations may decline (e.g. an interactive wallet); that surfaces as
/// `TransferError::SigningRejected` and is never retried.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    /// Sign `transaction` in place against `blockhash`
    async fn sign_transaction(&self, transaction: &mut Transaction, blockhash: Hash) -> Result<()>;
}

/// Local keypair signer
pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Load from a base58-encoded 64-byte secret key
    pub fn from_base58(secret: &str) -> Result<Self> {
        let bytes = bs58::decode(secret.trim())
            .into_vec()
            .map_err(|e| {
                TransferError::InvalidConfiguration(format!("signer key is not base58: {e}"))
            })?;
        let keypair = Keypair::from_bytes(&bytes)
            .map_err(|e| TransferError::InvalidConfiguration(format!("invalid signer key: {e}")))?;
        Ok(Self::new(keypair))
    }
}

#[async_trait]
impl TransactionSigner for KeypairSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign_transaction(&self, transaction: &mut Transaction, blockhash: Hash) -> Result<()> {
        transaction
            .try_sign(&[&self.keypair], blockhash)
            .map_err(|e| TransferError::SigningRejected(e.to_string()))
    }
}
