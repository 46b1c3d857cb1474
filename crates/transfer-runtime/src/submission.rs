//! Signing, sending and confirming envelopes

use crate::{
    assembler::TransactionEnvelope,
    connection::{FreshnessToken, SolConnection},
    retry::RetryPolicy,
    signer::TransactionSigner,
    CommitmentTier, Result, SubmissionResult, TransferError,
};
use solana_sdk::{
    commitment_config::CommitmentConfig, signature::Signature, transaction::TransactionError,
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

/// Timing of the confirmation wait
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationSettings {
    /// Upper bound on waiting for the requested commitment after a send
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(90),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Submits envelopes with a signer that is used by one request at a time.
///
/// Each attempt fetches a fresh blockhash, signs, sends, and waits for the
/// requested commitment. Network errors on individual round trips are retried
/// with the same signed transaction. A blockhash that expires before the
/// transaction was observed causes a re-sign with a new blockhash, counted
/// against the same retry budget. A resend rejected as already processed
/// means an earlier copy landed, and it is confirmed like a first send.
pub struct SigningSubmissionClient<C, S> {
    connection: Arc<C>,
    signer: Arc<S>,
    signing_lock: Mutex<()>,
    retry: RetryPolicy,
    confirmation: ConfirmationSettings,
}

impl<C: SolConnection, S: TransactionSigner> SigningSubmissionClient<C, S> {
    pub fn new(
        connection: Arc<C>,
        signer: Arc<S>,
        retry: RetryPolicy,
        confirmation: ConfirmationSettings,
    ) -> Self {
        Self {
            connection,
            signer,
            signing_lock: Mutex::new(()),
            retry,
            confirmation,
        }
    }

    /// Submit `envelope` and wait until it reaches `commitment`
    pub async fn submit(
        &self,
        envelope: &TransactionEnvelope,
        commitment: CommitmentTier,
    ) -> Result<SubmissionResult> {
        if envelope.is_empty() {
            return Err(TransferError::InvalidConfiguration(format!(
                "refusing to submit empty {} envelope",
                envelope.kind
            )));
        }
        if envelope.payer != self.signer.pubkey() {
            return Err(TransferError::InvalidConfiguration(format!(
                "envelope payer {} is not the signer {}",
                envelope.payer,
                self.signer.pubkey()
            )));
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.attempt(envelope, commitment).await {
                Ok(signature) => {
                    info!(
                        "{} transaction {} reached {} after {} attempt(s)",
                        envelope.kind, signature, commitment, attempts
                    );
                    return Ok(SubmissionResult {
                        signature,
                        confirmed: true,
                        error: None,
                        commitment,
                        attempts,
                    });
                }
                Err(TransferError::BlockhashExpired(signature))
                    if (attempts as usize) <= self.retry.max_retries() =>
                {
                    warn!(
                        "Blockhash expired before {} was observed; re-signing (attempt {})",
                        signature,
                        attempts + 1
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        envelope: &TransactionEnvelope,
        commitment: CommitmentTier,
    ) -> Result<Signature> {
        let token = self
            .retry
            .run("getLatestBlockhash", || self.connection.get_latest_blockhash())
            .await?;

        let mut transaction = envelope.unsigned_transaction();
        {
            let _guard = self.signing_lock.lock().await;
            self.signer
                .sign_transaction(&mut transaction, token.blockhash)
                .await?;
        }
        let expected = transaction.signatures[0];

        debug!(
            "Sending {} transaction {} ({} instructions, valid through height {})",
            envelope.kind,
            expected,
            envelope.len(),
            token.last_valid_block_height
        );
        let sent = self
            .retry
            .run("sendTransaction", || self.connection.send_transaction(&transaction))
            .await;
        match sent {
            Ok(_) => {}
            // An earlier send whose response was lost already landed
            Err(TransferError::Execution {
                error: TransactionError::AlreadyProcessed,
                ..
            }) => debug!("{} already processed, confirming", expected),
            Err(e) => return Err(with_signature(e, expected)),
        }

        self.confirm(expected, token, commitment).await?;
        Ok(expected)
    }

    /// Poll until `signature` reaches `commitment`, fails, expires, or the
    /// confirmation timeout elapses.
    async fn confirm(
        &self,
        signature: Signature,
        token: FreshnessToken,
        commitment: CommitmentTier,
    ) -> Result<()> {
        let deadline = Instant::now() + self.confirmation.timeout;

        loop {
            match self.status(&signature, commitment.as_config()).await? {
                Some(Ok(())) => return Ok(()),
                Some(Err(error)) => {
                    return Err(TransferError::Execution {
                        signature: Some(signature),
                        error,
                    })
                }
                None => {}
            }

            let height = self
                .retry
                .run("getBlockHeight", || self.connection.get_block_height())
                .await?;
            if height > token.last_valid_block_height {
                // Seen at any commitment means it landed; keep waiting for the tier.
                match self.status(&signature, CommitmentConfig::processed()).await? {
                    None => return Err(TransferError::BlockhashExpired(signature)),
                    Some(Err(error)) => {
                        return Err(TransferError::Execution {
                            signature: Some(signature),
                            error,
                        })
                    }
                    Some(Ok(())) => debug!("{} landed, waiting for {}", signature, commitment),
                }
            }

            if Instant::now() >= deadline {
                return Err(TransferError::ConfirmationTimeout(signature));
            }
            tokio::time::sleep(self.confirmation.poll_interval).await;
        }
    }

    async fn status(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<crate::connection::SignatureStatus> {
        self.retry
            .run("getSignatureStatuses", || {
                self.connection.get_signature_status(signature, commitment)
            })
            .await
    }
}

fn with_signature(error: TransferError, signature: Signature) -> TransferError {
    match error {
        TransferError::Execution {
            signature: None,
            error,
        } => TransferError::Execution {
            signature: Some(signature),
            error,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembler::TransactionEnvelope,
        core::RetryConfig,
        instructions::build_request_transfer,
        signer::KeypairSigner,
        testing::{FakeLedger, Op},
        EnvelopeKind, ErrorKind, TransferRequest,
    };
    use async_trait::async_trait;
    use solana_sdk::{
        hash::Hash,
        pubkey::Pubkey,
        signature::Keypair,
        signer::Signer,
        transaction::{Transaction, TransactionError},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        ledger: Arc<FakeLedger>,
        sender: Pubkey,
        request: TransferRequest,
        client: SigningSubmissionClient<FakeLedger, KeypairSigner>,
    }

    fn fast_retry(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 2,
        })
    }

    fn fast_confirmation(timeout: Duration) -> ConfirmationSettings {
        ConfirmationSettings {
            timeout,
            poll_interval: Duration::from_millis(1),
        }
    }

    fn fixture(max_retries: usize) -> Fixture {
        let ledger = Arc::new(FakeLedger::new());
        let keypair = Keypair::new();
        let sender = keypair.pubkey();
        let request = TransferRequest::new(Pubkey::new_unique(), Pubkey::new_unique());
        ledger.create_token_account(&sender, &request.mint, 1);
        ledger.create_token_account(&request.recipient, &request.mint, 0);

        let client = SigningSubmissionClient::new(
            ledger.clone(),
            Arc::new(KeypairSigner::new(keypair)),
            fast_retry(max_retries),
            fast_confirmation(Duration::from_secs(5)),
        );
        Fixture {
            ledger,
            sender,
            request,
            client,
        }
    }

    fn transfer_envelope(f: &Fixture) -> TransactionEnvelope {
        TransactionEnvelope::new(
            EnvelopeKind::Transfer,
            f.sender,
            vec![build_request_transfer(&f.sender, &f.request).unwrap()],
        )
    }

    #[tokio::test]
    async fn test_submit_confirms_transfer() {
        let f = fixture(3);
        let result = f
            .client
            .submit(&transfer_envelope(&f), CommitmentTier::Finalized)
            .await
            .unwrap();

        assert!(result.confirmed);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.commitment, CommitmentTier::Finalized);
        assert_eq!(f.ledger.token_balance(&f.request.recipient, &f.request.mint), Some(1));
        assert_eq!(f.ledger.token_balance(&f.sender, &f.request.mint), Some(0));
    }

    #[tokio::test]
    async fn test_network_errors_retried_with_same_signature() {
        let f = fixture(3);
        f.ledger.fail_next(Op::GetLatestBlockhash, 2);
        f.ledger.fail_next(Op::GetSignatureStatus, 1);

        let result = f
            .client
            .submit(&transfer_envelope(&f), CommitmentTier::Confirmed)
            .await
            .unwrap();

        assert_eq!(result.attempts, 1);
        assert_eq!(f.ledger.calls(Op::GetLatestBlockhash), 3);
        assert_eq!(f.ledger.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let f = fixture(1);
        f.ledger.fail_next(Op::SendTransaction, 5);

        let err = f
            .client
            .submit(&transfer_envelope(&f), CommitmentTier::Finalized)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(f.ledger.calls(Op::SendTransaction), 2);
        assert_eq!(f.ledger.token_balance(&f.request.recipient, &f.request.mint), Some(0));
    }

    #[tokio::test]
    async fn test_expired_blockhash_resigns_with_fresh_token() {
        let f = fixture(3);
        f.ledger.drop_next_sends(1);
        f.ledger.advance_height_by(200);

        let result = f
            .client
            .submit(&transfer_envelope(&f), CommitmentTier::Finalized)
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        let sent = f.ledger.sent();
        assert_eq!(sent.len(), 2);
        assert_ne!(sent[0].message.recent_blockhash, sent[1].message.recent_blockhash);
        assert_eq!(result.signature, sent[1].signatures[0]);
        assert_eq!(f.ledger.calls(Op::GetLatestBlockhash), 2);
    }

    #[tokio::test]
    async fn test_resend_after_lost_response_confirms_landed_transaction() {
        let f = fixture(3);
        f.ledger.lose_next_send_responses(1);

        let result = f
            .client
            .submit(&transfer_envelope(&f), CommitmentTier::Finalized)
            .await
            .unwrap();

        let sent = f.ledger.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].signatures[0], sent[1].signatures[0]);
        assert_eq!(result.signature, sent[0].signatures[0]);
        assert_eq!(result.attempts, 1);
        assert_eq!(f.ledger.token_balance(&f.request.recipient, &f.request.mint), Some(1));
        assert_eq!(f.ledger.token_balance(&f.sender, &f.request.mint), Some(0));
    }

    #[tokio::test]
    async fn test_unobserved_transaction_times_out() {
        let f = fixture(3);
        f.ledger.drop_next_sends(1);
        let envelope = transfer_envelope(&f);
        let Fixture { ledger, client, .. } = f;
        let client = SigningSubmissionClient {
            confirmation: fast_confirmation(Duration::from_millis(50)),
            ..client
        };

        let err = client
            .submit(&envelope, CommitmentTier::Finalized)
            .await
            .unwrap_err();

        // Outcome unknown: never resent
        assert!(matches!(err, TransferError::ConfirmationTimeout(_)));
        assert!(!err.is_retryable());
        assert_eq!(ledger.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_execution_failure_carries_signature() {
        let f = fixture(3);
        f.ledger.fail_execution_of(0);

        let err = f
            .client
            .submit(&transfer_envelope(&f), CommitmentTier::Finalized)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.signature(), Some(f.ledger.sent()[0].signatures[0]));
        assert!(matches!(
            err,
            TransferError::Execution {
                error: TransactionError::InstructionError(0, _),
                ..
            }
        ));
        assert_eq!(f.ledger.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_envelope_is_not_sent() {
        let f = fixture(3);
        let envelope = TransactionEnvelope::new(EnvelopeKind::Provisioning, f.sender, vec![]);

        assert!(f.client.submit(&envelope, CommitmentTier::Finalized).await.is_err());
        assert!(f.ledger.sent().is_empty());
    }

    struct RejectingSigner {
        pubkey: Pubkey,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TransactionSigner for RejectingSigner {
        fn pubkey(&self) -> Pubkey {
            self.pubkey
        }

        async fn sign_transaction(
            &self,
            _transaction: &mut Transaction,
            _blockhash: Hash,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TransferError::SigningRejected("declined by user".to_string()))
        }
    }

    #[tokio::test]
    async fn test_signing_rejection_is_not_retried() {
        let f = fixture(3);
        let signer = Arc::new(RejectingSigner {
            pubkey: f.sender,
            calls: AtomicUsize::new(0),
        });
        let client = SigningSubmissionClient::new(
            f.ledger.clone(),
            signer.clone(),
            fast_retry(3),
            fast_confirmation(Duration::from_secs(5)),
        );

        let err = client
            .submit(&transfer_envelope(&f), CommitmentTier::Finalized)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Signing);
        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);
        assert!(f.ledger.sent().is_empty());
    }
}
