//! Account identifier validation

use crate::{Result, TransferError};
use solana_sdk::pubkey::{Pubkey, PUBKEY_BYTES};

/// Decode a base58 account identifier, requiring exactly 32 bytes.
pub fn validate_address(candidate: &str) -> Result<Pubkey> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return Err(invalid(candidate, "empty address".to_string()));
    }

    let bytes = bs58::decode(trimmed)
        .into_vec()
        .map_err(|e| invalid(candidate, format!("not base58: {e}")))?;

    let bytes: [u8; PUBKEY_BYTES] = bytes.try_into().map_err(|bytes: Vec<u8>| {
        invalid(
            candidate,
            format!("decodes to {} bytes, expected {PUBKEY_BYTES}", bytes.len()),
        )
    })?;

    Ok(Pubkey::new_from_array(bytes))
}

fn invalid(input: &str, reason: String) -> TransferError {
    TransferError::InvalidAddress {
        input: input.to_string(),
        reason,
    }
}
