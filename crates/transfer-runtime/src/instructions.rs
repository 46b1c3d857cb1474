//! Instruction builders for account provisioning and NFT transfer

use crate::{resolver::associated_token_address, Result, TransferError, TransferRequest};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};

/// Amount moved per transfer; NFTs have supply 1 and zero decimals
pub const NFT_TRANSFER_AMOUNT: u64 = 1;

/// Create `owner`'s associated token account for `mint`, funded by `payer`
pub fn build_provision(payer: &Pubkey, owner: &Pubkey, mint: &Pubkey) -> Instruction {
    spl_associated_token_account::instruction::create_associated_token_account(
        payer,
        owner,
        mint,
        &spl_token::id(),
    )
}

/// Move `amount` units from `source` to `destination`, signed by `authority`
pub fn build_transfer(
    source: &Pubkey,
    destination: &Pubkey,
    authority: &Pubkey,
    amount: u64,
) -> Result<Instruction> {
    spl_token::instruction::transfer(&spl_token::id(), source, destination, authority, &[], amount)
        .map_err(|e| TransferError::InvalidConfiguration(format!("transfer instruction: {e}")))
}

/// Transfer of one request's NFT from `sender`'s associated account to the
/// recipient's associated account
pub fn build_request_transfer(sender: &Pubkey, request: &TransferRequest) -> Result<Instruction> {
    let source = associated_token_address(sender, &request.mint);
    let destination = associated_token_address(&request.recipient, &request.mint);
    build_transfer(&source, &destination, sender, NFT_TRANSFER_AMOUNT)
}
