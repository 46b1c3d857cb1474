//! Associated token account lookup and decoding

use crate::{connection::SolConnection, Result, TokenAccountState, TransferError};
use solana_sdk::{account::Account, pubkey::Pubkey};
use spl_token::{
    solana_program::program_pack::Pack,
    state::{Account as SplTokenAccount, AccountState},
};
use std::sync::Arc;
use tracing::debug;

/// Associated token account of `owner` for `mint` under the SPL token program
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    spl_associated_token_account::get_associated_token_address(owner, mint)
}

/// Fetches and decodes `(owner, mint)` token accounts.
pub struct TokenAccountResolver<C> {
    connection: Arc<C>,
    token_program: Pubkey,
}

impl<C: SolConnection> TokenAccountResolver<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            connection,
            token_program: spl_token::id(),
        }
    }

    /// Resolve the owner's associated account for `mint`.
    ///
    /// `AccountNotFound` is the expected outcome for a recipient that has never
    /// held the mint; every other lookup error is fatal for that recipient.
    pub async fn resolve(&self, owner: &Pubkey, mint: &Pubkey) -> Result<TokenAccountState> {
        let address = associated_token_address(owner, mint);
        let account = self
            .connection
            .get_account(&address)
            .await?
            .ok_or(TransferError::AccountNotFound(address))?;

        let state = decode_token_account(&address, &account, &self.token_program)?;

        if state.mint != *mint || state.owner != *owner {
            return Err(TransferError::InvalidAccountData {
                address,
                reason: format!(
                    "holds mint {} for owner {}, expected mint {} for owner {}",
                    state.mint, state.owner, mint, owner
                ),
            });
        }
        if !state.is_initialized {
            return Err(TransferError::InvalidAccountData {
                address,
                reason: "account is not initialized".to_string(),
            });
        }
        if state.is_frozen {
            return Err(TransferError::AccountFrozen(address));
        }

        debug!("Resolved token account {} (amount {})", address, state.amount);
        Ok(state)
    }
}

/// Decode raw account data, requiring token program ownership and the exact
/// SPL account length. No partial decode is ever returned.
pub fn decode_token_account(
    address: &Pubkey,
    account: &Account,
    token_program: &Pubkey,
) -> Result<TokenAccountState> {
    if account.owner != *token_program {
        return Err(TransferError::InvalidAccountOwner {
            address: *address,
            owner: account.owner,
            expected: *token_program,
        });
    }
    if account.data.len() != SplTokenAccount::LEN {
        return Err(TransferError::InvalidAccountSize {
            address: *address,
            len: account.data.len(),
            expected: SplTokenAccount::LEN,
        });
    }

    let raw = SplTokenAccount::unpack_unchecked(&account.data).map_err(|e| {
        TransferError::InvalidAccountData {
            address: *address,
            reason: e.to_string(),
        }
    })?;

    let is_native: Option<u64> = raw.is_native.into();
    Ok(TokenAccountState {
        address: *address,
        mint: raw.mint,
        owner: raw.owner,
        amount: raw.amount,
        delegate: raw.delegate.into(),
        delegated_amount: raw.delegated_amount,
        is_initialized: raw.state != AccountState::Uninitialized,
        is_frozen: raw.state == AccountState::Frozen,
        is_native: is_native.is_some(),
        rent_exempt_reserve: is_native,
        close_authority: raw.close_authority.into(),
    })
}

#[cfg(test)]
pub(crate) fn packed_token_account(
    mint: &Pubkey,
    owner: &Pubkey,
    amount: u64,
    state: AccountState,
) -> Vec<u8> {
    let account = SplTokenAccount {
        mint: *mint,
        owner: *owner,
        amount,
        state,
        ..SplTokenAccount::default()
    };
    let mut data = vec![0u8; SplTokenAccount::LEN];
    SplTokenAccount::pack(account, &mut data).unwrap();
    data
}
