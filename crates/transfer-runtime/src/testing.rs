//! In-memory ledger for exercising the pipeline without a cluster

use crate::{
    associated_token_address,
    connection::{FreshnessToken, SignatureStatus, SolConnection},
    resolver::packed_token_account,
    Result, TransferError,
};
use async_trait::async_trait;
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    instruction::{CompiledInstruction, InstructionError},
    pubkey::Pubkey,
    signature::Signature,
    transaction::{Transaction, TransactionError},
};
use spl_token::{
    instruction::TokenInstruction,
    solana_program::program_pack::Pack,
    state::{Account as SplTokenAccount, AccountState},
};
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

const BLOCKHASH_VALIDITY: u64 = 150;
const TOKEN_ACCOUNT_LAMPORTS: u64 = 2_039_280;

/// Ledger operations a fault can be scripted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetAccount,
    GetLatestBlockhash,
    GetBlockHeight,
    SendTransaction,
    GetSignatureStatus,
}

#[derive(Default)]
struct State {
    accounts: HashMap<Pubkey, Account>,
    statuses: HashMap<Signature, std::result::Result<(), TransactionError>>,
    sent: Vec<Transaction>,
    faults: HashMap<Op, VecDeque<()>>,
    calls: HashMap<Op, usize>,
    block_height: u64,
    height_step: u64,
    dropped_sends: usize,
    lost_responses: usize,
    failing_sends: Vec<usize>,
    landed: usize,
}

/// Ledger fake with SPL token semantics for account creation and transfer.
///
/// Sent transactions execute atomically and are immediately visible at every
/// commitment.
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<State>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Create `owner`'s associated account for `mint` holding `amount`
    pub fn create_token_account(&self, owner: &Pubkey, mint: &Pubkey, amount: u64) -> Pubkey {
        let address = associated_token_address(owner, mint);
        let data = packed_token_account(mint, owner, amount, AccountState::Initialized);
        self.with_state(|s| s.accounts.insert(address, token_program_account(data)));
        address
    }

    /// Put an account owned by an unrelated program at `address`
    pub fn create_foreign_account(&self, address: &Pubkey) {
        self.with_state(|s| {
            s.accounts.insert(
                *address,
                Account {
                    lamports: 1,
                    data: vec![0; SplTokenAccount::LEN],
                    owner: Pubkey::new_unique(),
                    executable: false,
                    rent_epoch: 0,
                },
            )
        });
    }

    pub fn token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Option<u64> {
        let address = associated_token_address(owner, mint);
        self.with_state(|s| {
            s.accounts
                .get(&address)
                .and_then(|a| SplTokenAccount::unpack(&a.data).ok())
                .map(|a| a.amount)
        })
    }

    /// Fail the next `count` calls of `op` with a network error
    pub fn fail_next(&self, op: Op, count: usize) {
        self.with_state(|s| {
            s.faults
                .entry(op)
                .or_default()
                .extend(std::iter::repeat(()).take(count))
        });
    }

    /// Accept the next `count` sends without ever landing them
    pub fn drop_next_sends(&self, count: usize) {
        self.with_state(|s| s.dropped_sends += count);
    }

    /// Land the next `count` sends but answer each with a network error
    pub fn lose_next_send_responses(&self, count: usize) {
        self.with_state(|s| s.lost_responses += count);
    }

    /// Execute the `n`th landed transaction (zero-based) with an instruction error
    pub fn fail_execution_of(&self, n: usize) {
        self.with_state(|s| s.failing_sends.push(n));
    }

    /// Advance block height by `step` on every height query
    pub fn advance_height_by(&self, step: u64) {
        self.with_state(|s| s.height_step = step);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.with_state(|s| s.calls.get(&op).copied().unwrap_or(0))
    }

    pub fn sent(&self) -> Vec<Transaction> {
        self.with_state(|s| s.sent.clone())
    }

    fn enter(&self, op: Op) -> Result<()> {
        self.with_state(|s| {
            *s.calls.entry(op).or_default() += 1;
            match s.faults.get_mut(&op).and_then(VecDeque::pop_front) {
                Some(()) => Err(TransferError::Timeout {
                    operation: "fake ledger",
                    after: Duration::from_millis(1),
                }),
                None => Ok(()),
            }
        })
    }
}

fn token_program_account(data: Vec<u8>) -> Account {
    Account {
        lamports: TOKEN_ACCOUNT_LAMPORTS,
        data,
        owner: spl_token::id(),
        executable: false,
        rent_epoch: 0,
    }
}

fn execute(
    accounts: &mut HashMap<Pubkey, Account>,
    tx: &Transaction,
) -> std::result::Result<(), TransactionError> {
    let keys = &tx.message.account_keys;
    let mut working = accounts.clone();

    for (i, ix) in tx.message.instructions.iter().enumerate() {
        let index = i as u8;
        let program = keys[ix.program_id_index as usize];
        let key = |pos: usize| keys[ix.accounts[pos] as usize];

        if program == spl_associated_token_account::id() {
            let (address, owner, mint) = (key(1), key(2), key(3));
            if working.contains_key(&address) {
                return Err(TransactionError::InstructionError(
                    index,
                    InstructionError::AccountAlreadyInitialized,
                ));
            }
            let data = packed_token_account(&mint, &owner, 0, AccountState::Initialized);
            working.insert(address, token_program_account(data));
        } else if program == spl_token::id() {
            transfer(&mut working, ix, keys)
                .map_err(|e| TransactionError::InstructionError(index, e))?;
        } else {
            return Err(TransactionError::InstructionError(
                index,
                InstructionError::IncorrectProgramId,
            ));
        }
    }

    *accounts = working;
    Ok(())
}

fn transfer(
    accounts: &mut HashMap<Pubkey, Account>,
    ix: &CompiledInstruction,
    keys: &[Pubkey],
) -> std::result::Result<(), InstructionError> {
    let amount = match TokenInstruction::unpack(&ix.data) {
        Ok(TokenInstruction::Transfer { amount }) => amount,
        _ => return Err(InstructionError::InvalidInstructionData),
    };
    let (source, destination, authority) = (
        keys[ix.accounts[0] as usize],
        keys[ix.accounts[1] as usize],
        keys[ix.accounts[2] as usize],
    );

    let load = |accounts: &HashMap<Pubkey, Account>, address: &Pubkey| {
        accounts
            .get(address)
            .ok_or(InstructionError::UninitializedAccount)
            .and_then(|a| {
                SplTokenAccount::unpack(&a.data).map_err(|_| InstructionError::InvalidAccountData)
            })
    };
    let mut from = load(accounts, &source)?;
    let mut to = load(accounts, &destination)?;

    if from.owner != authority {
        return Err(InstructionError::Custom(4));
    }
    if from.mint != to.mint {
        return Err(InstructionError::Custom(3));
    }
    if from.amount < amount {
        return Err(InstructionError::Custom(1));
    }
    from.amount -= amount;
    to.amount += amount;

    for (address, state) in [(source, from), (destination, to)] {
        let account = accounts
            .get_mut(&address)
            .ok_or(InstructionError::UninitializedAccount)?;
        SplTokenAccount::pack(state, &mut account.data)
            .map_err(|_| InstructionError::InvalidAccountData)?;
    }
    Ok(())
}

#[async_trait]
impl SolConnection for FakeLedger {
    async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>> {
        self.enter(Op::GetAccount)?;
        Ok(self.with_state(|s| s.accounts.get(pubkey).cloned()))
    }

    async fn get_latest_blockhash(&self) -> Result<FreshnessToken> {
        self.enter(Op::GetLatestBlockhash)?;
        Ok(self.with_state(|s| FreshnessToken {
            blockhash: Hash::new_unique(),
            last_valid_block_height: s.block_height + BLOCKHASH_VALIDITY,
        }))
    }

    async fn get_block_height(&self) -> Result<u64> {
        self.enter(Op::GetBlockHeight)?;
        Ok(self.with_state(|s| {
            s.block_height += s.height_step;
            s.block_height
        }))
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature> {
        self.enter(Op::SendTransaction)?;
        if transaction.verify().is_err() {
            return Err(TransferError::Execution {
                signature: None,
                error: TransactionError::SignatureFailure,
            });
        }

        let signature = transaction.signatures[0];
        self.with_state(|s| {
            s.sent.push(transaction.clone());
            if s.statuses.contains_key(&signature) {
                return Err(TransferError::Execution {
                    signature: None,
                    error: TransactionError::AlreadyProcessed,
                });
            }
            if s.dropped_sends > 0 {
                s.dropped_sends -= 1;
                return Ok(signature);
            }

            let n = s.landed;
            s.landed += 1;
            let outcome = if s.failing_sends.contains(&n) {
                Err(TransactionError::InstructionError(0, InstructionError::Custom(1)))
            } else {
                execute(&mut s.accounts, transaction)
            };
            s.statuses.insert(signature, outcome);

            if s.lost_responses > 0 {
                s.lost_responses -= 1;
                return Err(TransferError::Timeout {
                    operation: "fake ledger",
                    after: Duration::from_millis(1),
                });
            }
            Ok(signature)
        })
    }

    async fn get_signature_status(
        &self,
        signature: &Signature,
        _commitment: CommitmentConfig,
    ) -> Result<SignatureStatus> {
        self.enter(Op::GetSignatureStatus)?;
        Ok(self.with_state(|s| s.statuses.get(signature).cloned()))
    }
}
