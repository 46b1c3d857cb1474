//! Chunk planning under the transaction size budget

use crate::{
    instructions::{build_provision, build_request_transfer},
    Chunk, Result, TransferError, TransferRequest,
};
use solana_sdk::{
    instruction::Instruction, message::Message, packet::PACKET_DATA_SIZE, pubkey::Pubkey,
    transaction::Transaction,
};
use tracing::debug;

/// Split `requests` into consecutive chunks of `max_per_chunk`, the last one
/// possibly shorter. Order is preserved and every request lands in exactly one
/// chunk.
pub fn partition(requests: &[TransferRequest], max_per_chunk: usize) -> Result<Vec<Chunk>> {
    if max_per_chunk == 0 {
        return Err(TransferError::InvalidConfiguration(
            "max_per_chunk must be at least 1".to_string(),
        ));
    }

    Ok(requests
        .chunks(max_per_chunk)
        .enumerate()
        .map(|(index, slice)| Chunk {
            index,
            requests: slice.to_vec(),
        })
        .collect())
}

/// How many instructions of each kind fit in one transaction packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapacity {
    pub provisioning: usize,
    pub transfer: usize,
}

impl TransportCapacity {
    /// Largest chunk whose provisioning and transfer envelopes both fit
    pub fn max_per_chunk(&self) -> usize {
        self.provisioning.min(self.transfer)
    }

    /// Reject a configured chunk size the transport cannot carry
    pub fn check(&self, max_per_chunk: usize) -> Result<()> {
        let limit = self.max_per_chunk();
        if max_per_chunk > limit {
            return Err(TransferError::InvalidConfiguration(format!(
                "max_per_chunk {max_per_chunk} exceeds transport capacity of {limit} \
                 (provisioning {}, transfer {})",
                self.provisioning, self.transfer
            )));
        }
        Ok(())
    }
}

/// Measure the packet budget by serialising worst-case signed transactions:
/// every request has a distinct mint and recipient.
pub fn transport_capacity(payer: &Pubkey) -> TransportCapacity {
    let capacity = TransportCapacity {
        provisioning: max_fitting(payer, |requests| {
            requests
                .iter()
                .map(|r| build_provision(payer, &r.recipient, &r.mint))
                .collect()
        }),
        transfer: max_fitting(payer, |requests| {
            requests
                .iter()
                .filter_map(|r| build_request_transfer(payer, r).ok())
                .collect()
        }),
    };
    debug!("Transport capacity for payer {}: {:?}", payer, capacity);
    capacity
}

fn max_fitting<F>(payer: &Pubkey, build: F) -> usize
where
    F: Fn(&[TransferRequest]) -> Vec<Instruction>,
{
    let mut requests = Vec::new();
    loop {
        requests.push(synthetic_request(requests.len()));
        if !fits_in_packet(payer, &build(&requests)) {
            return requests.len() - 1;
        }
    }
}

fn synthetic_request(index: usize) -> TransferRequest {
    let tag = (index as u32).to_le_bytes();
    let mut mint = [0xA5u8; 32];
    let mut recipient = [0x5Au8; 32];
    mint[..4].copy_from_slice(&tag);
    recipient[..4].copy_from_slice(&tag);
    TransferRequest::new(Pubkey::new_from_array(mint), Pubkey::new_from_array(recipient))
}

/// Whether a transaction of `instructions` paid by `payer` fits one packet
pub fn fits_in_packet(payer: &Pubkey, instructions: &[Instruction]) -> bool {
    let tx = Transaction::new_unsigned(Message::new(instructions, Some(payer)));
    bincode::serialized_size(&tx).is_ok_and(|size| size <= PACKET_DATA_SIZE as u64)
}
