// DANS : src/decoders/transaction.rs

use super::{
    address,
    logs::{scan_transfer_logs, TransferEvidence},
    programs::{self, KnownProgram},
};
use crate::communication::{RawInstruction, RawTransaction, TransactionUpdate};
use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionClass {
    TokenTransfer,
    TokenTransferChecked,
    SolTransfer,
    Other,
    /// Données absentes : impossible de lire un opcode.
    Unknown,
}

impl InstructionClass {
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            InstructionClass::TokenTransfer
                | InstructionClass::TokenTransferChecked
                | InstructionClass::SolTransfer
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub program_id: String,
    pub program_name: String,
    pub opcode: Option<u8>,
    pub classification: InstructionClass,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InnerInstructionGroup {
    /// Index de l'instruction de premier niveau qui a déclenché ce groupe.
    pub index: u32,
    pub instructions: Vec<DecodedInstruction>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransaction {
    pub signature: String,
    pub slot: u64,
    pub success: bool,
    pub account_keys: Vec<String>,
    pub instructions: Vec<DecodedInstruction>,
    pub inner_instruction_groups: Vec<InnerInstructionGroup>,
    pub transfer_evidence: Vec<TransferEvidence>,
}

impl DecodedTransaction {
    /// Par convention, le signataire est le compte à l'index 0.
    pub fn signer(&self) -> Option<&str> {
        self.account_keys.first().map(String::as_str)
    }

    /// Nombre d'instructions (premier niveau et internes) classées comme transfert.
    pub fn transfer_instruction_count(&self) -> usize {
        let inner = self.inner_instruction_groups.iter().flat_map(|g| g.instructions.iter());
        self.instructions.iter()
            .chain(inner)
            .filter(|ix| ix.classification.is_transfer())
            .count()
    }
}

/// Décode une trame de transaction. Fonction pure, sans I/O.
pub fn decode(raw: &RawTransaction, slot: u64) -> RelayResult<DecodedTransaction> {
    let signature = address::decode_signature(&raw.signature)?;
    let pubkeys = resolve_account_keys(raw)?;
    let account_keys: Vec<String> = pubkeys.iter().map(Pubkey::to_string).collect();
    let keys = AccountKeys { pubkeys: &pubkeys, text: &account_keys };

    let instructions = match &raw.message {
        Some(message) => message.instructions.iter()
            .map(|ix| decode_instruction(ix, &keys))
            .collect::<RelayResult<Vec<_>>>()?,
        None => Vec::new(),
    };

    let (inner_instruction_groups, transfer_evidence, success) = match &raw.meta {
        Some(meta) => {
            let groups = meta.inner_instructions.iter()
                .map(|group| {
                    let instructions = group.instructions.iter()
                        .map(|ix| decode_instruction(ix, &keys))
                        .collect::<RelayResult<Vec<_>>>()?;
                    Ok(InnerInstructionGroup { index: group.index, instructions })
                })
                .collect::<RelayResult<Vec<_>>>()?;
            (groups, scan_transfer_logs(&meta.log_messages), !meta.failed)
        }
        None => (Vec::new(), Vec::new(), true),
    };

    Ok(DecodedTransaction {
        signature,
        slot,
        success,
        account_keys,
        instructions,
        inner_instruction_groups,
        transfer_evidence,
    })
}

pub fn decode_update(update: &TransactionUpdate) -> RelayResult<DecodedTransaction> {
    decode(&update.transaction, update.slot)
}

/// Clés statiques du message, puis (transactions v0) les adresses chargées
/// depuis les lookup tables : d'abord les writable, puis les readonly.
fn resolve_account_keys(raw: &RawTransaction) -> RelayResult<Vec<Pubkey>> {
    let static_keys = raw.message.iter().flat_map(|m| m.account_keys.iter());
    let loaded = raw.meta.iter().flat_map(|meta| {
        meta.loaded_writable_addresses.iter().chain(meta.loaded_readonly_addresses.iter())
    });
    static_keys
        .chain(loaded)
        .map(|key| address::decode_pubkey(key))
        .collect()
}

// Les clés sous les deux formes : `Pubkey` pour la table des programmes,
// texte pour la sortie.
struct AccountKeys<'a> {
    pubkeys: &'a [Pubkey],
    text: &'a [String],
}

fn decode_instruction(ix: &RawInstruction, keys: &AccountKeys<'_>) -> RelayResult<DecodedInstruction> {
    let index = ix.program_id_index as usize;
    let (Some(program), Some(program_id)) = (keys.pubkeys.get(index), keys.text.get(index)) else {
        return Err(RelayError::ProgramIndexOutOfRange {
            index: ix.program_id_index,
            len: keys.pubkeys.len(),
        });
    };

    let known = programs::lookup_pubkey(program);
    let (opcode, classification) = classify_instruction(known, &ix.data);

    Ok(DecodedInstruction {
        program_name: programs::display_name(known, program_id),
        program_id: program_id.clone(),
        opcode,
        classification,
    })
}

/// Classe une instruction selon son programme et le premier octet de ses données.
pub fn classify_instruction(program: Option<KnownProgram>, data: &[u8]) -> (Option<u8>, InstructionClass) {
    match program {
        Some(KnownProgram::TokenProgram) => match data.first().copied() {
            Some(programs::TOKEN_TRANSFER) => (Some(programs::TOKEN_TRANSFER), InstructionClass::TokenTransfer),
            Some(programs::TOKEN_TRANSFER_CHECKED) => {
                (Some(programs::TOKEN_TRANSFER_CHECKED), InstructionClass::TokenTransferChecked)
            }
            Some(op) => (Some(op), InstructionClass::Other),
            None => (None, InstructionClass::Unknown),
        },
        Some(KnownProgram::SystemProgram) => match data.first().copied() {
            Some(programs::SYSTEM_TRANSFER) => (Some(programs::SYSTEM_TRANSFER), InstructionClass::SolTransfer),
            Some(op) => (Some(op), InstructionClass::Other),
            None => (None, InstructionClass::Unknown),
        },
        _ => (None, InstructionClass::Other),
    }
}
