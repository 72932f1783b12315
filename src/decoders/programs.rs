// DANS : src/decoders/programs.rs

use solana_sdk::{pubkey::Pubkey, system_program};
use std::{collections::HashMap, str::FromStr};

// --- OPCODES DES DEUX PROGRAMMES DÉCODÉS EN PROFONDEUR ---
pub const TOKEN_TRANSFER: u8 = 3;
pub const TOKEN_TRANSFER_CHECKED: u8 = 12;
pub const SYSTEM_TRANSFER: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownProgram {
    Raydium,
    Orca,
    Jupiter,
    PumpFun,
    TokenProgram,
    SystemProgram,
}

impl KnownProgram {
    pub fn name(&self) -> &'static str {
        match self {
            KnownProgram::Raydium => "RAYDIUM",
            KnownProgram::Orca => "ORCA",
            KnownProgram::Jupiter => "JUPITER",
            KnownProgram::PumpFun => "PUMP_FUN",
            KnownProgram::TokenProgram => "TOKEN_PROGRAM",
            KnownProgram::SystemProgram => "SYSTEM_PROGRAM",
        }
    }
}

lazy_static::lazy_static! {
    static ref KNOWN_PROGRAMS: HashMap<Pubkey, KnownProgram> = {
        let mut m = HashMap::new();
        m.insert(Pubkey::from_str("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8").unwrap(), KnownProgram::Raydium);
        m.insert(Pubkey::from_str("9W959DqEETiGZocYWCQPaJ6sBmUzgfxXfqGeTEdp3aQP").unwrap(), KnownProgram::Orca);
        m.insert(Pubkey::from_str("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4").unwrap(), KnownProgram::Jupiter);
        m.insert(Pubkey::from_str("6EF8rrecthR5Dkzon8NQtpjxarYgv3RdKCZTmL81teb").unwrap(), KnownProgram::PumpFun);
        m.insert(spl_token::ID, KnownProgram::TokenProgram);
        m.insert(system_program::ID, KnownProgram::SystemProgram);
        m
    };
}

pub fn lookup_pubkey(pubkey: &Pubkey) -> Option<KnownProgram> {
    KNOWN_PROGRAMS.get(pubkey).copied()
}

/// Retrouve le programme connu derrière une adresse texte.
pub fn lookup(address: &str) -> Option<KnownProgram> {
    lookup_pubkey(&Pubkey::from_str(address).ok()?)
}

/// Nom lisible d'un programme. Une adresse inconnue est tronquée à ses
/// 8 premiers caractères suivis de "...".
pub fn classify(address: &str) -> String {
    display_name(lookup(address), address)
}

/// Comme `classify`, quand la recherche dans la table est déjà faite.
pub fn display_name(program: Option<KnownProgram>, address: &str) -> String {
    match program {
        Some(program) => program.name().to_string(),
        None => {
            let prefix: String = address.chars().take(8).collect();
            format!("{prefix}...")
        }
    }
}

/// Nom de l'instruction SPL Token pour un opcode (premier octet des données).
pub fn token_instruction_name(opcode: u8) -> Option<&'static str> {
    const NAMES: [&str; 25] = [
        "InitializeMint", "InitializeAccount", "InitializeMultisig", "Transfer",
        "Approve", "Revoke", "SetAuthority", "MintTo", "Burn", "CloseAccount",
        "FreezeAccount", "ThawAccount", "TransferChecked", "ApproveChecked",
        "MintToChecked", "BurnChecked", "InitializeAccount2", "SyncNative",
        "InitializeAccount3", "InitializeMultisig2", "InitializeMint2",
        "GetAccountDataSize", "InitializeImmutableOwner", "AmountToUiAmount",
        "UiAmountToAmount",
    ];
    NAMES.get(opcode as usize).copied()
}

/// Nom de l'instruction du System Program. Le tag est un u32 little-endian,
/// son premier octet suffit pour les 13 variantes.
pub fn system_instruction_name(opcode: u8) -> Option<&'static str> {
    const NAMES: [&str; 13] = [
        "CreateAccount", "Assign", "Transfer", "CreateAccountWithSeed",
        "AdvanceNonceAccount", "WithdrawNonceAccount", "InitializeNonceAccount",
        "AuthorizeNonceAccount", "Allocate", "AllocateWithSeed", "AssignWithSeed",
        "TransferWithSeed", "UpgradeNonceAccount",
    ];
    NAMES.get(opcode as usize).copied()
}
