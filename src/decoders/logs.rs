// DANS : src/decoders/logs.rs
//
// Extraction HEURISTIQUE des transferts depuis les logs de programme.
// Ce n'est pas un format structuré : simple recherche de texte, imprécise
// par nature. Ne couvre que les formes de log ciblées ci-dessous.

use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static::lazy_static! {
    static ref AMOUNT_FIELD: Regex = Regex::new(r"amount: (\d+)").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvidence {
    pub log: String,
    pub amount: Option<u64>,
}

/// Garde toute ligne contenant "Transfer" ou un champ `amount: <n>`,
/// avec le montant parsé quand il est présent.
pub fn scan_transfer_logs(logs: &[String]) -> Vec<TransferEvidence> {
    logs.iter()
        .filter_map(|line| {
            let amount = AMOUNT_FIELD
                .captures(line)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok());
            if line.contains("Transfer") || amount.is_some() {
                Some(TransferEvidence { log: line.clone(), amount })
            } else {
                None
            }
        })
        .collect()
}
