// DANS : src/subscription.rs

use serde::{Deserialize, Serialize};

pub const TRANSACTION_FILTER_LABEL: &str = "token_txs";

/// Ce qu'un consommateur veut surveiller : le mint d'un token et son créateur.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenWatch {
    pub mint: String,
    pub creator: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountFilter {
    pub label: String,
    pub addresses: Vec<String>,
}

/// Filtre de transactions agrégé sur toutes les adresses surveillées.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFilter {
    pub label: String,
    pub vote: bool,
    pub failed: bool,
    pub account_include: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionSet {
    /// Dans l'ordre des labels : `token_0`, `token_1`, ...
    pub accounts: Vec<AccountFilter>,
    /// `None` tant qu'aucun token n'est surveillé.
    pub transactions: Option<TransactionFilter>,
}

impl SubscriptionSet {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn watched_addresses(&self) -> usize {
        self.accounts.iter().map(|f| f.addresses.len()).sum()
    }

    /// Construit l'ensemble de filtres pour une liste de tokens. Transformation pure.
    pub fn from_watches(watches: &[TokenWatch]) -> Self {
        let accounts: Vec<AccountFilter> = watches.iter()
            .enumerate()
            .map(|(index, watch)| AccountFilter {
                label: format!("token_{index}"),
                addresses: vec![watch.mint.clone(), watch.creator.clone()],
            })
            .collect();

        // Les doublons sont conservés tels quels.
        let account_include: Vec<String> = accounts.iter()
            .flat_map(|f| f.addresses.iter().cloned())
            .collect();

        Self {
            accounts,
            transactions: Some(TransactionFilter {
                label: TRANSACTION_FILTER_LABEL.to_string(),
                vote: false,
                failed: false,
                account_include,
            }),
        }
    }
}

/// L'unique détenteur de l'ensemble d'abonnements en vigueur.
/// Toute mutation passe par `replace`.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    current: SubscriptionSet,
    generation: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, watches: &[TokenWatch]) -> &SubscriptionSet {
        self.current = SubscriptionSet::from_watches(watches);
        self.generation += 1;
        &self.current
    }

    pub fn current(&self) -> &SubscriptionSet {
        &self.current
    }

    /// Nombre de remplacements effectués depuis le démarrage.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
