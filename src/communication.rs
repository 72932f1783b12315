// DANS : src/communication.rs

use crate::decoders::transaction::DecodedTransaction;
use crate::error::{RelayError, RelayResult};
use crate::subscription::TokenWatch;
use serde::{Deserialize, Serialize};
use yellowstone_grpc_proto::prelude::{self as ysp, subscribe_update::UpdateOneof};

// --- PROTOCOLE AVAL : CONSOMMATEUR -> RELAIS ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Subscribe(Vec<TokenWatch>),
    /// Un `type` inconnu : journalisé puis ignoré.
    Unknown(String),
}

#[derive(Deserialize)]
struct SubscribePayload {
    tokens: Vec<TokenWatch>,
}

/// Parse un message texte d'un consommateur.
pub fn parse_client_message(text: &str) -> RelayResult<ClientMessage> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| RelayError::MalformedDownstreamMessage(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| RelayError::MalformedDownstreamMessage("champ `type` manquant".into()))?
        .to_string();

    if kind != "subscribe" {
        return Ok(ClientMessage::Unknown(kind));
    }
    let payload: SubscribePayload = serde_json::from_value(value)
        .map_err(|e| RelayError::MalformedDownstreamMessage(e.to_string()))?;
    Ok(ClientMessage::Subscribe(payload.tokens))
}

/// Sérialise une requête d'abonnement côté client (utilisé par `relay_client`).
pub fn subscribe_message(tokens: &[TokenWatch]) -> serde_json::Value {
    serde_json::json!({ "type": "subscribe", "tokens": tokens })
}

// --- PROTOCOLE AVAL : RELAIS -> CONSOMMATEUR ---

/// Une trame du flux amont, décodée une seule fois à l'entrée.
/// Sérialisée en objet JSON à clé unique : `{"account": ...}`, `{"transaction": ...}`, etc.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Frame {
    Account(AccountUpdate),
    Transaction(TransactionUpdate),
    Slot(SlotUpdate),
    Pong(PongUpdate),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Account(_) => "account",
            Frame::Transaction(_) => "transaction",
            Frame::Slot(_) => "slot",
            Frame::Pong(_) => "pong",
        }
    }

    /// Convertit une mise à jour Geyser. `None` pour les types non relayés
    /// (ping serveur, blocs, entries).
    pub fn from_update(update: UpdateOneof) -> Option<Self> {
        match update {
            UpdateOneof::Account(a) => Some(Frame::Account(a.into())),
            UpdateOneof::Transaction(t) => Some(Frame::Transaction(t.into())),
            UpdateOneof::Slot(s) => Some(Frame::Slot(s.into())),
            UpdateOneof::Pong(p) => Some(Frame::Pong(PongUpdate { id: p.id })),
            _ => None,
        }
    }
}

/// Nom du type d'une mise à jour Geyser, pour les logs et les métriques.
pub fn update_kind(update: &UpdateOneof) -> &'static str {
    match update {
        UpdateOneof::Account(_) => "account",
        UpdateOneof::Slot(_) => "slot",
        UpdateOneof::Transaction(_) => "transaction",
        UpdateOneof::TransactionStatus(_) => "transaction_status",
        UpdateOneof::Block(_) => "block",
        UpdateOneof::Ping(_) => "ping",
        UpdateOneof::Pong(_) => "pong",
        UpdateOneof::BlockMeta(_) => "block_meta",
        UpdateOneof::Entry(_) => "entry",
        #[allow(unreachable_patterns)]
        _ => "other",
    }
}

// --- STRUCTURES MIROIRS SÉRIALISABLES ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccountUpdate {
    pub pubkey: String,
    pub owner: String,
    pub lamports: u64,
    pub data_len: usize,
    pub executable: bool,
    pub write_version: u64,
    pub txn_signature: Option<String>,
    pub slot: u64,
}
impl From<ysp::SubscribeUpdateAccount> for AccountUpdate {
    fn from(value: ysp::SubscribeUpdateAccount) -> Self {
        let info = value.account.unwrap_or_default();
        Self {
            pubkey: bs58::encode(&info.pubkey).into_string(),
            owner: bs58::encode(&info.owner).into_string(),
            lamports: info.lamports,
            data_len: info.data.len(),
            executable: info.executable,
            write_version: info.write_version,
            txn_signature: info.txn_signature.map(|s| bs58::encode(s).into_string()),
            slot: value.slot,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SlotUpdate {
    pub slot: u64,
    pub parent: Option<u64>,
    pub status: String,
}
impl From<ysp::SubscribeUpdateSlot> for SlotUpdate {
    fn from(value: ysp::SubscribeUpdateSlot) -> Self {
        let status = ysp::SlotStatus::try_from(value.status)
            .map(|s| s.as_str_name().to_string())
            .unwrap_or_else(|_| value.status.to_string());
        Self { slot: value.slot, parent: value.parent, status }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PongUpdate {
    pub id: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionUpdate {
    pub slot: u64,
    pub transaction: RawTransaction,
    /// Présent uniquement quand le relais expose la forme décodée.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded: Option<DecodedTransaction>,
}
impl From<ysp::SubscribeUpdateTransaction> for TransactionUpdate {
    fn from(value: ysp::SubscribeUpdateTransaction) -> Self {
        Self {
            slot: value.slot,
            transaction: value.transaction.map(RawTransaction::from).unwrap_or_default(),
            decoded: None,
        }
    }
}

/// La transaction brute telle que livrée par la source, sans interprétation.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RawTransaction {
    pub signature: Vec<u8>,
    pub is_vote: bool,
    pub index: u64,
    pub message: Option<RawMessage>,
    pub meta: Option<RawMeta>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RawMessage {
    pub account_keys: Vec<Vec<u8>>,
    pub instructions: Vec<RawInstruction>,
    pub versioned: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RawInstruction {
    pub program_id_index: u32,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RawInnerInstructions {
    pub index: u32,
    pub instructions: Vec<RawInstruction>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RawMeta {
    pub failed: bool,
    pub fee: u64,
    pub inner_instructions: Vec<RawInnerInstructions>,
    pub log_messages: Vec<String>,
    pub loaded_writable_addresses: Vec<Vec<u8>>,
    pub loaded_readonly_addresses: Vec<Vec<u8>>,
}

impl From<ysp::SubscribeUpdateTransactionInfo> for RawTransaction {
    fn from(value: ysp::SubscribeUpdateTransactionInfo) -> Self {
        let message = value.transaction
            .and_then(|tx| tx.message)
            .map(|message| RawMessage {
                account_keys: message.account_keys,
                instructions: message.instructions.into_iter()
                    .map(|ix| RawInstruction {
                        program_id_index: ix.program_id_index,
                        accounts: ix.accounts,
                        data: ix.data,
                    })
                    .collect(),
                versioned: message.versioned,
            });

        let meta = value.meta.map(|meta| RawMeta {
            failed: meta.err.is_some(),
            fee: meta.fee,
            inner_instructions: meta.inner_instructions.into_iter()
                .map(|group| RawInnerInstructions {
                    index: group.index,
                    instructions: group.instructions.into_iter()
                        .map(|ix| RawInstruction {
                            program_id_index: ix.program_id_index,
                            accounts: ix.accounts,
                            data: ix.data,
                        })
                        .collect(),
                })
                .collect(),
            log_messages: meta.log_messages,
            loaded_writable_addresses: meta.loaded_writable_addresses,
            loaded_readonly_addresses: meta.loaded_readonly_addresses,
        });

        Self {
            signature: value.signature,
            is_vote: value.is_vote,
            index: value.index,
            message,
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe_request() {
        let msg = parse_client_message(
            r#"{"type":"subscribe","tokens":[{"mint":"M1","creator":"C1"}]}"#,
        ).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe(vec![TokenWatch { mint: "M1".into(), creator: "C1".into() }])
        );
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let msg = parse_client_message(r#"{"type":"unsubscribe"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown("unsubscribe".into()));
    }

    #[test]
    fn malformed_messages_are_rejected() {
        for text in ["not json", r#"{"tokens":[]}"#, r#"{"type":"subscribe"}"#,
                     r#"{"type":"subscribe","tokens":[{"mint":"M1"}]}"#] {
            assert!(
                matches!(parse_client_message(text), Err(RelayError::MalformedDownstreamMessage(_))),
                "{text} aurait dû être rejeté"
            );
        }
    }

    #[test]
    fn frame_serializes_as_single_keyed_object() {
        let frame = Frame::Slot(SlotUpdate { slot: 42, parent: Some(41), status: "SLOT_CONFIRMED".into() });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["slot"]["slot"], 42);
        assert_eq!(json["slot"]["parent"], 41);
        assert_eq!(json.as_object().unwrap().len(), 1);
    }

    #[test]
    fn converts_geyser_updates() {
        let slot = Frame::from_update(UpdateOneof::Slot(ysp::SubscribeUpdateSlot {
            slot: 10,
            parent: Some(9),
            status: ysp::SlotStatus::SlotConfirmed as i32,
            ..Default::default()
        }));
        assert_eq!(
            slot,
            Some(Frame::Slot(SlotUpdate { slot: 10, parent: Some(9), status: "SLOT_CONFIRMED".into() }))
        );

        let account = Frame::from_update(UpdateOneof::Account(ysp::SubscribeUpdateAccount {
            account: Some(ysp::SubscribeUpdateAccountInfo {
                pubkey: vec![0u8; 32],
                owner: vec![0u8; 32],
                lamports: 5,
                data: vec![1, 2, 3],
                ..Default::default()
            }),
            slot: 3,
            ..Default::default()
        }));
        match account {
            Some(Frame::Account(a)) => {
                assert_eq!(a.pubkey, "11111111111111111111111111111111");
                assert_eq!(a.data_len, 3);
                assert_eq!(a.lamports, 5);
                assert_eq!(a.slot, 3);
            }
            other => panic!("trame inattendue : {other:?}"),
        }

        assert!(Frame::from_update(UpdateOneof::Ping(ysp::SubscribeUpdatePing {})).is_none());
    }
}
