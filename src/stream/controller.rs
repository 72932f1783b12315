// DANS : src/stream/controller.rs

use crate::communication::{update_kind, Frame, TransactionUpdate};
use crate::config::Config;
use crate::decoders::transaction;
use crate::error::{RelayError, RelayResult};
use crate::fanout::Fanout;
use crate::monitoring::{metrics, unix_timestamp};
use crate::subscription::{SubscriptionRegistry, SubscriptionSet, TokenWatch};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::{collections::HashMap, fmt::Display, sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};
use yellowstone_grpc_proto::prelude::{
    CommitmentLevel, SubscribeRequest, SubscribeRequestFilterAccounts,
    SubscribeRequestFilterSlots, SubscribeRequestFilterTransactions, SubscribeRequestPing,
    SubscribeUpdate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Subscribing,
    Streaming,
    /// Terminal : pas de reconnexion automatique.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Subscribe(Vec<TokenWatch>),
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub ping_interval: Duration,
    pub expose_decoded: bool,
    pub commitment: CommitmentLevel,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            expose_decoded: config.relay_expose_decoded,
            commitment: CommitmentLevel::Confirmed,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            expose_decoded: false,
            commitment: CommitmentLevel::Confirmed,
        }
    }
}

// --- TRADUCTION VERS LE FORMAT DE FILTRE GEYSER ---

/// Requête vide : efface tout filtre en vigueur sur le stream.
pub fn empty_request() -> SubscribeRequest {
    SubscribeRequest::default()
}

pub fn ping_request(id: i32) -> SubscribeRequest {
    SubscribeRequest {
        ping: Some(SubscribeRequestPing { id }),
        ..Default::default()
    }
}

/// Un filtre `accounts` par label, les slots, et le filtre `token_txs`.
/// Sans aucun token surveillé, le filtre de transactions est omis : un
/// `account_include` vide laisserait passer toutes les transactions du réseau.
pub fn build_subscribe_request(set: &SubscriptionSet, commitment: CommitmentLevel) -> SubscribeRequest {
    let accounts: HashMap<String, SubscribeRequestFilterAccounts> = set.accounts.iter()
        .map(|filter| {
            (
                filter.label.clone(),
                SubscribeRequestFilterAccounts {
                    account: filter.addresses.clone(),
                    owner: vec![],
                    filters: vec![],
                    ..Default::default()
                },
            )
        })
        .collect();

    let transactions: HashMap<String, SubscribeRequestFilterTransactions> = set.transactions.iter()
        .filter(|_| !set.is_empty())
        .map(|filter| {
            (
                filter.label.clone(),
                SubscribeRequestFilterTransactions {
                    vote: Some(filter.vote),
                    failed: Some(filter.failed),
                    account_include: filter.account_include.clone(),
                    account_exclude: vec![],
                    account_required: vec![],
                    ..Default::default()
                },
            )
        })
        .collect();

    SubscribeRequest {
        slots: HashMap::from([("slots".to_string(), SubscribeRequestFilterSlots::default())]),
        accounts,
        transactions,
        commitment: Some(commitment as i32),
        ..Default::default()
    }
}

// --- KEEPALIVE ---

/// Suivi des pings/pongs. Purement observationnel : un pong manquant
/// n'est pas une panne.
#[derive(Debug, Default)]
struct Keepalive {
    last_ping_id: Option<i32>,
    last_pong_id: Option<i32>,
}

impl Keepalive {
    /// Identifiant dérivé de l'heure (secondes Unix, modulo 2^31), strictement
    /// croissant. Au-delà de `i32::MAX` (2038), il repart une fois de
    /// `i32::MIN` puis suit de nouveau l'heure.
    fn next_id(&mut self, now_secs: i64) -> i32 {
        let derived = now_secs.rem_euclid(i32::MAX as i64 + 1) as i32;
        let id = match self.last_ping_id {
            Some(last) if derived <= last => last.wrapping_add(1),
            _ => derived,
        };
        if self.last_ping_id.is_some() && self.last_pong_id != self.last_ping_id {
            warn!(unanswered = ?self.last_ping_id, "[Relay] Le ping précédent est resté sans pong.");
        }
        self.last_ping_id = Some(id);
        id
    }

    fn on_pong(&mut self, id: i32) {
        if Some(id) == self.last_ping_id {
            debug!(id, "[Relay] Pong reçu.");
        } else {
            debug!(id, expected = ?self.last_ping_id, "[Relay] Pong inattendu.");
        }
        self.last_pong_id = Some(id);
    }
}

// --- CONTRÔLEUR ---

/// Propriétaire de l'unique stream amont : il y écrit les filtres et les
/// pings, lit les mises à jour dans l'ordre d'arrivée et les passe au fanout.
pub struct StreamController<S> {
    subscribe_tx: S,
    registry: SubscriptionRegistry,
    fanout: Arc<Fanout>,
    settings: ControllerSettings,
    state: StreamState,
    keepalive: Keepalive,
}

impl<S, E> StreamController<S>
where
    S: Sink<SubscribeRequest, Error = E> + Unpin,
    E: Display,
{
    pub fn new(subscribe_tx: S, fanout: Arc<Fanout>, settings: ControllerSettings) -> Self {
        Self {
            subscribe_tx,
            registry: SubscriptionRegistry::new(),
            fanout,
            settings,
            state: StreamState::Idle,
            keepalive: Keepalive::default(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Efface le filtre en vigueur puis envoie le nouveau. Les deux écritures
    /// sont faites sans attendre d'accusé de réception pour l'effacement.
    pub async fn apply_subscription(&mut self, watches: &[TokenWatch]) -> RelayResult<()> {
        self.state = StreamState::Subscribing;
        info!(tokens = watches.len(), "[Relay] Remplacement des abonnements : désabonnement...");
        self.write(empty_request()).await?;

        let request = build_subscribe_request(self.registry.replace(watches), self.settings.commitment);
        self.write(request).await?;

        self.state = StreamState::Streaming;
        metrics::SUBSCRIPTION_UPDATES.inc();
        info!(
            tokens = watches.len(),
            addresses = self.registry.current().watched_addresses(),
            generation = self.registry.generation(),
            "[Relay] Nouvel abonnement envoyé."
        );
        Ok(())
    }

    pub async fn send_ping(&mut self) -> RelayResult<()> {
        let id = self.keepalive.next_id(unix_timestamp());
        self.write(ping_request(id)).await?;
        metrics::PINGS_SENT.inc();
        debug!(id, "[Relay] Ping envoyé.");
        Ok(())
    }

    /// Traite une mise à jour amont. Retourne le nombre de consommateurs servis.
    pub fn handle_update(&mut self, update: SubscribeUpdate) -> usize {
        let Some(oneof) = update.update_oneof else {
            return 0;
        };
        let kind = update_kind(&oneof);
        metrics::FRAMES_RECEIVED.with_label_values(&[kind]).inc();
        metrics::LAST_FRAME_TIMESTAMP.set(unix_timestamp());

        let Some(mut frame) = Frame::from_update(oneof) else {
            debug!(kind, "[Relay] Mise à jour non relayée.");
            return 0;
        };

        match &mut frame {
            Frame::Pong(pong) => {
                self.keepalive.on_pong(pong.id);
                return 0;
            }
            Frame::Transaction(tx) => self.inspect_transaction(tx),
            Frame::Account(account) => {
                debug!(pubkey = %account.pubkey, slot = account.slot, "[Relay] Mise à jour de compte.");
            }
            Frame::Slot(slot) => {
                debug!(slot = slot.slot, status = %slot.status, "[Relay] Mise à jour de slot.");
            }
        }

        self.fanout.broadcast(&frame)
    }

    /// Décodage pour le diagnostic local. Un échec ne concerne que cette
    /// trame, qui est relayée brute.
    fn inspect_transaction(&self, tx: &mut TransactionUpdate) {
        match transaction::decode_update(tx) {
            Ok(decoded) => {
                debug!(
                    signature = %decoded.signature,
                    slot = decoded.slot,
                    success = decoded.success,
                    signer = ?decoded.signer(),
                    accounts = decoded.account_keys.len(),
                    programs = ?decoded.instructions.iter().map(|ix| ix.program_name.as_str()).collect::<Vec<_>>(),
                    inner_groups = decoded.inner_instruction_groups.len(),
                    transfers = decoded.transfer_instruction_count(),
                    transfer_logs = decoded.transfer_evidence.len(),
                    "[Relay] Transaction reçue."
                );
                if self.settings.expose_decoded {
                    tx.decoded = Some(decoded);
                }
            }
            Err(e) => {
                metrics::DECODE_FAILURES.inc();
                warn!(error = %e, slot = tx.slot, "[Relay] Décodage de transaction impossible, trame relayée brute.");
            }
        }
    }

    /// Boucle principale. Les commandes d'abonnement sont traitées dans la
    /// même boucle que les trames : chaque remplacement se termine avant le suivant.
    pub async fn run<St, SE>(
        mut self,
        mut stream: St,
        mut commands: mpsc::Receiver<ControlCommand>,
    ) -> RelayResult<()>
    where
        St: Stream<Item = Result<SubscribeUpdate, SE>> + Unpin,
        SE: Display,
    {
        let period = self.settings.ping_interval;
        let mut ping_interval = time::interval_at(Instant::now() + period, period);
        ping_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commands_open = true;

        info!(ping_secs = period.as_secs(), "[Relay] Contrôleur du stream démarré.");

        loop {
            tokio::select! {
                biased;

                command = commands.recv(), if commands_open => match command {
                    Some(ControlCommand::Subscribe(watches)) => self.apply_subscription(&watches).await?,
                    None => {
                        debug!("[Relay] Canal de commandes fermé.");
                        commands_open = false;
                    }
                },
                message = stream.next() => match message {
                    Some(Ok(update)) => {
                        self.handle_update(update);
                    }
                    Some(Err(status)) => return Err(self.fail(format!("statut gRPC : {status}"))),
                    None => return Err(self.fail("stream fermé par la source".to_string())),
                },
                _ = ping_interval.tick() => self.send_ping().await?,
            }
        }
    }

    async fn write(&mut self, request: SubscribeRequest) -> RelayResult<()> {
        if let Err(e) = self.subscribe_tx.send(request).await {
            return Err(self.fail(format!("écriture refusée : {e}")));
        }
        Ok(())
    }

    fn fail(&mut self, reason: String) -> RelayError {
        self.state = StreamState::Failed;
        error!(reason = %reason, "[Relay] Stream amont perdu. Pas de reconnexion automatique.");
        RelayError::UpstreamStream(reason)
    }
}
