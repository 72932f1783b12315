// DANS : src/fanout.rs

use crate::communication::Frame;
use crate::monitoring::metrics;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

pub type ConsumerId = u64;
/// Une trame déjà sérialisée, partagée entre toutes les files.
pub type Payload = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Readiness {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl From<u8> for Readiness {
    fn from(value: u8) -> Self {
        match value {
            0 => Readiness::Connecting,
            1 => Readiness::Open,
            _ => Readiness::Closed,
        }
    }
}

/// Côté fanout d'un consommateur : son état et sa file d'envoi.
/// La connexion elle-même appartient à la couche transport.
#[derive(Debug)]
pub struct ConsumerHandle {
    id: ConsumerId,
    readiness: AtomicU8,
    sender: mpsc::Sender<Payload>,
}

impl ConsumerHandle {
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn readiness(&self) -> Readiness {
        Readiness::from(self.readiness.load(Ordering::Acquire))
    }

    pub fn set_readiness(&self, readiness: Readiness) {
        self.readiness.store(readiness as u8, Ordering::Release);
    }
}

pub struct Fanout {
    // Lecture sans verrou à chaque trame ; copie-sur-écriture à chaque (dé)connexion.
    consumers: ArcSwap<HashMap<ConsumerId, Arc<ConsumerHandle>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Fanout {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            consumers: ArcSwap::from_pointee(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Enregistre un consommateur à l'état `Connecting`. Le récepteur est
    /// vidé par la tâche d'écriture de la connexion.
    pub fn register(&self) -> (Arc<ConsumerHandle>, mpsc::Receiver<Payload>) {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let handle = Arc::new(ConsumerHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            readiness: AtomicU8::new(Readiness::Connecting as u8),
            sender,
        });
        self.consumers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(handle.id, handle.clone());
            next
        });
        metrics::CONSUMERS_CONNECTED.set(self.len() as i64);
        debug!(consumer = handle.id, "[Fanout] Consommateur enregistré.");
        (handle, receiver)
    }

    pub fn unregister(&self, id: ConsumerId) {
        self.consumers.rcu(|current| {
            let mut next = HashMap::clone(current);
            if let Some(handle) = next.remove(&id) {
                handle.set_readiness(Readiness::Closed);
            }
            next
        });
        metrics::CONSUMERS_CONNECTED.set(self.len() as i64);
        debug!(consumer = id, "[Fanout] Consommateur retiré.");
    }

    pub fn len(&self) -> usize {
        self.consumers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arrêt du relais : plus aucune trame n'est mise en file. Les files
    /// existantes restent à vider par leur tâche d'écriture.
    pub fn close_all(&self) {
        for handle in self.consumers.load().values() {
            handle.set_readiness(Readiness::Closed);
        }
        debug!(consumers = self.len(), "[Fanout] Tous les consommateurs sont fermés.");
    }

    /// Nombre de consommateurs prêts à recevoir.
    pub fn open_consumers(&self) -> usize {
        self.consumers.load()
            .values()
            .filter(|handle| handle.readiness() == Readiness::Open)
            .count()
    }

    /// Sérialise la trame une fois et la livre à chaque consommateur `Open`.
    /// Retourne le nombre de consommateurs servis.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        match serde_json::to_string(frame) {
            Ok(json) => self.broadcast_payload(Payload::from(json)),
            Err(e) => {
                error!(error = %e, kind = frame.kind(), "[Fanout] Trame non sérialisable, ignorée.");
                0
            }
        }
    }

    /// Envoi sans attente : un consommateur lent ou fermé ne bloque jamais les autres.
    pub fn broadcast_payload(&self, payload: Payload) -> usize {
        metrics::FRAMES_BROADCAST.inc();
        let consumers = self.consumers.load();
        let mut delivered = 0;

        for handle in consumers.values() {
            if handle.readiness() != Readiness::Open {
                continue;
            }
            match handle.sender.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::DROPPED_DELIVERIES.with_label_values(&["queue_full"]).inc();
                    warn!(consumer = handle.id, "[Fanout] File pleine, trame abandonnée pour ce consommateur.");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    metrics::DROPPED_DELIVERIES.with_label_values(&["closed"]).inc();
                    handle.set_readiness(Readiness::Closed);
                }
            }
        }

        metrics::DELIVERIES.inc_by(delivered as u64);
        if delivered > 0 {
            debug!(consumers = delivered, "[Fanout] Trame diffusée.");
        }
        delivered
    }
}
