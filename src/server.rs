// DANS : src/server.rs

use crate::communication::{parse_client_message, ClientMessage};
use crate::fanout::{Fanout, Readiness};
use crate::stream::ControlCommand;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, watch},
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Ce qu'il est advenu d'un message d'un consommateur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Subscribed,
    Ignored,
    Malformed,
}

pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Impossible d'écouter sur le port {port}"))
}

// --- ARRÊT COORDONNÉ ---

/// Côté relais de l'arrêt : signale les tâches d'écriture puis attend
/// qu'elles aient vidé leur file et fermé leur connexion.
pub struct Shutdown {
    notify: watch::Sender<bool>,
    done_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
}

/// Détenu par chaque tâche d'écriture. Le canal `done` se ferme quand le
/// dernier exemplaire est libéré.
#[derive(Clone)]
pub struct ShutdownHandle {
    notify: watch::Receiver<bool>,
    _done: mpsc::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::channel(1);
        Self { notify, done_tx, done_rx }
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            notify: self.notify.subscribe(),
            _done: self.done_tx.clone(),
        }
    }

    /// Plus aucune trame n'est mise en file ; celles déjà en file partent,
    /// puis chaque connexion reçoit une trame de fermeture.
    /// Retourne `false` si le délai a expiré avant la fin des écritures.
    /// `serve` doit déjà être arrêté : il détient lui aussi un `ShutdownHandle`.
    pub async fn drain(self, fanout: &Fanout, grace: Duration) -> bool {
        fanout.close_all();
        self.notify.send_replace(true);
        let Shutdown { done_tx, mut done_rx, .. } = self;
        drop(done_tx);
        tokio::time::timeout(grace, done_rx.recv()).await.is_ok()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepte les consommateurs en boucle. Chaque connexion a sa propre tâche.
pub async fn serve(
    listener: TcpListener,
    fanout: Arc<Fanout>,
    commands: mpsc::Sender<ControlCommand>,
    shutdown: ShutdownHandle,
) -> Result<()> {
    info!(addr = ?listener.local_addr().ok(), "[Server] Serveur WebSocket prêt à accepter des connexions.");
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Un accept raté ne concerne que ce client : le relais continue.
                let delay = accept_retry_delay(&e);
                warn!(error = %e, retry_ms = delay.as_millis() as u64, "[Server] Échec de accept().");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }
        };
        let fanout = fanout.clone();
        let commands = commands.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, fanout, commands, shutdown).await;
        });
    }
}

/// Attente avant le prochain accept. Quand le processus n'a plus de
/// descripteurs, réessayer tout de suite ne ferait que boucler.
fn accept_retry_delay(error: &io::Error) -> Duration {
    const EMFILE: i32 = 24;
    const ENFILE: i32 = 23;
    match error.raw_os_error() {
        Some(EMFILE) | Some(ENFILE) => ACCEPT_BACKOFF,
        _ if error.kind() == io::ErrorKind::OutOfMemory => ACCEPT_BACKOFF,
        _ => Duration::ZERO,
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    fanout: Arc<Fanout>,
    commands: mpsc::Sender<ControlCommand>,
    shutdown: ShutdownHandle,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "[Server] Handshake WebSocket échoué.");
            return;
        }
    };

    let (handle, mut outbound) = fanout.register();
    let (mut sink, mut source) = ws.split();
    info!(%peer, consumer = handle.id(), "[Server] Consommateur connecté.");

    // La tâche d'écriture vide la file du consommateur : un client lent
    // ne ralentit jamais la lecture du flux amont.
    let writer = tokio::spawn(async move {
        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                biased;

                payload = outbound.recv() => match payload {
                    Some(payload) => {
                        if let Err(e) = sink.send(Message::Text(payload.to_string())).await {
                            debug!(error = %e, "[Server] Écriture vers le consommateur échouée.");
                            break;
                        }
                    }
                    None => break,
                },
                _ = shutdown.notify.changed() => {
                    // Arrêt : on vide ce qui reste en file avant de fermer.
                    while let Ok(payload) = outbound.try_recv() {
                        if sink.send(Message::Text(payload.to_string())).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });
    handle.set_readiness(Readiness::Open);

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_client_text(&text, &commands).await;
            }
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => {
                    handle_client_text(&text, &commands).await;
                }
                Err(_) => warn!(%peer, "[Server] Message binaire non UTF-8 ignoré."),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(%peer, error = %e, "[Server] Erreur de lecture WebSocket.");
                break;
            }
        }
    }

    handle.set_readiness(Readiness::Closed);
    fanout.unregister(handle.id());
    writer.abort();
    info!(%peer, consumer = handle.id(), "[Server] Consommateur déconnecté.");
}

/// Un message invalide est abandonné sans réponse ; la connexion reste ouverte.
pub async fn handle_client_text(text: &str, commands: &mpsc::Sender<ControlCommand>) -> MessageOutcome {
    match parse_client_message(text) {
        Ok(ClientMessage::Subscribe(tokens)) => {
            info!(tokens = tokens.len(), "[Server] Demande d'abonnement reçue.");
            if commands.send(ControlCommand::Subscribe(tokens)).await.is_err() {
                warn!("[Server] Le contrôleur du stream est arrêté, abonnement perdu.");
            }
            MessageOutcome::Subscribed
        }
        Ok(ClientMessage::Unknown(kind)) => {
            info!(kind = %kind, "[Server] Type de message inconnu, ignoré.");
            MessageOutcome::Ignored
        }
        Err(e) => {
            warn!(error = %e, "[Server] Message ignoré.");
            MessageOutcome::Malformed
        }
    }
}
