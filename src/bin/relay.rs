// DANS : src/bin/relay.rs

use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use geyser_relay::{
    config::Config,
    fanout::Fanout,
    monitoring::metrics,
    server::{self, Shutdown},
    stream::{upstream::open_upstream, ControllerSettings, StreamController},
};

// Les demandes d'abonnement en attente du contrôleur.
const COMMAND_QUEUE: usize = 64;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

async fn run_relay(config: Config) -> Result<()> {
    if let Some(port) = config.relay_metrics_port {
        tokio::spawn(metrics::start_metrics_server(port));
    }

    // Connexion amont d'abord : sans elle, inutile d'ouvrir le serveur.
    let (subscribe_tx, stream) = open_upstream(
        config.yellowstone_endpoint.clone(),
        config.yellowstone_token.clone(),
    ).await?;

    let listener = server::bind(config.websocket_port).await?;
    let fanout = Arc::new(Fanout::new(config.relay_consumer_queue));
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
    let controller = StreamController::new(
        subscribe_tx,
        fanout.clone(),
        ControllerSettings::from_config(&config),
    );

    info!(port = config.websocket_port, "[Relay] Le relais est prêt à accepter des connexions.");

    let shutdown = Shutdown::new();
    let outcome = tokio::select! {
        result = controller.run(stream, command_rx) => result.context("Le stream Geyser s'est arrêté"),
        result = server::serve(listener, fanout.clone(), command_tx, shutdown.handle()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("[Relay] Arrêt demandé, fermeture des connexions.");
            Ok(())
        }
    };

    // Dans tous les cas, les trames déjà en file partent avant la sortie.
    info!(consumers = fanout.len(), "[Relay] Vidage des files des consommateurs...");
    if !shutdown.drain(&fanout, SHUTDOWN_GRACE).await {
        warn!("[Relay] Délai d'arrêt dépassé, des trames en file sont perdues.");
    }
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    geyser_relay::monitoring::logging::setup_logging();
    let config = Config::load().context("Configuration invalide")?;
    info!(
        endpoint = %config.yellowstone_endpoint,
        port = config.websocket_port,
        "[Relay] Démarrage du relais Geyser -> WebSocket."
    );

    // Pas de reconnexion automatique : une panne amont est visible et fatale.
    if let Err(e) = run_relay(config).await {
        error!(error = ?e, "[Relay] Le service s'est arrêté.");
        std::process::exit(1);
    }
    Ok(())
}
