// DANS : src/monitoring/metrics.rs

use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, TextEncoder,
    register_int_counter, register_int_counter_vec, register_int_gauge,
};
use tracing::{error, info, warn};
use warp::Filter;

lazy_static! {
    // --- Flux amont ---
    pub static ref FRAMES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        "relay_frames_received_total",
        "Nombre de mises à jour reçues du stream Geyser",
        &["kind"] // Labels: "account", "transaction", "slot", "pong", ...
    ).unwrap();
    pub static ref LAST_FRAME_TIMESTAMP: IntGauge = register_int_gauge!(
        "relay_last_frame_timestamp_seconds", "Timestamp Unix de la dernière mise à jour reçue"
    ).unwrap();
    pub static ref DECODE_FAILURES: IntCounter = register_int_counter!(
        "relay_decode_failures_total", "Transactions dont le décodage a échoué (trame relayée brute)"
    ).unwrap();
    pub static ref SUBSCRIPTION_UPDATES: IntCounter = register_int_counter!(
        "relay_subscription_updates_total", "Remplacements de l'ensemble d'abonnements"
    ).unwrap();
    pub static ref PINGS_SENT: IntCounter = register_int_counter!(
        "relay_pings_sent_total", "Pings de keepalive envoyés en amont"
    ).unwrap();

    // --- Fanout aval ---
    pub static ref FRAMES_BROADCAST: IntCounter = register_int_counter!(
        "relay_frames_broadcast_total", "Trames passées au fanout"
    ).unwrap();
    pub static ref DELIVERIES: IntCounter = register_int_counter!(
        "relay_deliveries_total", "Trames mises en file pour un consommateur"
    ).unwrap();
    pub static ref DROPPED_DELIVERIES: IntCounterVec = register_int_counter_vec!(
        "relay_dropped_deliveries_total",
        "Trames non livrées à un consommateur",
        &["reason"] // Labels: "queue_full", "closed"
    ).unwrap();
    pub static ref CONSUMERS_CONNECTED: IntGauge = register_int_gauge!(
        "relay_consumers_connected", "Consommateurs actuellement enregistrés"
    ).unwrap();
}

pub async fn start_metrics_server(port: u16) {
    let metrics_route = warp::path!("metrics").map(|| {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            warn!(error = %e, "[Monitoring] Échec de l'encodage des métriques.");
        }
        warp::reply::with_header(buffer, "content-type", "text/plain; version=0.0.4")
    });
    // Port déjà pris : on le signale et le relais continue sans métriques.
    match warp::serve(metrics_route).try_bind_ephemeral(([0, 0, 0, 0], port)) {
        Ok((addr, server)) => {
            info!(%addr, "[Monitoring] Serveur de métriques exposé sur /metrics");
            server.await;
        }
        Err(e) => error!(port, error = %e, "[Monitoring] Impossible d'exposer les métriques."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn busy_port_is_reported_instead_of_panicking() {
        let taken = std::net::TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let finished = tokio::time::timeout(Duration::from_secs(5), start_metrics_server(port)).await;
        assert!(finished.is_ok());
    }
}
