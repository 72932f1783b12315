// DANS : src/stream/upstream.rs

use crate::error::{RelayError, RelayResult};
use futures_util::{Sink, Stream};
use std::time::Duration;
use tracing::info;
use yellowstone_grpc_client::{ClientTlsConfig, GeyserGrpcClient};
use yellowstone_grpc_proto::prelude::{SubscribeRequest, SubscribeUpdate};

fn setup_error(context: &str, e: impl std::fmt::Display) -> RelayError {
    RelayError::ConnectionSetup(format!("{context} : {e}"))
}

/// Se connecte à la source, vérifie la connexion avec `get_version`, puis
/// ouvre l'unique stream bidirectionnel réutilisé pour toutes les écritures
/// (filtres et pings). Toute erreur ici est fatale au démarrage.
pub async fn open_upstream(
    endpoint: String,
    x_token: Option<String>,
) -> RelayResult<(
    impl Sink<SubscribeRequest, Error = impl std::fmt::Display> + Unpin,
    impl Stream<Item = Result<SubscribeUpdate, impl std::fmt::Display>> + Unpin,
)> {
    info!(endpoint = %endpoint, "[Relay] Connexion au stream Geyser gRPC...");

    let mut builder = GeyserGrpcClient::build_from_shared(endpoint.clone())
        .map_err(|e| setup_error("point d'accès invalide", e))?
        .x_token(x_token)
        .map_err(|e| setup_error("x-token invalide", e))?
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .tcp_nodelay(true)
        .max_decoding_message_size(64 * 1024 * 1024);

    if endpoint.starts_with("https://") {
        builder = builder
            .tls_config(ClientTlsConfig::new())
            .map_err(|e| setup_error("configuration TLS", e))?;
    }

    let mut client = builder
        .connect()
        .await
        .map_err(|e| setup_error("connexion impossible", e))?;

    let version = client
        .get_version()
        .await
        .map_err(|e| setup_error("get_version refusé (vérifier YELLOWSTONE_TOKEN)", e))?;
    info!(version = %version.version, "[Relay] Connexion gRPC réussie.");

    let (subscribe_tx, stream) = client
        .subscribe()
        .await
        .map_err(|e| setup_error("ouverture du stream d'abonnement", e))?;

    Ok((subscribe_tx, stream))
}
