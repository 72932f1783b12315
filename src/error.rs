// DANS : src/error.rs

use thiserror::Error;

/// Les erreurs du relais.
///
/// Les erreurs de décodage (`InvalidAddressLength`, `InvalidSignatureLength`,
/// `ProgramIndexOutOfRange`) ne concernent qu'une seule trame : elles ne
/// doivent jamais arrêter le stream amont ni le fanout.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Le point d'accès amont est injoignable ou refuse le token. Fatal au démarrage.
    #[error("échec de connexion au flux amont : {0}")]
    ConnectionSetup(String),

    /// Message d'un consommateur non-JSON ou sans les champs requis. Le message est ignoré.
    #[error("message aval invalide : {0}")]
    MalformedDownstreamMessage(String),

    #[error("longueur d'adresse invalide : 32 octets attendus, {0} reçus")]
    InvalidAddressLength(usize),

    #[error("longueur de signature invalide : 64 octets attendus, {0} reçus")]
    InvalidSignatureLength(usize),

    #[error("index de programme {index} hors limites ({len} comptes)")]
    ProgramIndexOutOfRange { index: u32, len: usize },

    /// Panne en cours de stream (écriture refusée, stream fermé, statut gRPC).
    #[error("erreur du stream amont : {0}")]
    UpstreamStream(String),
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;
