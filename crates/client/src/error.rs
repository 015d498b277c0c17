//! Fehlertypen des Client-Crates

use thiserror::Error;

use earshot_core::types::TrennungsGrund;
use earshot_crypto::CryptoFehler;
use earshot_protocol::paket::PaketFehler;
use earshot_protocol::transport::TransportFehler;

/// Fehler im Client-Session-Pfad
#[derive(Debug, Error)]
pub enum ClientFehler {
    #[error("Handshake-Zeitlimit ueberschritten")]
    HandshakeZeitlimit,

    #[error("Anmeldung abgelehnt: {0}")]
    Abgelehnt(String),

    #[error("Anfrage-ID bereits registriert")]
    DoppelteAnfrage,

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Vorgang abgebrochen")]
    Abgebrochen,

    #[error("Session bereits geschlossen")]
    SessionGeschlossen,

    #[error("Getrennt: {0}")]
    Getrennt(TrennungsGrund),

    #[error("Transport-Fehler: {0}")]
    Transport(#[from] TransportFehler),

    #[error("Krypto-Fehler: {0}")]
    Krypto(#[from] CryptoFehler),

    #[error("Paket-Fehler: {0}")]
    Paket(#[from] PaketFehler),
}

pub type ClientResult<T> = Result<T, ClientFehler>;
