//! Fehlertypen fuer das Kryptografie-Subsystem

use thiserror::Error;

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoFehler {
    #[error("Ungueltiger Remote-Schluessel: erwartet {erwartet} Bytes, erhalten {erhalten}")]
    UngueltigerRemoteSchluessel { erwartet: usize, erhalten: usize },

    #[error("Ungueltiger Remote-Schluessel: kein Punkt auf der Kurve")]
    RemoteSchluesselKeinKurvenpunkt,

    #[error("Handshake nicht abgeschlossen")]
    HandshakeUnvollstaendig,

    #[error("Authentifizierung fehlgeschlagen (AEAD-Tag ungueltig)")]
    AuthentifizierungFehlgeschlagen,

    #[error("Ungueltige Nonce: Praefix passt nicht zur Empfangsrichtung")]
    UngueltigeNonce,

    #[error("Replay erkannt: Zaehler {0} wurde bereits akzeptiert")]
    ReplayErkannt(u64),

    #[error("Replay ausserhalb des Fensters: Zaehler {zaehler} liegt {abstand} hinter dem Maximum")]
    ReplayAusserhalbFenster { zaehler: u64, abstand: u64 },

    #[error("Schluessel-Ableitung fehlgeschlagen: {0}")]
    SchluesselAbleitung(String),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),
}

pub type CryptoResult<T> = Result<T, CryptoFehler>;
