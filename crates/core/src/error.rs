//! Fehlertypen fuer Earshot
//!
//! Uebergreifender Fehler-Enum fuer Protokoll- und Lebenszyklus-Fehler.
//! Untermodule (Krypto, Paket-Codec, Transport) definieren eigene Fehler
//! und werden via `#[from]` konvertiert wo sie die Crate-Grenze kreuzen.

use thiserror::Error;

use crate::types::Version;

/// Globaler Result-Alias fuer Earshot
pub type Result<T> = std::result::Result<T, EarshotError>;

/// Uebergreifende Fehler im Earshot-System
#[derive(Debug, Error)]
pub enum EarshotError {
    // --- Framing ---
    #[error("Ungueltiger Frame: {0}")]
    MalformedFrame(String),

    #[error("Unbekannter Pakettyp: {0}")]
    UnbekannterTyp(u8),

    #[error("Payload zu gross: {laenge} Bytes (Maximum {maximum})")]
    UebergrossePayload { laenge: usize, maximum: usize },

    // --- Protokoll ---
    #[error("Protokollversion nicht kompatibel: lokal={lokal}, entfernt={entfernt}")]
    VersionsKonflikt { lokal: Version, entfernt: Version },

    #[error("Server voll: maximale Clientanzahl erreicht")]
    ServerVoll,

    #[error("Anmeldung abgelehnt: {0}")]
    Abgelehnt(String),

    // --- Lebenszyklus ---
    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Vorgang abgebrochen")]
    Abgebrochen,

    #[error("Objekt bereits geschlossen")]
    ObjektGeschlossen,

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl EarshotError {
    /// Gibt true zurueck wenn der Fehler die Session beenden muss
    ///
    /// Paketfehler sind lokal (Datagramm wird verworfen); Versions- und
    /// Ablehnungsfehler beenden die Session mit Grund.
    pub fn ist_fatal(&self) -> bool {
        matches!(
            self,
            Self::VersionsKonflikt { .. }
                | Self::ServerVoll
                | Self::Abgelehnt(_)
                | Self::ObjektGeschlossen
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = EarshotError::UebergrossePayload {
            laenge: 2000,
            maximum: 1280,
        };
        assert!(e.to_string().contains("2000"));
        assert!(e.to_string().contains("1280"));
    }

    #[test]
    fn fatal_erkennung() {
        assert!(EarshotError::ServerVoll.ist_fatal());
        assert!(!EarshotError::UnbekannterTyp(99).ist_fatal());
        assert!(!EarshotError::MalformedFrame("kurz".into()).ist_fatal());
    }

    #[test]
    fn versions_konflikt_meldung() {
        let e = EarshotError::VersionsKonflikt {
            lokal: Version { major: 2, minor: 0, build: 0 },
            entfernt: Version { major: 1, minor: 9, build: 0 },
        };
        assert!(e.to_string().contains("2.0.0"));
        assert!(e.to_string().contains("1.9.0"));
    }
}
