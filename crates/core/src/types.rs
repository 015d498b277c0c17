//! Gemeinsame Identifikationstypen fuer Earshot
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Eindeutige Entitaets-ID innerhalb der Welt-Tabelle
///
/// Kodiert Platz-Index (untere 16 Bit) und Platz-Version (obere 16 Bit),
/// damit ein wiederverwendeter Platz alte IDs ungueltig macht.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub i32);

impl EntityId {
    /// Baut eine ID aus Platz-Index und Versions-Zaehler
    pub fn aus_platz(platz: u16, version: u16) -> Self {
        Self(((version as i32) << 16) | platz as i32)
    }

    /// Platz-Index in der Entitaets-Tabelle
    pub fn platz(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Versions-Zaehler des Platzes
    pub fn version(&self) -> u16 {
        ((self.0 >> 16) & 0xFFFF) as u16
    }

    /// Rohwert fuer das Wire-Format
    pub fn roh(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// 128-Bit Anfrage-ID fuer Request/Response-Korrelation
///
/// Antworten tragen die ID der zugehoerigen Anfrage unveraendert zurueck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Erstellt eine neue zufaellige RequestId
    pub fn neu() -> Self {
        Self(Uuid::new_v4())
    }

    /// Serialisiert in 16 Bytes (big-endian, RFC 4122 Reihenfolge)
    pub fn als_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    /// Liest eine RequestId aus 16 Bytes
    pub fn aus_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::neu()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PeerId
// ---------------------------------------------------------------------------

/// Transport-seitige Verbindungskennung eines Peers
///
/// Wird von der Transportschicht vergeben und ist nur fuer die Lebensdauer
/// der Verbindung gueltig (keine Benutzer-Identitaet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Protokollversion fuer die Login-Aushandlung
///
/// Major und Minor muessen auf beiden Seiten uebereinstimmen; das
/// Build-Feld ist rein informativ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub build: u16,
}

/// Aktuelle Protokollversion dieses Builds
pub const PROTOKOLL_VERSION: Version = Version {
    major: 1,
    minor: 2,
    build: 0,
};

impl Version {
    /// Prueft ob zwei Versionen miteinander sprechen duerfen
    pub fn kompatibel_mit(&self, andere: &Version) -> bool {
        self.major == andere.major && self.minor == andere.minor
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

// ---------------------------------------------------------------------------
// Trennungsgruende
// ---------------------------------------------------------------------------

/// Grund einer fatalen Trennung, als lokalisierbarer Bezeichner
///
/// Der Client reicht den Bezeichner unveraendert an die UI-Schicht weiter;
/// die eigentliche Uebersetzung lebt ausserhalb des Kerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrennungsGrund {
    /// Protokollversionen passen nicht zusammen
    IncompatibleVersion,
    /// Server hat die maximale Clientanzahl erreicht
    ServerFull,
    /// Server hat die Anmeldung aus anderem Grund abgelehnt
    Rejected,
    /// Handshake nicht rechtzeitig abgeschlossen
    HandshakeTimeout,
    /// Gegenseite hat die Verbindung geschlossen
    Closed,
}

impl TrennungsGrund {
    /// Lokalisierbarer Bezeichner fuer die UI-Schicht
    pub fn bezeichner(&self) -> &'static str {
        match self {
            Self::IncompatibleVersion => "Earshot.DisconnectReason.IncompatibleVersion",
            Self::ServerFull => "Earshot.DisconnectReason.ServerFull",
            Self::Rejected => "Earshot.DisconnectReason.Rejected",
            Self::HandshakeTimeout => "Earshot.DisconnectReason.HandshakeTimeout",
            Self::Closed => "Earshot.DisconnectReason.Closed",
        }
    }

    /// Ordnet einen uebertragenen Bezeichner wieder einem Grund zu
    ///
    /// Unbekannte Bezeichner werden als generische Ablehnung gewertet.
    pub fn aus_bezeichner(bezeichner: &str) -> Self {
        match bezeichner {
            "Earshot.DisconnectReason.IncompatibleVersion" => Self::IncompatibleVersion,
            "Earshot.DisconnectReason.ServerFull" => Self::ServerFull,
            "Earshot.DisconnectReason.HandshakeTimeout" => Self::HandshakeTimeout,
            "Earshot.DisconnectReason.Closed" => Self::Closed,
            _ => Self::Rejected,
        }
    }
}

impl std::fmt::Display for TrennungsGrund {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.bezeichner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
