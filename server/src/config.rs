//! Server-Konfiguration (ServerEigenschaften)
//!
//! Wird beim Start aus einer TOML-Datei geladen und kann zur Laufzeit
//! neu eingelesen werden (CLI-Kommando "reload"). Alle Felder haben
//! Standardwerte, sodass der Server ohne Konfigurationsdatei laeuft.

use serde::{Deserialize, Serialize};

/// Positionierungsmodus des Servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PositionierungsTyp {
    /// Alle Teilnehmer sehen einander; Sichtbarkeit wird beim Login
    /// automatisch gegenseitig gesetzt
    #[default]
    Offen,
    /// Sichtbarkeit kommt ausschliesslich vom Integrations-Kanal
    ServerGesteuert,
}

impl PositionierungsTyp {
    /// Byte-Wert fuer die InfoResponse
    pub fn als_byte(&self) -> u8 {
        match self {
            Self::Offen => 0,
            Self::ServerGesteuert => 1,
        }
    }
}

/// Vollstaendige Server-Eigenschaften
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEigenschaften {
    /// UDP-Port des Voice-Transports
    pub port: u16,
    /// Maximale Anzahl gleichzeitiger Clients
    pub max_clients: u32,
    /// Message of the day (InfoResponse)
    pub motd: String,
    /// Positionierungsmodus
    pub positionierung: PositionierungsTyp,
    /// Sprachkennung fuer lokalisierte Servermeldungen
    pub sprache: String,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

impl Default for ServerEigenschaften {
    fn default() -> Self {
        Self {
            port: 9050,
            max_clients: 128,
            motd: "Earshot Server".into(),
            positionierung: PositionierungsTyp::default(),
            sprache: "de".into(),
            logging: LoggingEinstellungen::default(),
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerEigenschaften {
    /// Laedt die Eigenschaften aus einer TOML-Datei.
    /// Gibt die Standardwerte zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let eigenschaften: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(eigenschaften)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Vollstaendige UDP-Bind-Adresse
    pub fn bind_adresse(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}
