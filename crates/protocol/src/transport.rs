//! Transport-Grenze zur Datagramm-Bibliothek
//!
//! Der Kern spricht nicht direkt mit Sockets, sondern mit diesen Traits.
//! Die eigentliche Zustellung (Verbindungsaufbau, Retransmission der
//! zuverlaessigen Klassen, MTU-Handling) ist Aufgabe der eingebetteten
//! Transportbibliothek. Hier definiert sind:
//!
//! - die vier Zustellklassen, die der Kern verwendet,
//! - die Ereignisse, die ein Transport beim Abrufen liefert,
//! - `SchleifenNetz`: ein In-Memory-Transport fuer Tests und Embedding
//!   (zuverlaessig und geordnet; die Klassen unterscheiden sich hier nur
//!   in der Absicht, nicht im Verhalten).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use earshot_core::types::PeerId;
use parking_lot::Mutex;
use thiserror::Error;

/// PeerId, unter der Clients den Server adressieren/sehen
pub const SERVER_PEER: PeerId = PeerId(0);

/// Maximale Anzahl gepufferter Ereignisse pro Posteingang
const POSTEINGANG_LIMIT: usize = 1024;

// ---------------------------------------------------------------------------
// Zustellklassen & Ereignisse
// ---------------------------------------------------------------------------

/// Zustellklasse eines Datagramms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Zustellung {
    /// Unzuverlaessig, ungeordnet – Voice-Frames Richtung Client
    Unreliable = 0,
    /// Unzuverlaessig, aber drop-older – Voice-Frames Richtung Server
    Sequenced = 1,
    /// Zuverlaessig und geordnet – Control-Pakete, Entitaets-Ereignisse
    ReliableOrdered = 2,
    /// Verbindungslos – Info-Probes
    Unconnected = 3,
}

impl Zustellung {
    /// Konvertiert ein Byte in eine Zustellklasse
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Unreliable),
            1 => Some(Self::Sequenced),
            2 => Some(Self::ReliableOrdered),
            3 => Some(Self::Unconnected),
            _ => None,
        }
    }
}

/// Ereignis aus der Transportschicht
#[derive(Debug, Clone)]
pub enum TransportEreignis {
    /// Neuer Peer verbunden; `hello` ist die Payload des Verbindungsaufbaus
    Verbunden { peer: PeerId, hello: Vec<u8> },
    /// Peer getrennt (freiwillig oder Timeout)
    Getrennt { peer: PeerId, grund: String },
    /// Datagramm eines verbundenen Peers
    Daten { peer: PeerId, daten: Vec<u8> },
    /// Verbindungsloses Datagramm (Info-Probe)
    Unverbunden { peer: PeerId, daten: Vec<u8> },
}

/// Fehler der Transportschicht
#[derive(Debug, Error)]
pub enum TransportFehler {
    #[error("Nicht verbunden")]
    NichtVerbunden,

    #[error("Unbekannter Peer: {0}")]
    PeerUnbekannt(PeerId),

    #[error("Transport geschlossen")]
    Geschlossen,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Client-Seite der Transport-Grenze
pub trait ClientTransport: Send + Sync {
    /// Baut die Verbindung auf; `hello` wird der Gegenseite als
    /// Verbindungs-Payload zugestellt
    fn verbinden(&self, hello: &[u8]) -> Result<(), TransportFehler>;

    /// Sendet ein Datagramm an den Server
    fn senden(&self, daten: &[u8], zustellung: Zustellung) -> Result<(), TransportFehler>;

    /// Entnimmt alle seit dem letzten Aufruf eingetroffenen Ereignisse
    fn abrufen(&self) -> Vec<TransportEreignis>;

    /// Letzter gemessener Ping zum Server in Millisekunden
    fn ping_ms(&self) -> Option<u32>;

    /// Trennt die Verbindung
    fn trennen(&self);
}

/// Server-Seite der Transport-Grenze
pub trait ServerTransport: Send + Sync {
    /// Sendet ein Datagramm an einen verbundenen Peer
    fn senden(
        &self,
        peer: PeerId,
        daten: &[u8],
        zustellung: Zustellung,
    ) -> Result<(), TransportFehler>;

    /// Entnimmt alle seit dem letzten Aufruf eingetroffenen Ereignisse
    fn abrufen(&self) -> Vec<TransportEreignis>;

    /// Trennt einen Peer mit Grund
    fn trennen(&self, peer: PeerId, grund: &str);
}

// ---------------------------------------------------------------------------
// SchleifenNetz – In-Memory-Transport
// ---------------------------------------------------------------------------

/// In-Memory-Nabe, die einen Server mit beliebig vielen Clients verbindet
///
/// Zustellung ist zuverlaessig und geordnet (Queues im Prozess); volle
/// Posteingaenge verwerfen wie UDP das neueste Datagramm.
#[derive(Clone)]
pub struct SchleifenNetz {
    inner: Arc<NetzInner>,
}

struct NetzInner {
    server_posteingang: Mutex<VecDeque<TransportEreignis>>,
    clients: Mutex<HashMap<u64, Arc<ClientEnde>>>,
    naechster_peer: AtomicU64,
}

struct ClientEnde {
    posteingang: Mutex<VecDeque<TransportEreignis>>,
    verbunden: AtomicBool,
}

impl SchleifenNetz {
    /// Erstellt eine neue leere Nabe
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(NetzInner {
                server_posteingang: Mutex::new(VecDeque::new()),
                clients: Mutex::new(HashMap::new()),
                // Peer 0 ist fuer den Server reserviert
                naechster_peer: AtomicU64::new(1),
            }),
        }
    }

    /// Gibt die Server-Seite der Nabe zurueck
    pub fn server_transport(&self) -> SchleifenServer {
        SchleifenServer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Erstellt einen neuen Client-Anschluss
    pub fn client_erstellen(&self) -> SchleifenClient {
        let peer = PeerId(self.inner.naechster_peer.fetch_add(1, Ordering::Relaxed));
        let ende = Arc::new(ClientEnde {
            posteingang: Mutex::new(VecDeque::new()),
            verbunden: AtomicBool::new(false),
        });
        self.inner.clients.lock().insert(peer.0, Arc::clone(&ende));
        SchleifenClient {
            inner: Arc::clone(&self.inner),
            peer,
            ende,
        }
    }
}

impl Default for SchleifenNetz {
    fn default() -> Self {
        Self::neu()
    }
}

fn einreihen(posteingang: &Mutex<VecDeque<TransportEreignis>>, ereignis: TransportEreignis) {
    let mut queue = posteingang.lock();
    if queue.len() >= POSTEINGANG_LIMIT {
        tracing::warn!("Posteingang voll – Datagramm verworfen");
        return;
    }
    queue.push_back(ereignis);
}

/// Client-Seite des `SchleifenNetz`
pub struct SchleifenClient {
    inner: Arc<NetzInner>,
    peer: PeerId,
    ende: Arc<ClientEnde>,
}

impl SchleifenClient {
    /// Transport-seitige Kennung dieses Clients
    pub fn peer_id(&self) -> PeerId {
        self.peer
    }
}

impl ClientTransport for SchleifenClient {
    fn verbinden(&self, hello: &[u8]) -> Result<(), TransportFehler> {
        self.ende.verbunden.store(true, Ordering::Release);
        einreihen(
            &self.inner.server_posteingang,
            TransportEreignis::Verbunden {
                peer: self.peer,
                hello: hello.to_vec(),
            },
        );
        Ok(())
    }

    fn senden(&self, daten: &[u8], zustellung: Zustellung) -> Result<(), TransportFehler> {
        if zustellung == Zustellung::Unconnected {
            einreihen(
                &self.inner.server_posteingang,
                TransportEreignis::Unverbunden {
                    peer: self.peer,
                    daten: daten.to_vec(),
                },
            );
            return Ok(());
        }
        if !self.ende.verbunden.load(Ordering::Acquire) {
            return Err(TransportFehler::NichtVerbunden);
        }
        einreihen(
            &self.inner.server_posteingang,
            TransportEreignis::Daten {
                peer: self.peer,
                daten: daten.to_vec(),
            },
        );
        Ok(())
    }

    fn abrufen(&self) -> Vec<TransportEreignis> {
        self.ende.posteingang.lock().drain(..).collect()
    }

    fn ping_ms(&self) -> Option<u32> {
        // In-Memory-Zustellung; der Messwert ist konstant minimal
        Some(1)
    }

    fn trennen(&self) {
        if self.ende.verbunden.swap(false, Ordering::AcqRel) {
            einreihen(
                &self.inner.server_posteingang,
                TransportEreignis::Getrennt {
                    peer: self.peer,
                    grund: "Client hat getrennt".into(),
                },
            );
        }
    }
}

/// Server-Seite des `SchleifenNetz`
pub struct SchleifenServer {
    inner: Arc<NetzInner>,
}

impl ServerTransport for SchleifenServer {
    fn senden(
        &self,
        peer: PeerId,
        daten: &[u8],
        _zustellung: Zustellung,
    ) -> Result<(), TransportFehler> {
        let ende = self
            .inner
            .clients
            .lock()
            .get(&peer.0)
            .cloned()
            .ok_or(TransportFehler::PeerUnbekannt(peer))?;
        einreihen(
            &ende.posteingang,
            TransportEreignis::Daten {
                peer: SERVER_PEER,
                daten: daten.to_vec(),
            },
        );
        Ok(())
    }

    fn abrufen(&self) -> Vec<TransportEreignis> {
        self.inner.server_posteingang.lock().drain(..).collect()
    }

    fn trennen(&self, peer: PeerId, grund: &str) {
        if let Some(ende) = self.inner.clients.lock().remove(&peer.0) {
            ende.verbunden.store(false, Ordering::Release);
            einreihen(
                &ende.posteingang,
                TransportEreignis::Getrennt {
                    peer: SERVER_PEER,
                    grund: grund.to_string(),
                },
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
