//! UDP-Entwicklungs-Transport
//!
//! Bindet einen UDP-Socket und setzt die `ServerTransport`-Schnittstelle
//! direkt auf Datagramme um. Jedes Datagramm traegt ein Kennzeichen-Byte:
//!
//! ```text
//! 0xFF  HELLO  | hello-Payload          (Verbindungsaufbau)
//! 0xFE  BYE    | utf8-Grund             (Trennung)
//! 0x00..=0x03  Zustellklasse | [seq u32 BE bei Sequenced] | Payload
//! ```
//!
//! Sequenced wird mit Drop-Older-Semantik pro Peer umgesetzt. Die
//! zuverlaessigen Klassen sind hier Best-Effort: dieser Transport ist
//! fuer Entwicklung und LAN-Betrieb gedacht; produktiv wird eine echte
//! Datagramm-Bibliothek mit Retransmission hinter denselben Trait
//! gehaengt.
//!
//! ## Architektur
//! - Ein Empfangs-Task fuellt den Posteingang (vom Relay-Tick entleert).
//! - Ein Sende-Task pro Peer verhindert Head-of-Line-Blocking; volle
//!   Queues verwerfen (UDP-Semantik).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use earshot_core::types::PeerId;
use earshot_protocol::transport::{
    ServerTransport, TransportEreignis, TransportFehler, Zustellung,
};

/// Kennzeichen fuer Verbindungsaufbau
const KENNZEICHEN_HELLO: u8 = 0xFF;
/// Kennzeichen fuer Trennung
const KENNZEICHEN_BYE: u8 = 0xFE;

/// Maximale Datagramm-Groesse (Header + Voice-Payload + Reserve)
const UDP_PUFFER: usize = 1500;

/// Groesse der Sende-Queue pro Peer
const SENDE_QUEUE: usize = 128;

/// Halber u32-Raum fuer den Drop-Older-Vergleich
const HALBER_U32: u32 = u32::MAX / 2;

// ---------------------------------------------------------------------------
// PeerEintrag
// ---------------------------------------------------------------------------

struct PeerEintrag {
    addr: SocketAddr,
    sende_tx: mpsc::Sender<Vec<u8>>,
    /// Hoechste empfangene Sequenced-Nummer (Drop-Older)
    empfangs_seq: AtomicU32,
    /// Fortlaufende Sequenced-Nummer fuer ausgehende Datagramme
    sende_seq: AtomicU32,
    _sende_task: tokio::task::JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// UdpTransport
// ---------------------------------------------------------------------------

/// UDP-Implementierung der Server-Transport-Grenze
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    posteingang: Arc<Mutex<VecDeque<TransportEreignis>>>,
    peers: Arc<DashMap<u64, Arc<PeerEintrag>>>,
    adressen: Arc<DashMap<SocketAddr, u64>>,
    _empfangs_task: tokio::task::JoinHandle<()>,
}

impl UdpTransport {
    /// Bindet den Socket und startet den Empfangs-Task
    pub async fn binden(bind_adresse: &str) -> std::io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(bind_adresse).await?);
        tracing::info!(addr = %socket.local_addr()?, "UDP-Transport gebunden");

        let posteingang = Arc::new(Mutex::new(VecDeque::new()));
        let peers: Arc<DashMap<u64, Arc<PeerEintrag>>> = Arc::new(DashMap::new());
        let adressen: Arc<DashMap<SocketAddr, u64>> = Arc::new(DashMap::new());

        let empfangs_task = tokio::spawn(empfangs_schleife(
            Arc::clone(&socket),
            Arc::clone(&posteingang),
            Arc::clone(&peers),
            Arc::clone(&adressen),
        ));

        Ok(Self {
            socket,
            posteingang,
            peers,
            adressen,
            _empfangs_task: empfangs_task,
        })
    }

    /// Lokale Bind-Adresse
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl ServerTransport for UdpTransport {
    fn senden(
        &self,
        peer: PeerId,
        daten: &[u8],
        zustellung: Zustellung,
    ) -> Result<(), TransportFehler> {
        let eintrag = self
            .peers
            .get(&peer.0)
            .map(|e| Arc::clone(&e))
            .ok_or(TransportFehler::PeerUnbekannt(peer))?;

        let mut datagramm = Vec::with_capacity(daten.len() + 5);
        datagramm.push(zustellung as u8);
        if zustellung == Zustellung::Sequenced {
            let seq = eintrag.sende_seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            datagramm.extend_from_slice(&seq.to_be_bytes());
        }
        datagramm.extend_from_slice(daten);

        // Nicht-blockierend; volle Queue verwirft (UDP-Semantik)
        match eintrag.sende_tx.try_send(datagramm) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(peer = %peer, "Sende-Queue voll – Datagramm verworfen");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(TransportFehler::PeerUnbekannt(peer))
            }
        }
    }

    fn abrufen(&self) -> Vec<TransportEreignis> {
        self.posteingang.lock().drain(..).collect()
    }

    fn trennen(&self, peer: PeerId, grund: &str) {
        if let Some((_, eintrag)) = self.peers.remove(&peer.0) {
            self.adressen.remove(&eintrag.addr);
            let mut datagramm = Vec::with_capacity(grund.len() + 1);
            datagramm.push(KENNZEICHEN_BYE);
            datagramm.extend_from_slice(grund.as_bytes());
            let _ = eintrag.sende_tx.try_send(datagramm);
        }
    }
}

// ---------------------------------------------------------------------------
// Empfangs-Schleife
// ---------------------------------------------------------------------------

async fn empfangs_schleife(
    socket: Arc<UdpSocket>,
    posteingang: Arc<Mutex<VecDeque<TransportEreignis>>>,
    peers: Arc<DashMap<u64, Arc<PeerEintrag>>>,
    adressen: Arc<DashMap<SocketAddr, u64>>,
) {
    // Wiederverwendeter Empfangspuffer (kein Heap pro Datagramm)
    let mut puffer = [0u8; UDP_PUFFER];
    let naechster_peer = AtomicU64::new(1);

    loop {
        let (laenge, absender) = match socket.recv_from(&mut puffer).await {
            Ok(ergebnis) => ergebnis,
            Err(e) => {
                tracing::error!(fehler = %e, "UDP-Empfangsfehler");
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                continue;
            }
        };
        let daten = &puffer[..laenge];
        let Some((&kennzeichen, rest)) = daten.split_first() else {
            continue;
        };

        match kennzeichen {
            KENNZEICHEN_HELLO => {
                if adressen.contains_key(&absender) {
                    tracing::debug!(absender = %absender, "Doppeltes HELLO ignoriert");
                    continue;
                }
                let peer = PeerId(naechster_peer.fetch_add(1, Ordering::Relaxed));
                peer_registrieren(&socket, absender, peer, &peers, &adressen);
                posteingang.lock().push_back(TransportEreignis::Verbunden {
                    peer,
                    hello: rest.to_vec(),
                });
                tracing::info!(absender = %absender, peer = %peer, "Peer verbunden");
            }
            KENNZEICHEN_BYE => {
                if let Some((_, peer_id)) = adressen.remove(&absender) {
                    peers.remove(&peer_id);
                    posteingang.lock().push_back(TransportEreignis::Getrennt {
                        peer: PeerId(peer_id),
                        grund: String::from_utf8_lossy(rest).into_owned(),
                    });
                }
            }
            klasse => {
                let Some(zustellung) = Zustellung::from_u8(klasse) else {
                    tracing::debug!(absender = %absender, klasse, "Unbekannte Zustellklasse");
                    continue;
                };

                if zustellung == Zustellung::Unconnected {
                    // Info-Probes brauchen einen Antwortweg, aber keinen
                    // Verbindungszustand: fluechtigen Peer registrieren
                    let peer_id = match adressen.get(&absender) {
                        Some(eintrag) => PeerId(*eintrag),
                        None => {
                            let peer = PeerId(naechster_peer.fetch_add(1, Ordering::Relaxed));
                            peer_registrieren(&socket, absender, peer, &peers, &adressen);
                            peer
                        }
                    };
                    posteingang.lock().push_back(TransportEreignis::Unverbunden {
                        peer: peer_id,
                        daten: rest.to_vec(),
                    });
                    continue;
                }

                let Some(peer_id) = adressen.get(&absender).map(|e| *e) else {
                    tracing::debug!(absender = %absender, "Datagramm ohne HELLO verworfen");
                    continue;
                };
                let Some(eintrag) = peers.get(&peer_id).map(|e| Arc::clone(&e)) else {
                    continue;
                };

                let payload = if zustellung == Zustellung::Sequenced {
                    if rest.len() < 4 {
                        continue;
                    }
                    let seq = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
                    // Drop-Older: nur neuere Sequenzen passieren
                    let bisher = eintrag.empfangs_seq.load(Ordering::Relaxed);
                    let diff = seq.wrapping_sub(bisher);
                    if diff == 0 || diff > HALBER_U32 {
                        tracing::trace!(seq, bisher, "Sequenced: aelteres Datagramm verworfen");
                        continue;
                    }
                    eintrag.empfangs_seq.store(seq, Ordering::Relaxed);
                    &rest[4..]
                } else {
                    rest
                };

                posteingang.lock().push_back(TransportEreignis::Daten {
                    peer: PeerId(peer_id),
                    daten: payload.to_vec(),
                });
            }
        }
    }
}

/// Registriert einen Peer und startet seinen Sende-Task
fn peer_registrieren(
    socket: &Arc<UdpSocket>,
    addr: SocketAddr,
    peer: PeerId,
    peers: &DashMap<u64, Arc<PeerEintrag>>,
    adressen: &DashMap<SocketAddr, u64>,
) -> Arc<PeerEintrag> {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(SENDE_QUEUE);
    let sende_socket = Arc::clone(socket);
    let sende_task = tokio::spawn(async move {
        while let Some(datagramm) = rx.recv().await {
            if let Err(e) = sende_socket.send_to(&datagramm, addr).await {
                tracing::warn!(ziel = %addr, fehler = %e, "UDP-Sendefehler");
            }
        }
        tracing::debug!(ziel = %addr, "Sende-Task beendet");
    });

    let eintrag = Arc::new(PeerEintrag {
        addr,
        sende_tx: tx,
        empfangs_seq: AtomicU32::new(0),
        sende_seq: AtomicU32::new(0),
        _sende_task: sende_task,
    });
    peers.insert(peer.0, Arc::clone(&eintrag));
    adressen.insert(addr, peer.0);
    eintrag
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn transport_und_roh_client() -> (UdpTransport, UdpSocket, SocketAddr) {
        let transport = UdpTransport::binden("127.0.0.1:0").await.unwrap();
        let server_addr = transport.lokale_adresse().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (transport, client, server_addr)
    }

    async fn kurz_warten() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn hello_erzeugt_verbunden_ereignis() {
        let (transport, client, server_addr) = transport_und_roh_client().await;

        let mut hello = vec![KENNZEICHEN_HELLO];
        hello.extend_from_slice(b"login-bytes");
        client.send_to(&hello, server_addr).await.unwrap();
        kurz_warten().await;

        let ereignisse = transport.abrufen();
        assert!(matches!(
            &ereignisse[0],
            TransportEreignis::Verbunden { hello, .. } if hello == b"login-bytes"
        ));
    }

    #[tokio::test]
    async fn daten_nach_hello_werden_zugestellt() {
        let (transport, client, server_addr) = transport_und_roh_client().await;

        client
            .send_to(&[KENNZEICHEN_HELLO], server_addr)
            .await
            .unwrap();
        kurz_warten().await;
        transport.abrufen();

        let mut datagramm = vec![Zustellung::ReliableOrdered as u8];
        datagramm.extend_from_slice(b"control");
        client.send_to(&datagramm, server_addr).await.unwrap();
        kurz_warten().await;

        let ereignisse = transport.abrufen();
        assert!(matches!(
            &ereignisse[0],
            TransportEreignis::Daten { daten, .. } if daten == b"control"
        ));
    }

    #[tokio::test]
    async fn daten_ohne_hello_werden_verworfen() {
        let (transport, client, server_addr) = transport_und_roh_client().await;

        let mut datagramm = vec![Zustellung::Unreliable as u8];
        datagramm.extend_from_slice(b"verirrt");
        client.send_to(&datagramm, server_addr).await.unwrap();
        kurz_warten().await;

        assert!(transport.abrufen().is_empty());
    }

    #[tokio::test]
    async fn sequenced_verwirft_aeltere() {
        let (transport, client, server_addr) = transport_und_roh_client().await;
        client
            .send_to(&[KENNZEICHEN_HELLO], server_addr)
            .await
            .unwrap();
        kurz_warten().await;
        transport.abrufen();

        let sequenced = |seq: u32, inhalt: &[u8]| {
            let mut d = vec![Zustellung::Sequenced as u8];
            d.extend_from_slice(&seq.to_be_bytes());
            d.extend_from_slice(inhalt);
            d
        };

        client.send_to(&sequenced(1, b"eins"), server_addr).await.unwrap();
        client.send_to(&sequenced(3, b"drei"), server_addr).await.unwrap();
        // Sequenz 2 kommt nach 3 an und muss verworfen werden
        client.send_to(&sequenced(2, b"zwei"), server_addr).await.unwrap();
        kurz_warten().await;

        let inhalte: Vec<Vec<u8>> = transport
            .abrufen()
            .into_iter()
            .filter_map(|e| match e {
                TransportEreignis::Daten { daten, .. } => Some(daten),
                _ => None,
            })
            .collect();
        assert_eq!(inhalte, vec![b"eins".to_vec(), b"drei".to_vec()]);
    }

    #[tokio::test]
    async fn senden_an_peer_und_bye() {
        let (transport, client, server_addr) = transport_und_roh_client().await;
        client
            .send_to(&[KENNZEICHEN_HELLO], server_addr)
            .await
            .unwrap();
        kurz_warten().await;

        let peer = match &transport.abrufen()[0] {
            TransportEreignis::Verbunden { peer, .. } => *peer,
            e => panic!("Verbunden erwartet, bekam {:?}", e),
        };

        transport
            .senden(peer, b"antwort", Zustellung::Unreliable)
            .unwrap();
        let mut puffer = [0u8; 64];
        let (laenge, _) = client.recv_from(&mut puffer).await.unwrap();
        assert_eq!(puffer[0], Zustellung::Unreliable as u8);
        assert_eq!(&puffer[1..laenge], b"antwort");

        // Trennung schickt BYE mit Grund
        transport.trennen(peer, "Earshot.DisconnectReason.Closed");
        let (laenge, _) = client.recv_from(&mut puffer).await.unwrap();
        assert_eq!(puffer[0], KENNZEICHEN_BYE);
        assert_eq!(&puffer[1..laenge], b"Earshot.DisconnectReason.Closed");

        // Peer ist entfernt
        assert!(transport
            .senden(peer, b"x", Zustellung::Unreliable)
            .is_err());
    }

    #[tokio::test]
    async fn unconnected_probe_ohne_verbindung() {
        let (transport, client, server_addr) = transport_und_roh_client().await;

        let mut probe = vec![Zustellung::Unconnected as u8];
        probe.extend_from_slice(b"info?");
        client.send_to(&probe, server_addr).await.unwrap();
        kurz_warten().await;

        let ereignisse = transport.abrufen();
        let peer = match &ereignisse[0] {
            TransportEreignis::Unverbunden { peer, daten } => {
                assert_eq!(daten, b"info?");
                *peer
            }
            e => panic!("Unverbunden erwartet, bekam {:?}", e),
        };

        // Antwortweg funktioniert ohne HELLO
        transport
            .senden(peer, b"info!", Zustellung::Unconnected)
            .unwrap();
        let mut puffer = [0u8; 64];
        let (laenge, _) = client.recv_from(&mut puffer).await.unwrap();
        assert_eq!(&puffer[1..laenge], b"info!");
    }
}
