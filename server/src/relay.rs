//! Relay-Server: Login-Gate und Sichtbarkeits-Fanout
//!
//! Nimmt Peers an (begrenzt durch `max_clients`), haelt pro Peer eine
//! `SecuritySession` und verteilt Audio an die Sichtbarkeits-Menge des
//! Senders. Control-Aenderungen laufen als typisierte Ereignisse ueber
//! die Schlange und werden im Tick deterministisch gefannt:
//!
//! ```text
//! Transport-Ereignisse --> login / dispatch --> EreignisSchlange
//!                                         \--> Audio-Fanout (Sequenced)
//! Tick-Ende: Schlange entleeren --> Control-Fanout (ReliableOrdered)
//! ```
//!
//! Sendefehler an einen Peer sind isoliert; der Fanout an die uebrigen
//! laeuft weiter. Die Sichtbarkeits-Mengen pflegt ein externer
//! Integrations-Kanal ueber `sichtbarkeit_setzen`; im offenen
//! Positionierungsmodus setzt der Login gegenseitige Sichtbarkeit
//! automatisch.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use earshot_core::konstanten::TICK_MS;
use earshot_core::types::{EntityId, PeerId, RequestId, TrennungsGrund, Version, PROTOKOLL_VERSION};
use earshot_core::EarshotError;
use earshot_crypto::SecuritySession;
use earshot_protocol::paket::Paket;
use earshot_protocol::transport::{ServerTransport, TransportEreignis, Zustellung};
use earshot_voice::pool::ObjektPool;

use crate::config::{PositionierungsTyp, ServerEigenschaften};
use crate::entitaeten::EntityTabelle;
use crate::ereignisse::{EigenschaftsKlasse, EreignisSchlange, ServerEreignis};

// ---------------------------------------------------------------------------
// RelayServer
// ---------------------------------------------------------------------------

/// Der Relay-Kern des Servers
pub struct RelayServer {
    eigenschaften: Mutex<ServerEigenschaften>,
    transport: Arc<dyn ServerTransport>,
    welt: Mutex<EntityTabelle>,
    /// Transport-Peer -> Entitaet
    peers: DashMap<u64, EntityId>,
    ereignisse: EreignisSchlange,
    /// Wiederverwendbare Puffer fuer die Fanout-Datagramme
    puffer_pool: ObjektPool<Vec<u8>>,
}

impl RelayServer {
    /// Erstellt einen Relay ueber dem gegebenen Transport
    pub fn neu(eigenschaften: ServerEigenschaften, transport: Arc<dyn ServerTransport>) -> Self {
        Self {
            eigenschaften: Mutex::new(eigenschaften),
            transport,
            welt: Mutex::new(EntityTabelle::neu()),
            peers: DashMap::new(),
            ereignisse: EreignisSchlange::neu(),
            puffer_pool: ObjektPool::neu(Vec::new, Vec::clear),
        }
    }

    /// Anzahl angemeldeter Clients
    pub fn client_anzahl(&self) -> usize {
        self.peers.len()
    }

    /// Laedt die Server-Eigenschaften neu (CLI-Kommando "reload")
    pub fn eigenschaften_neu_laden(&self, neue: ServerEigenschaften) {
        tracing::info!(
            port = neue.port,
            max_clients = neue.max_clients,
            "Server-Eigenschaften neu geladen"
        );
        *self.eigenschaften.lock() = neue;
    }

    /// Setzt, ob `empfaenger` das Audio von `sender` erhalten darf
    ///
    /// Schnittstelle fuer den Integrations-Kanal; der Relay konsultiert
    /// die Menge nur.
    pub fn sichtbarkeit_setzen(&self, sender: EntityId, empfaenger: EntityId, sichtbar: bool) {
        let mut welt = self.welt.lock();
        if let Some(e) = welt.holen_mut(sender) {
            if sichtbar {
                e.sichtbare.insert(empfaenger.roh());
            } else {
                e.sichtbare.remove(&empfaenger.roh());
            }
        }
    }

    /// Setzt Position und Blickrichtung einer Entitaet
    ///
    /// Schnittstelle fuer den Integrations-Kanal (serverseitig bewegte
    /// Entitaeten); Aenderungen werden an die Sichtbarkeits-Menge der
    /// Entitaet verteilt. Clients aktualisieren ihre Raumdaten implizit
    /// ueber die Flags ihrer Audio-Frames.
    pub fn transform_setzen(&self, id: EntityId, position: [f32; 3], rotation: [f32; 2]) {
        let mut welt = self.welt.lock();
        if let Some(e) = welt.holen_mut(id) {
            if e.position != position || e.rotation != rotation {
                e.position = position;
                e.rotation = rotation;
                self.ereignisse
                    .melden(ServerEreignis::TransformGeaendert { id });
            }
        }
    }

    /// Setzt die Integrations-Bitmaske einer Entitaet
    ///
    /// Schnittstelle fuer den Integrations-Kanal; Aenderungen werden als
    /// Identitaets-Eigenschaft an alle Peers verteilt.
    pub fn bitmaske_setzen(&self, id: EntityId, bitmaske: u32) {
        let mut welt = self.welt.lock();
        if let Some(e) = welt.holen_mut(id) {
            if e.bitmaske != bitmaske {
                e.bitmaske = bitmaske;
                self.ereignisse
                    .melden(ServerEreignis::BitmaskeGeaendert { id });
            }
        }
    }

    /// Startet die Server-Hauptschleife als Task
    pub fn tick_task_starten(
        self: &Arc<Self>,
    ) -> (tokio::task::JoinHandle<()>, oneshot::Sender<()>) {
        let relay = Arc::clone(self);
        let (stopp_tx, mut stopp_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut intervall = tokio::time::interval(Duration::from_millis(TICK_MS));
            intervall.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = intervall.tick() => relay.tick(),
                    _ = &mut stopp_rx => break,
                }
            }
        });
        (handle, stopp_tx)
    }

    /// Ein Durchlauf der Hauptschleife
    pub fn tick(&self) {
        for ereignis in self.transport.abrufen() {
            match ereignis {
                TransportEreignis::Verbunden { peer, hello } => {
                    self.login_verarbeiten(peer, &hello);
                }
                TransportEreignis::Getrennt { peer, grund } => {
                    tracing::info!(peer = %peer, grund = %grund, "Peer getrennt");
                    self.peer_entfernen(peer);
                }
                TransportEreignis::Daten { peer, daten } => {
                    self.datagramm_verarbeiten(peer, &daten);
                }
                TransportEreignis::Unverbunden { peer, daten } => {
                    self.probe_verarbeiten(peer, &daten);
                }
            }
        }
        self.ereignisse_abarbeiten();
    }

    // -----------------------------------------------------------------------
    // Login
    // -----------------------------------------------------------------------

    /// Verarbeitet die Verbindungs-Payload eines neuen Peers
    fn login_verarbeiten(&self, peer: PeerId, hello: &[u8]) {
        let login = match Paket::dekodieren(hello) {
            Ok(Paket::LoginRequest {
                anfrage,
                version,
                name,
                public_key,
            }) => (anfrage, version, name, public_key),
            Ok(andere) => {
                tracing::warn!(peer = %peer, typ = ?andere.typ(), "Hello ohne LoginRequest");
                self.transport
                    .trennen(peer, TrennungsGrund::Rejected.bezeichner());
                return;
            }
            Err(e) => {
                tracing::warn!(peer = %peer, fehler = %e, "Ungueltige Hello-Payload");
                self.transport
                    .trennen(peer, TrennungsGrund::Rejected.bezeichner());
                return;
            }
        };
        let (anfrage, version, name, public_key) = login;

        if let Err(fehler) = self.login_pruefen(&version) {
            tracing::info!(peer = %peer, fehler = %fehler, "Login abgelehnt");
            let grund = match fehler {
                EarshotError::VersionsKonflikt { .. } => TrennungsGrund::IncompatibleVersion,
                EarshotError::ServerVoll => TrennungsGrund::ServerFull,
                _ => TrennungsGrund::Rejected,
            };
            self.ablehnen(peer, anfrage, grund);
            return;
        }

        // Peer-Schluessel importieren und Session etablieren
        let session = Arc::new(SecuritySession::neu());
        let server_pub = session.oeffentlicher_schluessel().to_vec();
        if let Err(e) = session.handshake_abschliessen(&public_key) {
            tracing::warn!(peer = %peer, fehler = %e, "Handshake fehlgeschlagen");
            self.ablehnen(peer, anfrage, TrennungsGrund::Rejected);
            return;
        }

        let id = {
            let mut welt = self.welt.lock();
            let id = welt.erstellen(name.clone(), Some(peer), Some(session));

            // Offener Modus: gegenseitige Sichtbarkeit mit allen Peers
            if self.eigenschaften.lock().positionierung == PositionierungsTyp::Offen {
                let andere: Vec<EntityId> =
                    welt.ids().into_iter().filter(|&a| a != id).collect();
                for anderer in andere {
                    if let Some(e) = welt.holen_mut(anderer) {
                        if e.ist_netzwerk() && e.sichtbar {
                            e.sichtbare.insert(id.roh());
                        }
                    }
                    if let Some(e) = welt.holen_mut(id) {
                        e.sichtbare.insert(anderer.roh());
                    }
                }
            }
            id
        };
        self.peers.insert(peer.0, id);

        let accept = Paket::AcceptResponse {
            anfrage,
            entity_id: id,
            public_key: server_pub,
        };
        self.senden_reliable(peer, &accept);

        // Bestand an den Neuling spielen: Erstellung vor jedem Zustand
        self.bestand_senden(peer, id);

        self.ereignisse.melden(ServerEreignis::Erstellt { id });
        tracing::info!(peer = %peer, entity = %id, name = %name, "Client angemeldet");
    }

    /// Prueft die Zulassungsbedingungen eines Logins
    ///
    /// Versions-Gate: Major und Minor muessen uebereinstimmen.
    fn login_pruefen(&self, version: &Version) -> earshot_core::Result<()> {
        if !PROTOKOLL_VERSION.kompatibel_mit(version) {
            return Err(EarshotError::VersionsKonflikt {
                lokal: PROTOKOLL_VERSION,
                entfernt: *version,
            });
        }
        if self.peers.len() >= self.eigenschaften.lock().max_clients as usize {
            return Err(EarshotError::ServerVoll);
        }
        Ok(())
    }

    /// Lehnt einen Login mit typisiertem Grund ab und trennt den Peer
    fn ablehnen(&self, peer: PeerId, anfrage: RequestId, grund: TrennungsGrund) {
        let deny = Paket::DenyResponse {
            anfrage,
            grund: grund.bezeichner().to_string(),
        };
        self.senden_reliable(peer, &deny);
        self.transport.trennen(peer, grund.bezeichner());
    }

    /// Schickt dem Neuling alle bestehenden Entitaeten samt Zustand
    fn bestand_senden(&self, peer: PeerId, eigene_id: EntityId) {
        let pakete: Vec<Paket> = {
            let welt = self.welt.lock();
            welt.ids()
                .into_iter()
                .filter(|&id| id != eigene_id)
                .filter_map(|id| welt.holen(id))
                .flat_map(|e| {
                    let mut pakete = vec![Paket::EntityCreated {
                        entity_id: e.id,
                        name: e.name.clone(),
                    }];
                    if e.stumm {
                        pakete.push(Paket::EntityMute {
                            entity_id: e.id,
                            stumm: true,
                        });
                    }
                    if e.taub {
                        pakete.push(Paket::EntityDeafen {
                            entity_id: e.id,
                            taub: true,
                        });
                    }
                    if e.bitmaske != 0 {
                        pakete.push(Paket::EntityBitmask {
                            entity_id: e.id,
                            bitmaske: e.bitmaske,
                        });
                    }
                    pakete
                })
                .collect()
        };
        for paket in &pakete {
            self.senden_reliable(peer, paket);
        }
    }

    // -----------------------------------------------------------------------
    // Empfang & Dispatch
    // -----------------------------------------------------------------------

    /// Beantwortet eine verbindungslose Info-Probe
    fn probe_verarbeiten(&self, peer: PeerId, daten: &[u8]) {
        match Paket::dekodieren(daten) {
            Ok(Paket::InfoRequest { anfrage }) => {
                let antwort = self.info_antwort(anfrage);
                if let Ok(bytes) = antwort.kodieren() {
                    if let Err(e) = self.transport.senden(peer, &bytes, Zustellung::Unconnected) {
                        tracing::debug!(peer = %peer, fehler = %e, "Info-Antwort nicht zustellbar");
                    }
                }
            }
            Ok(andere) => {
                tracing::debug!(peer = %peer, typ = ?andere.typ(), "Unerwartete Probe");
            }
            Err(e) => {
                tracing::debug!(peer = %peer, fehler = %e, "Ungueltige Probe");
            }
        }
    }

    fn info_antwort(&self, anfrage: RequestId) -> Paket {
        let eigenschaften = self.eigenschaften.lock();
        Paket::InfoResponse {
            anfrage,
            motd: eigenschaften.motd.clone(),
            clients: self.peers.len() as u16,
            max_clients: eigenschaften.max_clients as u16,
            positionierung: eigenschaften.positionierung.als_byte(),
        }
    }

    /// Verarbeitet ein Datagramm eines angemeldeten Peers
    ///
    /// Dekodier- und Entschluesselungsfehler verwerfen das Datagramm und
    /// brechen die Session nie ab.
    fn datagramm_verarbeiten(&self, peer: PeerId, daten: &[u8]) {
        let id = match self.peers.get(&peer.0) {
            Some(eintrag) => *eintrag,
            None => {
                tracing::debug!(peer = %peer, "Datagramm von unbekanntem Peer");
                return;
            }
        };

        let paket = match Paket::dekodieren(daten) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(peer = %peer, fehler = %e, "Ungueltiges Datagramm");
                return;
            }
        };

        match paket {
            Paket::EncryptedEnvelope { iv, tag, chiffrat } => {
                let session = {
                    let welt = self.welt.lock();
                    welt.holen(id).and_then(|e| e.session.clone())
                };
                let Some(session) = session else { return };
                let klartext = match session.entschluesseln(&iv, &tag, &chiffrat) {
                    Ok(k) => k,
                    Err(e) => {
                        tracing::debug!(peer = %peer, fehler = %e, "Entschluesselung verworfen");
                        return;
                    }
                };
                // Pro Datagramm genau eine Verschluesselungsschicht
                match Paket::dekodieren_inner(&klartext) {
                    Ok(inneres) => self.paket_verteilen(id, peer, inneres),
                    Err(e) => {
                        tracing::debug!(peer = %peer, fehler = %e, "Inneres Paket verworfen");
                    }
                }
            }
            direkt => self.paket_verteilen(id, peer, direkt),
        }
    }

    fn paket_verteilen(&self, id: EntityId, peer: PeerId, paket: Paket) {
        match paket {
            Paket::AdvancedAudio {
                sequenz,
                lautheit,
                position,
                rotation,
                nutzdaten,
                ..
            } => {
                self.audio_weiterleiten(id, sequenz, lautheit, position, rotation, nutzdaten);
            }
            Paket::Audio {
                sequenz, nutzdaten, ..
            } => {
                self.audio_weiterleiten(id, sequenz, 0.0, None, None, nutzdaten);
            }
            Paket::SetName { name } => {
                if let Some(e) = self.welt.lock().holen_mut(id) {
                    e.name = name;
                }
                self.ereignisse.melden(ServerEreignis::NameGeaendert { id });
            }
            Paket::SetMute { stumm } => {
                if let Some(e) = self.welt.lock().holen_mut(id) {
                    e.stumm = stumm;
                }
                self.ereignisse.melden(ServerEreignis::StummGeaendert { id });
            }
            Paket::SetDeafen { taub } => {
                if let Some(e) = self.welt.lock().holen_mut(id) {
                    e.taub = taub;
                }
                self.ereignisse.melden(ServerEreignis::TaubGeaendert { id });
            }
            Paket::SetTitle { titel } => {
                if let Some(e) = self.welt.lock().holen_mut(id) {
                    e.titel = titel;
                }
            }
            Paket::SetDescription { beschreibung } => {
                if let Some(e) = self.welt.lock().holen_mut(id) {
                    e.beschreibung = beschreibung;
                }
            }
            Paket::SetEntityVisibility { sichtbar } => {
                self.entitaets_sichtbarkeit_setzen(id, sichtbar);
            }
            Paket::InfoRequest { anfrage } => {
                let antwort = self.info_antwort(anfrage);
                self.senden_reliable(peer, &antwort);
            }
            Paket::LogoutRequest => {
                tracing::info!(peer = %peer, entity = %id, "Abmeldung");
                self.peer_entfernen(peer);
                self.transport
                    .trennen(peer, TrennungsGrund::Closed.bezeichner());
            }
            andere => {
                tracing::debug!(peer = %peer, typ = ?andere.typ(), "Unerwartetes Paket verworfen");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Audio-Fanout
    // -----------------------------------------------------------------------

    /// Leitet einen Audio-Frame an die Sichtbarkeits-Menge weiter
    ///
    /// Der Frame wird einmal als Klartext kodiert und pro Empfaenger mit
    /// dessen Session verschluesselt (jeder Peer hat eigene Schluessel).
    fn audio_weiterleiten(
        &self,
        absender: EntityId,
        sequenz: u16,
        lautheit: f32,
        position: Option<[f32; 3]>,
        rotation: Option<[f32; 2]>,
        nutzdaten: Vec<u8>,
    ) {
        // Empfaenger unter dem Welt-Lock einsammeln, ohne darunter zu senden
        let (ziele, transform_geaendert): (Vec<(PeerId, Arc<SecuritySession>)>, bool) = {
            let mut welt = self.welt.lock();
            let Some(e) = welt.holen_mut(absender) else {
                return;
            };
            if e.stumm {
                return;
            }
            // Raumdaten des Senders aus den Flags uebernehmen
            let mut transform_geaendert = false;
            if let Some(p) = position {
                if e.position != p {
                    e.position = p;
                    transform_geaendert = true;
                }
            }
            if let Some(r) = rotation {
                if e.rotation != r {
                    e.rotation = r;
                    transform_geaendert = true;
                }
            }
            let sichtbare: Vec<i32> = e.sichtbare.iter().copied().collect();

            let ziele = sichtbare
                .into_iter()
                .filter_map(|roh| welt.holen(EntityId(roh)))
                .filter(|ziel| ziel.ist_netzwerk() && !ziel.taub)
                .filter_map(|ziel| {
                    Some((ziel.peer?, Arc::clone(ziel.session.as_ref()?)))
                })
                .collect();
            (ziele, transform_geaendert)
        };

        // Geaenderte Raumdaten laufen als Ereignis an die Sichtbaren
        if transform_geaendert {
            self.ereignisse
                .melden(ServerEreignis::TransformGeaendert { id: absender });
        }

        if ziele.is_empty() {
            return;
        }

        // Ausgehendes Paket mit der Absender-ID neu stempeln
        let weiter = Paket::AdvancedAudio {
            entity_id: absender,
            sequenz,
            lautheit,
            position,
            rotation,
            nutzdaten,
        };
        let klartext = match weiter.kodieren() {
            Ok(k) => k,
            Err(e) => {
                tracing::debug!(fehler = %e, "Audio-Frame nicht kodierbar");
                return;
            }
        };

        let mut weitergeleitet = 0usize;
        for (peer, session) in ziele {
            // Fehler pro Empfaenger isolieren: ein kaputter Peer stoppt
            // den Fanout an die uebrigen nicht
            let rahmen = match session.verschluesseln(&klartext) {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(peer = %peer, fehler = %e, "Verschluesselung fehlgeschlagen");
                    continue;
                }
            };
            let umschlag = Paket::EncryptedEnvelope {
                iv: rahmen.iv,
                tag: rahmen.tag,
                chiffrat: rahmen.chiffrat,
            };
            let mut bytes = self.puffer_pool.holen();
            if umschlag.kodieren_in(&mut bytes).is_err() {
                self.puffer_pool.zurueckgeben(bytes);
                continue;
            }
            match self.transport.senden(peer, &bytes, Zustellung::Sequenced) {
                Ok(()) => weitergeleitet += 1,
                Err(e) => {
                    tracing::debug!(peer = %peer, fehler = %e, "Audio-Zustellung fehlgeschlagen");
                }
            }
            self.puffer_pool.zurueckgeben(bytes);
        }

        tracing::trace!(
            absender = %absender,
            sequenz,
            empfaenger = weitergeleitet,
            "Audio-Frame weitergeleitet"
        );
    }

    // -----------------------------------------------------------------------
    // Control-Fanout
    // -----------------------------------------------------------------------

    /// Entleert die Ereignisschlange und fuehrt den Fanout aus
    fn ereignisse_abarbeiten(&self) {
        for ereignis in self.ereignisse.entleeren() {
            let id = ereignis.id();
            let paket = self.ereignis_paket(ereignis);
            let Some(paket) = paket else { continue };

            let ziele: Vec<PeerId> = {
                let welt = self.welt.lock();
                match ereignis.klasse() {
                    // Identitaets-Eigenschaften an alle anderen Peers
                    EigenschaftsKlasse::Identitaet => welt
                        .ids()
                        .into_iter()
                        .filter(|&andere| andere != id)
                        .filter_map(|andere| welt.holen(andere))
                        .filter_map(|e| e.peer)
                        .collect(),
                    // Raeumliche Eigenschaften nur an die Sichtbaren
                    EigenschaftsKlasse::Raeumlich => welt
                        .holen(id)
                        .map(|e| {
                            e.sichtbare
                                .iter()
                                .filter_map(|&roh| welt.holen(EntityId(roh)))
                                .filter_map(|ziel| ziel.peer)
                                .collect()
                        })
                        .unwrap_or_default(),
                }
            };

            for peer in ziele {
                self.senden_reliable(peer, &paket);
            }
        }
    }

    /// Baut das Fanout-Paket zu einem Ereignis aus dem aktuellen Zustand
    fn ereignis_paket(&self, ereignis: ServerEreignis) -> Option<Paket> {
        let id = ereignis.id();
        if let ServerEreignis::Entfernt { .. } = ereignis {
            return Some(Paket::EntityDestroyed { entity_id: id });
        }

        let welt = self.welt.lock();
        let e = welt.holen(id)?;
        let paket = match ereignis {
            ServerEreignis::Erstellt { .. } => Paket::EntityCreated {
                entity_id: id,
                name: e.name.clone(),
            },
            ServerEreignis::NameGeaendert { .. } => Paket::EntityName {
                entity_id: id,
                name: e.name.clone(),
            },
            ServerEreignis::StummGeaendert { .. } => Paket::EntityMute {
                entity_id: id,
                stumm: e.stumm,
            },
            ServerEreignis::TaubGeaendert { .. } => Paket::EntityDeafen {
                entity_id: id,
                taub: e.taub,
            },
            ServerEreignis::BitmaskeGeaendert { .. } => Paket::EntityBitmask {
                entity_id: id,
                bitmaske: e.bitmaske,
            },
            ServerEreignis::TransformGeaendert { .. } => Paket::EntityTransform {
                entity_id: id,
                position: e.position,
                rotation: e.rotation,
            },
            ServerEreignis::Entfernt { .. } => unreachable!("oben behandelt"),
        };
        Some(paket)
    }

    // -----------------------------------------------------------------------
    // Lebenszyklus & Hilfsfunktionen
    // -----------------------------------------------------------------------

    /// Entfernt den Peer samt Entitaet und meldet das Ereignis
    fn peer_entfernen(&self, peer: PeerId) {
        if let Some((_, id)) = self.peers.remove(&peer.0) {
            let entfernt = self.welt.lock().entfernen(id);
            if let Some(entitaet) = entfernt {
                if let Some(session) = entitaet.session {
                    session.schliessen();
                }
            }
            self.ereignisse.melden(ServerEreignis::Entfernt { id });
        }
    }

    /// Nimmt eine Entitaet aus dem Sichtbarkeits-System bzw. zurueck
    fn entitaets_sichtbarkeit_setzen(&self, id: EntityId, sichtbar: bool) {
        let mut welt = self.welt.lock();
        let alle = welt.ids();
        if let Some(e) = welt.holen_mut(id) {
            e.sichtbar = sichtbar;
            if !sichtbar {
                e.sichtbare.clear();
            }
        }
        if !sichtbar {
            for andere in alle {
                if andere == id {
                    continue;
                }
                if let Some(e) = welt.holen_mut(andere) {
                    e.sichtbare.remove(&id.roh());
                }
            }
        } else if self.eigenschaften.lock().positionierung == PositionierungsTyp::Offen {
            for andere in alle {
                if andere == id {
                    continue;
                }
                let ist_netzwerk = welt
                    .holen(andere)
                    .map(|e| e.ist_netzwerk() && e.sichtbar)
                    .unwrap_or(false);
                if !ist_netzwerk {
                    continue;
                }
                if let Some(e) = welt.holen_mut(andere) {
                    e.sichtbare.insert(id.roh());
                }
                if let Some(e) = welt.holen_mut(id) {
                    e.sichtbare.insert(andere.roh());
                }
            }
        }
    }

    /// Sendet ein Control-Paket zuverlaessig; Fehler werden isoliert
    fn senden_reliable(&self, peer: PeerId, paket: &Paket) {
        let bytes = match paket.kodieren() {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(fehler = %e, "Control-Paket nicht kodierbar");
                return;
            }
        };
        if let Err(e) = self
            .transport
            .senden(peer, &bytes, Zustellung::ReliableOrdered)
        {
            tracing::debug!(peer = %peer, fehler = %e, "Control-Zustellung fehlgeschlagen");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use earshot_protocol::transport::{ClientTransport, SchleifenClient, SchleifenNetz};

    struct TestClient {
        transport: SchleifenClient,
        session: SecuritySession,
        entity_id: Option<EntityId>,
    }

    impl TestClient {
        fn neu(netz: &SchleifenNetz) -> Self {
            Self {
                transport: netz.client_erstellen(),
                session: SecuritySession::neu(),
                entity_id: None,
            }
        }

        /// Schickt den Login und wertet nach `relay.tick()` die Antwort aus
        fn login_senden(&self, name: &str, version: Version) {
            let login = Paket::LoginRequest {
                anfrage: RequestId::neu(),
                version,
                name: name.into(),
                public_key: self.session.oeffentlicher_schluessel().to_vec(),
            };
            self.transport.verbinden(&login.kodieren().unwrap()).unwrap();
        }

        /// Entnimmt alle Pakete aus dem Posteingang
        fn pakete_abrufen(&self) -> Vec<Paket> {
            self.transport
                .abrufen()
                .into_iter()
                .filter_map(|e| match e {
                    TransportEreignis::Daten { daten, .. } => Paket::dekodieren(&daten).ok(),
                    _ => None,
                })
                .collect()
        }

        fn login_abschliessen(&mut self) {
            for paket in self.pakete_abrufen() {
                if let Paket::AcceptResponse {
                    entity_id,
                    public_key,
                    ..
                } = paket
                {
                    self.session.handshake_abschliessen(&public_key).unwrap();
                    self.entity_id = Some(entity_id);
                }
            }
        }

        /// Verschluesselt und verschickt einen Audio-Frame
        fn audio_senden(&self, sequenz: u16, nutzdaten: Vec<u8>) {
            let audio = Paket::AdvancedAudio {
                entity_id: self.entity_id.unwrap_or(EntityId(0)),
                sequenz,
                lautheit: 0.5,
                position: Some([1.0, 2.0, 3.0]),
                rotation: None,
                nutzdaten,
            };
            let rahmen = self
                .session
                .verschluesseln(&audio.kodieren().unwrap())
                .unwrap();
            let umschlag = Paket::EncryptedEnvelope {
                iv: rahmen.iv,
                tag: rahmen.tag,
                chiffrat: rahmen.chiffrat,
            };
            self.transport
                .senden(&umschlag.kodieren().unwrap(), Zustellung::Sequenced)
                .unwrap();
        }

        /// Entschluesselt empfangene Audio-Umschlaege
        fn audio_empfangen(&self) -> Vec<(EntityId, u16, Vec<u8>)> {
            self.pakete_abrufen()
                .into_iter()
                .filter_map(|paket| match paket {
                    Paket::EncryptedEnvelope { iv, tag, chiffrat } => {
                        let klartext = self.session.entschluesseln(&iv, &tag, &chiffrat).ok()?;
                        match Paket::dekodieren_inner(&klartext).ok()? {
                            Paket::AdvancedAudio {
                                entity_id,
                                sequenz,
                                nutzdaten,
                                ..
                            } => Some((entity_id, sequenz, nutzdaten)),
                            _ => None,
                        }
                    }
                    _ => None,
                })
                .collect()
        }
    }

    fn relay_bauen(netz: &SchleifenNetz, max_clients: u32) -> Arc<RelayServer> {
        let eigenschaften = ServerEigenschaften {
            max_clients,
            ..ServerEigenschaften::default()
        };
        Arc::new(RelayServer::neu(
            eigenschaften,
            Arc::new(netz.server_transport()),
        ))
    }

    #[test]
    fn login_wird_angenommen() {
        let netz = SchleifenNetz::neu();
        let relay = relay_bauen(&netz, 8);
        let mut client = TestClient::neu(&netz);

        client.login_senden("Alice", PROTOKOLL_VERSION);
        relay.tick();
        client.login_abschliessen();

        assert!(client.entity_id.is_some());
        assert!(client.session.ist_etabliert());
        assert_eq!(relay.client_anzahl(), 1);
    }

    #[test]
    fn inkompatible_version_abgelehnt() {
        let netz = SchleifenNetz::neu();
        let relay = relay_bauen(&netz, 8);
        let client = TestClient::neu(&netz);

        let falsche_version = Version {
            major: PROTOKOLL_VERSION.major + 1,
            minor: 0,
            build: 0,
        };
        client.login_senden("Alt", falsche_version);
        relay.tick();

        let ereignisse = client.transport.abrufen();
        let mut deny_grund = None;
        let mut getrennt_grund = None;
        for e in ereignisse {
            match e {
                TransportEreignis::Daten { daten, .. } => {
                    if let Ok(Paket::DenyResponse { grund, .. }) = Paket::dekodieren(&daten) {
                        deny_grund = Some(grund);
                    }
                }
                TransportEreignis::Getrennt { grund, .. } => getrennt_grund = Some(grund),
                _ => {}
            }
        }
        assert_eq!(
            deny_grund.as_deref(),
            Some("Earshot.DisconnectReason.IncompatibleVersion")
        );
        assert_eq!(
            getrennt_grund.as_deref(),
            Some("Earshot.DisconnectReason.IncompatibleVersion")
        );
        assert_eq!(relay.client_anzahl(), 0);
    }

    #[test]
    fn server_voll_abgelehnt() {
        let netz = SchleifenNetz::neu();
        let relay = relay_bauen(&netz, 1);

        let mut erster = TestClient::neu(&netz);
        erster.login_senden("Erster", PROTOKOLL_VERSION);
        relay.tick();
        erster.login_abschliessen();
        assert!(erster.entity_id.is_some());

        let zweiter = TestClient::neu(&netz);
        zweiter.login_senden("Zweiter", PROTOKOLL_VERSION);
        relay.tick();

        let pakete = zweiter.pakete_abrufen();
        assert!(pakete.iter().any(|p| matches!(
            p,
            Paket::DenyResponse { grund, .. }
                if grund == "Earshot.DisconnectReason.ServerFull"
        )));
        assert_eq!(relay.client_anzahl(), 1);
    }

    #[test]
    fn audio_fanout_an_sichtbare() {
        let netz = SchleifenNetz::neu();
        let relay = relay_bauen(&netz, 8);

        let mut alice = TestClient::neu(&netz);
        alice.login_senden("Alice", PROTOKOLL_VERSION);
        relay.tick();
        alice.login_abschliessen();

        let mut bob = TestClient::neu(&netz);
        bob.login_senden("Bob", PROTOKOLL_VERSION);
        relay.tick();
        bob.login_abschliessen();
        // Restliche Control-Pakete (EntityCreated) abraeumen
        alice.pakete_abrufen();

        alice.audio_senden(7, vec![0xAB; 40]);
        relay.tick();

        let bei_bob = bob.audio_empfangen();
        assert_eq!(bei_bob.len(), 1);
        let (absender, sequenz, nutzdaten) = &bei_bob[0];
        assert_eq!(*absender, alice.entity_id.unwrap(), "Neu gestempelte Absender-ID");
        assert_eq!(*sequenz, 7);
        assert_eq!(nutzdaten, &vec![0xAB; 40]);

        // Kein Echo an den Absender
        assert!(alice.audio_empfangen().is_empty());
    }

    #[test]
    fn taube_peers_empfangen_kein_audio() {
        let netz = SchleifenNetz::neu();
        let relay = relay_bauen(&netz, 8);

        let mut alice = TestClient::neu(&netz);
        alice.login_senden("Alice", PROTOKOLL_VERSION);
        relay.tick();
        alice.login_abschliessen();

        let mut bob = TestClient::neu(&netz);
        bob.login_senden("Bob", PROTOKOLL_VERSION);
        relay.tick();
        bob.login_abschliessen();

        // Bob schaltet sich taub (verschluesseltes Control-Paket)
        let taub = Paket::SetDeafen { taub: true };
        let rahmen = bob
            .session
            .verschluesseln(&taub.kodieren().unwrap())
            .unwrap();
        let umschlag = Paket::EncryptedEnvelope {
            iv: rahmen.iv,
            tag: rahmen.tag,
            chiffrat: rahmen.chiffrat,
        };
        bob.transport
            .senden(&umschlag.kodieren().unwrap(), Zustellung::ReliableOrdered)
            .unwrap();
        relay.tick();
        bob.pakete_abrufen();

        alice.audio_senden(1, vec![0x01; 20]);
        relay.tick();

        assert!(bob.audio_empfangen().is_empty(), "Tauber Peer bekommt nichts");
    }

    #[test]
    fn namensaenderung_erreicht_andere_peers() {
        let netz = SchleifenNetz::neu();
        let relay = relay_bauen(&netz, 8);

        let mut alice = TestClient::neu(&netz);
        alice.login_senden("Alice", PROTOKOLL_VERSION);
        relay.tick();
        alice.login_abschliessen();

        let mut bob = TestClient::neu(&netz);
        bob.login_senden("Bob", PROTOKOLL_VERSION);
        relay.tick();
        bob.login_abschliessen();
        alice.pakete_abrufen();

        let umbenennen = Paket::SetName {
            name: "Alice2".into(),
        };
        let rahmen = alice
            .session
            .verschluesseln(&umbenennen.kodieren().unwrap())
            .unwrap();
        let umschlag = Paket::EncryptedEnvelope {
            iv: rahmen.iv,
            tag: rahmen.tag,
            chiffrat: rahmen.chiffrat,
        };
        alice
            .transport
            .senden(&umschlag.kodieren().unwrap(), Zustellung::ReliableOrdered)
            .unwrap();
        relay.tick();

        let bei_bob = bob.pakete_abrufen();
        assert!(bei_bob.iter().any(|p| matches!(
            p,
            Paket::EntityName { entity_id, name }
                if *entity_id == alice.entity_id.unwrap() && name == "Alice2"
        )));
    }

    #[test]
    fn logout_entfernt_entitaet_und_informiert() {
        let netz = SchleifenNetz::neu();
        let relay = relay_bauen(&netz, 8);

        let mut alice = TestClient::neu(&netz);
        alice.login_senden("Alice", PROTOKOLL_VERSION);
        relay.tick();
        alice.login_abschliessen();

        let mut bob = TestClient::neu(&netz);
        bob.login_senden("Bob", PROTOKOLL_VERSION);
        relay.tick();
        bob.login_abschliessen();

        alice
            .transport
            .senden(
                &Paket::LogoutRequest.kodieren().unwrap(),
                Zustellung::ReliableOrdered,
            )
            .unwrap();
        relay.tick();

        assert_eq!(relay.client_anzahl(), 1);
        let bei_bob = bob.pakete_abrufen();
        assert!(bei_bob.iter().any(|p| matches!(
            p,
            Paket::EntityDestroyed { entity_id } if *entity_id == alice.entity_id.unwrap()
        )));
    }

    #[test]
    fn info_probe_wird_beantwortet() {
        let netz = SchleifenNetz::neu();
        let relay = relay_bauen(&netz, 8);
        let client = TestClient::neu(&netz);

        let anfrage = RequestId::neu();
        let probe = Paket::InfoRequest { anfrage };
        client
            .transport
            .senden(&probe.kodieren().unwrap(), Zustellung::Unconnected)
            .unwrap();
        relay.tick();

        let pakete = client.pakete_abrufen();
        match &pakete[0] {
            Paket::InfoResponse {
                anfrage: echo,
                motd,
                clients,
                max_clients,
                ..
            } => {
                assert_eq!(*echo, anfrage);
                assert_eq!(motd, "Earshot Server");
                assert_eq!(*clients, 0);
                assert_eq!(*max_clients, 8);
            }
            p => panic!("InfoResponse erwartet, bekam {:?}", p),
        }
    }

    #[test]
    fn sichtbarkeits_api_steuert_den_fanout() {
        let netz = SchleifenNetz::neu();
        let relay = relay_bauen(&netz, 8);

        let mut alice = TestClient::neu(&netz);
        alice.login_senden("Alice", PROTOKOLL_VERSION);
        relay.tick();
        alice.login_abschliessen();

        let mut bob = TestClient::neu(&netz);
        bob.login_senden("Bob", PROTOKOLL_VERSION);
        relay.tick();
        bob.login_abschliessen();
        alice.pakete_abrufen();

        // Integrations-Kanal nimmt Bob aus Alices Sichtbarkeit
        relay.sichtbarkeit_setzen(alice.entity_id.unwrap(), bob.entity_id.unwrap(), false);

        alice.audio_senden(1, vec![0xCC; 10]);
        relay.tick();
        assert!(bob.audio_empfangen().is_empty());

        // Und wieder hinein
        relay.sichtbarkeit_setzen(alice.entity_id.unwrap(), bob.entity_id.unwrap(), true);
        alice.audio_senden(2, vec![0xCC; 10]);
        relay.tick();
        assert_eq!(bob.audio_empfangen().len(), 1);
    }

    #[test]
    fn audio_raumdaten_verteilen_transform_an_sichtbare() {
        let netz = SchleifenNetz::neu();
        let relay = relay_bauen(&netz, 8);

        let mut alice = TestClient::neu(&netz);
        alice.login_senden("Alice", PROTOKOLL_VERSION);
        relay.tick();
        alice.login_abschliessen();

        let mut bob = TestClient::neu(&netz);
        bob.login_senden("Bob", PROTOKOLL_VERSION);
        relay.tick();
        bob.login_abschliessen();
        alice.pakete_abrufen();

        // Audio-Frame traegt Position [1,2,3] (siehe audio_senden)
        alice.audio_senden(1, vec![0x01; 10]);
        relay.tick();

        let bei_bob = bob.pakete_abrufen();
        assert!(
            bei_bob.iter().any(|p| matches!(
                p,
                Paket::EntityTransform { entity_id, position, .. }
                    if *entity_id == alice.entity_id.unwrap()
                        && *position == [1.0, 2.0, 3.0]
            )),
            "Bob muss Alices neue Raumdaten sehen"
        );
        // Der Absender bekommt den eigenen Transform nicht
        assert!(!alice
            .pakete_abrufen()
            .iter()
            .any(|p| matches!(p, Paket::EntityTransform { .. })));

        // Unveraenderte Raumdaten erzeugen kein weiteres Ereignis
        alice.audio_senden(2, vec![0x02; 10]);
        relay.tick();
        assert!(!bob
            .pakete_abrufen()
            .iter()
            .any(|p| matches!(p, Paket::EntityTransform { .. })));
    }

    #[test]
    fn transform_api_verteilt_an_sichtbare() {
        let netz = SchleifenNetz::neu();
        let relay = relay_bauen(&netz, 8);

        let mut alice = TestClient::neu(&netz);
        alice.login_senden("Alice", PROTOKOLL_VERSION);
        relay.tick();
        alice.login_abschliessen();

        let mut bob = TestClient::neu(&netz);
        bob.login_senden("Bob", PROTOKOLL_VERSION);
        relay.tick();
        bob.login_abschliessen();
        alice.pakete_abrufen();

        // Integrations-Kanal bewegt Alice serverseitig
        relay.transform_setzen(alice.entity_id.unwrap(), [5.0, 0.0, -1.5], [0.5, 0.25]);
        relay.tick();

        let bei_bob = bob.pakete_abrufen();
        assert!(bei_bob.iter().any(|p| matches!(
            p,
            Paket::EntityTransform { entity_id, position, rotation }
                if *entity_id == alice.entity_id.unwrap()
                    && *position == [5.0, 0.0, -1.5]
                    && *rotation == [0.5, 0.25]
        )));
    }

    #[test]
    fn bitmasken_aenderung_erreicht_alle_peers() {
        let netz = SchleifenNetz::neu();
        let relay = relay_bauen(&netz, 8);

        let mut alice = TestClient::neu(&netz);
        alice.login_senden("Alice", PROTOKOLL_VERSION);
        relay.tick();
        alice.login_abschliessen();

        let mut bob = TestClient::neu(&netz);
        bob.login_senden("Bob", PROTOKOLL_VERSION);
        relay.tick();
        bob.login_abschliessen();
        alice.pakete_abrufen();

        relay.bitmaske_setzen(alice.entity_id.unwrap(), 0x00FF_00AB);
        relay.tick();

        let bei_bob = bob.pakete_abrufen();
        assert!(bei_bob.iter().any(|p| matches!(
            p,
            Paket::EntityBitmask { entity_id, bitmaske }
                if *entity_id == alice.entity_id.unwrap() && *bitmaske == 0x00FF_00AB
        )));

        // Unveraenderte Maske erzeugt kein weiteres Paket
        relay.bitmaske_setzen(alice.entity_id.unwrap(), 0x00FF_00AB);
        relay.tick();
        assert!(!bob
            .pakete_abrufen()
            .iter()
            .any(|p| matches!(p, Paket::EntityBitmask { .. })));
    }
}
