//! Session-Endpunkt des Clients
//!
//! Zustandsmaschine der Client-Seite:
//!
//! ```text
//! verbinden() --LoginRequest--> Server --AcceptResponse--> Verbunden
//!                                      --DenyResponse----> Getrennt(Grund)
//! ```
//!
//! Danach laufen zwei kooperierende Pfade:
//! - Die Poll-Schleife (`tick`, ~15 ms) entleert den Transport, packt
//!   verschluesselte Umschlaege aus und verteilt Pakete an Talker bzw.
//!   Anfragen-Register; dazu RTT/Bandbreiten-Pflege und die
//!   Sprech-Flanken-Erkennung.
//! - `audio_schreiben` nimmt Mikrofon-PCM entgegen, misst den Pegel,
//!   kodiert oberhalb der Empfindlichkeit und verschickt den Frame
//!   AEAD-verschluesselt mit Sequenced-Zustellung.
//!
//! Paketfehler im Empfangspfad werden geloggt und verworfen; sie brechen
//! die Session nie ab.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use earshot_core::konstanten::{MAX_ENCODED_BYTES, STILLE_SCHWELLE_MS, TICK_MS};
use earshot_core::types::{EntityId, RequestId, TrennungsGrund, PROTOKOLL_VERSION};
use earshot_crypto::SecuritySession;
use earshot_protocol::paket::Paket;
use earshot_protocol::seq::ist_neuer;
use earshot_protocol::transport::{ClientTransport, TransportEreignis, Zustellung};
use earshot_voice::decoder::{SprachDecoder, SprachEncoder};
use earshot_voice::jitter::JitterKonfig;
use earshot_voice::pool::BytePool;
use earshot_voice::stats::NetzwerkStatistik;
use earshot_voice::talker::{MonotonUhr, RemoteTalker};

use crate::anfragen::AnfragenRegister;
use crate::error::{ClientFehler, ClientResult};

/// Sentinel fuer "noch keine Audio-Aktivitaet"
const NIE: u64 = u64::MAX;

/// Intervall der Bandbreiten-Aktualisierung
const BANDBREITE_INTERVALL_MS: u64 = 100;

/// Standard-Empfindlichkeit des Pegel-Gates (normalisierter Peak)
const STANDARD_EMPFINDLICHKEIT: f32 = 0.05;

// ---------------------------------------------------------------------------
// Zustand & Ereignisse
// ---------------------------------------------------------------------------

/// Verbindungszustand der Session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    /// Keine Verbindung; traegt ggf. den letzten Trennungsgrund
    Getrennt(Option<TrennungsGrund>),
    /// Login laeuft
    Verbindet,
    /// Angemeldet mit eigener Entitaets-ID
    Verbunden(EntityId),
}

/// Flanken- und Lebenszyklus-Ereignisse fuer die einbettende Schicht
#[derive(Debug, Clone)]
pub enum ClientEreignis {
    /// Lokaler Sprecher hat zu sprechen begonnen
    SprichtBegonnen,
    /// Lokaler Sprecher ist verstummt
    SprichtBeendet,
    /// Neuer entfernter Sprecher
    TalkerErstellt { entity_id: EntityId, name: String },
    /// Entfernter Sprecher entfernt
    TalkerEntfernt { entity_id: EntityId },
    /// Entitaets-Zustandsaenderung (Name, Mute, Transform, ...) fuer
    /// UI- und Raumklang-Schichten
    EntitaetGeaendert { paket: Paket },
    /// Fatale Trennung mit lokalisierbarem Grund
    Getrennt { grund: TrennungsGrund },
}

/// Fabrik fuer Dekoder-Instanzen (eine pro entferntem Sprecher)
pub type DecoderFabrik = Box<dyn Fn() -> Box<dyn SprachDecoder> + Send + Sync>;

// ---------------------------------------------------------------------------
// SessionEndpoint
// ---------------------------------------------------------------------------

/// Client-Session: Handshake, Audio-Versand, Talker-Verwaltung
pub struct SessionEndpoint {
    transport: Arc<dyn ClientTransport>,
    session: Arc<SecuritySession>,
    anfragen: AnfragenRegister,
    talker: DashMap<i32, Arc<RemoteTalker>>,
    /// Stopp-Kanaele der laufenden Tick-Tasks
    tick_stopps: Mutex<HashMap<i32, oneshot::Sender<()>>>,
    statistik: Arc<NetzwerkStatistik>,
    uhr: MonotonUhr,
    zustand: Mutex<VerbindungsZustand>,
    encoder: Mutex<Box<dyn SprachEncoder>>,
    decoder_fabrik: DecoderFabrik,
    jitter_konfig: JitterKonfig,
    pool: BytePool,
    /// Fortlaufende 16-Bit Sequenz fuer ausgehende Frames
    sequenz: AtomicU16,
    /// Pegel-Schwelle als f32-Bits
    empfindlichkeit_bits: AtomicU32,
    position: Mutex<Option<[f32; 3]>>,
    rotation: Mutex<Option<[f32; 2]>>,
    letzte_aktivitaet_ms: AtomicU64,
    lokal_spricht: AtomicBool,
    letzte_bandbreite_ms: AtomicU64,
    /// Hoechste empfangene Audio-Sequenz pro Sprecher (Out-of-Order-Zaehlung)
    letzte_sequenzen: DashMap<i32, u16>,
    /// Bereits an die Statistik gemeldete Jitter-Buffer-Verluste
    gemeldete_verluste: AtomicU64,
    ereignisse: mpsc::UnboundedSender<ClientEreignis>,
    /// Puffer fuer das Mischen der Talker-Ringe (kein Alloc pro Callback)
    misch_puffer: Mutex<Vec<i16>>,
}

impl SessionEndpoint {
    /// Erstellt eine Session ueber dem gegebenen Transport
    ///
    /// Gibt auch den Empfaenger der Client-Ereignisse zurueck.
    pub fn neu(
        transport: Arc<dyn ClientTransport>,
        encoder: Box<dyn SprachEncoder>,
        decoder_fabrik: DecoderFabrik,
        jitter_konfig: JitterKonfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ClientEreignis>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = Arc::new(Self {
            transport,
            session: Arc::new(SecuritySession::neu()),
            anfragen: AnfragenRegister::neu(),
            talker: DashMap::new(),
            tick_stopps: Mutex::new(HashMap::new()),
            statistik: Arc::new(NetzwerkStatistik::neu()),
            uhr: MonotonUhr::neu(),
            zustand: Mutex::new(VerbindungsZustand::Getrennt(None)),
            encoder: Mutex::new(encoder),
            decoder_fabrik,
            jitter_konfig,
            pool: BytePool::neu(),
            sequenz: AtomicU16::new(0),
            empfindlichkeit_bits: AtomicU32::new(STANDARD_EMPFINDLICHKEIT.to_bits()),
            position: Mutex::new(None),
            rotation: Mutex::new(None),
            letzte_aktivitaet_ms: AtomicU64::new(NIE),
            lokal_spricht: AtomicBool::new(false),
            letzte_bandbreite_ms: AtomicU64::new(0),
            letzte_sequenzen: DashMap::new(),
            gemeldete_verluste: AtomicU64::new(0),
            ereignisse: tx,
            misch_puffer: Mutex::new(Vec::new()),
        });
        (endpoint, rx)
    }

    /// Aktueller Verbindungszustand
    pub fn zustand(&self) -> VerbindungsZustand {
        *self.zustand.lock()
    }

    /// Netzwerk-Telemetrie der Session
    pub fn statistik(&self) -> &NetzwerkStatistik {
        &self.statistik
    }

    /// Setzt die Pegel-Schwelle des Sende-Gates (0.0 – 1.0)
    pub fn empfindlichkeit_setzen(&self, empfindlichkeit: f32) {
        self.empfindlichkeit_bits
            .store(empfindlichkeit.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    /// Aktualisiert Position und Blickrichtung fuer ausgehende Frames
    pub fn transform_setzen(&self, position: Option<[f32; 3]>, rotation: Option<[f32; 2]>) {
        *self.position.lock() = position;
        *self.rotation.lock() = rotation;
    }

    /// Talker-Pipeline eines Sprechers (falls vorhanden)
    pub fn talker(&self, entity_id: EntityId) -> Option<Arc<RemoteTalker>> {
        self.talker.get(&entity_id.roh()).map(|t| Arc::clone(&t))
    }

    // -----------------------------------------------------------------------
    // Verbindungsaufbau & -abbau
    // -----------------------------------------------------------------------

    /// Meldet sich am Server an und schliesst den Handshake ab
    ///
    /// Die Poll-Schleife muss bereits laufen (oder `tick` anderweitig
    /// getrieben werden), damit die Antwort verarbeitet wird.
    pub async fn verbinden(&self, name: &str, zeitlimit: Duration) -> ClientResult<EntityId> {
        {
            let mut zustand = self.zustand.lock();
            if !matches!(*zustand, VerbindungsZustand::Getrennt(_)) {
                return Err(ClientFehler::SessionGeschlossen);
            }
            *zustand = VerbindungsZustand::Verbindet;
        }

        let anfrage = RequestId::neu();
        let rx = self.anfragen.registrieren(anfrage)?;

        let login = Paket::LoginRequest {
            anfrage,
            version: PROTOKOLL_VERSION,
            name: name.to_string(),
            public_key: self.session.oeffentlicher_schluessel().to_vec(),
        };
        self.transport.verbinden(&login.kodieren()?)?;

        let antwort = match self.anfragen.warten(anfrage, rx, zeitlimit).await {
            Ok(antwort) => antwort,
            Err(ClientFehler::Zeitlimit(_)) => {
                *self.zustand.lock() =
                    VerbindungsZustand::Getrennt(Some(TrennungsGrund::HandshakeTimeout));
                return Err(ClientFehler::HandshakeZeitlimit);
            }
            Err(e) => {
                *self.zustand.lock() = VerbindungsZustand::Getrennt(None);
                return Err(e);
            }
        };

        match antwort {
            Paket::AcceptResponse {
                entity_id,
                public_key,
                ..
            } => {
                self.session.handshake_abschliessen(&public_key)?;
                *self.zustand.lock() = VerbindungsZustand::Verbunden(entity_id);
                tracing::info!(entity = %entity_id, "Anmeldung akzeptiert");
                Ok(entity_id)
            }
            Paket::DenyResponse { grund, .. } => {
                let trennungsgrund = TrennungsGrund::aus_bezeichner(&grund);
                *self.zustand.lock() = VerbindungsZustand::Getrennt(Some(trennungsgrund));
                tracing::warn!(grund = %grund, "Anmeldung abgelehnt");
                Err(ClientFehler::Abgelehnt(grund))
            }
            andere => {
                *self.zustand.lock() = VerbindungsZustand::Getrennt(None);
                tracing::warn!(paket = ?andere.typ(), "Unerwartete Login-Antwort");
                Err(ClientFehler::Abgebrochen)
            }
        }
    }

    /// Fragt Server-Informationen ab (verbindungslose Probe)
    pub async fn info_abfragen(&self, zeitlimit: Duration) -> ClientResult<Paket> {
        let anfrage = RequestId::neu();
        let rx = self.anfragen.registrieren(anfrage)?;
        let probe = Paket::InfoRequest { anfrage };
        self.transport
            .senden(&probe.kodieren()?, Zustellung::Unconnected)?;
        self.anfragen.warten(anfrage, rx, zeitlimit).await
    }

    /// Meldet sich ab und raeumt die Session auf
    pub fn trennen(&self) {
        if let Ok(bytes) = Paket::LogoutRequest.kodieren() {
            let _ = self.transport.senden(&bytes, Zustellung::ReliableOrdered);
        }
        self.transport.trennen();
        self.aufraeumen(TrennungsGrund::Closed, false);
    }

    // -----------------------------------------------------------------------
    // Poll-Schleife
    // -----------------------------------------------------------------------

    /// Startet die Netzwerk-Poll-Schleife als Task (~15 ms Intervall)
    pub fn poll_task_starten(
        self: &Arc<Self>,
    ) -> (tokio::task::JoinHandle<()>, oneshot::Sender<()>) {
        let endpoint = Arc::clone(self);
        let (stopp_tx, mut stopp_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut intervall = tokio::time::interval(Duration::from_millis(TICK_MS));
            intervall.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = intervall.tick() => endpoint.tick(),
                    _ = &mut stopp_rx => break,
                }
            }
        });
        (handle, stopp_tx)
    }

    /// Ein Durchlauf der Netzwerk-Schleife
    pub fn tick(&self) {
        let jetzt = self.uhr.jetzt_ms();

        for ereignis in self.transport.abrufen() {
            match ereignis {
                TransportEreignis::Daten { daten, .. } => {
                    if let Err(e) = self.datagramm_verarbeiten(&daten, jetzt) {
                        // Per-Paket-Fehler verwerfen das Datagramm, nie die Session
                        tracing::debug!(fehler = %e, "Datagramm verworfen");
                    }
                }
                TransportEreignis::Getrennt { grund, .. } => {
                    let trennungsgrund = TrennungsGrund::aus_bezeichner(&grund);
                    tracing::info!(grund = %grund, "Vom Server getrennt");
                    self.aufraeumen(trennungsgrund, true);
                }
                TransportEreignis::Verbunden { .. } | TransportEreignis::Unverbunden { .. } => {}
            }
        }

        // RTT aus dem Peer-Ping des Transports
        if let Some(ping) = self.transport.ping_ms() {
            self.statistik.rtt_aufzeichnen(ping as f64);
        }

        // Bandbreitenfenster mindestens alle 100 ms fortschreiben
        let letzte = self.letzte_bandbreite_ms.load(Ordering::Relaxed);
        if jetzt.saturating_sub(letzte) >= BANDBREITE_INTERVALL_MS {
            self.statistik.bandbreite_aktualisieren(jetzt);
            self.letzte_bandbreite_ms.store(jetzt, Ordering::Relaxed);
        }

        // Jitter-Buffer-Verluste aller Talker an die Statistik melden
        let verloren_gesamt: u64 = self
            .talker
            .iter()
            .map(|t| t.jitter_statistik().verloren)
            .sum();
        let vorher = self.gemeldete_verluste.swap(verloren_gesamt, Ordering::AcqRel);
        if verloren_gesamt > vorher {
            self.statistik.paket_verloren(verloren_gesamt - vorher);
        }

        // Sprech-Flanken des lokalen Sprechers
        let aktivitaet = self.letzte_aktivitaet_ms.load(Ordering::Acquire);
        let aktiv =
            aktivitaet != NIE && jetzt.saturating_sub(aktivitaet) <= STILLE_SCHWELLE_MS;
        if aktiv != self.lokal_spricht.swap(aktiv, Ordering::AcqRel) {
            let _ = self.ereignisse.send(if aktiv {
                ClientEreignis::SprichtBegonnen
            } else {
                ClientEreignis::SprichtBeendet
            });
        }
    }

    // -----------------------------------------------------------------------
    // Audio-Pfad
    // -----------------------------------------------------------------------

    /// Nimmt einen Mikrofon-PCM-Frame entgegen und verschickt ihn
    ///
    /// Unterhalb der Pegel-Schwelle wird nichts gesendet (VAD-Gate).
    pub fn audio_schreiben(&self, pcm: &[i16]) -> ClientResult<()> {
        let eigene_id = match self.zustand() {
            VerbindungsZustand::Verbunden(id) => id,
            _ => return Err(ClientFehler::SessionGeschlossen),
        };

        let peak = pcm
            .iter()
            .map(|&s| (s as i32).unsigned_abs())
            .max()
            .unwrap_or(0) as f32
            / i16::MAX as f32;
        let empfindlichkeit = f32::from_bits(self.empfindlichkeit_bits.load(Ordering::Acquire));
        if peak < empfindlichkeit {
            return Ok(());
        }
        self.letzte_aktivitaet_ms
            .store(self.uhr.jetzt_ms(), Ordering::Release);

        // Kodieren in einen Pool-Slab
        let mut slab = self.pool.holen();
        slab.resize(MAX_ENCODED_BYTES, 0);
        let kodiert = self
            .encoder
            .lock()
            .kodieren(pcm, &mut slab)
            .map_err(|e| {
                tracing::debug!(fehler = %e, "Kodieren fehlgeschlagen");
                ClientFehler::Abgebrochen
            })?;
        slab.truncate(kodiert);

        let sequenz = self.sequenz.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let paket = Paket::AdvancedAudio {
            entity_id: eigene_id,
            sequenz,
            lautheit: peak,
            position: *self.position.lock(),
            rotation: *self.rotation.lock(),
            nutzdaten: slab,
        };

        let klartext = paket.kodieren()?;
        let rahmen = self.session.verschluesseln(&klartext)?;
        let umschlag = Paket::EncryptedEnvelope {
            iv: rahmen.iv,
            tag: rahmen.tag,
            chiffrat: rahmen.chiffrat,
        };
        let datagramm = umschlag.kodieren()?;
        self.transport.senden(&datagramm, Zustellung::Sequenced)?;
        self.statistik.paket_gesendet(datagramm.len());

        // Slab zurueck in den Pool
        if let Paket::AdvancedAudio { nutzdaten, .. } = paket {
            self.pool.zurueckgeben(nutzdaten);
        }
        Ok(())
    }

    /// Mischt die Ringe aller Talker saturierend in den Zielpuffer
    ///
    /// Wird vom Audio-Geraete-Callback aufgerufen; fehlende Samples sind
    /// Stille.
    pub fn audio_lesen(&self, ziel: &mut [i16]) {
        ziel.fill(0);
        let mut scratch = self.misch_puffer.lock();
        scratch.resize(ziel.len(), 0);

        for talker in self.talker.iter() {
            let gelesen = talker.ring_lesen(scratch.as_mut_slice());
            for i in 0..gelesen {
                ziel[i] = ziel[i].saturating_add(scratch[i]);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Empfangs-Dispatch
    // -----------------------------------------------------------------------

    /// Dekodiert ein Datagramm und verteilt es
    ///
    /// Ein `EncryptedEnvelope` wird entschluesselt und der innere Typ
    /// erneut verteilt; eine zweite Verschluesselungsschicht ist verboten.
    fn datagramm_verarbeiten(&self, daten: &[u8], jetzt_ms: u64) -> ClientResult<()> {
        let paket = Paket::dekodieren(daten)?;
        match paket {
            Paket::EncryptedEnvelope { iv, tag, chiffrat } => {
                let klartext = self.session.entschluesseln(&iv, &tag, &chiffrat)?;
                let inneres = Paket::dekodieren_inner(&klartext)?;
                self.paket_verteilen(inneres, daten.len(), jetzt_ms)
            }
            direkt => self.paket_verteilen(direkt, daten.len(), jetzt_ms),
        }
    }

    fn paket_verteilen(&self, paket: Paket, draht_bytes: usize, jetzt_ms: u64) -> ClientResult<()> {
        match paket {
            Paket::AcceptResponse { anfrage, .. }
            | Paket::DenyResponse { anfrage, .. }
            | Paket::InfoResponse { anfrage, .. } => {
                self.anfragen.erfuellen(anfrage, paket);
            }
            Paket::AdvancedAudio {
                entity_id,
                sequenz,
                nutzdaten,
                ..
            }
            | Paket::Audio {
                entity_id,
                sequenz,
                nutzdaten,
            } => {
                self.statistik.paket_empfangen(draht_bytes, jetzt_ms, None);
                match self.letzte_sequenzen.get(&entity_id.roh()).map(|v| *v) {
                    Some(vorherige) if !ist_neuer(sequenz, vorherige) => {
                        self.statistik.out_of_order();
                    }
                    _ => {
                        self.letzte_sequenzen.insert(entity_id.roh(), sequenz);
                    }
                }
                match self.talker.get(&entity_id.roh()) {
                    Some(talker) => talker.frame_einspeisen(sequenz, nutzdaten, jetzt_ms),
                    None => {
                        tracing::debug!(entity = %entity_id, "Audio fuer unbekannten Sprecher");
                    }
                }
            }
            Paket::EntityCreated { entity_id, ref name } => {
                self.talker_erstellen(entity_id);
                let _ = self.ereignisse.send(ClientEreignis::TalkerErstellt {
                    entity_id,
                    name: name.clone(),
                });
            }
            Paket::EntityDestroyed { entity_id } => {
                self.talker_entfernen(entity_id);
                let _ = self
                    .ereignisse
                    .send(ClientEreignis::TalkerEntfernt { entity_id });
            }
            Paket::EntityName { .. }
            | Paket::EntityMute { .. }
            | Paket::EntityDeafen { .. }
            | Paket::EntityBitmask { .. }
            | Paket::EntityTransform { .. } => {
                // Zustandsaenderungen gehen an UI- und Raumklang-Schichten
                let _ = self
                    .ereignisse
                    .send(ClientEreignis::EntitaetGeaendert { paket });
            }
            andere => {
                tracing::debug!(typ = ?andere.typ(), "Unerwartetes Paket verworfen");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Talker-Verwaltung & Aufraeumen
    // -----------------------------------------------------------------------

    fn talker_erstellen(&self, entity_id: EntityId) {
        if self.talker.contains_key(&entity_id.roh()) {
            return;
        }
        let talker = Arc::new(RemoteTalker::neu(
            entity_id,
            self.jitter_konfig.clone(),
            (self.decoder_fabrik)(),
        ));
        let (_, stopp) = talker.tick_task_starten(self.uhr.clone());
        self.talker.insert(entity_id.roh(), talker);
        self.tick_stopps.lock().insert(entity_id.roh(), stopp);
        tracing::debug!(entity = %entity_id, "Talker erstellt");
    }

    fn talker_entfernen(&self, entity_id: EntityId) {
        self.talker.remove(&entity_id.roh());
        self.letzte_sequenzen.remove(&entity_id.roh());
        if let Some(stopp) = self.tick_stopps.lock().remove(&entity_id.roh()) {
            let _ = stopp.send(());
        }
        tracing::debug!(entity = %entity_id, "Talker entfernt");
    }

    /// Beendet die Session: Wartende abbrechen, Schluessel nullen,
    /// Talker und Puffer freigeben
    fn aufraeumen(&self, grund: TrennungsGrund, ereignis_senden: bool) {
        self.anfragen.alle_abbrechen();
        self.session.schliessen();

        let ids: Vec<i32> = self.talker.iter().map(|t| t.entity_id().roh()).collect();
        for id in ids {
            self.talker_entfernen(EntityId(id));
        }

        *self.zustand.lock() = VerbindungsZustand::Getrennt(Some(grund));
        self.lokal_spricht.store(false, Ordering::Release);
        if ereignis_senden {
            let _ = self.ereignisse.send(ClientEreignis::Getrennt { grund });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
