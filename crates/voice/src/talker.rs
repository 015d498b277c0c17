//! Pipeline pro entferntem Sprecher
//!
//! Verbindet Jitter Buffer, Dekoder und Ausgabe-Ring zu einer
//! Zustandsmaschine, die im Frame-Takt laeuft:
//!
//! ```text
//! Netzwerk-Thread: frame_einspeisen() -> JitterBuffer (Mutex)
//! Tick-Task:       tick() -> entnehmen -> dekodieren/PLC -> Ring
//! Audio-Callback:  ring_lesen() (fuellt bei Unterlauf Stille)
//! ```
//!
//! Der Jitter-Buffer-Mutex wird nur fuer die Dauer von einfuegen/
//! entnehmen gehalten; Codec-Aufrufe laufen ausserhalb.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use earshot_core::konstanten::{FRAME_MS, SAMPLES_PRO_FRAME, STILLE_SCHWELLE_MS};
use earshot_core::types::EntityId;

use crate::decoder::SprachDecoder;
use crate::jitter::{AdaptiveJitterBuffer, Entnahme, JitterKonfig};
use crate::ring::AusgabeRing;

/// Ring-Kapazitaet in Frames (Puffer zwischen Tick-Task und Audio-Callback)
const RING_FRAMES: usize = 8;

/// Sentinel fuer "noch nie ein Frame angekommen"
const NIE: u64 = u64::MAX;

// ---------------------------------------------------------------------------
// MonotonUhr
// ---------------------------------------------------------------------------

/// Gemeinsame monotone Millisekunden-Uhr
///
/// Netzwerk-Schleife und Tick-Tasks muessen dieselbe Uhr verwenden, damit
/// die Verzoegerungsrechnung des Jitter Buffers konsistent ist.
#[derive(Debug, Clone)]
pub struct MonotonUhr {
    start: Instant,
}

impl MonotonUhr {
    pub fn neu() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Millisekunden seit Erzeugung der Uhr
    pub fn jetzt_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for MonotonUhr {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// RemoteTalker
// ---------------------------------------------------------------------------

/// Empfangs-Pipeline eines entfernten Sprechers
///
/// Lebenszyklus: erstellt beim Entitaets-Erstellt-Ereignis, zerstoert beim
/// Entitaets-Entfernt-Ereignis. Sichtbarkeitsverlust leert Buffer und
/// Ring, damit beim Wiedereintritt kein veraltetes Audio abgespielt wird.
pub struct RemoteTalker {
    entity_id: EntityId,
    jitter: Mutex<AdaptiveJitterBuffer>,
    decoder: Mutex<Box<dyn SprachDecoder>>,
    ring: Mutex<AusgabeRing>,
    /// Monotone Ankunftszeit des letzten Frames (NIE = noch keiner)
    letzte_ankunft_ms: AtomicU64,
    spricht: AtomicBool,
    stumm: AtomicBool,
    sichtbar: AtomicBool,
    /// Wiedergabe-Lautstaerke als f32-Bits (1.0 = neutral)
    lautstaerke_bits: AtomicU32,
}

impl RemoteTalker {
    /// Erstellt eine Pipeline fuer einen Sprecher
    pub fn neu(entity_id: EntityId, konfig: JitterKonfig, decoder: Box<dyn SprachDecoder>) -> Self {
        Self {
            entity_id,
            jitter: Mutex::new(AdaptiveJitterBuffer::neu(konfig)),
            decoder: Mutex::new(decoder),
            ring: Mutex::new(AusgabeRing::neu(SAMPLES_PRO_FRAME * RING_FRAMES)),
            letzte_ankunft_ms: AtomicU64::new(NIE),
            spricht: AtomicBool::new(false),
            stumm: AtomicBool::new(false),
            sichtbar: AtomicBool::new(true),
            lautstaerke_bits: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// Entitaets-ID des Sprechers
    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Reiht einen empfangenen Frame ein (Netzwerk-Pfad)
    pub fn frame_einspeisen(&self, sequenz: u16, nutzdaten: Vec<u8>, jetzt_ms: u64) {
        if !self.sichtbar.load(Ordering::Acquire) {
            tracing::trace!(entity = %self.entity_id, "Frame fuer unsichtbaren Sprecher verworfen");
            return;
        }
        self.letzte_ankunft_ms.store(jetzt_ms, Ordering::Release);
        self.jitter.lock().einfuegen(sequenz, nutzdaten, jetzt_ms);
    }

    /// Ein Frame-Tick: Buffer abfragen, dekodieren bzw. verschleiern
    pub fn tick(&self, jetzt_ms: u64) {
        let entnahme = self.jitter.lock().entnehmen(jetzt_ms);
        let mut samples = [0i16; SAMPLES_PRO_FRAME];

        match entnahme {
            Entnahme::Paket(frame) => {
                let anzahl = match self.decoder.lock().dekodieren(&frame.nutzdaten, &mut samples) {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!(entity = %self.entity_id, fehler = %e, "Dekodieren fehlgeschlagen");
                        return;
                    }
                };
                self.spricht.store(true, Ordering::Release);
                self.samples_ausgeben(&mut samples[..anzahl]);
            }
            Entnahme::Verlust => {
                let anzahl = match self.decoder.lock().verschleiern(&mut samples) {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!(entity = %self.entity_id, fehler = %e, "Verschleierung fehlgeschlagen");
                        return;
                    }
                };
                self.samples_ausgeben(&mut samples[..anzahl]);
            }
            Entnahme::Warten => {
                let letzte = self.letzte_ankunft_ms.load(Ordering::Acquire);
                let lange_still =
                    letzte == NIE || jetzt_ms.saturating_sub(letzte) > STILLE_SCHWELLE_MS;
                if lange_still {
                    // Sprecher ist verstummt: echte Stille ausgeben
                    self.spricht.store(false, Ordering::Release);
                    self.samples_ausgeben(&mut samples);
                } else {
                    // Kurzer Aussetzer: Uebergang mit PLC glaetten
                    let anzahl = match self.decoder.lock().verschleiern(&mut samples) {
                        Ok(n) => n,
                        Err(_) => return,
                    };
                    self.samples_ausgeben(&mut samples[..anzahl]);
                }
            }
        }
    }

    /// Liest gemischte Samples dieses Sprechers (Audio-Callback-Pfad)
    pub fn ring_lesen(&self, ziel: &mut [i16]) -> usize {
        self.ring.lock().lesen(ziel)
    }

    /// Setzt die Sichtbarkeit; Verlust leert Buffer, Ring und Dekoder
    pub fn sichtbarkeit_setzen(&self, sichtbar: bool) {
        let vorher = self.sichtbar.swap(sichtbar, Ordering::AcqRel);
        if vorher && !sichtbar {
            self.jitter.lock().leeren();
            self.ring.lock().leeren();
            self.decoder.lock().zuruecksetzen();
            self.spricht.store(false, Ordering::Release);
            tracing::debug!(entity = %self.entity_id, "Sprecher unsichtbar – Puffer geleert");
        }
    }

    /// Benutzerseitige Stummschaltung dieses Sprechers
    pub fn stumm_setzen(&self, stumm: bool) {
        self.stumm.store(stumm, Ordering::Release);
    }

    /// Wiedergabe-Lautstaerke (1.0 = neutral)
    pub fn lautstaerke_setzen(&self, lautstaerke: f32) {
        self.lautstaerke_bits
            .store(lautstaerke.clamp(0.0, 4.0).to_bits(), Ordering::Release);
    }

    /// Spricht der Sprecher gerade?
    pub fn spricht(&self) -> bool {
        self.spricht.load(Ordering::Acquire)
    }

    /// Snapshot der Jitter-Buffer-Statistiken
    pub fn jitter_statistik(&self) -> crate::jitter::JitterStatistik {
        self.jitter.lock().statistik().clone()
    }

    /// Startet den Tick-Task (ein leichtgewichtiger Task pro Sprecher)
    ///
    /// Laeuft bis ueber den zurueckgegebenen Sender gestoppt wird.
    pub fn tick_task_starten(
        self: &Arc<Self>,
        uhr: MonotonUhr,
    ) -> (tokio::task::JoinHandle<()>, oneshot::Sender<()>) {
        let talker = Arc::clone(self);
        let (stopp_tx, mut stopp_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut intervall = tokio::time::interval(Duration::from_millis(FRAME_MS));
            intervall.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = intervall.tick() => {
                        talker.tick(uhr.jetzt_ms());
                    }
                    _ = &mut stopp_rx => {
                        tracing::debug!(entity = %talker.entity_id, "Tick-Task beendet");
                        break;
                    }
                }
            }
        });
        (handle, stopp_tx)
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    /// Skaliert mit der Lautstaerke und schreibt in den Ring
    fn samples_ausgeben(&self, samples: &mut [i16]) {
        if self.stumm.load(Ordering::Acquire) {
            return;
        }
        let lautstaerke = f32::from_bits(self.lautstaerke_bits.load(Ordering::Acquire));
        if (lautstaerke - 1.0).abs() > f32::EPSILON {
            for sample in samples.iter_mut() {
                *sample = (*sample as f32 * lautstaerke)
                    .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            }
        }
        self.ring.lock().schreiben(samples);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
