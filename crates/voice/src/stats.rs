//! Netzwerk-Telemetrie pro Verbindung
//!
//! Sammelt RTT (EWMA nach RFC 6298), Interarrival-Jitter (RFC 3550),
//! Paket- und Byte-Zaehler sowie Bandbreitenfenster und leitet daraus
//! eine Qualitaetsstufe und eine MOS-Schaetzung (E-Modell) ab.
//!
//! Zaehler sind atomar und ohne Lock lesbar; die EWMA-Zustaende liegen
//! unter einem kurzen parking_lot-Lock.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Qualitaetsstufe
// ---------------------------------------------------------------------------

/// Qualitaetsstufe der Verbindung (schlechteste Dimension zaehlt)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualitaetsStufe {
    Exzellent,
    Gut,
    Ordentlich,
    Schwach,
    Schlecht,
}

impl QualitaetsStufe {
    fn aus_rtt(rtt_ms: f64) -> Self {
        match rtt_ms {
            r if r < 50.0 => Self::Exzellent,
            r if r < 100.0 => Self::Gut,
            r if r < 200.0 => Self::Ordentlich,
            r if r < 400.0 => Self::Schwach,
            _ => Self::Schlecht,
        }
    }

    fn aus_verlust(prozent: f64) -> Self {
        match prozent {
            v if v < 1.0 => Self::Exzellent,
            v if v < 3.0 => Self::Gut,
            v if v < 5.0 => Self::Ordentlich,
            v if v < 10.0 => Self::Schwach,
            _ => Self::Schlecht,
        }
    }

    fn aus_jitter(jitter_ms: f64) -> Self {
        match jitter_ms {
            j if j < 20.0 => Self::Exzellent,
            j if j < 40.0 => Self::Gut,
            j if j < 70.0 => Self::Ordentlich,
            j if j < 100.0 => Self::Schwach,
            _ => Self::Schlecht,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Momentaufnahme aller Metriken
#[derive(Debug, Clone)]
pub struct StatistikSchnappschuss {
    pub rtt_ms: f64,
    pub rtt_var_ms: f64,
    pub rtt_min_ms: f64,
    pub rtt_max_ms: f64,
    pub jitter_ms: f64,
    pub pakete_gesendet: u64,
    pub pakete_empfangen: u64,
    pub pakete_verloren: u64,
    pub out_of_order: u64,
    pub bytes_gesendet: u64,
    pub bytes_empfangen: u64,
    pub sende_kbps: f64,
    pub empfangs_kbps: f64,
    pub verlust_prozent: f64,
    pub mos: f64,
    pub stufe: QualitaetsStufe,
}

// ---------------------------------------------------------------------------
// Interner EWMA-Zustand
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct EwmaZustand {
    rtt_ms: f64,
    rtt_var_ms: f64,
    rtt_min_ms: f64,
    rtt_max_ms: f64,
    rtt_vorhanden: bool,
    jitter_ms: f64,
    /// Letztes (Ankunft, Sender-Zeitstempel)-Paar fuer RFC 3550
    letzter_transit: Option<(u64, u64)>,
    /// Bandbreitenfenster
    fenster_start_ms: Option<u64>,
    fenster_bytes_gesendet: u64,
    fenster_bytes_empfangen: u64,
    sende_kbps: f64,
    empfangs_kbps: f64,
}

// ---------------------------------------------------------------------------
// NetzwerkStatistik
// ---------------------------------------------------------------------------

/// Thread-sichere Netzwerk-Telemetrie einer Verbindung
pub struct NetzwerkStatistik {
    pakete_gesendet: AtomicU64,
    pakete_empfangen: AtomicU64,
    pakete_verloren: AtomicU64,
    out_of_order: AtomicU64,
    bytes_gesendet: AtomicU64,
    bytes_empfangen: AtomicU64,
    ewma: Mutex<EwmaZustand>,
}

impl NetzwerkStatistik {
    /// Erstellt leere Statistiken
    pub fn neu() -> Self {
        Self {
            pakete_gesendet: AtomicU64::new(0),
            pakete_empfangen: AtomicU64::new(0),
            pakete_verloren: AtomicU64::new(0),
            out_of_order: AtomicU64::new(0),
            bytes_gesendet: AtomicU64::new(0),
            bytes_empfangen: AtomicU64::new(0),
            ewma: Mutex::new(EwmaZustand::default()),
        }
    }

    /// Verarbeitet eine RTT-Messung (RFC 6298: alpha=1/8, beta=1/4)
    pub fn rtt_aufzeichnen(&self, rtt_ms: f64) {
        let mut ewma = self.ewma.lock();
        if !ewma.rtt_vorhanden {
            ewma.rtt_ms = rtt_ms;
            ewma.rtt_var_ms = rtt_ms / 2.0;
            ewma.rtt_min_ms = rtt_ms;
            ewma.rtt_max_ms = rtt_ms;
            ewma.rtt_vorhanden = true;
            return;
        }
        let delta = rtt_ms - ewma.rtt_ms;
        ewma.rtt_ms += delta / 8.0;
        ewma.rtt_var_ms += (delta.abs() - ewma.rtt_var_ms) / 4.0;
        ewma.rtt_min_ms = ewma.rtt_min_ms.min(rtt_ms);
        ewma.rtt_max_ms = ewma.rtt_max_ms.max(rtt_ms);
    }

    /// Meldet ein gesendetes Paket
    pub fn paket_gesendet(&self, bytes: usize) {
        self.pakete_gesendet.fetch_add(1, Ordering::Relaxed);
        self.bytes_gesendet.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Meldet ein empfangenes Paket
    ///
    /// Mit Sender-Zeitstempel wird der Interarrival-Jitter nach RFC 3550
    /// fortgeschrieben: `D = |(Ankunft - ts) - (vorherige Transitzeit)|`,
    /// `J += (D - J) / 16`.
    pub fn paket_empfangen(&self, bytes: usize, ankunft_ms: u64, sender_ts_ms: Option<u64>) {
        self.pakete_empfangen.fetch_add(1, Ordering::Relaxed);
        self.bytes_empfangen.fetch_add(bytes as u64, Ordering::Relaxed);

        if let Some(ts) = sender_ts_ms {
            let mut ewma = self.ewma.lock();
            if let Some((vorherige_ankunft, vorheriger_ts)) = ewma.letzter_transit {
                let transit = ankunft_ms as i64 - ts as i64;
                let vorheriger_transit = vorherige_ankunft as i64 - vorheriger_ts as i64;
                let d = (transit - vorheriger_transit).unsigned_abs() as f64;
                ewma.jitter_ms += (d - ewma.jitter_ms) / 16.0;
            }
            ewma.letzter_transit = Some((ankunft_ms, ts));
        }
    }

    /// Meldet `anzahl` verlorene Pakete
    pub fn paket_verloren(&self, anzahl: u64) {
        self.pakete_verloren.fetch_add(anzahl, Ordering::Relaxed);
    }

    /// Meldet ein out-of-order angekommenes Paket
    pub fn out_of_order(&self) {
        self.out_of_order.fetch_add(1, Ordering::Relaxed);
    }

    /// Aktualisiert die Bandbreitenfenster (mindestens alle 100 ms rufen)
    pub fn bandbreite_aktualisieren(&self, jetzt_ms: u64) {
        let gesendet = self.bytes_gesendet.load(Ordering::Relaxed);
        let empfangen = self.bytes_empfangen.load(Ordering::Relaxed);

        let mut ewma = self.ewma.lock();
        match ewma.fenster_start_ms {
            None => {
                ewma.fenster_start_ms = Some(jetzt_ms);
                ewma.fenster_bytes_gesendet = gesendet;
                ewma.fenster_bytes_empfangen = empfangen;
            }
            Some(start) => {
                let dauer_ms = jetzt_ms.saturating_sub(start);
                if dauer_ms == 0 {
                    return;
                }
                let delta_gesendet = gesendet.saturating_sub(ewma.fenster_bytes_gesendet);
                let delta_empfangen = empfangen.saturating_sub(ewma.fenster_bytes_empfangen);
                ewma.sende_kbps = (delta_gesendet * 8) as f64 / dauer_ms as f64;
                ewma.empfangs_kbps = (delta_empfangen * 8) as f64 / dauer_ms as f64;
                ewma.fenster_start_ms = Some(jetzt_ms);
                ewma.fenster_bytes_gesendet = gesendet;
                ewma.fenster_bytes_empfangen = empfangen;
            }
        }
    }

    /// Verlustrate in Prozent (verloren / (empfangen + verloren))
    pub fn verlust_prozent(&self) -> f64 {
        let verloren = self.pakete_verloren.load(Ordering::Relaxed);
        let empfangen = self.pakete_empfangen.load(Ordering::Relaxed);
        let gesamt = verloren + empfangen;
        if gesamt == 0 {
            0.0
        } else {
            verloren as f64 * 100.0 / gesamt as f64
        }
    }

    /// Qualitaetsstufe aus RTT, Verlust und Jitter (schlechteste zaehlt)
    pub fn stufe(&self) -> QualitaetsStufe {
        let (rtt, jitter) = {
            let ewma = self.ewma.lock();
            (ewma.rtt_ms, ewma.jitter_ms)
        };
        let verlust = self.verlust_prozent();
        QualitaetsStufe::aus_rtt(rtt)
            .max(QualitaetsStufe::aus_verlust(verlust))
            .max(QualitaetsStufe::aus_jitter(jitter))
    }

    /// MOS-Schaetzung nach dem vereinfachten E-Modell (1.0 – 4.5)
    pub fn mos(&self) -> f64 {
        let (rtt, jitter) = {
            let ewma = self.ewma.lock();
            (ewma.rtt_ms, ewma.jitter_ms)
        };
        let verlust = self.verlust_prozent();

        let eff_latenz = rtt / 2.0 + 2.0 * jitter;
        let id = if eff_latenz < 160.0 {
            0.024 * eff_latenz
        } else {
            0.024 * 160.0 + 0.11 * (eff_latenz - 160.0)
        };
        let r = (93.2 - id - 2.5 * verlust).clamp(0.0, 100.0);
        (1.0 + 0.035 * r + r * (r - 60.0) * (100.0 - r) * 7.0e-6).clamp(1.0, 4.5)
    }

    /// Erzeugt eine konsistente Momentaufnahme aller Metriken
    pub fn schnappschuss(&self) -> StatistikSchnappschuss {
        let ewma = self.ewma.lock();
        let verlust_prozent = self.verlust_prozent();
        let schnappschuss = StatistikSchnappschuss {
            rtt_ms: ewma.rtt_ms,
            rtt_var_ms: ewma.rtt_var_ms,
            rtt_min_ms: ewma.rtt_min_ms,
            rtt_max_ms: ewma.rtt_max_ms,
            jitter_ms: ewma.jitter_ms,
            pakete_gesendet: self.pakete_gesendet.load(Ordering::Relaxed),
            pakete_empfangen: self.pakete_empfangen.load(Ordering::Relaxed),
            pakete_verloren: self.pakete_verloren.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            bytes_gesendet: self.bytes_gesendet.load(Ordering::Relaxed),
            bytes_empfangen: self.bytes_empfangen.load(Ordering::Relaxed),
            sende_kbps: ewma.sende_kbps,
            empfangs_kbps: ewma.empfangs_kbps,
            verlust_prozent,
            mos: 0.0,
            stufe: QualitaetsStufe::Exzellent,
        };
        drop(ewma);
        StatistikSchnappschuss {
            mos: self.mos(),
            stufe: self.stufe(),
            ..schnappschuss
        }
    }
}

impl Default for NetzwerkStatistik {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
