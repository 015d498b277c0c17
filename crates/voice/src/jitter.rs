//! Adaptiver Jitter Buffer fuer Voice-Frames
//!
//! Ordnet eingehende Frames nach 16-Bit-Sequenznummer, verwirft Duplikate
//! und zu spaete Frames, passt die Ziel-Verzoegerung an den gemessenen
//! Jitter an und signalisiert dem Aufrufer pro Frame-Tick entweder ein
//! abspielbares Paket, einen Verlust (PLC-Aufruf fuer genau einen Frame)
//! oder Warten.
//!
//! ## Zusicherungen
//! - Jede Sequenznummer verlaesst den Buffer hoechstens einmal als Paket.
//! - `naechste_erwartet` rueckt pro Emission (Paket oder Verlust) um genau
//!   1 vor, modulo Wrap-Around.
//! - Kein gepufferter Frame ist aelter als `zuletzt_abgespielt`.
//! - `min_puffer_ms <= adaptive_verzoegerung_ms <= max_puffer_ms`.
//! - Speicher ist begrenzt: hoechstens `max_pakete` Frames.
//!
//! Alle zeitabhaengigen Operationen nehmen eine monotone Millisekunden-Uhr
//! als Parameter; der Buffer selbst liest keine Systemzeit.

use std::collections::VecDeque;

use earshot_protocol::seq::{abstand, ist_neuer};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration des Jitter Buffers (alle Werte in Millisekunden)
#[derive(Debug, Clone)]
pub struct JitterKonfig {
    /// Untergrenze der adaptiven Verzoegerung (>= Frame-Dauer sinnvoll)
    pub min_puffer_ms: u64,
    /// Obergrenze der adaptiven Verzoegerung (>= 2 * Minimum sinnvoll)
    pub max_puffer_ms: u64,
    /// Dauer eines Frames
    pub frame_ms: u64,
}

impl Default for JitterKonfig {
    fn default() -> Self {
        Self {
            min_puffer_ms: 40,
            max_puffer_ms: 200,
            frame_ms: earshot_core::konstanten::FRAME_MS,
        }
    }
}

impl JitterKonfig {
    /// Kapazitaetsgrenze in Frames: ceil(max/frame) + 2
    pub fn max_pakete(&self) -> usize {
        (self.max_puffer_ms.div_ceil(self.frame_ms) + 2) as usize
    }
}

// ---------------------------------------------------------------------------
// Frame & Ergebnis-Typen
// ---------------------------------------------------------------------------

/// Ein im Buffer gehaltener Frame
#[derive(Debug, Clone)]
pub struct GepuffertesFrame {
    /// 16-Bit Sequenznummer (Wrap-Around)
    pub sequenz: u16,
    /// Kodierte Audio-Nutzdaten; Besitz liegt exklusiv beim Frame
    pub nutzdaten: Vec<u8>,
    /// Monotone Ankunftszeit in Millisekunden
    pub ankunft_ms: u64,
}

/// Ergebnis eines `einfuegen`-Aufrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aufnahme {
    /// Frame wurde in den Buffer aufgenommen
    Aufgenommen,
    /// Sequenz bereits abgespielt oder bereits im Buffer – verworfen
    Duplikat,
    /// Frame liegt zu weit hinter der Wiedergabe – verworfen
    Verspaetet,
}

/// Ergebnis eines `entnehmen`-Aufrufs (ein Frame-Tick)
#[derive(Debug)]
pub enum Entnahme {
    /// Naechster Frame ist abspielbar
    Paket(GepuffertesFrame),
    /// Die erwartete Sequenz gilt als verloren; der Aufrufer soll die
    /// Concealment-Funktion des Codecs fuer genau einen Frame aufrufen
    Verlust,
    /// Noch nichts faellig – beim naechsten Tick erneut abfragen
    Warten,
}

/// Statistiken des Jitter Buffers (Snapshot)
#[derive(Debug, Clone, Default)]
pub struct JitterStatistik {
    /// Eingereichte Frames gesamt (inkl. verworfener)
    pub empfangen: u64,
    /// Als Paket emittierte Frames
    pub abgespielt: u64,
    /// Als verloren signalisierte Sequenzen
    pub verloren: u64,
    /// Verworfene Duplikate
    pub duplikate: u64,
    /// Verworfene bzw. verdraengte zu spaete Frames
    pub verspaetet: u64,
    /// Verdraengungen durch vollen Buffer
    pub ueberlauf: u64,
    /// Emissionen aus dem eigentlich-unmoeglichen Aelter-als-erwartet-Pfad
    pub out_of_order_abgespielt: u64,
}

// ---------------------------------------------------------------------------
// AdaptiveJitterBuffer
// ---------------------------------------------------------------------------

/// Adaptiver Jitter Buffer – ein Exemplar pro entferntem Sprecher
///
/// Nicht thread-safe; der Aufrufer haelt einen Mutex nur fuer die Dauer
/// von `einfuegen`/`entnehmen` (keine IO- oder Codec-Aufrufe darunter).
pub struct AdaptiveJitterBuffer {
    konfig: JitterKonfig,
    /// Frames sortiert nach Sequenz, neueste vorn, aelteste hinten
    frames: VecDeque<GepuffertesFrame>,
    /// Zuletzt als Paket emittierte Sequenz
    zuletzt_abgespielt: Option<u16>,
    /// Naechste erwartete Sequenz (gesetzt ab der ersten Emission)
    naechste_erwartet: Option<u16>,
    /// Ankunftszeit des letzten Frames (fuer die Jitter-Messung)
    letzte_ankunft_ms: Option<u64>,
    /// Momentanes Ziel der Verzoegerung
    ziel_verzoegerung_ms: f64,
    /// Geglaettete aktuelle Verzoegerung
    adaptive_verzoegerung_ms: f64,
    /// Mittlerer Interarrival-Jitter (EWMA, alpha = 1/8)
    mittlerer_jitter_ms: f64,
    statistik: JitterStatistik,
}

impl AdaptiveJitterBuffer {
    /// Erstellt einen neuen Buffer mit gegebener Konfiguration
    pub fn neu(konfig: JitterKonfig) -> Self {
        let start = konfig.min_puffer_ms as f64;
        Self {
            konfig,
            frames: VecDeque::new(),
            zuletzt_abgespielt: None,
            naechste_erwartet: None,
            letzte_ankunft_ms: None,
            ziel_verzoegerung_ms: start,
            adaptive_verzoegerung_ms: start,
            mittlerer_jitter_ms: 0.0,
            statistik: JitterStatistik::default(),
        }
    }

    /// Erstellt einen Buffer mit Standardkonfiguration
    pub fn standard() -> Self {
        Self::neu(JitterKonfig::default())
    }

    /// Reiht einen eingetroffenen Frame ein
    ///
    /// `jetzt_ms` ist eine monotone Uhr; sie muss mit der Uhr der
    /// `entnehmen`-Aufrufe uebereinstimmen.
    pub fn einfuegen(&mut self, sequenz: u16, nutzdaten: Vec<u8>, jetzt_ms: u64) -> Aufnahme {
        self.statistik.empfangen += 1;

        // Interarrival-Jitter messen und Verzoegerung nachfuehren
        if let Some(vorher) = self.letzte_ankunft_ms {
            let delta = jetzt_ms.saturating_sub(vorher) as f64;
            let probe = (delta - self.konfig.frame_ms as f64).abs();
            self.mittlerer_jitter_ms += (probe - self.mittlerer_jitter_ms) / 8.0;
        }
        self.letzte_ankunft_ms = Some(jetzt_ms);
        self.verzoegerung_anpassen();

        // Bereits abgespielte Sequenzen sind Duplikate
        if let Some(zuletzt) = self.zuletzt_abgespielt {
            if !ist_neuer(sequenz, zuletzt) {
                self.statistik.duplikate += 1;
                tracing::trace!(sequenz, "Duplikat (bereits abgespielt) verworfen");
                return Aufnahme::Duplikat;
            }
        }

        // Weit hinter der Erwartung liegende Frames sind verspaetet
        if let Some(erwartet) = self.naechste_erwartet {
            if !ist_neuer(sequenz, erwartet)
                && abstand(sequenz, erwartet) as usize > self.konfig.max_pakete()
            {
                self.statistik.verspaetet += 1;
                tracing::trace!(sequenz, erwartet, "Verspaeteter Frame verworfen");
                return Aufnahme::Verspaetet;
            }
        }

        // Sortiert einfuegen (neueste vorn); Sequenz-Eindeutigkeit wahren
        let frame = GepuffertesFrame {
            sequenz,
            nutzdaten,
            ankunft_ms: jetzt_ms,
        };
        let mut einfuege_index = self.frames.len();
        for (i, vorhanden) in self.frames.iter().enumerate() {
            if vorhanden.sequenz == sequenz {
                self.statistik.duplikate += 1;
                return Aufnahme::Duplikat;
            }
            if ist_neuer(sequenz, vorhanden.sequenz) {
                einfuege_index = i;
                break;
            }
        }
        self.frames.insert(einfuege_index, frame);

        // Kapazitaetsgrenze: aeltesten Frame verdraengen
        if self.frames.len() > self.konfig.max_pakete() {
            if let Some(verdraengt) = self.frames.pop_back() {
                self.statistik.ueberlauf += 1;
                self.statistik.verspaetet += 1;
                tracing::debug!(
                    sequenz = verdraengt.sequenz,
                    "Buffer-Ueberlauf: aeltesten Frame verdraengt"
                );
            }
        }

        Aufnahme::Aufgenommen
    }

    /// Liefert das Ergebnis fuer einen Frame-Tick
    pub fn entnehmen(&mut self, jetzt_ms: u64) -> Entnahme {
        if self.frames.is_empty() {
            return Entnahme::Warten;
        }

        let erwartet = match self.naechste_erwartet {
            // Anfangspufferung: erst abspielen wenn genug Material liegt
            None => {
                let gepuffert_ms = self.frames.len() as u64 * self.konfig.frame_ms;
                if (gepuffert_ms as f64) < self.adaptive_verzoegerung_ms {
                    return Entnahme::Warten;
                }
                let frame = self.frames.pop_back().expect("nicht leer");
                self.zuletzt_abgespielt = Some(frame.sequenz);
                self.naechste_erwartet = Some(frame.sequenz.wrapping_add(1));
                self.statistik.abgespielt += 1;
                return Entnahme::Paket(frame);
            }
            Some(e) => e,
        };

        let aeltester = self.frames.back().expect("nicht leer");

        if aeltester.sequenz == erwartet {
            let frame = self.frames.pop_back().expect("nicht leer");
            self.zuletzt_abgespielt = Some(frame.sequenz);
            self.naechste_erwartet = Some(frame.sequenz.wrapping_add(1));
            self.statistik.abgespielt += 1;
            return Entnahme::Paket(frame);
        }

        if ist_neuer(aeltester.sequenz, erwartet) {
            // Luecke vor dem aeltesten Frame: verloren erklaeren sobald die
            // adaptive Verzoegerung seit seiner Ankunft verstrichen ist
            let wartezeit = jetzt_ms.saturating_sub(aeltester.ankunft_ms) as f64;
            if wartezeit >= self.adaptive_verzoegerung_ms {
                self.statistik.verloren += 1;
                self.naechste_erwartet = Some(erwartet.wrapping_add(1));
                tracing::trace!(sequenz = erwartet, "Sequenz als verloren erklaert");
                return Entnahme::Verlust;
            }
            return Entnahme::Warten;
        }

        // Aelter als erwartet: durch die Aufnahme-Pruefungen eigentlich
        // ausgeschlossen. Trotzdem emittieren statt zu blockieren; der
        // Wiedergabe-Zustand rueckt dabei nicht zurueck.
        let frame = self.frames.pop_back().expect("nicht leer");
        self.statistik.out_of_order_abgespielt += 1;
        tracing::debug!(
            sequenz = frame.sequenz,
            erwartet,
            "Frame aelter als erwartet emittiert"
        );
        Entnahme::Paket(frame)
    }

    /// Leert den Buffer und setzt den Wiedergabe-Zustand zurueck
    ///
    /// Wird beim Sichtbarkeitsverlust eines Sprechers aufgerufen, damit
    /// beim Wiedereintritt kein veraltetes Audio abgespielt wird.
    /// Statistiken bleiben erhalten.
    pub fn leeren(&mut self) {
        self.frames.clear();
        self.zuletzt_abgespielt = None;
        self.naechste_erwartet = None;
        self.letzte_ankunft_ms = None;
    }

    /// Aktuelle Anzahl gepufferter Frames
    pub fn fuellstand(&self) -> usize {
        self.frames.len()
    }

    /// Geglaettete aktuelle Verzoegerung in Millisekunden
    pub fn adaptive_verzoegerung_ms(&self) -> f64 {
        self.adaptive_verzoegerung_ms
    }

    /// Mittlerer Interarrival-Jitter in Millisekunden
    pub fn mittlerer_jitter_ms(&self) -> f64 {
        self.mittlerer_jitter_ms
    }

    /// Snapshot der Statistiken
    pub fn statistik(&self) -> &JitterStatistik {
        &self.statistik
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    /// Fuehrt das Verzoegerungsziel dem gemessenen Jitter nach
    ///
    /// Anstieg in Frame-Schritten, Abstieg in 1ms-Schritten: schnell hoch
    /// gegen Jitter-Spitzen, langsam runter gegen Oszillation.
    fn verzoegerung_anpassen(&mut self) {
        let frame = self.konfig.frame_ms as f64;
        let min = self.konfig.min_puffer_ms as f64;
        let max = self.konfig.max_puffer_ms as f64;

        let ziel_pakete = ((self.mittlerer_jitter_ms * 2.0) / frame).ceil().max(2.0);
        let neues_ziel = (ziel_pakete * frame).clamp(min, max);

        if neues_ziel > self.ziel_verzoegerung_ms {
            self.ziel_verzoegerung_ms = (self.ziel_verzoegerung_ms + frame).min(max);
        } else if neues_ziel < self.ziel_verzoegerung_ms {
            self.ziel_verzoegerung_ms = (self.ziel_verzoegerung_ms - 1.0).max(min);
        }

        self.adaptive_verzoegerung_ms =
            ((7.0 * self.adaptive_verzoegerung_ms + self.ziel_verzoegerung_ms) / 8.0)
                .clamp(min, max);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn konfig(min: u64, max: u64) -> JitterKonfig {
        JitterKonfig {
            min_puffer_ms: min,
            max_puffer_ms: max,
            frame_ms: 20,
        }
    }

    /// Buffer ohne Anfangspufferung (sofortige Wiedergabe)
    fn sofort_buffer() -> AdaptiveJitterBuffer {
        AdaptiveJitterBuffer::neu(konfig(0, 200))
    }

    fn sequenzen_entnehmen(buf: &mut AdaptiveJitterBuffer, jetzt_ms: u64) -> Vec<u16> {
        let mut seqs = Vec::new();
        loop {
            match buf.entnehmen(jetzt_ms) {
                Entnahme::Paket(f) => seqs.push(f.sequenz),
                Entnahme::Verlust => continue,
                Entnahme::Warten => break,
            }
        }
        seqs
    }

    #[test]
    fn geordnete_zustellung() {
        let mut buf = sofort_buffer();
        buf.einfuegen(1, vec![0x01], 0);
        buf.einfuegen(2, vec![0x02], 20);
        buf.einfuegen(3, vec![0x03], 40);

        let seqs = sequenzen_entnehmen(&mut buf, 60);
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(buf.statistik().empfangen, 3);
        assert_eq!(buf.statistik().verloren, 0);
        assert_eq!(buf.statistik().duplikate, 0);
    }

    #[test]
    fn umsortierung_und_duplikat() {
        let mut buf = sofort_buffer();
        buf.einfuegen(3, vec![0x03], 0);
        buf.einfuegen(1, vec![0x01], 5);
        buf.einfuegen(2, vec![0x02], 10);
        assert_eq!(buf.einfuegen(1, vec![0x01], 15), Aufnahme::Duplikat);

        let seqs = sequenzen_entnehmen(&mut buf, 100);
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(buf.statistik().empfangen, 4);
        assert_eq!(buf.statistik().duplikate, 1);
    }

    #[test]
    fn verlust_signalisiert_plc_genau_einmal() {
        // Feste 40ms-Verzoegerung ueber min == max-Haelfte
        let mut buf = AdaptiveJitterBuffer::neu(konfig(40, 200));
        buf.einfuegen(1, vec![0x01], 0);
        buf.einfuegen(2, vec![0x02], 20);
        buf.einfuegen(4, vec![0x04], 40); // 3 fehlt

        // t=60: Anfangspufferung erfuellt (3 Frames * 20ms >= 40ms)
        assert!(matches!(buf.entnehmen(60), Entnahme::Paket(f) if f.sequenz == 1));
        assert!(matches!(buf.entnehmen(60), Entnahme::Paket(f) if f.sequenz == 2));

        // Luecke: Frame 4 kam bei t=40, Verzoegerung ~40ms -> ab t=80 Verlust
        assert!(matches!(buf.entnehmen(60), Entnahme::Warten));
        assert!(matches!(buf.entnehmen(90), Entnahme::Verlust));
        assert!(matches!(buf.entnehmen(90), Entnahme::Paket(f) if f.sequenz == 4));

        assert_eq!(buf.statistik().verloren, 1);
        assert_eq!(buf.statistik().abgespielt, 3);
    }

    #[test]
    fn wrap_around_ist_fortlaufend() {
        let mut buf = sofort_buffer();
        buf.einfuegen(65534, vec![0xAA], 0);
        buf.einfuegen(65535, vec![0xBB], 20);
        buf.einfuegen(0, vec![0xCC], 40);
        buf.einfuegen(1, vec![0xDD], 60);

        let seqs = sequenzen_entnehmen(&mut buf, 100);
        assert_eq!(seqs, vec![65534, 65535, 0, 1]);
        assert_eq!(buf.statistik().verloren, 0);
    }

    #[test]
    fn duplikat_nach_wiedergabe_verworfen() {
        let mut buf = sofort_buffer();
        buf.einfuegen(1, vec![0x01], 0);
        let seqs = sequenzen_entnehmen(&mut buf, 50);
        assert_eq!(seqs, vec![1]);

        assert_eq!(buf.einfuegen(1, vec![0x01], 60), Aufnahme::Duplikat);
        assert_eq!(buf.fuellstand(), 0);
        assert_eq!(buf.statistik().duplikate, 1);
    }

    #[test]
    fn weit_zurueckliegender_frame_ist_verspaetet() {
        let mut buf = sofort_buffer();
        let kapazitaet = buf.konfig.max_pakete() as u16;

        // Wiedergabe weit nach vorn bringen
        buf.einfuegen(1000, vec![0x01], 0);
        sequenzen_entnehmen(&mut buf, 50);

        // Frame weit hinter der Erwartung
        let uralt = 1000u16.wrapping_sub(kapazitaet + 10);
        assert_eq!(buf.einfuegen(uralt, vec![0x02], 60), Aufnahme::Duplikat);
        // (faellt bereits unter die Duplikat-Regel, da aelter als abgespielt)
        assert_eq!(buf.fuellstand(), 0);
    }

    #[test]
    fn ueberlauf_verdraengt_den_aeltesten() {
        let mut buf = sofort_buffer();
        let kapazitaet = buf.konfig.max_pakete();

        // Buffer exakt fuellen, ohne abzuspielen
        for i in 0..=kapazitaet as u16 {
            buf.einfuegen(i, vec![i as u8], 0);
        }
        assert_eq!(buf.fuellstand(), kapazitaet);
        assert_eq!(buf.statistik().ueberlauf, 1);
        assert_eq!(buf.statistik().verspaetet, 1);

        // Sequenz 0 wurde verdraengt; die Wiedergabe beginnt bei 1
        match buf.entnehmen(1000) {
            Entnahme::Paket(f) => assert_eq!(f.sequenz, 1),
            e => panic!("Paket erwartet, bekam {:?}", e),
        }
    }

    #[test]
    fn anfangspufferung_wartet_auf_fuellung() {
        let mut buf = AdaptiveJitterBuffer::neu(konfig(60, 200));

        buf.einfuegen(1, vec![0x01], 0);
        assert!(matches!(buf.entnehmen(0), Entnahme::Warten));
        buf.einfuegen(2, vec![0x02], 20);
        assert!(matches!(buf.entnehmen(20), Entnahme::Warten));
        buf.einfuegen(3, vec![0x03], 40);
        // 3 Frames * 20ms >= 60ms -> Wiedergabe beginnt
        assert!(matches!(buf.entnehmen(40), Entnahme::Paket(f) if f.sequenz == 1));
    }

    #[test]
    fn verlust_erst_nach_ablauf_der_verzoegerung() {
        let mut buf = AdaptiveJitterBuffer::neu(konfig(40, 200));
        buf.einfuegen(1, vec![0x01], 0);
        buf.einfuegen(2, vec![0x02], 20);
        sequenzen_entnehmen(&mut buf, 40); // spielt 1 und 2

        buf.einfuegen(4, vec![0x04], 60); // 3 fehlt
        // Noch keine 40ms seit Ankunft von Frame 4
        assert!(matches!(buf.entnehmen(80), Entnahme::Warten));
        assert_eq!(buf.statistik().verloren, 0);
        // Jetzt ist die Verzoegerung verstrichen
        assert!(matches!(buf.entnehmen(105), Entnahme::Verlust));
        assert_eq!(buf.statistik().verloren, 1);
    }

    #[test]
    fn emission_ist_eindeutig() {
        // Beliebige Einfuege-Reihenfolge: jede eindeutige Sequenz verlaesst
        // den Buffer genau einmal als Paket
        let mut buf = sofort_buffer();
        let reihenfolge = [5u16, 2, 9, 2, 7, 1, 3, 9, 4, 6, 8, 1];
        let mut zeit = 0u64;
        for &seq in &reihenfolge {
            buf.einfuegen(seq, vec![seq as u8], zeit);
            zeit += 7;
        }

        let mut emittiert = Vec::new();
        let mut ticks = 0;
        loop {
            zeit += 20;
            ticks += 1;
            match buf.entnehmen(zeit) {
                Entnahme::Paket(f) => emittiert.push(f.sequenz),
                Entnahme::Verlust => {}
                Entnahme::Warten => {
                    if buf.fuellstand() == 0 || ticks > 100 {
                        break;
                    }
                }
            }
        }

        let mut eindeutig = emittiert.clone();
        eindeutig.sort_unstable();
        eindeutig.dedup();
        assert_eq!(eindeutig.len(), emittiert.len(), "Doppelte Emission");
        assert_eq!(eindeutig, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn adaptive_verzoegerung_bleibt_in_grenzen() {
        let mut buf = AdaptiveJitterBuffer::neu(konfig(40, 120));

        // Stark schwankende Ankunftszeiten
        let ankuenfte = [0u64, 5, 80, 85, 200, 202, 350, 360, 500, 640, 650, 655];
        for (i, &t) in ankuenfte.iter().enumerate() {
            buf.einfuegen(i as u16, vec![0], t);
            let v = buf.adaptive_verzoegerung_ms();
            assert!((40.0..=120.0).contains(&v), "Verzoegerung ausser Grenzen: {}", v);
        }

        // Auch nach vielen ruhigen Frames nicht unter das Minimum
        for i in 100..300u16 {
            buf.einfuegen(i, vec![0], 10_000 + i as u64 * 20);
            let v = buf.adaptive_verzoegerung_ms();
            assert!((40.0..=120.0).contains(&v));
        }
    }

    #[test]
    fn jitter_erhoeht_die_verzoegerung() {
        let mut buf = AdaptiveJitterBuffer::neu(konfig(40, 200));
        let ruhig = buf.adaptive_verzoegerung_ms();

        // Stark verspaetete Ankuenfte erzeugen grossen Jitter
        let mut zeit = 0u64;
        for i in 0..20u16 {
            zeit += if i % 2 == 0 { 5 } else { 90 };
            buf.einfuegen(i, vec![0], zeit);
        }
        assert!(
            buf.adaptive_verzoegerung_ms() > ruhig,
            "Verzoegerung muss unter Jitter wachsen"
        );
    }

    #[test]
    fn leeren_startet_wiedergabe_neu() {
        let mut buf = sofort_buffer();
        buf.einfuegen(10, vec![0x01], 0);
        sequenzen_entnehmen(&mut buf, 50);

        buf.leeren();
        assert_eq!(buf.fuellstand(), 0);

        // Nach dem Leeren darf die Wiedergabe bei einer aelteren Sequenz
        // neu beginnen (Sprecher kam neu in Sichtweite)
        buf.einfuegen(3, vec![0x02], 100);
        let seqs = sequenzen_entnehmen(&mut buf, 200);
        assert_eq!(seqs, vec![3]);
    }

    #[test]
    fn leere_entnahme_wartet() {
        let mut buf = sofort_buffer();
        assert!(matches!(buf.entnehmen(0), Entnahme::Warten));
    }
}
