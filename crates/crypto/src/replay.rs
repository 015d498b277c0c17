//! Sliding-Window Replay-Schutz fuer AEAD-Zaehler
//!
//! Merkt sich den hoechsten akzeptierten Zaehler plus eine 64-Bit-Bitmap
//! der 63 Zaehler direkt darunter (Bit 0 = Maximum). Damit sind
//! Out-of-Order-Ankuenfte bis 63 Positionen hinter dem Maximum erlaubt –
//! weit mehr als ein 20ms-Frame-Strom je umsortiert wird.

/// Fensterbreite in Zaehler-Positionen
pub const FENSTER_BREITE: u64 = 64;

/// Ergebnis einer Replay-Pruefung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPruefung {
    /// Zaehler ist neu und wurde vermerkt
    Akzeptiert,
    /// Zaehler wurde bereits akzeptiert
    Wiederholung,
    /// Zaehler liegt 64 oder mehr Positionen hinter dem Maximum
    AusserhalbFenster,
}

/// Sliding-Window ueber zuletzt akzeptierte Zaehler
#[derive(Debug, Default)]
pub struct ReplayFenster {
    /// Hoechster bisher akzeptierter Zaehler
    maximum: u64,
    /// Bitmap der akzeptierten Zaehler; Bit n = `maximum - n`
    bitmap: u64,
    /// Wurde bereits ein Zaehler akzeptiert?
    belegt: bool,
}

impl ReplayFenster {
    /// Erstellt ein leeres Fenster
    pub fn neu() -> Self {
        Self::default()
    }

    /// Prueft einen Zaehler und vermerkt ihn bei Annahme
    ///
    /// Kein Zaehler wird je zweimal akzeptiert.
    pub fn pruefen_und_merken(&mut self, zaehler: u64) -> ReplayPruefung {
        if !self.belegt {
            self.maximum = zaehler;
            self.bitmap = 1;
            self.belegt = true;
            return ReplayPruefung::Akzeptiert;
        }

        if zaehler > self.maximum {
            // Fenster nach vorne schieben; grosse Spruenge leeren es komplett
            let sprung = zaehler - self.maximum;
            self.bitmap = if sprung >= FENSTER_BREITE {
                0
            } else {
                self.bitmap << sprung
            };
            self.bitmap |= 1;
            self.maximum = zaehler;
            return ReplayPruefung::Akzeptiert;
        }

        let abstand = self.maximum - zaehler;
        if abstand >= FENSTER_BREITE {
            return ReplayPruefung::AusserhalbFenster;
        }

        let bit = 1u64 << abstand;
        if self.bitmap & bit != 0 {
            return ReplayPruefung::Wiederholung;
        }
        self.bitmap |= bit;
        ReplayPruefung::Akzeptiert
    }

    /// Hoechster bisher akzeptierter Zaehler (0 wenn leer)
    pub fn maximum(&self) -> u64 {
        self.maximum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotone_zaehler_akzeptiert() {
        let mut fenster = ReplayFenster::neu();
        for zaehler in 1..=100u64 {
            assert_eq!(
                fenster.pruefen_und_merken(zaehler),
                ReplayPruefung::Akzeptiert
            );
        }
        assert_eq!(fenster.maximum(), 100);
    }

    #[test]
    fn wiederholung_erkannt() {
        let mut fenster = ReplayFenster::neu();
        assert_eq!(fenster.pruefen_und_merken(5), ReplayPruefung::Akzeptiert);
        assert_eq!(fenster.pruefen_und_merken(5), ReplayPruefung::Wiederholung);
    }

    #[test]
    fn out_of_order_innerhalb_fenster() {
        let mut fenster = ReplayFenster::neu();
        fenster.pruefen_und_merken(10);
        fenster.pruefen_und_merken(12);
        // 11 kam zu spaet, ist aber im Fenster
        assert_eq!(fenster.pruefen_und_merken(11), ReplayPruefung::Akzeptiert);
        assert_eq!(fenster.pruefen_und_merken(11), ReplayPruefung::Wiederholung);
    }

    #[test]
    fn fenstergrenze_exakt() {
        let mut fenster = ReplayFenster::neu();
        fenster.pruefen_und_merken(100);

        // maximum - 63 ist die letzte noch gueltige Position
        assert_eq!(fenster.pruefen_und_merken(37), ReplayPruefung::Akzeptiert);
        assert_eq!(fenster.pruefen_und_merken(37), ReplayPruefung::Wiederholung);

        // maximum - 64 liegt ausserhalb
        assert_eq!(
            fenster.pruefen_und_merken(36),
            ReplayPruefung::AusserhalbFenster
        );
    }

    #[test]
    fn grosser_sprung_leert_das_fenster() {
        let mut fenster = ReplayFenster::neu();
        fenster.pruefen_und_merken(1);
        fenster.pruefen_und_merken(1000);
        assert_eq!(fenster.maximum(), 1000);
        // Alte Positionen sind jetzt ausserhalb
        assert_eq!(
            fenster.pruefen_und_merken(1),
            ReplayPruefung::AusserhalbFenster
        );
        // Positionen im neuen Fenster sind frisch
        assert_eq!(fenster.pruefen_und_merken(990), ReplayPruefung::Akzeptiert);
    }

    #[test]
    fn erster_zaehler_beliebig() {
        // Sessions koennen mitten im Strom resynchronisieren
        let mut fenster = ReplayFenster::neu();
        assert_eq!(fenster.pruefen_und_merken(500), ReplayPruefung::Akzeptiert);
        assert_eq!(fenster.pruefen_und_merken(499), ReplayPruefung::Akzeptiert);
    }
}
