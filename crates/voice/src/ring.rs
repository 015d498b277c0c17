//! Ausgabe-Ring fuer dekodierte Samples
//!
//! Fester i16-Ringpuffer zwischen der Talker-Pipeline (Schreiber) und dem
//! Audio-Geraete-Callback (Leser). Schreiber blockieren nie: was nicht
//! mehr passt, wird verworfen und gezaehlt. Der Leser bekommt bei
//! Unterlauf Stille aufgefuellt.

/// Ringpuffer fuer PCM-Samples (i16, mono)
pub struct AusgabeRing {
    puffer: Vec<i16>,
    lese_pos: usize,
    schreib_pos: usize,
    /// Anzahl aktuell lesbarer Samples
    belegt: usize,
    /// Durch Ueberlauf verworfene Samples
    verworfen: u64,
    /// Durch Unterlauf mit Stille aufgefuellte Samples
    unterlauf: u64,
}

impl AusgabeRing {
    /// Erstellt einen Ring mit `kapazitaet` Samples
    pub fn neu(kapazitaet: usize) -> Self {
        Self {
            puffer: vec![0i16; kapazitaet],
            lese_pos: 0,
            schreib_pos: 0,
            belegt: 0,
            verworfen: 0,
            unterlauf: 0,
        }
    }

    /// Schreibt Samples; verwirft bei Ueberlauf statt zu blockieren
    ///
    /// Gibt die Anzahl tatsaechlich geschriebener Samples zurueck.
    pub fn schreiben(&mut self, samples: &[i16]) -> usize {
        let frei = self.puffer.len() - self.belegt;
        let schreibbar = samples.len().min(frei);
        if schreibbar < samples.len() {
            self.verworfen += (samples.len() - schreibbar) as u64;
            tracing::trace!(
                verworfen = samples.len() - schreibbar,
                "Ausgabe-Ring voll – Samples verworfen"
            );
        }

        for &sample in &samples[..schreibbar] {
            self.puffer[self.schreib_pos] = sample;
            self.schreib_pos = (self.schreib_pos + 1) % self.puffer.len();
        }
        self.belegt += schreibbar;
        schreibbar
    }

    /// Liest Samples; fuellt bei Unterlauf mit Stille auf
    ///
    /// Gibt die Anzahl echter (nicht aufgefuellter) Samples zurueck.
    pub fn lesen(&mut self, ziel: &mut [i16]) -> usize {
        let lesbar = ziel.len().min(self.belegt);
        for z in ziel.iter_mut().take(lesbar) {
            *z = self.puffer[self.lese_pos];
            self.lese_pos = (self.lese_pos + 1) % self.puffer.len();
        }
        self.belegt -= lesbar;

        if lesbar < ziel.len() {
            self.unterlauf += (ziel.len() - lesbar) as u64;
            ziel[lesbar..].fill(0);
        }
        lesbar
    }

    /// Leert den Ring (z.B. bei Sichtbarkeitsverlust des Sprechers)
    pub fn leeren(&mut self) {
        self.lese_pos = 0;
        self.schreib_pos = 0;
        self.belegt = 0;
    }

    /// Anzahl aktuell lesbarer Samples
    pub fn fuellstand(&self) -> usize {
        self.belegt
    }

    /// Gesamtkapazitaet in Samples
    pub fn kapazitaet(&self) -> usize {
        self.puffer.len()
    }

    /// Durch Ueberlauf verworfene Samples
    pub fn verworfen(&self) -> u64 {
        self.verworfen
    }

    /// Durch Unterlauf aufgefuellte Samples
    pub fn unterlauf(&self) -> u64 {
        self.unterlauf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schreiben_und_lesen_round_trip() {
        let mut ring = AusgabeRing::neu(16);
        let daten = [1i16, 2, 3, 4];
        assert_eq!(ring.schreiben(&daten), 4);
        assert_eq!(ring.fuellstand(), 4);

        let mut ziel = [0i16; 4];
        assert_eq!(ring.lesen(&mut ziel), 4);
        assert_eq!(ziel, daten);
        assert_eq!(ring.fuellstand(), 0);
    }

    #[test]
    fn ueberlauf_verwirft_statt_zu_blockieren() {
        let mut ring = AusgabeRing::neu(4);
        let daten = [1i16, 2, 3, 4, 5, 6];
        assert_eq!(ring.schreiben(&daten), 4);
        assert_eq!(ring.verworfen(), 2);

        let mut ziel = [0i16; 4];
        ring.lesen(&mut ziel);
        assert_eq!(ziel, [1, 2, 3, 4], "Aelteste Samples bleiben erhalten");
    }

    #[test]
    fn unterlauf_fuellt_stille_auf() {
        let mut ring = AusgabeRing::neu(8);
        ring.schreiben(&[7i16, 8]);

        let mut ziel = [9i16; 5];
        let echt = ring.lesen(&mut ziel);
        assert_eq!(echt, 2);
        assert_eq!(ziel, [7, 8, 0, 0, 0]);
        assert_eq!(ring.unterlauf(), 3);
    }

    #[test]
    fn wrap_around_im_ring() {
        let mut ring = AusgabeRing::neu(4);
        ring.schreiben(&[1, 2, 3]);
        let mut ziel = [0i16; 2];
        ring.lesen(&mut ziel);

        // Schreibt ueber die physische Puffergrenze
        ring.schreiben(&[4, 5, 6]);
        let mut rest = [0i16; 4];
        let echt = ring.lesen(&mut rest);
        assert_eq!(echt, 4);
        assert_eq!(rest, [3, 4, 5, 6]);
    }

    #[test]
    fn leeren_verwirft_inhalt() {
        let mut ring = AusgabeRing::neu(8);
        ring.schreiben(&[1, 2, 3]);
        ring.leeren();
        assert_eq!(ring.fuellstand(), 0);

        let mut ziel = [5i16; 2];
        assert_eq!(ring.lesen(&mut ziel), 0);
        assert_eq!(ziel, [0, 0]);
    }
}
