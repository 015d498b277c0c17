//! Codec-Grenze: Dekoder- und Enkoder-Traits
//!
//! Der eigentliche Sprach-Codec (inklusive nativer Verlustverschleierung)
//! ist ein externer Mitspieler. Die Pipeline konsumiert ihn ueber diese
//! Traits; Implementierungen binden die jeweilige Codec-Bibliothek an.

use thiserror::Error;

/// Fehler der Codec-Grenze
#[derive(Debug, Error)]
pub enum CodecFehler {
    #[error("Dekodieren fehlgeschlagen: {0}")]
    Dekodieren(String),

    #[error("Kodieren fehlgeschlagen: {0}")]
    Kodieren(String),

    #[error("Zielpuffer zu klein: {benoetigt} benoetigt, {vorhanden} vorhanden")]
    ZielZuKlein { benoetigt: usize, vorhanden: usize },
}

/// Dekoder-Seite des Sprach-Codecs
pub trait SprachDecoder: Send {
    /// Dekodiert einen Frame in `ziel`; gibt die Sample-Anzahl zurueck
    fn dekodieren(&mut self, nutzdaten: &[u8], ziel: &mut [i16]) -> Result<usize, CodecFehler>;

    /// Verschleiert genau einen verlorenen Frame (Codec-natives PLC)
    ///
    /// Schreibt eine plausible Fortsetzung des letzten Audios nach `ziel`.
    fn verschleiern(&mut self, ziel: &mut [i16]) -> Result<usize, CodecFehler>;

    /// Setzt den Dekoder-Zustand zurueck (neuer Stream)
    fn zuruecksetzen(&mut self);
}

/// Enkoder-Seite des Sprach-Codecs
pub trait SprachEncoder: Send {
    /// Kodiert einen PCM-Frame nach `ziel`; gibt die Byte-Anzahl zurueck
    fn kodieren(&mut self, pcm: &[i16], ziel: &mut [u8]) -> Result<usize, CodecFehler>;
}

// ---------------------------------------------------------------------------
// Durchreich-Codec (Tests und Diagnose)
// ---------------------------------------------------------------------------

/// 8-Bit-Durchreich-Codec: ein Byte pro Sample (hoechstwertiges Byte)
///
/// Fuer Tests und Loopback-Diagnose; ein 20ms-Frame bleibt damit unter
/// der Payload-Obergrenze. Verlustfrei fuer Samples, die Vielfache von
/// 256 sind. Die Verschleierung wiederholt den letzten Frame mit
/// halbierter Amplitude.
pub struct PcmDurchreich {
    letzter_frame: Vec<i16>,
}

impl PcmDurchreich {
    pub fn neu() -> Self {
        Self {
            letzter_frame: Vec::new(),
        }
    }
}

impl Default for PcmDurchreich {
    fn default() -> Self {
        Self::neu()
    }
}

impl SprachDecoder for PcmDurchreich {
    fn dekodieren(&mut self, nutzdaten: &[u8], ziel: &mut [i16]) -> Result<usize, CodecFehler> {
        let samples = nutzdaten.len();
        if samples > ziel.len() {
            return Err(CodecFehler::ZielZuKlein {
                benoetigt: samples,
                vorhanden: ziel.len(),
            });
        }
        for (i, &byte) in nutzdaten.iter().enumerate() {
            ziel[i] = (byte as i8 as i16) << 8;
        }
        self.letzter_frame.clear();
        self.letzter_frame.extend_from_slice(&ziel[..samples]);
        Ok(samples)
    }

    fn verschleiern(&mut self, ziel: &mut [i16]) -> Result<usize, CodecFehler> {
        let samples = self.letzter_frame.len().min(ziel.len());
        for i in 0..samples {
            ziel[i] = self.letzter_frame[i] / 2;
        }
        ziel[samples..].fill(0);
        // Wiederholte Verschleierung klingt weiter ab
        for s in self.letzter_frame.iter_mut() {
            *s /= 2;
        }
        Ok(ziel.len())
    }

    fn zuruecksetzen(&mut self) {
        self.letzter_frame.clear();
    }
}

impl SprachEncoder for PcmDurchreich {
    fn kodieren(&mut self, pcm: &[i16], ziel: &mut [u8]) -> Result<usize, CodecFehler> {
        if pcm.len() > ziel.len() {
            return Err(CodecFehler::Kodieren(format!(
                "Zielpuffer zu klein: {} Bytes benoetigt",
                pcm.len()
            )));
        }
        for (i, &sample) in pcm.iter().enumerate() {
            ziel[i] = (sample >> 8) as u8;
        }
        Ok(pcm.len())
    }
}
