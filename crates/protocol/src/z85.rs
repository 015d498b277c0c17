//! Z85-Textcodec fuer Sideband-Tunneling
//!
//! Kodiert binaere Frames in druckbaren Text (ZeroMQ-Z85-Alphabet), damit
//! sie durch Nur-Text-Kanaele getunnelt werden koennen. Im Gegensatz zum
//! strikten Z85 akzeptiert diese Variante beliebige Eingabelaengen:
//! eine unvollstaendige 4er-Gruppe von k Bytes wird als k+1 Zeichen
//! ausgegeben (Padding-Bytes sind 0, beim Dekodieren wird mit dem
//! hoechsten Alphabet-Zeichen aufgefuellt; der Uebertrag bleibt dadurch
//! in den unteren Bytes und die oberen k Bytes sind exakt).

use thiserror::Error;

/// Z85-Alphabet (85 druckbare ASCII-Zeichen, ZeroMQ-Reihenfolge)
const ALPHABET: &[u8; 85] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ.-:+=^!/*?&<>()[]{}@%$#";

/// Rueckwaerts-Tabelle: ASCII-Byte -> Alphabet-Index (oder -1)
const RUECKTABELLE: [i8; 256] = baue_ruecktabelle();

const fn baue_ruecktabelle() -> [i8; 256] {
    let mut tabelle = [-1i8; 256];
    let mut i = 0;
    while i < 85 {
        tabelle[ALPHABET[i] as usize] = i as i8;
        i += 1;
    }
    tabelle
}

/// Fehler beim Z85-Dekodieren
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Z85Fehler {
    #[error("Ungueltiges Z85-Zeichen: 0x{0:02x}")]
    UngueltigesZeichen(u8),

    #[error("Ungueltige Z85-Laenge: {0} (Rest von 1 Zeichen ist nicht dekodierbar)")]
    UngueltigeLaenge(usize),

    #[error("Z85-Gruppe ueberschreitet 32 Bit")]
    Ueberlauf,
}

/// Kodiert beliebige Bytes als Z85-Text
pub fn kodieren(daten: &[u8]) -> String {
    let mut aus = String::with_capacity(daten.len() / 4 * 5 + 5);

    for gruppe in daten.chunks(4) {
        let mut wert: u32 = 0;
        for i in 0..4 {
            let byte = gruppe.get(i).copied().unwrap_or(0);
            wert = (wert << 8) | byte as u32;
        }

        let mut zeichen = [0u8; 5];
        let mut rest = wert;
        for z in zeichen.iter_mut().rev() {
            *z = ALPHABET[(rest % 85) as usize];
            rest /= 85;
        }

        // Unvollstaendige Gruppe: nur die oberen k+1 Ziffern ausgeben
        let anzahl = gruppe.len() + 1;
        for &z in zeichen.iter().take(anzahl) {
            aus.push(z as char);
        }
    }

    aus
}

/// Dekodiert Z85-Text zurueck in Bytes
pub fn dekodieren(text: &str) -> Result<Vec<u8>, Z85Fehler> {
    let bytes = text.as_bytes();
    let mut aus = Vec::with_capacity(bytes.len() / 5 * 4 + 4);

    for gruppe in bytes.chunks(5) {
        if gruppe.len() == 1 {
            // Eine Ziffer traegt weniger als ein Byte Information
            return Err(Z85Fehler::UngueltigeLaenge(text.len()));
        }

        let mut wert: u64 = 0;
        for i in 0..5 {
            let ziffer = match gruppe.get(i) {
                Some(&z) => {
                    let idx = RUECKTABELLE[z as usize];
                    if idx < 0 {
                        return Err(Z85Fehler::UngueltigesZeichen(z));
                    }
                    idx as u64
                }
                // Fehlende Ziffern mit dem Maximum auffuellen; der dadurch
                // addierte Betrag bleibt unterhalb der oberen k Bytes
                None => 84,
            };
            wert = wert * 85 + ziffer;
        }
        if wert > u32::MAX as u64 {
            return Err(Z85Fehler::Ueberlauf);
        }

        let bytes4 = (wert as u32).to_be_bytes();
        aus.extend_from_slice(&bytes4[..gruppe.len() - 1]);
    }

    Ok(aus)
}
