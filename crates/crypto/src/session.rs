//! Sichere Session: ECDH-Handshake und AEAD-Kanal
//!
//! Jede Seite haelt ein ephemeres P-256-Schluesselpaar und gibt den
//! oeffentlichen Schluessel als rohes `X || Y` (64 Bytes) heraus. Aus dem
//! DH-Geheimnis werden via HKDF-SHA256 zwei Richtungsschluessel und zwei
//! Nonce-Praefixe abgeleitet.
//!
//! ## Orientierungsfreie Ableitung
//! Das Transkript hasht die beiden oeffentlichen Schluessel lexikografisch
//! sortiert; beide Seiten berechnen damit identisches Material, ohne
//! Rollen auszutauschen. Die Seite mit dem lexikografisch kleineren
//! Schluessel sendet mit `(key0, praefix0)` und empfaengt mit
//! `(key1, praefix1)`; die andere Seite spiegelbildlich.
//!
//! ## Nonce-Aufbau (12 Bytes)
//! ```text
//! [praefix(4)] [zaehler(8, big-endian)]
//! ```
//! Der Sende-Zaehler wird vor jeder Verschluesselung erhoeht; Kollisionen
//! sind damit innerhalb einer Session (~2^64 Frames) ausgeschlossen.
//!
//! DH-Geheimnis, PRK und der private Schluessel werden unmittelbar nach
//! der Ableitung genullt bzw. gedroppt; die Richtungsschluessel beim
//! Schliessen der Session.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::{CryptoFehler, CryptoResult};
use crate::replay::{ReplayFenster, ReplayPruefung};
use crate::types::SecretBytes;

/// Laenge eines rohen oeffentlichen Schluessels (X || Y)
pub const PUBLIC_KEY_LAENGE: usize = 64;

/// Laenge des AEAD-Auth-Tags
pub const TAG_LAENGE: usize = 16;

/// Laenge der Nonce
pub const NONCE_LAENGE: usize = 12;

/// Domain-Label fuer das Handshake-Transkript
const TRANSKRIPT_LABEL: &[u8] = b"earshot-handshake-v1";

/// Domain-Label fuer die HKDF-Expansion
const EXPAND_INFO: &[u8] = b"earshot-richtungsschluessel-v1";

// ---------------------------------------------------------------------------
// VerschluesselterRahmen
// ---------------------------------------------------------------------------

/// Ergebnis einer Verschluesselung: Nonce, Tag und Chiffrat getrennt
///
/// Entspricht dem Wire-Layout des `EncryptedEnvelope`.
#[derive(Debug, Clone)]
pub struct VerschluesselterRahmen {
    pub iv: [u8; NONCE_LAENGE],
    pub tag: [u8; TAG_LAENGE],
    pub chiffrat: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Interne Richtungszustaende
// ---------------------------------------------------------------------------

struct SendeSeite {
    schluessel: Option<SecretBytes>,
    nonce_praefix: [u8; 4],
    /// Streng monoton; Inkrement vor jeder Verschluesselung
    zaehler: u64,
}

struct EmpfangsSeite {
    schluessel: Option<SecretBytes>,
    nonce_praefix: [u8; 4],
    fenster: ReplayFenster,
}

// ---------------------------------------------------------------------------
// SecuritySession
// ---------------------------------------------------------------------------

/// Sichere Session eines Peers: Handshake-Zustand plus AEAD-Richtungen
///
/// Sende- und Empfangsseite sind getrennt gesperrt; Verschluesselung und
/// Replay-Buchfuehrung serialisieren sich nur innerhalb ihrer Richtung.
pub struct SecuritySession {
    ephemer: Mutex<Option<EphemeralSecret>>,
    lokal_pub: [u8; PUBLIC_KEY_LAENGE],
    sende: Mutex<SendeSeite>,
    empfang: Mutex<EmpfangsSeite>,
}

impl SecuritySession {
    /// Erstellt eine neue Session mit frischem ephemeren Schluesselpaar
    pub fn neu() -> Self {
        let geheim = EphemeralSecret::random(&mut OsRng);
        let oeffentlich = geheim.public_key();
        let punkt = oeffentlich.to_encoded_point(false);
        let mut lokal_pub = [0u8; PUBLIC_KEY_LAENGE];
        // SEC1-unkomprimiert ist 0x04 || X || Y; das Tag-Byte faellt weg
        lokal_pub.copy_from_slice(&punkt.as_bytes()[1..]);

        Self {
            ephemer: Mutex::new(Some(geheim)),
            lokal_pub,
            sende: Mutex::new(SendeSeite {
                schluessel: None,
                nonce_praefix: [0; 4],
                zaehler: 0,
            }),
            empfang: Mutex::new(EmpfangsSeite {
                schluessel: None,
                nonce_praefix: [0; 4],
                fenster: ReplayFenster::neu(),
            }),
        }
    }

    /// Roher oeffentlicher Schluessel (X || Y) fuer das Login-Paket
    pub fn oeffentlicher_schluessel(&self) -> [u8; PUBLIC_KEY_LAENGE] {
        self.lokal_pub
    }

    /// Prueft ob der Handshake abgeschlossen ist
    pub fn ist_etabliert(&self) -> bool {
        self.sende.lock().schluessel.is_some()
    }

    /// Schliesst den Handshake mit dem Gegenseiten-Schluessel ab
    ///
    /// Schluessel, Nonce-Praefixe und Zaehler werden atomar gesetzt; ein
    /// zweiter Aufruf schlaegt fehl (der ephemere Schluessel ist dann
    /// bereits verbraucht).
    pub fn handshake_abschliessen(&self, remote_pub: &[u8]) -> CryptoResult<()> {
        if remote_pub.len() != PUBLIC_KEY_LAENGE {
            return Err(CryptoFehler::UngueltigerRemoteSchluessel {
                erwartet: PUBLIC_KEY_LAENGE,
                erhalten: remote_pub.len(),
            });
        }

        // Rohes X || Y in SEC1-unkomprimiert zurueckverwandeln
        let mut sec1 = [0u8; PUBLIC_KEY_LAENGE + 1];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(remote_pub);
        let remote_schluessel = PublicKey::from_sec1_bytes(&sec1)
            .map_err(|_| CryptoFehler::RemoteSchluesselKeinKurvenpunkt)?;

        let geheim = self
            .ephemer
            .lock()
            .take()
            .ok_or(CryptoFehler::HandshakeUnvollstaendig)?;

        // DH-Geheimnis; wird beim Drop von p256 genullt
        let dh = geheim.diffie_hellman(&remote_schluessel);

        // Transkript: Label || min(pubs) || max(pubs) – orientierungsfrei
        let (kleiner, groesser) = if self.lokal_pub.as_slice() <= remote_pub {
            (self.lokal_pub.as_slice(), remote_pub)
        } else {
            (remote_pub, self.lokal_pub.as_slice())
        };
        let mut hasher = Sha256::new();
        hasher.update(TRANSKRIPT_LABEL);
        hasher.update(kleiner);
        hasher.update(groesser);
        let transkript = hasher.finalize();

        // HKDF-Extract(salt = Transkript, ikm = DH) + Expand(72 Bytes)
        let hk = Hkdf::<Sha256>::new(Some(transkript.as_slice()), dh.raw_secret_bytes().as_slice());
        let mut okm = [0u8; 72];
        hk.expand(EXPAND_INFO, &mut okm)
            .map_err(|e| CryptoFehler::SchluesselAbleitung(e.to_string()))?;

        let schluessel0 = SecretBytes::new(okm[0..32].to_vec());
        let schluessel1 = SecretBytes::new(okm[32..64].to_vec());
        let mut praefix0 = [0u8; 4];
        praefix0.copy_from_slice(&okm[64..68]);
        let mut praefix1 = [0u8; 4];
        praefix1.copy_from_slice(&okm[68..72]);
        okm.iter_mut().for_each(|b| *b = 0);

        // Rollenfreie Zuordnung: der lexikografisch kleinere Schluessel
        // sendet mit Richtung 0, die Gegenseite spiegelbildlich
        let ich_bin_kleiner = self.lokal_pub.as_slice() < remote_pub;
        let (sende_schluessel, sende_praefix, empfangs_schluessel, empfangs_praefix) =
            if ich_bin_kleiner {
                (schluessel0, praefix0, schluessel1, praefix1)
            } else {
                (schluessel1, praefix1, schluessel0, praefix0)
            };

        {
            let mut sende = self.sende.lock();
            sende.schluessel = Some(sende_schluessel);
            sende.nonce_praefix = sende_praefix;
            sende.zaehler = 0;
        }
        {
            let mut empfang = self.empfang.lock();
            empfang.schluessel = Some(empfangs_schluessel);
            empfang.nonce_praefix = empfangs_praefix;
            empfang.fenster = ReplayFenster::neu();
        }

        tracing::debug!("Handshake abgeschlossen");
        Ok(())
    }

    /// Verschluesselt einen Klartext-Frame
    ///
    /// AES-256-GCM, leeres AAD; Tag (16 Bytes) getrennt vom Chiffrat.
    pub fn verschluesseln(&self, klartext: &[u8]) -> CryptoResult<VerschluesselterRahmen> {
        let mut sende = self.sende.lock();
        let schluessel = sende
            .schluessel
            .as_ref()
            .ok_or(CryptoFehler::HandshakeUnvollstaendig)?;

        let cipher = Aes256Gcm::new_from_slice(schluessel.as_bytes())
            .map_err(|e| CryptoFehler::Verschluesselung(e.to_string()))?;

        sende.zaehler += 1;
        let mut iv = [0u8; NONCE_LAENGE];
        iv[0..4].copy_from_slice(&sende.nonce_praefix);
        iv[4..12].copy_from_slice(&sende.zaehler.to_be_bytes());

        let mut kombiniert = cipher
            .encrypt(Nonce::from_slice(&iv), klartext)
            .map_err(|e| CryptoFehler::Verschluesselung(e.to_string()))?;

        // AEAD liefert chiffrat || tag; fuer das Wire-Layout trennen
        let tag_start = kombiniert.len() - TAG_LAENGE;
        let mut tag = [0u8; TAG_LAENGE];
        tag.copy_from_slice(&kombiniert[tag_start..]);
        kombiniert.truncate(tag_start);

        Ok(VerschluesselterRahmen {
            iv,
            tag,
            chiffrat: kombiniert,
        })
    }

    /// Entschluesselt und verifiziert einen Frame
    ///
    /// Reihenfolge: Nonce-Praefix pruefen, AEAD verifizieren, erst danach
    /// das Replay-Fenster fortschreiben – gefaelschte Zaehler koennen das
    /// Fenster so nicht vergiften.
    pub fn entschluesseln(
        &self,
        iv: &[u8; NONCE_LAENGE],
        tag: &[u8; TAG_LAENGE],
        chiffrat: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let mut empfang = self.empfang.lock();
        let schluessel = empfang
            .schluessel
            .as_ref()
            .ok_or(CryptoFehler::HandshakeUnvollstaendig)?;

        if iv[0..4] != empfang.nonce_praefix {
            return Err(CryptoFehler::UngueltigeNonce);
        }
        let mut zaehler_bytes = [0u8; 8];
        zaehler_bytes.copy_from_slice(&iv[4..12]);
        let zaehler = u64::from_be_bytes(zaehler_bytes);

        let cipher = Aes256Gcm::new_from_slice(schluessel.as_bytes())
            .map_err(|e| CryptoFehler::Verschluesselung(e.to_string()))?;

        let mut kombiniert = Vec::with_capacity(chiffrat.len() + TAG_LAENGE);
        kombiniert.extend_from_slice(chiffrat);
        kombiniert.extend_from_slice(tag);

        let klartext = cipher
            .decrypt(Nonce::from_slice(iv), kombiniert.as_slice())
            .map_err(|_| CryptoFehler::AuthentifizierungFehlgeschlagen)?;

        match empfang.fenster.pruefen_und_merken(zaehler) {
            ReplayPruefung::Akzeptiert => Ok(klartext),
            ReplayPruefung::Wiederholung => Err(CryptoFehler::ReplayErkannt(zaehler)),
            ReplayPruefung::AusserhalbFenster => Err(CryptoFehler::ReplayAusserhalbFenster {
                zaehler,
                abstand: empfang.fenster.maximum() - zaehler,
            }),
        }
    }

    /// Schliesst die Session und nullt alles Schluesselmaterial
    pub fn schliessen(&self) {
        *self.ephemer.lock() = None;
        let mut sende = self.sende.lock();
        if let Some(ref mut s) = sende.schluessel {
            s.nullen();
        }
        sende.schluessel = None;
        sende.nonce_praefix = [0; 4];
        let mut empfang = self.empfang.lock();
        if let Some(ref mut s) = empfang.schluessel {
            s.nullen();
        }
        empfang.schluessel = None;
        empfang.nonce_praefix = [0; 4];
    }
}

impl Default for SecuritySession {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
