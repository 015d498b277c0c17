//! Paket-Katalog und binaeres Wire-Format
//!
//! Jeder Frame auf der Leitung ist `typ_byte || body`. Der Typ-Katalog ist
//! ein flaches Enum; die Byte-Werte sind Teil des Wire-Kontrakts und
//! muessen ueber Client- und Server-Builds stabil bleiben. Reihenfolge:
//! zuerst Requests, dann Responses, dann Ereignisse.
//!
//! ## Feld-Kodierung (alle Mehrbyte-Felder big-endian)
//!
//! ```text
//! u8/u16/u32/u64   rohe big-endian Bytes
//! i32              big-endian Zweierkomplement
//! f32              big-endian IEEE-754 Bits
//! String           u16 Laenge + UTF-8 Bytes (max MAX_STRING_LAENGE)
//! Bytes            u16 Laenge + rohe Bytes
//! RequestId        16 Bytes (RFC-4122 Reihenfolge)
//! Version          3 x u16 (major, minor, build)
//! ```
//!
//! Audio-Payloads duerfen `MAX_ENCODED_BYTES` nie ueberschreiten; die
//! Dekodierung lehnt laengere Payloads als Framing-Fehler ab.

use earshot_core::konstanten::{MAX_ENCODED_BYTES, MAX_STRING_LAENGE};
use earshot_core::types::{EntityId, RequestId, Version};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Fehler beim Kodieren/Dekodieren von Paketen
#[derive(Debug, Error)]
pub enum PaketFehler {
    #[error("Ungueltiger Frame: {0}")]
    MalformedFrame(String),

    #[error("Unbekannter Pakettyp: {0}")]
    UnbekannterTyp(u8),

    #[error("Payload zu gross: {laenge} Bytes (Maximum {maximum})")]
    UebergrossePayload { laenge: usize, maximum: usize },

    #[error("String zu lang: {laenge} Bytes (Maximum {maximum})")]
    StringZuLang { laenge: usize, maximum: usize },
}

pub type PaketResult<T> = Result<T, PaketFehler>;

// ---------------------------------------------------------------------------
// Typ-Katalog
// ---------------------------------------------------------------------------

/// Stabiler Typ-Byte-Katalog aller Pakete
///
/// Die numerischen Werte sind Wire-Kontrakt; neue Typen werden nur am
/// Ende des jeweiligen Blocks angehaengt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PaketTyp {
    // --- Requests ---
    InfoRequest = 0,
    LoginRequest = 1,
    LogoutRequest = 2,
    SetName = 3,
    SetMute = 4,
    SetDeafen = 5,
    SetTitle = 6,
    SetDescription = 7,
    SetEntityVisibility = 8,
    Audio = 9,
    AdvancedAudio = 10,
    EncryptedEnvelope = 11,
    // --- Responses ---
    InfoResponse = 12,
    AcceptResponse = 13,
    DenyResponse = 14,
    // --- Ereignisse ---
    EntityCreated = 15,
    EntityDestroyed = 16,
    EntityName = 17,
    EntityMute = 18,
    EntityDeafen = 19,
    EntityBitmask = 20,
    EntityTransform = 21,
}

impl PaketTyp {
    /// Konvertiert ein Typ-Byte in einen `PaketTyp`
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::InfoRequest),
            1 => Some(Self::LoginRequest),
            2 => Some(Self::LogoutRequest),
            3 => Some(Self::SetName),
            4 => Some(Self::SetMute),
            5 => Some(Self::SetDeafen),
            6 => Some(Self::SetTitle),
            7 => Some(Self::SetDescription),
            8 => Some(Self::SetEntityVisibility),
            9 => Some(Self::Audio),
            10 => Some(Self::AdvancedAudio),
            11 => Some(Self::EncryptedEnvelope),
            12 => Some(Self::InfoResponse),
            13 => Some(Self::AcceptResponse),
            14 => Some(Self::DenyResponse),
            15 => Some(Self::EntityCreated),
            16 => Some(Self::EntityDestroyed),
            17 => Some(Self::EntityName),
            18 => Some(Self::EntityMute),
            19 => Some(Self::EntityDeafen),
            20 => Some(Self::EntityBitmask),
            21 => Some(Self::EntityTransform),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Audio-Flags
// ---------------------------------------------------------------------------

/// Bit-Masken fuer das Flags-Feld in `AdvancedAudio`
pub struct AudioFlags;

impl AudioFlags {
    /// Paket enthaelt eine 3D-Position (3 x f32)
    pub const HAT_POSITION: u8 = 0x01;
    /// Paket enthaelt eine Blickrichtung (2 x f32)
    pub const HAT_ROTATION: u8 = 0x02;
}

// ---------------------------------------------------------------------------
// Paket
// ---------------------------------------------------------------------------

/// Vollstaendig getyptes Wire-Paket
///
/// Eine Variante pro Eintrag im Typ-Katalog; `kodieren`/`dekodieren`
/// bilden verlustfrei aufeinander ab.
#[derive(Debug, Clone, PartialEq)]
pub enum Paket {
    /// Unverbundene Server-Abfrage (Info-Probe)
    InfoRequest { anfrage: RequestId },
    /// Anmeldung mit Version, Anzeigename und ECDH Public Key (64 Bytes)
    LoginRequest {
        anfrage: RequestId,
        version: Version,
        name: String,
        public_key: Vec<u8>,
    },
    /// Abmeldung (keine Antwort erwartet)
    LogoutRequest,
    SetName { name: String },
    SetMute { stumm: bool },
    SetDeafen { taub: bool },
    SetTitle { titel: String },
    SetDescription { beschreibung: String },
    SetEntityVisibility { sichtbar: bool },
    /// Einfaches Audio-Paket ohne Raumdaten
    Audio {
        entity_id: EntityId,
        sequenz: u16,
        nutzdaten: Vec<u8>,
    },
    /// Audio-Paket mit Lautheit und optionalen Raumdaten
    AdvancedAudio {
        entity_id: EntityId,
        sequenz: u16,
        lautheit: f32,
        position: Option<[f32; 3]>,
        rotation: Option<[f32; 2]>,
        nutzdaten: Vec<u8>,
    },
    /// AEAD-verschluesselter Umschlag; der Klartext beginnt mit einem
    /// inneren Typ-Byte. Verschachtelte Umschlaege sind verboten.
    EncryptedEnvelope {
        iv: [u8; 12],
        tag: [u8; 16],
        chiffrat: Vec<u8>,
    },
    InfoResponse {
        anfrage: RequestId,
        motd: String,
        clients: u16,
        max_clients: u16,
        positionierung: u8,
    },
    /// Anmeldung akzeptiert; traegt Entitaets-ID und Server Public Key
    AcceptResponse {
        anfrage: RequestId,
        entity_id: EntityId,
        public_key: Vec<u8>,
    },
    /// Anmeldung abgelehnt; `grund` ist ein lokalisierbarer Bezeichner
    DenyResponse { anfrage: RequestId, grund: String },
    EntityCreated { entity_id: EntityId, name: String },
    EntityDestroyed { entity_id: EntityId },
    EntityName { entity_id: EntityId, name: String },
    EntityMute { entity_id: EntityId, stumm: bool },
    EntityDeafen { entity_id: EntityId, taub: bool },
    EntityBitmask { entity_id: EntityId, bitmaske: u32 },
    EntityTransform {
        entity_id: EntityId,
        position: [f32; 3],
        rotation: [f32; 2],
    },
}

impl Paket {
    /// Gibt den Katalog-Typ dieses Pakets zurueck
    pub fn typ(&self) -> PaketTyp {
        match self {
            Self::InfoRequest { .. } => PaketTyp::InfoRequest,
            Self::LoginRequest { .. } => PaketTyp::LoginRequest,
            Self::LogoutRequest => PaketTyp::LogoutRequest,
            Self::SetName { .. } => PaketTyp::SetName,
            Self::SetMute { .. } => PaketTyp::SetMute,
            Self::SetDeafen { .. } => PaketTyp::SetDeafen,
            Self::SetTitle { .. } => PaketTyp::SetTitle,
            Self::SetDescription { .. } => PaketTyp::SetDescription,
            Self::SetEntityVisibility { .. } => PaketTyp::SetEntityVisibility,
            Self::Audio { .. } => PaketTyp::Audio,
            Self::AdvancedAudio { .. } => PaketTyp::AdvancedAudio,
            Self::EncryptedEnvelope { .. } => PaketTyp::EncryptedEnvelope,
            Self::InfoResponse { .. } => PaketTyp::InfoResponse,
            Self::AcceptResponse { .. } => PaketTyp::AcceptResponse,
            Self::DenyResponse { .. } => PaketTyp::DenyResponse,
            Self::EntityCreated { .. } => PaketTyp::EntityCreated,
            Self::EntityDestroyed { .. } => PaketTyp::EntityDestroyed,
            Self::EntityName { .. } => PaketTyp::EntityName,
            Self::EntityMute { .. } => PaketTyp::EntityMute,
            Self::EntityDeafen { .. } => PaketTyp::EntityDeafen,
            Self::EntityBitmask { .. } => PaketTyp::EntityBitmask,
            Self::EntityTransform { .. } => PaketTyp::EntityTransform,
        }
    }

    /// Serialisiert das Paket als `typ_byte || body`
    pub fn kodieren(&self) -> PaketResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        self.kodieren_in(&mut buf)?;
        Ok(buf)
    }

    /// Serialisiert in einen bestehenden (z.B. gepoolten) Puffer
    ///
    /// Der Puffer wird vorher geleert.
    pub fn kodieren_in(&self, buf: &mut Vec<u8>) -> PaketResult<()> {
        buf.clear();
        buf.push(self.typ() as u8);

        match self {
            Self::InfoRequest { anfrage } => {
                buf.extend_from_slice(&anfrage.als_bytes());
            }
            Self::LoginRequest { anfrage, version, name, public_key } => {
                buf.extend_from_slice(&anfrage.als_bytes());
                schreibe_version(buf, version);
                schreibe_string(buf, name)?;
                schreibe_bytes(buf, public_key)?;
            }
            Self::LogoutRequest => {}
            Self::SetName { name } => schreibe_string(buf, name)?,
            Self::SetMute { stumm } => buf.push(*stumm as u8),
            Self::SetDeafen { taub } => buf.push(*taub as u8),
            Self::SetTitle { titel } => schreibe_string(buf, titel)?,
            Self::SetDescription { beschreibung } => schreibe_string(buf, beschreibung)?,
            Self::SetEntityVisibility { sichtbar } => buf.push(*sichtbar as u8),
            Self::Audio { entity_id, sequenz, nutzdaten } => {
                pruefe_audio_laenge(nutzdaten.len())?;
                buf.extend_from_slice(&entity_id.roh().to_be_bytes());
                buf.extend_from_slice(&sequenz.to_be_bytes());
                schreibe_bytes(buf, nutzdaten)?;
            }
            Self::AdvancedAudio { entity_id, sequenz, lautheit, position, rotation, nutzdaten } => {
                pruefe_audio_laenge(nutzdaten.len())?;
                buf.extend_from_slice(&entity_id.roh().to_be_bytes());
                buf.extend_from_slice(&sequenz.to_be_bytes());
                buf.extend_from_slice(&lautheit.to_be_bytes());
                let mut flags = 0u8;
                if position.is_some() {
                    flags |= AudioFlags::HAT_POSITION;
                }
                if rotation.is_some() {
                    flags |= AudioFlags::HAT_ROTATION;
                }
                buf.push(flags);
                if let Some(p) = position {
                    for wert in p {
                        buf.extend_from_slice(&wert.to_be_bytes());
                    }
                }
                if let Some(r) = rotation {
                    for wert in r {
                        buf.extend_from_slice(&wert.to_be_bytes());
                    }
                }
                schreibe_bytes(buf, nutzdaten)?;
            }
            Self::EncryptedEnvelope { iv, tag, chiffrat } => {
                buf.extend_from_slice(iv);
                buf.extend_from_slice(tag);
                // Chiffrat laeuft bis zum Datagramm-Ende (kein Laengenfeld)
                buf.extend_from_slice(chiffrat);
            }
            Self::InfoResponse { anfrage, motd, clients, max_clients, positionierung } => {
                buf.extend_from_slice(&anfrage.als_bytes());
                schreibe_string(buf, motd)?;
                buf.extend_from_slice(&clients.to_be_bytes());
                buf.extend_from_slice(&max_clients.to_be_bytes());
                buf.push(*positionierung);
            }
            Self::AcceptResponse { anfrage, entity_id, public_key } => {
                buf.extend_from_slice(&anfrage.als_bytes());
                buf.extend_from_slice(&entity_id.roh().to_be_bytes());
                schreibe_bytes(buf, public_key)?;
            }
            Self::DenyResponse { anfrage, grund } => {
                buf.extend_from_slice(&anfrage.als_bytes());
                schreibe_string(buf, grund)?;
            }
            Self::EntityCreated { entity_id, name } => {
                buf.extend_from_slice(&entity_id.roh().to_be_bytes());
                schreibe_string(buf, name)?;
            }
            Self::EntityDestroyed { entity_id } => {
                buf.extend_from_slice(&entity_id.roh().to_be_bytes());
            }
            Self::EntityName { entity_id, name } => {
                buf.extend_from_slice(&entity_id.roh().to_be_bytes());
                schreibe_string(buf, name)?;
            }
            Self::EntityMute { entity_id, stumm } => {
                buf.extend_from_slice(&entity_id.roh().to_be_bytes());
                buf.push(*stumm as u8);
            }
            Self::EntityDeafen { entity_id, taub } => {
                buf.extend_from_slice(&entity_id.roh().to_be_bytes());
                buf.push(*taub as u8);
            }
            Self::EntityBitmask { entity_id, bitmaske } => {
                buf.extend_from_slice(&entity_id.roh().to_be_bytes());
                buf.extend_from_slice(&bitmaske.to_be_bytes());
            }
            Self::EntityTransform { entity_id, position, rotation } => {
                buf.extend_from_slice(&entity_id.roh().to_be_bytes());
                for wert in position {
                    buf.extend_from_slice(&wert.to_be_bytes());
                }
                for wert in rotation {
                    buf.extend_from_slice(&wert.to_be_bytes());
                }
            }
        }

        Ok(())
    }

    /// Dekodiert ein Paket aus einem vollstaendigen Datagramm
    pub fn dekodieren(daten: &[u8]) -> PaketResult<Self> {
        let (&typ_byte, body) = daten
            .split_first()
            .ok_or_else(|| PaketFehler::MalformedFrame("leeres Datagramm".into()))?;
        let typ = PaketTyp::from_u8(typ_byte).ok_or(PaketFehler::UnbekannterTyp(typ_byte))?;
        let mut leser = Leser::neu(body);

        let paket = match typ {
            PaketTyp::InfoRequest => Self::InfoRequest { anfrage: leser.request_id()? },
            PaketTyp::LoginRequest => Self::LoginRequest {
                anfrage: leser.request_id()?,
                version: leser.version()?,
                name: leser.string()?,
                public_key: leser.bytes()?,
            },
            PaketTyp::LogoutRequest => Self::LogoutRequest,
            PaketTyp::SetName => Self::SetName { name: leser.string()? },
            PaketTyp::SetMute => Self::SetMute { stumm: leser.u8()? != 0 },
            PaketTyp::SetDeafen => Self::SetDeafen { taub: leser.u8()? != 0 },
            PaketTyp::SetTitle => Self::SetTitle { titel: leser.string()? },
            PaketTyp::SetDescription => Self::SetDescription { beschreibung: leser.string()? },
            PaketTyp::SetEntityVisibility => Self::SetEntityVisibility { sichtbar: leser.u8()? != 0 },
            PaketTyp::Audio => {
                let entity_id = leser.entity_id()?;
                let sequenz = leser.u16()?;
                let nutzdaten = leser.bytes()?;
                pruefe_audio_laenge(nutzdaten.len())?;
                Self::Audio { entity_id, sequenz, nutzdaten }
            }
            PaketTyp::AdvancedAudio => {
                let entity_id = leser.entity_id()?;
                let sequenz = leser.u16()?;
                let lautheit = leser.f32()?;
                let flags = leser.u8()?;
                let position = if flags & AudioFlags::HAT_POSITION != 0 {
                    Some([leser.f32()?, leser.f32()?, leser.f32()?])
                } else {
                    None
                };
                let rotation = if flags & AudioFlags::HAT_ROTATION != 0 {
                    Some([leser.f32()?, leser.f32()?])
                } else {
                    None
                };
                let nutzdaten = leser.bytes()?;
                pruefe_audio_laenge(nutzdaten.len())?;
                Self::AdvancedAudio { entity_id, sequenz, lautheit, position, rotation, nutzdaten }
            }
            PaketTyp::EncryptedEnvelope => {
                let mut iv = [0u8; 12];
                iv.copy_from_slice(leser.feld(12)?);
                let mut tag = [0u8; 16];
                tag.copy_from_slice(leser.feld(16)?);
                Self::EncryptedEnvelope { iv, tag, chiffrat: leser.rest().to_vec() }
            }
            PaketTyp::InfoResponse => Self::InfoResponse {
                anfrage: leser.request_id()?,
                motd: leser.string()?,
                clients: leser.u16()?,
                max_clients: leser.u16()?,
                positionierung: leser.u8()?,
            },
            PaketTyp::AcceptResponse => Self::AcceptResponse {
                anfrage: leser.request_id()?,
                entity_id: leser.entity_id()?,
                public_key: leser.bytes()?,
            },
            PaketTyp::DenyResponse => Self::DenyResponse {
                anfrage: leser.request_id()?,
                grund: leser.string()?,
            },
            PaketTyp::EntityCreated => Self::EntityCreated {
                entity_id: leser.entity_id()?,
                name: leser.string()?,
            },
            PaketTyp::EntityDestroyed => Self::EntityDestroyed { entity_id: leser.entity_id()? },
            PaketTyp::EntityName => Self::EntityName {
                entity_id: leser.entity_id()?,
                name: leser.string()?,
            },
            PaketTyp::EntityMute => Self::EntityMute {
                entity_id: leser.entity_id()?,
                stumm: leser.u8()? != 0,
            },
            PaketTyp::EntityDeafen => Self::EntityDeafen {
                entity_id: leser.entity_id()?,
                taub: leser.u8()? != 0,
            },
            PaketTyp::EntityBitmask => Self::EntityBitmask {
                entity_id: leser.entity_id()?,
                bitmaske: leser.u32()?,
            },
            PaketTyp::EntityTransform => Self::EntityTransform {
                entity_id: leser.entity_id()?,
                position: [leser.f32()?, leser.f32()?, leser.f32()?],
                rotation: [leser.f32()?, leser.f32()?],
            },
        };

        Ok(paket)
    }

    /// Dekodiert den Klartext eines entschluesselten Umschlags
    ///
    /// Pro Datagramm gibt es genau eine Verschluesselungsschicht: ein
    /// innerer `EncryptedEnvelope` wird als Framing-Fehler abgelehnt.
    pub fn dekodieren_inner(daten: &[u8]) -> PaketResult<Self> {
        let paket = Self::dekodieren(daten)?;
        if matches!(paket, Self::EncryptedEnvelope { .. }) {
            return Err(PaketFehler::MalformedFrame(
                "verschachtelter EncryptedEnvelope".into(),
            ));
        }
        Ok(paket)
    }
}

// ---------------------------------------------------------------------------
// Schreib-Hilfsfunktionen
// ---------------------------------------------------------------------------

fn pruefe_audio_laenge(laenge: usize) -> PaketResult<()> {
    if laenge > MAX_ENCODED_BYTES {
        return Err(PaketFehler::UebergrossePayload {
            laenge,
            maximum: MAX_ENCODED_BYTES,
        });
    }
    Ok(())
}

fn schreibe_version(buf: &mut Vec<u8>, version: &Version) {
    buf.extend_from_slice(&version.major.to_be_bytes());
    buf.extend_from_slice(&version.minor.to_be_bytes());
    buf.extend_from_slice(&version.build.to_be_bytes());
}

fn schreibe_string(buf: &mut Vec<u8>, text: &str) -> PaketResult<()> {
    if text.len() > MAX_STRING_LAENGE {
        return Err(PaketFehler::StringZuLang {
            laenge: text.len(),
            maximum: MAX_STRING_LAENGE,
        });
    }
    buf.extend_from_slice(&(text.len() as u16).to_be_bytes());
    buf.extend_from_slice(text.as_bytes());
    Ok(())
}

fn schreibe_bytes(buf: &mut Vec<u8>, daten: &[u8]) -> PaketResult<()> {
    if daten.len() > u16::MAX as usize {
        return Err(PaketFehler::UebergrossePayload {
            laenge: daten.len(),
            maximum: u16::MAX as usize,
        });
    }
    buf.extend_from_slice(&(daten.len() as u16).to_be_bytes());
    buf.extend_from_slice(daten);
    Ok(())
}

// ---------------------------------------------------------------------------
// Leser
// ---------------------------------------------------------------------------

/// Cursor ueber einen Body-Slice mit typisierten Lesefunktionen
struct Leser<'a> {
    daten: &'a [u8],
    pos: usize,
}

impl<'a> Leser<'a> {
    fn neu(daten: &'a [u8]) -> Self {
        Self { daten, pos: 0 }
    }

    fn feld(&mut self, laenge: usize) -> PaketResult<&'a [u8]> {
        let ende = self.pos.checked_add(laenge).filter(|&e| e <= self.daten.len());
        match ende {
            Some(ende) => {
                let feld = &self.daten[self.pos..ende];
                self.pos = ende;
                Ok(feld)
            }
            None => Err(PaketFehler::MalformedFrame(format!(
                "Body zu kurz: {} Bytes benoetigt ab Offset {}",
                laenge, self.pos
            ))),
        }
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.daten[self.pos..];
        self.pos = self.daten.len();
        rest
    }

    fn u8(&mut self) -> PaketResult<u8> {
        Ok(self.feld(1)?[0])
    }

    fn u16(&mut self) -> PaketResult<u16> {
        let b = self.feld(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> PaketResult<u32> {
        let b = self.feld(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> PaketResult<f32> {
        let b = self.feld(4)?;
        Ok(f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn entity_id(&mut self) -> PaketResult<EntityId> {
        let b = self.feld(4)?;
        Ok(EntityId(i32::from_be_bytes([b[0], b[1], b[2], b[3]])))
    }

    fn request_id(&mut self) -> PaketResult<RequestId> {
        let b = self.feld(16)?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(b);
        Ok(RequestId::aus_bytes(bytes))
    }

    fn version(&mut self) -> PaketResult<Version> {
        Ok(Version {
            major: self.u16()?,
            minor: self.u16()?,
            build: self.u16()?,
        })
    }

    fn bytes(&mut self) -> PaketResult<Vec<u8>> {
        let laenge = self.u16()? as usize;
        Ok(self.feld(laenge)?.to_vec())
    }

    fn string(&mut self) -> PaketResult<String> {
        let laenge = self.u16()? as usize;
        if laenge > MAX_STRING_LAENGE {
            return Err(PaketFehler::StringZuLang {
                laenge,
                maximum: MAX_STRING_LAENGE,
            });
        }
        let bytes = self.feld(laenge)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| PaketFehler::MalformedFrame("String ist kein UTF-8".into()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use earshot_core::types::PROTOKOLL_VERSION;

    fn round_trip(paket: Paket) {
        let bytes = paket.kodieren().expect("Kodieren muss gelingen");
        let decoded = Paket::dekodieren(&bytes).expect("Dekodieren muss gelingen");
        assert_eq!(paket, decoded);
    }

    #[test]
    fn alle_varianten_round_trip() {
        let eid = EntityId::aus_platz(3, 1);
        round_trip(Paket::InfoRequest { anfrage: RequestId::neu() });
        round_trip(Paket::LoginRequest {
            anfrage: RequestId::neu(),
            version: PROTOKOLL_VERSION,
            name: "Mallory".into(),
            public_key: vec![0x42; 64],
        });
        round_trip(Paket::LogoutRequest);
        round_trip(Paket::SetName { name: "Alice".into() });
        round_trip(Paket::SetMute { stumm: true });
        round_trip(Paket::SetDeafen { taub: false });
        round_trip(Paket::SetTitle { titel: "Titel".into() });
        round_trip(Paket::SetDescription { beschreibung: "Text".into() });
        round_trip(Paket::SetEntityVisibility { sichtbar: true });
        round_trip(Paket::Audio {
            entity_id: eid,
            sequenz: 65535,
            nutzdaten: vec![0xAB; 60],
        });
        round_trip(Paket::AdvancedAudio {
            entity_id: eid,
            sequenz: 7,
            lautheit: 0.5,
            position: Some([1.0, 2.0, 3.0]),
            rotation: Some([0.25, -0.5]),
            nutzdaten: vec![0xCD; 80],
        });
        round_trip(Paket::EncryptedEnvelope {
            iv: [1u8; 12],
            tag: [2u8; 16],
            chiffrat: vec![9, 8, 7],
        });
        round_trip(Paket::InfoResponse {
            anfrage: RequestId::neu(),
            motd: "Willkommen".into(),
            clients: 3,
            max_clients: 64,
            positionierung: 1,
        });
        round_trip(Paket::AcceptResponse {
            anfrage: RequestId::neu(),
            entity_id: eid,
            public_key: vec![0x11; 64],
        });
        round_trip(Paket::DenyResponse {
            anfrage: RequestId::neu(),
            grund: "Earshot.DisconnectReason.ServerFull".into(),
        });
        round_trip(Paket::EntityCreated { entity_id: eid, name: "Bob".into() });
        round_trip(Paket::EntityDestroyed { entity_id: eid });
        round_trip(Paket::EntityName { entity_id: eid, name: "Neu".into() });
        round_trip(Paket::EntityMute { entity_id: eid, stumm: true });
        round_trip(Paket::EntityDeafen { entity_id: eid, taub: true });
        round_trip(Paket::EntityBitmask { entity_id: eid, bitmaske: 0xDEADBEEF });
        round_trip(Paket::EntityTransform {
            entity_id: eid,
            position: [10.0, -4.5, 0.0],
            rotation: [1.5, 0.0],
        });
    }

    #[test]
    fn advanced_audio_ohne_raumdaten() {
        round_trip(Paket::AdvancedAudio {
            entity_id: EntityId(1),
            sequenz: 0,
            lautheit: 0.0,
            position: None,
            rotation: None,
            nutzdaten: vec![],
        });
    }

    #[test]
    fn unbekannter_typ_byte() {
        let result = Paket::dekodieren(&[200u8, 0, 0]);
        assert!(matches!(result, Err(PaketFehler::UnbekannterTyp(200))));
    }

    #[test]
    fn leeres_datagramm() {
        assert!(matches!(
            Paket::dekodieren(&[]),
            Err(PaketFehler::MalformedFrame(_))
        ));
    }

    #[test]
    fn abgeschnittener_body() {
        // LoginRequest mit abgeschnittener RequestId
        let result = Paket::dekodieren(&[PaketTyp::LoginRequest as u8, 1, 2, 3]);
        assert!(matches!(result, Err(PaketFehler::MalformedFrame(_))));
    }

    #[test]
    fn zu_grosse_audio_nutzdaten_abgelehnt() {
        let paket = Paket::Audio {
            entity_id: EntityId(1),
            sequenz: 0,
            nutzdaten: vec![0u8; MAX_ENCODED_BYTES + 1],
        };
        assert!(matches!(
            paket.kodieren(),
            Err(PaketFehler::UebergrossePayload { .. })
        ));

        // Manuell kodiertes Paket mit zu langem Laengenfeld
        let mut bytes = vec![PaketTyp::Audio as u8];
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&((MAX_ENCODED_BYTES + 1) as u16).to_be_bytes());
        bytes.extend(vec![0u8; MAX_ENCODED_BYTES + 1]);
        assert!(matches!(
            Paket::dekodieren(&bytes),
            Err(PaketFehler::UebergrossePayload { .. })
        ));
    }

    #[test]
    fn zu_langer_string_abgelehnt() {
        let paket = Paket::SetName {
            name: "x".repeat(MAX_STRING_LAENGE + 1),
        };
        assert!(matches!(
            paket.kodieren(),
            Err(PaketFehler::StringZuLang { .. })
        ));
    }

    #[test]
    fn verschachtelter_envelope_verboten() {
        let innerer = Paket::EncryptedEnvelope {
            iv: [0u8; 12],
            tag: [0u8; 16],
            chiffrat: vec![1, 2, 3],
        };
        let bytes = innerer.kodieren().unwrap();
        assert!(matches!(
            Paket::dekodieren_inner(&bytes),
            Err(PaketFehler::MalformedFrame(_))
        ));
        // Normale Pakete passieren die innere Dekodierung
        let audio = Paket::SetMute { stumm: true }.kodieren().unwrap();
        assert!(Paket::dekodieren_inner(&audio).is_ok());
    }

    #[test]
    fn typ_bytes_sind_stabil() {
        // Wire-Kontrakt: diese Werte duerfen sich nie aendern
        assert_eq!(PaketTyp::InfoRequest as u8, 0);
        assert_eq!(PaketTyp::LoginRequest as u8, 1);
        assert_eq!(PaketTyp::AdvancedAudio as u8, 10);
        assert_eq!(PaketTyp::EncryptedEnvelope as u8, 11);
        assert_eq!(PaketTyp::InfoResponse as u8, 12);
        assert_eq!(PaketTyp::EntityCreated as u8, 15);
        assert_eq!(PaketTyp::EntityTransform as u8, 21);
    }

    #[test]
    fn response_traegt_anfrage_id_zurueck() {
        let anfrage = RequestId::neu();
        let bytes = Paket::DenyResponse {
            anfrage,
            grund: "test".into(),
        }
        .kodieren()
        .unwrap();
        match Paket::dekodieren(&bytes).unwrap() {
            Paket::DenyResponse { anfrage: echo, .. } => assert_eq!(echo, anfrage),
            p => panic!("Unerwartetes Paket: {:?}", p),
        }
    }
}
