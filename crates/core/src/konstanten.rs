//! Extern sichtbare Konstanten des Voice-Transports
//!
//! Diese Werte sind Teil des Wire-Kontrakts bzw. der Timing-Annahmen und
//! muessen auf Client und Server identisch sein.

/// Abtastrate der Sprachdaten in Hz
pub const SAMPLE_RATE: u32 = 48_000;

/// Anzahl der Audio-Kanaele (Mono fuer Sprache)
pub const KANAELE: u32 = 1;

/// Frame-Dauer in Millisekunden (ein Codec-Frame)
pub const FRAME_MS: u64 = 20;

/// Samples pro Frame (SampleRate * FrameMs / 1000)
pub const SAMPLES_PRO_FRAME: usize = (SAMPLE_RATE as u64 * FRAME_MS / 1000) as usize;

/// Maximale Laenge eines kodierten Audio-Payloads in Bytes
pub const MAX_ENCODED_BYTES: usize = 1280;

/// Maximale Laenge von Strings im Wire-Format (Bytes, UTF-8)
pub const MAX_STRING_LAENGE: usize = 512;

/// Zeit ohne Audio-Aktivitaet, nach der ein Sprecher als still gilt (ms)
pub const STILLE_SCHWELLE_MS: u64 = 200;

/// Poll-Intervall der Netzwerk-Schleife bzw. Server-Hauptschleife (ms)
pub const TICK_MS: u64 = 15;
