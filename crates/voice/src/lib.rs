//! Earshot Voice – Empfangs-Pipeline pro Sprecher
//!
//! Kernstueck des Voice-Transports: der adaptive Jitter Buffer, die
//! Netzwerk-Telemetrie (RTT/Jitter/Verlust/MOS), der Ausgabe-Ring mit
//! Verwerfen-bei-Ueberlauf, Byte-Pools fuer den Audio-Pfad sowie die
//! `RemoteTalker`-Pipeline, die alles pro entferntem Sprecher verbindet.

pub mod decoder;
pub mod jitter;
pub mod pool;
pub mod ring;
pub mod stats;
pub mod talker;

pub use jitter::{AdaptiveJitterBuffer, Entnahme, JitterKonfig};
pub use stats::{NetzwerkStatistik, QualitaetsStufe};
pub use talker::RemoteTalker;
