//! Earshot Crypto – sichere Session-Schicht
//!
//! Ephemerer ECDH-Handshake (P-256), daraus abgeleiteter symmetrischer
//! AEAD-Kanal (AES-256-GCM) mit Zaehler-Nonce und Sliding-Window
//! Replay-Schutz. Schluesselmaterial wird beim Schliessen genullt.

pub mod error;
pub mod replay;
pub mod session;
pub mod types;

pub use error::{CryptoFehler, CryptoResult};
pub use session::{SecuritySession, VerschluesselterRahmen};
