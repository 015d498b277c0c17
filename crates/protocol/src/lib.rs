//! Earshot Protocol – Wire-Format und Transport-Grenze
//!
//! Definiert das binaere Paketformat (Typ-Byte + Body), die 16-Bit
//! Sequenz-Arithmetik fuer den Jitter Buffer, den Z85-Textcodec fuer
//! Sideband-Tunneling sowie die Schnittstelle zur darunterliegenden
//! Datagramm-Transportbibliothek.

pub mod paket;
pub mod seq;
pub mod transport;
pub mod z85;

pub use paket::{Paket, PaketFehler, PaketTyp};
pub use transport::{TransportEreignis, Zustellung};
