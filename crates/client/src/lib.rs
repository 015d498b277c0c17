//! Earshot Client – Session-Endpunkt
//!
//! Der `SessionEndpoint` verbindet sich mit einem Relay-Server, fuehrt
//! den ECDH-Handshake, verschickt lokales Audio und verteilt eingehende
//! Frames an die Talker-Pipelines. Die Netzwerk-Schleife laeuft als ein
//! einzelner Poll-Task; pro entferntem Sprecher laeuft ein Tick-Task.

pub mod anfragen;
pub mod endpoint;
pub mod error;

pub use endpoint::{ClientEreignis, SessionEndpoint, VerbindungsZustand};
pub use error::{ClientFehler, ClientResult};
