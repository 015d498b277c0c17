//! earshot-server – Bibliotheks-Root
//!
//! Deklariert die Server-Module und stellt den Relay fuer
//! Integrationstests bereit.

pub mod config;
pub mod entitaeten;
pub mod ereignisse;
pub mod relay;
pub mod udp;

pub use config::ServerEigenschaften;
pub use relay::RelayServer;
