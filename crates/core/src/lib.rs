//! Earshot Core – gemeinsame Typen fuer alle Crates
//!
//! Enthaelt die Identifikationstypen, die Protokollversion, die extern
//! sichtbaren Konstanten und den uebergreifenden Fehler-Enum.
//! Dieses Crate hat bewusst keine Laufzeit-Abhaengigkeiten (kein tokio),
//! damit es von jedem Teil des Systems verwendet werden kann.

pub mod error;
pub mod konstanten;
pub mod types;

pub use error::{EarshotError, Result};
