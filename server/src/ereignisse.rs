//! Typisierte Server-Ereignisse mit deterministischem Fanout
//!
//! Jede Zustandsaenderung erzeugt einen Ereignis-Wert auf einer
//! MPSC-Schlange; der Server-Tick entleert die Schlange und fuehrt die
//! zugehoerige Fanout-Routine aus. Damit gibt es keinen versteckten
//! geteilten Zustand in Callbacks, und die Fanout-Reihenfolge ist die
//! Melde-Reihenfolge.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use earshot_core::types::EntityId;

/// Fanout-Klasse einer Eigenschaft
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EigenschaftsKlasse {
    /// Geht an alle Peers (Name, Mute, Deafen, Bitmaske, Lebenszyklus)
    Identitaet,
    /// Geht nur an die Sichtbarkeits-Menge des Senders (Transform)
    Raeumlich,
}

/// Zustandsaenderung einer Entitaet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEreignis {
    Erstellt { id: EntityId },
    Entfernt { id: EntityId },
    NameGeaendert { id: EntityId },
    StummGeaendert { id: EntityId },
    TaubGeaendert { id: EntityId },
    BitmaskeGeaendert { id: EntityId },
    TransformGeaendert { id: EntityId },
}

impl ServerEreignis {
    /// Entitaet, auf die sich das Ereignis bezieht
    pub fn id(&self) -> EntityId {
        match *self {
            Self::Erstellt { id }
            | Self::Entfernt { id }
            | Self::NameGeaendert { id }
            | Self::StummGeaendert { id }
            | Self::TaubGeaendert { id }
            | Self::BitmaskeGeaendert { id }
            | Self::TransformGeaendert { id } => id,
        }
    }

    /// Fanout-Klasse des Ereignisses
    pub fn klasse(&self) -> EigenschaftsKlasse {
        match self {
            Self::TransformGeaendert { .. } => EigenschaftsKlasse::Raeumlich,
            _ => EigenschaftsKlasse::Identitaet,
        }
    }
}

/// MPSC-Ereignisschlange (viele Melder, ein Entleerer im Server-Tick)
pub struct EreignisSchlange {
    tx: mpsc::UnboundedSender<ServerEreignis>,
    rx: Mutex<mpsc::UnboundedReceiver<ServerEreignis>>,
}

impl EreignisSchlange {
    /// Erstellt eine leere Schlange
    pub fn neu() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Reiht ein Ereignis ein
    pub fn melden(&self, ereignis: ServerEreignis) {
        // Der Receiver lebt so lange wie die Schlange; send schlaegt nie fehl
        let _ = self.tx.send(ereignis);
    }

    /// Entnimmt alle anstehenden Ereignisse in Melde-Reihenfolge
    pub fn entleeren(&self) -> Vec<ServerEreignis> {
        let mut rx = self.rx.lock();
        let mut ereignisse = Vec::new();
        while let Ok(e) = rx.try_recv() {
            ereignisse.push(e);
        }
        ereignisse
    }
}

impl Default for EreignisSchlange {
    fn default() -> Self {
        Self::neu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reihenfolge_bleibt_erhalten() {
        let schlange = EreignisSchlange::neu();
        let a = EntityId::aus_platz(0, 1);
        let b = EntityId::aus_platz(1, 1);

        schlange.melden(ServerEreignis::Erstellt { id: a });
        schlange.melden(ServerEreignis::NameGeaendert { id: a });
        schlange.melden(ServerEreignis::Erstellt { id: b });

        let ereignisse = schlange.entleeren();
        assert_eq!(
            ereignisse,
            vec![
                ServerEreignis::Erstellt { id: a },
                ServerEreignis::NameGeaendert { id: a },
                ServerEreignis::Erstellt { id: b },
            ]
        );
        assert!(schlange.entleeren().is_empty());
    }

    #[test]
    fn klassen_zuordnung() {
        let id = EntityId::aus_platz(0, 1);
        assert_eq!(
            ServerEreignis::NameGeaendert { id }.klasse(),
            EigenschaftsKlasse::Identitaet
        );
        assert_eq!(
            ServerEreignis::TransformGeaendert { id }.klasse(),
            EigenschaftsKlasse::Raeumlich
        );
    }
}
