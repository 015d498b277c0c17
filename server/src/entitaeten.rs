//! Entitaets-Tabelle der Welt
//!
//! Entitaeten referenzieren einander ueber Integer-IDs durch diese
//! Tabelle. Die Speicherung ist eine Arena mit Platz-Index und
//! Versions-Zaehler: wird ein Platz wiederbelegt, steigt seine Version
//! und alle alten IDs auf diesen Platz werden ungueltig. Sichtbarkeits-
//! Mengen sind ID-Mengen und werden bei jedem Fanout gegen die Tabelle
//! validiert; veraltete IDs fallen dabei stillschweigend heraus.

use std::collections::HashSet;
use std::sync::Arc;

use earshot_core::types::{EntityId, PeerId};
use earshot_crypto::SecuritySession;

// ---------------------------------------------------------------------------
// Entitaet
// ---------------------------------------------------------------------------

/// Eine Entitaet der Welt (Spieler oder serverseitiges Objekt)
pub struct Entitaet {
    pub id: EntityId,
    pub name: String,
    /// Eigene Stummschaltung (sendet kein Audio)
    pub stumm: bool,
    /// Taubschaltung (empfaengt kein Audio)
    pub taub: bool,
    pub titel: String,
    pub beschreibung: String,
    /// Entitaet nimmt am Sichtbarkeits-System teil
    pub sichtbar: bool,
    /// Freie Bitmaske fuer Integrations-Regeln
    pub bitmaske: u32,
    pub position: [f32; 3],
    pub rotation: [f32; 2],
    /// IDs der Entitaeten, die Audio dieser Entitaet empfangen duerfen.
    /// Wird vom externen Integrations-Kanal gepflegt; der Relay
    /// konsultiert sie nur.
    pub sichtbare: HashSet<i32>,
    /// Transport-Peer; None fuer serverseitige Entitaeten
    pub peer: Option<PeerId>,
    /// Sichere Session des Peers
    pub session: Option<Arc<SecuritySession>>,
}

impl Entitaet {
    /// Haengt ein Netzwerk-Peer an dieser Entitaet?
    pub fn ist_netzwerk(&self) -> bool {
        self.peer.is_some()
    }
}

// ---------------------------------------------------------------------------
// EntityTabelle
// ---------------------------------------------------------------------------

struct Platz {
    version: u16,
    eintrag: Option<Entitaet>,
}

/// Arena-Tabelle aller Entitaeten mit Platz-Wiederverwendung
pub struct EntityTabelle {
    plaetze: Vec<Platz>,
    frei: Vec<u16>,
}

impl EntityTabelle {
    /// Erstellt eine leere Tabelle
    pub fn neu() -> Self {
        Self {
            plaetze: Vec::new(),
            frei: Vec::new(),
        }
    }

    /// Legt eine Entitaet an und gibt ihre ID zurueck
    pub fn erstellen(
        &mut self,
        name: String,
        peer: Option<PeerId>,
        session: Option<Arc<SecuritySession>>,
    ) -> EntityId {
        let platz_index = match self.frei.pop() {
            Some(index) => index,
            None => {
                self.plaetze.push(Platz {
                    version: 1,
                    eintrag: None,
                });
                (self.plaetze.len() - 1) as u16
            }
        };

        let version = self.plaetze[platz_index as usize].version;
        let id = EntityId::aus_platz(platz_index, version);
        self.plaetze[platz_index as usize].eintrag = Some(Entitaet {
            id,
            name,
            stumm: false,
            taub: false,
            titel: String::new(),
            beschreibung: String::new(),
            sichtbar: true,
            bitmaske: 0,
            position: [0.0; 3],
            rotation: [0.0; 2],
            sichtbare: HashSet::new(),
            peer,
            session,
        });
        id
    }

    /// Entfernt eine Entitaet; ihr Platz wird mit erhoehter Version frei
    pub fn entfernen(&mut self, id: EntityId) -> Option<Entitaet> {
        let platz = self.plaetze.get_mut(id.platz() as usize)?;
        if platz.version != id.version() || platz.eintrag.is_none() {
            return None;
        }
        let entitaet = platz.eintrag.take();
        // Versionssprung macht alle alten IDs auf diesen Platz ungueltig
        platz.version = platz.version.wrapping_add(1).max(1);
        self.frei.push(id.platz());

        // Haengende Referenzen aus allen Sichtbarkeits-Mengen loesen
        for anderer in self.plaetze.iter_mut() {
            if let Some(ref mut e) = anderer.eintrag {
                e.sichtbare.remove(&id.roh());
            }
        }
        entitaet
    }

    /// Liest eine Entitaet (Version wird validiert)
    pub fn holen(&self, id: EntityId) -> Option<&Entitaet> {
        let platz = self.plaetze.get(id.platz() as usize)?;
        if platz.version != id.version() {
            return None;
        }
        platz.eintrag.as_ref()
    }

    /// Liest eine Entitaet veraenderbar (Version wird validiert)
    pub fn holen_mut(&mut self, id: EntityId) -> Option<&mut Entitaet> {
        let platz = self.plaetze.get_mut(id.platz() as usize)?;
        if platz.version != id.version() {
            return None;
        }
        platz.eintrag.as_mut()
    }

    /// Alle lebenden Entitaets-IDs
    pub fn ids(&self) -> Vec<EntityId> {
        self.plaetze
            .iter()
            .filter_map(|p| p.eintrag.as_ref().map(|e| e.id))
            .collect()
    }

    /// Anzahl lebender Entitaeten
    pub fn anzahl(&self) -> usize {
        self.plaetze.iter().filter(|p| p.eintrag.is_some()).count()
    }
}

impl Default for EntityTabelle {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tabelle_mit(namen: &[&str]) -> (EntityTabelle, Vec<EntityId>) {
        let mut tabelle = EntityTabelle::neu();
        let ids = namen
            .iter()
            .map(|n| tabelle.erstellen(n.to_string(), None, None))
            .collect();
        (tabelle, ids)
    }

    #[test]
    fn erstellen_und_holen() {
        let (tabelle, ids) = tabelle_mit(&["Alice", "Bob"]);
        assert_eq!(tabelle.anzahl(), 2);
        assert_eq!(tabelle.holen(ids[0]).unwrap().name, "Alice");
        assert_eq!(tabelle.holen(ids[1]).unwrap().name, "Bob");
    }

    #[test]
    fn entfernen_macht_id_ungueltig() {
        let (mut tabelle, ids) = tabelle_mit(&["Alice"]);
        assert!(tabelle.entfernen(ids[0]).is_some());
        assert!(tabelle.holen(ids[0]).is_none());
        assert!(tabelle.entfernen(ids[0]).is_none(), "Doppelt entfernen");
        assert_eq!(tabelle.anzahl(), 0);
    }

    #[test]
    fn platz_wiederverwendung_aendert_die_version() {
        let (mut tabelle, ids) = tabelle_mit(&["Alice"]);
        let alte_id = ids[0];
        tabelle.entfernen(alte_id);

        let neue_id = tabelle.erstellen("Bob".into(), None, None);
        assert_eq!(neue_id.platz(), alte_id.platz(), "Platz wird wiederverwendet");
        assert_ne!(neue_id, alte_id, "Version muss sich unterscheiden");

        // Die alte ID greift nicht auf den neuen Bewohner zu
        assert!(tabelle.holen(alte_id).is_none());
        assert_eq!(tabelle.holen(neue_id).unwrap().name, "Bob");
    }

    #[test]
    fn entfernen_bereinigt_sichtbarkeits_mengen() {
        let (mut tabelle, ids) = tabelle_mit(&["Alice", "Bob"]);
        tabelle
            .holen_mut(ids[0])
            .unwrap()
            .sichtbare
            .insert(ids[1].roh());

        tabelle.entfernen(ids[1]);
        assert!(
            !tabelle.holen(ids[0]).unwrap().sichtbare.contains(&ids[1].roh()),
            "Haengende Referenz muss entfernt sein"
        );
    }

    #[test]
    fn ids_liefert_nur_lebende() {
        let (mut tabelle, ids) = tabelle_mit(&["A", "B", "C"]);
        tabelle.entfernen(ids[1]);
        let lebend = tabelle.ids();
        assert_eq!(lebend.len(), 2);
        assert!(lebend.contains(&ids[0]));
        assert!(lebend.contains(&ids[2]));
    }
}
