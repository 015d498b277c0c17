//! Request/Response-Korrelation
//!
//! Requests tragen eine 128-Bit `RequestId`; Antworten geben sie
//! unveraendert zurueck. Dieses Register verbindet offene IDs mit
//! oneshot-Wartenden: doppelte Registrierung schlaegt fehl, ein
//! Zeitlimit entfernt die Registrierung, und das Schliessen der Session
//! bricht alle Wartenden mit einem Sentinel-Fehler ab.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

use earshot_core::types::RequestId;
use earshot_protocol::paket::Paket;

use crate::error::{ClientFehler, ClientResult};

/// Register offener Anfragen einer Session
pub struct AnfragenRegister {
    offen: DashMap<RequestId, oneshot::Sender<Paket>>,
}

impl AnfragenRegister {
    /// Erstellt ein leeres Register
    pub fn neu() -> Self {
        Self {
            offen: DashMap::new(),
        }
    }

    /// Registriert eine Anfrage und gibt den Wartenden zurueck
    ///
    /// Schlaegt fehl, wenn die ID bereits registriert ist.
    pub fn registrieren(&self, id: RequestId) -> ClientResult<oneshot::Receiver<Paket>> {
        let (tx, rx) = oneshot::channel();
        match self.offen.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ClientFehler::DoppelteAnfrage),
            dashmap::mapref::entry::Entry::Vacant(eintrag) => {
                eintrag.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Stellt eine Antwort zu; true wenn ein Wartender bedient wurde
    pub fn erfuellen(&self, id: RequestId, antwort: Paket) -> bool {
        match self.offen.remove(&id) {
            Some((_, tx)) => tx.send(antwort).is_ok(),
            None => {
                tracing::debug!(anfrage = %id, "Antwort ohne offene Anfrage");
                false
            }
        }
    }

    /// Entfernt eine Registrierung (Zeitlimit-Pfad)
    pub fn abbrechen(&self, id: RequestId) {
        self.offen.remove(&id);
    }

    /// Bricht alle Wartenden ab (Session-Schliessung)
    ///
    /// Die fallengelassenen Sender lassen jeden `warten`-Aufruf mit
    /// `Abgebrochen` zurueckkehren.
    pub fn alle_abbrechen(&self) {
        self.offen.clear();
    }

    /// Anzahl offener Anfragen
    pub fn offen_anzahl(&self) -> usize {
        self.offen.len()
    }

    /// Wartet mit Zeitlimit auf die Antwort zu einer registrierten Anfrage
    ///
    /// Bei Ablauf wird die Registrierung entfernt und `Zeitlimit`
    /// zurueckgegeben; ein abgebrochener Sender ergibt `Abgebrochen`.
    pub async fn warten(
        &self,
        id: RequestId,
        rx: oneshot::Receiver<Paket>,
        zeitlimit: Duration,
    ) -> ClientResult<Paket> {
        match tokio::time::timeout(zeitlimit, rx).await {
            Ok(Ok(paket)) => Ok(paket),
            Ok(Err(_)) => Err(ClientFehler::Abgebrochen),
            Err(_) => {
                self.abbrechen(id);
                Err(ClientFehler::Zeitlimit(format!("Anfrage {}", id)))
            }
        }
    }
}

impl Default for AnfragenRegister {
    fn default() -> Self {
        Self::neu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn antwort(id: RequestId) -> Paket {
        Paket::DenyResponse {
            anfrage: id,
            grund: "test".into(),
        }
    }

    #[tokio::test]
    async fn antwort_erreicht_den_wartenden() {
        let register = AnfragenRegister::neu();
        let id = RequestId::neu();
        let rx = register.registrieren(id).unwrap();

        assert!(register.erfuellen(id, antwort(id)));
        let paket = register.warten(id, rx, Duration::from_secs(1)).await.unwrap();
        assert!(matches!(paket, Paket::DenyResponse { anfrage, .. } if anfrage == id));
        assert_eq!(register.offen_anzahl(), 0);
    }

    #[tokio::test]
    async fn doppelte_registrierung_schlaegt_fehl() {
        let register = AnfragenRegister::neu();
        let id = RequestId::neu();
        let _rx = register.registrieren(id).unwrap();
        assert!(matches!(
            register.registrieren(id),
            Err(ClientFehler::DoppelteAnfrage)
        ));
    }

    #[tokio::test]
    async fn zeitlimit_entfernt_die_registrierung() {
        let register = AnfragenRegister::neu();
        let id = RequestId::neu();
        let rx = register.registrieren(id).unwrap();

        let result = register.warten(id, rx, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ClientFehler::Zeitlimit(_))));
        assert_eq!(register.offen_anzahl(), 0);

        // Spaete Antwort laeuft ins Leere
        assert!(!register.erfuellen(id, antwort(id)));
    }

    #[tokio::test]
    async fn schliessen_bricht_alle_wartenden_ab() {
        let register = AnfragenRegister::neu();
        let id1 = RequestId::neu();
        let id2 = RequestId::neu();
        let rx1 = register.registrieren(id1).unwrap();
        let rx2 = register.registrieren(id2).unwrap();

        register.alle_abbrechen();

        let r1 = register.warten(id1, rx1, Duration::from_secs(1)).await;
        let r2 = register.warten(id2, rx2, Duration::from_secs(1)).await;
        assert!(matches!(r1, Err(ClientFehler::Abgebrochen)));
        assert!(matches!(r2, Err(ClientFehler::Abgebrochen)));
    }

    #[test]
    fn antwort_ohne_anfrage_ist_harmlos() {
        let register = AnfragenRegister::neu();
        let id = RequestId::neu();
        assert!(!register.erfuellen(id, antwort(id)));
    }
}
