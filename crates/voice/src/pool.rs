//! Gebundene Pools fuer den Audio-Pfad
//!
//! Der Frame-Takt soll ausser den Pool-Zugriffen nichts allozieren.
//! `BytePool` verleiht Byte-Slabs fuer kodierte Audio-Daten, Chiffrate
//! und Klartexte; zurueckgegebene Slabs werden geleert, bevor sie erneut
//! verliehen werden (sie koennen Chiffrat oder Schluesselmaterial
//! enthalten haben). `ObjektPool` ist die generische Variante fuer
//! beliebige wiederverwendbare Objekte, begrenzt auf 256 Exemplare.

use parking_lot::Mutex;

use earshot_core::konstanten::MAX_ENCODED_BYTES;

/// Zusaetzlicher Platz fuer Header und AEAD-Overhead
pub const SLAB_OVERHEAD: usize = 64;

/// Obergrenze gehaltener Objekte pro Pool
pub const POOL_LIMIT: usize = 256;

// ---------------------------------------------------------------------------
// BytePool
// ---------------------------------------------------------------------------

/// Prozessweiter Pool fuer Byte-Slabs (`MAX_ENCODED_BYTES + Overhead`)
pub struct BytePool {
    frei: Mutex<Vec<Vec<u8>>>,
    slab_kapazitaet: usize,
}

impl BytePool {
    /// Erstellt einen leeren Pool mit Standard-Slab-Groesse
    pub fn neu() -> Self {
        Self::mit_kapazitaet(MAX_ENCODED_BYTES + SLAB_OVERHEAD)
    }

    /// Erstellt einen Pool mit eigener Slab-Groesse
    pub fn mit_kapazitaet(slab_kapazitaet: usize) -> Self {
        Self {
            frei: Mutex::new(Vec::new()),
            slab_kapazitaet,
        }
    }

    /// Entleiht einen leeren Slab (laenge 0, volle Kapazitaet)
    pub fn holen(&self) -> Vec<u8> {
        self.frei
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.slab_kapazitaet))
    }

    /// Gibt einen Slab zurueck; der Inhalt wird geloescht
    ///
    /// Slabs fremder Groesse oder ueber dem Pool-Limit werden fallen
    /// gelassen statt gehalten.
    pub fn zurueckgeben(&self, mut slab: Vec<u8>) {
        slab.iter_mut().for_each(|b| *b = 0);
        slab.clear();
        if slab.capacity() < self.slab_kapazitaet {
            return;
        }
        let mut frei = self.frei.lock();
        if frei.len() < POOL_LIMIT {
            frei.push(slab);
        }
    }

    /// Anzahl aktuell gehaltener freier Slabs
    pub fn frei_anzahl(&self) -> usize {
        self.frei.lock().len()
    }
}

impl Default for BytePool {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// ObjektPool
// ---------------------------------------------------------------------------

/// Generischer gebundener Pool fuer wiederverwendbare Objekte
pub struct ObjektPool<T> {
    frei: Mutex<Vec<T>>,
    erzeugen: fn() -> T,
    zuruecksetzen: fn(&mut T),
}

impl<T> ObjektPool<T> {
    /// Erstellt einen Pool mit Erzeuger- und Ruecksetz-Funktion
    pub fn neu(erzeugen: fn() -> T, zuruecksetzen: fn(&mut T)) -> Self {
        Self {
            frei: Mutex::new(Vec::new()),
            erzeugen,
            zuruecksetzen,
        }
    }

    /// Entleiht ein Objekt (frisch erzeugt wenn der Pool leer ist)
    pub fn holen(&self) -> T {
        self.frei.lock().pop().unwrap_or_else(self.erzeugen)
    }

    /// Gibt ein Objekt zurueck; es wird vorher zurueckgesetzt
    pub fn zurueckgeben(&self, mut objekt: T) {
        (self.zuruecksetzen)(&mut objekt);
        let mut frei = self.frei.lock();
        if frei.len() < POOL_LIMIT {
            frei.push(objekt);
        }
    }

    /// Anzahl aktuell gehaltener freier Objekte
    pub fn frei_anzahl(&self) -> usize {
        self.frei.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slab_wird_wiederverwendet() {
        let pool = BytePool::mit_kapazitaet(128);
        let mut slab = pool.holen();
        slab.extend_from_slice(&[1, 2, 3]);
        pool.zurueckgeben(slab);

        assert_eq!(pool.frei_anzahl(), 1);
        let erneut = pool.holen();
        assert!(erneut.is_empty(), "Slab muss geleert zurueckkommen");
        assert!(erneut.capacity() >= 128);
        assert_eq!(pool.frei_anzahl(), 0);
    }

    #[test]
    fn pool_limit_wird_eingehalten() {
        let pool = BytePool::mit_kapazitaet(8);
        let slabs: Vec<Vec<u8>> = (0..POOL_LIMIT + 10).map(|_| pool.holen()).collect();
        for slab in slabs {
            pool.zurueckgeben(slab);
        }
        assert_eq!(pool.frei_anzahl(), POOL_LIMIT);
    }

    #[test]
    fn fremde_slabs_werden_nicht_gehalten() {
        let pool = BytePool::mit_kapazitaet(1024);
        pool.zurueckgeben(Vec::with_capacity(8));
        assert_eq!(pool.frei_anzahl(), 0);
    }

    #[test]
    fn objekt_pool_setzt_zurueck() {
        let pool: ObjektPool<Vec<u16>> = ObjektPool::neu(Vec::new, Vec::clear);
        let mut objekt = pool.holen();
        objekt.push(42);
        pool.zurueckgeben(objekt);

        let erneut = pool.holen();
        assert!(erneut.is_empty());
    }
}
