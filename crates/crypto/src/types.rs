//! Gemeinsame Typen fuer das Kryptografie-Subsystem

/// Sicherer Schluessel-Container (wird beim Drop genullt)
#[derive(Clone)]
pub struct SecretBytes(Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Nullt den Inhalt sofort (ohne auf den Drop zu warten)
    pub fn nullen(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
        self.0.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_gibt_keine_bytes_preis() {
        let secret = SecretBytes::new(vec![0xAA; 32]);
        let debug = format!("{:?}", secret);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("aa"));
        assert!(!debug.contains("170"));
    }

    #[test]
    fn nullen_leert_den_inhalt() {
        let mut secret = SecretBytes::new(vec![0xAA; 32]);
        secret.nullen();
        assert!(secret.is_empty());
    }
}
