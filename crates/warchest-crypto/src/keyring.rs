//! Ring of named decryption keys.
//!
//! Keys are identified by an 8-byte name (rendered as 16 lowercase hex
//! digits) and carry 16 bytes of Salsa20 key material. The ring is populated
//! externally before any encrypted content is requested; content for which no
//! key is present surfaces [`Error::KeyNotFound`] so callers can decide
//! between aborting and zero-filling.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::{Error, Result};

/// Parse a key name: exactly 16 hex digits, case-insensitive.
pub fn parse_key_name(name: &str) -> Result<u64> {
    if name.len() != 16 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidKeyName(name.to_string()));
    }

    u64::from_str_radix(name, 16).map_err(|_| Error::InvalidKeyName(name.to_string()))
}

/// Parse key material: exactly 32 hex digits, case-insensitive.
pub fn parse_key_material(material: &str) -> Result<[u8; 16]> {
    if material.len() != 32 {
        return Err(Error::InvalidKeyMaterial(material.to_string()));
    }

    let bytes =
        hex::decode(material).map_err(|_| Error::InvalidKeyMaterial(material.to_string()))?;
    let mut key = [0u8; 16];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Named 16-byte decryption keys.
#[derive(Debug, Default, Clone)]
pub struct KeyRing {
    keys: HashMap<u64, [u8; 16]>,
}

impl KeyRing {
    /// Create an empty ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key by name.
    pub fn key(&self, key_name: u64) -> Option<&[u8; 16]> {
        self.keys.get(&key_name)
    }

    /// Add a key, replacing any previous entry with the same name.
    pub fn add_key(&mut self, key_name: u64, key: [u8; 16]) {
        self.keys.insert(key_name, key);
    }

    /// Add a key from its hex rendering.
    pub fn add_key_hex(&mut self, name: &str, material: &str) -> Result<()> {
        let key_name = parse_key_name(name)?;
        let key = parse_key_material(material)?;
        self.add_key(key_name, key);
        Ok(())
    }

    /// Number of keys in the ring.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// `true` if no keys are loaded.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Import keys from plain text, one `name key` pair per line.
    ///
    /// Blank lines and `#` comments are skipped; malformed lines are logged
    /// and skipped rather than failing the whole import. Returns the number
    /// of keys added.
    pub fn load_text(&mut self, content: &str) -> usize {
        let mut loaded = 0;

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (Some(name), Some(material)) = (parts.next(), parts.next()) else {
                warn!("Skipping malformed key line {}: {}", line_num + 1, line);
                continue;
            };

            match self.add_key_hex(name, material) {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Skipping key on line {}: {}", line_num + 1, e),
            }
        }

        debug!("Imported {loaded} keys from text");
        loaded
    }

    /// Import keys from the persisted JSON shape: one object mapping key
    /// names to key material. Malformed entries are skipped with a warning.
    pub fn load_json(&mut self, content: &str) -> Result<usize> {
        let entries: HashMap<String, String> = serde_json::from_str(content)
            .map_err(|e| Error::InvalidKeyFile(e.to_string()))?;

        let mut loaded = 0;
        for (name, material) in entries {
            match self.add_key_hex(&name, &material) {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Skipping key {name}: {e}"),
            }
        }

        debug!("Imported {loaded} keys from JSON");
        Ok(loaded)
    }

    /// Import keys from a file, picking the shape by extension (`.json` or
    /// plain text).
    pub fn load_key_file(&mut self, path: &Path) -> Result<usize> {
        let content = fs::read_to_string(path)?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => self.load_json(&content),
            _ => Ok(self.load_text(&content)),
        }
    }

    /// Export the ring to its persisted JSON shape. Keys are emitted in
    /// name order so the output is stable.
    pub fn to_json(&self) -> Result<String> {
        let entries: BTreeMap<String, String> = self
            .keys
            .iter()
            .map(|(name, key)| (format!("{name:016x}"), hex::encode(key)))
            .collect();

        serde_json::to_string(&entries).map_err(|e| Error::InvalidKeyFile(e.to_string()))
    }
}
