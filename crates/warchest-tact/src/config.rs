//! Build and CDN configuration files.
//!
//! Configs are plain text `key = value` documents fetched by hash from the
//! CDN `config` namespace. Build configs point at the encoding table and root
//! manifest for one build; CDN configs list the archives that hold the bulk
//! of the content.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::keys::{ContentKey, EncodingKey};
use crate::{Error, Result};

/// Parsed `key = value` configuration document.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    values: HashMap<String, String>,
}

impl ConfigFile {
    /// Parse configuration text. Blank lines and `#` comments are skipped;
    /// lines without `=` are ignored.
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some(eq) = line.find('=') else {
                continue;
            };
            let key = line[..eq].trim();
            let value = line[eq + 1..].trim();
            if key.is_empty() {
                continue;
            }

            trace!("Config entry: {key} = {value}");
            values.insert(key.to_string(), value.to_string());
        }

        debug!("Parsed config with {} entries", values.len());
        Self { values }
    }

    /// Value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value for `key`, or an error naming the missing key.
    pub fn require(&self, key: &'static str) -> Result<&str> {
        self.get(key).ok_or(Error::MissingConfigKey(key))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the document held no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Typed view over a build configuration.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    config: ConfigFile,
}

impl BuildConfig {
    pub fn parse(text: &str) -> Self {
        Self {
            config: ConfigFile::parse(text),
        }
    }

    /// Underlying document, for keys without a typed accessor.
    pub fn raw(&self) -> &ConfigFile {
        &self.config
    }

    /// Content key of the root manifest.
    pub fn root(&self) -> Result<ContentKey> {
        let value = self.config.require("root")?;
        first_token(value, "root").and_then(ContentKey::parse)
    }

    /// Content and encoding keys of the encoding table. The second hash is
    /// the encoding key the table is fetched by.
    pub fn encoding(&self) -> Result<(ContentKey, EncodingKey)> {
        let value = self.config.require("encoding")?;
        let mut tokens = value.split_whitespace();
        match (tokens.next(), tokens.next()) {
            (Some(ckey), Some(ekey)) => Ok((ContentKey::parse(ckey)?, EncodingKey::parse(ekey)?)),
            _ => Err(Error::InvalidManifest(
                "encoding expects a content key and an encoding key".to_string(),
            )),
        }
    }

    /// Content key of the install manifest, when the build carries one.
    pub fn install(&self) -> Result<Option<ContentKey>> {
        match self.config.get("install") {
            Some(value) => first_token(value, "install")
                .and_then(ContentKey::parse)
                .map(Some),
            None => Ok(None),
        }
    }

    /// Human-readable build name.
    pub fn build_name(&self) -> Option<&str> {
        self.config.get("build-name")
    }
}

/// Typed view over a CDN configuration.
#[derive(Debug, Clone)]
pub struct CdnConfig {
    config: ConfigFile,
}

impl CdnConfig {
    pub fn parse(text: &str) -> Self {
        Self {
            config: ConfigFile::parse(text),
        }
    }

    /// Underlying document, for keys without a typed accessor.
    pub fn raw(&self) -> &ConfigFile {
        &self.config
    }

    /// Keys of the archives holding packed content, in manifest order.
    pub fn archives(&self) -> Result<Vec<EncodingKey>> {
        self.config
            .require("archives")?
            .split_whitespace()
            .map(EncodingKey::parse)
            .collect()
    }

    /// Byte sizes of the archive indexes, aligned with [`archives`](Self::archives).
    pub fn archive_index_sizes(&self) -> Vec<u64> {
        self.config
            .get("archives-index-size")
            .map(|value| {
                value
                    .split_whitespace()
                    .filter_map(|token| match token.parse() {
                        Ok(size) => Some(size),
                        Err(_) => {
                            warn!("Skipping unparseable archive index size: {token}");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Key of the loose-file index, when present.
    pub fn file_index(&self) -> Result<Option<EncodingKey>> {
        match self.config.get("file-index") {
            Some(value) => first_token(value, "file-index")
                .and_then(EncodingKey::parse)
                .map(Some),
            None => Ok(None),
        }
    }
}

fn first_token<'a>(value: &'a str, key: &'static str) -> Result<&'a str> {
    value
        .split_whitespace()
        .next()
        .ok_or(Error::MissingConfigKey(key))
}
