//! Key-chain resolution shared by both store variants.
//!
//! A [`Session`] owns the parsed root manifest and encoding table of one
//! loaded build and walks the indirection chain: file data id → content key
//! (locale aware) → encoding key. Physical retrieval of the encoded blob is
//! the store's job; decoding the retrieved container happens here so both
//! variants verify and decrypt identically.

use std::sync::Arc;

use tracing::warn;

use warchest_blte::BlteReader;
use warchest_crypto::KeyRing;
use warchest_tact::{ContentKey, EncodingKey, EncodingTable, LocaleFlags, RootFile};

use crate::{Error, Result};

/// Maps file names to file data ids.
///
/// Name resolution lives outside this crate (community listfiles, install
/// manifests); stores only need the lookup.
pub trait NameIndex {
    /// File data id registered for a name, if any.
    fn file_id(&self, name: &str) -> Option<u32>;
}

/// Per-fetch options.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Zero-fill blocks whose decryption key is absent from the ring
    /// instead of failing the whole read.
    pub partial_decrypt: bool,
    /// Skip local data and start at the disk cache. Stores without local
    /// data ignore this.
    pub force_fallback: bool,
}

/// Resolved key chain of one loaded build.
pub struct Session {
    root: RootFile,
    encoding: EncodingTable,
    locale: LocaleFlags,
    keys: Arc<KeyRing>,
}

impl Session {
    pub(crate) fn new(
        root: RootFile,
        encoding: EncodingTable,
        locale: LocaleFlags,
        keys: Arc<KeyRing>,
    ) -> Self {
        Self {
            root,
            encoding,
            locale,
            keys,
        }
    }

    /// Content key registered for a file data id under the active locales.
    pub fn content_key_for(&self, file_id: u32) -> Result<&ContentKey> {
        Ok(self.root.resolve(file_id, self.locale)?)
    }

    /// Encoding key whose blob decodes to this content.
    pub fn encoding_key_for_content(&self, ckey: &ContentKey) -> Result<EncodingKey> {
        self.encoding
            .lookup(ckey)
            .map(|entry| entry.key)
            .ok_or(Error::UnknownContentKey(*ckey))
    }

    /// Encoding key for a file data id, walking the full chain.
    pub fn encoding_key_for(&self, file_id: u32) -> Result<EncodingKey> {
        let ckey = self.content_key_for(file_id)?;
        self.encoding_key_for_content(ckey)
    }

    /// Whether the id resolves all the way to an encoding key.
    pub fn file_exists(&self, file_id: u32) -> bool {
        self.encoding_key_for(file_id).is_ok()
    }

    /// Root manifest of the build.
    pub fn root(&self) -> &RootFile {
        &self.root
    }

    /// Encoding table of the build.
    pub fn encoding(&self) -> &EncodingTable {
        &self.encoding
    }

    /// Active locale mask.
    pub fn locale(&self) -> LocaleFlags {
        self.locale
    }

    /// Decryption key ring shared with the codec.
    pub fn keys(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    /// Decode a retrieved container, verifying it against its encoding key.
    pub(crate) fn decode(
        &self,
        raw: Vec<u8>,
        key: &EncodingKey,
        partial_decrypt: bool,
    ) -> Result<Vec<u8>> {
        decode_blob(raw, key, &self.keys, partial_decrypt)
    }
}

/// Decode a raw container into file bytes. The blob (or its header, for
/// chunked containers) must hash to `key`; blocks missing their decryption
/// key are zero-filled only when `partial_decrypt` is set.
pub(crate) fn decode_blob(
    raw: Vec<u8>,
    key: &EncodingKey,
    keys: &Arc<KeyRing>,
    partial_decrypt: bool,
) -> Result<Vec<u8>> {
    let mut reader = BlteReader::new(raw, Some(key.as_bytes()), Arc::clone(keys), partial_decrypt)?;
    reader.decode_all()?;

    let missing = reader.missing_keys();
    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(|name| format!("{name:016x}")).collect();
        warn!(
            "{} block(s) of {key} zero-filled, missing decryption keys: {}",
            missing.len(),
            names.join(", ")
        );
    }

    Ok(reader.into_decoded()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{container, content_key, encoding_blob, encoding_key, root_blob};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn en_us() -> LocaleFlags {
        LocaleFlags::new().with_en_us(true)
    }

    fn session_with(entries: &[(u32, ContentKey, EncodingKey, u64)]) -> Session {
        let root_entries: Vec<(u32, ContentKey)> =
            entries.iter().map(|&(id, ckey, ..)| (id, ckey)).collect();
        let encoding_entries: Vec<(ContentKey, EncodingKey, u64)> = entries
            .iter()
            .map(|&(_, ckey, ekey, size)| (ckey, ekey, size))
            .collect();

        let root = RootFile::parse(&root_blob(&root_entries)).unwrap();
        let encoding = EncodingTable::parse(&encoding_blob(&encoding_entries)).unwrap();
        Session::new(root, encoding, en_us(), Arc::new(KeyRing::new()))
    }

    #[test]
    fn chain_resolves_id_to_encoding_key() {
        let ckey = content_key(1);
        let ekey = encoding_key(2);
        let session = session_with(&[(1234, ckey, ekey, 64)]);

        assert_eq!(*session.content_key_for(1234).unwrap(), ckey);
        assert_eq!(session.encoding_key_for(1234).unwrap(), ekey);
        assert!(session.file_exists(1234));
        assert!(!session.file_exists(99));
    }

    #[test]
    fn unknown_id_and_unmapped_content_key_differ() {
        let session = session_with(&[(7, content_key(1), encoding_key(2), 8)]);

        assert!(matches!(
            session.encoding_key_for(42),
            Err(Error::Tact(warchest_tact::Error::UnknownFileId(42)))
        ));
        assert!(matches!(
            session.encoding_key_for_content(&content_key(9)),
            Err(Error::UnknownContentKey(_))
        ));
    }

    #[test]
    fn locale_miss_is_distinct() {
        let ckey = content_key(1);
        let root = RootFile::parse(&root_blob(&[(7, ckey)])).unwrap();
        let encoding = EncodingTable::parse(&encoding_blob(&[(ckey, encoding_key(2), 8)])).unwrap();
        let session = Session::new(
            root,
            encoding,
            LocaleFlags::new().with_de_de(true),
            Arc::new(KeyRing::new()),
        );

        assert!(matches!(
            session.encoding_key_for(7),
            Err(Error::Tact(warchest_tact::Error::NoLocaleVariant(7)))
        ));
    }

    #[test]
    fn decode_verifies_against_the_encoding_key() {
        let (blob, ekey) = container(b"decoded payload");
        let keys = Arc::new(KeyRing::new());

        let decoded = decode_blob(blob.clone(), &ekey, &keys, false).unwrap();
        assert_eq!(decoded, b"decoded payload");

        let wrong = encoding_key(0xEE);
        assert!(matches!(
            decode_blob(blob, &wrong, &keys, false),
            Err(Error::Blte(warchest_blte::Error::BlobChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn name_index_is_object_safe() {
        struct Listfile(HashMap<String, u32>);
        impl NameIndex for Listfile {
            fn file_id(&self, name: &str) -> Option<u32> {
                self.0.get(name).copied()
            }
        }

        let index: Box<dyn NameIndex> = Box::new(Listfile(HashMap::from([(
            "interface/icons/ability.blp".to_string(),
            1234,
        )])));
        assert_eq!(index.file_id("interface/icons/ability.blp"), Some(1234));
        assert_eq!(index.file_id("missing"), None);
    }
}
