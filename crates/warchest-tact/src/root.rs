//! Root manifest parser.
//!
//! The root manifest is the top of the key chain: it maps numeric file ids
//! to content keys, with one variant per locale/content-flag combination.
//! Tagged manifests (`TSFM`) come in versions 0 through 2; older builds ship
//! an untagged layout with name hashes interleaved into the records.
//!
//! All variants of an id are kept in registration order; locale selection
//! happens at [`resolve`](RootFile::resolve) time, not at parse time.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use modular_bitfield::{bitfield, prelude::*};
use tracing::debug;

use crate::keys::ContentKey;
use crate::{Error, Result};

/// "TSFM" read as a little-endian u32.
const ROOT_MAGIC: u32 = 0x4D46_5354;

/// Bitmask of locales a root variant applies to.
#[bitfield(bytes = 4)]
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub struct LocaleFlags {
    #[skip]
    __: B1,
    pub en_us: bool, // 0x2
    pub ko_kr: bool, // 0x4
    #[skip]
    __: B1,
    pub fr_fr: bool, // 0x10
    pub de_de: bool, // 0x20
    pub zh_cn: bool, // 0x40
    pub es_es: bool, // 0x80

    pub zh_tw: bool, // 0x100
    pub en_gb: bool, // 0x200
    pub en_cn: bool, // 0x400
    pub en_tw: bool, // 0x800

    pub es_mx: bool, // 0x1000
    pub ru_ru: bool, // 0x2000
    pub pt_br: bool, // 0x4000
    pub it_it: bool, // 0x8000

    pub pt_pt: bool, // 0x10000
    #[skip]
    __: B15,
}

impl LocaleFlags {
    /// Flags with every locale set.
    pub fn all_locales() -> Self {
        Self::from(0xFFFF_FFFF)
    }

    /// Whether at least one locale is set.
    pub fn any(self) -> bool {
        u32::from(self) != 0
    }

    /// Whether any locale is set in both masks.
    pub fn intersects(self, other: Self) -> bool {
        u32::from(self) & u32::from(other) != 0
    }
}

/// Content flags attached to a root variant.
#[bitfield(bytes = 4)]
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub struct ContentFlags {
    pub high_res_texture: bool, // 0x1
    #[skip]
    __: B1,
    /// File also appears in the install manifest.
    pub install: bool, // 0x4
    pub windows: bool, // 0x8

    pub macos: bool,  // 0x10
    pub x86_32: bool, // 0x20
    pub x86_64: bool, // 0x40
    /// Censored variant for low-violence regions.
    pub low_violence: bool, // 0x80

    pub mystery_platform: bool, // 0x100
    #[skip]
    __: B2,
    pub update_plugin: bool, // 0x800

    #[skip]
    __: B3,
    pub aarch64: bool, // 0x8000

    #[skip]
    __: B11,
    pub encrypted: bool, // 0x8000000

    /// The chunk omits its name-hash block when the manifest allows
    /// unnamed files.
    pub no_name_hash: bool, // 0x10000000
    pub uncommon_resolution: bool, // 0x20000000
    pub bundle: bool,         // 0x40000000
    pub no_compression: bool, // 0x80000000
}

/// One registered variant of a file id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootVariant {
    pub content_key: ContentKey,
    pub locale: LocaleFlags,
    pub content: ContentFlags,
}

/// Parsed root manifest.
#[derive(Debug, Default)]
pub struct RootFile {
    entries: HashMap<u32, Vec<RootVariant>>,
    variant_count: usize,
    version: u32,
}

impl RootFile {
    /// Parse a root manifest from decoded bytes. An untagged document is
    /// treated as the pre-`TSFM` interleaved layout.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let total = data.len() as u64;

        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic == ROOT_MAGIC {
            Self::parse_tagged(&mut cursor, total)
        } else {
            cursor.set_position(0);
            Self::parse_legacy(&mut cursor, total)
        }
    }

    fn parse_tagged(cursor: &mut Cursor<&[u8]>, total: u64) -> Result<Self> {
        // Version 1+ manifests start with a 0x18-byte header; in version 0
        // the probed word is already the total file count.
        let probe = cursor.read_u32::<LittleEndian>()?;
        let (version, total_files, named_files) = if probe == 0x18 {
            let version = cursor.read_u32::<LittleEndian>()?;
            if !(1..=2).contains(&version) {
                return Err(Error::UnsupportedRootVersion(version));
            }
            let total_files = cursor.read_u32::<LittleEndian>()?;
            let named_files = cursor.read_u32::<LittleEndian>()?;
            cursor.set_position(cursor.position() + 4); // header padding
            (version, total_files, named_files)
        } else {
            (0, probe, cursor.read_u32::<LittleEndian>()?)
        };
        let allow_unnamed = total_files != named_files;

        let mut root = Self {
            version,
            ..Self::default()
        };

        while cursor.position() < total {
            let num_records = cursor.read_u32::<LittleEndian>()? as usize;

            let (locale, content) = if version == 2 {
                let locale = LocaleFlags::from(cursor.read_u32::<LittleEndian>()?);
                let flags1 = cursor.read_u32::<LittleEndian>()?;
                let flags2 = cursor.read_u32::<LittleEndian>()?;
                let flags3 = cursor.read_u8()?;
                let content = ContentFlags::from(flags1 | flags2 | (u32::from(flags3) << 17));
                (locale, content)
            } else {
                let content = ContentFlags::from(cursor.read_u32::<LittleEndian>()?);
                let locale = LocaleFlags::from(cursor.read_u32::<LittleEndian>()?);
                (locale, content)
            };

            let file_ids = read_file_ids(cursor, num_records)?;
            for &file_id in &file_ids {
                let mut ckey = [0u8; 16];
                cursor.read_exact(&mut ckey)?;
                root.register(file_id, ckey, locale, content);
            }

            if !(allow_unnamed && content.no_name_hash()) {
                cursor.set_position(cursor.position() + num_records as u64 * 8);
            }
        }

        debug!(
            "Parsed root manifest v{}: {} file ids, {} variants",
            root.version,
            root.entries.len(),
            root.variant_count
        );
        Ok(root)
    }

    fn parse_legacy(cursor: &mut Cursor<&[u8]>, total: u64) -> Result<Self> {
        let mut root = Self::default();

        while cursor.position() < total {
            let num_records = cursor.read_u32::<LittleEndian>()? as usize;
            let content = ContentFlags::from(cursor.read_u32::<LittleEndian>()?);
            let locale = LocaleFlags::from(cursor.read_u32::<LittleEndian>()?);

            let file_ids = read_file_ids(cursor, num_records)?;
            for &file_id in &file_ids {
                let mut ckey = [0u8; 16];
                cursor.read_exact(&mut ckey)?;
                cursor.set_position(cursor.position() + 8); // name hash
                root.register(file_id, ckey, locale, content);
            }
        }

        debug!(
            "Parsed legacy root manifest: {} file ids, {} variants",
            root.entries.len(),
            root.variant_count
        );
        Ok(root)
    }

    fn register(&mut self, file_id: u32, ckey: [u8; 16], locale: LocaleFlags, content: ContentFlags) {
        self.entries.entry(file_id).or_default().push(RootVariant {
            content_key: ContentKey::from_bytes(ckey),
            locale,
            content,
        });
        self.variant_count += 1;
    }

    /// Content key for a file id under the active locales.
    ///
    /// Variants are tried in registration order; low-violence variants are
    /// never selected. An id absent from the manifest and an id whose
    /// variants all miss the locale mask fail differently.
    pub fn resolve(&self, file_id: u32, locales: LocaleFlags) -> Result<&ContentKey> {
        let variants = self
            .entries
            .get(&file_id)
            .ok_or(Error::UnknownFileId(file_id))?;

        variants
            .iter()
            .find(|variant| variant.locale.intersects(locales) && !variant.content.low_violence())
            .map(|variant| &variant.content_key)
            .ok_or(Error::NoLocaleVariant(file_id))
    }

    /// All registered variants of a file id, in registration order.
    pub fn variants(&self, file_id: u32) -> Option<&[RootVariant]> {
        self.entries.get(&file_id).map(Vec::as_slice)
    }

    /// Whether the manifest has any variant for this id.
    pub fn contains(&self, file_id: u32) -> bool {
        self.entries.contains_key(&file_id)
    }

    /// Number of distinct file ids.
    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of registered variants across all ids.
    pub fn variant_count(&self) -> usize {
        self.variant_count
    }

    /// Manifest version (0 for untagged documents).
    pub fn version(&self) -> u32 {
        self.version
    }
}

/// Decode the delta-compressed file id block. The first delta is the first
/// id; each later id is `previous + 1 + delta`.
fn read_file_ids(cursor: &mut Cursor<&[u8]>, num_records: usize) -> Result<Vec<u32>> {
    let mut file_ids = Vec::with_capacity(num_records);
    let mut current = 0u32;

    for i in 0..num_records {
        let delta = cursor.read_i32::<LittleEndian>()?;
        current = if i == 0 {
            u32::try_from(delta).map_err(|_| Error::FileIdOverflow)?
        } else {
            delta
                .checked_add(1)
                .and_then(|step| current.checked_add_signed(step))
                .ok_or(Error::FileIdOverflow)?
        };
        file_ids.push(current);
    }

    Ok(file_ids)
}
