//! Network-backed store.
//!
//! Opening a remote store walks the full patch pipeline: query the patch
//! service for the current build, rank the advertised CDN mirrors, fetch the
//! build and CDN configs, and load every archive index so that individual
//! blobs can be addressed with ranged requests. Everything fetched from the
//! CDN lands in the disk cache before it is returned.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use tracing::{debug, info};

use warchest_blte::{BlockSource, BlteHeader, BlteStream, declared_header_size};
use warchest_cache::{BuildCache, CacheRoot};
use warchest_cdn::{CdnClient, MirrorResolver, PatchServer};
use warchest_crypto::KeyRing;
use warchest_tact::{
    ArchiveIndex, BuildConfig, CdnConfig, EncodingKey, EncodingTable, LocaleFlags, RootFile,
};

use crate::session::{FetchOptions, NameIndex, Session, decode_blob};
use crate::{DEFAULT_CACHE_TTL, ENCODING_FILE, Error, FileStream, HEADER_PROBE, ROOT_FILE, Result};

/// Archive index fetches kept in flight during preload.
const INDEX_FETCH_CONCURRENCY: usize = 50;

/// Settings for a network-backed store.
#[derive(Clone)]
pub struct RemoteConfig {
    /// Patch region, also selects the CDN row (`us`, `eu`, ...).
    pub region: String,
    /// Product code, e.g. `wow` or `wow_classic`.
    pub product: String,
    /// Disk cache root directory.
    pub cache_dir: PathBuf,
    /// Locales accepted when resolving file ids.
    pub locale: LocaleFlags,
    /// Decryption keys for encrypted blocks.
    pub keys: Arc<KeyRing>,
    /// Patch server base URL override; the public service when absent.
    pub patch_base: Option<String>,
    /// Extra CDN hosts ranked alongside the advertised ones.
    pub fallback_hosts: Vec<String>,
    /// Age after which cached builds are swept. Zero disables the sweep.
    pub cache_ttl: Duration,
}

impl RemoteConfig {
    pub fn new(
        region: impl Into<String>,
        product: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            region: region.into(),
            product: product.into(),
            cache_dir: cache_dir.into(),
            locale: LocaleFlags::new().with_en_us(true),
            keys: Arc::new(KeyRing::new()),
            patch_base: None,
            fallback_hosts: Vec::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// Placement of one encoded blob inside a remote archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLocation {
    /// Archive holding the blob.
    pub archive: EncodingKey,
    /// Byte offset of the container within the archive.
    pub offset: u32,
    /// Container length in bytes.
    pub size: u32,
}

/// The network pipeline shared by [`RemoteStorage`] and the local store's
/// fallback path: ranked CDN client, disk cache, parsed build config, and
/// the merged archive map.
pub(crate) struct RemoteCore {
    cdn: CdnClient,
    cache_root: CacheRoot,
    build_cache: BuildCache,
    build_config: BuildConfig,
    archives: HashMap<EncodingKey, ArchiveLocation>,
    versions_name: String,
    build_key: String,
}

impl RemoteCore {
    /// Run the preload pipeline for the configured region and product.
    ///
    /// `cache_override` reuses an already opened build cache instead of
    /// deriving one from the versions row; the local store passes its own
    /// so both share one cache ledger.
    pub(crate) async fn preload(
        config: &RemoteConfig,
        cache_override: Option<BuildCache>,
    ) -> Result<Self> {
        let mut patch = PatchServer::new()?;
        if let Some(base) = &config.patch_base {
            patch = patch.with_base_url(base.clone());
        }

        let versions = patch.versions(&config.region, &config.product).await?;
        let version = versions
            .into_iter()
            .find(|row| row.region == config.region)
            .ok_or_else(|| Error::RegionNotFound(config.region.clone()))?;
        info!(
            "Selected {} build {} ({})",
            config.product, version.versions_name, version.build_config
        );

        let cdns = patch.cdns(&config.region, &config.product).await?;
        let cdn_row = cdns
            .into_iter()
            .find(|row| row.name == config.region)
            .ok_or_else(|| Error::RegionNotFound(config.region.clone()))?;

        let resolver = Arc::new(MirrorResolver::new()?);
        let ranking = resolver
            .resolve(&config.region, &cdn_row.hosts, &config.fallback_hosts)
            .await?;
        let cdn = CdnClient::new(Arc::clone(&resolver), ranking, cdn_row.path.clone())?;

        let (cache_root, build_cache) = match cache_override {
            Some(cache) => (cache.cache_root().clone(), cache),
            None => {
                let root = CacheRoot::new(&config.cache_dir);
                let cache = root.open_build(&version.build_config).await?;
                (root, cache)
            }
        };

        let build_text = String::from_utf8(cdn.fetch_config(&version.build_config).await?)?;
        let build_config = BuildConfig::parse(&build_text);
        let cdn_text = String::from_utf8(cdn.fetch_config(&version.cdn_config).await?)?;
        let cdn_config = CdnConfig::parse(&cdn_text);

        let archives = load_archives(&cdn, &cache_root, &cdn_config).await?;

        Ok(Self {
            cdn,
            cache_root,
            build_cache,
            build_config,
            archives,
            versions_name: version.versions_name,
            build_key: version.build_config,
        })
    }

    pub(crate) fn archive_location(&self, key: &EncodingKey) -> Option<&ArchiveLocation> {
        self.archives.get(key)
    }

    /// Fetch a config blob as text. Configs are small and addressed by
    /// their own hash, so they bypass the data cache.
    pub(crate) async fn fetch_config_text(&self, hash: &str) -> Result<String> {
        Ok(String::from_utf8(self.cdn.fetch_config(hash).await?)?)
    }

    /// Fetch an encoded blob from the CDN, ranged out of its archive when
    /// the archive map covers it, as a loose object otherwise.
    pub(crate) async fn fetch_from_network(&self, key: &EncodingKey) -> Result<Vec<u8>> {
        if let Some(location) = self.archives.get(key) {
            debug!(
                "Fetching {key} from archive {} at {}+{}",
                location.archive, location.offset, location.size
            );
            return Ok(self
                .cdn
                .fetch_data_range(
                    &location.archive,
                    u64::from(location.offset),
                    u64::from(location.size),
                )
                .await?);
        }
        Ok(self.cdn.fetch_data(key).await?)
    }

    /// Fetch an encoded blob, serving from the disk cache when the cached
    /// copy still matches its recorded digest.
    pub(crate) async fn fetch_raw(&self, key: &EncodingKey) -> Result<Vec<u8>> {
        let path = self.cache_root.data_dir().join(key.to_string());
        if let Some(cached) = self.cache_root.read_verified(&path).await {
            debug!("Disk cache hit for {key}");
            return Ok(cached);
        }

        let raw = self.fetch_from_network(key).await?;
        self.cache_root.write_tracked(&path, &raw).await?;
        Ok(raw)
    }

    /// Open a lazy block stream over an encoded blob.
    ///
    /// Archived blobs are streamed with ranged requests against their
    /// archive; only the container header is fetched up front. Loose blobs
    /// advertise no length, so they are pulled whole through the disk cache
    /// and served from memory.
    pub(crate) async fn open_stream(
        &self,
        key: &EncodingKey,
        keys: &Arc<KeyRing>,
        partial_decrypt: bool,
    ) -> Result<FileStream> {
        if let Some(location) = self.archives.get(key) {
            let base = u64::from(location.offset);
            let total = u64::from(location.size);

            let mut probe = self
                .cdn
                .fetch_data_range(&location.archive, base, total.min(HEADER_PROBE))
                .await?;
            if let Some(declared) = declared_header_size(&probe) {
                let declared = u64::from(declared);
                if declared > probe.len() as u64 && declared <= total {
                    probe = self
                        .cdn
                        .fetch_data_range(&location.archive, base, declared)
                        .await?;
                }
            }

            let header = BlteHeader::parse(&probe, total)?;
            let source: Box<dyn BlockSource> = Box::new(CdnBlockSource {
                cdn: self.cdn.clone(),
                archive: location.archive,
                base,
            });
            return Ok(BlteStream::new(
                header,
                source,
                Arc::clone(keys),
                partial_decrypt,
            ));
        }

        let raw = self.fetch_raw(key).await?;
        let total = raw.len() as u64;
        let header = BlteHeader::parse(&raw, total)?;
        let source: Box<dyn BlockSource> = Box::new(BufferedSource { raw });
        Ok(BlteStream::new(
            header,
            source,
            Arc::clone(keys),
            partial_decrypt,
        ))
    }

    /// Fetch a system file (encoding, root) by its stable name, keeping a
    /// decoded-input copy in the per-build cache.
    pub(crate) async fn fetch_system_file(&self, name: &str, key: &EncodingKey) -> Result<Vec<u8>> {
        if let Some(cached) = self.build_cache.get_file(name).await {
            return Ok(cached);
        }
        let raw = self.fetch_from_network(key).await?;
        self.build_cache.store_file(name, &raw).await?;
        Ok(raw)
    }
}

/// Fetch and merge every archive index named by the CDN config. Entries are
/// keyed writes into one map, so completion order does not matter; fetches
/// are capped to keep preload from opening hundreds of connections at once.
async fn load_archives(
    cdn: &CdnClient,
    cache_root: &CacheRoot,
    cdn_config: &CdnConfig,
) -> Result<HashMap<EncodingKey, ArchiveLocation>> {
    let archives = cdn_config.archives()?;
    info!("Loading {} archive indexes", archives.len());

    let indexes: Vec<Result<(EncodingKey, ArchiveIndex)>> =
        stream::iter(archives.into_iter().map(|archive| async move {
            let index = fetch_archive_index(cdn, cache_root, &archive).await?;
            Ok((archive, index))
        }))
        .buffer_unordered(INDEX_FETCH_CONCURRENCY)
        .collect()
        .await;

    let mut map = HashMap::new();
    for result in indexes {
        let (archive, index) = result?;
        for entry in index.entries() {
            map.insert(
                entry.key,
                ArchiveLocation {
                    archive,
                    offset: entry.offset,
                    size: entry.size,
                },
            );
        }
    }
    debug!("Archive map covers {} encoding keys", map.len());
    Ok(map)
}

/// One archive index, from the disk cache when present. A fresh copy is
/// parsed before it is cached so a truncated download never sticks.
async fn fetch_archive_index(
    cdn: &CdnClient,
    cache_root: &CacheRoot,
    archive: &EncodingKey,
) -> Result<ArchiveIndex> {
    let path = cache_root.indexes_dir().join(format!("{archive}.index"));
    if let Some(cached) = cache_root.read_verified(&path).await {
        return Ok(ArchiveIndex::parse(&cached)?);
    }

    let raw = cdn.fetch_index(archive).await?;
    let index = ArchiveIndex::parse(&raw)?;
    cache_root.write_tracked(&path, &raw).await?;
    Ok(index)
}

/// Reads blocks of an archived container with ranged CDN requests.
struct CdnBlockSource {
    cdn: CdnClient,
    archive: EncodingKey,
    base: u64,
}

#[async_trait]
impl BlockSource for CdnBlockSource {
    async fn read_range(&self, offset: u64, len: u32) -> warchest_blte::Result<Vec<u8>> {
        self.cdn
            .fetch_data_range(&self.archive, self.base + offset, u64::from(len))
            .await
            .map_err(warchest_blte::Error::fetch)
    }
}

/// Serves block reads from an already fetched container.
struct BufferedSource {
    raw: Vec<u8>,
}

#[async_trait]
impl BlockSource for BufferedSource {
    async fn read_range(&self, offset: u64, len: u32) -> warchest_blte::Result<Vec<u8>> {
        let start = offset as usize;
        let end = start + len as usize;
        self.raw
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or(warchest_blte::Error::TruncatedData {
                expected: end as u64,
                actual: self.raw.len() as u64,
            })
    }
}

/// Store that retrieves everything over the network, backed by the disk
/// cache.
pub struct RemoteStorage {
    core: RemoteCore,
    session: Session,
    config: RemoteConfig,
}

impl RemoteStorage {
    /// Open the current build of the configured product: preload the
    /// network pipeline, then fetch and decode the encoding table and root
    /// manifest.
    pub async fn open(config: RemoteConfig) -> Result<Self> {
        let core = RemoteCore::preload(&config, None).await?;

        let (_, encoding_ekey) = core.build_config.encoding()?;
        let raw = core.fetch_system_file(ENCODING_FILE, &encoding_ekey).await?;
        let encoding_bytes = decode_blob(raw, &encoding_ekey, &config.keys, false)?;
        let encoding = EncodingTable::parse(&encoding_bytes)?;

        let root_ckey = core.build_config.root()?;
        let root_ekey = encoding
            .lookup(&root_ckey)
            .map(|entry| entry.key)
            .ok_or(Error::UnknownContentKey(root_ckey))?;
        let raw = core.fetch_system_file(ROOT_FILE, &root_ekey).await?;
        let root_bytes = decode_blob(raw, &root_ekey, &config.keys, false)?;
        let root = RootFile::parse(&root_bytes)?;

        info!(
            "Opened {} {} with {} files",
            config.product,
            core.versions_name,
            root.file_count()
        );
        let session = Session::new(root, encoding, config.locale, Arc::clone(&config.keys));

        let reclaimed = core.cache_root.expire_stale(config.cache_ttl).await?;
        if reclaimed > 0 {
            info!("Expired stale cached builds, reclaimed {reclaimed} bytes");
        }

        Ok(Self {
            core,
            session,
            config,
        })
    }

    /// Fetch and decode a file by its file data id.
    pub async fn get_file(&self, file_id: u32) -> Result<Vec<u8>> {
        self.get_file_with(file_id, FetchOptions::default()).await
    }

    /// [`Self::get_file`] with explicit options.
    pub async fn get_file_with(&self, file_id: u32, options: FetchOptions) -> Result<Vec<u8>> {
        let key = self.session.encoding_key_for(file_id)?;
        debug!("Fetching file {file_id} as {key}");
        let raw = self.core.fetch_raw(&key).await?;
        self.session.decode(raw, &key, options.partial_decrypt)
    }

    /// Open a lazy block stream over a file.
    pub async fn get_file_stream(&self, file_id: u32) -> Result<FileStream> {
        self.get_file_stream_with(file_id, FetchOptions::default())
            .await
    }

    /// [`Self::get_file_stream`] with explicit options.
    pub async fn get_file_stream_with(
        &self,
        file_id: u32,
        options: FetchOptions,
    ) -> Result<FileStream> {
        let key = self.session.encoding_key_for(file_id)?;
        self.core
            .open_stream(&key, self.session.keys(), options.partial_decrypt)
            .await
    }

    /// Fetch a file by name through a caller-provided name index.
    pub async fn get_file_by_name(&self, name: &str, index: &dyn NameIndex) -> Result<Vec<u8>> {
        let file_id = index
            .file_id(name)
            .ok_or_else(|| Error::NameNotIndexed(name.to_string()))?;
        self.get_file(file_id).await
    }

    /// Whether the id resolves to an encoding key in this build.
    pub fn file_exists(&self, file_id: u32) -> bool {
        self.session.file_exists(file_id)
    }

    /// Whether the name is indexed and resolves in this build.
    pub fn file_exists_by_name(&self, name: &str, index: &dyn NameIndex) -> bool {
        index
            .file_id(name)
            .is_some_and(|file_id| self.file_exists(file_id))
    }

    /// Where an encoded blob sits in the remote archives, if mapped.
    pub fn archive_location(&self, key: &EncodingKey) -> Option<&ArchiveLocation> {
        self.core.archive_location(key)
    }

    /// Display name of the loaded build, e.g. `11.1.7.61491`.
    pub fn build_name(&self) -> &str {
        &self.core.versions_name
    }

    /// Build config hash of the loaded build.
    pub fn build_key(&self) -> &str {
        &self.core.build_key
    }

    /// Key-chain session of the loaded build.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Settings this store was opened with.
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }
}
