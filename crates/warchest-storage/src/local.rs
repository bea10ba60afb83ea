//! Store over an installed game directory.
//!
//! Reads the install's `.build.info`, merges its `.idx` tables, and serves
//! reads straight out of the `data.XXX` archives. Anything the install does
//! not carry falls back to the CDN: the disk cache first, then the network
//! pipeline, which is set up lazily on the first miss.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use warchest_blte::{BlockSource, BlteHeader, BlteStream, declared_header_size, is_container};
use warchest_cache::{BuildCache, CacheRoot};
use warchest_crypto::KeyRing;
use warchest_tact::{
    BuildConfig, BuildInfoRow, EncodingKey, EncodingTable, IdxFile, LocaleFlags, RootFile, manifest,
};

use crate::remote::{RemoteConfig, RemoteCore};
use crate::session::{FetchOptions, NameIndex, Session, decode_blob};
use crate::{DEFAULT_CACHE_TTL, ENCODING_FILE, Error, FileStream, HEADER_PROBE, ROOT_FILE, Result};

/// Bytes of bookkeeping ahead of each container in a `data.XXX` archive:
/// reversed key, size, flags, and checksums.
const LOCAL_ENTRY_HEADER: u32 = 0x1E;

/// Settings for a store over an installed game directory.
#[derive(Clone)]
pub struct LocalConfig {
    /// Install root, the directory holding `.build.info`.
    pub install_dir: PathBuf,
    /// Disk cache root for the CDN fallback.
    pub cache_dir: PathBuf,
    /// Patch region consulted when the fallback is needed.
    pub region: String,
    /// Product code to mount. The active build when absent.
    pub product: Option<String>,
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

impl LocalConfig {
    pub fn new(install_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            cache_dir: cache_dir.into(),
            region: "us".to_string(),
            product: None,
            locale: LocaleFlags::new().with_en_us(true),
            keys: Arc::new(KeyRing::new()),
            patch_base: None,
            fallback_hosts: Vec::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// One step of the read fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    LocalData,
    DiskCache,
    Network,
}

const FULL_CHAIN: [Tier; 3] = [Tier::LocalData, Tier::DiskCache, Tier::Network];
const FALLBACK_CHAIN: [Tier; 2] = [Tier::DiskCache, Tier::Network];

/// Store that reads an installed build from disk, with CDN fallback for
/// entries the install is missing.
pub struct LocalStorage {
    config: LocalConfig,
    build: BuildInfoRow,
    index: IdxFile,
    data_dir: PathBuf,
    cache_root: CacheRoot,
    build_cache: BuildCache,
    session: Session,
    remote: OnceCell<RemoteCore>,
    remote_config: RemoteConfig,
}

impl LocalStorage {
    /// Mount a build from the install directory.
    ///
    /// The encoding table and root manifest are read from local data when
    /// the install carries them; a partial install pulls them through the
    /// per-build cache and, as a last resort, the CDN.
    pub async fn open(config: LocalConfig) -> Result<Self> {
        let rows = Self::builds(&config.install_dir).await?;
        let build = select_build(rows, config.product.as_deref())?;
        info!(
            "Selected installed {} build {} ({})",
            build.product, build.version, build.build_key
        );

        let cache_root = CacheRoot::new(&config.cache_dir);
        let build_cache = cache_root.open_build(&build.build_key).await?;
        let data_dir = config.install_dir.join("Data").join("data");
        let index = load_indexes(&data_dir).await?;

        let remote_config = derived_remote_config(&config, &build);
        let remote = OnceCell::new();

        let build_text = match read_local_config(&config.install_dir, &build.build_key).await {
            Some(text) => text,
            None => {
                debug!("Build config {} not in the local install", build.build_key);
                let core = init_remote(&remote, &remote_config, &build_cache).await?;
                core.fetch_config_text(&build.build_key).await?
            }
        };
        let build_config = BuildConfig::parse(&build_text);

        let bootstrap = Bootstrap {
            index: &index,
            data_dir: &data_dir,
            build_cache: &build_cache,
            remote: &remote,
            remote_config: &remote_config,
        };

        let (_, encoding_ekey) = build_config.encoding()?;
        let raw = bootstrap.system_file(ENCODING_FILE, &encoding_ekey).await?;
        let encoding_bytes = decode_blob(raw, &encoding_ekey, &config.keys, false)?;
        let encoding = EncodingTable::parse(&encoding_bytes)?;

        let root_ckey = build_config.root()?;
        let root_ekey = encoding
            .lookup(&root_ckey)
            .map(|entry| entry.key)
            .ok_or(Error::UnknownContentKey(root_ckey))?;
        let raw = bootstrap.system_file(ROOT_FILE, &root_ekey).await?;
        let root_bytes = decode_blob(raw, &root_ekey, &config.keys, false)?;
        let root = RootFile::parse(&root_bytes)?;

        info!(
            "Mounted {} {} with {} files",
            build.product,
            build.version,
            root.file_count()
        );
        let session = Session::new(root, encoding, config.locale, Arc::clone(&config.keys));

        let reclaimed = cache_root.expire_stale(config.cache_ttl).await?;
        if reclaimed > 0 {
            info!("Expired stale cached builds, reclaimed {reclaimed} bytes");
        }

        Ok(Self {
            config,
            build,
            index,
            data_dir,
            cache_root,
            build_cache,
            session,
            remote,
            remote_config,
        })
    }

    /// List the build rows recorded in an install's `.build.info`.
    pub async fn builds(install_dir: &Path) -> Result<Vec<BuildInfoRow>> {
        let text = fs::read_to_string(install_dir.join(".build.info")).await?;
        Ok(manifest::parse_build_info(&text)?)
    }

    /// Fetch and decode a file by its file data id.
    pub async fn get_file(&self, file_id: u32) -> Result<Vec<u8>> {
        self.get_file_with(file_id, FetchOptions::default()).await
    }

    /// [`Self::get_file`] with explicit options.
    pub async fn get_file_with(&self, file_id: u32, options: FetchOptions) -> Result<Vec<u8>> {
        let key = self.session.encoding_key_for(file_id)?;
        let tiers: &[Tier] = if options.force_fallback {
            &FALLBACK_CHAIN
        } else {
            &FULL_CHAIN
        };
        let raw = self.fetch_encoded(&key, tiers).await?;
        self.session.decode(raw, &key, options.partial_decrypt)
    }

    /// Open a lazy block stream over a file.
    pub async fn get_file_stream(&self, file_id: u32) -> Result<FileStream> {
        self.get_file_stream_with(file_id, FetchOptions::default())
            .await
    }

    /// [`Self::get_file_stream`] with explicit options. Local entries are
    /// streamed from their data archive; everything else goes through the
    /// network pipeline.
    pub async fn get_file_stream_with(
        &self,
        file_id: u32,
        options: FetchOptions,
    ) -> Result<FileStream> {
        let key = self.session.encoding_key_for(file_id)?;
        if !options.force_fallback {
            match self.open_local_stream(&key, options.partial_decrypt).await {
                Ok(stream) => return Ok(stream),
                Err(e) => debug!("Cannot stream {key} from local data: {e}"),
            }
        }
        let core = self.remote_core().await?;
        core.open_stream(&key, self.session.keys(), options.partial_decrypt)
            .await
    }

    /// Fetch a file by name through a caller-provided name index.
    pub async fn get_file_by_name(&self, name: &str, index: &dyn NameIndex) -> Result<Vec<u8>> {
        let file_id = index
            .file_id(name)
            .ok_or_else(|| Error::NameNotIndexed(name.to_string()))?;
        self.get_file(file_id).await
    }

    /// Read the encoded container for a key out of the local data archives.
    pub async fn read_local(&self, key: &EncodingKey) -> Result<Vec<u8>> {
        read_local_entry(&self.index, &self.data_dir, key).await
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

    /// Product code of the mounted build.
    pub fn product(&self) -> &str {
        &self.build.product
    }

    /// Display version of the mounted build, e.g. `11.1.7.61491`.
    pub fn build_name(&self) -> &str {
        &self.build.version
    }

    /// Build config hash of the mounted build.
    pub fn build_key(&self) -> &str {
        &self.build.build_key
    }

    /// Key-chain session of the mounted build.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Settings this store was opened with.
    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    /// Walk the tiers in order until one yields the encoded container.
    async fn fetch_encoded(&self, key: &EncodingKey, tiers: &[Tier]) -> Result<Vec<u8>> {
        let cache_path = self.cache_root.data_dir().join(key.to_string());
        for &tier in tiers {
            let Some(raw) = self.probe_tier(tier, key, &cache_path).await? else {
                continue;
            };
            if tier == Tier::Network {
                self.cache_root.write_tracked(&cache_path, &raw).await?;
            }
            return Ok(raw);
        }
        // The network tier either returns bytes or errors, so ending the
        // chain without a hit means it was never tried.
        Err(Error::NotInLocalData(*key))
    }

    async fn probe_tier(
        &self,
        tier: Tier,
        key: &EncodingKey,
        cache_path: &Path,
    ) -> Result<Option<Vec<u8>>> {
        match tier {
            Tier::LocalData => match self.read_local(key).await {
                Ok(raw) => Ok(Some(raw)),
                Err(e) => {
                    debug!("Local data miss for {key}: {e}");
                    Ok(None)
                }
            },
            Tier::DiskCache => Ok(self.cache_root.read_verified(cache_path).await),
            Tier::Network => {
                let core = self.remote_core().await?;
                core.fetch_from_network(key).await.map(Some)
            }
        }
    }

    /// Stream a local entry without reading it whole: probe the container
    /// header, then hand the open handle to the block stream.
    async fn open_local_stream(
        &self,
        key: &EncodingKey,
        partial_decrypt: bool,
    ) -> Result<FileStream> {
        let (path, base, total) = locate_entry(&self.index, &self.data_dir, key)?;
        let mut file = File::open(&path).await?;

        file.seek(SeekFrom::Start(base)).await?;
        let mut probe = vec![0u8; total.min(HEADER_PROBE) as usize];
        file.read_exact(&mut probe).await?;
        check_container(&probe, key)?;

        if let Some(declared) = declared_header_size(&probe) {
            let declared = u64::from(declared);
            if declared > probe.len() as u64 && declared <= total {
                file.seek(SeekFrom::Start(base)).await?;
                probe = vec![0u8; declared as usize];
                file.read_exact(&mut probe).await?;
            }
        }

        let header = BlteHeader::parse(&probe, total)?;
        let source: Box<dyn BlockSource> = Box::new(FileBlockSource {
            file: Mutex::new(file),
            base,
        });
        Ok(BlteStream::new(
            header,
            source,
            Arc::clone(self.session.keys()),
            partial_decrypt,
        ))
    }

    async fn remote_core(&self) -> Result<&RemoteCore> {
        init_remote(&self.remote, &self.remote_config, &self.build_cache).await
    }
}

/// Pick the build row to mount: the named product, or the active row when
/// no product was requested.
fn select_build(rows: Vec<BuildInfoRow>, product: Option<&str>) -> Result<BuildInfoRow> {
    match product {
        Some(code) => rows
            .into_iter()
            .find(|row| row.product == code)
            .ok_or_else(|| Error::BuildNotFound(code.to_string())),
        None => rows
            .into_iter()
            .find(|row| row.active)
            .ok_or_else(|| Error::BuildNotFound("any active product".to_string())),
    }
}

/// Merge every `.idx` table under the data directory, in name order.
/// Buckets are re-written generationally, so within one key the earliest
/// file carries the live record; unreadable files are skipped.
async fn load_indexes(data_dir: &Path) -> Result<IdxFile> {
    let mut names = Vec::new();
    let mut dir = fs::read_dir(data_dir).await?;
    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.ends_with(".idx") {
            names.push(name.to_string());
        }
    }
    names.sort_unstable();

    let mut index = IdxFile::default();
    let mut loaded = 0usize;
    for name in &names {
        let data = fs::read(data_dir.join(name)).await?;
        match IdxFile::parse(&data) {
            Ok(parsed) => {
                index.merge(parsed);
                loaded += 1;
            }
            Err(e) => warn!("Skipping unreadable index {name}: {e}"),
        }
    }
    info!("Loaded {loaded} index files covering {} entries", index.len());
    Ok(index)
}

/// Build config stored inside the install, when present.
async fn read_local_config(install_dir: &Path, hash: &str) -> Option<String> {
    if hash.len() < 4 {
        return None;
    }
    let path = install_dir
        .join("Data")
        .join("config")
        .join(&hash[..2])
        .join(&hash[2..4])
        .join(hash);
    fs::read_to_string(path).await.ok()
}

/// Settings for the fallback pipeline: same region and cache, the installed
/// build's product, and its advertised hosts appended to the extras.
fn derived_remote_config(config: &LocalConfig, build: &BuildInfoRow) -> RemoteConfig {
    let mut remote = RemoteConfig::new(&config.region, &build.product, &config.cache_dir);
    remote.locale = config.locale;
    remote.keys = Arc::clone(&config.keys);
    remote.patch_base = config.patch_base.clone();
    remote.fallback_hosts = config.fallback_hosts.clone();
    remote
        .fallback_hosts
        .extend(build.cdn_hosts.iter().cloned());
    remote.cache_ttl = config.cache_ttl;
    remote
}

/// Run the network preload exactly once, sharing the local store's build
/// cache so both sides track one ledger.
async fn init_remote<'a>(
    cell: &'a OnceCell<RemoteCore>,
    config: &RemoteConfig,
    cache: &BuildCache,
) -> Result<&'a RemoteCore> {
    cell.get_or_try_init(|| async {
        info!("Falling back to the CDN for missing local data");
        RemoteCore::preload(config, Some(cache.clone())).await
    })
    .await
}

/// System file lookup during open, before a [`LocalStorage`] exists: local
/// data, then the per-build cache, then the network.
struct Bootstrap<'a> {
    index: &'a IdxFile,
    data_dir: &'a Path,
    build_cache: &'a BuildCache,
    remote: &'a OnceCell<RemoteCore>,
    remote_config: &'a RemoteConfig,
}

impl Bootstrap<'_> {
    async fn system_file(&self, name: &str, key: &EncodingKey) -> Result<Vec<u8>> {
        match read_local_entry(self.index, self.data_dir, key).await {
            Ok(raw) => return Ok(raw),
            Err(e) => debug!("System file {name} not in local data: {e}"),
        }
        if let Some(raw) = self.build_cache.get_file(name).await {
            return Ok(raw);
        }
        let core = init_remote(self.remote, self.remote_config, self.build_cache).await?;
        let raw = core.fetch_from_network(key).await?;
        self.build_cache.store_file(name, &raw).await?;
        Ok(raw)
    }
}

/// Locate a key's container in the data archives: archive path, byte offset
/// past the entry header, and container length.
fn locate_entry(index: &IdxFile, data_dir: &Path, key: &EncodingKey) -> Result<(PathBuf, u64, u64)> {
    let entry = index.lookup(key).ok_or(Error::NotInLocalData(*key))?;
    let length = entry
        .size
        .checked_sub(LOCAL_ENTRY_HEADER)
        .ok_or(Error::NotContainer(*key))?;
    let path = data_dir.join(format!("data.{:03}", entry.data_file));
    let base = u64::from(entry.offset) + u64::from(LOCAL_ENTRY_HEADER);
    Ok((path, base, u64::from(length)))
}

async fn read_local_entry(index: &IdxFile, data_dir: &Path, key: &EncodingKey) -> Result<Vec<u8>> {
    let (path, base, length) = locate_entry(index, data_dir, key)?;
    let mut file = File::open(&path).await?;
    file.seek(SeekFrom::Start(base)).await?;
    let mut raw = vec![0u8; length as usize];
    file.read_exact(&mut raw).await?;
    check_container(&raw, key)?;
    Ok(raw)
}

/// Entries can be preallocated before their payload lands; a zeroed span
/// means the container was never fully written.
fn check_container(raw: &[u8], key: &EncodingKey) -> Result<()> {
    if raw.iter().all(|&b| b == 0) {
        return Err(Error::EmptyLocalData(*key));
    }
    if !is_container(raw) {
        return Err(Error::NotContainer(*key));
    }
    Ok(())
}

/// Reads blocks of a local container through a shared file handle.
struct FileBlockSource {
    file: Mutex<File>,
    base: u64,
}

#[async_trait]
impl BlockSource for FileBlockSource {
    async fn read_range(&self, offset: u64, len: u32) -> warchest_blte::Result<Vec<u8>> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(self.base + offset)).await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}
