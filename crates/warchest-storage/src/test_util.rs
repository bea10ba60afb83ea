//! Shared test fixtures: containers, tables, manifest documents, and the
//! mock CDN plumbing the store tests mount them on.

use warchest_tact::{ContentKey, EncodingKey};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub(crate) fn content_key(seed: u8) -> ContentKey {
    ContentKey::from_bytes([seed; 16])
}

pub(crate) fn encoding_key(seed: u8) -> EncodingKey {
    EncodingKey::from_bytes([seed; 16])
}

/// Chunked container holding each input as one raw block. Returns the blob
/// and the encoding key it hashes to (the MD5 of its header).
pub(crate) fn chunked_container(blocks: &[&[u8]]) -> (Vec<u8>, EncodingKey) {
    let header_size = 12 + 24 * blocks.len() as u32;

    let mut out = Vec::new();
    out.extend_from_slice(b"BLTE");
    out.extend_from_slice(&header_size.to_be_bytes());
    out.push(0x0F);
    out.extend_from_slice(&(blocks.len() as u32).to_be_bytes()[1..]);

    let mut bodies = Vec::new();
    for block in blocks {
        let mut typed = Vec::with_capacity(block.len() + 1);
        typed.push(b'N');
        typed.extend_from_slice(block);
        out.extend_from_slice(&(typed.len() as u32).to_be_bytes());
        out.extend_from_slice(&(block.len() as u32).to_be_bytes());
        out.extend_from_slice(&md5::compute(&typed).0);
        bodies.push(typed);
    }
    for body in &bodies {
        out.extend_from_slice(body);
    }

    let key = EncodingKey::from_bytes(md5::compute(&out[..header_size as usize]).0);
    (out, key)
}

pub(crate) fn container(data: &[u8]) -> (Vec<u8>, EncodingKey) {
    chunked_container(&[data])
}

/// Single-page encoding table mapping each content key to one encoding key.
pub(crate) fn encoding_blob(entries: &[(ContentKey, EncodingKey, u64)]) -> Vec<u8> {
    const PAGE: usize = 1024;

    let mut out = Vec::new();
    out.extend_from_slice(b"EN");
    out.push(1); // version
    out.push(16); // ckey width
    out.push(16); // ekey width
    out.extend_from_slice(&1u16.to_be_bytes()); // ckey page size in KiB
    out.extend_from_slice(&1u16.to_be_bytes()); // ekey page size
    out.extend_from_slice(&1u32.to_be_bytes()); // page count
    out.extend_from_slice(&0u32.to_be_bytes()); // ekey page count
    out.push(0); // unknown
    out.extend_from_slice(&4u32.to_be_bytes()); // espec block size
    out.extend_from_slice(&[0u8; 4]); // espec block
    out.extend_from_slice(&[0u8; 32]); // first key + page digest

    let start = out.len();
    for &(ckey, ekey, size) in entries {
        out.push(1);
        out.push((size >> 32) as u8);
        out.extend_from_slice(&((size & 0xFFFF_FFFF) as u32).to_be_bytes());
        out.extend_from_slice(ckey.as_bytes());
        out.extend_from_slice(ekey.as_bytes());
    }
    out.resize(start + PAGE, 0);
    out
}

/// Tagged v1 root manifest with every id registered for `en_us`.
pub(crate) fn root_blob(entries: &[(u32, ContentKey)]) -> Vec<u8> {
    let mut ids: Vec<(u32, ContentKey)> = entries.to_vec();
    ids.sort_unstable_by_key(|&(id, _)| id);
    let total = ids.len() as u32;

    let mut out = 0x4D46_5354u32.to_le_bytes().to_vec(); // "TSFM"
    out.extend_from_slice(&0x18u32.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes()); // version
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(&total.to_le_bytes()); // all ids carry name hashes
    out.extend_from_slice(&0u32.to_le_bytes());

    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // content flags
    out.extend_from_slice(&0x2u32.to_le_bytes()); // en_us

    let mut prev = 0u32;
    for (i, &(id, _)) in ids.iter().enumerate() {
        let delta = if i == 0 { id as i32 } else { (id - prev - 1) as i32 };
        out.extend_from_slice(&delta.to_le_bytes());
        prev = id;
    }
    for &(_, ckey) in &ids {
        out.extend_from_slice(ckey.as_bytes());
    }
    for _ in &ids {
        out.extend_from_slice(&[0u8; 8]); // name hash
    }
    out
}

/// Archive index over `(key, size, offset)` records.
pub(crate) fn archive_index_blob(entries: &[(EncodingKey, u32, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(key, size, offset) in entries {
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(&offset.to_be_bytes());
    }
    out.extend_from_slice(&(entries.len() as i32).to_le_bytes());
    out.extend_from_slice(&[0u8; 8]);
    out
}

/// Local `.idx` table over `(key, data_file, offset, size)` records.
pub(crate) fn idx_blob(entries: &[(EncodingKey, u16, u32, u32)]) -> Vec<u8> {
    let mut out = 16u32.to_le_bytes().to_vec(); // header hash size
    out.extend_from_slice(&[0u8; 4]); // header hash
    out.resize((8 + 16 + 0x0F) & !0x0F, 0);

    out.extend_from_slice(&((entries.len() * 18) as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 4]); // block hash
    for &(key, data_file, offset, size) in entries {
        out.extend_from_slice(&key.truncated());
        out.push((data_file >> 2) as u8);
        let low = (u32::from(data_file & 0b11) << 30) | offset;
        out.extend_from_slice(&low.to_be_bytes());
        out.extend_from_slice(&size.to_le_bytes());
    }
    out
}

pub(crate) fn versions_doc(region: &str, build_key: &str, cdn_key: &str, name: &str) -> String {
    format!(
        "Region!STRING:0|BuildConfig!HEX:16|CDNConfig!HEX:16|KeyRing!HEX:16|BuildId!DEC:4|VersionsName!String:0|ProductConfig!HEX:16\n\
         ## seqn = 2242609\n\
         {region}|{build_key}|{cdn_key}|3ca57fe7319a297346440e4d2a03a0cd|61491|{name}|53dd0e1f024b122eaf92b46c4fdcb5e6\n"
    )
}

pub(crate) fn cdns_doc(name: &str, path: &str, hosts: &str) -> String {
    format!(
        "Name!STRING:0|Path!STRING:0|Hosts!STRING:0|Servers!STRING:0|ConfigPath!STRING:0\n\
         {name}|{path}|{hosts}||tpr/configs/data\n"
    )
}

pub(crate) fn build_config_doc(
    root: &ContentKey,
    encoding_ckey: &ContentKey,
    encoding_ekey: &EncodingKey,
) -> String {
    format!(
        "# Build Configuration\n\
         \n\
         root = {root}\n\
         encoding = {encoding_ckey} {encoding_ekey}\n\
         build-name = WOW-61491patch11.1.7_retail\n"
    )
}

pub(crate) fn cdn_config_doc(archives: &[EncodingKey]) -> String {
    let list = archives
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    let sizes = archives
        .iter()
        .map(|_| "1024")
        .collect::<Vec<_>>()
        .join(" ");
    format!("archives = {list}\narchives-index-size = {sizes}\n")
}

/// `.build.info` document over `(product, active, build_key, version)` rows.
pub(crate) fn build_info_doc(rows: &[(&str, bool, &str, &str)]) -> String {
    let mut out = String::from(
        "Branch!STRING:0|Active!DEC:1|Build Key!HEX:16|CDN Key!HEX:16|Install Key!HEX:16|IM Size!DEC:4|CDN Path!STRING:0|CDN Hosts!STRING:0|Tags!STRING:0|Armadillo!STRING:0|Last Activated!STRING:0|Version!STRING:0|KeyRing!HEX:16|Product!STRING:0\n",
    );
    for &(product, active, build_key, version) in rows {
        let active = if active { "1" } else { "0" };
        out.push_str(&format!(
            "us|{active}|{build_key}|2e2300c965e9df95ad32889e8a1f558b||0|tpr/wow|||||{version}||{product}\n"
        ));
    }
    out
}

/// A complete build around one file: root naming it, encoding covering it
/// and the root, and the config documents tying the chain together.
pub(crate) struct BuildFixture {
    pub(crate) file_ckey: ContentKey,
    pub(crate) file_ekey: EncodingKey,
    pub(crate) file_blob: Vec<u8>,
    pub(crate) root_ekey: EncodingKey,
    pub(crate) root_container: Vec<u8>,
    pub(crate) encoding_ekey: EncodingKey,
    pub(crate) encoding_container: Vec<u8>,
    pub(crate) build_key: String,
    pub(crate) cdn_key: String,
    pub(crate) build_text: String,
    pub(crate) cdn_text: String,
}

impl BuildFixture {
    pub(crate) fn new(file_id: u32, content: &[u8], archives: &[EncodingKey]) -> Self {
        Self::with_blocks(file_id, &[content], archives)
    }

    pub(crate) fn with_blocks(file_id: u32, blocks: &[&[u8]], archives: &[EncodingKey]) -> Self {
        let file_ckey = content_key(0xAB);
        let (file_blob, file_ekey) = chunked_container(blocks);

        let root_ckey = content_key(0x0A);
        let root_bytes = root_blob(&[(file_id, file_ckey)]);
        let (root_container, root_ekey) = container(&root_bytes);

        let encoding_bytes = encoding_blob(&[
            (file_ckey, file_ekey, file_blob.len() as u64),
            (root_ckey, root_ekey, root_container.len() as u64),
        ]);
        let (encoding_container, encoding_ekey) = container(&encoding_bytes);
        let encoding_ckey = content_key(0x0E);

        Self {
            file_ckey,
            file_ekey,
            file_blob,
            root_ekey,
            root_container,
            encoding_ekey,
            encoding_container,
            build_key: content_key(0x1B).to_string(),
            cdn_key: content_key(0x1C).to_string(),
            build_text: build_config_doc(&root_ckey, &encoding_ckey, &encoding_ekey),
            cdn_text: cdn_config_doc(archives),
        }
    }
}

pub(crate) fn cdn_object_path(namespace: &str, hash: &str, suffix: &str) -> String {
    format!(
        "/tpr/wow/{namespace}/{}/{}/{hash}{suffix}",
        &hash[..2],
        &hash[2..4]
    )
}

pub(crate) async fn mount_text(server: &MockServer, at: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

pub(crate) async fn mount_blob(
    server: &MockServer,
    namespace: &str,
    hash: &str,
    suffix: &str,
    body: Vec<u8>,
) {
    Mock::given(method("GET"))
        .and(path(cdn_object_path(namespace, hash, suffix)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Patch manifests for product `wow` in region `us`, the latency probe
/// endpoint, and both config blobs, all served by the mock itself.
pub(crate) async fn mount_front(server: &MockServer, fixture: &BuildFixture, version: &str) {
    mount_text(
        server,
        "/wow/versions",
        versions_doc("us", &fixture.build_key, &fixture.cdn_key, version),
    )
    .await;
    mount_text(server, "/wow/cdns", cdns_doc("us", "tpr/wow", &server.uri())).await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    mount_blob(
        server,
        "config",
        &fixture.build_key,
        "",
        fixture.build_text.clone().into_bytes(),
    )
    .await;
    mount_blob(
        server,
        "config",
        &fixture.cdn_key,
        "",
        fixture.cdn_text.clone().into_bytes(),
    )
    .await;
}

/// Encoding and root served as loose data objects.
pub(crate) async fn mount_system_files(server: &MockServer, fixture: &BuildFixture) {
    mount_blob(
        server,
        "data",
        &fixture.encoding_ekey.to_string(),
        "",
        fixture.encoding_container.clone(),
    )
    .await;
    mount_blob(
        server,
        "data",
        &fixture.root_ekey.to_string(),
        "",
        fixture.root_container.clone(),
    )
    .await;
}
