//! Inspect a product's current build over the network.
//!
//! Resolves the patch service, mounts the build's root and encoding tables,
//! and reports where a few well-known files live on the CDN.
//!
//! Run with: cargo run --example inspect_build -- wow_classic_era

use std::env;
use std::error::Error;

use warchest_storage::{RemoteConfig, RemoteStorage};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("warchest_storage=info,warchest_cdn=info")
        .init();

    let product = env::args()
        .nth(1)
        .unwrap_or_else(|| "wow_classic_era".to_string());
    let cache_dir = warchest_cache::default_cache_dir()?;

    println!("Opening {product} (us)...\n");
    let storage = RemoteStorage::open(RemoteConfig::new("us", &product, cache_dir)).await?;

    let session = storage.session();
    println!("Build:        {}", storage.build_name());
    println!("Build config: {}", storage.build_key());
    println!("Root files:   {}", session.root().file_count());
    println!("Known ckeys:  {}", session.encoding().len());

    // A few ids that every client build carries.
    for file_id in [1_349_477u32, 841_426, 1_267_335] {
        if !storage.file_exists(file_id) {
            println!("\nfile {file_id}: no variant for the active locales");
            continue;
        }

        let ckey = session.content_key_for(file_id)?;
        let ekey = session.encoding_key_for_content(ckey)?;
        println!("\nfile {file_id}:");
        println!("  ckey {ckey}");
        println!("  ekey {ekey}");

        match storage.archive_location(&ekey) {
            Some(location) => println!(
                "  archived in {} at {:#x} ({} bytes)",
                location.archive, location.offset, location.size
            ),
            None => println!("  loose on the CDN"),
        }

        let bytes = storage.get_file(file_id).await?;
        println!("  fetched {} decoded bytes", bytes.len());
    }

    Ok(())
}
