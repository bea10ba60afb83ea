//! List the builds recorded in an installation's `.build.info`.
//!
//! Run with: cargo run --example list_builds -- /path/to/install

use std::env;
use std::error::Error;
use std::path::PathBuf;

use warchest_storage::LocalStorage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("warchest_storage=info")
        .init();

    let install_dir = PathBuf::from(
        env::args()
            .nth(1)
            .ok_or("usage: list_builds <install dir>")?,
    );

    let builds = LocalStorage::builds(&install_dir).await?;
    println!("{} build(s) in {}\n", builds.len(), install_dir.display());

    for build in builds {
        let marker = if build.active { "*" } else { " " };
        println!(
            "{marker} {:<20} {:<16} {}",
            build.product, build.version, build.build_key
        );
    }

    Ok(())
}
