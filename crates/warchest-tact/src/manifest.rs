//! Pipe-separated version manifests.
//!
//! The patch service and the local `.build.info` file both use the same
//! tabular format: a header row of `Name!TYPE:len` column declarations
//! followed by `|`-separated data rows. Type annotations are dropped here;
//! rows are addressed by normalized column name.

use tracing::debug;

use crate::{Error, Result};

/// Header cell to column name: keep what precedes `!`, drop whitespace
/// (so `Build Key!HEX:16` becomes `BuildKey`).
fn column_name(cell: &str) -> String {
    cell.split('!')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// A parsed pipe-separated table.
#[derive(Debug, Clone)]
pub struct PipeTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl PipeTable {
    /// Parse manifest text. Blank lines and `#` comments (including the
    /// `## seqn` trailer) are skipped; the first remaining line is the header.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().map(str::trim).filter(|line| {
            !line.is_empty() && !line.starts_with('#')
        });

        let header = lines
            .next()
            .ok_or_else(|| Error::InvalidManifest("document has no header row".to_string()))?;
        let columns: Vec<String> = header.split('|').map(column_name).collect();

        let mut rows = Vec::new();
        for line in lines {
            let cells: Vec<String> = line.split('|').map(|cell| cell.trim().to_string()).collect();
            if cells.len() != columns.len() {
                return Err(Error::InvalidManifest(format!(
                    "row has {} cells but the header declares {} columns",
                    cells.len(),
                    columns.len()
                )));
            }
            rows.push(cells);
        }

        debug!("Parsed manifest: {} columns, {} rows", columns.len(), rows.len());
        Ok(Self { columns, rows })
    }

    /// Normalized column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table held no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate rows with by-name field access.
    pub fn rows(&self) -> impl Iterator<Item = PipeRow<'_>> {
        self.rows.iter().map(|cells| PipeRow {
            columns: &self.columns,
            cells,
        })
    }
}

/// One data row of a [`PipeTable`].
#[derive(Debug, Clone, Copy)]
pub struct PipeRow<'a> {
    columns: &'a [String],
    cells: &'a [String],
}

impl<'a> PipeRow<'a> {
    /// Cell under the named column.
    pub fn field(&self, name: &str) -> Result<&'a str> {
        self.columns
            .iter()
            .position(|column| column == name)
            .map(|index| self.cells[index].as_str())
            .ok_or_else(|| Error::InvalidManifest(format!("missing column: {name}")))
    }

    fn u32_field(&self, name: &str) -> Result<u32> {
        let value = self.field(name)?;
        value
            .parse()
            .map_err(|_| Error::InvalidManifest(format!("{name} is not a number: {value}")))
    }
}

/// One row of a `versions` manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionsRow {
    pub region: String,
    pub build_config: String,
    pub cdn_config: String,
    pub build_id: u32,
    pub versions_name: String,
}

/// Parse a `versions` manifest into typed rows.
pub fn parse_versions(text: &str) -> Result<Vec<VersionsRow>> {
    let table = PipeTable::parse(text)?;
    table
        .rows()
        .map(|row| {
            Ok(VersionsRow {
                region: row.field("Region")?.to_string(),
                build_config: row.field("BuildConfig")?.to_string(),
                cdn_config: row.field("CDNConfig")?.to_string(),
                build_id: row.u32_field("BuildId")?,
                versions_name: row.field("VersionsName")?.to_string(),
            })
        })
        .collect()
}

/// One row of a `cdns` manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdnsRow {
    pub name: String,
    pub path: String,
    pub hosts: Vec<String>,
}

/// Parse a `cdns` manifest into typed rows. Hosts are space-separated
/// within their cell.
pub fn parse_cdns(text: &str) -> Result<Vec<CdnsRow>> {
    let table = PipeTable::parse(text)?;
    table
        .rows()
        .map(|row| {
            Ok(CdnsRow {
                name: row.field("Name")?.to_string(),
                path: row.field("Path")?.to_string(),
                hosts: row
                    .field("Hosts")?
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
            })
        })
        .collect()
}

/// One row of a local `.build.info` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfoRow {
    pub product: String,
    pub active: bool,
    pub build_key: String,
    pub cdn_key: String,
    pub cdn_hosts: Vec<String>,
    pub cdn_path: String,
    pub version: String,
}

/// Parse a `.build.info` file into typed rows.
pub fn parse_build_info(text: &str) -> Result<Vec<BuildInfoRow>> {
    let table = PipeTable::parse(text)?;
    table
        .rows()
        .map(|row| {
            Ok(BuildInfoRow {
                product: row.field("Product")?.to_string(),
                active: row.field("Active")? == "1",
                build_key: row.field("BuildKey")?.to_string(),
                cdn_key: row.field("CDNKey")?.to_string(),
                cdn_hosts: row
                    .field("CDNHosts")?
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                cdn_path: row.field("CDNPath")?.to_string(),
                version: row.field("Version")?.to_string(),
            })
        })
        .collect()
}
