//! Append-only persistence for a compute party's per-tenant state.
//!
//! Each (party, tenant) pair owns two single-column CSV files: the share log
//! (every raw share ever contributed to the tenant, the durable source of
//! truth for update rounds) and the masked table (the PSI-ready rows queriers
//! compare against). Both files only ever grow; the protocol never compacts
//! or truncates them.

use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};
use tracing::debug;

const SHARE_LOG_HEADER: &str = "SHARE";
const MASKED_TABLE_HEADER: &str = "MASKED";

/// File-backed share logs and masked tables for one compute party.
///
/// The `label` distinguishes the files of different parties sharing a
/// directory, mirroring how each party runs with its own config name.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
    label: String,
}

impl Store {
    /// Creates a store writing below `dir` with the party's `label` as the
    /// filename prefix. The directory must already exist.
    pub fn new(dir: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            label: label.into(),
        }
    }

    fn path(&self, kind: &str, tenant: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{kind}-{}.csv", self.label, tenant_slug(tenant)))
    }

    /// Appends raw share rows to the tenant's share log.
    pub fn append_share_log(&self, tenant: &str, rows: &[String]) -> io::Result<()> {
        self.append(&self.path("shares", tenant), SHARE_LOG_HEADER, rows)
    }

    /// Reads back the full share log for the tenant, in append order.
    pub fn read_share_log(&self, tenant: &str) -> io::Result<Vec<String>> {
        read_rows(&self.path("shares", tenant))
    }

    /// Appends masked rows to the tenant's table.
    pub fn append_masked_table(&self, tenant: &str, rows: &[String]) -> io::Result<()> {
        self.append(&self.path("table", tenant), MASKED_TABLE_HEADER, rows)
    }

    /// Reads back the full masked table for the tenant, in append order.
    pub fn read_masked_table(&self, tenant: &str) -> io::Result<Vec<String>> {
        read_rows(&self.path("table", tenant))
    }

    fn append(&self, path: &Path, header: &str, rows: &[String]) -> io::Result<()> {
        let fresh = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if fresh {
            writeln!(writer, "{header}")?;
        }
        for row in rows {
            writeln!(writer, "{row}")?;
        }
        writer.flush()?;
        debug!(rows = rows.len(), path = %path.display(), "appended rows");
        Ok(())
    }
}

fn read_rows(path: &Path) -> io::Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for line in reader.lines().skip(1) {
        let line = line?;
        if !line.is_empty() {
            rows.push(line);
        }
    }
    Ok(rows)
}

/// Maps a tenant identifier (typically a URI) to a filename-safe slug.
///
/// The readable prefix is lossy, so a short hash of the raw identifier is
/// appended to keep tenants that differ only in non-alphanumeric characters
/// in separate files.
fn tenant_slug(tenant: &str) -> String {
    let readable: String = tenant
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let digest = Sha256::digest(tenant.as_bytes());
    format!("{readable}-{}", hex::encode(&digest[..4]))
}
