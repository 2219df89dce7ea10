//! Crash-consistent JSON snapshots of the record set.
//!
//! A snapshot is written to a temporary file in the target directory and
//! renamed into place, so readers see either the previous snapshot or the
//! new one in full.

use crate::types::{InvoiceAnalysisRecord, RecordRef};
use reimburse_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotOut<'a> {
    version: u32,
    dimension: usize,
    records: Vec<&'a InvoiceAnalysisRecord>,
}

/// A snapshot read back from disk.
#[derive(Debug, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub dimension: usize,
    pub records: Vec<InvoiceAnalysisRecord>,
}

/// Write `records` to `path` atomically.
pub fn write_snapshot(path: &Path, dimension: usize, records: &[RecordRef]) -> AppResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| AppError::Config(format!("Snapshot path has no parent: {:?}", path)))?;
    fs::create_dir_all(dir)?;

    let out = SnapshotOut {
        version: SNAPSHOT_VERSION,
        dimension,
        records: records.iter().map(|r| r.as_ref()).collect(),
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        serde_json::to_writer(&mut writer, &out)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| AppError::Io(e.error))?;

    tracing::debug!(path = ?path, records = records.len(), "Wrote ledger snapshot");
    Ok(())
}

/// Read a snapshot, or `None` if the file does not exist.
pub fn read_snapshot(path: &Path) -> AppResult<Option<Snapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)?;
    let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| {
        AppError::Serialization(format!("Failed to parse snapshot {:?}: {}", path, e))
    })?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(AppError::Config(format!(
            "Unsupported snapshot version {} in {:?} (expected {})",
            snapshot.version, path, SNAPSHOT_VERSION
        )));
    }

    Ok(Some(snapshot))
}
