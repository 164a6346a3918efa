//! Rollback manifest: JSONL record of committed renames
//!
//! One manifest per apply session under `<root>/.namegnome/rollbacks/`:
//! a header line with session metadata, then one line per operation.
//! Only successfully-renamed entries are rollback targets.

use namegnome_common::types::{ApplyMode, CollisionStrategy};
use namegnome_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const MANIFEST_SCHEMA_VERSION: &str = "1.0";

/// First line of every manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestHeader {
    #[serde(rename = "type")]
    pub record_type: String,
    pub schema_version: String,
    pub report_id: String,
    pub plan_id: String,
    pub root: PathBuf,
    pub mode: ApplyMode,
    pub collision_strategy: CollisionStrategy,
    pub generated_at: String,
}

/// One recorded operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub ts: String,
    pub op: String,
    pub src_before: PathBuf,
    pub dst_after: PathBuf,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inode: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Directory holding the manifests for a root.
pub fn rollback_dir(root: &Path) -> PathBuf {
    root.join(".namegnome").join("rollbacks")
}

/// Manifest path for a report id.
pub fn manifest_path(root: &Path, report_id: &str) -> PathBuf {
    rollback_dir(root).join(format!("{}.jsonl", report_id))
}

/// Appending JSONL writer; verifies the rollback directory is writable
/// before any rename happens.
pub struct RollbackWriter {
    path: PathBuf,
    file: File,
}

impl RollbackWriter {
    pub fn create(root: &Path, header: &ManifestHeader) -> Result<Self> {
        let dir = rollback_dir(root);
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::Filesystem(format!(
                "cannot create rollback directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        // Probe writability up front so failures surface before renames
        let probe = dir.join(format!(".probe_{}", header.report_id));
        std::fs::write(&probe, b"probe")
            .and_then(|_| std::fs::remove_file(&probe))
            .map_err(|e| {
                Error::Filesystem(format!(
                    "rollback directory {} is not writable: {}",
                    dir.display(),
                    e
                ))
            })?;

        let path = manifest_path(root, &header.report_id);
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Filesystem(format!("cannot create manifest: {}", e)))?;

        let line = serde_json::to_string(header)
            .map_err(|e| Error::Fatal(format!("manifest header serialisation: {}", e)))?;
        writeln!(file, "{}", line)?;
        file.sync_all()?;

        tracing::debug!("Rollback manifest created: {}", path.display());
        Ok(Self { path, file })
    }

    /// Append one entry and flush it to disk.
    pub fn append(&mut self, entry: &ManifestEntry) -> Result<()> {
        let line = serde_json::to_string(entry)
            .map_err(|e| Error::Fatal(format!("manifest entry serialisation: {}", e)))?;
        writeln!(self.file, "{}", line)?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a manifest back: header plus entries in write order.
pub fn read_manifest(root: &Path, report_id: &str) -> Result<(ManifestHeader, Vec<ManifestEntry>)> {
    let path = manifest_path(root, report_id);
    let file = File::open(&path)
        .map_err(|_| Error::Validation(format!("unknown rollback report {}", report_id)))?;
    let mut lines = BufReader::new(file).lines();

    let header_line = lines
        .next()
        .ok_or_else(|| Error::Fatal("empty rollback manifest".into()))?
        .map_err(Error::Io)?;
    let header: ManifestHeader = serde_json::from_str(&header_line)
        .map_err(|e| Error::Fatal(format!("corrupt manifest header: {}", e)))?;

    let mut entries = Vec::new();
    for line in lines {
        let line = line.map_err(Error::Io)?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: ManifestEntry = serde_json::from_str(&line)
            .map_err(|e| Error::Fatal(format!("corrupt manifest entry: {}", e)))?;
        entries.push(entry);
    }

    Ok((header, entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(report_id: &str, root: &Path) -> ManifestHeader {
        ManifestHeader {
            record_type: "header".into(),
            schema_version: MANIFEST_SCHEMA_VERSION.into(),
            report_id: report_id.into(),
            plan_id: "pln_test".into(),
            root: root.to_path_buf(),
            mode: ApplyMode::Transactional,
            collision_strategy: CollisionStrategy::Backup,
            generated_at: "2024-06-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RollbackWriter::create(dir.path(), &header("r1", dir.path())).unwrap();

        writer
            .append(&ManifestEntry {
                ts: "2024-06-01T00:00:01Z".into(),
                op: "rename".into(),
                src_before: PathBuf::from("/a"),
                dst_after: PathBuf::from("/b"),
                status: "applied".into(),
                inode: Some(42),
                mtime: Some(1_700_000_000),
                backup_path: None,
                reason: None,
            })
            .unwrap();

        let (read_header, entries) = read_manifest(dir.path(), "r1").unwrap();
        assert_eq!(read_header.report_id, "r1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, "applied");
        assert_eq!(entries[0].inode, Some(42));
    }

    #[test]
    fn missing_report_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_manifest(dir.path(), "nope").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn duplicate_report_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let h = header("dup", dir.path());
        let _first = RollbackWriter::create(dir.path(), &h).unwrap();
        assert!(RollbackWriter::create(dir.path(), &h).is_err());
    }
}
