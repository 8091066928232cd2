//! Registry snapshot persistence
//!
//! The whole registry is stored as one JSON document and replaced wholesale
//! on every save, so readers never observe a partially written file.

use crate::error::Result;
use crate::site::SiteSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the snapshot inside the data directory
pub const SNAPSHOT_FILE: &str = "data.json";

/// On-disk registry contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "static_dirs", default)]
    pub sites: BTreeMap<String, SiteSpec>,
    #[serde(rename = "wild_card", default)]
    pub wildcard: String,
}

/// Reads and writes the snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SNAPSHOT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. A missing file is not an error.
    pub fn load(&self) -> Result<Option<Snapshot>> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No registry snapshot found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&data)?;
        Ok(Some(snapshot))
    }

    /// Replace the snapshot on disk.
    ///
    /// Writes to a sibling temp file and renames it over the old one.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let data = serde_json::to_vec_pretty(snapshot)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));

        let mut file = tempfile::Builder::new()
            .prefix(".data-")
            .suffix(".json")
            .tempfile_in(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(&data)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), sites = snapshot.sites.len(), "Saved registry snapshot");
        Ok(())
    }
}
