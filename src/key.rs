//! Database identity and on-disk layout.
//!
//! Every file this crate owns lives under a directory scoped to one
//! (database, branch) pair:
//!
//! ```text
//! <data_dir>/<database_id>/<branch_id>/pages/<range>       page-range files
//! <data_dir>/<database_id>/<branch_id>/metadata            page count
//! <data_dir>/<database_id>/<branch_id>/logs/rollback/<ts>  hour-bucketed rollback logs
//! <data_dir>/<database_id>/<branch_id>/logs/snapshots/<ts> day-bucketed snapshot logs
//! <data_dir>/backups/<database_id>/<branch_id>/<key>/      backup parts + manifest
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::{Result, RewindError};
use crate::timestamp::Timestamp;

/// Identifies one branch of one logical database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseKey {
    /// Logical database identifier.
    pub database_id: String,
    /// Branch identifier within the database.
    pub branch_id: String,
}

impl DatabaseKey {
    /// Creates a key after checking both ids are usable as path components.
    ///
    /// # Errors
    ///
    /// Returns a validation error if an id is empty or contains a path separator.
    pub fn new(database_id: impl Into<String>, branch_id: impl Into<String>) -> Result<Self> {
        let key = Self {
            database_id: database_id.into(),
            branch_id: branch_id.into(),
        };

        for id in [&key.database_id, &key.branch_id] {
            if id.is_empty() || id == "." || id == ".." || id.contains(&['/', '\\'][..]) {
                return Err(RewindError::ValidationError(format!(
                    "Invalid database or branch id: '{id}'"
                )));
            }
        }

        Ok(key)
    }

    /// Returns the hex SHA-1 of the key, used to key lock tables.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.database_id.as_bytes());
        hasher.update(b":");
        hasher.update(self.branch_id.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns the content-derived key addressing a backup at `timestamp`.
    #[must_use]
    pub fn backup_key(&self, timestamp: Timestamp) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.database_id.as_bytes());
        hasher.update(self.branch_id.as_bytes());
        hasher.update(timestamp.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    /// Root directory for this branch.
    #[must_use]
    pub fn directory(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.database_id).join(&self.branch_id)
    }

    /// Directory holding the page-range files.
    #[must_use]
    pub fn pages_directory(&self, data_dir: &Path) -> PathBuf {
        self.directory(data_dir).join("pages")
    }

    /// Path of the page metadata file.
    #[must_use]
    pub fn metadata_path(&self, data_dir: &Path) -> PathBuf {
        self.directory(data_dir).join("metadata")
    }

    /// Directory holding the hour-bucketed rollback logs.
    #[must_use]
    pub fn rollback_log_directory(&self, data_dir: &Path) -> PathBuf {
        self.directory(data_dir).join("logs").join("rollback")
    }

    /// Directory holding the day-bucketed snapshot logs.
    #[must_use]
    pub fn snapshot_directory(&self, data_dir: &Path) -> PathBuf {
        self.directory(data_dir).join("logs").join("snapshots")
    }

    /// Directory holding every backup of this branch.
    #[must_use]
    pub fn backups_directory(&self, data_dir: &Path) -> PathBuf {
        data_dir
            .join("backups")
            .join(&self.database_id)
            .join(&self.branch_id)
    }
}

impl fmt::Display for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database_id, self.branch_id)
    }
}

/// Parses a bucket file name back into its timestamp.
pub(crate) fn parse_bucket_name(name: &str) -> Option<Timestamp> {
    name.parse::<Timestamp>().ok()
}

/// Returns the file name of a bucket file.
pub(crate) fn bucket_name(timestamp: Timestamp) -> String {
    timestamp.to_string()
}
