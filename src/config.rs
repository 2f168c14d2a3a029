//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, RewindError};

/// Default page size in bytes (4KB).
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of pages held by one page-range file.
pub const DEFAULT_RANGE_MAX_PAGES: u32 = 4096;

/// Default upper bound for one backup part file (1 GiB).
pub const BACKUP_MAX_PART_SIZE: u64 = 1024 * 1024 * 1024;

/// Idle window after which cached snapshots and backup locks are dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Idle window after which open rollback-log handles are closed.
pub const DEFAULT_ROLLBACK_LOG_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Configuration shared by every component of an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding page ranges, logs and backups.
    pub data_dir: PathBuf,
    /// Page size in bytes (default: 4096).
    pub page_size: usize,
    /// Pages per page-range file (default: 4096).
    pub range_max_pages: u32,
    /// Maximum size of one backup part in bytes (default: 1 GiB).
    pub backup_max_part_size: u64,
    /// Cached snapshots idle longer than this are evicted (default: 5 minutes).
    pub snapshot_idle_timeout: Duration,
    /// Unheld backup locks idle longer than this are dropped (default: 5 minutes).
    pub backup_lock_idle_timeout: Duration,
    /// Rollback-log handles idle longer than this are closed (default: 1 hour).
    pub rollback_log_idle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            page_size: DEFAULT_PAGE_SIZE,
            range_max_pages: DEFAULT_RANGE_MAX_PAGES,
            backup_max_part_size: BACKUP_MAX_PART_SIZE,
            snapshot_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            backup_lock_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            rollback_log_idle_timeout: DEFAULT_ROLLBACK_LOG_IDLE_TIMEOUT,
        }
    }
}

impl Config {
    /// Creates a default configuration rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the number of pages per range file.
    #[must_use]
    pub fn with_range_max_pages(mut self, range_max_pages: u32) -> Self {
        self.range_max_pages = range_max_pages;
        self
    }

    /// Sets the maximum backup part size.
    #[must_use]
    pub fn with_backup_max_part_size(mut self, size: u64) -> Self {
        self.backup_max_part_size = size;
        self
    }

    /// Sets the snapshot idle-eviction window.
    #[must_use]
    pub fn with_snapshot_idle_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_idle_timeout = timeout;
        self
    }

    /// Builds a configuration from defaults overlaid with `REWIND_*` variables.
    ///
    /// Recognised variables: `REWIND_DATA_DIR`, `REWIND_PAGE_SIZE`,
    /// `REWIND_RANGE_MAX_PAGES` and `REWIND_BACKUP_MAX_PART_SIZE`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("REWIND_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(page_size) = env_number("REWIND_PAGE_SIZE")? {
            config.page_size = page_size;
        }
        if let Some(pages) = env_number("REWIND_RANGE_MAX_PAGES")? {
            config.range_max_pages = pages;
        }
        if let Some(size) = env_number("REWIND_BACKUP_MAX_PART_SIZE")? {
            config.backup_max_part_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any size is zero or the page size is not a power of
    /// two of at least 512 bytes.
    pub fn validate(&self) -> Result<()> {
        if self.page_size < 512 || !self.page_size.is_power_of_two() {
            return Err(RewindError::ConfigError(format!(
                "page_size must be a power of two >= 512, got {}",
                self.page_size
            )));
        }

        if self.range_max_pages == 0 {
            return Err(RewindError::ConfigError(
                "range_max_pages must be greater than 0".into(),
            ));
        }

        if self.backup_max_part_size < self.page_size as u64 {
            return Err(RewindError::ConfigError(format!(
                "backup_max_part_size ({}) must hold at least one page ({})",
                self.backup_max_part_size, self.page_size
            )));
        }

        Ok(())
    }

    /// Returns the size in bytes of one full page-range file.
    #[must_use]
    pub fn range_size(&self) -> u64 {
        u64::from(self.range_max_pages) * self.page_size as u64
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RewindError::ConfigError(format!("{name} is not a valid number: {value}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.range_size(), 4096 * 4096);
    }

    #[test]
    fn test_rejects_bad_page_size() {
        assert!(Config::default().with_page_size(1000).validate().is_err());
        assert!(Config::default().with_page_size(256).validate().is_err());
    }

    #[test]
    fn test_rejects_zero_range() {
        let config = Config::default().with_range_max_pages(0);
        assert!(matches!(config.validate(), Err(RewindError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_tiny_parts() {
        let config = Config::default().with_backup_max_part_size(100);
        assert!(config.validate().is_err());
    }
}
