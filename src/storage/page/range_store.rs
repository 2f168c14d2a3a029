//! Page-range file set for one database branch.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{Result, RewindError};
use crate::key::DatabaseKey;
use crate::storage::fs::{open_file_ensuring_dir, read_dir_or_empty, File, FileSystem, OpenMode};
use crate::storage::page::{DatabaseMetadata, PageLocation};

/// Observer of live page writes.
///
/// Hooks run for [`PageRangeStore::write_page`] only. Restore writes go
/// through [`PageRangeStore::raw_write_at`], which never invokes them.
pub trait PageWriteHook: Send + Sync {
    /// Called with the new page content before it is written.
    ///
    /// # Errors
    ///
    /// An error aborts the write.
    fn on_page_write(&self, key: &DatabaseKey, page_number: u32, data: &[u8]) -> Result<()>;
}

/// Manages the page-range files of one database branch.
///
/// The store handles:
/// - Reading and writing pages at their range offset
/// - Raw byte writes for restore, bypassing write hooks
/// - Truncation and the persisted page count
pub struct PageRangeStore {
    key: DatabaseKey,
    fs: Arc<dyn FileSystem>,
    /// Directory holding the range files.
    directory: PathBuf,
    metadata_path: PathBuf,
    page_size: usize,
    range_max_pages: u32,
    /// Open range files keyed by range number.
    ranges: Mutex<BTreeMap<u64, Arc<dyn File>>>,
    metadata: Mutex<DatabaseMetadata>,
    hooks: RwLock<Vec<Arc<dyn PageWriteHook>>>,
}

impl PageRangeStore {
    /// Opens the page-range file set of `key`, loading its metadata if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata is unreadable or was written with a
    /// different page size.
    pub fn open(fs: Arc<dyn FileSystem>, config: &Config, key: DatabaseKey) -> Result<Self> {
        let directory = key.pages_directory(&config.data_dir);
        let metadata_path = key.metadata_path(&config.data_dir);

        let metadata = match fs.read_file(&metadata_path) {
            Ok(bytes) => DatabaseMetadata::deserialize(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => DatabaseMetadata::new(config.page_size),
            Err(e) => return Err(RewindError::io("reading page metadata", e)),
        };

        if metadata.page_size as usize != config.page_size {
            return Err(RewindError::InvalidMetadata(format!(
                "{key} was written with page size {}, configured page size is {}",
                metadata.page_size, config.page_size
            )));
        }

        Ok(Self {
            key,
            fs,
            directory,
            metadata_path,
            page_size: config.page_size,
            range_max_pages: config.range_max_pages,
            ranges: Mutex::new(BTreeMap::new()),
            metadata: Mutex::new(metadata),
            hooks: RwLock::new(Vec::new()),
        })
    }

    /// Returns the key this store belongs to.
    #[must_use]
    pub fn key(&self) -> &DatabaseKey {
        &self.key
    }

    /// Returns the page size.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the number of pages per range file.
    #[must_use]
    pub fn range_max_pages(&self) -> u32 {
        self.range_max_pages
    }

    /// Returns the byte size of a full range file.
    #[must_use]
    pub fn range_size(&self) -> u64 {
        u64::from(self.range_max_pages) * self.page_size as u64
    }

    /// Registers a hook invoked on every live page write.
    pub fn add_write_hook(&self, hook: Arc<dyn PageWriteHook>) {
        self.hooks.write().push(hook);
    }

    /// Returns the persisted metadata.
    #[must_use]
    pub fn metadata(&self) -> DatabaseMetadata {
        *self.metadata.lock()
    }

    /// Returns the logical page count.
    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.metadata.lock().page_count
    }

    /// Updates and persists the logical page count.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata file cannot be written.
    pub fn set_page_count(&self, page_count: u32) -> Result<()> {
        let mut metadata = self.metadata.lock();
        let mut updated = *metadata;
        updated.set_page_count(page_count);

        if let Some(parent) = self.metadata_path.parent() {
            self.fs
                .mkdir_all(parent)
                .map_err(|e| RewindError::io("creating metadata directory", e))?;
        }
        self.fs
            .write_file(&self.metadata_path, &updated.serialize()?)
            .map_err(|e| RewindError::io("writing page metadata", e))?;

        *metadata = updated;
        Ok(())
    }

    /// Returns the path of a range file.
    #[must_use]
    pub fn range_path(&self, range_number: u64) -> PathBuf {
        self.directory.join(format!("{range_number:010}"))
    }

    fn range_file(&self, range_number: u64) -> Result<Arc<dyn File>> {
        let mut ranges = self.ranges.lock();
        if let Some(file) = ranges.get(&range_number) {
            return Ok(Arc::clone(file));
        }

        let path = self.range_path(range_number);
        let file: Arc<dyn File> = open_file_ensuring_dir(self.fs.as_ref(), &path, OpenMode::ReadWrite)
            .map_err(|e| RewindError::io(format!("opening range file {}", path.display()), e))?
            .into();
        ranges.insert(range_number, Arc::clone(&file));

        Ok(file)
    }

    /// Returns the range file if it exists, without creating it.
    fn existing_range_file(&self, range_number: u64) -> Result<Option<Arc<dyn File>>> {
        if self.ranges.lock().contains_key(&range_number) {
            return self.range_file(range_number).map(Some);
        }

        if self.fs.exists(&self.range_path(range_number)) {
            self.range_file(range_number).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Reads a page.
    ///
    /// Pages beyond the end of their range file read as zeroes.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn read_page(&self, page_number: u32) -> Result<Vec<u8>> {
        let location = PageLocation::of(page_number, self.page_size, self.range_max_pages)?;
        let mut data = vec![0u8; self.page_size];

        if let Some(file) = self.existing_range_file(location.range_number)? {
            read_into(file.as_ref(), &mut data, location.offset)
                .map_err(|e| RewindError::io(format!("reading page {page_number}"), e))?;
        }

        Ok(data)
    }

    /// Writes a page as part of normal operation, running every write hook first.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not exactly one page, a hook fails, or
    /// the write fails.
    pub fn write_page(&self, page_number: u32, data: &[u8]) -> Result<()> {
        self.check_page_len(data)?;

        for hook in self.hooks.read().iter() {
            hook.on_page_write(&self.key, page_number, data)?;
        }

        self.raw_write_page(page_number, data)
    }

    /// Writes a page without invoking write hooks.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not exactly one page or the write fails.
    pub fn raw_write_page(&self, page_number: u32, data: &[u8]) -> Result<()> {
        self.check_page_len(data)?;
        let location = PageLocation::of(page_number, self.page_size, self.range_max_pages)?;

        self.range_file(location.range_number)?
            .write_at(data, location.offset)
            .map_err(|e| RewindError::io(format!("writing page {page_number}"), e))
    }

    /// Writes raw bytes at a byte offset of the whole database image,
    /// splitting the write across range files. Write hooks are not invoked.
    ///
    /// # Errors
    ///
    /// Returns an error if any range write fails.
    pub fn raw_write_at(&self, data: &[u8], offset: u64) -> Result<()> {
        let range_size = self.range_size();
        let mut written = 0usize;

        while written < data.len() {
            let position = offset + written as u64;
            let range_number = position / range_size + 1;
            let range_offset = position % range_size;
            let chunk = ((range_size - range_offset) as usize).min(data.len() - written);

            self.range_file(range_number)?
                .write_at(&data[written..written + chunk], range_offset)
                .map_err(|e| RewindError::io(format!("writing range {range_number}"), e))?;

            written += chunk;
        }

        Ok(())
    }

    /// Reads the full content of a range file. A missing range reads as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn read_range(&self, range_number: u64) -> Result<Vec<u8>> {
        let Some(file) = self.existing_range_file(range_number)? else {
            return Ok(Vec::new());
        };

        let len = file
            .len()
            .map_err(|e| RewindError::io(format!("sizing range {range_number}"), e))?
            .min(self.range_size());
        let mut data = vec![0u8; len as usize];
        file.read_exact_at(&mut data, 0)
            .map_err(|e| RewindError::io(format!("reading range {range_number}"), e))?;

        Ok(data)
    }

    /// Lists the range files present on disk, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn range_numbers(&self) -> Result<Vec<u64>> {
        let entries = read_dir_or_empty(self.fs.as_ref(), &self.directory)
            .map_err(|e| RewindError::io("listing range files", e))?;

        let mut numbers: Vec<u64> = entries
            .into_iter()
            .filter(|e| !e.is_dir)
            .filter_map(|e| e.name.parse().ok())
            .filter(|n| *n > 0)
            .collect();
        numbers.sort_unstable();

        Ok(numbers)
    }

    /// Truncates the database image to `size` bytes.
    ///
    /// Range files that start at or beyond `size` are removed; the range
    /// containing `size` is shortened.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be truncated or removed.
    pub fn truncate(&self, size: u64) -> Result<()> {
        let range_size = self.range_size();

        for range_number in self.range_numbers()? {
            let start = (range_number - 1) * range_size;

            if start >= size {
                self.ranges.lock().remove(&range_number);
                self.fs
                    .remove(&self.range_path(range_number))
                    .map_err(|e| RewindError::io(format!("removing range {range_number}"), e))?;
                continue;
            }

            let file = self.range_file(range_number)?;
            let len = file
                .len()
                .map_err(|e| RewindError::io(format!("sizing range {range_number}"), e))?;
            if start + len > size {
                file.truncate(size - start)
                    .map_err(|e| RewindError::io(format!("truncating range {range_number}"), e))?;
            }
        }

        Ok(())
    }

    /// Returns the total size in bytes of all range files.
    ///
    /// # Errors
    ///
    /// Returns an error if a range cannot be sized.
    pub fn size(&self) -> Result<u64> {
        let mut total = 0;
        for range_number in self.range_numbers()? {
            total += self
                .fs
                .stat(&self.range_path(range_number))
                .map_err(|e| RewindError::io(format!("sizing range {range_number}"), e))?
                .len;
        }
        Ok(total)
    }

    /// Syncs every open range file.
    ///
    /// # Errors
    ///
    /// Returns an error if a sync fails.
    pub fn sync(&self) -> Result<()> {
        let files: Vec<_> = self.ranges.lock().values().cloned().collect();
        for file in files {
            file.sync().map_err(|e| RewindError::io("syncing range file", e))?;
        }
        Ok(())
    }

    fn check_page_len(&self, data: &[u8]) -> Result<()> {
        if data.len() == self.page_size {
            Ok(())
        } else {
            Err(RewindError::ValidationError(format!(
                "Page data must be {} bytes, got {}",
                self.page_size,
                data.len()
            )))
        }
    }
}

impl std::fmt::Debug for PageRangeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRangeStore")
            .field("key", &self.key)
            .field("directory", &self.directory)
            .field("page_size", &self.page_size)
            .field("range_max_pages", &self.range_max_pages)
            .finish_non_exhaustive()
    }
}

/// Reads as much of `buf` as the file holds at `offset`, leaving the rest untouched.
fn read_into(file: &dyn File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64)? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(())
}
