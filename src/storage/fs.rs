//! File-system abstraction.
//!
//! Every file the engine touches goes through [`FileSystem`] and [`File`] so
//! the same code runs against local disk or a tiered/object-backed store.
//! Methods return [`std::io::Result`]; callers attach context when converting
//! into [`RewindError`](crate::RewindError).

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only; the file must exist.
    Read,
    /// Read/write, created if missing, never truncated.
    ReadWrite,
}

/// Metadata returned by [`FileSystem::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Length in bytes.
    pub len: u64,
    /// Whether the path is a directory.
    pub is_dir: bool,
}

/// One entry returned by [`FileSystem::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name (last path component).
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// An open file supporting positional I/O.
pub trait File: Send + Sync + fmt::Debug {
    /// Reads up to `buf.len()` bytes at `offset`, returning the count read.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Writes all of `buf` at `offset`, extending the file if needed.
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()>;

    /// Sets the file length.
    fn truncate(&self, size: u64) -> io::Result<()>;

    /// Returns the current file length.
    fn len(&self) -> io::Result<u64>;

    /// Flushes written data to stable storage.
    fn sync(&self) -> io::Result<()>;

    /// Returns true if the file is empty.
    fn is_empty(&self) -> io::Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Fills `buf` from `offset`, failing with `UnexpectedEof` on a short read.
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset)? {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "failed to fill whole buffer",
                    ))
                }
                n => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
            }
        }
        Ok(())
    }
}

/// A POSIX-like file system.
pub trait FileSystem: Send + Sync + fmt::Debug {
    /// Opens a file.
    fn open_file(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn File>>;

    /// Creates a file, truncating it if it exists.
    fn create(&self, path: &Path) -> io::Result<Box<dyn File>>;

    /// Reads a whole file.
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replaces a whole file atomically.
    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Lists a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Returns metadata for a path.
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Creates a directory and all of its parents.
    fn mkdir_all(&self, path: &Path) -> io::Result<()>;

    /// Removes a file.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Removes a directory tree.
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    /// Renames a file or directory. The destination must not be a non-empty
    /// directory.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Returns true if the path exists.
    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }
}

/// Opens `path`, creating its parent directory first if the open fails
/// because the directory is missing.
///
/// # Errors
///
/// Returns the error of the final open attempt.
pub fn open_file_ensuring_dir(
    fs: &dyn FileSystem,
    path: &Path,
    mode: OpenMode,
) -> io::Result<Box<dyn File>> {
    match fs.open_file(path, mode) {
        Err(e) if e.kind() == io::ErrorKind::NotFound && mode == OpenMode::ReadWrite => {
            if let Some(parent) = path.parent() {
                fs.mkdir_all(parent)?;
            }
            fs.open_file(path, mode)
        }
        result => result,
    }
}

/// Lists a directory, treating a missing directory as empty.
///
/// # Errors
///
/// Returns any error other than `NotFound`.
pub fn read_dir_or_empty(fs: &dyn FileSystem, path: &Path) -> io::Result<Vec<DirEntry>> {
    match fs.read_dir(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        result => result,
    }
}

/// [`FileSystem`] backed by the local disk.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    /// Creates a local file system.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// A file on local disk.
///
/// The handle is shared behind a mutex so positional reads and writes can
/// be issued through `&self`.
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
    file: Mutex<fs::File>,
}

impl LocalFile {
    /// Returns the path the file was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl File for LocalFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)
    }

    fn truncate(&self, size: u64) -> io::Result<()> {
        self.file.lock().set_len(size)
    }

    fn len(&self) -> io::Result<u64> {
        self.file.lock().metadata().map(|m| m.len())
    }

    fn sync(&self) -> io::Result<()> {
        self.file.lock().sync_all()
    }
}

impl FileSystem for LocalFileSystem {
    fn open_file(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn File>> {
        let file = match mode {
            OpenMode::Read => OpenOptions::new().read(true).open(path)?,
            OpenMode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?,
        };

        Ok(Box::new(LocalFile {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        }))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn File>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Box::new(LocalFile {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        }))
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }

        fs::rename(&tmp, path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type()?.is_dir();
            entries.push(DirEntry { name, is_dir });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let metadata = fs::metadata(path)?;
        Ok(FileStat {
            len: metadata.len(),
            is_dir: metadata.is_dir(),
        })
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let path = temp.path().join("a").join("b").join("file");

        let file = open_file_ensuring_dir(&fs, &path, OpenMode::ReadWrite).unwrap();
        file.write_at(b"hello", 0).unwrap();
        assert_eq!(file.len().unwrap(), 5);
        assert!(fs.exists(&path));
    }

    #[test]
    fn test_read_mode_does_not_create() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let path = temp.path().join("missing").join("file");

        let err = open_file_ensuring_dir(&fs, &path, OpenMode::Read).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!fs.exists(temp.path().join("missing").as_path()));
    }

    #[test]
    fn test_positional_io() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let file = fs.create(&temp.path().join("f")).unwrap();

        file.write_at(b"abcdef", 0).unwrap();
        file.write_at(b"XY", 2).unwrap();

        let mut buf = [0u8; 6];
        file.read_exact_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"abXYef");

        let mut tail = [0u8; 4];
        let err = file.read_exact_at(&mut tail, 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        file.truncate(3).unwrap();
        assert_eq!(file.len().unwrap(), 3);
    }

    #[test]
    fn test_write_file_replaces_content() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let path = temp.path().join("meta");

        fs.write_file(&path, b"one").unwrap();
        fs.write_file(&path, b"two!").unwrap();
        assert_eq!(fs.read_file(&path).unwrap(), b"two!");
    }

    #[test]
    fn test_rename_directory() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        let from = temp.path().join("staging");
        let to = temp.path().join("final");
        fs.mkdir_all(&from).unwrap();
        fs.write_file(&from.join("part"), b"data").unwrap();

        fs.rename(&from, &to).unwrap();
        assert!(!fs.exists(&from));
        assert_eq!(fs.read_file(&to.join("part")).unwrap(), b"data");
    }

    #[test]
    fn test_read_dir_sorted_and_missing() {
        let temp = TempDir::new().unwrap();
        let fs = LocalFileSystem::new();
        fs.write_file(&temp.path().join("b"), b"").unwrap();
        fs.write_file(&temp.path().join("a"), b"").unwrap();

        let names: Vec<_> = fs
            .read_dir(temp.path())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        let missing = read_dir_or_empty(&fs, &temp.path().join("nope")).unwrap();
        assert!(missing.is_empty());
    }
}
