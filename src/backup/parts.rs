//! Splits a database image into size-bounded part files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backup::manifest::BackupPart;
use crate::error::{Result, RewindError};
use crate::storage::{File, FileSystem};

/// Returns the file name of part `index` of the backup keyed `backup_key`.
#[must_use]
pub fn part_name(backup_key: &str, index: u32) -> String {
    format!("{backup_key}-{index:05}")
}

struct OpenPart {
    file: Box<dyn File>,
    part: BackupPart,
    hasher: crc32fast::Hasher,
}

/// Streams bytes into consecutive part files of at most `max_part_size`.
pub struct PartWriter {
    fs: Arc<dyn FileSystem>,
    directory: PathBuf,
    backup_key: String,
    max_part_size: u64,
    current: Option<OpenPart>,
    parts: Vec<BackupPart>,
}

impl PartWriter {
    /// Creates a writer placing parts in `directory`, which must exist.
    #[must_use]
    pub fn new(
        fs: Arc<dyn FileSystem>,
        directory: &Path,
        backup_key: impl Into<String>,
        max_part_size: u64,
    ) -> Self {
        Self {
            fs,
            directory: directory.to_path_buf(),
            backup_key: backup_key.into(),
            max_part_size,
            current: None,
            parts: Vec::new(),
        }
    }

    /// Appends `data`, rolling over to a new part whenever the current one
    /// is full.
    ///
    /// # Errors
    ///
    /// Returns an error if a part cannot be created or written.
    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let max_part_size = self.max_part_size;
            let mut open = match self.current.take() {
                Some(open) if open.part.size < max_part_size => open,
                Some(full) => {
                    self.finish_part(full)?;
                    self.open_part()?
                }
                None => self.open_part()?,
            };

            let room = (max_part_size - open.part.size) as usize;
            let chunk = room.min(data.len());
            open.file
                .write_at(&data[..chunk], open.part.size)
                .map_err(|e| RewindError::io(format!("writing backup part {}", open.part.name), e))?;
            open.hasher.update(&data[..chunk]);
            open.part.size += chunk as u64;

            self.current = Some(open);
            data = &data[chunk..];
        }

        Ok(())
    }

    /// Syncs and closes the last part and returns every part written.
    ///
    /// # Errors
    ///
    /// Returns an error if the last part cannot be synced.
    pub fn finish(mut self) -> Result<Vec<BackupPart>> {
        if let Some(open) = self.current.take() {
            self.finish_part(open)?;
        }
        Ok(self.parts)
    }

    fn open_part(&self) -> Result<OpenPart> {
        let index = self.parts.len() as u32;
        let name = part_name(&self.backup_key, index);
        let path = self.directory.join(&name);

        let file = self
            .fs
            .create(&path)
            .map_err(|e| RewindError::io(format!("creating {}", path.display()), e))?;

        Ok(OpenPart {
            file,
            part: BackupPart {
                index,
                name,
                size: 0,
                crc32: 0,
            },
            hasher: crc32fast::Hasher::new(),
        })
    }

    fn finish_part(&mut self, open: OpenPart) -> Result<()> {
        open.file
            .sync()
            .map_err(|e| RewindError::io(format!("syncing backup part {}", open.part.name), e))?;

        let mut part = open.part;
        part.crc32 = open.hasher.finalize();
        self.parts.push(part);
        Ok(())
    }
}

/// Reads a part back, checking its size and CRC32.
///
/// # Errors
///
/// Returns [`RewindError::InvalidMetadata`] if the content does not match
/// the part description.
pub fn read_part(fs: &dyn FileSystem, directory: &Path, part: &BackupPart) -> Result<Vec<u8>> {
    let path = directory.join(&part.name);
    let data = fs
        .read_file(&path)
        .map_err(|e| RewindError::io(format!("reading {}", path.display()), e))?;

    if data.len() as u64 != part.size || crc32fast::hash(&data) != part.crc32 {
        return Err(RewindError::InvalidMetadata(format!(
            "Backup part {} does not match its manifest entry",
            part.name
        )));
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalFileSystem;
    use tempfile::TempDir;

    #[test]
    fn test_splits_at_max_part_size() {
        let temp = TempDir::new().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let mut writer = PartWriter::new(Arc::clone(&fs), temp.path(), "abc", 1000);

        writer.write(&[1u8; 700]).unwrap();
        writer.write(&[2u8; 700]).unwrap();
        writer.write(&[3u8; 600]).unwrap();
        let parts = writer.finish().unwrap();

        let sizes: Vec<u64> = parts.iter().map(|p| p.size).collect();
        assert_eq!(sizes, vec![1000, 1000]);
        assert_eq!(parts[1].name, "abc-00001");

        let first = read_part(fs.as_ref(), temp.path(), &parts[0]).unwrap();
        assert_eq!(&first[..700], &[1u8; 700][..]);
        assert_eq!(&first[700..], &[2u8; 300][..]);
    }

    #[test]
    fn test_empty_image_has_no_parts() {
        let temp = TempDir::new().unwrap();
        let writer = PartWriter::new(Arc::new(LocalFileSystem::new()), temp.path(), "abc", 10);
        assert!(writer.finish().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_part_detected() {
        let temp = TempDir::new().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let mut writer = PartWriter::new(Arc::clone(&fs), temp.path(), "abc", 64);
        writer.write(&[7u8; 32]).unwrap();
        let parts = writer.finish().unwrap();

        std::fs::write(temp.path().join(&parts[0].name), [8u8; 32]).unwrap();
        assert!(read_part(fs.as_ref(), temp.path(), &parts[0]).is_err());
    }
}
