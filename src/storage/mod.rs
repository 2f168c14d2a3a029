//! Storage collaborators of the recovery engine.
//!
//! This module provides:
//! - The file-system abstraction ([`fs`]) every log and page file is opened through
//! - The page-range file set of a database branch ([`page`])

pub mod fs;
pub mod page;

pub use fs::{
    open_file_ensuring_dir, DirEntry, File, FileStat, FileSystem, LocalFileSystem, OpenMode,
};
pub use page::{DatabaseMetadata, PageLocation, PageRangeStore, PageWriteHook};
