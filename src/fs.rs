//! File access for the authentication cookie and onion service private keys.
//!
//! The controller only touches the file system through [`FileSystem`], so the protocol logic can
//! run against [`MemoryFileSystem`] in tests.

use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

/// Mode for files only the owner may read or write
pub const OWNER_ONLY_MODE: u32 = 0o600;

pub trait FileSystem: Send + Sync {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Create or truncate `path` and write `contents` to it. When `owner_only` is set, the file
    /// ends up readable and writable by its owner alone.
    fn write_file(&self, path: &Path, contents: &[u8], owner_only: bool) -> io::Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write_file(&self, path: &Path, contents: &[u8], owner_only: bool) -> io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            if owner_only {
                options.mode(OWNER_ONLY_MODE);
            }
        }
        let mut file = options.open(path)?;

        // The mode above only applies to newly created files
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if owner_only {
                file.set_permissions(std::fs::Permissions::from_mode(OWNER_ONLY_MODE))?;
            }
        }
        #[cfg(not(unix))]
        let _ = owner_only;

        file.write_all(contents)?;
        file.sync_all()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryFile {
    pub contents: Vec<u8>,
    pub owner_only: bool,
}

/// An in-memory [`FileSystem`]
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: Mutex<HashMap<PathBuf, MemoryFile>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file<P: Into<PathBuf>>(self, path: P, contents: &[u8]) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert<P: Into<PathBuf>>(&self, path: P, contents: &[u8]) {
        self.files().insert(
            path.into(),
            MemoryFile {
                contents: contents.to_vec(),
                owner_only: false,
            },
        );
    }

    pub fn get<P: AsRef<Path>>(&self, path: P) -> Option<MemoryFile> {
        self.files().get(path.as_ref()).cloned()
    }

    fn files(&self) -> MutexGuard<'_, HashMap<PathBuf, MemoryFile>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files()
            .get(path)
            .map(|file| file.contents.clone())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} not found", path.display()),
                )
            })
    }

    fn write_file(&self, path: &Path, contents: &[u8], owner_only: bool) -> io::Result<()> {
        self.files().insert(
            path.to_path_buf(),
            MemoryFile {
                contents: contents.to_vec(),
                owner_only,
            },
        );
        Ok(())
    }
}
