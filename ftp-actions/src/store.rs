// Destination store: where downloads land and where uploads are read from

use crate::errors::StorageError;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};

/// One entry returned by `list_status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub path: PathBuf,
    pub name: String,
    pub is_directory: bool,
    pub len: u64,
}

/// Filesystem capability the actions need from their destination
pub trait DestinationStore: Send + Sync {
    fn exists(&self, path: &Path) -> Result<bool, StorageError>;

    /// Absolute, normalised form of `path`
    fn make_qualified(&self, path: &Path) -> Result<PathBuf, StorageError>;

    fn mkdirs(&self, path: &Path) -> Result<(), StorageError>;

    /// Open `path` for writing, truncating any existing file
    fn create(&self, path: &Path) -> Result<Box<dyn Write>, StorageError>;

    fn open(&self, path: &Path) -> Result<Box<dyn Read>, StorageError>;

    /// A file lists as itself; a directory lists its children
    fn list_status(
        &self,
        path: &Path,
        predicate: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<StoreEntry>, StorageError>;
}

/// DestinationStore over the local filesystem
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: Option<PathBuf>,
}

impl Default for LocalFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFileStore {
    /// Relative paths resolve against the process working directory
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Relative paths resolve against `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn base(&self) -> Result<PathBuf, StorageError> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => std::env::current_dir().map_err(|e| StorageError::io(".", e)),
        }
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Lexically normalise a path: drop "." and fold ".." into its parent
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl DestinationStore for LocalFileStore {
    fn exists(&self, path: &Path) -> Result<bool, StorageError> {
        let qualified = self.make_qualified(path)?;
        Ok(qualified.exists())
    }

    fn make_qualified(&self, path: &Path) -> Result<PathBuf, StorageError> {
        if path.is_absolute() {
            Ok(normalize(path))
        } else {
            Ok(normalize(&self.base()?.join(path)))
        }
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    fn mkdirs(&self, path: &Path) -> Result<(), StorageError> {
        let qualified = self.make_qualified(path)?;
        debug!(path = %qualified.display(), "Creating directory");
        fs::create_dir_all(&qualified).map_err(|e| StorageError::io(display(&qualified), e))
    }

    fn create(&self, path: &Path) -> Result<Box<dyn Write>, StorageError> {
        let qualified = self.make_qualified(path)?;
        if let Some(parent) = qualified.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(display(parent), e))?;
        }
        let file = File::create(&qualified).map_err(|e| StorageError::io(display(&qualified), e))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read>, StorageError> {
        let qualified = self.make_qualified(path)?;
        let file = File::open(&qualified).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(display(&qualified))
            } else {
                StorageError::io(display(&qualified), e)
            }
        })?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn list_status(
        &self,
        path: &Path,
        predicate: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<StoreEntry>, StorageError> {
        let qualified = self.make_qualified(path)?;
        let metadata = fs::metadata(&qualified).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(display(&qualified))
            } else {
                StorageError::io(display(&qualified), e)
            }
        })?;

        if metadata.is_file() {
            let name = qualified
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !predicate(&name) {
                return Ok(Vec::new());
            }
            return Ok(vec![StoreEntry {
                path: qualified,
                name,
                is_directory: false,
                len: metadata.len(),
            }]);
        }

        let mut entries = Vec::new();
        let dir = fs::read_dir(&qualified).map_err(|e| StorageError::io(display(&qualified), e))?;
        for item in dir {
            let item = item.map_err(|e| StorageError::io(display(&qualified), e))?;
            let name = item.file_name().to_string_lossy().into_owned();
            if !predicate(&name) {
                continue;
            }
            let metadata = item
                .metadata()
                .map_err(|e| StorageError::io(display(&item.path()), e))?;
            entries.push(StoreEntry {
                path: item.path(),
                name,
                is_directory: metadata.is_dir(),
                len: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}
