use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::Result;

/// Blob storage over one tier. Paths are `/`-separated and relative to the
/// store root.
pub trait BlobStore: Send + Sync {
    fn put(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Stream an existing local file into the store.
    fn put_file(&self, path: &str, source: &Path) -> Result<()>;

    fn get(&self, path: &str) -> Result<Vec<u8>>;

    fn open(&self, path: &str) -> Result<Box<dyn Read>>;

    /// Open `path` for writing, truncating any existing content.
    fn create(&self, path: &str) -> Result<Box<dyn Write>>;

    /// Returns false when nothing was there to delete.
    fn delete(&self, path: &str) -> Result<bool>;

    /// All files below `prefix`, recursively, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    fn exists(&self, path: &str) -> bool;

    fn size(&self, path: &str) -> Result<u64>;

    /// Filesystem location of `path`, for handing to external commands.
    fn local_path(&self, path: &str) -> PathBuf;

    fn make_dir(&self, path: &str) -> Result<()>;
}

/// Blob store rooted at a directory on the local filesystem.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let rel = Path::new(path.trim_start_matches('/'));
        if rel.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_))) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path '{}' escapes the store root", path),
            ));
        }
        Ok(self.root.join(rel))
    }

    fn ensure_parent(target: &Path) -> io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, path: &str, contents: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        Self::ensure_parent(&target)?;
        fs::write(target, contents)?;
        Ok(())
    }

    fn put_file(&self, path: &str, source: &Path) -> Result<()> {
        let target = self.resolve(path)?;
        Self::ensure_parent(&target)?;
        fs::copy(source, target)?;
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(path)?)?)
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read>> {
        Ok(Box::new(File::open(self.resolve(path)?)?))
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write>> {
        let target = self.resolve(path)?;
        Self::ensure_parent(&target)?;
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(target)?;
        Ok(Box::new(file))
    }

    fn delete(&self, path: &str) -> Result<bool> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.resolve(prefix)?;
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in WalkDir::new(&base) {
            let entry = match entry { Ok(e) => e, Err(_) => continue };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.root) { Ok(r) => r, Err(_) => continue };
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect();
            out.push(parts.join("/"));
        }
        out.sort();
        Ok(out)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn size(&self, path: &str) -> Result<u64> {
        Ok(fs::metadata(self.resolve(path)?)?.len())
    }

    fn local_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn make_dir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(path)?)?;
        Ok(())
    }
}

/// Join a tier directory and a file name without doubling separators.
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Strip `dir/` from a listed path, returning None for paths outside `dir`.
pub fn file_name_under<'a>(dir: &str, path: &'a str) -> Option<&'a str> {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        return Some(path);
    }
    path.strip_prefix(dir)?.strip_prefix('/')
}
