//! Byte-addressable file sources the resolver reads from.
//!
//! Paths are slash-separated and relative to the source root. The empty path
//! names the root itself.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub is_dir: bool,
    pub len: u64,
    pub modified: Option<SystemTime>,
    /// Entity tag supplied by the source, used verbatim when present.
    pub etag: Option<String>,
}

#[async_trait]
pub trait FileSystem: Send + Sync + 'static {
    async fn stat(&self, path: &str) -> io::Result<FileInfo>;

    async fn read(&self, path: &str) -> io::Result<Bytes>;
}

/// Files under a directory on disk.
#[derive(Debug, Clone)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    /// Root at `root` without checking that it exists.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root at `root`, failing unless it is a readable directory.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let meta = tokio::fs::metadata(&root).await?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        tokio::fs::read_dir(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let mut full = self.root.clone();
        for part in path.split('/') {
            match Path::new(part).components().next() {
                None | Some(Component::CurDir) => {}
                Some(Component::Normal(name)) if !part.contains('\\') => full.push(name),
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        format!("path escapes the served directory: {path}"),
                    ))
                }
            }
        }
        Ok(full)
    }
}

#[async_trait]
impl FileSystem for DirFs {
    async fn stat(&self, path: &str) -> io::Result<FileInfo> {
        let meta = tokio::fs::metadata(self.resolve(path)?).await?;
        Ok(FileInfo {
            is_dir: meta.is_dir(),
            len: meta.len(),
            modified: meta.modified().ok(),
            etag: None,
        })
    }

    async fn read(&self, path: &str) -> io::Result<Bytes> {
        tokio::fs::read(self.resolve(path)?).await.map(Bytes::from)
    }
}

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Bytes,
    modified: SystemTime,
    etag: Option<String>,
}

/// In-memory file tree. Directories exist implicitly as path prefixes.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    files: BTreeMap<String, MemoryFile>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, data: impl Into<Bytes>) -> Self {
        self.insert(path, data, SystemTime::UNIX_EPOCH);
        self
    }

    pub fn insert(&mut self, path: &str, data: impl Into<Bytes>, modified: SystemTime) {
        self.files.insert(
            path.trim_matches('/').to_string(),
            MemoryFile {
                data: data.into(),
                modified,
                etag: None,
            },
        );
    }

    /// Attach a fixed entity tag to an existing file.
    pub fn set_etag(&mut self, path: &str, etag: impl Into<String>) {
        if let Some(file) = self.files.get_mut(path.trim_matches('/')) {
            file.etag = Some(etag.into());
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        if path.is_empty() {
            return true;
        }
        let prefix = format!("{path}/");
        self.files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file: {path}"))
}

#[async_trait]
impl FileSystem for MemoryFs {
    async fn stat(&self, path: &str) -> io::Result<FileInfo> {
        let path = path.trim_matches('/');
        if let Some(file) = self.files.get(path) {
            return Ok(FileInfo {
                is_dir: false,
                len: file.data.len() as u64,
                modified: Some(file.modified),
                etag: file.etag.clone(),
            });
        }
        if self.is_dir(path) {
            return Ok(FileInfo {
                is_dir: true,
                len: 0,
                modified: None,
                etag: None,
            });
        }
        Err(not_found(path))
    }

    async fn read(&self, path: &str) -> io::Result<Bytes> {
        let path = path.trim_matches('/');
        self.files
            .get(path)
            .map(|file| file.data.clone())
            .ok_or_else(|| not_found(path))
    }
}
