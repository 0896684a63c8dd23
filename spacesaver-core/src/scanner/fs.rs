//! An async filesystem abstraction so the scanner's walk, de-duplication,
//! and vanished-file logic can be exercised in tests without touching
//! disk. Ported from the teacher's `ferrex-core::scanner::fs` module;
//! `remove_file` is added here since the scanner's de-duplication pass
//! (§4.3 step 5) needs to delete the losing duplicate from disk.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Minimal, async-capable filesystem abstraction used by the scanner.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn path_exists(&self, path: &Path) -> bool;
    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>, String>;
    async fn metadata(&self, path: &Path) -> Result<FsMetadata, String>;
    async fn remove_file(&self, path: &Path) -> Result<(), String>;
    /// Atomically moves `from` to `to`, replacing the destination. Used by
    /// Recovery's salvage path and the worker's encode-replace step; both
    /// need the original file to be either fully the old version or fully
    /// the new one, never a partial write (§4.4 step 4).
    async fn rename(&self, from: &Path, to: &Path) -> Result<(), String>;
}

/// Lightweight metadata needed by the scanner's cheap-probe check (§4.3
/// step 2: `(path, size, mtime)`).
#[derive(Debug, Clone, Copy)]
pub struct FsMetadata {
    pub is_dir: bool,
    pub is_file: bool,
    pub len: u64,
    pub modified: Option<std::time::SystemTime>,
}

/// Async directory iterator (mirrors `tokio::fs::ReadDir`).
#[async_trait]
pub trait ReadDirStream {
    async fn next_entry(&mut self) -> Result<Option<PathBuf>, String>;
}

/// Real filesystem implementation backed by `tokio::fs`.
#[derive(Debug, Default)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for RealFs {
    async fn path_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>, String> {
        let rd = tokio::fs::read_dir(path)
            .await
            .map_err(|e| format!("read_dir failed for {path:?}: {e}"))?;
        Ok(Box::new(RealReadDir { inner: rd }))
    }

    async fn metadata(&self, path: &Path) -> Result<FsMetadata, String> {
        let md = tokio::fs::metadata(path)
            .await
            .map_err(|e| format!("metadata failed for {path:?}: {e}"))?;
        Ok(FsMetadata {
            is_dir: md.is_dir(),
            is_file: md.is_file(),
            len: md.len(),
            modified: md.modified().ok(),
        })
    }

    async fn remove_file(&self, path: &Path) -> Result<(), String> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| format!("remove_file failed for {path:?}: {e}"))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), String> {
        match tokio::fs::rename(from, to).await {
            Ok(()) => {
                sync_parent_dir(to).await?;
                Ok(())
            }
            Err(err) if err.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32) => {
                tokio::fs::copy(from, to)
                    .await
                    .map_err(|e| format!("cross-device copy failed for {from:?} -> {to:?}: {e}"))?;
                sync_file(to).await?;
                sync_parent_dir(to).await?;
                tokio::fs::remove_file(from)
                    .await
                    .map_err(|e| format!("failed to remove source after copy {from:?}: {e}"))?;
                sync_parent_dir(from).await
            }
            Err(err) => Err(format!("rename failed for {from:?} -> {to:?}: {err}")),
        }
    }
}

/// Fsyncs `path` itself, used after a cross-device copy to make the new
/// file's bytes durable before its directory entry is trusted (§4.4 step
/// 4, §9 "requires an explicit fsync of both file and directory before
/// the old file is unlinked").
async fn sync_file(path: &Path) -> Result<(), String> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| format!("open for fsync failed for {path:?}: {e}"))?;
    file.sync_all()
        .await
        .map_err(|e| format!("fsync failed for {path:?}: {e}"))
}

/// Fsyncs the directory containing `path`, making a rename/unlink's
/// directory-entry change durable (§4.4 step 4: "fsync the containing
/// directory").
async fn sync_parent_dir(path: &Path) -> Result<(), String> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    sync_file(parent).await
}

struct RealReadDir {
    inner: tokio::fs::ReadDir,
}

#[async_trait]
impl ReadDirStream for RealReadDir {
    async fn next_entry(&mut self) -> Result<Option<PathBuf>, String> {
        match self.inner.next_entry().await {
            Ok(Some(entry)) => Ok(Some(entry.path())),
            Ok(None) => Ok(None),
            Err(e) => Err(format!("next_entry failed: {e}")),
        }
    }
}

/// In-memory filesystem for scanner unit tests. Paths are treated
/// literally; callers should use consistent absolute or relative paths.
/// Backed by a shared `Mutex` so a cloned handle can be asserted against
/// after the scanner under test has mutated it (e.g. de-duplication
/// deleting the losing file).
#[derive(Default, Clone)]
pub struct InMemoryFs {
    nodes: Arc<Mutex<HashMap<PathBuf, Node>>>,
}

#[derive(Clone)]
enum Node {
    Dir { children: Vec<PathBuf> },
    File {
        len: u64,
        modified: Option<std::time::SystemTime>,
    },
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir<P: Into<PathBuf>>(&self, path: P) {
        let path = path.into();
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(&path) {
            return;
        }
        Self::ensure_parent_link(&mut nodes, &path);
        nodes.insert(path, Node::Dir { children: Vec::new() });
    }

    pub fn add_file<P: Into<PathBuf>>(&self, path: P, len: u64) {
        self.add_file_at(path, len, None);
    }

    pub fn add_file_at<P: Into<PathBuf>>(
        &self,
        path: P,
        len: u64,
        modified: Option<std::time::SystemTime>,
    ) {
        let path = path.into();
        let mut nodes = self.nodes.lock();
        Self::ensure_parent_link(&mut nodes, &path);
        nodes.insert(path, Node::File { len, modified });
    }

    pub fn exists<P: AsRef<Path>>(&self, path: P) -> bool {
        self.nodes.lock().contains_key(path.as_ref())
    }

    fn ensure_parent_link(nodes: &mut HashMap<PathBuf, Node>, path: &Path) {
        if let Some(parent) = path.parent() {
            if !nodes.contains_key(parent) {
                nodes.insert(parent.to_path_buf(), Node::Dir { children: Vec::new() });
                Self::ensure_parent_link(nodes, parent);
            }
            if let Some(Node::Dir { children }) = nodes.get_mut(parent)
                && !children.iter().any(|p| p.as_path() == path)
            {
                children.push(path.to_path_buf());
            }
        }
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn path_exists(&self, path: &Path) -> bool {
        self.nodes.lock().contains_key(path)
    }

    async fn read_dir(&self, path: &Path) -> Result<Box<dyn ReadDirStream + Send>, String> {
        match self.nodes.lock().get(path) {
            Some(Node::Dir { children }) => Ok(Box::new(InMemReadDir {
                queue: children.clone().into(),
            })),
            Some(Node::File { .. }) => Err(format!("read_dir on file: {path:?}")),
            None => Err(format!("read_dir on missing path: {path:?}")),
        }
    }

    async fn metadata(&self, path: &Path) -> Result<FsMetadata, String> {
        match self.nodes.lock().get(path) {
            Some(Node::Dir { .. }) => Ok(FsMetadata {
                is_dir: true,
                is_file: false,
                len: 0,
                modified: None,
            }),
            Some(Node::File { len, modified }) => Ok(FsMetadata {
                is_dir: false,
                is_file: true,
                len: *len,
                modified: *modified,
            }),
            None => Err(format!("metadata on missing path: {path:?}")),
        }
    }

    async fn remove_file(&self, path: &Path) -> Result<(), String> {
        let mut nodes = self.nodes.lock();
        if nodes.remove(path).is_none() {
            return Err(format!("remove_file on missing path: {path:?}"));
        }
        if let Some(parent) = path.parent()
            && let Some(Node::Dir { children }) = nodes.get_mut(parent)
        {
            children.retain(|p| p != path);
        }
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), String> {
        let mut nodes = self.nodes.lock();
        let node = nodes
            .remove(from)
            .ok_or_else(|| format!("rename on missing path: {from:?}"))?;
        if let Some(parent) = from.parent()
            && let Some(Node::Dir { children }) = nodes.get_mut(parent)
        {
            children.retain(|p| p != from);
        }
        nodes.insert(to.to_path_buf(), node);
        Self::ensure_parent_link(&mut nodes, to);
        Ok(())
    }
}

struct InMemReadDir {
    queue: VecDeque<PathBuf>,
}

#[async_trait]
impl ReadDirStream for InMemReadDir {
    async fn next_entry(&mut self) -> Result<Option<PathBuf>, String> {
        Ok(self.queue.pop_front())
    }
}
