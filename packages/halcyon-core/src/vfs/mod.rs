//! Virtual file system.
//!
//! Every browsable or readable resource is addressed by a [`VfsUrl`] and
//! served by a [`VfsProvider`] registered for the URL's scheme. The [`Vfs`]
//! router owns the scheme table and dispatches parsed URLs; providers never
//! see URLs for schemes they did not register.
//!
//! Backends that nest (an ISO image sitting on an FTP share) resolve their
//! backing resource back through the router, so composition falls out of
//! the URL syntax rather than special cases.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::url::{UrlError, VfsUrl};

pub mod addons_dir;
pub mod ftp;
pub mod iso9660;
pub mod item;
pub mod local;
pub mod tuner;
pub mod upnp_dir;
pub mod zeroconf;

pub use item::{FileItem, FileItemList};
pub use tuner::{Tuner, TunerRegistry};

/// Errors produced by VFS operations.
#[derive(Debug, Error)]
pub enum VfsError {
    /// No provider is registered for the URL's scheme.
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// The addressed entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider does not implement this operation.
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    /// A backend exists but cannot serve the request right now.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The URL could not be parsed.
    #[error(transparent)]
    Url(#[from] UrlError),

    /// Backend protocol violation (malformed reply, corrupt image).
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Convenient Result alias for VFS operations.
pub type VfsResult<T> = Result<T, VfsError>;

/// A readable, seekable handle to a VFS entry.
///
/// Implementations are single-reader: all methods take `&mut self` and
/// callers own the handle exclusively.
#[async_trait]
pub trait VfsFile: Send {
    /// Reads up to `buf.len()` bytes, returning 0 at end of file.
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize>;

    /// Repositions the read cursor, returning the new absolute offset.
    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64>;

    /// Total size in bytes, where the backend knows it.
    fn size(&self) -> Option<u64>;
}

impl std::fmt::Debug for dyn VfsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VfsFile").finish_non_exhaustive()
    }
}

/// Fills `buf` completely or fails with `UnexpectedEof`.
pub async fn read_exact(file: &mut (dyn VfsFile + '_), buf: &mut [u8]) -> VfsResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(VfsError::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }
        filled += n;
    }
    Ok(())
}

/// Seeks to `offset` and fills `buf` completely.
pub async fn read_exact_at(
    file: &mut (dyn VfsFile + '_),
    offset: u64,
    buf: &mut [u8],
) -> VfsResult<()> {
    file.seek(SeekFrom::Start(offset)).await?;
    read_exact(file, buf).await
}

/// A VFS backend serving one URL scheme.
///
/// Only [`list`](Self::list) is mandatory. Read-only network backends leave
/// the write operations at their `NotSupported` defaults; backends without
/// byte-level access (device registries, virtual views) leave `open` there
/// too.
#[async_trait]
pub trait VfsProvider: Send + Sync {
    /// Lists the directory at `url`.
    async fn list(&self, url: &VfsUrl) -> VfsResult<FileItemList>;

    /// Opens the file at `url` for reading.
    async fn open(&self, url: &VfsUrl) -> VfsResult<Box<dyn VfsFile>> {
        let _ = url;
        Err(VfsError::NotSupported("open"))
    }

    /// Returns whether the entry at `url` exists.
    async fn exists(&self, url: &VfsUrl) -> VfsResult<bool> {
        let _ = url;
        Err(VfsError::NotSupported("exists"))
    }

    /// Creates the directory at `url`.
    async fn create_dir(&self, url: &VfsUrl) -> VfsResult<()> {
        let _ = url;
        Err(VfsError::NotSupported("create_dir"))
    }

    /// Removes the (empty) directory at `url`.
    async fn remove_dir(&self, url: &VfsUrl) -> VfsResult<()> {
        let _ = url;
        Err(VfsError::NotSupported("remove_dir"))
    }

    /// Removes the file at `url`.
    async fn remove_file(&self, url: &VfsUrl) -> VfsResult<()> {
        let _ = url;
        Err(VfsError::NotSupported("remove_file"))
    }
}

/// Scheme-keyed provider registry and dispatcher.
///
/// Registration is dynamic so bootstrap can wire providers that need the
/// router itself (container backends hold a `Weak<Vfs>` back-reference).
/// Re-registering a scheme replaces the provider, which tests use to
/// substitute stubs.
pub struct Vfs {
    providers: RwLock<HashMap<String, Arc<dyn VfsProvider>>>,
}

impl Vfs {
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `provider` for `scheme`, replacing any previous one.
    pub fn register(&self, scheme: &str, provider: Arc<dyn VfsProvider>) {
        self.providers
            .write()
            .insert(scheme.to_ascii_lowercase(), provider);
    }

    /// Returns whether a provider is registered for `scheme`.
    pub fn supports(&self, scheme: &str) -> bool {
        self.providers.read().contains_key(scheme)
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.providers.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Resolves the provider for a parsed URL.
    pub fn provider_for(&self, url: &VfsUrl) -> VfsResult<Arc<dyn VfsProvider>> {
        self.providers
            .read()
            .get(url.scheme())
            .cloned()
            .ok_or_else(|| VfsError::UnsupportedScheme(url.scheme().to_string()))
    }

    /// Lists the directory at `url`.
    pub async fn list(&self, url: &str) -> VfsResult<FileItemList> {
        self.list_url(&VfsUrl::parse(url)?).await
    }

    /// Lists the directory at a parsed `url`.
    pub async fn list_url(&self, url: &VfsUrl) -> VfsResult<FileItemList> {
        self.provider_for(url)?.list(url).await
    }

    /// Opens the file at `url` for reading.
    pub async fn open(&self, url: &str) -> VfsResult<Box<dyn VfsFile>> {
        self.open_url(&VfsUrl::parse(url)?).await
    }

    /// Opens the file at a parsed `url` for reading.
    pub async fn open_url(&self, url: &VfsUrl) -> VfsResult<Box<dyn VfsFile>> {
        self.provider_for(url)?.open(url).await
    }

    /// Returns whether the entry at `url` exists.
    pub async fn exists(&self, url: &str) -> VfsResult<bool> {
        let url = VfsUrl::parse(url)?;
        self.provider_for(&url)?.exists(&url).await
    }

    /// Creates the directory at `url`.
    pub async fn create_dir(&self, url: &str) -> VfsResult<()> {
        let url = VfsUrl::parse(url)?;
        self.provider_for(&url)?.create_dir(&url).await
    }

    /// Removes the (empty) directory at `url`.
    pub async fn remove_dir(&self, url: &str) -> VfsResult<()> {
        let url = VfsUrl::parse(url)?;
        self.provider_for(&url)?.remove_dir(&url).await
    }

    /// Removes the file at `url`.
    pub async fn remove_file(&self, url: &str) -> VfsResult<()> {
        let url = VfsUrl::parse(url)?;
        self.provider_for(&url)?.remove_file(&url).await
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider {
        label: &'static str,
    }

    #[async_trait]
    impl VfsProvider for StubProvider {
        async fn list(&self, url: &VfsUrl) -> VfsResult<FileItemList> {
            let mut list = FileItemList::new(url.to_string());
            list.push(FileItem::folder(self.label, url.join("child").to_string()));
            Ok(list)
        }
    }

    #[tokio::test]
    async fn routes_by_scheme() {
        let vfs = Vfs::new();
        vfs.register("stub", Arc::new(StubProvider { label: "first" }));

        let list = vfs.list("stub://host/").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.items[0].label, "first");
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let vfs = Vfs::new();
        let err = vfs.list("gopher://host/").await.unwrap_err();
        assert!(matches!(err, VfsError::UnsupportedScheme(s) if s == "gopher"));
    }

    #[tokio::test]
    async fn reregistering_replaces_provider() {
        let vfs = Vfs::new();
        vfs.register("stub", Arc::new(StubProvider { label: "first" }));
        vfs.register("stub", Arc::new(StubProvider { label: "second" }));

        let list = vfs.list("stub://host/").await.unwrap();
        assert_eq!(list.items[0].label, "second");
    }

    #[tokio::test]
    async fn default_operations_report_not_supported() {
        let vfs = Vfs::new();
        vfs.register("stub", Arc::new(StubProvider { label: "x" }));

        let err = vfs.open("stub://host/file").await.unwrap_err();
        assert!(matches!(err, VfsError::NotSupported("open")));
        let err = vfs.create_dir("stub://host/dir").await.unwrap_err();
        assert!(matches!(err, VfsError::NotSupported("create_dir")));
    }

    #[tokio::test]
    async fn schemes_are_sorted() {
        let vfs = Vfs::new();
        vfs.register("zeta", Arc::new(StubProvider { label: "z" }));
        vfs.register("alpha", Arc::new(StubProvider { label: "a" }));
        assert_eq!(vfs.schemes(), vec!["alpha".to_string(), "zeta".to_string()]);
        assert!(vfs.supports("alpha"));
        assert!(!vfs.supports("beta"));
    }
}
