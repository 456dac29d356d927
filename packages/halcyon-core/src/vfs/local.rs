//! Local filesystem backend.
//!
//! Serves `file://` URLs and bare absolute paths. Listing, reads and the
//! write operations all go through `tokio::fs`; entries whose metadata
//! cannot be read are skipped rather than failing the whole listing.

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::url::VfsUrl;
use crate::vfs::{FileItem, FileItemList, VfsError, VfsFile, VfsProvider, VfsResult};

pub struct LocalProvider;

fn map_io(path: &Path, err: std::io::Error) -> VfsError {
    if err.kind() == std::io::ErrorKind::NotFound {
        VfsError::NotFound(path.display().to_string())
    } else {
        VfsError::Io(err)
    }
}

fn modified_millis(metadata: &std::fs::Metadata) -> Option<u64> {
    metadata
        .modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
}

#[async_trait]
impl VfsProvider for LocalProvider {
    async fn list(&self, url: &VfsUrl) -> VfsResult<FileItemList> {
        let path = Path::new(url.path());
        let mut entries = tokio::fs::read_dir(path).await.map_err(|e| map_io(path, e))?;

        let mut list = FileItemList::new(url.to_string());
        while let Some(entry) = entries.next_entry().await.map_err(|e| map_io(path, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("[Local] Skipping {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            let child = url.join(&name).to_string();
            let item = if metadata.is_dir() {
                FileItem::folder(name, child)
            } else {
                let mut item = FileItem::file(name, child).with_size(metadata.len());
                if let Some(ms) = modified_millis(&metadata) {
                    item = item.with_modified(ms);
                }
                item
            };
            list.push(item);
        }
        Ok(list)
    }

    async fn open(&self, url: &VfsUrl) -> VfsResult<Box<dyn VfsFile>> {
        let path = Path::new(url.path());
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| map_io(path, e))?;
        let size = file.metadata().await.ok().map(|m| m.len());
        Ok(Box::new(LocalFile { inner: file, size }))
    }

    async fn exists(&self, url: &VfsUrl) -> VfsResult<bool> {
        match tokio::fs::metadata(url.path()).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(VfsError::Io(e)),
        }
    }

    async fn create_dir(&self, url: &VfsUrl) -> VfsResult<()> {
        let path = Path::new(url.path());
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn remove_dir(&self, url: &VfsUrl) -> VfsResult<()> {
        let path = Path::new(url.path());
        tokio::fs::remove_dir(path)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn remove_file(&self, url: &VfsUrl) -> VfsResult<()> {
        let path = Path::new(url.path());
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| map_io(path, e))
    }
}

/// Read handle over a local file.
pub struct LocalFile {
    inner: tokio::fs::File,
    size: Option<u64>,
}

#[async_trait]
impl VfsFile for LocalFile {
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        Ok(self.inner.read(buf).await?)
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        Ok(self.inner.seek(pos).await?)
    }

    fn size(&self) -> Option<u64> {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn listing(url: &str) -> FileItemList {
        LocalProvider
            .list(&VfsUrl::parse(url).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn lists_files_and_folders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("season 1")).unwrap();
        std::fs::write(dir.path().join("episode.mkv"), b"abc").unwrap();

        let mut list = listing(&format!("file://{}", dir.path().display())).await;
        list.sort_folders_first();

        assert_eq!(list.len(), 2);
        assert!(list.items[0].is_folder);
        assert_eq!(list.items[0].label, "season 1");
        assert_eq!(list.items[1].size, Some(3));
        assert!(list.items[1].modified_ms.is_some());
    }

    #[tokio::test]
    async fn missing_directory_is_not_found() {
        let err = LocalProvider
            .list(&VfsUrl::parse("/definitely/not/here").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
    }

    #[tokio::test]
    async fn open_read_and_seek() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let url = VfsUrl::parse(&format!("file://{}", path.display())).unwrap();
        let mut file = LocalProvider.open(&url).await.unwrap();
        assert_eq!(file.size(), Some(10));

        let mut buf = [0u8; 4];
        crate::vfs::read_exact(&mut *file, &mut buf).await.unwrap();
        assert_eq!(&buf, b"0123");

        file.seek(SeekFrom::Start(6)).await.unwrap();
        let n = file.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"6789");
    }

    #[tokio::test]
    async fn create_exists_remove_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let target = format!("file://{}/new/nested", dir.path().display());

        let vfs_url = VfsUrl::parse(&target).unwrap();
        LocalProvider.create_dir(&vfs_url).await.unwrap();
        assert!(LocalProvider.exists(&vfs_url).await.unwrap());

        LocalProvider.remove_dir(&vfs_url).await.unwrap();
        assert!(!LocalProvider.exists(&vfs_url).await.unwrap());
    }
}
