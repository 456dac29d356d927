//! ISO9660 disc image backend.
//!
//! URLs embed the image location in the host component, percent-encoded:
//! `iso9660://smb%3A%2F%2Fnas%2Fdisc.iso/VIDEO_TS`. The backing image is
//! itself opened through the VFS router, so images work over any readable
//! scheme. Each request opens the image fresh; there is no mount table.

mod image;
mod records;

pub use image::{IsoFile, IsoImage};
pub use records::DirectoryRecord;

use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::url::{percent_decode, percent_encode, VfsUrl};
use crate::vfs::{FileItem, FileItemList, Vfs, VfsError, VfsFile, VfsProvider, VfsResult};

/// Serves `iso9660://` URLs by resolving the embedded image URL through the
/// router and parsing the image in place.
pub struct IsoProvider {
    vfs: Weak<Vfs>,
}

impl IsoProvider {
    /// The weak router reference breaks the cycle created by registering a
    /// provider that dispatches back through the router.
    pub fn new(vfs: Weak<Vfs>) -> Self {
        Self { vfs }
    }

    fn router(&self) -> VfsResult<Arc<Vfs>> {
        self.vfs
            .upgrade()
            .ok_or_else(|| VfsError::Unavailable("VFS router has shut down".to_string()))
    }

    async fn open_image(&self, url: &VfsUrl) -> VfsResult<IsoImage> {
        if url.host().is_empty() {
            return Err(VfsError::Protocol(
                "iso9660 URL carries no image location".to_string(),
            ));
        }
        let image_url = url.host_url()?;
        let backing = self.router()?.open_url(&image_url).await?;
        IsoImage::open(backing).await
    }
}

#[async_trait]
impl VfsProvider for IsoProvider {
    async fn list(&self, url: &VfsUrl) -> VfsResult<FileItemList> {
        let mut image = self.open_image(url).await?;
        let dir = image.resolve(&percent_decode(url.path())).await?;
        let entries = image.read_dir(&dir).await?;

        let mut list = FileItemList::new(url.to_string());
        for entry in entries {
            let child = url.join(&percent_encode(&entry.name)).to_string();
            let mut item = if entry.is_dir() {
                FileItem::folder(&entry.name, child)
            } else {
                FileItem::file(&entry.name, child).with_size(u64::from(entry.data_length))
            };
            if let Some(ms) = entry.modified_ms {
                item = item.with_modified(ms);
            }
            list.push(item);
        }
        list.sort_folders_first();
        Ok(list)
    }

    async fn open(&self, url: &VfsUrl) -> VfsResult<Box<dyn VfsFile>> {
        let mut image = self.open_image(url).await?;
        let record = image.resolve(&percent_decode(url.path())).await?;
        Ok(Box::new(image.into_file(&record)?))
    }

    async fn exists(&self, url: &VfsUrl) -> VfsResult<bool> {
        let mut image = self.open_image(url).await?;
        match image.resolve(&percent_decode(url.path())).await {
            Ok(_) => Ok(true),
            Err(VfsError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
