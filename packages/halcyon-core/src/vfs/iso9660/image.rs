//! Mounted image handle: descriptor scan, directory walks and file windows.

use std::io::SeekFrom;

use async_trait::async_trait;

use super::records::{
    descriptor_block_size, descriptor_root_record, descriptor_type, is_joliet_escape, parse_record,
    DirectoryRecord, MAX_VOLUME_DESCRIPTORS, SECTOR_SIZE, VD_TYPE_PRIMARY, VD_TYPE_SUPPLEMENTARY,
    VD_TYPE_TERMINATOR, VOLUME_DESCRIPTOR_START,
};
use crate::vfs::{read_exact_at, VfsError, VfsFile, VfsResult};

/// An opened ISO9660 image backed by any [`VfsFile`].
///
/// The handle owns the backing file; turning a resolved record into a
/// readable window consumes it, so providers open one image per request.
#[derive(Debug)]
pub struct IsoImage {
    file: Box<dyn VfsFile>,
    joliet: bool,
    root: DirectoryRecord,
}

impl IsoImage {
    /// Scans the volume descriptor set starting at sector 16.
    ///
    /// A Joliet supplementary descriptor takes precedence over the primary
    /// one so long filenames survive. Images whose logical block size is not
    /// 2048 are refused.
    pub async fn open(mut file: Box<dyn VfsFile>) -> VfsResult<IsoImage> {
        let mut sector = vec![0u8; SECTOR_SIZE];
        let mut primary: Option<(DirectoryRecord, u16)> = None;
        let mut joliet: Option<(DirectoryRecord, u16)> = None;

        for index in 0..MAX_VOLUME_DESCRIPTORS {
            let offset = (VOLUME_DESCRIPTOR_START + index) * SECTOR_SIZE as u64;
            read_exact_at(file.as_mut(), offset, &mut sector).await?;

            let vd_type = descriptor_type(&sector).ok_or_else(|| {
                VfsError::Protocol("not an ISO9660 image (missing CD001 signature)".to_string())
            })?;
            match vd_type {
                VD_TYPE_PRIMARY => {
                    let block_size = descriptor_block_size(&sector);
                    primary = Some((descriptor_root_record(&sector, false)?, block_size));
                }
                VD_TYPE_SUPPLEMENTARY if is_joliet_escape(&sector) => {
                    let block_size = descriptor_block_size(&sector);
                    joliet = Some((descriptor_root_record(&sector, true)?, block_size));
                }
                VD_TYPE_TERMINATOR => break,
                _ => {}
            }
        }

        let (root, block_size, use_joliet) = match (joliet, primary) {
            (Some((root, block_size)), _) => (root, block_size, true),
            (None, Some((root, block_size))) => (root, block_size, false),
            (None, None) => {
                return Err(VfsError::Protocol(
                    "no primary volume descriptor found".to_string(),
                ))
            }
        };
        if block_size as usize != SECTOR_SIZE {
            return Err(VfsError::Protocol(format!(
                "unsupported logical block size {}",
                block_size
            )));
        }

        log::debug!(
            "[Iso9660] Opened image (joliet={}, root extent {})",
            use_joliet,
            root.extent
        );
        Ok(IsoImage {
            file,
            joliet: use_joliet,
            root,
        })
    }

    pub fn root(&self) -> &DirectoryRecord {
        &self.root
    }

    pub fn is_joliet(&self) -> bool {
        self.joliet
    }

    /// Lists the entries of a directory extent.
    ///
    /// Records never straddle sector boundaries: a zero length byte means
    /// the rest of the sector is padding and the walk continues at the next
    /// one. Self/parent markers are dropped.
    pub async fn read_dir(&mut self, dir: &DirectoryRecord) -> VfsResult<Vec<DirectoryRecord>> {
        if !dir.is_dir() {
            return Err(VfsError::Protocol(format!(
                "{} is not a directory",
                dir.name
            )));
        }

        let mut entries = Vec::new();
        let total = u64::from(dir.data_length);
        let sectors = total.div_ceil(SECTOR_SIZE as u64);
        let mut sector = vec![0u8; SECTOR_SIZE];

        for index in 0..sectors {
            let offset = (u64::from(dir.extent) + index) * SECTOR_SIZE as u64;
            read_exact_at(self.file.as_mut(), offset, &mut sector).await?;

            let limit = (total - index * SECTOR_SIZE as u64).min(SECTOR_SIZE as u64) as usize;
            let mut pos = 0;
            while pos < limit {
                if sector[pos] == 0 {
                    break;
                }
                match parse_record(&sector[pos..limit], self.joliet)? {
                    Some((record, len)) => {
                        pos += len;
                        if !record.name.is_empty() {
                            entries.push(record);
                        }
                    }
                    // Undecodable identifier: step over the record.
                    None => pos += sector[pos] as usize,
                }
            }
        }
        Ok(entries)
    }

    /// Walks `path` from the root, matching each component case-insensitively.
    pub async fn resolve(&mut self, path: &str) -> VfsResult<DirectoryRecord> {
        let mut current = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let entries = self.read_dir(&current).await?;
            current = entries
                .into_iter()
                .find(|entry| entry.name.eq_ignore_ascii_case(segment))
                .ok_or_else(|| VfsError::NotFound(format!("{} in image", path)))?;
        }
        Ok(current)
    }

    /// Consumes the image, returning a read window over one file extent.
    pub fn into_file(self, record: &DirectoryRecord) -> VfsResult<IsoFile> {
        if record.is_dir() {
            return Err(VfsError::Protocol(format!(
                "{} is a directory",
                record.name
            )));
        }
        if record.is_multi_extent() {
            return Err(VfsError::Protocol(format!(
                "{} spans multiple extents, which is not supported",
                record.name
            )));
        }
        Ok(IsoFile {
            inner: self.file,
            start: u64::from(record.extent) * SECTOR_SIZE as u64,
            len: u64::from(record.data_length),
            pos: 0,
        })
    }
}

/// A window over one file extent inside an image.
///
/// Reads are clamped to the recorded data length regardless of how much
/// padding the backing image carries.
#[derive(Debug)]
pub struct IsoFile {
    inner: Box<dyn VfsFile>,
    start: u64,
    len: u64,
    pos: u64,
}

#[async_trait]
impl VfsFile for IsoFile {
    async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let remaining = (self.len - self.pos).min(buf.len() as u64) as usize;
        self.inner.seek(SeekFrom::Start(self.start + self.pos)).await?;
        let n = self.inner.read(&mut buf[..remaining]).await?;
        self.pos += n as u64;
        Ok(n)
    }

    async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.len) + i128::from(delta),
        };
        if target < 0 {
            return Err(VfsError::Io(std::io::Error::from(
                std::io::ErrorKind::InvalidInput,
            )));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }

    fn size(&self) -> Option<u64> {
        Some(self.len)
    }
}
