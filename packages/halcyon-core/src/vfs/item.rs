//! Listing item types returned by VFS providers.

use std::collections::BTreeMap;

use serde::Serialize;

/// One entry in a directory listing.
///
/// The `url` is always a complete VFS URL that can be handed straight back
/// to [`crate::vfs::Vfs`] for the next listing or open. Backend-specific
/// extras (channel numbers, device ids, service types) travel in
/// `properties` rather than growing the struct per backend.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileItem {
    /// Display label.
    pub label: String,

    /// Full VFS URL of the entry.
    pub url: String,

    /// Whether the entry can be listed further.
    pub is_folder: bool,

    /// Size in bytes, where the backend reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Modification time in milliseconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_ms: Option<u64>,

    /// MIME type, where the backend reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Backend-specific metadata.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl FileItem {
    /// Creates a folder entry.
    #[must_use]
    pub fn folder(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            is_folder: true,
            size: None,
            modified_ms: None,
            content_type: None,
            properties: BTreeMap::new(),
        }
    }

    /// Creates a file entry.
    #[must_use]
    pub fn file(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            is_folder: false,
            ..Self::folder(label, url)
        }
    }

    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_modified(mut self, modified_ms: u64) -> Self {
        self.modified_ms = Some(modified_ms);
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A directory listing: the listed URL plus its entries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileItemList {
    /// The URL that was listed.
    pub url: String,

    /// The entries, in backend order until sorted.
    pub items: Vec<FileItem>,
}

impl FileItemList {
    /// Creates an empty listing for the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: FileItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileItem> {
        self.items.iter()
    }

    /// Sorts folders before files, each group by case-insensitive label.
    pub fn sort_folders_first(&mut self) {
        self.items.sort_by(|a, b| {
            b.is_folder
                .cmp(&a.is_folder)
                .then_with(|| a.label.to_lowercase().cmp(&b.label.to_lowercase()))
        });
    }
}

impl IntoIterator for FileItemList {
    type Item = FileItem;
    type IntoIter = std::vec::IntoIter<FileItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
