//! upnp:// directory provider.
//!
//! `upnp://` lists the media servers the registry currently knows about.
//! `upnp://<udn>/<object-id>` browses a server's ContentDirectory tree; the
//! object id travels percent-encoded as the URL path. Playable items point
//! straight at the server's resource URI (usually plain HTTP), so opening
//! them never goes back through this provider.

use std::sync::Arc;

use async_trait::async_trait;

use crate::upnp::content_directory::{browse_all_children, browse_children};
use crate::upnp::didl::DidlObject;
use crate::upnp::registry::MediaServerRegistry;
use crate::upnp::soap::SoapError;
use crate::url::{percent_decode, percent_encode, VfsUrl};
use crate::vfs::{FileItem, FileItemList, VfsError, VfsProvider, VfsResult};

/// ContentDirectory root object id.
const ROOT_OBJECT_ID: &str = "0";

/// ContentDirectory fault for a missing object.
const NO_SUCH_OBJECT: &str = "701";

/// Provider for the `upnp` scheme, backed by the media server registry.
pub struct UpnpProvider {
    registry: Arc<MediaServerRegistry>,
}

impl UpnpProvider {
    pub fn new(registry: Arc<MediaServerRegistry>) -> Self {
        Self { registry }
    }

    /// The `upnp://` root: one folder per known server.
    fn server_index(&self) -> FileItemList {
        let mut list = FileItemList::new("upnp://");
        for server in self.registry.servers() {
            let mut item = FileItem::folder(
                &server.friendly_name,
                format!("upnp://{}/", server.udn),
            );
            if let Some(model) = &server.model_name {
                item = item.with_property("model", model);
            }
            if let Some(manufacturer) = &server.manufacturer {
                item = item.with_property("manufacturer", manufacturer);
            }
            list.push(item);
        }
        list
    }
}

#[async_trait]
impl VfsProvider for UpnpProvider {
    async fn list(&self, url: &VfsUrl) -> VfsResult<FileItemList> {
        if url.host().is_empty() {
            return Ok(self.server_index());
        }

        let udn = url.host().to_string();
        // The registry is eventually consistent; a UDN it has not seen may
        // still appear on the next sweep, so this is not a NotFound.
        let server = self.registry.get(&udn).ok_or_else(|| {
            VfsError::Unavailable(format!(
                "media server {} not discovered yet, retry after the next sweep",
                udn
            ))
        })?;

        let object_id = object_id_from_path(url.path());
        log::debug!(
            "[Upnp] Browsing {} object {} on {}",
            server.friendly_name,
            object_id,
            udn
        );

        let objects = browse_all_children(
            self.registry.http_client(),
            &server.content_directory_url,
            &object_id,
        )
        .await
        .map_err(map_soap_error)?;

        let mut list = FileItemList::new(url.to_string());
        for object in &objects {
            match didl_to_item(&udn, object) {
                Some(item) => list.push(item),
                None => log::debug!("[Upnp] Skipping object {} without a resource", object.id),
            }
        }
        list.sort_folders_first();
        Ok(list)
    }

    async fn exists(&self, url: &VfsUrl) -> VfsResult<bool> {
        if url.host().is_empty() {
            return Ok(true);
        }

        let Some(server) = self.registry.get(url.host()) else {
            return Ok(false);
        };

        let object_id = object_id_from_path(url.path());
        if object_id == ROOT_OBJECT_ID {
            return Ok(true);
        }

        // A one-entry browse is the cheapest way to probe an object
        match browse_children(
            self.registry.http_client(),
            &server.content_directory_url,
            &object_id,
            0,
            1,
        )
        .await
        {
            Ok(_) => Ok(true),
            Err(SoapError::Fault { ref code, .. }) if code == NO_SUCH_OBJECT => Ok(false),
            Err(e) => Err(map_soap_error(e)),
        }
    }
}

/// Extracts the ContentDirectory object id from a URL path.
pub(crate) fn object_id_from_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        ROOT_OBJECT_ID.to_string()
    } else {
        percent_decode(trimmed)
    }
}

/// Converts a parsed DIDL object into a listing item.
///
/// Containers become folders addressed back through this provider. Items
/// take their first resource URI directly; items without any resource are
/// dropped (None) since nothing could open them.
pub(crate) fn didl_to_item(udn: &str, object: &DidlObject) -> Option<FileItem> {
    let label = if object.title.is_empty() {
        object.id.clone()
    } else {
        object.title.clone()
    };

    let mut item = if object.is_container {
        let mut folder = FileItem::folder(
            label,
            format!("upnp://{}/{}", udn, percent_encode(&object.id)),
        );
        if let Some(count) = object.child_count {
            folder = folder.with_property("childCount", count.to_string());
        }
        folder
    } else {
        let resource = object.primary_resource()?;
        let mut file = FileItem::file(label, resource.uri.clone());
        if let Some(size) = resource.size {
            file = file.with_size(size);
        }
        if let Some(mime) = resource.mime_type() {
            file = file.with_content_type(mime);
        }
        if let Some(duration) = resource.duration_ms {
            file = file.with_property("durationMs", duration.to_string());
        }
        file
    };

    if let Some(artwork) = &object.artwork_uri {
        item = item.with_property("artwork", artwork);
    }
    if !object.class.is_empty() {
        item = item.with_property("upnpClass", &object.class);
    }
    Some(item)
}

fn map_soap_error(e: SoapError) -> VfsError {
    match e {
        SoapError::Parse => VfsError::Protocol("malformed Browse response".to_string()),
        SoapError::Fault { ref code, ref description } if code == NO_SUCH_OBJECT => {
            VfsError::NotFound(description.clone())
        }
        other => VfsError::Unavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::{AddonEvent, EventEmitter, RepositoryEvent, ServerEvent};
    use crate::upnp::description::DeviceDescription;
    use crate::upnp::didl::DidlResource;
    use crate::upnp::ssdp::SsdpResponse;

    struct NullEmitter;

    impl EventEmitter for NullEmitter {
        fn emit_addon(&self, _event: AddonEvent) {}
        fn emit_repository(&self, _event: RepositoryEvent) {}
        fn emit_server(&self, _event: ServerEvent) {}
    }

    fn seeded_registry() -> Arc<MediaServerRegistry> {
        let registry = Arc::new(MediaServerRegistry::new(
            &Config::default(),
            reqwest::Client::new(),
            Arc::new(NullEmitter),
        ));
        registry.record(
            &SsdpResponse {
                udn: "nas-1".to_string(),
                location: "http://192.168.1.50:8200/rootDesc.xml".to_string(),
                server: None,
                source_ip: "192.168.1.50".parse().unwrap(),
            },
            DeviceDescription {
                udn: "nas-1".to_string(),
                friendly_name: "Office NAS".to_string(),
                model_name: Some("MiniDLNA".to_string()),
                manufacturer: None,
                content_directory_url: Some(
                    "http://192.168.1.50:8200/ctl/ContentDir".to_string(),
                ),
            },
            1_000,
        );
        registry
    }

    #[test]
    fn object_id_comes_from_the_decoded_path() {
        assert_eq!(object_id_from_path("/"), "0");
        assert_eq!(object_id_from_path(""), "0");
        assert_eq!(object_id_from_path("/64%2410"), "64$10");
        assert_eq!(object_id_from_path("/0%2Fvideo"), "0/video");
    }

    #[test]
    fn containers_map_to_folders_with_encoded_ids() {
        let object = DidlObject {
            id: "64$10".to_string(),
            parent_id: "64".to_string(),
            title: "Movies".to_string(),
            class: "object.container.storageFolder".to_string(),
            is_container: true,
            child_count: Some(12),
            artwork_uri: None,
            resources: Vec::new(),
        };

        let item = didl_to_item("nas-1", &object).expect("container should map");
        assert!(item.is_folder);
        assert_eq!(item.url, "upnp://nas-1/64%2410");
        assert_eq!(
            item.properties.get("childCount").map(String::as_str),
            Some("12")
        );
    }

    #[test]
    fn items_take_their_resource_uri() {
        let object = DidlObject {
            id: "64$10$3".to_string(),
            parent_id: "64$10".to_string(),
            title: "Big Buck Bunny".to_string(),
            class: "object.item.videoItem".to_string(),
            is_container: false,
            child_count: None,
            artwork_uri: Some("http://192.168.1.50:8200/art.jpg".to_string()),
            resources: vec![DidlResource {
                uri: "http://192.168.1.50:8200/MediaItems/22.mkv".to_string(),
                protocol_info: Some("http-get:*:video/x-matroska:*".to_string()),
                size: Some(276_134_947),
                duration_ms: Some(596_458),
            }],
        };

        let item = didl_to_item("nas-1", &object).expect("item should map");
        assert!(!item.is_folder);
        assert_eq!(item.url, "http://192.168.1.50:8200/MediaItems/22.mkv");
        assert_eq!(item.size, Some(276_134_947));
        assert_eq!(item.content_type.as_deref(), Some("video/x-matroska"));
        assert_eq!(
            item.properties.get("artwork").map(String::as_str),
            Some("http://192.168.1.50:8200/art.jpg")
        );
    }

    #[test]
    fn items_without_resources_are_dropped() {
        let object = DidlObject {
            id: "9".to_string(),
            parent_id: "0".to_string(),
            title: "Ghost".to_string(),
            class: "object.item".to_string(),
            is_container: false,
            child_count: None,
            artwork_uri: None,
            resources: Vec::new(),
        };
        assert!(didl_to_item("nas-1", &object).is_none());
    }

    #[tokio::test]
    async fn root_lists_known_servers() {
        let provider = UpnpProvider::new(seeded_registry());
        let list = provider
            .list(&VfsUrl::parse("upnp://").unwrap())
            .await
            .unwrap();

        assert_eq!(list.len(), 1);
        assert_eq!(list.items[0].label, "Office NAS");
        assert_eq!(list.items[0].url, "upnp://nas-1/");
        assert!(list.items[0].is_folder);
    }

    #[tokio::test]
    async fn browsing_an_unknown_server_is_unavailable() {
        let provider = UpnpProvider::new(seeded_registry());
        let err = provider
            .list(&VfsUrl::parse("upnp://gone-away/").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::Unavailable(_)));
    }

    #[tokio::test]
    async fn exists_reflects_registry_membership() {
        let provider = UpnpProvider::new(seeded_registry());
        assert!(provider
            .exists(&VfsUrl::parse("upnp://").unwrap())
            .await
            .unwrap());
        assert!(provider
            .exists(&VfsUrl::parse("upnp://nas-1/").unwrap())
            .await
            .unwrap());
        assert!(!provider
            .exists(&VfsUrl::parse("upnp://gone-away/").unwrap())
            .await
            .unwrap());
    }
}
