//! DIDL-Lite metadata parsing for ContentDirectory Browse results.
//!
//! Media servers return their listings as a DIDL-Lite document embedded in
//! the SOAP `Result` element. This module turns that document into typed
//! objects the directory backend can render as files and folders.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::soap::{SoapError, SoapResult};
use crate::utils::get_xml_attr;

/// A `<res>` element: one concrete rendition of an item.
#[derive(Debug, Clone, Default)]
pub struct DidlResource {
    /// Absolute URI the server streams this rendition from.
    pub uri: String,
    /// Raw protocolInfo attribute ("http-get:*:video/x-matroska:*").
    pub protocol_info: Option<String>,
    /// Size in bytes, when the server reports it.
    pub size: Option<u64>,
    /// Playback duration in milliseconds, when the server reports it.
    pub duration_ms: Option<u64>,
}

impl DidlResource {
    /// Extracts the MIME type from the protocolInfo attribute.
    ///
    /// protocolInfo is a colon-separated quad; the third field is the
    /// content format. A literal `*` means unspecified.
    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        self.protocol_info
            .as_deref()
            .and_then(|info| info.split(':').nth(2))
            .filter(|mime| !mime.is_empty() && *mime != "*")
    }
}

/// A `<container>` or `<item>` element from a DIDL-Lite document.
#[derive(Debug, Clone)]
pub struct DidlObject {
    /// Object ID, used as the path segment for further Browse calls.
    pub id: String,
    /// Parent object ID ("-1" for the root's parent).
    pub parent_id: String,
    /// Display title.
    pub title: String,
    /// UPnP class ("object.container.album.musicAlbum", "object.item.videoItem").
    pub class: String,
    /// True for `<container>` elements.
    pub is_container: bool,
    /// Number of children, when the server reports it on a container.
    pub child_count: Option<u64>,
    /// Artwork URI from upnp:albumArtURI, when present.
    pub artwork_uri: Option<String>,
    /// Renditions of this object, in document order.
    pub resources: Vec<DidlResource>,
}

impl DidlObject {
    /// Returns the first resource, which servers list as the preferred one.
    #[must_use]
    pub fn primary_resource(&self) -> Option<&DidlResource> {
        self.resources.first()
    }
}

/// Parses a DIDL-Lite document into its containers and items.
///
/// Unknown elements are skipped, so vendor extensions do not break the
/// listing. Malformed XML is a `Parse` error.
pub fn parse_didl(xml: &str) -> SoapResult<Vec<DidlObject>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut objects = Vec::new();
    let mut current: Option<DidlObject> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local_name = e.local_name();
                match local_name.as_ref() {
                    b"container" | b"item" => {
                        let is_container = local_name.as_ref() == b"container";
                        current = Some(DidlObject {
                            id: get_xml_attr(e, b"id").unwrap_or_default(),
                            parent_id: get_xml_attr(e, b"parentID").unwrap_or_default(),
                            title: String::new(),
                            class: String::new(),
                            is_container,
                            child_count: get_xml_attr(e, b"childCount")
                                .and_then(|c| c.parse().ok()),
                            artwork_uri: None,
                            resources: Vec::new(),
                        });
                    }
                    b"title" => {
                        if let Some(obj) = current.as_mut() {
                            if let Ok(text) = reader.read_text(e.name()) {
                                obj.title = html_escape::decode_html_entities(&text).to_string();
                            }
                        }
                    }
                    b"class" => {
                        if let Some(obj) = current.as_mut() {
                            if let Ok(text) = reader.read_text(e.name()) {
                                obj.class = html_escape::decode_html_entities(&text).to_string();
                            }
                        }
                    }
                    b"albumArtURI" => {
                        if let Some(obj) = current.as_mut() {
                            if let Ok(text) = reader.read_text(e.name()) {
                                obj.artwork_uri =
                                    Some(html_escape::decode_html_entities(&text).to_string());
                            }
                        }
                    }
                    b"res" => {
                        if let Some(obj) = current.as_mut() {
                            let protocol_info = get_xml_attr(e, b"protocolInfo");
                            let size = get_xml_attr(e, b"size").and_then(|s| s.parse().ok());
                            let duration_ms = get_xml_attr(e, b"duration")
                                .and_then(|d| parse_duration_ms(&d));
                            let uri = reader
                                .read_text(e.name())
                                .map(|t| html_escape::decode_html_entities(&t).trim().to_string())
                                .unwrap_or_default();
                            if !uri.is_empty() {
                                obj.resources.push(DidlResource {
                                    uri,
                                    protocol_info,
                                    size,
                                    duration_ms,
                                });
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                if matches!(e.local_name().as_ref(), b"container" | b"item") {
                    if let Some(obj) = current.take() {
                        objects.push(obj);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::debug!("[Didl] Parse error: {:?}", e);
                return Err(SoapError::Parse);
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(objects)
}

/// Parses a DIDL res duration ("1:02:30.500") into milliseconds.
///
/// Lenient on the component count: "MM:SS" and bare seconds also parse,
/// since servers are sloppy about the H+:MM:SS form. Non-numeric values
/// like "NOT_IMPLEMENTED" yield None.
pub(crate) fn parse_duration_ms(value: &str) -> Option<u64> {
    let value = value.trim().trim_start_matches('+');
    if value.is_empty() {
        return None;
    }

    let (main, fraction) = match value.split_once('.') {
        Some((m, f)) => (m, Some(f)),
        None => (value, None),
    };

    let components: Vec<&str> = main.split(':').collect();
    if components.is_empty() || components.len() > 3 {
        return None;
    }

    let mut total_secs: u64 = 0;
    for component in &components {
        let v: u64 = component.trim().parse().ok()?;
        total_secs = total_secs * 60 + v;
    }

    let mut millis = total_secs * 1000;
    if let Some(fraction) = fraction {
        // The spec also allows "F0/F1" rational fractions; only the decimal
        // form shows up in practice, so take at most three digits.
        let digits: String = fraction.chars().take_while(|c| c.is_ascii_digit()).take(3).collect();
        if let Ok(v) = digits.parse::<u64>() {
            millis += v * 10u64.pow(3 - digits.len() as u32);
        }
    }

    Some(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROWSE_DIDL: &str = r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">
<container id="64" parentID="0" restricted="1" childCount="12">
  <dc:title>Movies</dc:title>
  <upnp:class>object.container.storageFolder</upnp:class>
</container>
<item id="64$0" parentID="64" restricted="1">
  <dc:title>Big Buck Bunny</dc:title>
  <upnp:class>object.item.videoItem</upnp:class>
  <upnp:albumArtURI>http://192.168.1.50:8200/AlbumArt/2-64.jpg</upnp:albumArtURI>
  <res protocolInfo="http-get:*:video/x-matroska:*" size="276134947" duration="0:09:56.458">http://192.168.1.50:8200/MediaItems/22.mkv</res>
</item>
</DIDL-Lite>"#;

    #[test]
    fn parses_containers_and_items() {
        let objects = parse_didl(BROWSE_DIDL).expect("DIDL should parse");
        assert_eq!(objects.len(), 2);

        let folder = &objects[0];
        assert!(folder.is_container);
        assert_eq!(folder.id, "64");
        assert_eq!(folder.parent_id, "0");
        assert_eq!(folder.title, "Movies");
        assert_eq!(folder.class, "object.container.storageFolder");
        assert_eq!(folder.child_count, Some(12));
        assert!(folder.resources.is_empty());

        let video = &objects[1];
        assert!(!video.is_container);
        assert_eq!(video.id, "64$0");
        assert_eq!(video.title, "Big Buck Bunny");
        assert_eq!(
            video.artwork_uri.as_deref(),
            Some("http://192.168.1.50:8200/AlbumArt/2-64.jpg")
        );

        let res = video.primary_resource().expect("item should carry a res");
        assert_eq!(res.uri, "http://192.168.1.50:8200/MediaItems/22.mkv");
        assert_eq!(res.size, Some(276_134_947));
        assert_eq!(res.duration_ms, Some(596_458));
        assert_eq!(res.mime_type(), Some("video/x-matroska"));
    }

    #[test]
    fn entities_in_titles_are_decoded() {
        let xml = r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/">
<item id="1" parentID="0"><dc:title>Bob &amp; Carol &lt;Director's Cut&gt;</dc:title></item>
</DIDL-Lite>"#;
        let objects = parse_didl(xml).expect("DIDL should parse");
        assert_eq!(objects[0].title, "Bob & Carol <Director's Cut>");
    }

    #[test]
    fn empty_document_yields_no_objects() {
        let xml = r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/"></DIDL-Lite>"#;
        assert!(parse_didl(xml).expect("DIDL should parse").is_empty());
    }

    #[test]
    fn mismatched_tags_are_a_parse_error() {
        let xml = r#"<DIDL-Lite><item id="1"></container></DIDL-Lite>"#;
        assert!(matches!(parse_didl(xml), Err(SoapError::Parse)));
    }

    #[test]
    fn wildcard_protocol_info_has_no_mime() {
        let res = DidlResource {
            protocol_info: Some("*:*:*:*".to_string()),
            ..DidlResource::default()
        };
        assert_eq!(res.mime_type(), None);
    }

    #[test]
    fn durations_parse_to_millis() {
        assert_eq!(parse_duration_ms("1:02:30"), Some(3_750_000));
        assert_eq!(parse_duration_ms("0:09:56.458"), Some(596_458));
        assert_eq!(parse_duration_ms("0:00:01.5"), Some(1_500));
        assert_eq!(parse_duration_ms("4:32"), Some(272_000));
        assert_eq!(parse_duration_ms("90"), Some(90_000));
        assert_eq!(parse_duration_ms("NOT_IMPLEMENTED"), None);
        assert_eq!(parse_duration_ms(""), None);
        assert_eq!(parse_duration_ms("1:2:3:4"), None);
    }
}
