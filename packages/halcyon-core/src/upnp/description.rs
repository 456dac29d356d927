//! UPnP device description fetching and parsing.
//!
//! The SSDP LOCATION header points at an XML device description. From it we
//! take the identity of the device (UDN, friendly name, model) and the
//! control URL of its ContentDirectory service, resolved to an absolute URL.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;

use super::ssdp::normalize_udn;

/// Identity and service endpoints of a described device.
#[derive(Debug, Clone)]
pub struct DeviceDescription {
    /// Canonical UUID from the UDN field (uuid: prefix stripped).
    pub udn: String,
    /// Friendly name for display.
    pub friendly_name: String,
    /// Model name (e.g., "MiniDLNA", "Plex Media Server").
    pub model_name: Option<String>,
    /// Manufacturer name.
    pub manufacturer: Option<String>,
    /// Absolute control URL of the ContentDirectory service, when the
    /// device offers one. Devices without it cannot be browsed.
    pub content_directory_url: Option<String>,
}

/// Fetches and parses a device description from its LOCATION URL.
pub async fn fetch_description(client: &Client, location: &str) -> Option<DeviceDescription> {
    let response = client.get(location).send().await.ok()?;
    let body = response.text().await.ok()?;

    parse_device_description(&body, location)
}

/// Parses device description XML.
///
/// The first UDN/friendlyName in document order belong to the root device;
/// embedded sub-devices repeat these elements and must not override them.
pub(crate) fn parse_device_description(xml: &str, location: &str) -> Option<DeviceDescription> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut udn: Option<String> = None;
    let mut friendly_name: Option<String> = None;
    let mut model_name: Option<String> = None;
    let mut manufacturer: Option<String> = None;
    let mut url_base: Option<String> = None;

    let mut in_service = false;
    let mut service_type = String::new();
    let mut control_url = String::new();
    let mut content_directory: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local_name = e.local_name();
                let name = local_name.as_ref();

                match name {
                    b"service" => {
                        in_service = true;
                        service_type.clear();
                        control_url.clear();
                    }
                    b"serviceType" if in_service => {
                        if let Ok(text) = reader.read_text(e.name()) {
                            service_type = text.trim().to_string();
                        }
                    }
                    b"controlURL" if in_service => {
                        if let Ok(text) = reader.read_text(e.name()) {
                            control_url = text.trim().to_string();
                        }
                    }
                    b"URLBase" => {
                        if let Ok(text) = reader.read_text(e.name()) {
                            url_base = Some(text.trim().to_string());
                        }
                    }
                    b"UDN" if udn.is_none() => {
                        udn = reader.read_text(e.name()).ok().map(|t| t.to_string());
                    }
                    b"friendlyName" if friendly_name.is_none() => {
                        friendly_name = reader.read_text(e.name()).ok().map(|t| t.to_string());
                    }
                    b"modelName" if model_name.is_none() => {
                        model_name = reader.read_text(e.name()).ok().map(|t| t.to_string());
                    }
                    b"manufacturer" if manufacturer.is_none() => {
                        manufacturer = reader.read_text(e.name()).ok().map(|t| t.to_string());
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                if e.local_name().as_ref() == b"service" {
                    in_service = false;
                    if content_directory.is_none()
                        && service_type.contains(":ContentDirectory:")
                        && !control_url.is_empty()
                    {
                        content_directory = Some(control_url.clone());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                log::trace!("Error parsing device description: {:?}", e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    // Relative control URLs resolve against URLBase when present, else the
    // description URL itself (UPnP 1.1 dropped URLBase, most devices omit it)
    let base = url_base.as_deref().unwrap_or(location);
    let content_directory_url = content_directory.map(|url| resolve_url(base, &url));

    match (udn, friendly_name) {
        (Some(udn), Some(friendly_name)) => Some(DeviceDescription {
            udn: normalize_udn(&udn),
            friendly_name,
            model_name,
            manufacturer,
            content_directory_url,
        }),
        _ => None,
    }
}

/// Resolves a possibly-relative URL reference against a base URL.
///
/// Handles the three shapes device descriptions use: absolute URLs,
/// host-relative paths ("/ctl/ContentDir"), and document-relative paths.
pub(crate) fn resolve_url(base: &str, reference: &str) -> String {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return reference.to_string();
    }

    // Index of the first '/' after "scheme://", i.e. the end of the authority
    let authority_end = base
        .find("://")
        .map(|i| {
            base[i + 3..]
                .find('/')
                .map(|j| i + 3 + j)
                .unwrap_or(base.len())
        })
        .unwrap_or(base.len());

    if let Some(stripped) = reference.strip_prefix('/') {
        return format!("{}/{}", &base[..authority_end], stripped);
    }

    match base.rfind('/') {
        Some(idx) if idx > authority_end => format!("{}/{}", &base[..idx], reference),
        _ => format!("{}/{}", &base[..authority_end], reference),
    }
}
