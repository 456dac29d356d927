//! addon.xml and repository index ingestion.
//!
//! An addon.xml document carries identity attributes on the root `<addon>`
//! element, dependencies under `<requires>`, and one `<extension>` per role.
//! The first extension that is not the metadata one decides the add-on's
//! type; the metadata extension contributes the descriptive fields.
//! Repository indexes wrap many `<addon>` elements in `<addons>`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use thiserror::Error;

use super::info::{AddonDependency, AddonInfo, AddonType, METADATA_EXTENSION_POINT, PLATFORM_TAG};
use super::version::VersionError;
use crate::utils::get_xml_attr;

/// Errors from addon.xml parsing.
#[derive(Debug, Error)]
pub enum AddonXmlError {
    /// The document is not well-formed XML.
    #[error("malformed addon XML: {0}")]
    Malformed(String),

    /// The document contains no `<addon>` element.
    #[error("document contains no <addon> element")]
    NoAddon,

    /// A required `<addon>` attribute is absent.
    #[error("<addon> element missing attribute {0:?}")]
    MissingAttribute(&'static str),

    /// The version attribute did not parse.
    #[error("invalid addon version: {0}")]
    Version(#[from] VersionError),
}

/// Attributes and children collected while consuming one `<addon>`
/// element. Validation happens afterwards so a bad entry leaves the
/// reader positioned cleanly after its end tag.
#[derive(Default)]
struct RawAddon {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    provider: String,
    addon_type: Option<AddonType>,
    library: Option<String>,
    summary: String,
    description: String,
    license: String,
    platforms: Vec<String>,
    dependencies: Vec<AddonDependency>,
    extra: std::collections::BTreeMap<String, String>,
}

impl RawAddon {
    fn from_attrs(e: &BytesStart) -> Self {
        Self {
            id: get_xml_attr(e, b"id"),
            name: get_xml_attr(e, b"name"),
            version: get_xml_attr(e, b"version"),
            provider: get_xml_attr(e, b"provider-name").unwrap_or_default(),
            ..Self::default()
        }
    }

    fn finish(self) -> Result<AddonInfo, AddonXmlError> {
        let id = self.id.ok_or(AddonXmlError::MissingAttribute("id"))?;
        let name = self.name.ok_or(AddonXmlError::MissingAttribute("name"))?;
        let version = self
            .version
            .ok_or(AddonXmlError::MissingAttribute("version"))?
            .parse()?;

        Ok(AddonInfo {
            id,
            name,
            version,
            addon_type: self
                .addon_type
                .unwrap_or_else(|| AddonType::Unknown("unknown".to_string())),
            provider: self.provider,
            summary: self.summary,
            description: self.description,
            license: self.license,
            platforms: self.platforms,
            library: self.library,
            origin: None,
            dependencies: self.dependencies,
            extra: self.extra,
        })
    }
}

/// Parses a single addon.xml document.
pub fn parse_addon_xml(xml: &str) -> Result<AddonInfo, AddonXmlError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"addon" => {
                let raw = read_addon_element(&mut reader, e)?;
                return raw.finish();
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"addon" => {
                return RawAddon::from_attrs(e).finish();
            }
            Ok(Event::Eof) => return Err(AddonXmlError::NoAddon),
            Err(e) => return Err(AddonXmlError::Malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

/// Parses a repository addons.xml index.
///
/// Entries that fail validation are skipped with a warning; one bad entry
/// must not poison the whole repository.
pub fn parse_repository_xml(xml: &str) -> Result<Vec<AddonInfo>, AddonXmlError> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut addons = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"addon" => {
                let raw = read_addon_element(&mut reader, e)?;
                match raw.finish() {
                    Ok(info) => addons.push(info),
                    Err(err) => log::warn!("[Addons] Skipping repository entry: {}", err),
                }
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"addon" => {
                match RawAddon::from_attrs(e).finish() {
                    Ok(info) => addons.push(info),
                    Err(err) => log::warn!("[Addons] Skipping repository entry: {}", err),
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(AddonXmlError::Malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(addons)
}

/// Consumes one `<addon>` element through its end tag.
///
/// Only well-formedness errors propagate from here; field validation is
/// deferred to [`RawAddon::finish`].
fn read_addon_element(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<RawAddon, AddonXmlError> {
    let mut raw = RawAddon::from_attrs(start);
    let mut buf = Vec::new();
    // Point of the extension whose children are currently being read
    let mut in_extension: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"extension" => {
                    let point = get_xml_attr(e, b"point").unwrap_or_default();
                    apply_extension_attrs(&mut raw, e, &point);
                    in_extension = Some(point);
                }
                b"requires" => {}
                b"import" => push_dependency(&mut raw, e),
                child => {
                    if let Some(point) = &in_extension {
                        let element = String::from_utf8_lossy(child).to_string();
                        let text = reader
                            .read_text(e.name())
                            .map_err(|e| AddonXmlError::Malformed(e.to_string()))?;
                        let decoded = html_escape::decode_html_entities(&text);
                        apply_extension_child(&mut raw, point, &element, decoded.trim());
                    }
                }
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"extension" => {
                    let point = get_xml_attr(e, b"point").unwrap_or_default();
                    apply_extension_attrs(&mut raw, e, &point);
                }
                b"import" => push_dependency(&mut raw, e),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"addon" => return Ok(raw),
                b"extension" => in_extension = None,
                _ => {}
            },
            Ok(Event::Eof) => {
                return Err(AddonXmlError::Malformed(
                    "unexpected end of document inside <addon>".to_string(),
                ))
            }
            Err(e) => return Err(AddonXmlError::Malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

/// Applies an `<extension>` element's own attributes: the first
/// non-metadata point decides the type and resolves the platform library.
fn apply_extension_attrs(raw: &mut RawAddon, e: &BytesStart, point: &str) {
    if point == METADATA_EXTENSION_POINT || raw.addon_type.is_some() {
        return;
    }

    raw.addon_type = Some(AddonType::from_extension_point(point));

    let platform_attr = format!("library_{}", PLATFORM_TAG);
    raw.library = get_xml_attr(e, platform_attr.as_bytes())
        .or_else(|| get_xml_attr(e, b"library"));
}

/// Folds one extension child element into the raw add-on.
fn apply_extension_child(raw: &mut RawAddon, point: &str, element: &str, text: &str) {
    if point == METADATA_EXTENSION_POINT {
        match element {
            "summary" => raw.summary = text.to_string(),
            "description" => raw.description = text.to_string(),
            "license" => raw.license = text.to_string(),
            "platform" => {
                raw.platforms = text.split_whitespace().map(str::to_string).collect();
            }
            other => insert_extra(raw, other, text),
        }
    } else {
        insert_extra(raw, element, text);
    }
}

/// Simple (text-only) elements land in `extra`; anything with nested
/// markup is not metadata and is dropped.
fn insert_extra(raw: &mut RawAddon, element: &str, text: &str) {
    if !text.is_empty() && !text.contains('<') {
        raw.extra.insert(element.to_string(), text.to_string());
    }
}

fn push_dependency(raw: &mut RawAddon, e: &BytesStart) {
    let Some(id) = get_xml_attr(e, b"addon") else {
        return;
    };
    let min_version = get_xml_attr(e, b"version").and_then(|v| v.parse().ok());
    let optional = matches!(
        get_xml_attr(e, b"optional").as_deref(),
        Some("true") | Some("1")
    );
    raw.dependencies.push(AddonDependency {
        id,
        min_version,
        optional,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAVEFORM_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<addon id="visualization.waveform" name="Waveform" version="1.2.0" provider-name="Team Halcyon">
  <requires>
    <import addon="halcyon.player" version="2.0"/>
    <import addon="screensaver.shader" optional="true"/>
  </requires>
  <extension point="halcyon.player.visualization"
             library_linux="waveform.so"
             library_osx="waveform.dylib"
             library_windx="waveform.dll"/>
  <extension point="halcyon.addon.metadata">
    <summary>Waveform visualization</summary>
    <description>Draws the audio waveform.</description>
    <license>GPL-2.0</license>
    <platform>linux osx windx</platform>
    <news>Initial release</news>
  </extension>
</addon>"#;

    const REPOSITORY_ADDON_XML: &str = r#"<addon id="repository.main" name="Main Repository" version="1.0.0">
  <extension point="halcyon.addon.repository">
    <datadir>http://mirror.example.org/addons</datadir>
    <checksum>http://mirror.example.org/addons/addons.xml.md5</checksum>
  </extension>
  <extension point="halcyon.addon.metadata">
    <summary>The main add-on repository</summary>
  </extension>
</addon>"#;

    #[test]
    fn parses_identity_and_dependencies() {
        let info = parse_addon_xml(WAVEFORM_XML).unwrap();

        assert_eq!(info.id, "visualization.waveform");
        assert_eq!(info.name, "Waveform");
        assert_eq!(info.version.to_string(), "1.2.0");
        assert_eq!(info.provider, "Team Halcyon");
        assert_eq!(info.addon_type, AddonType::Visualization);

        assert_eq!(info.dependencies.len(), 2);
        assert_eq!(info.dependencies[0].id, "halcyon.player");
        assert!(!info.dependencies[0].optional);
        assert_eq!(
            info.dependencies[0].min_version.as_ref().unwrap().to_string(),
            "2.0"
        );
        assert!(info.dependencies[1].optional);
    }

    #[test]
    fn metadata_extension_fills_descriptive_fields() {
        let info = parse_addon_xml(WAVEFORM_XML).unwrap();

        assert_eq!(info.summary, "Waveform visualization");
        assert_eq!(info.description, "Draws the audio waveform.");
        assert_eq!(info.license, "GPL-2.0");
        assert_eq!(info.platforms, vec!["linux", "osx", "windx"]);
        assert_eq!(
            info.extra.get("news").map(String::as_str),
            Some("Initial release")
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn library_resolves_for_the_current_platform() {
        let info = parse_addon_xml(WAVEFORM_XML).unwrap();
        assert_eq!(info.library.as_deref(), Some("waveform.so"));
    }

    #[test]
    fn repository_extension_children_land_in_extra() {
        let info = parse_addon_xml(REPOSITORY_ADDON_XML).unwrap();

        assert_eq!(info.addon_type, AddonType::Repository);
        assert_eq!(
            info.extra.get("datadir").map(String::as_str),
            Some("http://mirror.example.org/addons")
        );
        assert_eq!(info.summary, "The main add-on repository");
    }

    #[test]
    fn missing_identity_attributes_are_errors() {
        let err = parse_addon_xml(r#"<addon name="X" version="1.0"/>"#).unwrap_err();
        assert!(matches!(err, AddonXmlError::MissingAttribute("id")));

        let err = parse_addon_xml(r#"<addon id="x" name="X" version="not a # version:"/>"#)
            .unwrap_err();
        assert!(matches!(err, AddonXmlError::Version(_)));

        let err = parse_addon_xml("<other/>").unwrap_err();
        assert!(matches!(err, AddonXmlError::NoAddon));
    }

    #[test]
    fn repository_index_skips_bad_entries() {
        let xml = r#"<addons>
  <addon id="good.one" name="Good" version="1.0.0">
    <extension point="halcyon.ui.screensaver" library_linux="good.so"/>
  </addon>
  <addon name="No Id" version="1.0.0"/>
  <addon id="good.two" name="Also Good" version="2.0.0">
    <extension point="halcyon.pvr.client"/>
  </addon>
</addons>"#;

        let addons = parse_repository_xml(xml).unwrap();
        let ids: Vec<&str> = addons.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["good.one", "good.two"]);
        assert_eq!(addons[1].addon_type, AddonType::PvrClient);
    }

    #[test]
    fn malformed_xml_is_fatal() {
        assert!(matches!(
            parse_repository_xml("<addons><addon id=\"x\""),
            Err(AddonXmlError::Malformed(_))
        ));
    }

    #[test]
    fn entities_in_metadata_are_decoded() {
        let xml = r#"<addon id="a.b" name="A" version="1.0">
  <extension point="halcyon.addon.metadata">
    <summary>Tom &amp; Jerry</summary>
  </extension>
</addon>"#;
        let info = parse_addon_xml(xml).unwrap();
        assert_eq!(info.summary, "Tom & Jerry");
    }
}
