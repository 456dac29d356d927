//! Add-on metadata model.
//!
//! [`AddonInfo`] is the unit the whole subsystem trades in: parsed from
//! addon.xml, stored as the database's JSON blob, and served over the API.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::version::AddonVersion;

/// Extension point that carries descriptive metadata rather than a
/// functional role. It never decides an add-on's type.
pub const METADATA_EXTENSION_POINT: &str = "halcyon.addon.metadata";

/// Platform tag matching `<platform>` entries in addon.xml.
#[cfg(target_os = "linux")]
pub(crate) const PLATFORM_TAG: &str = "linux";
#[cfg(target_os = "macos")]
pub(crate) const PLATFORM_TAG: &str = "osx";
#[cfg(target_os = "windows")]
pub(crate) const PLATFORM_TAG: &str = "windx";
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub(crate) const PLATFORM_TAG: &str = "unknown";

/// Functional role of an add-on, decided by its first non-metadata
/// extension point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddonType {
    Visualization,
    Screensaver,
    PvrClient,
    Repository,
    VfsProvider,
    /// Extension point this build does not know about; kept verbatim so
    /// it survives a database round-trip.
    Unknown(String),
}

impl AddonType {
    /// The extension point string for this type.
    pub fn extension_point(&self) -> &str {
        match self {
            Self::Visualization => "halcyon.player.visualization",
            Self::Screensaver => "halcyon.ui.screensaver",
            Self::PvrClient => "halcyon.pvr.client",
            Self::Repository => "halcyon.addon.repository",
            Self::VfsProvider => "halcyon.vfs.provider",
            Self::Unknown(point) => point,
        }
    }

    /// Maps an extension point string back to a type.
    pub fn from_extension_point(point: &str) -> Self {
        match point {
            "halcyon.player.visualization" => Self::Visualization,
            "halcyon.ui.screensaver" => Self::Screensaver,
            "halcyon.pvr.client" => Self::PvrClient,
            "halcyon.addon.repository" => Self::Repository,
            "halcyon.vfs.provider" => Self::VfsProvider,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for AddonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension_point())
    }
}

impl Serialize for AddonType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.extension_point())
    }
}

impl<'de> Deserialize<'de> for AddonType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let point = String::deserialize(deserializer)?;
        Ok(Self::from_extension_point(&point))
    }
}

/// A declared dependency on another add-on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonDependency {
    /// Identifier of the required add-on.
    pub id: String,

    /// Minimum acceptable version, when declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<AddonVersion>,

    /// Optional dependencies never block installation or disabling.
    #[serde(default)]
    pub optional: bool,
}

/// Complete metadata for one add-on.
///
/// This struct is the database's JSON blob, so unknown future fields
/// must deserialize without loss of the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonInfo {
    pub id: String,
    pub name: String,
    pub version: AddonVersion,
    pub addon_type: AddonType,

    /// Author or maintainer, from `provider-name`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub license: String,

    /// Platform tags from `<platform>`; empty means unrestricted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,

    /// Shared library filename resolved for the current platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,

    /// Repository id this metadata came from; None for local installs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<AddonDependency>,

    /// Metadata elements with no dedicated field (news, forum, website).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl AddonInfo {
    /// Whether this add-on runs on the current platform.
    pub fn supports_current_platform(&self) -> bool {
        supports_platform(&self.platforms, PLATFORM_TAG)
    }
}

pub(crate) fn supports_platform(platforms: &[String], tag: &str) -> bool {
    platforms.is_empty() || platforms.iter().any(|p| p == "all" || p == tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_points_round_trip() {
        let types = [
            AddonType::Visualization,
            AddonType::Screensaver,
            AddonType::PvrClient,
            AddonType::Repository,
            AddonType::VfsProvider,
            AddonType::Unknown("halcyon.future.thing".to_string()),
        ];
        for t in types {
            assert_eq!(AddonType::from_extension_point(t.extension_point()), t);
        }
    }

    #[test]
    fn platform_gating_honors_all_and_empty() {
        let none: Vec<String> = vec![];
        assert!(supports_platform(&none, "linux"));

        let all = vec!["all".to_string()];
        assert!(supports_platform(&all, "linux"));

        let linux_only = vec!["linux".to_string()];
        assert!(supports_platform(&linux_only, "linux"));
        assert!(!supports_platform(&linux_only, "osx"));

        let desktop = vec!["osx".to_string(), "windx".to_string()];
        assert!(!supports_platform(&desktop, "linux"));
    }

    #[test]
    fn info_survives_a_json_round_trip() {
        let info = AddonInfo {
            id: "visualization.waveform".to_string(),
            name: "Waveform".to_string(),
            version: "1.2.0".parse().unwrap(),
            addon_type: AddonType::Visualization,
            provider: "Team Halcyon".to_string(),
            summary: "Waveform visualization".to_string(),
            description: String::new(),
            license: "GPL-2.0".to_string(),
            platforms: vec!["linux".to_string(), "osx".to_string()],
            library: Some("waveform.so".to_string()),
            origin: Some("repository.main".to_string()),
            dependencies: vec![AddonDependency {
                id: "halcyon.player".to_string(),
                min_version: Some("2.0".parse().unwrap()),
                optional: false,
            }],
            extra: BTreeMap::from([("news".to_string(), "Initial release".to_string())]),
        };

        let json = serde_json::to_string(&info).unwrap();
        let back: AddonInfo = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, info.id);
        assert_eq!(back.version, info.version);
        assert_eq!(back.addon_type, AddonType::Visualization);
        assert_eq!(back.dependencies.len(), 1);
        assert_eq!(back.extra.get("news").map(String::as_str), Some("Initial release"));
    }

    #[test]
    fn blob_fields_use_camel_case() {
        let info = AddonInfo {
            id: "a".to_string(),
            name: "A".to_string(),
            version: "1.0".parse().unwrap(),
            addon_type: AddonType::Repository,
            provider: String::new(),
            summary: String::new(),
            description: String::new(),
            license: String::new(),
            platforms: vec![],
            library: None,
            origin: None,
            dependencies: vec![],
            extra: BTreeMap::new(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["addonType"], "halcyon.addon.repository");
        assert!(json.get("library").is_none());
    }
}
