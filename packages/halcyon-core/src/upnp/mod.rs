//! UPnP AV client support.
//!
//! Discovery runs over SSDP (multicast and directed broadcast), device
//! descriptions are fetched and parsed for ContentDirectory endpoints, and
//! browsing goes through SOAP with bounded retries. The registry keeps the
//! live set of media servers current in the background.

pub mod content_directory;
pub mod description;
pub mod didl;
pub mod registry;
pub(crate) mod retry;
pub mod soap;
pub mod ssdp;

pub use content_directory::{browse_all_children, BrowsePage, CONTENT_DIRECTORY_URN};
pub use description::{fetch_description, DeviceDescription};
pub use didl::{DidlObject, DidlResource};
pub use registry::{MediaServer, MediaServerRegistry, MEDIA_SERVER_TARGET};
pub use soap::{SoapError, SoapResult};
pub use ssdp::{DiscoveryError, DiscoveryResult, SsdpConfig, SsdpResponse};
