//! ContentDirectory Browse action.
//!
//! Wraps the SOAP Browse call and its paged result handling. Servers cap
//! how many children one Browse may return, so full listings walk the
//! directory in pages until TotalMatches is reached.

use reqwest::Client;

use super::didl::{parse_didl, DidlObject};
use super::retry::with_retry;
use super::soap::{send_soap_request, SoapError, SoapResult};
use crate::utils::extract_xml_text;

/// Service URN of the ContentDirectory service.
pub const CONTENT_DIRECTORY_URN: &str = "urn:schemas-upnp-org:service:ContentDirectory:1";

/// Children requested per Browse call. Small enough that even slow NAS
/// boxes answer within the SOAP timeout.
const BROWSE_PAGE_SIZE: u64 = 200;

/// One page of a Browse result.
#[derive(Debug)]
pub struct BrowsePage {
    /// Parsed DIDL objects of this page.
    pub objects: Vec<DidlObject>,
    /// NumberReturned reported by the server.
    pub number_returned: u64,
    /// TotalMatches reported by the server. Zero means unknown on some
    /// servers, so it cannot be trusted as "empty" on the first page.
    pub total_matches: u64,
}

/// Browses the direct children of a container object.
///
/// Transient faults (server busy scanning) are retried with backoff.
pub async fn browse_children(
    client: &Client,
    control_url: &str,
    object_id: &str,
    starting_index: u64,
    requested_count: u64,
) -> SoapResult<BrowsePage> {
    let starting_index = starting_index.to_string();
    let requested_count = requested_count.to_string();
    let args = [
        ("ObjectID", object_id),
        ("BrowseFlag", "BrowseDirectChildren"),
        ("Filter", "*"),
        ("StartingIndex", starting_index.as_str()),
        ("RequestedCount", requested_count.as_str()),
        ("SortCriteria", ""),
    ];

    let response = with_retry("Browse", || {
        send_soap_request(client, control_url, CONTENT_DIRECTORY_URN, "Browse", &args)
    })
    .await?;

    parse_browse_response(&response)
}

/// Browses all children of a container, following pages until complete.
pub async fn browse_all_children(
    client: &Client,
    control_url: &str,
    object_id: &str,
) -> SoapResult<Vec<DidlObject>> {
    let mut all = Vec::new();
    let mut starting_index = 0u64;

    loop {
        let page =
            browse_children(client, control_url, object_id, starting_index, BROWSE_PAGE_SIZE)
                .await?;

        let returned = page.objects.len() as u64;
        all.extend(page.objects);

        // A server that stops returning children ends the walk regardless of
        // what TotalMatches claims, otherwise a lying server would loop us
        if returned == 0 {
            break;
        }

        starting_index += returned;
        if page.total_matches > 0 && starting_index >= page.total_matches {
            break;
        }
        if page.total_matches == 0 && returned < BROWSE_PAGE_SIZE {
            break;
        }
    }

    log::debug!(
        "[Upnp] Browse of {} returned {} object(s)",
        object_id,
        all.len()
    );

    Ok(all)
}

/// Parses a Browse SOAP response envelope into a page.
///
/// The DIDL document arrives XML-escaped inside the `Result` element;
/// extraction unescapes it before the DIDL parse.
pub(crate) fn parse_browse_response(response: &str) -> SoapResult<BrowsePage> {
    let didl = extract_xml_text(response, "Result").ok_or(SoapError::Parse)?;
    let objects = parse_didl(&didl)?;

    let number_returned = extract_xml_text(response, "NumberReturned")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(objects.len() as u64);
    let total_matches = extract_xml_text(response, "TotalMatches")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);

    Ok(BrowsePage {
        objects,
        number_returned,
        total_matches,
    })
}
