//! Low-level SOAP protocol implementation for UPnP communication.
//!
//! This module handles the raw SOAP envelope building, HTTP transport,
//! and fault parsing. For the ContentDirectory Browse action built on top
//! of it, see `content_directory.rs`.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use crate::utils::{escape_xml, extract_xml_text};

/// Timeout for SOAP round trips. Media servers answer Browse well within
/// this on a LAN; anything slower is treated as unreachable.
const SOAP_TIMEOUT_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during SOAP operations with UPnP devices.
#[derive(Debug, Error)]
pub enum SoapError {
    /// HTTP request to the device failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Device returned a non-success HTTP status without a SOAP fault.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// Device returned a SOAP fault response.
    #[error("SOAP fault {code}: {description}")]
    Fault {
        /// UPnP error code (or SOAP faultcode when no UPnPError is present).
        code: String,
        /// Human-readable fault description.
        description: String,
    },

    /// Failed to parse SOAP response XML.
    #[error("Failed to parse SOAP response")]
    Parse,
}

/// Convenient Result alias for SOAP operations.
pub type SoapResult<T> = Result<T, SoapError>;

impl SoapError {
    /// Returns true if this error is transient and the operation should be retried.
    ///
    /// UPnP error 501 (Action Failed) is what most servers return while their
    /// content database is still being scanned, so it is worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            SoapError::Fault { code, description } => {
                code == "501" || description.to_lowercase().contains("busy")
            }
            // Network timeouts can also be transient
            SoapError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SOAP Request/Response
// ─────────────────────────────────────────────────────────────────────────────

/// Sends a SOAP request to a UPnP control URL.
///
/// This is the core transport function for all UPnP SOAP operations.
/// It builds the SOAP envelope, sends the HTTP request, and handles
/// SOAP faults in the response.
///
/// # Arguments
/// * `client` - The HTTP client to use for the request
/// * `control_url` - Absolute control URL resolved from the device description
/// * `service` - The UPnP service URN (e.g., "urn:schemas-upnp-org:service:ContentDirectory:1")
/// * `action` - The SOAP action name (e.g., "Browse")
/// * `args` - Key-value pairs for action arguments (order is preserved)
///
/// # Returns
/// The response body on success, or a `SoapError` if the request fails
/// or the device returns a SOAP fault.
pub async fn send_soap_request(
    client: &Client,
    control_url: &str,
    service: &str,
    action: &str,
    args: &[(&str, &str)],
) -> SoapResult<String> {
    // Build SOAP envelope - must be a single line with no leading whitespace
    // Some SOAP parsers reject XML with whitespace before the root element
    let mut body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{} xmlns:u="{}">"#,
        action, service
    );

    for (k, v) in args {
        // Escape all XML special characters (& < > " ')
        body.push_str(&format!("<{k}>{}</{k}>", escape_xml(v)));
    }

    body.push_str(&format!(r#"</u:{}></s:Body></s:Envelope>"#, action));

    log::debug!("[Soap] {} -> {} (body: {} bytes)", action, control_url, body.len());
    log::trace!("[Soap] Request body: {}", body);

    let start = std::time::Instant::now();
    let res = client
        .post(control_url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", format!("\"{}#{}\"", service, action))
        .body(body)
        .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
        .send()
        .await;

    log::debug!(
        "[Soap] {} completed in {:?}: {:?}",
        action,
        start.elapsed(),
        res.as_ref().map(|r| r.status())
    );

    let res = res?;

    let status = res.status();
    let response_text = res.text().await?;

    // Check for SOAP fault in response (can occur even on 500 status)
    if response_text.contains("<s:Fault>") || response_text.contains("<soap:Fault>") {
        let (code, description) = parse_soap_fault(&response_text);
        return Err(SoapError::Fault { code, description });
    }

    // Check HTTP status after SOAP fault check (SOAP faults may come with 500 status)
    if !status.is_success() {
        return Err(SoapError::HttpStatus(status.as_u16(), response_text));
    }

    Ok(response_text)
}

/// Extracts (code, description) from a SOAP fault response.
///
/// UPnP devices wrap their error in a `<UPnPError>` detail element with
/// `errorCode`/`errorDescription`; plain SOAP stacks only supply
/// `faultcode`/`faultstring`. Both shapes are handled.
pub(crate) fn parse_soap_fault(xml: &str) -> (String, String) {
    let code = extract_xml_text(xml, "errorCode")
        .or_else(|| extract_xml_text(xml, "faultcode"))
        .unwrap_or_else(|| "unknown".to_string());
    let description = extract_xml_text(xml, "errorDescription")
        .or_else(|| extract_xml_text(xml, "faultstring"))
        .unwrap_or_else(|| "Unknown SOAP fault".to_string());
    (code, description)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPNP_FAULT: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <s:Fault>
      <faultcode>s:Client</faultcode>
      <faultstring>UPnPError</faultstring>
      <detail>
        <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
          <errorCode>701</errorCode>
          <errorDescription>No such object</errorDescription>
        </UPnPError>
      </detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;

    #[test]
    fn fault_prefers_upnp_error_detail() {
        let (code, description) = parse_soap_fault(UPNP_FAULT);
        assert_eq!(code, "701");
        assert_eq!(description, "No such object");
    }

    #[test]
    fn fault_falls_back_to_faultstring() {
        let xml = "<s:Fault><faultcode>s:Server</faultcode>\
                   <faultstring>Out of memory</faultstring></s:Fault>";
        let (code, description) = parse_soap_fault(xml);
        assert_eq!(code, "s:Server");
        assert_eq!(description, "Out of memory");
    }

    #[test]
    fn action_failed_is_transient() {
        let err = SoapError::Fault {
            code: "501".to_string(),
            description: "Action Failed".to_string(),
        };
        assert!(err.is_transient());

        let err = SoapError::Fault {
            code: "701".to_string(),
            description: "No such object".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn busy_description_is_transient() {
        let err = SoapError::Fault {
            code: "720".to_string(),
            description: "Server busy, rescanning".to_string(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn parse_and_status_errors_are_permanent() {
        assert!(!SoapError::Parse.is_transient());
        assert!(!SoapError::HttpStatus(404, "not found".to_string()).is_transient());
    }
}
