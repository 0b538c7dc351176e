//! Reachability probe run before a browser is launched

use crate::config::Credentials;
use crate::{Error, Result};
use base64::Engine as Base64Engine;
use log::debug;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;

/// `Basic <base64(user:password)>`
pub fn basic_auth_header(credentials: &Credentials) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(credentials.joined());
    format!("Basic {}", encoded)
}

/// GET the target with credentials; it must answer 2xx with an HTML body.
pub fn check_target(url: &str, credentials: &Credentials, timeout: Duration) -> Result<()> {
    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::RenderFailure(format!("Failed to build HTTP client: {}", e)))?;

    let response = client
        .get(url)
        .header(AUTHORIZATION, basic_auth_header(credentials))
        .send()
        .map_err(|e| Error::UnreachableTarget(format!("{}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::UnreachableTarget(format!(
            "Unable to access URL. HTTP status: {}",
            status.as_u16()
        )));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    debug!("probe {} -> {} ({})", url, status, content_type);

    if !content_type.to_ascii_lowercase().contains("text/html") {
        return Err(Error::InvalidTarget(format!(
            "expected an HTML page, got content type '{}'",
            content_type
        )));
    }

    Ok(())
}
