use reqwest::Url;

use crate::error::PushError;

pub fn validate_endpoint(endpoint: &str, allow_insecure: bool) -> Result<Url, PushError> {
    if endpoint.is_empty() {
        return Err(PushError::InvalidEndpoint("Endpoint cannot be empty".to_string()));
    }

    let url = Url::parse(endpoint)
        .map_err(|e| PushError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

    match url.scheme() {
        "https" => {}
        "http" if allow_insecure => {}
        scheme => {
            return Err(PushError::InvalidEndpoint(format!(
                "Unsupported scheme '{}' in {}",
                scheme, endpoint
            )));
        }
    }

    if url.host_str().is_none() {
        return Err(PushError::InvalidEndpoint(format!("Missing host in {}", endpoint)));
    }

    Ok(url)
}

/// Scheme, host and non-default port of a push endpoint, used as the VAPID audience.
pub fn audience(url: &Url) -> String {
    url.origin().ascii_serialization()
}
