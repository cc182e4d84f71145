//! Error types for FetchProbe

use std::error::Error as StdError;
use thiserror::Error;

/// Errors that can occur during fetch operations
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL is missing
    #[error("Missing required parameter: url")]
    MissingUrl,

    /// URL has invalid scheme
    #[error("Invalid URL: must start with http:// or https://")]
    InvalidUrlScheme,

    /// The initial URL or a Location header could not be parsed
    #[error("Malformed URL: {0}")]
    MalformedUrl(String),

    /// A request header name or value cannot be sent over HTTP
    #[error("Invalid request header: {0}")]
    InvalidHeader(String),

    /// Session options are inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to build HTTP client
    #[error("Failed to create HTTP client")]
    ClientBuildError(#[source] reqwest::Error),

    /// Request timed out while connecting or waiting for the response head
    #[error("Request timed out")]
    Timeout(#[source] reqwest::Error),

    /// Failed to connect to server
    #[error("Failed to connect to server")]
    ConnectError(#[source] reqwest::Error),

    /// Peer certificate could not be verified
    #[error("TLS certificate verification failed")]
    TlsVerification(#[source] reqwest::Error),

    /// Other transport failure
    #[error("Request failed: {0}")]
    RequestError(String),

    /// Redirect budget exhausted
    #[error("Too many redirects for {url}")]
    TooManyRedirects {
        /// The redirect target that was not followed
        url: String,
    },

    /// PAC script could not be fetched, evaluated or understood
    #[error("Proxy resolution failed: {0}")]
    ProxyResolution(String),

    /// Response body could not be read
    #[error("Failed to read response body: {0}")]
    Body(String),

    /// Every attempt of a retried operation failed
    #[error("Giving up after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: usize,
        /// Failure of the last attempt
        #[source]
        source: Box<FetchError>,
    },
}

impl FetchError {
    /// Create an error from a reqwest error
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if is_certificate_error(&err) {
            FetchError::TlsVerification(err)
        } else if err.is_timeout() {
            FetchError::Timeout(err)
        } else if err.is_connect() {
            FetchError::ConnectError(err)
        } else {
            FetchError::RequestError(err.to_string())
        }
    }

    /// True for peer certificate verification failures
    pub fn is_tls_verification(&self) -> bool {
        matches!(self, FetchError::TlsVerification(_))
    }
}

/// Walks the source chain looking for a certificate rejection.
///
/// reqwest does not expose TLS failures as a distinct kind, so the
/// rustls/hyper error text is the only signal available.
fn is_certificate_error(err: &reqwest::Error) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = current {
        let message = cause.to_string().to_lowercase();
        if message.contains("certificate") || message.contains("unknownissuer") {
            return true;
        }
        current = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            FetchError::MissingUrl.to_string(),
            "Missing required parameter: url"
        );
        assert_eq!(
            FetchError::InvalidUrlScheme.to_string(),
            "Invalid URL: must start with http:// or https://"
        );
        assert_eq!(
            FetchError::TooManyRedirects {
                url: "http://example.com/loop".to_string()
            }
            .to_string(),
            "Too many redirects for http://example.com/loop"
        );
        assert_eq!(
            FetchError::ProxyResolution("bad directive".to_string()).to_string(),
            "Proxy resolution failed: bad directive"
        );
    }

    #[test]
    fn test_retries_exhausted_keeps_last_error() {
        let err = FetchError::RetriesExhausted {
            attempts: 3,
            source: Box::new(FetchError::MalformedUrl("::".to_string())),
        };
        assert_eq!(err.to_string(), "Giving up after 3 attempts");
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Malformed URL: ::"));
    }
}
