//! Convenience entry points for FetchProbe
//!
//! Each function builds a throwaway [`FetchSession`] from [`FetchOptions`].
//! Keep a session around instead when probing several URLs, so the
//! connection pool and the PAC cache are shared.

use crate::error::FetchError;
use crate::materialize::DEFAULT_BODY_TIMEOUT;
use crate::proxy::ProxyConfig;
use crate::redirect::MAX_REDIRECTS;
use crate::retry::DEFAULT_ATTEMPTS;
use crate::session::FetchSession;
use crate::transport::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use crate::types::{Document, DownloadInfo};
use std::collections::HashMap;
use std::time::Duration;

/// Fetch options that can be configured via the session builder
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Follow 3xx responses
    pub redirects_enabled: bool,
    /// Follow 308 Permanent Redirect as well
    pub redirect_308: bool,
    /// Redirect hop budget
    pub max_redirects: usize,
    /// Retry once with certificate checks off on verification failure
    pub insecure_tls: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Overall limit for reading a body
    pub body_timeout: Duration,
    pub proxy: ProxyConfig,
    /// Custom User-Agent
    pub user_agent: Option<String>,
    /// "Get info" attempts
    pub attempts: usize,
    /// Pause between "get info" attempts
    pub retry_delay: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            redirects_enabled: true,
            redirect_308: true,
            max_redirects: MAX_REDIRECTS,
            insecure_tls: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            body_timeout: DEFAULT_BODY_TIMEOUT,
            proxy: ProxyConfig::Direct,
            user_agent: None,
            attempts: DEFAULT_ATTEMPTS,
            retry_delay: Duration::ZERO,
        }
    }
}

/// Probe `url` with default options
///
/// Returns `None` if the URL is invalid or every attempt failed.
pub async fn get_info(url: &str) -> Option<DownloadInfo> {
    get_info_with_options(url, &HashMap::new(), FetchOptions::default()).await
}

/// Probe `url` sending `headers`, with custom options
pub async fn get_info_with_options(
    url: &str,
    headers: &HashMap<String, String>,
    options: FetchOptions,
) -> Option<DownloadInfo> {
    let session = match FetchSession::builder().options(options).build() {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "Invalid fetch options");
            return None;
        }
    };
    session.get_info(url, headers).await
}

/// Announced `Content-Length` of `url`
pub async fn content_length(url: &str) -> Option<u64> {
    get_info(url).await.and_then(|info| info.content_length())
}

/// Probe `url` and read its body
pub async fn download(url: &str, options: FetchOptions) -> Result<Document, FetchError> {
    let session = FetchSession::builder().options(options).build()?;
    let request = session.recreate_request(url, &HashMap::new())?;
    let info = session.try_get_info(request).await?;
    session.download(info).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_info_empty_url() {
        assert!(get_info("").await.is_none());
    }

    #[tokio::test]
    async fn test_download_invalid_scheme() {
        let result = download("ftp://example.com", FetchOptions::default()).await;
        assert!(matches!(result, Err(FetchError::InvalidUrlScheme)));
    }

    #[tokio::test]
    async fn test_download_missing_url() {
        let result = download("", FetchOptions::default()).await;
        assert!(matches!(result, Err(FetchError::MissingUrl)));
    }

    #[test]
    fn test_fetch_options_default() {
        let options = FetchOptions::default();
        assert!(options.redirects_enabled);
        assert!(options.redirect_308);
        assert!(!options.insecure_tls);
        assert_eq!(options.max_redirects, 20);
        assert_eq!(options.attempts, 25);
        assert!(options.user_agent.is_none());
        assert!(matches!(options.proxy, ProxyConfig::Direct));
    }
}
