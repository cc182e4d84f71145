//! reqwest-backed transport

use crate::error::FetchError;
use crate::proxy::ProxyAddress;
use crate::transport::{ConnectionPool, PoolKey, TlsMode, Transport};
use crate::types::{HttpMethod, HttpResponse, Request};
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use std::time::Duration;
use tracing::debug;

/// Connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout (between bytes of the response)
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings applied to every pooled client
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Transport that sends requests with pooled reqwest clients
///
/// One client is kept per (proxy, TLS mode). Clients never follow
/// redirects and never decompress, so `Content-Length` describes the bytes
/// that will actually be read.
#[derive(Debug, Default)]
pub struct ReqwestTransport {
    settings: ClientSettings,
    pool: ConnectionPool<reqwest::Client>,
}

impl ReqwestTransport {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            pool: ConnectionPool::new(),
        }
    }

    pub fn pool(&self) -> &ConnectionPool<reqwest::Client> {
        &self.pool
    }

    fn build_client(
        &self,
        proxy: Option<&ProxyAddress>,
        tls: TlsMode,
    ) -> Result<reqwest::Client, FetchError> {
        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .connect_timeout(self.settings.connect_timeout)
            .read_timeout(self.settings.read_timeout);

        builder = match proxy {
            Some(proxy) => builder.proxy(
                reqwest::Proxy::all(proxy.to_url()).map_err(FetchError::ClientBuildError)?,
            ),
            None => builder.no_proxy(),
        };

        if tls == TlsMode::Legacy {
            builder = builder
                .danger_accept_invalid_certs(true)
                .max_tls_version(reqwest::tls::Version::TLS_1_2);
        }

        builder.build().map_err(FetchError::ClientBuildError)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn name(&self) -> &'static str {
        "reqwest"
    }

    async fn execute(&self, request: &Request, tls: TlsMode) -> Result<HttpResponse, FetchError> {
        let key = PoolKey::new(request.proxy_address().cloned(), tls);
        let client = self
            .pool
            .checkout(&key, || self.build_client(request.proxy_address(), tls))?;

        let method = match request.http_method() {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
        };
        let mut http_request = client.request(method, request.url().clone());
        for (name, value) in request.additional_headers() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| FetchError::InvalidHeader(name.clone()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| FetchError::InvalidHeader(name.clone()))?;
            http_request = http_request.header(header_name, header_value);
        }

        debug!(url = %request.url(), method = %request.http_method(), ?tls, "Sending request");
        let response = self
            .pool
            .lease(&key, http_request.send())
            .await
            .map_err(FetchError::from_reqwest)?;
        debug!(url = %request.url(), status = response.status().as_u16(), "Response head received");

        Ok(HttpResponse::from_reqwest(response))
    }
}
