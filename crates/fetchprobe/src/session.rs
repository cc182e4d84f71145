//! Fetch session: the resolve → inject → fetch → redirect pipeline
//!
//! A [`FetchSession`] owns everything that outlives a single call: the
//! transport with its connection pool, the proxy resolver with its PAC
//! cache, and the collaborators for header injection, body
//! materialization and caching. Build one, then share it.

use crate::client::FetchOptions;
use crate::error::FetchError;
use crate::fetcher::HttpFetcher;
use crate::headers::{HeaderInjector, StandardHeaders};
use crate::materialize::{BodyMaterializer, Materializer, NoCache, ResponseCache};
use crate::proxy::{PacEvaluator, ProxyConfig, ProxyResolver, QuickJsPacEvaluator};
use crate::redirect::{self, RedirectPolicy};
use crate::retry::{with_bounded_retry, RetryPolicy};
use crate::transport::{ClientSettings, ReqwestTransport, Transport};
use crate::types::{DownloadInfo, Document, HttpResponse, Request};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Builder for configuring a [`FetchSession`]
#[derive(Default)]
pub struct FetchSessionBuilder {
    options: FetchOptions,
    evaluator: Option<Arc<dyn PacEvaluator>>,
    headers: Option<Arc<dyn HeaderInjector>>,
    materializer: Option<Arc<dyn Materializer>>,
    cache: Option<Arc<dyn ResponseCache>>,
}

impl FetchSessionBuilder {
    /// Create a builder with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all options at once
    pub fn options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// Follow redirects (default: on)
    pub fn redirects(mut self, enabled: bool) -> Self {
        self.options.redirects_enabled = enabled;
        self
    }

    /// Treat 308 as a redirect (default: on)
    pub fn redirect_308(mut self, enabled: bool) -> Self {
        self.options.redirect_308 = enabled;
        self
    }

    /// Redirect hop budget
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.options.max_redirects = max;
        self
    }

    /// Retry once without certificate checks when verification fails
    pub fn insecure_tls(mut self, enabled: bool) -> Self {
        self.options.insecure_tls = enabled;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.options.read_timeout = timeout;
        self
    }

    pub fn body_timeout(mut self, timeout: Duration) -> Self {
        self.options.body_timeout = timeout;
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.options.proxy = proxy;
        self
    }

    /// Set custom User-Agent
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.options.user_agent = Some(ua.into());
        self
    }

    /// Attempts made by [`FetchSession::get_info`]
    pub fn attempts(mut self, attempts: usize) -> Self {
        self.options.attempts = attempts;
        self
    }

    /// Pause between "get info" attempts
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.options.retry_delay = delay;
        self
    }

    pub fn pac_evaluator(mut self, evaluator: Arc<dyn PacEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn header_injector(mut self, injector: Arc<dyn HeaderInjector>) -> Self {
        self.headers = Some(injector);
        self
    }

    pub fn materializer(mut self, materializer: Arc<dyn Materializer>) -> Self {
        self.materializer = Some(materializer);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build a session on the default reqwest transport
    pub fn build(self) -> Result<FetchSession, FetchError> {
        let transport = ReqwestTransport::new(ClientSettings {
            connect_timeout: self.options.connect_timeout,
            read_timeout: self.options.read_timeout,
        });
        self.build_with_transport(transport)
    }

    /// Build a session on a custom transport
    pub fn build_with_transport<T: Transport>(
        self,
        transport: T,
    ) -> Result<FetchSession<T>, FetchError> {
        let options = self.options;
        let evaluator = self
            .evaluator
            .unwrap_or_else(|| Arc::new(QuickJsPacEvaluator::new()));
        let resolver = ProxyResolver::new(options.proxy.clone(), evaluator)?;

        let headers = self.headers.unwrap_or_else(|| {
            let mut standard = StandardHeaders::new();
            if let Some(ua) = &options.user_agent {
                standard = standard.user_agent(ua.clone());
            }
            Arc::new(standard)
        });

        Ok(FetchSession {
            fetcher: HttpFetcher::new(transport, options.insecure_tls),
            resolver,
            redirects: RedirectPolicy {
                enabled: options.redirects_enabled,
                allow_308: options.redirect_308,
                max_redirects: options.max_redirects,
            },
            retry: RetryPolicy::new(options.attempts).with_delay(options.retry_delay),
            headers,
            materializer: self
                .materializer
                .unwrap_or_else(|| Arc::new(BodyMaterializer::new(options.body_timeout))),
            cache: self.cache.unwrap_or_else(|| Arc::new(NoCache)),
        })
    }
}

/// Headers-first fetcher.
///
/// [`get_info`](Self::get_info) follows redirects and returns as soon as
/// the final response head is in; [`download`](Self::download) reads the
/// body of that same response later.
pub struct FetchSession<T: Transport = ReqwestTransport> {
    fetcher: HttpFetcher<T>,
    resolver: ProxyResolver,
    redirects: RedirectPolicy,
    retry: RetryPolicy,
    headers: Arc<dyn HeaderInjector>,
    materializer: Arc<dyn Materializer>,
    cache: Arc<dyn ResponseCache>,
}

impl<T: Transport> std::fmt::Debug for FetchSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchSession")
            .field("transport", &self.fetcher.transport().name())
            .field("resolver", &self.resolver)
            .field("redirects", &self.redirects)
            .field("retry", &self.retry)
            .finish()
    }
}

impl FetchSession {
    /// Create a new session builder
    pub fn builder() -> FetchSessionBuilder {
        FetchSessionBuilder::new()
    }
}

impl<T: Transport> FetchSession<T> {
    pub fn transport(&self) -> &T {
        self.fetcher.transport()
    }

    pub fn proxy_resolver(&self) -> &ProxyResolver {
        &self.resolver
    }

    pub fn redirect_policy(&self) -> &RedirectPolicy {
        &self.redirects
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Build a GET request for `url` carrying `headers`
    pub fn recreate_request(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Request, FetchError> {
        Ok(Request::parse(url)?.headers(headers.clone()))
    }

    /// Response head for `url`, or `None` if every attempt failed.
    ///
    /// An unparseable `url` yields `None` right away.
    pub async fn get_info(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Option<DownloadInfo> {
        let request = match self.recreate_request(url, headers) {
            Ok(request) => request,
            Err(e) => {
                warn!(url, error = %e, "Not probing invalid URL");
                return None;
            }
        };
        match self.try_get_info(request).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(url, error = %e, "Could not get download info");
                None
            }
        }
    }

    /// Like [`get_info`](Self::get_info), but reports why it failed
    pub async fn try_get_info(&self, request: Request) -> Result<DownloadInfo, FetchError> {
        with_bounded_retry(self.retry, |attempt| {
            let request = request.clone();
            async move {
                debug!(attempt, url = %request.url(), "Probing");
                self.probe(request).await
            }
        })
        .await
        .map_err(|exhausted| FetchError::RetriesExhausted {
            attempts: exhausted.attempts,
            source: Box::new(exhausted.last_error),
        })
    }

    /// One pass through the pipeline, no outer retry
    pub async fn probe(&self, request: Request) -> Result<DownloadInfo, FetchError> {
        let (sent, response) = self.fetch_response(request).await?;
        info!(
            url = %sent.url(),
            status = response.status_code(),
            content_length = ?response.content_length(),
            "Response head received"
        );
        Ok(DownloadInfo::new(sent, response))
    }

    /// Announced `Content-Length` of `url`, if the probe succeeds and the
    /// server sends one
    pub async fn content_length(&self, url: &str, headers: &HashMap<String, String>) -> Option<u64> {
        self.get_info(url, headers)
            .await
            .and_then(|info| info.content_length())
    }

    /// Read the body of a probed response and offer it to the cache
    pub async fn download(&self, info: DownloadInfo) -> Result<Document, FetchError> {
        let (request, response) = info.into_parts();
        let document = self.materializer.materialize(response, &request).await?;
        self.cache.cache_if_possible(&request, &document);
        Ok(document)
    }

    /// Send `request`, following redirects.
    ///
    /// Returns the final request as sent together with its response.
    pub async fn fetch_response(
        &self,
        request: Request,
    ) -> Result<(Request, HttpResponse), FetchError> {
        redirect::follow(&self.redirects, request, |mut request| async move {
            self.resolver
                .resolve(&mut request, |url| self.fetch_pac_script(url))
                .await?;
            self.headers.inject(&mut request);
            let response = self.fetcher.execute(&request).await?;
            Ok::<_, FetchError>((request, response))
        })
        .await
    }

    /// Download a PAC script.
    ///
    /// Goes direct on every hop, since proxy resolution depends on the
    /// script itself. Redirects follow the session policy; the final
    /// response must be 2xx.
    async fn fetch_pac_script(&self, url: Url) -> Result<String, FetchError> {
        let failed = |reason: String| {
            FetchError::ProxyResolution(format!("PAC download from {url}: {reason}"))
        };

        let start = Request::get(url.clone());
        let (sent, response) = redirect::follow(&self.redirects, start, |mut request| async move {
            self.headers.inject(&mut request);
            let response = self.fetcher.execute(&request).await?;
            Ok::<_, FetchError>((request, response))
        })
        .await
        .map_err(|e| failed(e.to_string()))?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(failed(format!("{} answered {status}", sent.url())));
        }
        response.text().await.map_err(|e| failed(e.to_string()))
    }
}
