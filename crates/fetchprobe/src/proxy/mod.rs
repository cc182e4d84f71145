//! Proxy selection for outgoing requests
//!
//! A request either carries an explicit proxy, or gets one from the
//! session's [`ProxyConfig`]: nothing (direct), a static proxy with a host
//! bypass list, or whatever a PAC script answers for the target URL.

mod pac;

pub use pac::{parse_pac_directive, PacEvaluator, QuickJsPacEvaluator};

use crate::error::FetchError;
use crate::types::Request;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

/// Proxy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Socks,
}

/// Host and port of a proxy server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyAddress {
    host: String,
    port: u16,
    kind: ProxyKind,
}

impl ProxyAddress {
    pub fn new(host: impl Into<String>, port: u16, kind: ProxyKind) -> Self {
        Self {
            host: host.into(),
            port,
            kind,
        }
    }

    /// HTTP proxy
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, ProxyKind::Http)
    }

    /// SOCKS5 proxy
    pub fn socks(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, ProxyKind::Socks)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub fn is_socks(&self) -> bool {
        self.kind == ProxyKind::Socks
    }

    /// Proxy URL in the form reqwest expects
    pub fn to_url(&self) -> String {
        let scheme = match self.kind {
            ProxyKind::Http => "http",
            ProxyKind::Socks => "socks5",
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_url())
    }
}

/// How requests without an explicit proxy are routed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProxyConfig {
    /// Connect directly
    #[default]
    Direct,
    /// Always use `proxy`, except for hosts matching a `bypass` pattern
    Static {
        proxy: ProxyAddress,
        /// Regular expressions searched in the target host name
        #[serde(default)]
        bypass: Vec<String>,
    },
    /// Ask the PAC script at `url`
    Pac { url: Url },
}

/// Applies a [`ProxyConfig`] to requests.
///
/// Owns the PAC script cache: the script is downloaded at most once per
/// resolver, a failed download is retried on the next request.
pub struct ProxyResolver {
    config: ProxyConfig,
    bypass: RegexSet,
    evaluator: Arc<dyn PacEvaluator>,
    pac_script: OnceCell<Arc<str>>,
}

impl std::fmt::Debug for ProxyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyResolver")
            .field("config", &self.config)
            .field("pac_cached", &self.pac_script.initialized())
            .finish()
    }
}

impl ProxyResolver {
    /// Create a resolver; fails if a bypass pattern is not a valid regex
    pub fn new(
        config: ProxyConfig,
        evaluator: Arc<dyn PacEvaluator>,
    ) -> Result<Self, FetchError> {
        let patterns: &[String] = match &config {
            ProxyConfig::Static { bypass, .. } => bypass,
            _ => &[],
        };
        let bypass = RegexSet::new(patterns)
            .map_err(|e| FetchError::InvalidConfig(format!("invalid proxy bypass pattern: {e}")))?;
        Ok(Self {
            config,
            bypass,
            evaluator,
            pac_script: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// The PAC script, once it has been downloaded
    pub fn cached_pac_script(&self) -> Option<&str> {
        self.pac_script.get().map(|script| &**script)
    }

    /// Set the proxy of `request` according to the configuration.
    ///
    /// `fetch_script` downloads the PAC script; it is only called when the
    /// configuration is PAC based and the script is not cached yet.
    pub async fn resolve<F, Fut>(
        &self,
        request: &mut Request,
        fetch_script: F,
    ) -> Result<(), FetchError>
    where
        F: FnOnce(Url) -> Fut,
        Fut: Future<Output = Result<String, FetchError>>,
    {
        if request.proxy_address().is_some() {
            return Ok(());
        }

        let proxy = match &self.config {
            ProxyConfig::Direct => None,
            ProxyConfig::Static { proxy, .. } => {
                let host = request.url().host_str().unwrap_or_default();
                if self.bypass.is_match(host) {
                    debug!(host, "Host bypasses static proxy");
                    None
                } else {
                    Some(proxy.clone())
                }
            }
            ProxyConfig::Pac { url } => {
                if same_resource(url, request.url()) {
                    None
                } else {
                    let script = self
                        .pac_script
                        .get_or_try_init(|| async {
                            info!(pac_url = %url, "Downloading PAC script");
                            fetch_script(url.clone()).await.map(Arc::from)
                        })
                        .await?;
                    let directives = self.evaluate(Arc::clone(script), request.url()).await?;
                    parse_pac_directive(&directives)?
                }
            }
        };

        if let Some(ref p) = proxy {
            debug!(url = %request.url(), proxy = %p, "Routing through proxy");
        }
        request.set_proxy(proxy);
        Ok(())
    }
}

impl ProxyResolver {
    /// Run the PAC script on the blocking pool; evaluation may take up to
    /// the evaluator's time limit
    async fn evaluate(&self, script: Arc<str>, target: &Url) -> Result<String, FetchError> {
        let evaluator = Arc::clone(&self.evaluator);
        let target = target.clone();
        tokio::task::spawn_blocking(move || evaluator.evaluate(&script, &target))
            .await
            .map_err(|e| FetchError::ProxyResolution(format!("PAC evaluation task failed: {e}")))?
    }
}

/// Same scheme, host, port, path and query; the fragment is ignored
fn same_resource(a: &Url, b: &Url) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    a.set_fragment(None);
    b.set_fragment(None);
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const PAC: &str = r#"
        function FindProxyForURL(url, host) {
            if (dnsDomainIs(host, ".corp.example")) return "PROXY 10.0.0.1:8080; DIRECT";
            if (host == "socks.example") return "SOCKS 10.0.0.2:1080";
            return "DIRECT";
        }
    "#;

    fn request(url: &str) -> Request {
        Request::parse(url).unwrap()
    }

    fn resolver(config: ProxyConfig) -> ProxyResolver {
        ProxyResolver::new(config, Arc::new(QuickJsPacEvaluator::new())).unwrap()
    }

    async fn never_fetch(_: Url) -> Result<String, FetchError> {
        panic!("PAC script must not be fetched")
    }

    #[tokio::test]
    async fn test_direct_sets_no_proxy() {
        let resolver = resolver(ProxyConfig::Direct);
        let mut req = request("http://example.com/");
        resolver.resolve(&mut req, never_fetch).await.unwrap();
        assert!(req.proxy_address().is_none());
    }

    #[tokio::test]
    async fn test_explicit_proxy_wins() {
        let resolver = resolver(ProxyConfig::Static {
            proxy: ProxyAddress::http("static", 3128),
            bypass: vec![],
        });
        let explicit = ProxyAddress::socks("mine", 1080);
        let mut req = request("http://example.com/").proxy(explicit.clone());
        resolver.resolve(&mut req, never_fetch).await.unwrap();
        assert_eq!(req.proxy_address(), Some(&explicit));
    }

    #[tokio::test]
    async fn test_static_proxy_and_bypass() {
        let resolver = resolver(ProxyConfig::Static {
            proxy: ProxyAddress::http("proxy.example", 3128),
            bypass: vec![r"^localhost$".to_string(), r"\.internal$".to_string()],
        });

        let mut req = request("http://example.com/");
        resolver.resolve(&mut req, never_fetch).await.unwrap();
        assert_eq!(
            req.proxy_address(),
            Some(&ProxyAddress::http("proxy.example", 3128))
        );

        for url in ["http://localhost:8080/", "http://db.internal/"] {
            let mut req = request(url);
            resolver.resolve(&mut req, never_fetch).await.unwrap();
            assert!(req.proxy_address().is_none(), "{url} should bypass");
        }
    }

    #[test]
    fn test_invalid_bypass_pattern_is_rejected() {
        let result = ProxyResolver::new(
            ProxyConfig::Static {
                proxy: ProxyAddress::http("p", 1),
                bypass: vec!["(".to_string()],
            },
            Arc::new(QuickJsPacEvaluator::new()),
        );
        assert!(matches!(result, Err(FetchError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_pac_script_fetched_once_and_applied() {
        let pac_url = Url::parse("http://wpad.example/proxy.pac").unwrap();
        let resolver = resolver(ProxyConfig::Pac {
            url: pac_url.clone(),
        });
        let fetches = AtomicUsize::new(0);
        let fetch = |url: Url| {
            fetches.fetch_add(1, Ordering::SeqCst);
            assert_eq!(url.as_str(), "http://wpad.example/proxy.pac");
            async { Ok::<_, FetchError>(PAC.to_string()) }
        };

        let mut corp = request("http://wiki.corp.example/page");
        resolver.resolve(&mut corp, fetch).await.unwrap();
        assert_eq!(
            corp.proxy_address(),
            Some(&ProxyAddress::http("10.0.0.1", 8080))
        );

        let mut socks = request("http://socks.example/");
        resolver.resolve(&mut socks, fetch).await.unwrap();
        assert_eq!(
            socks.proxy_address(),
            Some(&ProxyAddress::socks("10.0.0.2", 1080))
        );

        let mut direct = request("http://example.com/");
        resolver.resolve(&mut direct, fetch).await.unwrap();
        assert!(direct.proxy_address().is_none());

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(resolver.cached_pac_script().is_some());
    }

    #[tokio::test]
    async fn test_pac_url_itself_goes_direct() {
        let resolver = resolver(ProxyConfig::Pac {
            url: Url::parse("http://wpad.example/proxy.pac").unwrap(),
        });
        let mut req = request("http://wpad.example/proxy.pac#v2");
        resolver.resolve(&mut req, never_fetch).await.unwrap();
        assert!(req.proxy_address().is_none());
    }

    #[tokio::test]
    async fn test_pac_fetch_failure_surfaces_and_is_not_cached() {
        let resolver = resolver(ProxyConfig::Pac {
            url: Url::parse("http://wpad.example/proxy.pac").unwrap(),
        });

        let mut req = request("http://wiki.corp.example/");
        let result = resolver
            .resolve(&mut req, |_| async {
                Err(FetchError::ProxyResolution("unreachable".to_string()))
            })
            .await;
        assert!(matches!(result, Err(FetchError::ProxyResolution(_))));
        assert!(req.proxy_address().is_none());
        assert!(resolver.cached_pac_script().is_none());

        resolver
            .resolve(&mut req, |_| async { Ok(PAC.to_string()) })
            .await
            .unwrap();
        assert_eq!(
            req.proxy_address(),
            Some(&ProxyAddress::http("10.0.0.1", 8080))
        );
    }

    #[tokio::test]
    async fn test_concurrent_first_resolutions_share_one_fetch() {
        let resolver = resolver(ProxyConfig::Pac {
            url: Url::parse("http://wpad.example/proxy.pac").unwrap(),
        });
        let fetches = AtomicUsize::new(0);
        let fetch = |_: Url| {
            fetches.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, FetchError>(PAC.to_string())
            }
        };

        let mut requests: Vec<Request> = (0..6)
            .map(|i| request(&format!("http://host{i}.corp.example/")))
            .collect();
        let results = join_all(
            requests
                .iter_mut()
                .map(|req| resolver.resolve(req, fetch)),
        )
        .await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        for req in &requests {
            assert_eq!(
                req.proxy_address(),
                Some(&ProxyAddress::http("10.0.0.1", 8080))
            );
        }
    }

    /// Blocks its thread for a while before answering
    struct SlowEvaluator(Duration);

    impl PacEvaluator for SlowEvaluator {
        fn evaluate(&self, _script: &str, _url: &Url) -> Result<String, FetchError> {
            std::thread::sleep(self.0);
            Ok("PROXY 10.9.9.9:80".to_string())
        }
    }

    #[tokio::test]
    async fn test_pac_evaluation_does_not_block_the_runtime() {
        let resolver = ProxyResolver::new(
            ProxyConfig::Pac {
                url: Url::parse("http://wpad.example/proxy.pac").unwrap(),
            },
            Arc::new(SlowEvaluator(Duration::from_millis(300))),
        )
        .unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let mut req = request("http://example.com/");
        resolver
            .resolve(&mut req, |_| async { Ok(PAC.to_string()) })
            .await
            .unwrap();
        ticker.abort();

        assert_eq!(req.proxy_address(), Some(&ProxyAddress::http("10.9.9.9", 80)));
        assert!(ticks.load(Ordering::SeqCst) >= 5);
    }

    #[test]
    fn test_proxy_address_urls() {
        assert_eq!(ProxyAddress::http("h", 1).to_url(), "http://h:1");
        assert_eq!(ProxyAddress::socks("h", 2).to_url(), "socks5://h:2");
    }
}
