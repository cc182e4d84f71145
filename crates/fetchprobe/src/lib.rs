//! FetchProbe - headers-first HTTP fetching
//!
//! This crate fetches a resource up to the end of its response head, so the
//! caller can look at the metadata (`Content-Length` first of all) before
//! deciding whether to read the body from the very same response.
//!
//! ## Pipeline
//!
//! Every hop of a fetch goes through the same steps:
//!
//! 1. proxy resolution ([`ProxyResolver`]): direct, static proxy with a
//!    bypass list, or a PAC script evaluated in QuickJS
//! 2. default header injection ([`HeaderInjector`])
//! 3. one exchange on a pooled client ([`HttpFetcher`] over a
//!    [`Transport`]), retried once with legacy TLS when insecure TLS is on
//! 4. redirect handling ([`redirect::follow`]), at most 20 hops
//!
//! [`FetchSession::get_info`] wraps the pipeline in a bounded retry and
//! returns a [`DownloadInfo`]; [`FetchSession::download`] materializes it.
//!
//! ```no_run
//! # async fn run() -> Result<(), fetchprobe::FetchError> {
//! use fetchprobe::FetchSession;
//! use std::collections::HashMap;
//!
//! let session = FetchSession::builder().insecure_tls(true).build()?;
//! if let Some(info) = session.get_info("https://example.com/file.iso", &HashMap::new()).await {
//!     println!("{:?} bytes", info.content_length());
//!     let document = session.download(info).await?;
//!     assert!(document.is_complete());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
mod error;
mod fetcher;
mod headers;
mod materialize;
pub mod proxy;
pub mod redirect;
pub mod retry;
mod session;
pub mod transport;
mod types;

pub use client::{content_length, download, get_info, get_info_with_options, FetchOptions};
pub use error::FetchError;
pub use fetcher::HttpFetcher;
pub use headers::{HeaderInjector, NoDefaultHeaders, StandardHeaders};
pub use materialize::{BodyMaterializer, Materializer, MemoryCache, NoCache, ResponseCache};
pub use proxy::{
    PacEvaluator, ProxyAddress, ProxyConfig, ProxyKind, ProxyResolver, QuickJsPacEvaluator,
};
pub use redirect::RedirectPolicy;
pub use retry::RetryPolicy;
pub use session::{FetchSession, FetchSessionBuilder};
pub use transport::{ReqwestTransport, TlsMode, Transport};
pub use types::{Document, DownloadInfo, HttpMethod, HttpResponse, InfoSummary, Request};

/// Default User-Agent string
pub const DEFAULT_USER_AGENT: &str = "Everruns FetchProbe/1.0";
