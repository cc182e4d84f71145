//! Single request/response exchanges
//!
//! Design: a [`Transport`] performs exactly one exchange and never follows
//! redirects or reads the body. Everything above it (proxy resolution,
//! TLS fallback, redirects, retries) is transport agnostic.

mod http;
mod pool;

pub use http::{ClientSettings, ReqwestTransport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
pub use pool::{ConnectionPool, PoolKey, DEFAULT_POOL_CAPACITY};

use crate::error::FetchError;
use crate::types::{HttpResponse, Request};
use async_trait::async_trait;
use std::sync::Arc;

/// TLS negotiation mode for one exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TlsMode {
    /// Verify certificates, negotiate the best protocol version
    #[default]
    Strict,
    /// Skip certificate verification and cap the protocol at TLS 1.2.
    /// Only used as a one-shot fallback when insecure TLS is enabled.
    Legacy,
}

/// Performs one HTTP exchange for a prepared request
///
/// The request's proxy, if any, has already been resolved. Implementations
/// return as soon as the status line and headers have arrived.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identifier for logging
    fn name(&self) -> &'static str;

    /// Send `request` and return the response head
    async fn execute(&self, request: &Request, tls: TlsMode) -> Result<HttpResponse, FetchError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn execute(&self, request: &Request, tls: TlsMode) -> Result<HttpResponse, FetchError> {
        (**self).execute(request, tls).await
    }
}
