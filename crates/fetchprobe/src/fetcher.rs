//! One request, one response, with the insecure TLS fallback

use crate::error::FetchError;
use crate::transport::{TlsMode, Transport};
use crate::types::{HttpResponse, Request};
use tracing::warn;

/// Executes a single exchange on top of a [`Transport`].
///
/// When the peer certificate is rejected and insecure TLS is enabled, the
/// exchange is repeated once in [`TlsMode::Legacy`]. If that retry fails as
/// well, the original certificate error is returned.
#[derive(Debug)]
pub struct HttpFetcher<T> {
    transport: T,
    insecure_tls: bool,
}

impl<T: Transport> HttpFetcher<T> {
    pub fn new(transport: T, insecure_tls: bool) -> Self {
        Self {
            transport,
            insecure_tls,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn execute(&self, request: &Request) -> Result<HttpResponse, FetchError> {
        match self.transport.execute(request, TlsMode::Strict).await {
            Err(err) if err.is_tls_verification() && self.insecure_tls => {
                warn!(
                    url = %request.url(),
                    transport = self.transport.name(),
                    "Certificate rejected, retrying once with legacy TLS"
                );
                match self.transport.execute(request, TlsMode::Legacy).await {
                    Ok(response) => Ok(response),
                    Err(retry_err) => {
                        warn!(url = %request.url(), error = %retry_err, "Legacy TLS retry failed");
                        Err(err)
                    }
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn tls_error() -> FetchError {
        let err = reqwest::Client::new()
            .get("http://[invalid")
            .build()
            .unwrap_err();
        FetchError::TlsVerification(err)
    }

    /// Rejects certificates in strict mode; legacy mode outcome is configurable
    struct PickyTransport {
        legacy_succeeds: bool,
        calls: Mutex<Vec<TlsMode>>,
    }

    impl PickyTransport {
        fn new(legacy_succeeds: bool) -> Self {
            Self {
                legacy_succeeds,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<TlsMode> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for PickyTransport {
        fn name(&self) -> &'static str {
            "picky"
        }

        async fn execute(&self, request: &Request, tls: TlsMode) -> Result<HttpResponse, FetchError> {
            self.calls.lock().unwrap().push(tls);
            match tls {
                TlsMode::Strict => Err(tls_error()),
                TlsMode::Legacy if self.legacy_succeeds => {
                    Ok(HttpResponse::new(request.url().clone(), 200))
                }
                TlsMode::Legacy => Err(FetchError::RequestError("handshake failed".to_string())),
            }
        }
    }

    fn request() -> Request {
        Request::parse("https://self-signed.example/file.bin").unwrap()
    }

    #[tokio::test]
    async fn test_no_retry_without_insecure_tls() {
        let fetcher = HttpFetcher::new(PickyTransport::new(true), false);
        let result = fetcher.execute(&request()).await;
        assert!(matches!(result, Err(FetchError::TlsVerification(_))));
        assert_eq!(fetcher.transport().calls(), vec![TlsMode::Strict]);
    }

    #[tokio::test]
    async fn test_single_legacy_retry_succeeds() {
        let fetcher = HttpFetcher::new(PickyTransport::new(true), true);
        let response = fetcher.execute(&request()).await.unwrap();
        assert_eq!(response.status_code(), 200);
        assert_eq!(
            fetcher.transport().calls(),
            vec![TlsMode::Strict, TlsMode::Legacy]
        );
    }

    #[tokio::test]
    async fn test_failed_retry_returns_original_error() {
        let fetcher = HttpFetcher::new(PickyTransport::new(false), true);
        let result = fetcher.execute(&request()).await;
        assert!(matches!(result, Err(FetchError::TlsVerification(_))));
        assert_eq!(
            fetcher.transport().calls(),
            vec![TlsMode::Strict, TlsMode::Legacy]
        );
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        struct Refusing(Mutex<usize>);

        #[async_trait]
        impl Transport for Refusing {
            fn name(&self) -> &'static str {
                "refusing"
            }

            async fn execute(&self, _: &Request, _: TlsMode) -> Result<HttpResponse, FetchError> {
                *self.0.lock().unwrap() += 1;
                Err(FetchError::RequestError("connection reset".to_string()))
            }
        }

        let fetcher = HttpFetcher::new(Refusing(Mutex::new(0)), true);
        assert!(fetcher.execute(&request()).await.is_err());
        assert_eq!(*fetcher.transport().0.lock().unwrap(), 1);
    }
}
