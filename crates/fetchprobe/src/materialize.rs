//! Turning a response head into a downloaded document, and caching it

use crate::error::FetchError;
use crate::types::{Body, Document, HttpMethod, HttpResponse, Request};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::CACHE_CONTROL;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

/// Body timeout (total)
pub const DEFAULT_BODY_TIMEOUT: Duration = Duration::from_secs(300);

/// Reads a response body and produces a [`Document`]
#[async_trait]
pub trait Materializer: Send + Sync {
    /// Consume `response`, which was obtained for `request`
    async fn materialize(
        &self,
        response: HttpResponse,
        request: &Request,
    ) -> Result<Document, FetchError>;
}

/// Streams the body into memory.
///
/// On timeout or a mid-stream error the bytes read so far are kept and the
/// document is flagged as truncated.
#[derive(Debug, Clone)]
pub struct BodyMaterializer {
    timeout: Duration,
}

impl Default for BodyMaterializer {
    fn default() -> Self {
        Self::new(DEFAULT_BODY_TIMEOUT)
    }
}

impl BodyMaterializer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Materializer for BodyMaterializer {
    async fn materialize(
        &self,
        response: HttpResponse,
        request: &Request,
    ) -> Result<Document, FetchError> {
        let (url, status_code, _reason, headers, body) = response.into_parts();
        let (body, truncated) = match body {
            Body::Buffered(bytes) => (bytes, false),
            Body::Stream(response) => read_body_with_timeout(response, self.timeout).await,
        };
        debug!(url = %url, size = body.len(), truncated, "Body materialized");
        Ok(Document {
            url,
            method: request.http_method(),
            status_code,
            headers,
            body,
            truncated,
        })
    }
}

/// Read response body with timeout, returning partial content if timeout occurs
async fn read_body_with_timeout(response: reqwest::Response, timeout: Duration) -> (Bytes, bool) {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        tokio::select! {
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => body.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        error!("Error reading body chunk: {}", e);
                        return (Bytes::from(body), true);
                    }
                    None => return (Bytes::from(body), false),
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!("Body timeout reached, returning partial content");
                return (Bytes::from(body), true);
            }
        }
    }
}

/// Receives every materialized document and may keep it
pub trait ResponseCache: Send + Sync {
    fn cache_if_possible(&self, request: &Request, document: &Document);
}

/// Keeps nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl ResponseCache for NoCache {
    fn cache_if_possible(&self, _request: &Request, _document: &Document) {}
}

/// In-memory cache of complete `200 OK` GET responses, keyed by URL.
///
/// Responses marked `Cache-Control: no-store` are skipped.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<Url, Document>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &Url) -> Option<Document> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(url).cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_cacheable(request: &Request, document: &Document) -> bool {
        let no_store = document
            .headers()
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_ascii_lowercase().contains("no-store"));
        request.http_method() == HttpMethod::Get
            && document.status_code() == 200
            && document.is_complete()
            && !no_store
    }
}

impl ResponseCache for MemoryCache {
    fn cache_if_possible(&self, request: &Request, document: &Document) {
        if !Self::is_cacheable(request, document) {
            return;
        }
        if let Ok(mut entries) = self.entries.write() {
            debug!(url = %document.url(), "Caching document");
            entries.insert(document.url().clone(), document.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        Request::parse("http://example.com/data.bin").unwrap()
    }

    async fn document(response: HttpResponse) -> Document {
        BodyMaterializer::default()
            .materialize(response, &request())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_buffered_body_is_materialized() {
        let response = HttpResponse::new(request().url().clone(), 200)
            .with_header("Content-Length", "5")
            .unwrap()
            .with_body("hello");
        let doc = document(response).await;
        assert_eq!(doc.body().as_ref(), b"hello");
        assert_eq!(doc.declared_length(), Some(5));
        assert!(doc.is_complete());
        assert_eq!(doc.method(), HttpMethod::Get);
    }

    #[tokio::test]
    async fn test_memory_cache_policy() {
        let cache = MemoryCache::new();

        let ok = document(HttpResponse::new(request().url().clone(), 200).with_body("x")).await;
        cache.cache_if_possible(&request(), &ok);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(request().url()).is_some());

        let missing_url = Url::parse("http://example.com/missing").unwrap();
        let not_found = document(HttpResponse::new(missing_url.clone(), 404)).await;
        cache.cache_if_possible(&request(), &not_found);
        assert!(cache.get(&missing_url).is_none());

        let private_url = Url::parse("http://example.com/private").unwrap();
        let no_store = document(
            HttpResponse::new(private_url.clone(), 200)
                .with_header("Cache-Control", "private, No-Store")
                .unwrap(),
        )
        .await;
        cache.cache_if_possible(&request(), &no_store);
        assert!(cache.get(&private_url).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_short_body_is_not_cached() {
        let cache = MemoryCache::new();
        let short = document(
            HttpResponse::new(request().url().clone(), 200)
                .with_header("Content-Length", "10")
                .unwrap()
                .with_body("abc"),
        )
        .await;
        assert!(!short.is_complete());
        cache.cache_if_possible(&request(), &short);
        assert!(cache.is_empty());
    }
}
