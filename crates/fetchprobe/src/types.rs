//! Core types for FetchProbe

use crate::error::FetchError;
use crate::proxy::ProxyAddress;
use bytes::Bytes;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE,
    LAST_MODIFIED,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use url::Url;

/// HTTP method for the request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// HTTP GET request
    #[default]
    Get,
    /// HTTP HEAD request
    Head,
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            _ => Err("Invalid method: must be GET or HEAD".to_string()),
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Head => write!(f, "HEAD"),
        }
    }
}

/// A single request as handed to a transport.
///
/// Header names are kept exactly as supplied; no case folding happens here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    url: Url,
    method: HttpMethod,
    headers: HashMap<String, String>,
    proxy: Option<ProxyAddress>,
}

impl Request {
    /// Create a GET request for an already parsed URL
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: HttpMethod::Get,
            headers: HashMap::new(),
            proxy: None,
        }
    }

    /// Parse `url` and create a GET request for it
    ///
    /// Only http and https URLs are accepted.
    pub fn parse(url: &str) -> Result<Self, FetchError> {
        if url.trim().is_empty() {
            return Err(FetchError::MissingUrl);
        }
        let parsed =
            Url::parse(url).map_err(|e| FetchError::MalformedUrl(format!("{url}: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchError::InvalidUrlScheme);
        }
        Ok(Self::get(parsed))
    }

    /// Set the HTTP method
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Add an additional header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Add every header of `headers`
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.set_header(name, value);
        }
        self
    }

    /// Route this request through `proxy`, bypassing proxy resolution
    pub fn proxy(mut self, proxy: ProxyAddress) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Insert or replace an additional header
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Case-insensitive presence check, used by header injection
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }

    pub(crate) fn set_proxy(&mut self, proxy: Option<ProxyAddress>) {
        self.proxy = proxy;
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn http_method(&self) -> HttpMethod {
        self.method
    }

    pub fn additional_headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn proxy_address(&self) -> Option<&ProxyAddress> {
        self.proxy.as_ref()
    }

    /// Build the follow-up GET request for a redirect target.
    ///
    /// Every additional header is carried over; the proxy is not, so the
    /// next hop gets resolved on its own.
    pub fn redirected_to(&self, target: Url) -> Self {
        Self {
            url: target,
            method: HttpMethod::Get,
            headers: self.headers.clone(),
            proxy: None,
        }
    }
}

/// Response body as owned by the transport
#[derive(Debug)]
pub(crate) enum Body {
    /// Not read yet; still attached to the connection
    Stream(reqwest::Response),
    /// Already in memory
    Buffered(Bytes),
}

/// Raw HTTP response: status and headers are read, the body is not.
#[derive(Debug)]
pub struct HttpResponse {
    url: Url,
    status_code: u16,
    reason: Option<String>,
    headers: HeaderMap,
    body: Body,
}

impl HttpResponse {
    /// Create an in-memory response with an empty body.
    ///
    /// Meant for custom [`Transport`](crate::Transport) implementations.
    pub fn new(url: Url, status_code: u16) -> Self {
        let reason = reqwest::StatusCode::from_u16(status_code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .map(str::to_string);
        Self {
            url,
            status_code,
            reason,
            headers: HeaderMap::new(),
            body: Body::Buffered(Bytes::new()),
        }
    }

    /// Append a header; duplicates are kept in arrival order
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, FetchError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| FetchError::InvalidHeader(name.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| FetchError::InvalidHeader(name.as_str().to_string()))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Replace the body with in-memory bytes
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Buffered(body.into());
        self
    }

    pub(crate) fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status();
        Self {
            url: response.url().clone(),
            status_code: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            headers: response.headers().clone(),
            body: Body::Stream(response),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name`, if it is valid text
    pub fn first_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First `Content-Length` header, parsed
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
    }

    pub(crate) fn into_parts(self) -> (Url, u16, Option<String>, HeaderMap, Body) {
        (self.url, self.status_code, self.reason, self.headers, self.body)
    }

    /// Read the whole body into memory
    pub async fn bytes(self) -> Result<Bytes, FetchError> {
        match self.body {
            Body::Buffered(bytes) => Ok(bytes),
            Body::Stream(response) => response
                .bytes()
                .await
                .map_err(|e| FetchError::Body(e.to_string())),
        }
    }

    /// Read the whole body as lossy UTF-8
    pub async fn text(self) -> Result<String, FetchError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Response metadata obtained before the body is downloaded
#[derive(Debug)]
pub struct DownloadInfo {
    request: Request,
    response: HttpResponse,
}

impl DownloadInfo {
    pub(crate) fn new(request: Request, response: HttpResponse) -> Self {
        Self { request, response }
    }

    /// Request that produced the final response (after redirects)
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn status_code(&self) -> u16 {
        self.response.status_code()
    }

    /// Announced body size, from the first `Content-Length` header
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.response.first_header(CONTENT_TYPE.as_str())
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.response.first_header(LAST_MODIFIED.as_str())
    }

    /// Serializable view of the metadata
    pub fn summary(&self) -> InfoSummary {
        InfoSummary {
            url: self.request.url().to_string(),
            status_code: self.status_code(),
            reason: self.response.reason().map(str::to_string),
            content_length: self.content_length(),
            content_type: self.content_type().map(str::to_string),
            last_modified: self.last_modified().map(str::to_string),
            filename: extract_filename(self.response.headers(), self.request.url()),
        }
    }

    pub fn into_parts(self) -> (Request, HttpResponse) {
        (self.request, self.response)
    }
}

/// Metadata summary of a probed resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoSummary {
    /// Final URL after redirects
    pub url: String,

    /// HTTP status code
    pub status_code: u16,

    /// Reason phrase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Content-Length header value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,

    /// Content-Type header value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Last-Modified header value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,

    /// Extracted filename
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// A fully downloaded response
#[derive(Debug, Clone)]
pub struct Document {
    pub(crate) url: Url,
    pub(crate) method: HttpMethod,
    pub(crate) status_code: u16,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) truncated: bool,
}

impl Document {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// True if the body read stopped early (timeout or stream error)
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Content-Length announced by the server
    pub fn declared_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
    }

    /// Bytes actually read
    pub fn actual_length(&self) -> u64 {
        self.body.len() as u64
    }

    /// Body fully read and, when announced, matching the declared length
    pub fn is_complete(&self) -> bool {
        !self.truncated
            && self
                .declared_length()
                .map_or(true, |declared| declared == self.actual_length())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Filename from Content-Disposition or the URL path
    pub fn filename(&self) -> Option<String> {
        extract_filename(&self.headers, &self.url)
    }
}

/// Extract filename from Content-Disposition header or URL
pub(crate) fn extract_filename(headers: &HeaderMap, url: &Url) -> Option<String> {
    if let Some(value) = headers.get(CONTENT_DISPOSITION).and_then(|v| v.to_str().ok()) {
        if let Some(filename) = parse_content_disposition_filename(value) {
            return Some(filename);
        }
    }

    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|last| !last.is_empty() && last.contains('.'))
        .map(str::to_string)
}

/// Parse filename from Content-Disposition header value
fn parse_content_disposition_filename(value: &str) -> Option<String> {
    let start = value.find("filename=")? + "filename=".len();
    let rest = &value[start..];
    let name = match rest.strip_prefix('"') {
        Some(quoted) => &quoted[..quoted.find('"')?],
        None => {
            let end = rest
                .find(|c: char| c.is_whitespace() || c == ';')
                .unwrap_or(rest.len());
            &rest[..end]
        }
    };
    // never let a server pick a path outside the working directory
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}
