//! Default request headers

use crate::types::Request;
use crate::DEFAULT_USER_AGENT;

/// Default Accept header, as a browser sends for a top-level navigation
pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Default Accept-Language header
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Adds default headers to a request right before it is sent
pub trait HeaderInjector: Send + Sync {
    fn inject(&self, request: &mut Request);
}

/// Injects nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDefaultHeaders;

impl HeaderInjector for NoDefaultHeaders {
    fn inject(&self, _request: &mut Request) {}
}

/// User-Agent, Accept and Accept-Language, each added only if the request
/// does not carry it already (compared case-insensitively)
#[derive(Debug, Clone)]
pub struct StandardHeaders {
    user_agent: String,
    accept: String,
    accept_language: String,
}

impl Default for StandardHeaders {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
        }
    }
}

impl StandardHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = accept.into();
        self
    }
}

impl HeaderInjector for StandardHeaders {
    fn inject(&self, request: &mut Request) {
        for (name, value) in [
            ("User-Agent", &self.user_agent),
            ("Accept", &self.accept),
            ("Accept-Language", &self.accept_language),
        ] {
            if !request.has_header(name) {
                request.set_header(name, value.as_str());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_headers_fill_gaps_only() {
        let mut request = Request::parse("http://example.com/")
            .unwrap()
            .header("accept", "application/octet-stream");
        StandardHeaders::new().user_agent("Probe/2").inject(&mut request);

        let headers = request.additional_headers();
        assert_eq!(headers["User-Agent"], "Probe/2");
        assert_eq!(headers["accept"], "application/octet-stream");
        assert!(!headers.contains_key("Accept"));
        assert_eq!(headers["Accept-Language"], DEFAULT_ACCEPT_LANGUAGE);
    }

    #[test]
    fn test_injection_is_idempotent() {
        let mut request = Request::parse("http://example.com/").unwrap();
        let injector = StandardHeaders::default();
        injector.inject(&mut request);
        let once = request.additional_headers().clone();
        injector.inject(&mut request);
        assert_eq!(request.additional_headers(), &once);
    }

    #[test]
    fn test_no_default_headers() {
        let mut request = Request::parse("http://example.com/").unwrap();
        NoDefaultHeaders.inject(&mut request);
        assert!(request.additional_headers().is_empty());
    }
}
