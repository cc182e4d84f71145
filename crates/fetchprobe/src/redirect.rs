//! Redirect following
//!
//! Redirects are followed by hand so that every hop goes back through
//! proxy resolution and header injection, and so the budget is ours.

use crate::error::FetchError;
use crate::types::{HttpResponse, Request};
use reqwest::header::LOCATION;
use std::future::Future;
use tracing::{debug, warn};
use url::Url;

/// Redirect hops allowed for one logical fetch
pub const MAX_REDIRECTS: usize = 20;

const NOT_MODIFIED: u16 = 304;

/// Which responses are followed, and how often
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectPolicy {
    /// Follow redirects at all
    pub enabled: bool,
    /// Treat 308 Permanent Redirect as a redirect
    pub allow_308: bool,
    /// Hop budget
    pub max_redirects: usize,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_308: true,
            max_redirects: MAX_REDIRECTS,
        }
    }
}

impl RedirectPolicy {
    /// True if `status` asks to be followed under this policy
    pub fn is_redirect(&self, status: u16) -> bool {
        let upper = if self.allow_308 { 308 } else { 307 };
        self.enabled && status != NOT_MODIFIED && (301..=upper).contains(&status)
    }

    /// Where `response` points to, if it is a redirect worth following.
    ///
    /// Only the first `Location` header counts. A redirect status without a
    /// `Location` is not followed; the response is final.
    pub fn target(&self, request: &Request, response: &HttpResponse) -> Result<Option<Url>, FetchError> {
        if !self.is_redirect(response.status_code()) {
            return Ok(None);
        }
        let Some(location) = response.headers().get(LOCATION) else {
            warn!(
                url = %request.url(),
                status = response.status_code(),
                "Redirect status without Location header"
            );
            return Ok(None);
        };
        let location = location
            .to_str()
            .map_err(|_| FetchError::MalformedUrl("non-ASCII Location header".to_string()))?;
        request
            .url()
            .join(location.trim())
            .map(Some)
            .map_err(|e| FetchError::MalformedUrl(format!("{location}: {e}")))
    }
}

/// Run `hop` for `request` and keep following redirects.
///
/// `hop` performs one exchange and returns the request as it was sent with
/// the response. Returns the last such pair. `hop` runs at most
/// `max_redirects + 1` times; a redirect arriving with no budget left fails
/// with [`FetchError::TooManyRedirects`] naming the unreached target.
pub async fn follow<F, Fut>(
    policy: &RedirectPolicy,
    request: Request,
    mut hop: F,
) -> Result<(Request, HttpResponse), FetchError>
where
    F: FnMut(Request) -> Fut,
    Fut: Future<Output = Result<(Request, HttpResponse), FetchError>>,
{
    let mut remaining = policy.max_redirects;
    let mut next = request;

    loop {
        let (sent, response) = hop(next).await?;
        let Some(target) = policy.target(&sent, &response)? else {
            return Ok((sent, response));
        };
        if remaining == 0 {
            return Err(FetchError::TooManyRedirects {
                url: target.to_string(),
            });
        }
        debug!(
            from = %sent.url(),
            to = %target,
            status = response.status_code(),
            remaining,
            "Following redirect"
        );
        remaining -= 1;
        next = sent.redirected_to(target);
    }
}
