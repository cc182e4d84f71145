//! Proxy auto-config (PAC) evaluation and directive parsing

use crate::error::FetchError;
use crate::proxy::{ProxyAddress, ProxyKind};
use rquickjs::{Context, Runtime};
use std::time::{Duration, Instant};
use url::Url;

/// Memory ceiling for one PAC evaluation
const PAC_MEMORY_LIMIT: usize = 8 * 1024 * 1024;

/// Wall-clock ceiling for one PAC evaluation
const PAC_TIME_LIMIT: Duration = Duration::from_secs(2);

/// Standard PAC helper functions.
///
/// Name resolution is limited to IP literals: the sandbox has no resolver.
const PAC_PRELUDE: &str = r#"
function isPlainHostName(host) {
    return host.indexOf('.') < 0;
}
function dnsDomainIs(host, domain) {
    host = String(host).toLowerCase();
    domain = String(domain).toLowerCase();
    return host.length >= domain.length
        && host.substring(host.length - domain.length) === domain;
}
function localHostOrDomainIs(host, hostdom) {
    return host === hostdom || hostdom.lastIndexOf(host + '.', 0) === 0;
}
function __isIpv4(s) {
    return /^\d{1,3}(\.\d{1,3}){3}$/.test(s);
}
function dnsResolve(host) {
    return __isIpv4(host) ? host : null;
}
function isResolvable(host) {
    return dnsResolve(host) !== null;
}
function myIpAddress() {
    return "127.0.0.1";
}
function dnsDomainLevels(host) {
    return host.split('.').length - 1;
}
function __ipToInt(ip) {
    var p = ip.split('.');
    return (+p[0]) * 16777216 + (+p[1]) * 65536 + (+p[2]) * 256 + (+p[3]);
}
function isInNet(host, pattern, mask) {
    var ip = dnsResolve(host);
    if (ip === null || !__isIpv4(pattern) || !__isIpv4(mask)) {
        return false;
    }
    var m = __ipToInt(mask);
    return ((__ipToInt(ip) & m) >>> 0) === ((__ipToInt(pattern) & m) >>> 0);
}
function shExpMatch(str, shexp) {
    var re = String(shexp)
        .replace(/[.+^${}()|[\]\\]/g, '\\$&')
        .replace(/\*/g, '.*')
        .replace(/\?/g, '.');
    return new RegExp('^' + re + '$').test(str);
}
function weekdayRange(wd1, wd2, gmt) {
    var days = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];
    if (wd2 === "GMT") {
        gmt = wd2;
        wd2 = undefined;
    }
    var now = new Date();
    var today = gmt === "GMT" ? now.getUTCDay() : now.getDay();
    var from = days.indexOf(wd1);
    if (wd2 === undefined) {
        return today === from;
    }
    var to = days.indexOf(wd2);
    return from <= to
        ? today >= from && today <= to
        : today >= from || today <= to;
}
"#;

/// Evaluates a PAC script for a target URL
pub trait PacEvaluator: Send + Sync {
    /// Run `FindProxyForURL(url, host)` and return the raw directive list
    fn evaluate(&self, script: &str, url: &Url) -> Result<String, FetchError>;
}

/// PAC evaluator backed by an embedded QuickJS runtime.
///
/// Every evaluation gets a fresh runtime with memory and time limits.
#[derive(Debug, Clone)]
pub struct QuickJsPacEvaluator {
    memory_limit: usize,
    time_limit: Duration,
}

impl Default for QuickJsPacEvaluator {
    fn default() -> Self {
        Self {
            memory_limit: PAC_MEMORY_LIMIT,
            time_limit: PAC_TIME_LIMIT,
        }
    }
}

impl QuickJsPacEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the evaluation time limit
    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }
}

impl PacEvaluator for QuickJsPacEvaluator {
    fn evaluate(&self, script: &str, url: &Url) -> Result<String, FetchError> {
        let runtime = Runtime::new()
            .map_err(|e| FetchError::ProxyResolution(format!("failed to start PAC runtime: {e}")))?;
        runtime.set_memory_limit(self.memory_limit);
        let deadline = Instant::now() + self.time_limit;
        runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));
        let context = Context::full(&runtime)
            .map_err(|e| FetchError::ProxyResolution(format!("failed to create PAC context: {e}")))?;

        let host = url.host_str().unwrap_or_default();
        let source = format!(
            "{PAC_PRELUDE}\n{script}\n;FindProxyForURL({}, {});",
            js_string(url.as_str()),
            js_string(host)
        );

        let result = context.with(|ctx| match ctx.eval::<Option<String>, _>(source) {
            Ok(value) => Ok(value),
            Err(rquickjs::Error::Exception) => {
                let thrown = ctx.catch();
                let message = thrown
                    .as_exception()
                    .and_then(|e| e.message())
                    .unwrap_or_else(|| "uncaught exception".to_string());
                Err(message)
            }
            Err(e) => Err(e.to_string()),
        });

        match result {
            Ok(Some(directives)) => {
                tracing::debug!(url = %url, directives = %directives, "PAC evaluated");
                Ok(directives)
            }
            Ok(None) => Err(FetchError::ProxyResolution(
                "FindProxyForURL returned no value".to_string(),
            )),
            Err(message) => Err(FetchError::ProxyResolution(format!(
                "PAC evaluation failed: {message}"
            ))),
        }
    }
}

/// Quote `s` as a JavaScript string literal
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Parse a PAC result such as `"PROXY 10.0.0.1:8080; DIRECT"`.
///
/// Only the first directive is honored. `PROXY` and `SOCKS` yield a proxy,
/// anything else (`DIRECT`, unknown keywords, empty) means no proxy.
pub fn parse_pac_directive(directives: &str) -> Result<Option<ProxyAddress>, FetchError> {
    let first = directives.split(';').next().unwrap_or_default().trim();

    let (kind, target) = if let Some(rest) = first.strip_prefix("PROXY ") {
        (ProxyKind::Http, rest)
    } else if let Some(rest) = first.strip_prefix("SOCKS ") {
        (ProxyKind::Socks, rest)
    } else {
        return Ok(None);
    };

    let target = target.trim();
    let (host, port) = target.rsplit_once(':').ok_or_else(|| {
        FetchError::ProxyResolution(format!("PAC directive without port: {first}"))
    })?;
    let port: u16 = port.parse().map_err(|_| {
        FetchError::ProxyResolution(format!("PAC directive with invalid port: {first}"))
    })?;
    if host.is_empty() {
        return Err(FetchError::ProxyResolution(format!(
            "PAC directive without host: {first}"
        )));
    }

    Ok(Some(ProxyAddress::new(host, port, kind)))
}
