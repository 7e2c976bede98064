//! Proxy descriptors and environment proxy lookup.
//!
//! An explicit [`Proxy`] always wins. Without one, the proxy for a target URL
//! is taken from the conventional environment variables (`HTTP_PROXY`,
//! `HTTPS_PROXY`, `ALL_PROXY`, `NO_PROXY` and their lowercase forms).

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProxyKind {
    Http,
    Socks,
}

impl ProxyKind {
    fn scheme(self) -> &'static str {
        match self {
            ProxyKind::Http => "http",
            ProxyKind::Socks => "socks5",
        }
    }
}

/// A proxy server a request should be sent through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    #[serde(rename = "type")]
    pub kind: ProxyKind,
    pub host: String,
    pub port: Option<u16>,
}

impl Proxy {
    pub fn http<H: Into<String>>(host: H, port: u16) -> Self {
        Self { kind: ProxyKind::Http, host: host.into(), port: Some(port) }
    }

    pub fn socks<H: Into<String>>(host: H, port: u16) -> Self {
        Self { kind: ProxyKind::Socks, host: host.into(), port: Some(port) }
    }

    /// The URL a transport connects to, or `None` when host or port is missing
    /// or the pair does not form a valid URL.
    pub fn url(&self) -> Option<Url> {
        let port = self.port?;
        if self.host.is_empty() {
            return None;
        }
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        Url::parse(&format!("{}://{host}:{port}", self.kind.scheme())).ok()
    }
}

/// Resolves the proxy for `target` from the process environment.
pub fn proxy_from_env(target: &Url) -> Option<Url> {
    proxy_from_lookup(target, |key| std::env::var(key).ok())
}

/// Resolves the proxy for `target` through `lookup`, which maps an
/// environment variable name to its value.
pub(crate) fn proxy_from_lookup<F>(target: &Url, lookup: F) -> Option<Url>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| {
        lookup(&name.to_ascii_uppercase()).or_else(|| lookup(&name.to_ascii_lowercase())).filter(|value| !value.is_empty())
    };

    let host = target.host_str()?;
    if is_loopback(host) {
        return None;
    }

    if let Some(no_proxy) = read("no_proxy")
        && bypasses(&no_proxy, host, target.port_or_known_default())
    {
        return None;
    }

    let raw = match target.scheme() {
        "https" => read("https_proxy"),
        "http" => read("http_proxy"),
        _ => None,
    }
    .or_else(|| read("all_proxy"))?;

    parse_proxy_value(&raw)
}

fn parse_proxy_value(raw: &str) -> Option<Url> {
    match Url::parse(raw) {
        Ok(url) if url.host_str().is_some() => Some(url),
        // a bare "host:port" parses with the host as scheme
        _ => Url::parse(&format!("http://{raw}")).ok().filter(|url| url.host_str().is_some()),
    }
}

fn is_loopback(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<std::net::IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

fn bypasses(no_proxy: &str, host: &str, port: Option<u16>) -> bool {
    let host = host.to_ascii_lowercase();
    no_proxy.split(',').map(str::trim).filter(|entry| !entry.is_empty()).any(|entry| {
        if entry == "*" {
            return true;
        }

        let (pattern, entry_port) = match entry.rsplit_once(':') {
            Some((name, p)) if !name.contains(']') && p.parse::<u16>().is_ok() => (name, p.parse::<u16>().ok()),
            _ => (entry, None),
        };
        if entry_port.is_some() && entry_port != port {
            return false;
        }

        let pattern = pattern.trim_start_matches('*').trim_start_matches('.').to_ascii_lowercase();
        host == pattern || host.ends_with(&format!(".{pattern}"))
    })
}
