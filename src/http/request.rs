//! Outgoing request description.

use http::{HeaderMap, Method};
use url::Url;

use crate::base::config::HttpVersion;
use crate::base::neterror::NetError;
use crate::http::body::RequestBody;

/// How strictly the requested HTTP version binds version negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersionPolicy {
    /// Use the requested version or fall back to a lower one.
    #[default]
    RequestVersionOrLower,
    /// Use the requested version or upgrade when the pool knows a higher
    /// one is available (Alt-Svc).
    RequestVersionOrHigher,
    /// Exactly the requested version; any fallback surfaces as an error.
    RequestVersionExact,
}

/// One request as the pool consumes it: method, target, version intent,
/// headers, and a body that can copy itself into the connection.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    /// Requested version; negotiated downward/upward per `version_policy`.
    pub version: HttpVersion,
    pub version_policy: HttpVersionPolicy,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Whether the request carries `Expect: 100-continue` semantics.
    pub expect_continue: bool,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            version: HttpVersion::Http2,
            version_policy: HttpVersionPolicy::default(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            expect_continue: false,
        }
    }

    pub fn get(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;
        Ok(Self::new(Method::GET, url))
    }

    pub fn post(url: &str, body: impl Into<RequestBody>) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;
        let mut req = Self::new(Method::POST, url);
        req.body = body.into();
        Ok(req)
    }

    /// Destination host, or an error for host-less URLs.
    pub fn host(&self) -> Result<&str, NetError> {
        self.url.host_str().ok_or(NetError::InvalidUrl)
    }

    /// Destination port with scheme defaults applied.
    pub fn port(&self) -> Result<u16, NetError> {
        self.url.port_or_known_default().ok_or(NetError::InvalidUrl)
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// Origin-form request target: path plus optional query.
    pub fn target(&self) -> String {
        let path = self.url.path();
        match self.url.query() {
            Some(q) => format!("{path}?{q}"),
            None => path.to_string(),
        }
    }

    /// `host` or `host:port` for the Host header / :authority, eliding
    /// default ports.
    pub fn authority(&self) -> Result<String, NetError> {
        let host = self.host()?;
        let port = self.port()?;
        let default = if self.is_secure() { 443 } else { 80 };
        if port == default {
            Ok(host.to_string())
        } else {
            Ok(format!("{host}:{port}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_includes_query() {
        let req = HttpRequest::get("http://example.com/a/b?x=1&y=2").unwrap();
        assert_eq!(req.target(), "/a/b?x=1&y=2");
        assert_eq!(req.authority().unwrap(), "example.com");
    }

    #[test]
    fn authority_keeps_non_default_port() {
        let req = HttpRequest::get("https://example.com:8443/").unwrap();
        assert_eq!(req.authority().unwrap(), "example.com:8443");
        assert!(req.is_secure());
        let req = HttpRequest::get("https://example.com:443/").unwrap();
        assert_eq!(req.authority().unwrap(), "example.com");
    }

    #[test]
    fn invalid_url_rejected() {
        assert_eq!(HttpRequest::get("not a url").unwrap_err(), NetError::InvalidUrl);
    }
}
