//! Destination identity for pooling.

use url::Url;

use crate::base::neterror::NetError;
use crate::http::request::HttpRequest;

/// How the destination is reached at the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Plain TCP.
    Http,
    /// TLS over TCP.
    Https,
    /// Plain requests sent through an HTTP proxy (absolute-form).
    HttpProxied,
    /// TLS through a CONNECT tunnel.
    HttpsProxiedTunnel,
}

/// Uniquely identifies one connection pool. Immutable after construction;
/// the pool-manager map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub kind: PoolKind,
    pub host: String,
    pub port: u16,
    /// TLS server name when it differs from `host`.
    pub sni_host: Option<String>,
    pub proxy_uri: Option<String>,
    /// Separates pools carrying different ambient credentials.
    pub credential_identity: Option<String>,
}

impl PoolKey {
    pub fn from_request(request: &HttpRequest, proxy: Option<&Url>) -> Result<Self, NetError> {
        let host = request.host()?.to_ascii_lowercase();
        let port = request.port()?;
        let secure = request.is_secure();
        let kind = match (secure, proxy.is_some()) {
            (false, false) => PoolKind::Http,
            (true, false) => PoolKind::Https,
            (false, true) => PoolKind::HttpProxied,
            (true, true) => PoolKind::HttpsProxiedTunnel,
        };
        Ok(Self {
            kind,
            host,
            port,
            sni_host: None,
            proxy_uri: proxy.map(|u| u.as_str().to_string()),
            credential_identity: None,
        })
    }

    /// Hostname to present for TLS SNI.
    pub fn server_name(&self) -> &str {
        self.sni_host.as_deref().unwrap_or(&self.host)
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.kind, PoolKind::Https | PoolKind::HttpsProxiedTunnel)
    }

    pub fn uses_proxy(&self) -> bool {
        matches!(
            self.kind,
            PoolKind::HttpProxied | PoolKind::HttpsProxiedTunnel
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_from_plain_request() {
        let req = HttpRequest::get("http://Example.com:8080/x").unwrap();
        let key = PoolKey::from_request(&req, None).unwrap();
        assert_eq!(key.kind, PoolKind::Http);
        assert_eq!(key.host, "example.com");
        assert_eq!(key.port, 8080);
        assert!(!key.is_secure());
    }

    #[test]
    fn key_from_secure_request_defaults_port() {
        let req = HttpRequest::get("https://example.com/").unwrap();
        let key = PoolKey::from_request(&req, None).unwrap();
        assert_eq!(key.kind, PoolKind::Https);
        assert_eq!(key.port, 443);
        assert_eq!(key.server_name(), "example.com");
    }

    #[test]
    fn proxied_keys_differ_from_direct() {
        let req = HttpRequest::get("https://example.com/").unwrap();
        let proxy = Url::parse("http://proxy.local:3128").unwrap();
        let direct = PoolKey::from_request(&req, None).unwrap();
        let proxied = PoolKey::from_request(&req, Some(&proxy)).unwrap();
        assert_ne!(direct, proxied);
        assert_eq!(proxied.kind, PoolKind::HttpsProxiedTunnel);
        assert!(proxied.uses_proxy());
    }
}
