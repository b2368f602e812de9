//! Alt-Svc tracking for HTTP/3 upgrades (RFC 7838).
//!
//! One candidate HTTP/3 authority per pool, with an expiry clamp, a
//! cooldown blocklist for authorities that failed to connect, and a
//! global kill-switch once too many authorities have been blocklisted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

/// Hard ceiling on how long an advertisement may stay valid.
const MAX_ALTSVC_LIFETIME: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Default freshness when no `ma` parameter is present (RFC 7838).
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a failed authority stays blocklisted.
const BLOCKLIST_COOLDOWN: Duration = Duration::from_secs(10 * 60);

/// Past this many blocklisted authorities, Alt-Svc upgrades are disabled
/// entirely for one cooldown window.
const BLOCKLIST_DISABLE_THRESHOLD: usize = 8;

/// An advertised alternative HTTP/3 endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AltAuthority {
    /// Empty advertisement host means "same host as the origin".
    pub host: Option<String>,
    pub port: u16,
}

/// Per-pool Alt-Svc state.
pub struct AltSvcState {
    candidate: Option<(AltAuthority, Instant)>,
    blocklist: HashMap<AltAuthority, Instant>,
    disabled_until: Option<Instant>,
}

impl AltSvcState {
    pub fn new() -> Self {
        Self {
            candidate: None,
            blocklist: HashMap::new(),
            disabled_until: None,
        }
    }

    /// Ingest one `Alt-Svc` header value.
    pub fn process_header_value(&mut self, value: &str) {
        let value = value.trim();
        if value.eq_ignore_ascii_case("clear") {
            debug!("alt-svc cleared by origin");
            self.candidate = None;
            return;
        }
        if self.is_disabled() {
            return;
        }
        for entry in value.split(',') {
            if let Some((authority, max_age)) = parse_alternative(entry) {
                let expiry = Instant::now() + max_age.min(MAX_ALTSVC_LIFETIME);
                if !self.is_blocklisted(&authority) {
                    debug!(?authority, "alt-svc h3 authority learned");
                    self.candidate = Some((authority, expiry));
                    return;
                }
            }
        }
    }

    /// The usable candidate authority, if fresh and not suppressed.
    pub fn current(&self) -> Option<AltAuthority> {
        if self.is_disabled() {
            return None;
        }
        match &self.candidate {
            Some((authority, expiry)) if *expiry > Instant::now() => {
                if self.is_blocklisted(authority) {
                    None
                } else {
                    Some(authority.clone())
                }
            }
            _ => None,
        }
    }

    /// A connection attempt to `authority` failed: cool it down, and trip
    /// the global switch when too many have failed.
    pub fn report_failure(&mut self, authority: AltAuthority) {
        let now = Instant::now();
        self.blocklist.retain(|_, until| *until > now);
        self.blocklist
            .insert(authority, now + BLOCKLIST_COOLDOWN);
        if self.blocklist.len() > BLOCKLIST_DISABLE_THRESHOLD {
            debug!("alt-svc disabled: blocklist threshold reached");
            self.disabled_until = Some(now + BLOCKLIST_COOLDOWN);
        }
    }

    pub fn clear(&mut self) {
        self.candidate = None;
    }

    fn is_blocklisted(&self, authority: &AltAuthority) -> bool {
        matches!(self.blocklist.get(authority), Some(until) if *until > Instant::now())
    }

    fn is_disabled(&self) -> bool {
        matches!(self.disabled_until, Some(until) if until > Instant::now())
    }
}

impl Default for AltSvcState {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one alternative like `h3=":443"; ma=86400`. Only h3 entries are
/// interesting; everything else returns `None`.
fn parse_alternative(entry: &str) -> Option<(AltAuthority, Duration)> {
    let mut parts = entry.split(';');
    let first = parts.next()?.trim();
    let (protocol, authority) = first.split_once('=')?;
    if !protocol.trim().eq_ignore_ascii_case("h3") {
        return None;
    }
    let authority = authority.trim().trim_matches('"');
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok()?),
        None => return None,
    };
    let host = if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    };

    let mut max_age = DEFAULT_MAX_AGE;
    for param in parts {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("ma") {
            if let Ok(secs) = value.trim().parse::<u64>() {
                max_age = Duration::from_secs(secs);
            }
        }
    }
    Some((AltAuthority { host, port }, max_age))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_h3_advertisement() {
        let (authority, max_age) = parse_alternative("h3=\":443\"; ma=3600").unwrap();
        assert_eq!(authority, AltAuthority { host: None, port: 443 });
        assert_eq!(max_age, Duration::from_secs(3600));
    }

    #[test]
    fn parses_explicit_host() {
        let (authority, _) = parse_alternative("h3=\"alt.example.com:8443\"").unwrap();
        assert_eq!(authority.host.as_deref(), Some("alt.example.com"));
        assert_eq!(authority.port, 8443);
    }

    #[test]
    fn non_h3_entries_skipped() {
        assert!(parse_alternative("h2=\":443\"").is_none());
        let mut state = AltSvcState::new();
        state.process_header_value("h2=\":443\", h3=\":443\"");
        assert_eq!(state.current().unwrap().port, 443);
    }

    #[test]
    fn clear_expires_immediately() {
        let mut state = AltSvcState::new();
        state.process_header_value("h3=\":443\"");
        assert!(state.current().is_some());
        state.process_header_value("clear");
        assert!(state.current().is_none());
    }

    #[test]
    fn lifetime_clamped_to_three_days() {
        let (_, max_age) = parse_alternative("h3=\":443\"; ma=999999999").unwrap();
        // The clamp is applied at ingestion.
        let mut state = AltSvcState::new();
        state.process_header_value("h3=\":443\"; ma=999999999");
        assert!(state.current().is_some());
        assert!(max_age > MAX_ALTSVC_LIFETIME);
    }

    #[test]
    fn failed_authority_blocklisted() {
        let mut state = AltSvcState::new();
        state.process_header_value("h3=\":443\"");
        let authority = state.current().unwrap();
        state.report_failure(authority);
        assert!(state.current().is_none());
    }

    #[test]
    fn blocklist_threshold_disables_upgrades() {
        let mut state = AltSvcState::new();
        for port in 1000..1009u16 {
            state.report_failure(AltAuthority { host: None, port });
        }
        // 9 blocklisted authorities is past the threshold of 8.
        state.process_header_value("h3=\":443\"");
        assert!(state.current().is_none());
    }

    #[test]
    fn malformed_entries_ignored() {
        assert!(parse_alternative("h3=garbage").is_none());
        assert!(parse_alternative("h3=\":not_a_port\"").is_none());
        assert!(parse_alternative("").is_none());
    }
}
