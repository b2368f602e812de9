use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::base::config::{ConnectionSettings, HttpVersion};
use crate::base::neterror::NetError;
use crate::h1::{ConnectionReturn, Http1Connection};
use crate::h2::Http2Connection;
use crate::h3::quic::QuicConnector;
use crate::h3::Http3Connection;
use crate::http::request::{HttpRequest, HttpVersionPolicy};
use crate::http::response::HttpResponse;
use crate::http::RequestBody;
use crate::pool::altsvc::{AltAuthority, AltSvcState};
use crate::pool::key::PoolKey;
use crate::socket::client::BoxedSocket;
use crate::socket::connector::{Connector, ProxyTunnel, TlsHandshake};

type H1Waiter = oneshot::Sender<Result<Http1Connection, NetError>>;
type H2Waiter = oneshot::Sender<Result<Arc<Http2Connection>, NetError>>;
type H3Waiter = oneshot::Sender<Result<Arc<Http3Connection>, NetError>>;

struct PoolState {
    disposed: bool,

    // HTTP/1.1 sub-pool: exclusive connections.
    h1_idle: Vec<Http1Connection>,
    h1_queue: VecDeque<H1Waiter>,
    h1_associated: usize,
    h1_creation_pending: bool,

    // HTTP/2 sub-pool: shared multiplexed connections.
    h2_conns: Vec<Arc<Http2Connection>>,
    h2_queue: VecDeque<H2Waiter>,
    h2_creation_pending: bool,

    // HTTP/3: a single connection slot behind a creation lock.
    h3_conn: Option<Arc<Http3Connection>>,
    h3_creating: bool,
    h3_queue: VecDeque<H3Waiter>,
}

/// The collaborators a pool needs to build connections.
#[derive(Clone)]
pub struct PoolCollaborators {
    pub connector: Arc<dyn Connector>,
    pub tls: Option<Arc<dyn TlsHandshake>>,
    pub proxy_tunnel: Option<Arc<dyn ProxyTunnel>>,
    pub quic: Option<Arc<dyn QuicConnector>>,
}

/// Admission control and connection lifecycle for one destination.
pub struct HttpConnectionPool {
    key: PoolKey,
    settings: Arc<ConnectionSettings>,
    collab: PoolCollaborators,
    state: Mutex<PoolState>,
    altsvc: Mutex<AltSvcState>,
    /// Pre-authentication credential cache (storage only; challenge
    /// negotiation is an external stage).
    preauth: Mutex<HashMap<String, String>>,
    used_since_sweep: AtomicBool,
    weak_self: Weak<HttpConnectionPool>,
}

impl std::fmt::Debug for HttpConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("HttpConnectionPool")
            .field("key", &self.key)
            .field("h1_idle", &state.h1_idle.len())
            .field("h1_associated", &state.h1_associated)
            .field("h2_conns", &state.h2_conns.len())
            .field("h3_active", &state.h3_conn.is_some())
            .finish()
    }
}

impl HttpConnectionPool {
    pub fn new(
        key: PoolKey,
        settings: Arc<ConnectionSettings>,
        collab: PoolCollaborators,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            key,
            settings,
            collab,
            state: Mutex::new(PoolState {
                disposed: false,
                h1_idle: Vec::new(),
                h1_queue: VecDeque::new(),
                h1_associated: 0,
                h1_creation_pending: false,
                h2_conns: Vec::new(),
                h2_queue: VecDeque::new(),
                h2_creation_pending: false,
                h3_conn: None,
                h3_creating: false,
                h3_queue: VecDeque::new(),
            }),
            altsvc: Mutex::new(AltSvcState::new()),
            preauth: Mutex::new(HashMap::new()),
            used_since_sweep: AtomicBool::new(false),
            weak_self: weak.clone(),
        })
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Cache a pre-authentication credential for this destination.
    pub fn store_credential(&self, realm: impl Into<String>, credential: impl Into<String>) {
        self.preauth
            .lock()
            .unwrap()
            .insert(realm.into(), credential.into());
    }

    pub fn cached_credential(&self, realm: &str) -> Option<String> {
        self.preauth.lock().unwrap().get(realm).cloned()
    }

    // -- entry point: version detection, fallback, retry --

    /// Send with version selection and the bounded retry loop. Internal
    /// retry markers never escape: they either drive a new attempt or
    /// collapse into a terminal error.
    pub async fn send(self: &Arc<Self>, request: HttpRequest) -> Result<HttpResponse, NetError> {
        self.used_since_sweep.store(true, Ordering::Relaxed);

        let body_retryable = body_is_replayable(&request.body);
        let mut template = request;
        let mut target = self.initial_target_version(&template);
        let mut attempts = 0usize;

        loop {
            let attempt = if body_retryable {
                clone_request(&template)
            } else {
                // A one-shot streaming body cannot be replayed; the first
                // attempt consumes the original.
                let replacement = empty_request_like(&template);
                std::mem::replace(&mut template, replacement)
            };

            let result = self.send_attempt(attempt, target).await;
            match result {
                Ok(response) => {
                    self.absorb_alt_svc(&response);
                    return Ok(response);
                }
                Err(NetError::RetryLowerVersion) => {
                    if template.version_policy == HttpVersionPolicy::RequestVersionExact {
                        return Err(NetError::VersionNotSupported);
                    }
                    if !body_retryable {
                        return Err(NetError::ConnectionFailed);
                    }
                    attempts += 1;
                    if attempts > self.settings.max_connect_retries {
                        return Err(NetError::TooManyRetries);
                    }
                    debug!(?target, "downgrading after version fallback signal");
                    target = match target {
                        HttpVersion::Http3 => HttpVersion::Http2,
                        _ => HttpVersion::Http11,
                    };
                }
                Err(e @ (NetError::RetryOnNewConnection | NetError::RetryStreamLimitReached)) => {
                    if !body_retryable {
                        return Err(NetError::ConnectionFailed);
                    }
                    attempts += 1;
                    if attempts > self.settings.max_connect_retries {
                        return Err(NetError::TooManyRetries);
                    }
                    trace!(error = %e, attempts, "retrying request selection");
                }
                Err(e) if e.is_connect_failure() && attempts < self.settings.max_connect_retries => {
                    if !body_retryable {
                        return Err(e);
                    }
                    attempts += 1;
                    trace!(error = %e, attempts, "retrying after connect failure");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn initial_target_version(&self, request: &HttpRequest) -> HttpVersion {
        let ceiling = self.settings.max_http_version;
        let requested = request.version.min(ceiling);

        // HTTP/3 rides on either an explicit request or a fresh Alt-Svc
        // advertisement, and always needs the QUIC collaborator.
        if self.collab.quic.is_some() && ceiling >= HttpVersion::Http3 {
            let explicit = request.version == HttpVersion::Http3;
            let advertised = request.version_policy != HttpVersionPolicy::RequestVersionExact
                && self.altsvc.lock().unwrap().current().is_some();
            if explicit || advertised {
                return HttpVersion::Http3;
            }
        }

        match requested {
            HttpVersion::Http3 => HttpVersion::Http2, // no QUIC available
            HttpVersion::Http2 => {
                // Plain-text HTTP/2 needs prior knowledge; only an exact
                // version policy asks for it without TLS.
                if !self.key.is_secure()
                    && request.version_policy != HttpVersionPolicy::RequestVersionExact
                {
                    HttpVersion::Http11
                } else {
                    HttpVersion::Http2
                }
            }
            HttpVersion::Http11 => HttpVersion::Http11,
        }
    }

    async fn send_attempt(
        self: &Arc<Self>,
        request: HttpRequest,
        target: HttpVersion,
    ) -> Result<HttpResponse, NetError> {
        match target {
            HttpVersion::Http11 => self.send_h1(request).await,
            HttpVersion::Http2 => self.send_h2(request).await,
            HttpVersion::Http3 => self.send_h3(request).await,
        }
    }

    fn absorb_alt_svc(&self, response: &HttpResponse) {
        for value in response.headers.get_all(http::header::ALT_SVC) {
            if let Ok(text) = value.to_str() {
                self.altsvc.lock().unwrap().process_header_value(text);
            }
        }
    }

    // -- HTTP/1.1 --

    async fn send_h1(self: &Arc<Self>, request: HttpRequest) -> Result<HttpResponse, NetError> {
        let conn = self.get_h1_connection().await?;
        let hook = Box::new(H1Return {
            pool: self.weak_self.clone(),
        });
        match conn.send_request(request, hook).await {
            Ok(response) => Ok(response),
            Err(e) => {
                // The engine consumed the connection without handing it
                // back; reclaim the capacity slot here.
                let mut state = self.state.lock().unwrap();
                state.h1_associated = state.h1_associated.saturating_sub(1);
                self.maybe_spawn_h1_creation(&mut state);
                Err(e)
            }
        }
    }

    /// Pop a usable idle connection, or queue behind at most one pending
    /// creation attempt per free slot.
    async fn get_h1_connection(self: &Arc<Self>) -> Result<Http1Connection, NetError> {
        let rx = {
            let mut state = self.state.lock().unwrap();
            if state.disposed {
                return Err(NetError::ConnectionAborted);
            }

            // Expiration and liveness-checked idle pop.
            while let Some(conn) = state.h1_idle.pop() {
                if conn.is_expired() {
                    trace!("idle connection expired, dropping");
                    continue;
                }
                if conn.idle_duration() >= self.settings.pooled_connection_idle_timeout {
                    trace!("idle connection timed out, dropping");
                    continue;
                }
                if !conn.is_usable() {
                    trace!("idle connection failed liveness check, dropping");
                    continue;
                }
                state.h1_associated += 1;
                return Ok(conn);
            }

            let (tx, rx) = oneshot::channel();
            state.h1_queue.push_back(tx);
            self.maybe_spawn_h1_creation(&mut state);
            rx
        };

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(NetError::ConnectionAborted),
        }
    }

    /// Spawn exactly one creation task while under the concurrency cap.
    fn maybe_spawn_h1_creation(&self, state: &mut PoolState) {
        if state.h1_creation_pending
            || state.h1_queue.is_empty()
            || state.h1_associated >= self.settings.max_connections_per_server
            || state.disposed
        {
            return;
        }
        let Some(pool) = self.weak_self.upgrade() else {
            return;
        };
        state.h1_associated += 1;
        state.h1_creation_pending = true;
        tokio::spawn(async move {
            let result = pool.establish_h1().await;
            let mut state = pool.state.lock().unwrap();
            state.h1_creation_pending = false;
            match result {
                Ok(conn) => {
                    debug!("HTTP/1.1 connection established");
                    pool.hand_h1_to_waiter(&mut state, conn);
                }
                Err(e) => {
                    // Fail exactly one waiter; the count drops so the
                    // next waiter can trigger a fresh attempt.
                    warn!(error = %e, "HTTP/1.1 connection attempt failed");
                    state.h1_associated = state.h1_associated.saturating_sub(1);
                    if let Some(waiter) = state.h1_queue.pop_front() {
                        let _ = waiter.send(Err(e));
                    }
                }
            }
            pool.maybe_spawn_h1_creation(&mut state);
        });
    }

    async fn establish_h1(&self) -> Result<Http1Connection, NetError> {
        let (socket, alpn) = self.establish_socket(&["http/1.1"]).await?;
        if let Some(alpn) = alpn {
            if alpn != "http/1.1" {
                return Err(NetError::AlpnNegotiationFailed);
            }
        }
        Ok(Http1Connection::new(socket, Arc::clone(&self.settings)))
    }

    /// Direct handoff to the next live waiter, else the idle list.
    fn hand_h1_to_waiter(&self, state: &mut PoolState, mut conn: Http1Connection) {
        loop {
            match state.h1_queue.pop_front() {
                Some(waiter) => match waiter.send(Ok(conn)) {
                    Ok(()) => return,
                    // Waiter gave up (cancelled); try the next one.
                    Err(Ok(returned)) => conn = returned,
                    Err(Err(_)) => return,
                },
                None => {
                    state.h1_associated = state.h1_associated.saturating_sub(1);
                    if !state.disposed {
                        conn.mark_returned();
                        state.h1_idle.push(conn);
                    }
                    return;
                }
            }
        }
    }

    /// Return path for a connection that finished serving a response.
    fn return_h1_connection(&self, conn: Http1Connection, reusable: bool) {
        let mut state = self.state.lock().unwrap();
        state.h1_associated = state.h1_associated.saturating_sub(1);
        if !reusable || state.disposed || conn.is_expired() {
            trace!(reusable, "disposing returned connection");
            drop(conn);
        } else {
            state.h1_associated += 1;
            self.hand_h1_to_waiter(&mut state, conn);
        }
        self.maybe_spawn_h1_creation(&mut state);
    }

    fn on_h1_detached(&self) {
        let mut state = self.state.lock().unwrap();
        state.h1_associated = state.h1_associated.saturating_sub(1);
        self.maybe_spawn_h1_creation(&mut state);
    }

    // -- HTTP/2 --

    async fn send_h2(self: &Arc<Self>, request: HttpRequest) -> Result<HttpResponse, NetError> {
        let conn = self.get_h2_connection().await?;
        let result = conn.send_request(request).await;
        if let Some(value) = conn.take_alt_svc() {
            self.altsvc.lock().unwrap().process_header_value(&value);
        }
        result
    }

    async fn get_h2_connection(self: &Arc<Self>) -> Result<Arc<Http2Connection>, NetError> {
        let rx = {
            let mut state = self.state.lock().unwrap();
            if state.disposed {
                return Err(NetError::ConnectionAborted);
            }
            state.h2_conns.retain(|c| !c.is_closed());

            // Prefer a connection with stream credit; without the
            // multiple-connections flag there is at most one anyway, and
            // requests queue at the connection level.
            if let Some(conn) = state.h2_conns.iter().find(|c| c.can_accept_new_stream()) {
                return Ok(Arc::clone(conn));
            }
            if let Some(conn) = state
                .h2_conns
                .iter()
                .find(|c| !c.is_shutting_down())
                .filter(|_| !self.settings.enable_multiple_http2_connections)
            {
                // Saturated but alive: the request waits on this
                // connection's stream credit.
                return Ok(Arc::clone(conn));
            }

            let (tx, rx) = oneshot::channel();
            state.h2_queue.push_back(tx);
            self.maybe_spawn_h2_creation(&mut state);
            rx
        };

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(NetError::ConnectionAborted),
        }
    }

    fn h2_connection_cap(&self) -> usize {
        if self.settings.enable_multiple_http2_connections {
            usize::MAX
        } else {
            1
        }
    }

    fn maybe_spawn_h2_creation(&self, state: &mut PoolState) {
        let live = state
            .h2_conns
            .iter()
            .filter(|c| !c.is_shutting_down())
            .count();
        if state.h2_creation_pending
            || state.h2_queue.is_empty()
            || live >= self.h2_connection_cap()
            || state.disposed
        {
            return;
        }
        let Some(pool) = self.weak_self.upgrade() else {
            return;
        };
        state.h2_creation_pending = true;
        tokio::spawn(async move {
            let result = pool.establish_h2().await;
            let mut state = pool.state.lock().unwrap();
            state.h2_creation_pending = false;
            match result {
                Ok(conn) => {
                    debug!("HTTP/2 connection established");
                    state.h2_conns.push(Arc::clone(&conn));
                    // Drain the queue against this connection; requests
                    // beyond its stream credit still queue on it at the
                    // connection level unless multiple connections are on.
                    while let Some(waiter) = state.h2_queue.pop_front() {
                        let _ = waiter.send(Ok(Arc::clone(&conn)));
                    }
                }
                Err(e) => {
                    warn!(error = %e, "HTTP/2 connection attempt failed");
                    if let Some(waiter) = state.h2_queue.pop_front() {
                        let _ = waiter.send(Err(e));
                    }
                }
            }
            pool.maybe_spawn_h2_creation(&mut state);
        });
    }

    async fn establish_h2(&self) -> Result<Arc<Http2Connection>, NetError> {
        let (socket, alpn) = self.establish_socket(&["h2", "http/1.1"]).await?;
        if self.key.is_secure() {
            match alpn.as_deref() {
                Some("h2") => {}
                // The peer negotiated down during TLS setup.
                Some("http/1.1") | None => return Err(NetError::RetryLowerVersion),
                Some(_) => return Err(NetError::AlpnNegotiationFailed),
            }
        }
        Ok(Http2Connection::new(socket, Arc::clone(&self.settings)))
    }

    // -- HTTP/3 --

    async fn send_h3(self: &Arc<Self>, request: HttpRequest) -> Result<HttpResponse, NetError> {
        let authority = self.altsvc.lock().unwrap().current();
        let conn = match self.get_h3_connection(authority.clone()).await {
            Ok(conn) => conn,
            Err(e) => {
                if let Some(authority) = authority {
                    self.altsvc.lock().unwrap().report_failure(authority);
                }
                return Err(e);
            }
        };
        conn.send_request(request).await
    }

    /// The single HTTP/3 slot, serialized behind a creation lock.
    async fn get_h3_connection(
        self: &Arc<Self>,
        authority: Option<AltAuthority>,
    ) -> Result<Arc<Http3Connection>, NetError> {
        let rx = {
            let mut state = self.state.lock().unwrap();
            if state.disposed {
                return Err(NetError::ConnectionAborted);
            }
            if let Some(conn) = &state.h3_conn {
                if !conn.is_shutting_down() {
                    return Ok(Arc::clone(conn));
                }
                state.h3_conn = None;
            }
            let (tx, rx) = oneshot::channel();
            state.h3_queue.push_back(tx);
            self.maybe_spawn_h3_creation(&mut state, authority);
            rx
        };

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(NetError::ConnectionAborted),
        }
    }

    fn maybe_spawn_h3_creation(&self, state: &mut PoolState, authority: Option<AltAuthority>) {
        if state.h3_creating || state.h3_queue.is_empty() || state.disposed {
            return;
        }
        let Some(pool) = self.weak_self.upgrade() else {
            return;
        };
        state.h3_creating = true;
        tokio::spawn(async move {
            let result = pool.establish_h3(authority.clone()).await;
            let mut state = pool.state.lock().unwrap();
            state.h3_creating = false;
            match result {
                Ok(conn) => {
                    debug!("HTTP/3 connection established");
                    state.h3_conn = Some(Arc::clone(&conn));
                    while let Some(waiter) = state.h3_queue.pop_front() {
                        let _ = waiter.send(Ok(Arc::clone(&conn)));
                    }
                }
                Err(e) => {
                    warn!(error = %e, "HTTP/3 connection attempt failed");
                    if let Some(waiter) = state.h3_queue.pop_front() {
                        let _ = waiter.send(Err(e));
                    }
                    pool.maybe_spawn_h3_creation(&mut state, authority);
                    return;
                }
            }
            pool.maybe_spawn_h3_creation(&mut state, None);
        });
    }

    async fn establish_h3(
        &self,
        authority: Option<AltAuthority>,
    ) -> Result<Arc<Http3Connection>, NetError> {
        let Some(quic) = &self.collab.quic else {
            return Err(NetError::RetryLowerVersion);
        };
        let (host, port) = match &authority {
            Some(alt) => (
                alt.host.clone().unwrap_or_else(|| self.key.host.clone()),
                alt.port,
            ),
            None => (self.key.host.clone(), self.key.port),
        };
        let quic_conn = quic
            .connect(&host, port, self.key.server_name())
            .await?;
        Http3Connection::new(quic_conn, Arc::clone(&self.settings)).await
    }

    // -- transport establishment --

    async fn establish_socket(
        &self,
        alpn: &[&'static str],
    ) -> Result<(BoxedSocket, Option<String>), NetError> {
        let (connect_host, connect_port) = match &self.key.proxy_uri {
            Some(proxy) => {
                let url = url::Url::parse(proxy).map_err(|_| NetError::InvalidUrl)?;
                let host = url
                    .host_str()
                    .ok_or(NetError::InvalidUrl)?
                    .to_string();
                let port = url.port_or_known_default().ok_or(NetError::InvalidUrl)?;
                (host, port)
            }
            None => (self.key.host.clone(), self.key.port),
        };

        let mut socket = self
            .collab
            .connector
            .connect(&connect_host, connect_port)
            .await?;

        if self.key.uses_proxy() && self.key.is_secure() {
            let tunnel = self
                .collab
                .proxy_tunnel
                .as_ref()
                .ok_or(NetError::TunnelConnectionFailed)?;
            socket = tunnel
                .establish(socket, &self.key.host, self.key.port)
                .await?;
        }

        if self.key.is_secure() {
            let tls = self
                .collab
                .tls
                .as_ref()
                .ok_or(NetError::AlpnNegotiationFailed)?;
            let session = tls
                .handshake(socket, self.key.server_name(), alpn)
                .await?;
            return Ok((session.socket, session.alpn));
        }
        Ok((socket, None))
    }

    // -- scavenging --

    /// Periodic sweep: drop idle connections past their limits or failing
    /// the liveness probe. Returns true when the pool itself has been
    /// unused since the last sweep and holds nothing, meaning the manager
    /// may remove it.
    pub fn clean_cache_and_dispose_if_unused(&self) -> bool {
        let idle_timeout = self.settings.pooled_connection_idle_timeout;
        let mut state = self.state.lock().unwrap();

        state.h1_idle.retain(|conn| {
            let keep = !conn.is_expired()
                && conn.idle_duration() < idle_timeout
                && conn.is_usable();
            if !keep {
                trace!("scavenged idle HTTP/1.1 connection");
            }
            keep
        });

        state.h2_conns.retain(|conn| {
            if conn.is_closed() || conn.is_expired() {
                trace!("scavenged HTTP/2 connection");
                return false;
            }
            if conn.active_stream_count() == 0 && conn.idle_duration() >= idle_timeout {
                conn.shutdown();
                trace!("scavenged idle HTTP/2 connection");
                return false;
            }
            true
        });

        if let Some(conn) = &state.h3_conn {
            let idle = conn.active_request_count() == 0 && conn.idle_duration() >= idle_timeout;
            if conn.is_closed() || conn.is_expired() || idle {
                conn.shutdown();
                state.h3_conn = None;
                trace!("scavenged HTTP/3 connection");
            }
        }

        let used = self.used_since_sweep.swap(false, Ordering::Relaxed);
        !used
            && state.h1_associated == 0
            && state.h1_idle.is_empty()
            && state.h1_queue.is_empty()
            && state.h2_conns.is_empty()
            && state.h2_queue.is_empty()
            && state.h3_conn.is_none()
            && state.h3_queue.is_empty()
            && !state.h3_creating
    }

    /// Tear down everything; used by the manager on removal or network
    /// change.
    pub fn dispose(&self) {
        let mut state = self.state.lock().unwrap();
        state.disposed = true;
        state.h1_idle.clear();
        for conn in state.h2_conns.drain(..) {
            conn.shutdown();
        }
        if let Some(conn) = state.h3_conn.take() {
            conn.shutdown();
        }
        for waiter in state.h1_queue.drain(..) {
            let _ = waiter.send(Err(NetError::ConnectionAborted));
        }
        for waiter in state.h2_queue.drain(..) {
            let _ = waiter.send(Err(NetError::ConnectionAborted));
        }
        for waiter in state.h3_queue.drain(..) {
            let _ = waiter.send(Err(NetError::ConnectionAborted));
        }
        self.altsvc.lock().unwrap().clear();
    }

    // -- test/diagnostic accessors --

    pub fn idle_h1_count(&self) -> usize {
        self.state.lock().unwrap().h1_idle.len()
    }

    pub fn associated_h1_count(&self) -> usize {
        self.state.lock().unwrap().h1_associated
    }

    pub fn queued_h1_count(&self) -> usize {
        self.state.lock().unwrap().h1_queue.len()
    }

    pub fn h2_connection_count(&self) -> usize {
        self.state.lock().unwrap().h2_conns.len()
    }
}

/// Hook handed to the HTTP/1.1 engine so the finished body can give the
/// connection back; the pool stays the single owner.
struct H1Return {
    pool: Weak<HttpConnectionPool>,
}

impl ConnectionReturn for H1Return {
    fn return_connection(self: Box<Self>, conn: Http1Connection, reusable: bool) {
        if let Some(pool) = self.pool.upgrade() {
            pool.return_h1_connection(conn, reusable);
        }
    }

    fn detach(self: Box<Self>) {
        if let Some(pool) = self.pool.upgrade() {
            pool.on_h1_detached();
        }
    }
}

/// Whether the body can be replayed for a transparent retry.
fn body_is_replayable(body: &RequestBody) -> bool {
    matches!(body, RequestBody::Empty | RequestBody::Bytes(_))
}

/// Cheap structural copy for retry attempts; only replayable bodies.
fn clone_request(request: &HttpRequest) -> HttpRequest {
    let body = match &request.body {
        RequestBody::Empty => RequestBody::Empty,
        RequestBody::Bytes(b) => RequestBody::Bytes(b.clone()),
        RequestBody::Stream { .. } => unreachable!("streaming bodies are not replayed"),
    };
    HttpRequest {
        method: request.method.clone(),
        url: request.url.clone(),
        version: request.version,
        version_policy: request.version_policy,
        headers: request.headers.clone(),
        body,
        expect_continue: request.expect_continue,
    }
}

fn empty_request_like(request: &HttpRequest) -> HttpRequest {
    HttpRequest {
        method: request.method.clone(),
        url: request.url.clone(),
        version: request.version,
        version_policy: request.version_policy,
        headers: http::HeaderMap::new(),
        body: RequestBody::Empty,
        expect_continue: false,
    }
}
