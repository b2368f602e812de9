//! HTTP/3 engine tests over an in-memory fake QUIC transport.
//!
//! The fake implements the crate's QUIC collaborator traits with duplex
//! pipes, which is enough to exercise control-stream setup, request
//! streams, QPACK round trips, and GOAWAY semantics without a UDP stack.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use socknet::base::config::ConnectionSettings;
use socknet::base::neterror::NetError;
use socknet::codec::{qpack, HeaderField};
use socknet::h3::frame;
use socknet::h3::quic::{QuicConnection, QuicRecvStream, QuicSendStream};
use socknet::h3::settings::Settings as H3Settings;
use socknet::h3::Http3Connection;
use socknet::http::HttpRequest;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, Mutex};

// -- fake QUIC plumbing --

struct FakeSend {
    id: u64,
    inner: DuplexStream,
}

impl AsyncWrite for FakeSend {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }
    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl QuicSendStream for FakeSend {
    fn id(&self) -> u64 {
        self.id
    }
    fn reset(&mut self, _error_code: u64) {}
}

struct FakeRecv {
    id: u64,
    inner: DuplexStream,
}

impl AsyncRead for FakeRecv {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl QuicRecvStream for FakeRecv {
    fn id(&self) -> u64 {
        self.id
    }
    fn stop(&mut self, _error_code: u64) {}
}

/// A stream surfaced to the scripted server.
enum ServerStream {
    /// Client-initiated unidirectional stream.
    Uni(DuplexStream),
    /// Client-initiated bidirectional stream: (id, from-client, to-client).
    Bidi(u64, DuplexStream, DuplexStream),
}

struct FakeQuic {
    next_bidi_id: AtomicU64,
    next_uni_id: AtomicU64,
    to_server: mpsc::UnboundedSender<ServerStream>,
    from_server_uni: Mutex<mpsc::UnboundedReceiver<Box<dyn QuicRecvStream>>>,
    closed: AtomicBool,
}

struct ServerHandle {
    streams: mpsc::UnboundedReceiver<ServerStream>,
    to_client_uni: mpsc::UnboundedSender<Box<dyn QuicRecvStream>>,
    next_uni_id: AtomicU64,
}

fn fake_quic() -> (Arc<FakeQuic>, ServerHandle) {
    let (to_server, streams) = mpsc::unbounded_channel();
    let (to_client_uni, from_server_uni) = mpsc::unbounded_channel();
    (
        Arc::new(FakeQuic {
            // Client-initiated bidi ids: 0, 4, 8, ...
            next_bidi_id: AtomicU64::new(0),
            // Client-initiated uni ids: 2, 6, 10, ...
            next_uni_id: AtomicU64::new(2),
            to_server,
            from_server_uni: Mutex::new(from_server_uni),
            closed: AtomicBool::new(false),
        }),
        ServerHandle {
            streams,
            to_client_uni,
            // Server-initiated uni ids: 3, 7, 11, ...
            next_uni_id: AtomicU64::new(3),
        },
    )
}

impl QuicConnection for FakeQuic {
    fn open_bidirectional(
        &self,
    ) -> BoxFuture<'_, Result<(Box<dyn QuicSendStream>, Box<dyn QuicRecvStream>), NetError>>
    {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(NetError::ConnectionAborted);
            }
            let id = self.next_bidi_id.fetch_add(4, Ordering::SeqCst);
            let (c2s_w, c2s_r) = tokio::io::duplex(256 * 1024);
            let (s2c_w, s2c_r) = tokio::io::duplex(256 * 1024);
            self.to_server
                .send(ServerStream::Bidi(id, c2s_r, s2c_w))
                .map_err(|_| NetError::ConnectionAborted)?;
            Ok((
                Box::new(FakeSend { id, inner: c2s_w }) as Box<dyn QuicSendStream>,
                Box::new(FakeRecv { id, inner: s2c_r }) as Box<dyn QuicRecvStream>,
            ))
        })
    }

    fn open_unidirectional(&self) -> BoxFuture<'_, Result<Box<dyn QuicSendStream>, NetError>> {
        Box::pin(async move {
            let id = self.next_uni_id.fetch_add(4, Ordering::SeqCst);
            let (w, r) = tokio::io::duplex(64 * 1024);
            self.to_server
                .send(ServerStream::Uni(r))
                .map_err(|_| NetError::ConnectionAborted)?;
            Ok(Box::new(FakeSend { id, inner: w }) as Box<dyn QuicSendStream>)
        })
    }

    fn accept_unidirectional(
        &self,
    ) -> BoxFuture<'_, Result<Box<dyn QuicRecvStream>, NetError>> {
        Box::pin(async move {
            let mut rx = self.from_server_uni.lock().await;
            rx.recv().await.ok_or(NetError::ConnectionClosed)
        })
    }

    fn close(&self, _error_code: u64) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ServerHandle {
    /// Open the server's control stream and write SETTINGS on it.
    async fn send_control_settings(&mut self) -> DuplexStream {
        let id = self.next_uni_id.fetch_add(4, Ordering::SeqCst);
        let (mut w, r) = tokio::io::duplex(64 * 1024);
        self.to_client_uni
            .send(Box::new(FakeRecv { id, inner: r }))
            .unwrap();
        let settings = H3Settings::default();
        let mut buf = Vec::new();
        frame::encode_varint(&mut buf, 0x00); // control stream type
        frame::encode_frame_header(&mut buf, frame::FRAME_SETTINGS, settings.encoded_len() as u64);
        settings.encode(&mut buf);
        w.write_all(&buf).await.unwrap();
        w
    }

    /// Expect the client's control stream and validate its SETTINGS.
    async fn expect_client_control(&mut self) {
        let Some(ServerStream::Uni(mut stream)) = self.streams.recv().await else {
            panic!("expected client control stream first");
        };
        let mut buf = Vec::new();
        let mut chunk = [0u8; 256];
        // The type varint plus a SETTINGS frame arrive in one write.
        let n = stream.read(&mut chunk).await.unwrap();
        buf.extend_from_slice(&chunk[..n]);
        let (stream_type, used) = frame::decode_varint(&buf).unwrap();
        assert_eq!(stream_type, 0x00);
        let (frame_type, _, _) = frame::decode_frame_header(&buf[used..])
            .unwrap()
            .unwrap();
        assert_eq!(frame_type, frame::FRAME_SETTINGS);
        // Keep the stream open; the engine never closes its control side.
        tokio::spawn(async move {
            let mut sink = [0u8; 256];
            while let Ok(n) = stream.read(&mut sink).await {
                if n == 0 {
                    break;
                }
            }
        });
    }

    /// Accept one request stream and parse its HEADERS frame. Returns any
    /// bytes read past the header block (a gathered DATA envelope may ride
    /// in the same write).
    async fn accept_request(
        &mut self,
    ) -> (u64, Vec<HeaderField>, Vec<u8>, DuplexStream, DuplexStream) {
        let Some(ServerStream::Bidi(id, mut from_client, to_client)) = self.streams.recv().await
        else {
            panic!("expected request stream");
        };
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let (frame_type, len, header_len) = loop {
            if let Some(parsed) = frame::decode_frame_header(&buf).unwrap() {
                break parsed;
            }
            let n = from_client.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        };
        assert_eq!(frame_type, frame::FRAME_HEADERS);
        while buf.len() < header_len + len as usize {
            let n = from_client.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }
        let block_end = header_len + len as usize;
        let fields = qpack::decode(&buf[header_len..block_end], usize::MAX).unwrap();
        (id, fields, buf[block_end..].to_vec(), from_client, to_client)
    }
}

async fn write_response(
    to_client: &mut DuplexStream,
    status: &str,
    body: &[u8],
    close: bool,
) {
    let fields = vec![HeaderField::new(&b":status"[..], status.as_bytes().to_vec())];
    let mut block = Vec::new();
    qpack::encode(&fields, &mut block);
    let mut out = Vec::new();
    frame::encode_frame_header(&mut out, frame::FRAME_HEADERS, block.len() as u64);
    out.extend_from_slice(&block);
    if !body.is_empty() {
        frame::encode_frame_header(&mut out, frame::FRAME_DATA, body.len() as u64);
        out.extend_from_slice(body);
    }
    to_client.write_all(&out).await.unwrap();
    if close {
        to_client.shutdown().await.unwrap();
    }
}

fn h3_request(path: &str) -> HttpRequest {
    HttpRequest::get(&format!("https://example.com{path}")).unwrap()
}

#[tokio::test]
async fn get_round_trip_over_fake_quic() {
    let (quic, mut server) = fake_quic();
    let conn = Http3Connection::new(quic, Arc::new(ConnectionSettings::default()))
        .await
        .unwrap();

    server.expect_client_control().await;
    let _server_control = server.send_control_settings().await;

    let client = tokio::spawn(async move {
        let response = conn.send_request(h3_request("/doc")).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(response.version(), http::Version::HTTP_3);
        response.bytes().await.unwrap()
    });

    let (id, fields, _leftover, _from_client, mut to_client) = server.accept_request().await;
    assert_eq!(id, 0);
    assert!(fields.iter().any(|f| f.name == ":method" && f.value == "GET"));
    assert!(fields.iter().any(|f| f.name == ":path" && f.value == "/doc"));
    assert!(fields
        .iter()
        .any(|f| f.name == ":authority" && f.value == "example.com"));

    write_response(&mut to_client, "200", b"h3 body", true).await;
    assert_eq!(&client.await.unwrap()[..], b"h3 body");
}

#[tokio::test]
async fn informational_responses_are_skipped() {
    let (quic, mut server) = fake_quic();
    let conn = Http3Connection::new(quic, Arc::new(ConnectionSettings::default()))
        .await
        .unwrap();
    server.expect_client_control().await;

    let client = tokio::spawn(async move {
        let response = conn.send_request(h3_request("/early")).await.unwrap();
        response.status()
    });

    let (_, _, _leftover, _from_client, mut to_client) = server.accept_request().await;
    write_response(&mut to_client, "103", b"", false).await;
    write_response(&mut to_client, "204", b"", true).await;

    assert_eq!(client.await.unwrap(), http::StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn request_body_rides_with_headers() {
    // Known content length: HEADERS envelope, QPACK block, and the DATA
    // envelope arrive in one gathered write before the payload.
    let (quic, mut server) = fake_quic();
    let conn = Http3Connection::new(quic, Arc::new(ConnectionSettings::default()))
        .await
        .unwrap();
    server.expect_client_control().await;

    let client = tokio::spawn(async move {
        let request = HttpRequest::post("https://example.com/up", "body-bytes").unwrap();
        let response = conn.send_request(request).await.unwrap();
        response.status()
    });

    let (_, fields, leftover, mut from_client, mut to_client) = server.accept_request().await;
    assert!(fields
        .iter()
        .any(|f| f.name == "content-length" && f.value == "10"));

    // Next envelope is DATA with the full body; the gathered write means
    // it usually arrived together with the headers.
    let mut buf = leftover;
    let mut chunk = [0u8; 1024];
    let (frame_type, len, used) = loop {
        if let Some(parsed) = frame::decode_frame_header(&buf).unwrap() {
            break parsed;
        }
        let n = from_client.read(&mut chunk).await.unwrap();
        buf.extend_from_slice(&chunk[..n]);
    };
    assert_eq!(frame_type, frame::FRAME_DATA);
    assert_eq!(len, 10);
    while buf.len() < used + 10 {
        let n = from_client.read(&mut chunk).await.unwrap();
        buf.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(&buf[used..used + 10], b"body-bytes");

    write_response(&mut to_client, "200", b"", true).await;
    assert_eq!(client.await.unwrap(), http::StatusCode::OK);
}

#[tokio::test]
async fn goaway_aborts_streams_past_cutoff() {
    let (quic, mut server) = fake_quic();
    let conn = Http3Connection::new(quic, Arc::new(ConnectionSettings::default()))
        .await
        .unwrap();
    server.expect_client_control().await;
    let mut control = server.send_control_settings().await;

    let client = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move { conn.send_request(h3_request("/pending")).await })
    };

    // Take the request but never answer; announce GOAWAY with cutoff 0,
    // covering the in-flight stream id 0.
    let (id, _, _leftover, _from_client, _to_client) = server.accept_request().await;
    assert_eq!(id, 0);
    let mut out = Vec::new();
    frame::encode_frame_header(&mut out, frame::FRAME_GOAWAY, frame::varint_len(0) as u64);
    frame::encode_varint(&mut out, 0);
    control.write_all(&out).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(2), client)
        .await
        .expect("request must abort on GOAWAY")
        .unwrap()
        .unwrap_err();
    assert_eq!(err, NetError::RetryOnNewConnection);
    assert!(conn.is_shutting_down());
}

#[tokio::test]
async fn settings_on_request_stream_is_connection_fatal() {
    let (quic, mut server) = fake_quic();
    let quic_handle = Arc::clone(&quic);
    let conn = Http3Connection::new(quic, Arc::new(ConnectionSettings::default()))
        .await
        .unwrap();
    server.expect_client_control().await;

    let client = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move { conn.send_request(h3_request("/bad")).await })
    };

    let (_, _, _leftover, _from_client, mut to_client) = server.accept_request().await;
    let settings = H3Settings::default();
    let mut out = Vec::new();
    frame::encode_frame_header(
        &mut out,
        frame::FRAME_SETTINGS,
        settings.encoded_len() as u64,
    );
    settings.encode(&mut out);
    to_client.write_all(&out).await.unwrap();

    let err = client.await.unwrap().unwrap_err();
    assert_eq!(err, NetError::Http3FrameUnexpected);
    // Connection-level frame on a request stream tears the whole
    // connection down.
    assert!(quic_handle.is_closed());
}
