//! HTTP/2 engine tests against a scripted frame-level server.
//!
//! The server side speaks raw frames over loopback TCP using the crate's
//! own frame and HPACK codecs, which keeps the wire bytes honest without
//! a second HTTP/2 implementation in the dev-dependencies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use socknet::base::config::{ConnectionSettings, KeepAlivePingPolicy};
use socknet::base::neterror::NetError;
use socknet::codec::hpack;
use socknet::codec::HeaderField;
use socknet::h2::frame::{
    self, ErrorCode, FrameHeader, FRAME_DATA, FRAME_HEADER_LEN, FRAME_HEADERS, FRAME_PING,
    FRAME_SETTINGS, FRAME_WINDOW_UPDATE,
};
use socknet::h2::settings::Settings;
use socknet::h2::Http2Connection;
use socknet::http::HttpRequest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

struct ScriptedServer {
    stream: TcpStream,
    decoder: hpack::Decoder,
    encoder: hpack::Encoder,
}

impl ScriptedServer {
    /// Accept one connection and complete the preface exchange.
    async fn accept(listener: TcpListener, server_settings: Settings) -> Self {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut preface = [0u8; 24];
        stream.read_exact(&mut preface).await.unwrap();
        assert_eq!(&preface, PREFACE);

        let mut buf = Vec::new();
        frame::encode_settings_frame(&server_settings, false, &mut buf);
        stream.write_all(&buf).await.unwrap();

        let mut server = Self {
            stream,
            decoder: hpack::Decoder::new(4096),
            encoder: hpack::Encoder::new(4096),
        };

        // The client's first frame must be its SETTINGS.
        let (header, _) = server.read_raw_frame().await;
        assert_eq!(header.frame_type, FRAME_SETTINGS);
        assert_eq!(header.flags & frame::FLAG_ACK, 0);
        server
    }

    async fn read_raw_frame(&mut self) -> (FrameHeader, Vec<u8>) {
        let mut head = [0u8; FRAME_HEADER_LEN];
        self.stream.read_exact(&mut head).await.unwrap();
        let header = FrameHeader::parse(&head);
        let mut payload = vec![0u8; header.length as usize];
        self.stream.read_exact(&mut payload).await.unwrap();
        (header, payload)
    }

    /// Next frame, transparently ACKing pings and skipping bookkeeping
    /// frames the tests don't care about.
    async fn read_relevant_frame(&mut self) -> (FrameHeader, Vec<u8>) {
        loop {
            let (header, payload) = self.read_raw_frame().await;
            match header.frame_type {
                FRAME_PING if header.flags & frame::FLAG_ACK == 0 => {
                    let mut buf = Vec::new();
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(&payload);
                    frame::encode_ping_frame(u64::from_be_bytes(bytes), true, &mut buf);
                    self.stream.write_all(&buf).await.unwrap();
                }
                FRAME_SETTINGS | FRAME_WINDOW_UPDATE | FRAME_PING => {}
                _ => return (header, payload),
            }
        }
    }

    /// Read one request's HEADERS frame; returns (stream id, fields).
    async fn read_request_headers(&mut self) -> (u32, Vec<HeaderField>) {
        let (header, payload) = self.read_relevant_frame().await;
        assert_eq!(header.frame_type, FRAME_HEADERS, "expected HEADERS");
        assert_ne!(header.flags & frame::FLAG_END_HEADERS, 0);
        let decoded = self.decoder.decode(&payload, usize::MAX).unwrap();
        (header.stream_id, decoded.fields)
    }

    async fn write_response(&mut self, stream_id: u32, status: &str, body: &[u8]) {
        let fields = vec![
            HeaderField::new(&b":status"[..], status.as_bytes().to_vec()),
            HeaderField::new(
                &b"content-length"[..],
                body.len().to_string().into_bytes(),
            ),
        ];
        let mut block = Vec::new();
        self.encoder.encode(&fields, &mut block);
        let mut out = Vec::new();
        frame::encode_headers_frames(stream_id, &block, body.is_empty(), 16_384, &mut out);
        if !body.is_empty() {
            frame::encode_data_frame(stream_id, body, true, &mut out);
        }
        self.stream.write_all(&out).await.unwrap();
    }

    async fn write_goaway(&mut self, last_stream_id: u32) {
        let mut out = Vec::new();
        frame::encode_goaway_frame(last_stream_id, ErrorCode::NoError, &mut out);
        self.stream.write_all(&out).await.unwrap();
    }
}

async fn connect_pair(server_settings: Settings) -> (Arc<Http2Connection>, ScriptedServer) {
    connect_pair_with(server_settings, ConnectionSettings::default()).await
}

async fn connect_pair_with(
    server_settings: Settings,
    client_settings: ConnectionSettings,
) -> (Arc<Http2Connection>, ScriptedServer) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = tokio::spawn(async move {
        let stream = TcpStream::connect(addr).await.unwrap();
        Http2Connection::new(Box::new(stream), Arc::new(client_settings))
    });
    let server = ScriptedServer::accept(listener, server_settings).await;
    (client.await.unwrap(), server)
}

fn get_request() -> HttpRequest {
    HttpRequest::get("http://example.com/resource").unwrap()
}

#[tokio::test]
async fn get_round_trip() {
    let (conn, mut server) = connect_pair(Settings::default()).await;

    let client = tokio::spawn(async move {
        let response = conn.send_request(get_request()).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(response.version(), http::Version::HTTP_2);
        response.bytes().await.unwrap()
    });

    let (stream_id, fields) = server.read_request_headers().await;
    assert_eq!(stream_id, 1);
    assert_eq!(&fields[0].name[..], b":method");
    assert_eq!(&fields[0].value[..], b"GET");
    assert!(fields.iter().any(|f| f.name == ":path" && f.value == "/resource"));

    server.write_response(1, "200", b"hello h2").await;
    assert_eq!(&client.await.unwrap()[..], b"hello h2");
}

#[tokio::test]
async fn stream_ids_are_odd_and_increasing() {
    let (conn, mut server) = connect_pair(Settings::default()).await;

    for expected_id in [1u32, 3, 5] {
        let conn = Arc::clone(&conn);
        let client =
            tokio::spawn(async move { conn.send_request(get_request()).await.unwrap() });
        let (stream_id, _) = server.read_request_headers().await;
        assert_eq!(stream_id, expected_id);
        server.write_response(stream_id, "204", b"").await;
        let response = client.await.unwrap();
        assert_eq!(response.status(), http::StatusCode::NO_CONTENT);
    }
}

#[tokio::test]
async fn concurrent_stream_limit_queues_on_same_connection() {
    // End-to-end scenario: MAX_CONCURRENT_STREAMS=1 means the second
    // request waits at the connection level until the first stream
    // completes, then runs on the same connection.
    let server_settings = Settings {
        max_concurrent_streams: Some(1),
        ..Default::default()
    };
    let (conn, mut server) = connect_pair(server_settings).await;
    // Let the SETTINGS round trip land before submitting requests.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let first = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            let response = conn.send_request(get_request()).await.unwrap();
            response.bytes().await.unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = {
        let conn = Arc::clone(&conn);
        tokio::spawn(async move {
            let response = conn.send_request(get_request()).await.unwrap();
            response.bytes().await.unwrap()
        })
    };

    let (first_id, _) = server.read_request_headers().await;
    assert_eq!(first_id, 1);

    // The second HEADERS must not arrive while stream 1 is open.
    let held_back =
        tokio::time::timeout(Duration::from_millis(200), server.read_raw_frame()).await;
    assert!(held_back.is_err(), "second stream leaked past the limit");

    server.write_response(first_id, "200", b"one").await;
    assert_eq!(&first.await.unwrap()[..], b"one");

    let (second_id, _) = server.read_request_headers().await;
    assert_eq!(second_id, 3);
    server.write_response(second_id, "200", b"two").await;
    assert_eq!(&second.await.unwrap()[..], b"two");
}

#[tokio::test]
async fn goaway_marks_streams_above_cutoff_retryable() {
    // Streams {1,3,5,7} with GOAWAY last-processed-id = 3: streams 5 and
    // 7 become retryable-elsewhere, streams 1 and 3 complete normally.
    let (conn, mut server) = connect_pair(Settings::default()).await;

    let mut clients = Vec::new();
    for _ in 0..4 {
        let conn = Arc::clone(&conn);
        clients.push(tokio::spawn(async move {
            match conn.send_request(get_request()).await {
                Ok(response) => Ok(response.bytes().await.unwrap()),
                Err(e) => Err(e),
            }
        }));
        // Keep submission order deterministic.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut seen = Vec::new();
    for _ in 0..4 {
        let (stream_id, _) = server.read_request_headers().await;
        seen.push(stream_id);
    }
    assert_eq!(seen, vec![1, 3, 5, 7]);

    server.write_goaway(3).await;
    server.write_response(1, "200", b"one").await;
    server.write_response(3, "200", b"three").await;

    let mut ok = Vec::new();
    let mut retryable = 0;
    for client in clients {
        match client.await.unwrap() {
            Ok(body) => ok.push(body),
            Err(e) => {
                assert_eq!(e, NetError::RetryOnNewConnection);
                retryable += 1;
            }
        }
    }
    ok.sort();
    assert_eq!(ok, vec!["one".as_bytes(), "three".as_bytes()]);
    assert_eq!(retryable, 2);
    assert!(conn.is_shutting_down());
}

#[tokio::test]
async fn refused_stream_is_retryable_elsewhere() {
    let (conn, mut server) = connect_pair(Settings::default()).await;

    let client = tokio::spawn(async move { conn.send_request(get_request()).await });

    let (stream_id, _) = server.read_request_headers().await;
    let mut out = Vec::new();
    frame::encode_rst_stream_frame(stream_id, ErrorCode::RefusedStream, &mut out);
    server.stream.write_all(&out).await.unwrap();

    assert_eq!(
        client.await.unwrap().unwrap_err(),
        NetError::RetryOnNewConnection
    );
}

#[tokio::test]
async fn request_body_respects_stream_window() {
    // A 6-byte initial stream window forces the body send to block on
    // WINDOW_UPDATE credit and accept partial grants.
    let server_settings = Settings {
        initial_window_size: 6,
        ..Default::default()
    };
    let (conn, mut server) = connect_pair(server_settings).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = tokio::spawn(async move {
        let request =
            HttpRequest::post("http://example.com/upload", "0123456789abcdef").unwrap();
        let response = conn.send_request(request).await.unwrap();
        response.status()
    });

    let (stream_id, _) = server.read_request_headers().await;
    let mut received = Vec::new();
    loop {
        let (header, payload) = server.read_relevant_frame().await;
        assert_eq!(header.frame_type, FRAME_DATA);
        received.extend_from_slice(&payload);
        if header.flags & frame::FLAG_END_STREAM != 0 {
            break;
        }
        // Window credit arrives in dribbles.
        if !payload.is_empty() {
            let mut out = Vec::new();
            frame::encode_window_update_frame(stream_id, payload.len() as u32, &mut out);
            server.stream.write_all(&out).await.unwrap();
        }
    }
    assert_eq!(received, b"0123456789abcdef");

    server.write_response(stream_id, "200", b"").await;
    assert_eq!(client.await.unwrap(), http::StatusCode::OK);
}

#[tokio::test]
async fn missed_keepalive_ack_aborts_connection() {
    let client_settings = ConnectionSettings {
        keep_alive_ping_delay: Some(Duration::from_millis(100)),
        keep_alive_ping_timeout: Duration::from_millis(200),
        keep_alive_ping_policy: KeepAlivePingPolicy::Always,
        ..Default::default()
    };
    let (conn, mut server) = connect_pair_with(Settings::default(), client_settings).await;

    // Swallow every frame without ever ACKing the keep-alive ping.
    let server_task = tokio::spawn(async move {
        loop {
            let mut head = [0u8; FRAME_HEADER_LEN];
            if server.stream.read_exact(&mut head).await.is_err() {
                return;
            }
            let header = FrameHeader::parse(&head);
            let mut payload = vec![0u8; header.length as usize];
            if server.stream.read_exact(&mut payload).await.is_err() {
                return;
            }
        }
    });

    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if conn.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("keep-alive timeout should abort the connection");
    server_task.abort();
}

#[tokio::test]
async fn oversized_first_frame_is_protocol_error() {
    // A peer that answers the preface with non-HTTP/2 bytes looks like an
    // oversized first frame and must fail the connection.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut sink = vec![0u8; 1024];
        let _ = stream.read(&mut sink).await;
        let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let conn = Http2Connection::new(Box::new(stream), Arc::new(ConnectionSettings::default()));
    let err = conn.send_request(get_request()).await.unwrap_err();
    assert_eq!(err, NetError::Http2ProtocolError);
}

#[tokio::test]
async fn response_trailers_are_exposed() {
    let (conn, mut server) = connect_pair(Settings::default()).await;

    let client = tokio::spawn(async move {
        let response = conn.send_request(get_request()).await.unwrap();
        let mut body = response.body;
        let mut collected = Vec::new();
        while let Some(chunk) = body.chunk().await.unwrap() {
            collected.extend_from_slice(&chunk);
        }
        let trailers: HashMap<String, String> = body
            .trailers()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap().to_string()))
            .collect();
        (collected, trailers)
    });

    let (stream_id, _) = server.read_request_headers().await;

    // HEADERS + DATA (not end) + trailing HEADERS (end).
    let fields = vec![HeaderField::new(&b":status"[..], &b"200"[..])];
    let mut block = Vec::new();
    server.encoder.encode(&fields, &mut block);
    let mut out = Vec::new();
    frame::encode_headers_frames(stream_id, &block, false, 16_384, &mut out);
    frame::encode_data_frame(stream_id, b"payload", false, &mut out);
    let trailer_fields = vec![HeaderField::new(&b"x-digest"[..], &b"xyz"[..])];
    let mut trailer_block = Vec::new();
    server.encoder.encode(&trailer_fields, &mut trailer_block);
    let start = out.len();
    frame::encode_headers_frames(stream_id, &trailer_block, false, 16_384, &mut out);
    // Trailing HEADERS carries END_STREAM.
    out[start + 4] |= frame::FLAG_END_STREAM;
    server.stream.write_all(&out).await.unwrap();

    let (body, trailers) = client.await.unwrap();
    assert_eq!(body, b"payload");
    assert_eq!(trailers.get("x-digest").map(String::as_str), Some("xyz"));

    // GOAWAY after completion leaves nothing retryable.
    server.write_goaway(stream_id).await;
}
