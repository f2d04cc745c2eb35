use std::time::Duration;

use scrolltosco_client::{
    ChatRequest, ChatTransport, ExchangeEvent, ExchangeHandle, ExchangeId, ExchangePayload,
    HttpChatTransport, TransportConfig, WireMessage, WireRole,
};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// What the scripted server does after writing its last part.
enum Hangup {
    Close,
    Stall,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

async fn read_request(socket: &mut TcpStream) {
    let mut received = Vec::new();
    let mut buffer = [0_u8; 4096];
    loop {
        let read = match socket.read(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(read) => read,
        };
        received.extend_from_slice(&buffer[..read]);

        if let Some(header_end) = find(&received, b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&received[..header_end]).to_ascii_lowercase();
            let body_len = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if received.len() >= header_end + 4 + body_len {
                return;
            }
        }
    }
}

/// Serves one connection with hand-written response bytes, pausing between parts.
async fn scripted_server(parts: Vec<Vec<u8>>, hangup: Hangup) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        read_request(&mut socket).await;
        for part in parts {
            if socket.write_all(&part).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if let Hangup::Stall = hangup {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    });

    format!("http://{address}")
}

fn partial_response(status_line: &str, body: &str) -> Vec<Vec<u8>> {
    vec![
        format!("HTTP/1.1 {status_line}\r\ncontent-type: text/plain\r\ncontent-length: 100\r\n\r\n")
            .into_bytes(),
        body.as_bytes().to_vec(),
    ]
}

fn failure_message(event: Option<&ExchangeEvent>) -> &str {
    match event.map(|event| &event.payload) {
        Some(ExchangePayload::Failed(message)) => message,
        other => panic!("expected failure, got {other:?}"),
    }
}

fn sample_request(exchange: u64) -> ChatRequest {
    let mut context = serde_json::Map::new();
    context.insert("type".to_string(), json!("photo"));
    context.insert("riskLevel".to_string(), json!("LOW"));

    ChatRequest::new(
        ExchangeId::new(exchange),
        vec![WireMessage::new(WireRole::User, "Is my posture okay?")],
    )
    .with_context(context)
}

async fn collect_events(handle: ExchangeHandle) -> Vec<ExchangeEvent> {
    let ExchangeHandle { mut stream, worker } = handle;
    let worker = tokio::spawn(worker);

    let mut events = Vec::new();
    while let Some(event) = stream.recv().await {
        events.push(event);
    }
    worker.await.expect("worker finished");
    events
}

fn body_text(events: &[ExchangeEvent]) -> String {
    let bytes = events
        .iter()
        .filter_map(|event| match &event.payload {
            ExchangePayload::Chunk(chunk) => Some(chunk.to_vec()),
            _ => None,
        })
        .flatten()
        .collect::<Vec<u8>>();
    String::from_utf8(bytes).expect("utf-8 body")
}

#[tokio::test]
async fn streams_body_between_opened_and_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat"))
        .and(body_json(json!({
            "messages": [{"role": "user", "content": "Is my posture okay?"}],
            "context": {"type": "photo", "riskLevel": "LOW"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string("Your shoulders look level. ✓"))
        .expect(1)
        .mount(&server)
        .await;

    let transport =
        HttpChatTransport::new(TransportConfig::new(server.uri())).expect("valid config");
    let events = collect_events(transport.open_exchange(sample_request(3)).expect("opened")).await;

    assert_eq!(
        events.first().map(|event| &event.payload),
        Some(&ExchangePayload::Opened { status: 200 })
    );
    assert_eq!(
        events.last().map(|event| &event.payload),
        Some(&ExchangePayload::Done)
    );
    assert!(events.iter().all(|event| event.exchange_id == ExchangeId::new(3)));
    assert_eq!(body_text(&events), "Your shoulders look level. ✓");
}

#[tokio::test]
async fn non_success_status_fails_without_opening() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model warming up"))
        .mount(&server)
        .await;

    let transport =
        HttpChatTransport::new(TransportConfig::new(server.uri())).expect("valid config");
    let events = collect_events(transport.open_exchange(sample_request(1)).expect("opened")).await;

    assert_eq!(events.len(), 1);
    match &events[0].payload {
        ExchangePayload::Failed(message) => {
            assert!(message.contains("503"), "unexpected message: {message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_endpoint_reports_failure() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let transport = HttpChatTransport::new(TransportConfig::new(uri)).expect("valid config");
    let events = collect_events(transport.open_exchange(sample_request(2)).expect("opened")).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0].payload, ExchangePayload::Failed(_)));
}

#[tokio::test]
async fn slow_response_hits_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let config =
        TransportConfig::new(server.uri()).with_request_timeout(Duration::from_millis(100));
    let transport = HttpChatTransport::new(config).expect("valid config");
    let events = collect_events(transport.open_exchange(sample_request(4)).expect("opened")).await;

    assert_eq!(events.len(), 1);
    match &events[0].payload {
        ExchangePayload::Failed(message) => {
            assert!(message.contains("timed out"), "unexpected message: {message}");
        }
        other => panic!("expected timeout failure, got {other:?}"),
    }
}

#[tokio::test]
async fn cancelling_stops_worker_without_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("never read")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let transport =
        HttpChatTransport::new(TransportConfig::new(server.uri())).expect("valid config");
    let ExchangeHandle { mut stream, worker } =
        transport.open_exchange(sample_request(5)).expect("opened");
    let worker = tokio::spawn(worker);

    assert!(stream.cancel());
    tokio::time::timeout(Duration::from_secs(2), worker)
        .await
        .expect("worker exits promptly")
        .expect("worker did not panic");
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn stalled_error_body_still_fails_exchange() {
    let base_url = scripted_server(
        partial_response("500 Internal Server Error", "upstrea"),
        Hangup::Stall,
    )
    .await;

    let config = TransportConfig::new(base_url)
        .with_request_timeout(Duration::from_millis(200))
        .with_chunk_idle_timeout(Duration::from_millis(200));
    let transport = HttpChatTransport::new(config).expect("valid config");
    let events = tokio::time::timeout(
        Duration::from_secs(3),
        collect_events(transport.open_exchange(sample_request(6)).expect("opened")),
    )
    .await
    .expect("terminal event arrives");

    assert_eq!(events.len(), 1);
    let message = failure_message(events.first());
    assert!(message.contains("500"), "unexpected message: {message}");
}

#[tokio::test]
async fn idle_body_fails_after_partial_chunk() {
    let base_url = scripted_server(partial_response("200 OK", "Your curve"), Hangup::Stall).await;

    let config =
        TransportConfig::new(base_url).with_chunk_idle_timeout(Duration::from_millis(200));
    let transport = HttpChatTransport::new(config).expect("valid config");
    let events = tokio::time::timeout(
        Duration::from_secs(3),
        collect_events(transport.open_exchange(sample_request(7)).expect("opened")),
    )
    .await
    .expect("terminal event arrives");

    assert_eq!(
        events.first().map(|event| &event.payload),
        Some(&ExchangePayload::Opened { status: 200 })
    );
    assert_eq!(body_text(&events), "Your curve");
    let message = failure_message(events.last());
    assert!(message.contains("no response data"), "unexpected message: {message}");
}

#[tokio::test]
async fn truncated_body_reports_read_failure() {
    let base_url = scripted_server(partial_response("200 OK", "Based on"), Hangup::Close).await;

    let transport = HttpChatTransport::new(TransportConfig::new(base_url)).expect("valid config");
    let events = tokio::time::timeout(
        Duration::from_secs(3),
        collect_events(transport.open_exchange(sample_request(8)).expect("opened")),
    )
    .await
    .expect("terminal event arrives");

    assert_eq!(body_text(&events), "Based on");
    assert!(!events.iter().any(|event| event.payload == ExchangePayload::Done));
    let message = failure_message(events.last());
    assert!(message.contains("failed to read response body"), "unexpected message: {message}");
}

#[tokio::test]
async fn chunked_body_split_inside_character_arrives_intact() {
    let mut first = b"3\r\n25".to_vec();
    first.extend_from_slice(&[0xC2, b'\r', b'\n']);
    let mut second = b"4\r\n".to_vec();
    second.extend_from_slice(&[0xB0, b' ', b'o', b'k', b'\r', b'\n']);

    let base_url = scripted_server(
        vec![
            b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ntransfer-encoding: chunked\r\n\r\n"
                .to_vec(),
            first,
            second,
            b"0\r\n\r\n".to_vec(),
        ],
        Hangup::Close,
    )
    .await;

    let transport = HttpChatTransport::new(TransportConfig::new(base_url)).expect("valid config");
    let events = collect_events(transport.open_exchange(sample_request(9)).expect("opened")).await;

    assert_eq!(
        events.last().map(|event| &event.payload),
        Some(&ExchangePayload::Done)
    );
    assert_eq!(body_text(&events), "25° ok");
}
