use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use claude_relay::config::UpstreamConfig;
use claude_relay::connectors::anthropic::{AnthropicConnector, SYSTEM_PROMPT};
use claude_relay::connectors::{Connector, ConnectorResponse};
use claude_relay::core::entities::{
    MessageContent, Role, StreamEvent, UpstreamMessage, UpstreamRequest, Usage,
};
use claude_relay::error::RelayError;

fn connector(server: &MockServer) -> AnthropicConnector {
    connector_at(server.uri(), UpstreamConfig::default())
}

fn connector_at(base_url: String, cfg: UpstreamConfig) -> AnthropicConnector {
    let cfg = UpstreamConfig { base_url, ..cfg };
    AnthropicConnector::new(&cfg, "sk-test".into()).unwrap()
}

fn short_timeouts() -> UpstreamConfig {
    UpstreamConfig {
        connect_timeout_secs: 1,
        request_timeout_secs: 1,
        stream_idle_timeout_secs: 1,
        ..UpstreamConfig::default()
    }
}

/// Serves one chunked SSE response that sends `first_event` and then either
/// stalls or drops the connection mid-body.
async fn half_stream(first_event: String, stall: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
        let chunk = format!("{:x}\r\n{}\r\n", first_event.len(), first_event);
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(chunk.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
        if stall {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        // Dropping the socket here leaves the chunked body unterminated.
    });
    format!("http://{addr}")
}

/// Reads headers and a `content-length` body so closing the socket sends FIN, not RST.
async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            return;
        }
        raw.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&raw);
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if raw.len() >= end + 4 + length {
                return;
            }
        }
    }
}

async fn collect_stream(connector: &AnthropicConnector) -> Vec<StreamEvent> {
    match connector.invoke(request(true)).await.unwrap() {
        ConnectorResponse::Streaming(s) => s.collect().await,
        other => panic!("expected a stream, got {other:?}"),
    }
}

fn request(stream: bool) -> UpstreamRequest {
    UpstreamRequest {
        model: "claude-3-haiku-20240307".into(),
        max_tokens: 128,
        temperature: 0.7,
        messages: vec![UpstreamMessage {
            role: Role::User,
            content: MessageContent::Text("Hi".into()),
        }],
        stream,
    }
}

fn sse_body(events: &[(&str, serde_json::Value)]) -> String {
    events
        .iter()
        .map(|(name, data)| format!("event: {name}\ndata: {data}\n\n"))
        .collect()
}

#[tokio::test]
async fn blocking_call_concatenates_text_blocks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 128,
            "system": SYSTEM_PROMPT,
            "messages": [{"role": "user", "content": "Hi"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-haiku-20240307",
            "content": [
                {"type": "text", "text": "Hello"},
                {"type": "tool_use", "id": "t1", "name": "noop", "input": {}},
                {"type": "text", "text": ", world"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 4}
        })))
        .expect(1)
        .mount(&server)
        .await;

    match connector(&server).invoke(request(false)).await.unwrap() {
        ConnectorResponse::NonStreaming(c) => {
            assert_eq!(c.text, "Hello, world");
            assert_eq!(c.usage, Usage { input_tokens: 10, output_tokens: 4 });
        }
        other => panic!("expected a completion, got {other:?}"),
    }
}

#[tokio::test]
async fn provider_error_message_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "type": "error",
            "error": {"type": "not_found_error", "message": "model: claude-9"}
        })))
        .mount(&server)
        .await;

    let err = connector(&server).invoke(request(false)).await.unwrap_err();
    match err {
        RelayError::Upstream(msg) => assert_eq!(msg, "model: claude-9"),
        other => panic!("expected upstream error, got {other:?}"),
    }
}

#[tokio::test]
async fn unstructured_error_body_keeps_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = connector(&server).invoke(request(true)).await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("502"), "{msg}");
    assert!(msg.contains("bad gateway"), "{msg}");
}

#[tokio::test]
async fn streaming_call_yields_tokens_usage_and_done() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        ("message_start", json!({"type": "message_start", "message": {"id": "msg_01", "type": "message", "role": "assistant", "model": "claude-3-haiku-20240307", "usage": {"input_tokens": 12, "output_tokens": 1}}})),
        ("content_block_start", json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}})),
        ("ping", json!({"type": "ping"})),
        ("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hello"}})),
        ("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": " there"}})),
        ("content_block_stop", json!({"type": "content_block_stop", "index": 0})),
        ("message_delta", json!({"type": "message_delta", "delta": {"stop_reason": "end_turn", "stop_sequence": null}, "usage": {"output_tokens": 6}})),
        ("message_stop", json!({"type": "message_stop"})),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let events: Vec<StreamEvent> = match connector(&server).invoke(request(true)).await.unwrap() {
        ConnectorResponse::Streaming(s) => s.collect().await,
        other => panic!("expected a stream, got {other:?}"),
    };
    assert_eq!(
        events,
        vec![
            StreamEvent::Token("Hello".into()),
            StreamEvent::Token(" there".into()),
            StreamEvent::Usage(Usage { input_tokens: 12, output_tokens: 6 }),
            StreamEvent::Done,
        ]
    );
}

#[tokio::test]
async fn streaming_error_event_is_forwarded() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        ("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}})),
        ("error", json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let events: Vec<StreamEvent> = match connector(&server).invoke(request(true)).await.unwrap() {
        ConnectorResponse::Streaming(s) => s.collect().await,
        other => panic!("expected a stream, got {other:?}"),
    };
    assert_eq!(
        events,
        vec![
            StreamEvent::Token("Hi".into()),
            StreamEvent::Error("Overloaded".into()),
        ]
    );
}

#[tokio::test]
async fn blocking_call_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"content": [], "usage": {"input_tokens": 1, "output_tokens": 1}}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let connector = connector_at(server.uri(), short_timeouts());
    let err = tokio::time::timeout(Duration::from_secs(4), connector.invoke(request(false)))
        .await
        .expect("blocking call should give up before the upstream answers")
        .unwrap_err();
    match err {
        RelayError::Upstream(msg) => assert_eq!(msg, "request timed out"),
        other => panic!("expected upstream timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn stalled_stream_ends_with_an_error() {
    let delta = json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}});
    let base = half_stream(format!("event: content_block_delta\ndata: {delta}\n\n"), true).await;
    let connector = connector_at(base, short_timeouts());

    let events = tokio::time::timeout(Duration::from_secs(10), collect_stream(&connector))
        .await
        .expect("idle stream should be cut by the read timeout");
    assert_eq!(events.len(), 2, "{events:?}");
    assert_eq!(events[0], StreamEvent::Token("Hel".into()));
    assert!(matches!(events[1], StreamEvent::Error(_)), "{events:?}");
}

#[tokio::test]
async fn dropped_connection_mid_stream_is_an_error() {
    let delta = json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}});
    let base = half_stream(format!("event: content_block_delta\ndata: {delta}\n\n"), false).await;
    let connector = connector_at(base, UpstreamConfig::default());

    let events = tokio::time::timeout(Duration::from_secs(10), collect_stream(&connector))
        .await
        .expect("a closed connection should end the stream");
    assert_eq!(events.first(), Some(&StreamEvent::Token("Hel".into())));
    assert!(matches!(events.last(), Some(StreamEvent::Error(_))), "{events:?}");
}
