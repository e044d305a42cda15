use std::time::Duration;

use assist_core::chat::{self, ChatBackend, ChatError, ChatStreamRequest, FallbackReason};
use assist_core::news::NewsOrigin;
use assist_providers::{BackendClient, BackendConfig, NewsConfig, NewsScraper};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> BackendClient {
    let mut cfg = BackendConfig::new(format!("{}/api", server.uri()));
    cfg.timeout = Duration::from_millis(500);
    BackendClient::new(cfg).unwrap()
}

async fn stream(
    client: &BackendClient,
    request: &ChatStreamRequest,
) -> (chat::ChatStreamResult, Vec<String>) {
    let mut deltas = Vec::new();
    let result = client
        .stream_chat(request, |t: &str| {
            deltas.push(t.to_string());
            Ok::<(), ChatError>(())
        })
        .await
        .unwrap();
    (result, deltas)
}

#[tokio::test]
async fn streams_sse_answer() {
    let server = MockServer::start().await;
    let body = "data: Điểm chuẩn \n\n\
                data: năm nay là 27\n\n\
                data: {\"sources\":[\"tuyen-sinh.pdf\"],\"confidence\":0.8,\"conversation_id\":\"t-1\"}\n\n";
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .and(body_partial_json(json!({
            "message": "Điểm chuẩn?",
            "conversation_id": "default",
            "language": "vi",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let (result, deltas) = stream(&client_for(&server), &ChatStreamRequest::new("Điểm chuẩn?")).await;
    assert_eq!(deltas, vec!["Điểm chuẩn ", "năm nay là 27"]);
    assert_eq!(result.answer, "Điểm chuẩn năm nay là 27");
    assert_eq!(result.sources, vec!["tuyen-sinh.pdf"]);
    assert_eq!(result.confidence, 0.8);
    assert_eq!(result.conversation_id, "t-1");
    assert!(!result.is_fallback());
}

#[tokio::test]
async fn json_body_is_decoded_in_one_piece() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "answer": "42",
            "sources": ["doc.pdf"],
            "confidence": 1,
            "conversation_id": "c1"
        })))
        .mount(&server)
        .await;

    let (result, deltas) = stream(&client_for(&server), &ChatStreamRequest::new("q")).await;
    assert_eq!(deltas, vec!["42"]);
    assert_eq!(result.answer, "42");
    assert_eq!(result.sources, vec!["doc.pdf"]);
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.conversation_id, "c1");
}

#[tokio::test]
async fn server_error_resolves_to_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let request = ChatStreamRequest::new("q").with_conversation_id("c7");
    let (result, deltas) = stream(&client_for(&server), &request).await;
    assert_eq!(result.answer, chat::fallback_message("vi"));
    assert_eq!(result.conversation_id, "c7");
    assert_eq!(result.fallback, Some(FallbackReason::Upstream));
    assert_eq!(deltas, vec![chat::fallback_message("vi")]);
}

#[tokio::test]
async fn slow_backend_resolves_to_timeout_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("data: late\n", "text/event-stream")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let request = ChatStreamRequest::new("q").with_language("en");
    let (result, _) = stream(&client_for(&server), &request).await;
    assert_eq!(result.answer, chat::fallback_message("en"));
    assert_eq!(result.fallback, Some(FallbackReason::Timeout));
    assert!(result.sources.is_empty());
    assert_eq!(result.confidence, 0.0);
}

#[tokio::test]
async fn unreachable_backend_resolves_to_fallback() {
    let mut cfg = BackendConfig::new("http://127.0.0.1:9/api");
    cfg.fallback_message = Some("Hệ thống đang bảo trì.".into());
    let client = BackendClient::new(cfg).unwrap();
    let (result, deltas) = stream(&client, &ChatStreamRequest::new("q")).await;
    assert_eq!(result.answer, "Hệ thống đang bảo trì.");
    assert_eq!(deltas, vec!["Hệ thống đang bảo trì."]);
    assert!(result.is_fallback());
}

#[tokio::test]
async fn empty_request_never_reaches_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .stream_chat(&ChatStreamRequest::new(""), |_: &str| Ok::<(), ChatError>(()))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InvalidRequest(_)));
}

#[tokio::test]
async fn send_chat_propagates_status_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .send_chat(&ChatStreamRequest::new("q"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Auth(_)));
}

#[tokio::test]
async fn send_chat_returns_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "Có", "sources": []})))
        .mount(&server)
        .await;

    let result = client_for(&server)
        .send_chat(&ChatStreamRequest::new("q").with_conversation_id("c2"))
        .await
        .unwrap();
    assert_eq!(result.answer, "Có");
    assert_eq!(result.conversation_id, "c2");
}

#[tokio::test]
async fn news_scraper_falls_back_on_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tin-tuc"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let scraper =
        NewsScraper::new(NewsConfig::default().with_page_url(format!("{}/tin-tuc", server.uri())))
            .unwrap();
    let feed = scraper.fetch().await;
    assert_eq!(feed.origin, NewsOrigin::Fallback);
    assert!(!feed.items.is_empty());
}

#[tokio::test]
async fn news_scraper_reads_live_page() {
    let server = MockServer::start().await;
    let page = r#"<html><body>
        <article><a href="/tin-tuc/1">x</a><h2>Khai giảng năm học mới</h2><time>05/09/2025</time></article>
    </body></html>"#;
    Mock::given(method("GET"))
        .and(path("/tin-tuc"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(page, "text/html"))
        .mount(&server)
        .await;

    let scraper =
        NewsScraper::new(NewsConfig::default().with_page_url(format!("{}/tin-tuc", server.uri())))
            .unwrap();
    let feed = scraper.fetch().await;
    assert_eq!(feed.origin, NewsOrigin::Live);
    assert_eq!(feed.items.len(), 1);
    assert_eq!(feed.items[0].title, "Khai giảng năm học mới");
    assert_eq!(feed.items[0].url, format!("{}/tin-tuc/1", server.uri()));
    assert_eq!(feed.items[0].published.as_deref(), Some("05/09/2025"));
}
