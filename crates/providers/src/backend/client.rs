use crate::backend::config::BackendConfig;
use crate::backend::decoder::{parse_answer, StreamingChatDecoder};
use assist_core::chat::{
    ChatBackend, ChatError, ChatStreamRequest, ChatStreamResult, FallbackReason,
};
use reqwest::{header, Client, Response, StatusCode};
use tokio::time::{sleep, timeout_at, Duration, Instant};
use tracing::{debug, error, info, warn};

/// HTTP client for the assistant backend.
///
/// All settings come from the [`BackendConfig`] given at construction.
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    cfg: BackendConfig,
    decoder: StreamingChatDecoder,
}

impl BackendClient {
    pub fn new(cfg: BackendConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("text/event-stream, application/json"),
        );
        let mut builder = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2);
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        let http = builder.build()?;
        let mut decoder = StreamingChatDecoder::new(cfg.timeout);
        if let Some(m) = &cfg.fallback_message {
            decoder = decoder.with_fallback_message(m.clone());
        }
        Ok(Self { http, cfg, decoder })
    }

    /// Retries only connection-level failures, with linear back-off.
    async fn post_with_retries(
        &self,
        url: &str,
        request: &ChatStreamRequest,
    ) -> Result<Response, ChatError> {
        let max_attempts = self.cfg.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match self.http.post(url).json(request).send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let err = map_reqwest_err(e);
                    if attempt >= max_attempts || !matches!(err, ChatError::Network(_)) {
                        return Err(err);
                    }
                    warn!(target:"providers::backend","chat connect attempt {}/{} failed: {}", attempt, max_attempts, err);
                    sleep(Duration::from_millis(300 * attempt as u64)).await;
                }
            }
        }
    }
}

#[allow(async_fn_in_trait)]
impl ChatBackend for BackendClient {
    async fn send_chat(&self, request: &ChatStreamRequest) -> Result<ChatStreamResult, ChatError> {
        request.validate()?;
        let url = self.cfg.endpoint("chat");
        info!(target:"providers::backend","chat request url={} conversation={}", url, request.conversation_id);
        let resp = self
            .http
            .post(&url)
            .json(request)
            .timeout(self.cfg.timeout)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            return Err(map_status_err(resp.status(), resp.text().await.ok()));
        }
        let body = resp.bytes().await.map_err(map_reqwest_err)?;
        parse_answer(&body, request).map_err(ChatError::Decode)
    }

    async fn stream_chat<F, CE>(
        &self,
        request: &ChatStreamRequest,
        on_text_delta: F,
    ) -> Result<ChatStreamResult, CE>
    where
        F: FnMut(&str) -> Result<(), CE> + Send,
        CE: From<ChatError>,
    {
        request.validate()?;
        let url = self.cfg.endpoint("chat/stream");
        let deadline = Instant::now() + self.decoder.timeout();
        info!(target:"providers::backend","start chat stream url={} conversation={} images={}", url, request.conversation_id, request.images.len());

        let resp = match timeout_at(deadline, self.post_with_retries(&url, request)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                error!(target:"providers::backend","chat stream connect failed: {}", e);
                return self
                    .decoder
                    .fallback(request, FallbackReason::Upstream, on_text_delta);
            }
            Err(_) => {
                warn!(target:"providers::backend","chat stream connect timed out");
                return self
                    .decoder
                    .fallback(request, FallbackReason::Timeout, on_text_delta);
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = timeout_at(deadline, resp.text()).await.ok().and_then(|r| r.ok());
            error!(target:"providers::backend","chat stream non-200 status={} body={:?}", status, body);
            return self
                .decoder
                .fallback(request, FallbackReason::Upstream, on_text_delta);
        }

        if is_json_body(resp.headers()) {
            debug!(target:"providers::backend","backend answered with a single JSON body");
            return match timeout_at(deadline, resp.bytes()).await {
                Ok(Ok(body)) => self.decoder.decode_body(&body, request, on_text_delta),
                Ok(Err(e)) => {
                    error!(target:"providers::backend","chat body read failed: {}", e);
                    self.decoder
                        .fallback(request, FallbackReason::Upstream, on_text_delta)
                }
                Err(_) => self
                    .decoder
                    .fallback(request, FallbackReason::Timeout, on_text_delta),
            };
        }

        self.decoder
            .decode_until(resp.bytes_stream(), request, deadline, on_text_delta)
            .await
    }
}

fn is_json_body(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false)
}

fn map_reqwest_err(e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::Timeout(e.to_string())
    } else if e.is_request() || e.is_connect() {
        ChatError::Network(e.to_string())
    } else if e.is_decode() || e.is_body() {
        ChatError::Decode(e.to_string())
    } else {
        ChatError::Other(e.to_string())
    }
}

fn map_status_err(status: StatusCode, body: Option<String>) -> ChatError {
    let s = format!("{} {}", status.as_u16(), body.unwrap_or_default());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Auth(s),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ChatError::Network(s)
        }
        _ => ChatError::Status(s),
    }
}
