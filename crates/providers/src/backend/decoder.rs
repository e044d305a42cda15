//! Incremental decoder for the assistant backend's chat stream.
//!
//! The backend writes `data: <payload>\n` lines. A payload is either a JSON
//! object carrying some of `answer`, `sources`, `confidence` and
//! `conversation_id`, or a bare text fragment of the answer. Everything is
//! folded into one [`ChatStreamResult`]; network failures and timeouts never
//! surface as errors, they resolve to the localized fallback answer instead.

use std::fmt::Display;
use std::time::Duration;

use assist_core::chat::{self, ChatStreamRequest, ChatStreamResult, FallbackReason};
use bytes::{Buf, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const DATA_PREFIX: &str = "data: ";
const STRUCTURED_KEYS: [&str; 3] = ["\"answer\"", "\"sources\"", "\"confidence\""];

/// Whether a payload should be tried as a JSON fragment before falling back to text.
///
/// Plain prose that happens to quote one of the keys is still parsed first; if
/// it is not a JSON object it is treated as text.
pub fn is_structured_payload(payload: &str) -> bool {
    STRUCTURED_KEYS.iter().any(|key| payload.contains(key))
}

/// The recognised fields of one JSON payload.
///
/// Each field is read on its own; one with an unexpected type is ignored
/// rather than rejecting the whole object.
#[derive(Debug, Default, PartialEq)]
struct PayloadFields {
    answer: Option<String>,
    sources: Option<Vec<String>>,
    confidence: Option<f64>,
    conversation_id: Option<String>,
}

impl PayloadFields {
    fn from_map(map: &Map<String, Value>) -> Self {
        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            answer: text("answer"),
            sources: map.get("sources").and_then(Value::as_array).map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            }),
            confidence: map.get("confidence").and_then(Value::as_f64),
            conversation_id: text("conversation_id").or_else(|| text("conversationId")),
        }
    }
}

fn parse_object(raw: &[u8]) -> Result<PayloadFields, String> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(PayloadFields::from_map(&map)),
        Ok(_) => Err("not a JSON object".into()),
        Err(e) => Err(e.to_string()),
    }
}

/// Builds a result from one complete JSON answer body.
pub fn parse_answer(body: &[u8], request: &ChatStreamRequest) -> Result<ChatStreamResult, String> {
    let fields = parse_object(body)?;
    Ok(ChatStreamResult {
        answer: fields.answer.unwrap_or_default(),
        sources: fields.sources.unwrap_or_default(),
        confidence: fields.confidence.unwrap_or(0.0),
        conversation_id: fields
            .conversation_id
            .unwrap_or_else(|| request.conversation_id.clone()),
        fallback: None,
    })
}

/// Byte buffer cut into lines at `\n`.
///
/// Lines are decoded only once complete. `\n` never appears inside a
/// multi-byte UTF-8 sequence, so a character split across two chunks is
/// always whole by the time its line is decoded.
#[derive(Default)]
struct LineBuffer {
    buf: BytesMut,
    // Prefix of `buf` already known to hold no `\n`.
    scanned: usize,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let Some(pos) = twoway::find_bytes(&self.buf[self.scanned..], b"\n") else {
            self.scanned = self.buf.len();
            return None;
        };
        let line = self.buf.split_to(self.scanned + pos);
        self.buf.advance(1);
        self.scanned = 0;
        Some(decode_line(&line))
    }

    fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        Some(decode_line(&rest))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// The payload of a `data: ` line.
///
/// An empty payload yields `None`, so a bare `data: ` line never reaches
/// `on_text_delta`. JSON frames with an empty `answer` are skipped the same way.
fn payload_of(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX).filter(|p| !p.is_empty())
}

/// Turns a stream of byte chunks into the payloads of its `data: ` lines.
///
/// Other lines are dropped. A trailing line without `\n` still counts if it is
/// a `data: ` line. The first read error is yielded and ends the stream.
pub fn data_frames<S, B, E>(chunks: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut chunks = Box::pin(chunks);
        let mut lines = LineBuffer::default();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(b) => {
                    lines.push(b.as_ref());
                    while let Some(line) = lines.next_line() {
                        if let Some(p) = payload_of(&line) {
                            yield Ok(p.to_string());
                        }
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if let Some(rest) = lines.finish() {
            if let Some(p) = payload_of(&rest) {
                yield Ok(p.to_string());
            }
        }
    }
}

enum Interrupt<CE> {
    Upstream(String),
    Callback(CE),
}

#[derive(Clone, Debug)]
pub struct StreamingChatDecoder {
    timeout: Duration,
    fallback_message: Option<String>,
}

impl Default for StreamingChatDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl StreamingChatDecoder {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            fallback_message: None,
        }
    }

    /// Replaces the built-in localized apology for every language.
    pub fn with_fallback_message<S: Into<String>>(mut self, message: S) -> Self {
        self.fallback_message = Some(message.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Drains `chunks` into one result, racing the configured timeout.
    ///
    /// `on_text_delta` sees every text fragment in arrival order. An error it
    /// returns stops decoding and is handed back unchanged; it is the only
    /// error this method returns.
    pub async fn decode<S, B, E, F, CE>(
        &self,
        chunks: S,
        request: &ChatStreamRequest,
        on_text_delta: F,
    ) -> Result<ChatStreamResult, CE>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
        F: FnMut(&str) -> Result<(), CE>,
    {
        let deadline = Instant::now() + self.timeout;
        self.decode_until(chunks, request, deadline, on_text_delta)
            .await
    }

    /// Like [`decode`](Self::decode) with an absolute deadline, so the time
    /// spent sending the request counts against the same budget.
    ///
    /// When the deadline passes the read is dropped, which closes the
    /// underlying connection.
    pub async fn decode_until<S, B, E, F, CE>(
        &self,
        chunks: S,
        request: &ChatStreamRequest,
        deadline: Instant,
        mut on_text_delta: F,
    ) -> Result<ChatStreamResult, CE>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
        F: FnMut(&str) -> Result<(), CE>,
    {
        let drained = timeout_at(deadline, drain(chunks, request, &mut on_text_delta)).await;
        match drained {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(Interrupt::Callback(e))) => Err(e),
            Ok(Err(Interrupt::Upstream(e))) => {
                warn!(target:"providers::backend","chat stream read failed: {}", e);
                self.fallback(request, FallbackReason::Upstream, on_text_delta)
            }
            Err(_) => {
                warn!(target:"providers::backend","chat stream timed out after {:?}", self.timeout);
                self.fallback(request, FallbackReason::Timeout, on_text_delta)
            }
        }
    }

    /// Decodes a complete, non-streamed JSON answer.
    ///
    /// `on_text_delta` is called exactly once, with the `answer` field.
    pub fn decode_body<F, CE>(
        &self,
        body: &[u8],
        request: &ChatStreamRequest,
        mut on_text_delta: F,
    ) -> Result<ChatStreamResult, CE>
    where
        F: FnMut(&str) -> Result<(), CE>,
    {
        match parse_answer(body, request) {
            Ok(result) => {
                on_text_delta(&result.answer)?;
                Ok(result)
            }
            Err(e) => {
                warn!(target:"providers::backend","chat body is not a usable answer: {}", e);
                self.fallback(request, FallbackReason::MalformedBody, on_text_delta)
            }
        }
    }

    /// Emits the apology once through `on_text_delta` and returns it as the answer.
    pub fn fallback<F, CE>(
        &self,
        request: &ChatStreamRequest,
        reason: FallbackReason,
        mut on_text_delta: F,
    ) -> Result<ChatStreamResult, CE>
    where
        F: FnMut(&str) -> Result<(), CE>,
    {
        let message = self
            .fallback_message
            .as_deref()
            .unwrap_or_else(|| chat::fallback_message(&request.language));
        on_text_delta(message)?;
        Ok(ChatStreamResult::fallback(
            message,
            request.conversation_id.clone(),
            reason,
        ))
    }
}

async fn drain<S, B, E, F, CE>(
    chunks: S,
    request: &ChatStreamRequest,
    on_text_delta: &mut F,
) -> Result<ChatStreamResult, Interrupt<CE>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(&str) -> Result<(), CE>,
{
    let mut acc = ChatStreamResult::empty(request.conversation_id.clone());
    let mut frames = Box::pin(data_frames(chunks));
    let mut count = 0usize;
    while let Some(frame) = frames.next().await {
        let payload = frame.map_err(|e| Interrupt::Upstream(e.to_string()))?;
        fold_payload(&mut acc, &payload, on_text_delta).map_err(Interrupt::Callback)?;
        count += 1;
    }
    debug!(target:"providers::backend","chat stream drained frames={} answer_len={}", count, acc.answer.len());
    Ok(acc)
}

fn fold_payload<F, CE>(
    acc: &mut ChatStreamResult,
    payload: &str,
    on_text_delta: &mut F,
) -> Result<(), CE>
where
    F: FnMut(&str) -> Result<(), CE>,
{
    if is_structured_payload(payload) {
        match parse_object(payload.as_bytes()) {
            Ok(fields) => return merge_fields(acc, fields, on_text_delta),
            Err(e) => {
                debug!(target:"providers::backend","keyword payload is not JSON, using as text: {}", e)
            }
        }
    }
    on_text_delta(payload)?;
    acc.answer.push_str(payload);
    Ok(())
}

// JSON answers append to the same buffer as text fragments. A backend that
// sends both incremental text and a cumulative JSON answer gets duplicated text.
fn merge_fields<F, CE>(
    acc: &mut ChatStreamResult,
    fields: PayloadFields,
    on_text_delta: &mut F,
) -> Result<(), CE>
where
    F: FnMut(&str) -> Result<(), CE>,
{
    if let Some(answer) = fields.answer.filter(|a| !a.is_empty()) {
        on_text_delta(&answer)?;
        acc.answer.push_str(&answer);
    }
    if let Some(sources) = fields.sources {
        acc.sources = sources;
    }
    if let Some(confidence) = fields.confidence {
        acc.confidence = confidence;
    }
    if let Some(id) = fields.conversation_id {
        acc.conversation_id = id;
    }
    Ok(())
}
