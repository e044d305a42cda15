pub mod session;

pub mod chat {
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    /// Conversation id used when the caller has not started a thread yet.
    pub const DEFAULT_CONVERSATION_ID: &str = "default";
    pub const DEFAULT_LANGUAGE: &str = "vi";

    const FALLBACK_VI: &str =
        "Xin lỗi, hiện tại tôi không thể trả lời câu hỏi của bạn. Vui lòng thử lại sau.";
    const FALLBACK_EN: &str =
        "Sorry, I can't answer your question right now. Please try again later.";

    /// Apology shown to the user whenever a chat call cannot be completed.
    pub fn fallback_message(language: &str) -> &'static str {
        let primary = language.split(['-', '_']).next().unwrap_or_default();
        if primary.eq_ignore_ascii_case("en") {
            FALLBACK_EN
        } else {
            FALLBACK_VI
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "camelCase")]
    pub struct ImageRef {
        pub base64: String,
        pub mime_type: String,
        pub name: String,
    }

    /// Body of a chat call, serialised as `{message, conversation_id, language, images}`.
    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
    pub struct ChatStreamRequest {
        pub message: String,
        pub conversation_id: String,
        pub language: String,
        #[serde(default)]
        pub images: Vec<ImageRef>,
    }

    impl ChatStreamRequest {
        pub fn new<S: Into<String>>(message: S) -> Self {
            Self {
                message: message.into(),
                conversation_id: DEFAULT_CONVERSATION_ID.to_string(),
                language: DEFAULT_LANGUAGE.to_string(),
                images: Vec::new(),
            }
        }

        pub fn with_conversation_id<S: Into<String>>(mut self, id: S) -> Self {
            self.conversation_id = id.into();
            self
        }

        pub fn with_language<S: Into<String>>(mut self, language: S) -> Self {
            self.language = language.into();
            self
        }

        pub fn with_image(mut self, image: ImageRef) -> Self {
            self.images.push(image);
            self
        }

        /// A request needs text or at least one image.
        pub fn validate(&self) -> Result<(), ChatError> {
            if self.message.trim().is_empty() && self.images.is_empty() {
                return Err(ChatError::InvalidRequest(
                    "message and images are both empty".into(),
                ));
            }
            Ok(())
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum FallbackReason {
        /// The overall budget elapsed before the stream finished.
        Timeout,
        /// Connect failure, non-success status, or a read error mid-stream.
        Upstream,
        /// A non-streamed body that was not a usable JSON object.
        MalformedBody,
    }

    #[derive(Clone, Debug, Serialize, PartialEq)]
    pub struct ChatStreamResult {
        pub answer: String,
        pub sources: Vec<String>,
        pub confidence: f64,
        pub conversation_id: String,
        #[serde(skip)]
        pub fallback: Option<FallbackReason>,
    }

    impl ChatStreamResult {
        /// Empty accumulator for one decode call.
        pub fn empty<S: Into<String>>(conversation_id: S) -> Self {
            Self {
                answer: String::new(),
                sources: Vec::new(),
                confidence: 0.0,
                conversation_id: conversation_id.into(),
                fallback: None,
            }
        }

        pub fn fallback<M: Into<String>, C: Into<String>>(
            message: M,
            conversation_id: C,
            reason: FallbackReason,
        ) -> Self {
            Self {
                answer: message.into(),
                sources: Vec::new(),
                confidence: 0.0,
                conversation_id: conversation_id.into(),
                fallback: Some(reason),
            }
        }

        pub fn is_fallback(&self) -> bool {
            self.fallback.is_some()
        }
    }

    #[derive(Error, Debug)]
    pub enum ChatError {
        #[error("invalid request: {0}")] InvalidRequest(String),
        #[error("config: {0}")] Config(String),
        #[error("auth error: {0}")] Auth(String),
        #[error("timeout: {0}")] Timeout(String),
        #[error("network: {0}")] Network(String),
        #[error("status: {0}")] Status(String),
        #[error("decode: {0}")] Decode(String),
        #[error("other: {0}")] Other(String),
    }

    #[allow(async_fn_in_trait)]
    pub trait ChatBackend: Send + Sync {
        /// One request, one JSON answer. Failures are returned, not masked.
        async fn send_chat(&self, request: &ChatStreamRequest) -> Result<ChatStreamResult, ChatError>;

        /// Streams an answer, calling `on_text_delta` for every decoded fragment.
        ///
        /// Upstream failures and timeouts resolve to a fallback result; the only
        /// errors returned are input validation and errors raised by the callback.
        async fn stream_chat<F, CE>(
            &self,
            request: &ChatStreamRequest,
            on_text_delta: F,
        ) -> Result<ChatStreamResult, CE>
        where
            F: FnMut(&str) -> Result<(), CE> + Send,
            CE: From<ChatError>;
    }

}

pub mod news {
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
    pub struct NewsItem {
        pub title: String,
        pub url: String,
        pub summary: String,
        pub image: Option<String>,
        pub published: Option<String>,
    }

    #[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum NewsOrigin {
        Live,
        Fallback,
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
    pub struct NewsFeed {
        pub items: Vec<NewsItem>,
        pub origin: NewsOrigin,
    }
}
