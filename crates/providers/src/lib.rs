pub mod backend;
pub mod news;

pub use backend::client::BackendClient;
pub use backend::config::BackendConfig;
pub use backend::decoder::StreamingChatDecoder;
pub use news::{NewsConfig, NewsScraper};
