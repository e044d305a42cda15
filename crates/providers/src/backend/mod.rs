pub mod client;
pub mod config;
pub mod decoder;

pub use client::BackendClient;
pub use config::BackendConfig;
pub use decoder::StreamingChatDecoder;
