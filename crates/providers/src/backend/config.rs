use directories::BaseDirs;
use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};
use tracing::warn;

use crate::backend::decoder::DEFAULT_TIMEOUT;
use assist_core::chat::DEFAULT_LANGUAGE;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000/api";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    pub backend_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub language: Option<String>,
    pub fallback_message: Option<String>,
    pub news_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub base_url: String,
    /// Budget for one chat call, from sending the request to the last frame.
    pub timeout: Duration,
    /// Connection attempts before giving up on a chat call; 1 disables retry.
    pub max_attempts: u32,
    pub language: String,
    pub fallback_message: Option<String>,
    pub news_url: Option<String>,
    pub proxy: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 1,
            language: DEFAULT_LANGUAGE.to_string(),
            fallback_message: None,
            news_url: None,
            proxy: None,
        }
    }
}

impl BackendConfig {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Defaults, overlaid by `config.toml`, overlaid by the environment.
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        let mut cfg = Self::default();

        if let Some(path) = Self::config_path() {
            if path.exists() {
                match fs::read_to_string(&path) {
                    Ok(text) => match toml::from_str::<BackendFileConfig>(&text) {
                        Ok(file_cfg) => cfg.apply_file(file_cfg),
                        Err(e) => {
                            warn!(target:"providers::backend","ignoring invalid config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        warn!(target:"providers::backend","cannot read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        if let Ok(url) = env::var("ASSIST_BACKEND_URL") {
            if !url.trim().is_empty() {
                cfg.base_url = url;
            }
        }
        cfg.proxy = env::var("HTTPS_PROXY")
            .ok()
            .or_else(|| env::var("HTTP_PROXY").ok());

        if cfg.base_url.trim().is_empty() {
            anyhow::bail!("backend url is empty");
        }
        Ok(cfg)
    }

    pub fn apply_file(&mut self, file_cfg: BackendFileConfig) {
        if let Some(u) = file_cfg.backend_url {
            self.base_url = u;
        }
        if let Some(t) = file_cfg.timeout_ms {
            self.timeout = Duration::from_millis(t);
        }
        if let Some(a) = file_cfg.max_attempts {
            self.max_attempts = a.max(1);
        }
        if let Some(l) = file_cfg.language {
            self.language = l;
        }
        if file_cfg.fallback_message.is_some() {
            self.fallback_message = file_cfg.fallback_message;
        }
        if file_cfg.news_url.is_some() {
            self.news_url = file_cfg.news_url;
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".assist").join("config.toml")
        } else {
            base.config_dir().join("assist").join("config.toml")
        };
        Some(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let file: BackendFileConfig = toml::from_str(
            r#"
            backend_url = "https://chat.example.edu/api/"
            timeout_ms = 5000
            max_attempts = 0
            language = "en"
            "#,
        )
        .unwrap();
        let mut cfg = BackendConfig::default();
        cfg.apply_file(file);
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_attempts, 1);
        assert_eq!(cfg.language, "en");
        assert_eq!(cfg.fallback_message, None);
        assert_eq!(cfg.endpoint("/chat/stream"), "https://chat.example.edu/api/chat/stream");
    }

    #[test]
    fn defaults() {
        let cfg = BackendConfig::default();
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.endpoint("chat"), "http://localhost:8000/api/chat");
    }
}
