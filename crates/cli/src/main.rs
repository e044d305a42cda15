mod logging;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use assist_core::chat::{ChatBackend, ChatStreamRequest, ImageRef};
use assist_core::session::Session;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use clap::{Parser, Subcommand};
use providers::{BackendClient, BackendConfig, NewsConfig, NewsScraper};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "assist", version, about = "Campus assistant client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the assistant; the answer is streamed to stdout.
    Chat {
        #[arg(default_value = "")]
        message: String,
        #[arg(short, long)]
        conversation: Option<String>,
        #[arg(short, long)]
        language: Option<String>,
        /// Attach an image (repeatable).
        #[arg(short, long = "image")]
        images: Vec<PathBuf>,
        /// Print the final result as JSON after the stream.
        #[arg(long)]
        json: bool,
    },
    /// List the latest university news.
    News {
        #[arg(long)]
        url: Option<String>,
        #[arg(long, default_value_t = 12)]
        limit: usize,
    },
    /// Show what a login token grants, without verifying it.
    Token {
        #[arg(env = "ASSIST_TOKEN")]
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init();
    let cfg = BackendConfig::from_env_and_file()?;
    match cli.command {
        Command::Chat {
            message,
            conversation,
            language,
            images,
            json,
        } => chat(cfg, message, conversation, language, images, json).await,
        Command::News { url, limit } => news(cfg, url, limit).await,
        Command::Token { token } => show_token(&token),
    }
}

async fn chat(
    cfg: BackendConfig,
    message: String,
    conversation: Option<String>,
    language: Option<String>,
    images: Vec<PathBuf>,
    json: bool,
) -> Result<()> {
    let language = language.unwrap_or_else(|| cfg.language.clone());
    let mut request = ChatStreamRequest::new(message).with_language(language);
    if let Some(c) = conversation {
        request = request.with_conversation_id(c);
    }
    for path in &images {
        request = request.with_image(load_image(path)?);
    }

    let client = BackendClient::new(cfg)?;
    info!(target: "cli", "chat: conversation={} input_len={} images={}", request.conversation_id, request.message.len(), request.images.len());
    let mut out = std::io::stdout();
    let result = client
        .stream_chat(&request, |delta: &str| -> Result<()> {
            out.write_all(delta.as_bytes())?;
            out.flush()?;
            Ok(())
        })
        .await?;
    println!();

    if let Some(reason) = result.fallback {
        warn!(target: "cli", "chat answered with fallback: {:?}", reason);
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !result.sources.is_empty() {
        println!();
        for s in &result.sources {
            println!("  - {}", s);
        }
    }
    Ok(())
}

async fn news(cfg: BackendConfig, url: Option<String>, limit: usize) -> Result<()> {
    let mut news_cfg = NewsConfig::default();
    if let Some(u) = url.or(cfg.news_url) {
        news_cfg = news_cfg.with_page_url(u);
    }
    news_cfg.max_items = limit;
    let feed = NewsScraper::new(news_cfg)?.fetch().await;
    for item in &feed.items {
        match &item.published {
            Some(d) => println!("[{}] {}", d, item.title),
            None => println!("{}", item.title),
        }
        println!("    {}", item.url);
        if !item.summary.is_empty() {
            println!("    {}", item.summary);
        }
    }
    Ok(())
}

fn show_token(raw: &str) -> Result<()> {
    let session = Session::from_token(raw).context("decode token")?;
    let c = &session.claims;
    println!("subject: {}", c.sub.as_deref().unwrap_or("-"));
    println!("email:   {}", c.email.as_deref().unwrap_or("-"));
    println!("role:    {}", c.role.as_deref().unwrap_or("-"));
    println!("admin:   {}", session.has_role("admin"));
    let now = Utc::now();
    match (session.expires_at(), session.remaining_at(now)) {
        (Some(at), Some(left)) if !session.is_expired_at(now) => {
            println!("expires: {} ({}s left)", at.to_rfc3339(), left.as_secs())
        }
        (Some(at), _) => println!("expired: {}", at.to_rfc3339()),
        _ => println!("expires: never"),
    }
    Ok(())
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

fn load_image(path: &Path) -> Result<ImageRef> {
    let bytes = std::fs::read(path).with_context(|| format!("read image: {}", path.display()))?;
    Ok(ImageRef {
        base64: STANDARD.encode(bytes),
        mime_type: guess_mime(path).to_string(),
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    })
}
