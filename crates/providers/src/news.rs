//! University news feed scraped from the public news page.
//!
//! The page has no API, so items are pulled out of the HTML with CSS
//! selectors. Any failure (network, status, markup change) serves a built-in
//! list instead so the home page never renders an empty feed.

use assist_core::chat::ChatError;
use assist_core::news::{NewsFeed, NewsItem, NewsOrigin};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_NEWS_URL: &str = "https://www.university.edu.vn/tin-tuc";

#[derive(Clone, Debug)]
pub struct NewsConfig {
    pub page_url: String,
    pub item_selector: String,
    pub title_selector: String,
    pub link_selector: String,
    pub summary_selector: String,
    pub image_selector: String,
    pub date_selector: String,
    pub max_items: usize,
    pub timeout: Duration,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            page_url: DEFAULT_NEWS_URL.to_string(),
            item_selector: ".news-item, article".to_string(),
            title_selector: ".news-title, h3, h2".to_string(),
            link_selector: "a[href]".to_string(),
            summary_selector: ".news-summary, .summary, p".to_string(),
            image_selector: "img[src]".to_string(),
            date_selector: ".news-date, time, .date".to_string(),
            max_items: 12,
            timeout: Duration::from_secs(10),
        }
    }
}

impl NewsConfig {
    pub fn with_page_url<S: Into<String>>(mut self, url: S) -> Self {
        self.page_url = url.into();
        self
    }
}

#[derive(Clone)]
pub struct NewsScraper {
    http: Client,
    cfg: NewsConfig,
}

impl NewsScraper {
    pub fn new(cfg: NewsConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(cfg.timeout)
            .user_agent("Mozilla/5.0 (compatible; campus-assist)")
            .build()?;
        Ok(Self { http, cfg })
    }

    /// Live items when the page can be scraped, the built-in list otherwise.
    pub async fn fetch(&self) -> NewsFeed {
        match self.fetch_live().await {
            Ok(items) if !items.is_empty() => {
                info!(target:"providers::news","scraped {} news items from {}", items.len(), self.cfg.page_url);
                NewsFeed {
                    items,
                    origin: NewsOrigin::Live,
                }
            }
            Ok(_) => {
                warn!(target:"providers::news","no news items matched on {}, serving fallback", self.cfg.page_url);
                fallback_feed()
            }
            Err(e) => {
                warn!(target:"providers::news","news scrape failed, serving fallback: {}", e);
                fallback_feed()
            }
        }
    }

    async fn fetch_live(&self) -> Result<Vec<NewsItem>, ChatError> {
        let resp = self
            .http
            .get(&self.cfg.page_url)
            .send()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ChatError::Status(format!(
                "news page returned {}",
                resp.status()
            )));
        }
        let html = resp
            .text()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))?;
        parse_news_html(&html, &self.cfg)
    }
}

fn selector(css: &str) -> Result<Selector, ChatError> {
    Selector::parse(css).map_err(|e| ChatError::Config(format!("bad selector {:?}: {:?}", css, e)))
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(el: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    el.select(sel)
        .next()
        .map(|e| collapse_ws(&e.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

fn first_attr(el: &ElementRef<'_>, sel: &Selector, attr: &str) -> Option<String> {
    el.select(sel)
        .next()
        .and_then(|e| e.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn absolutize(base: Option<&Url>, link: &str) -> String {
    match base.and_then(|b| b.join(link).ok()) {
        Some(u) => u.to_string(),
        None => link.to_string(),
    }
}

/// Extracts news items from a page. Items missing a title or a link are skipped.
pub fn parse_news_html(html: &str, cfg: &NewsConfig) -> Result<Vec<NewsItem>, ChatError> {
    let item_sel = selector(&cfg.item_selector)?;
    let title_sel = selector(&cfg.title_selector)?;
    let link_sel = selector(&cfg.link_selector)?;
    let summary_sel = selector(&cfg.summary_selector)?;
    let image_sel = selector(&cfg.image_selector)?;
    let date_sel = selector(&cfg.date_selector)?;
    let base = Url::parse(&cfg.page_url).ok();

    let document = Html::parse_document(html);
    let mut items = Vec::new();
    for el in document.select(&item_sel) {
        if items.len() >= cfg.max_items {
            break;
        }
        let Some(title) = first_text(&el, &title_sel) else {
            continue;
        };
        let Some(href) = first_attr(&el, &link_sel, "href") else {
            continue;
        };
        items.push(NewsItem {
            title,
            url: absolutize(base.as_ref(), &href),
            summary: first_text(&el, &summary_sel).unwrap_or_default(),
            image: first_attr(&el, &image_sel, "src").map(|src| absolutize(base.as_ref(), &src)),
            published: first_text(&el, &date_sel),
        });
    }
    Ok(items)
}

pub fn fallback_feed() -> NewsFeed {
    let item = |title: &str, url: &str, summary: &str, published: &str| NewsItem {
        title: title.to_string(),
        url: url.to_string(),
        summary: summary.to_string(),
        image: None,
        published: Some(published.to_string()),
    };
    NewsFeed {
        items: vec![
            item(
                "Thông báo tuyển sinh đại học chính quy",
                "https://www.university.edu.vn/tuyen-sinh",
                "Thông tin phương thức xét tuyển, chỉ tiêu và lịch đăng ký dành cho thí sinh.",
                "01/03/2025",
            ),
            item(
                "Học bổng khuyến khích học tập",
                "https://www.university.edu.vn/hoc-bong",
                "Danh sách học bổng và hướng dẫn nộp hồ sơ cho sinh viên các khóa.",
                "15/02/2025",
            ),
            item(
                "Ngày hội việc làm sinh viên",
                "https://www.university.edu.vn/tin-tuc",
                "Hơn 100 doanh nghiệp tham gia tuyển dụng và giới thiệu cơ hội thực tập.",
                "20/01/2025",
            ),
        ],
        origin: NewsOrigin::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="news-item">
            <a href="/vi/news/le-tot-nghiep"><img src="/img/grad.jpg"></a>
            <h3 class="news-title">  Lễ tốt nghiệp
                 năm 2025 </h3>
            <span class="news-date">12/06/2025</span>
            <p class="news-summary">Hơn 5.000 tân kỹ sư nhận bằng.</p>
          </div>
          <div class="news-item">
            <h3 class="news-title">Không có liên kết</h3>
          </div>
          <div class="news-item">
            <a href="https://other.example.org/x">Bài ngoài</a>
            <h3 class="news-title">Hội thảo AI</h3>
          </div>
        </body></html>"#;

    fn cfg() -> NewsConfig {
        NewsConfig::default().with_page_url("https://uni.example.edu/vi/news/")
    }

    #[test]
    fn extracts_items_and_resolves_links() {
        let items = parse_news_html(PAGE, &cfg()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Lễ tốt nghiệp năm 2025");
        assert_eq!(items[0].url, "https://uni.example.edu/vi/news/le-tot-nghiep");
        assert_eq!(items[0].image.as_deref(), Some("https://uni.example.edu/img/grad.jpg"));
        assert_eq!(items[0].published.as_deref(), Some("12/06/2025"));
        assert_eq!(items[0].summary, "Hơn 5.000 tân kỹ sư nhận bằng.");
        assert_eq!(items[1].url, "https://other.example.org/x");
        assert_eq!(items[1].summary, "");
    }

    #[test]
    fn caps_item_count() {
        let mut c = cfg();
        c.max_items = 1;
        assert_eq!(parse_news_html(PAGE, &c).unwrap().len(), 1);
    }

    #[test]
    fn bad_selector_is_config_error() {
        let mut c = cfg();
        c.item_selector = "div[".into();
        assert!(matches!(parse_news_html(PAGE, &c), Err(ChatError::Config(_))));
    }

    #[test]
    fn fallback_feed_is_marked() {
        let feed = fallback_feed();
        assert_eq!(feed.origin, NewsOrigin::Fallback);
        assert!(!feed.items.is_empty());
    }
}
