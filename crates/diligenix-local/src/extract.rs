use diligenix_core::{FetchBackend, FetchRequest, TextExtractor};
use std::collections::HashMap;
use std::io::Cursor;

use crate::LocalFetcher;

/// Byte cap for a fetched source body.
pub const DEFAULT_MAX_BYTES: u64 = 2 * 1024 * 1024;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 15_000;

const RENDER_WIDTH: usize = 100;

/// Convert HTML to readable plain text. Deterministic; not a full readability engine.
pub fn html_to_text(html: &str, width: usize) -> String {
    // html2text expects bytes; Cursor avoids allocating a second large buffer.
    html2text::from_read(Cursor::new(html.as_bytes()), width).unwrap_or_default()
}

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn pdf_to_text(bytes: &[u8]) -> Result<String, String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())
}

pub fn bytes_look_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

pub fn bytes_look_like_html(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let head: Vec<u8> = bytes[start..bytes.len().min(start + 16)]
        .iter()
        .map(|b| b.to_ascii_lowercase())
        .collect();
    ["<!doctype", "<html", "<head", "<body"]
        .iter()
        .any(|p| head.starts_with(p.as_bytes()))
}

pub fn bytes_look_like_image(bytes: &[u8]) -> bool {
    bytes.starts_with(b"\x89PNG\r\n\x1a\n")
        || bytes.starts_with(b"\xff\xd8\xff")
        || bytes.starts_with(b"GIF87a")
        || bytes.starts_with(b"GIF89a")
        || (bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP")
}

fn content_type_lc_prefix(ct: Option<&str>) -> String {
    ct.unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Pdf,
    Html,
    Text,
    Binary,
}

/// Magic bytes win over a missing or generic content type.
fn classify(bytes: &[u8], content_type: Option<&str>) -> BodyKind {
    let ct = content_type_lc_prefix(content_type);
    if ct == "application/pdf" || bytes_look_like_pdf(bytes) {
        return BodyKind::Pdf;
    }
    if ct.starts_with("image/") || bytes_look_like_image(bytes) {
        return BodyKind::Binary;
    }
    if ct == "text/html" || ct == "application/xhtml+xml" || bytes_look_like_html(bytes) {
        return BodyKind::Html;
    }
    let texty = ct.starts_with("text/")
        || ct.ends_with("+json")
        || ct.ends_with("+xml")
        || matches!(
            ct.as_str(),
            "application/json" | "application/xml" | "application/markdown"
        );
    if texty || (ct.is_empty() && std::str::from_utf8(bytes).is_ok()) {
        BodyKind::Text
    } else {
        BodyKind::Binary
    }
}

fn class_or_id_lc(el: &html_scraper::ElementRef) -> String {
    let v = el.value();
    format!(
        "{} {}",
        v.attr("class").unwrap_or(""),
        v.attr("id").unwrap_or("")
    )
    .to_ascii_lowercase()
}

fn is_boilerplate_container(el: &html_scraper::ElementRef) -> bool {
    // Structural UI words only; no per-site rules.
    const UI_WORDS: &[&str] = &[
        "nav",
        "menu",
        "sidebar",
        "footer",
        "header",
        "banner",
        "cookie",
        "consent",
        "advert",
        "promo",
        "subscribe",
        "newsletter",
    ];
    let s = class_or_id_lc(el);
    UI_WORDS.iter().any(|w| s.contains(w))
}

fn is_hidden(node: &html_scraper::node::Node) -> bool {
    node.as_element()
        .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript"))
}

fn visible_text(el: html_scraper::ElementRef) -> String {
    let mut out = String::new();
    let mut stack = vec![*el];
    while let Some(node) = stack.pop() {
        if let Some(t) = node.value().as_text() {
            out.push_str(t);
            out.push(' ');
            continue;
        }
        if is_hidden(node.value()) {
            continue;
        }
        let kids: Vec<_> = node.children().collect();
        stack.extend(kids.into_iter().rev());
    }
    norm_ws(&out)
}

/// Densest article/main-like block; link text counts against a block.
///
/// Text and link-text totals are accumulated bottom-up in one pass, so the
/// cost stays linear in the document size however deep the nesting goes.
fn pick_main_text(html: &str) -> Option<String> {
    const MAX_CANDIDATES: usize = 20_000;
    let doc = html_scraper::Html::parse_document(html);

    let mut totals = HashMap::new();
    let mut candidates = 0usize;
    let mut best: Option<(i64, html_scraper::ElementRef)> = None;
    // (node, children already visited)
    let mut stack = vec![(*doc.root_element(), false)];
    while let Some((node, closing)) = stack.pop() {
        if !closing {
            if let Some(t) = node.value().as_text() {
                totals.insert(node.id(), (t.chars().count(), 0usize));
            } else if !is_hidden(node.value()) {
                stack.push((node, true));
                let kids: Vec<_> = node.children().collect();
                stack.extend(kids.into_iter().rev().map(|k| (k, false)));
            }
            continue;
        }

        let (mut chars, mut link_chars) = (0usize, 0usize);
        for kid in node.children() {
            if let Some((c, l)) = totals.get(&kid.id()) {
                chars += c;
                link_chars += l;
            }
        }
        let Some(el) = html_scraper::ElementRef::wrap(node) else {
            continue;
        };
        let tag = el.value().name();
        if tag == "a" {
            link_chars = chars;
        }
        totals.insert(node.id(), (chars, link_chars));

        if !matches!(tag, "article" | "main" | "section" | "div")
            || candidates >= MAX_CANDIDATES
            || is_boilerplate_container(&el)
        {
            continue;
        }
        candidates += 1;
        if chars < 20 {
            continue;
        }
        let (chars, link_chars) = (chars as i64, link_chars as i64);
        let mut score = chars - 2 * link_chars;
        match tag {
            "article" => score += 500,
            "main" => score += 300,
            _ => {}
        }
        if link_chars > chars / 2 {
            score -= 500;
        }
        if score > 0 && best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, el));
        }
    }
    best.map(|(_, el)| visible_text(el))
        .filter(|t| !t.is_empty())
}

/// Readable text for a fetched body, or `None` when nothing usable remains.
pub fn readable_text(bytes: &[u8], content_type: Option<&str>) -> Option<String> {
    let text = match classify(bytes, content_type) {
        BodyKind::Pdf => match pdf_to_text(bytes) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(error = %e, "pdf extraction failed");
                return None;
            }
        },
        BodyKind::Html => {
            let html = String::from_utf8_lossy(bytes);
            pick_main_text(&html).unwrap_or_else(|| html_to_text(&html, RENDER_WIDTH))
        }
        BodyKind::Text => String::from_utf8_lossy(bytes).into_owned(),
        BodyKind::Binary => return None,
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Fetches a URL and reduces it to readable text. Every failure is `None`.
#[derive(Debug, Clone)]
pub struct ReadableTextExtractor<F = LocalFetcher> {
    fetcher: F,
    timeout_ms: u64,
    max_bytes: u64,
}

impl ReadableTextExtractor<LocalFetcher> {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_fetcher(LocalFetcher::with_client(client))
    }
}

impl<F: FetchBackend> ReadableTextExtractor<F> {
    pub fn with_fetcher(fetcher: F) -> Self {
        Self {
            fetcher,
            timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[async_trait::async_trait]
impl<F: FetchBackend> TextExtractor for ReadableTextExtractor<F> {
    async fn extract(&self, url: &str) -> Option<String> {
        let req = FetchRequest {
            url: url.to_string(),
            timeout_ms: Some(self.timeout_ms),
            max_bytes: Some(self.max_bytes),
        };
        let resp = match self.fetcher.fetch(&req).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(url, error = %e, "fetch failed");
                return None;
            }
        };
        if !resp.is_success() {
            tracing::debug!(url, status = resp.status, "non-success status");
            return None;
        }
        if resp.truncated {
            tracing::debug!(url, max_bytes = self.max_bytes, "body truncated");
        }
        let content_type = resp.content_type;
        let bytes = resp.bytes;
        off_worker(move || readable_text(&bytes, content_type.as_deref())).await
    }
}

/// Parsing is CPU-bound and third-party decoders may panic on hostile input;
/// both stay off the async worker, and a panic reads as "no text".
async fn off_worker<F>(f: F) -> Option<String>
where
    F: FnOnce() -> Option<String> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "text extraction task failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, http::StatusCode, routing::get, Router};
    use std::net::SocketAddr;

    const ARTICLE_PAGE: &str = r#"<!doctype html>
<html><head><title>t</title><style>.x { color: red }</style></head>
<body>
  <div class="navbar"><a href="/a">Home</a> <a href="/b">Products</a> <a href="/c">Pricing</a></div>
  <article>
    <h1>Acme expands</h1>
    <p>Acme Corp reported revenue growth of twelve percent in the third quarter.</p>
    <script>var tracking = "should not appear";</script>
  </article>
  <div class="footer">Copyright Acme, all rights reserved, contact us anytime.</div>
</body></html>"#;

    #[test]
    fn sniffers_recognize_common_magic() {
        assert!(bytes_look_like_pdf(b"%PDF-1.7\n"));
        assert!(bytes_look_like_html(b"  \n<!DOCTYPE html><html>"));
        assert!(bytes_look_like_html(b"<HTML>"));
        assert!(!bytes_look_like_html(b"{\"a\":1}"));
        assert!(bytes_look_like_image(b"\x89PNG\r\n\x1a\n...."));
        assert!(bytes_look_like_image(b"GIF89a...."));
        assert!(!bytes_look_like_image(b"hello"));
    }

    #[test]
    fn classify_prefers_magic_then_content_type() {
        assert_eq!(classify(b"%PDF-1.4", Some("text/html")), BodyKind::Pdf);
        assert_eq!(classify(b"\xff\xd8\xff\xe0", None), BodyKind::Binary);
        assert_eq!(classify(b"<html></html>", None), BodyKind::Html);
        assert_eq!(
            classify(b"{}", Some("application/json; charset=utf-8")),
            BodyKind::Text
        );
        assert_eq!(classify(b"# Title", Some("text/markdown")), BodyKind::Text);
        assert_eq!(
            classify(b"\x00\x01\x02", Some("application/octet-stream")),
            BodyKind::Binary
        );
    }

    #[test]
    fn article_block_beats_navigation_and_scripts() {
        let t = readable_text(ARTICLE_PAGE.as_bytes(), Some("text/html")).unwrap();
        assert!(t.contains("revenue growth of twelve percent"), "{t}");
        assert!(!t.contains("Pricing"), "{t}");
        assert!(!t.contains("tracking"), "{t}");
        assert!(!t.contains("Copyright"), "{t}");
    }

    #[test]
    fn tiny_html_falls_back_to_full_render() {
        let t = readable_text(b"<html><body><p>Short note</p></body></html>", None).unwrap();
        assert!(t.contains("Short note"), "{t}");
    }

    #[test]
    fn text_and_json_pass_through_trimmed() {
        assert_eq!(
            readable_text(b"  plain words \n", Some("text/plain")).as_deref(),
            Some("plain words")
        );
        assert_eq!(
            readable_text(br#"{"k":"v"}"#, Some("application/json")).as_deref(),
            Some(r#"{"k":"v"}"#)
        );
    }

    #[test]
    fn empty_and_binary_bodies_yield_nothing() {
        assert!(readable_text(b"   \n\t", Some("text/plain")).is_none());
        assert!(readable_text(b"", None).is_none());
        assert!(readable_text(b"\x89PNG\r\n\x1a\nxxxx", Some("image/png")).is_none());
        assert!(readable_text(b"<html><body></body></html>", Some("text/html")).is_none());
    }

    #[test]
    fn deeply_nested_pages_extract_in_linear_time() {
        let depth = 3_000;
        let mut html = String::from("<html><body>");
        for i in 0..depth {
            html.push_str(&format!("<div>level {i} text "));
        }
        html.push_str(&"</div>".repeat(depth));
        html.push_str("</body></html>");

        let t0 = std::time::Instant::now();
        let t = readable_text(html.as_bytes(), Some("text/html")).unwrap();
        let elapsed = t0.elapsed();
        assert!(t.starts_with("level 0 text"), "{}", &t[..40.min(t.len())]);
        assert!(t.contains(&format!("level {} text", depth - 1)));
        assert!(elapsed < std::time::Duration::from_secs(10), "{elapsed:?}");
    }

    #[test]
    fn link_farms_lose_to_prose() {
        let links: String = (0..30)
            .map(|i| format!("<a href=\"/p{i}\">Product number {i}</a> "))
            .collect();
        let html = format!(
            "<html><body><div>{links}</div><div><p>{}</p></div></body></html>",
            "Quarterly filings show Acme margins improving. ".repeat(3)
        );
        let t = readable_text(html.as_bytes(), Some("text/html")).unwrap();
        assert!(t.starts_with("Quarterly filings"), "{t}");
        assert!(!t.contains("Product number"), "{t}");
    }

    #[tokio::test]
    async fn panicking_decoder_reads_as_no_text() {
        assert_eq!(off_worker(|| Some("ok".to_string())).await.as_deref(), Some("ok"));
        let out = off_worker(|| -> Option<String> { panic!("decoder blew up") }).await;
        assert!(out.is_none());
    }

    proptest::proptest! {
        #[test]
        fn text_output_is_trimmed_and_never_empty(s in "[a-zA-Z0-9 \\n\\t.,<>/]{0,200}") {
            if let Some(t) = readable_text(s.as_bytes(), Some("text/plain")) {
                proptest::prop_assert!(!t.is_empty());
                proptest::prop_assert_eq!(t.trim(), t.as_str());
            }
        }

        #[test]
        fn html_extraction_never_panics(s in "[a-z<>/ =\"]{0,300}") {
            let _ = readable_text(s.as_bytes(), Some("text/html"));
        }
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn extractor_fetches_and_reduces_pages() {
        let app = Router::new()
            .route(
                "/article",
                get(|| async { ([(header::CONTENT_TYPE, "text/html")], ARTICLE_PAGE) }),
            )
            .route(
                "/missing",
                get(|| async { (StatusCode::NOT_FOUND, "<html><body>gone</body></html>") }),
            )
            .route(
                "/logo.png",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "image/png")],
                        b"\x89PNG\r\n\x1a\nxxxx".to_vec(),
                    )
                }),
            );
        let addr = serve(app).await;
        let x = ReadableTextExtractor::new(reqwest::Client::new()).with_timeout_ms(5_000);

        let t = x.extract(&format!("http://{addr}/article")).await.unwrap();
        assert!(t.contains("Acme Corp reported"));
        assert!(x.extract(&format!("http://{addr}/missing")).await.is_none());
        assert!(x.extract(&format!("http://{addr}/logo.png")).await.is_none());
        assert!(x.extract("not a url").await.is_none());
    }

    #[tokio::test]
    async fn extractor_applies_byte_cap() {
        let app = Router::new().route(
            "/big",
            get(|| async { ([(header::CONTENT_TYPE, "text/plain")], "a".repeat(50_000)) }),
        );
        let addr = serve(app).await;
        let x = ReadableTextExtractor::new(reqwest::Client::new()).with_max_bytes(1_000);
        let t = x.extract(&format!("http://{addr}/big")).await.unwrap();
        assert_eq!(t.len(), 1_000);
    }
}
