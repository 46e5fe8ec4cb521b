use diligenix_core::{Error, Result, SearchProvider, SearchQuery, SearchResponse, SearchResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::env;

fn timeout_ms_from_query(q: &SearchQuery) -> u64 {
    // Provider requests can hang indefinitely without an explicit timeout.
    q.timeout_ms.unwrap_or(20_000).clamp(1_000, 60_000)
}

fn max_results_from_query(q: &SearchQuery, default: usize) -> usize {
    q.max_results.unwrap_or(default).clamp(1, 20)
}

fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| env(k))
}

fn brave_api_key_from_env() -> Option<String> {
    first_env(&["DILIGENIX_BRAVE_API_KEY", "BRAVE_SEARCH_API_KEY"])
}

fn tavily_api_key_from_env() -> Option<String> {
    first_env(&["DILIGENIX_TAVILY_API_KEY", "TAVILY_API_KEY"])
}

/// `DILIGENIX_SEARXNG_ENDPOINTS` (comma/space separated) then `DILIGENIX_SEARXNG_ENDPOINT`,
/// deduplicated, in that order.
pub fn searxng_endpoints_from_env() -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let many = env("DILIGENIX_SEARXNG_ENDPOINTS").unwrap_or_default();
    let one = env("DILIGENIX_SEARXNG_ENDPOINT").unwrap_or_default();
    for s in many
        .split(|c: char| c == ',' || c.is_whitespace())
        .chain(std::iter::once(one.as_str()))
    {
        let s = s.trim();
        if !s.is_empty() && !out.iter().any(|e| e == s) {
            out.push(s.to_string());
        }
    }
    out
}

/// Which providers have credentials/endpoints in the environment. Never includes values.
pub fn configured_providers() -> BTreeMap<&'static str, bool> {
    BTreeMap::from([
        ("brave", brave_api_key_from_env().is_some()),
        ("tavily", tavily_api_key_from_env().is_some()),
        ("searxng", !searxng_endpoints_from_env().is_empty()),
        ("duckduckgo", true),
    ])
}

/// Build a provider by name. `auto` prefers brave, tavily, searxng, then the
/// keyless DuckDuckGo HTML endpoint.
pub fn provider_from_env(client: reqwest::Client, name: &str) -> Result<Arc<dyn SearchProvider>> {
    let p: Arc<dyn SearchProvider> = match name.trim().to_ascii_lowercase().as_str() {
        "brave" => Arc::new(BraveSearchProvider::from_env(client)?),
        "tavily" => Arc::new(TavilySearchProvider::from_env(client)?),
        "searxng" => Arc::new(SearxngSearchProvider::from_env(client)?),
        "duckduckgo" | "ddg" => Arc::new(DuckDuckGoSearchProvider::from_env(client)),
        "auto" => {
            if let Ok(p) = BraveSearchProvider::from_env(client.clone()) {
                Arc::new(p)
            } else if let Ok(p) = TavilySearchProvider::from_env(client.clone()) {
                Arc::new(p)
            } else if let Ok(p) = SearxngSearchProvider::from_env(client.clone()) {
                Arc::new(p)
            } else {
                Arc::new(DuckDuckGoSearchProvider::from_env(client))
            }
        }
        other => {
            return Err(Error::InvalidConfig(format!(
                "unknown search provider {other:?} (allowed: auto, duckduckgo, brave, tavily, searxng)"
            )))
        }
    };
    tracing::debug!(provider = p.name(), requested = name, "search provider selected");
    Ok(p)
}

fn response(provider: &str, results: Vec<SearchResult>, t0: Instant) -> SearchResponse {
    let mut timings_ms = BTreeMap::new();
    timings_ms.insert("search".to_string(), t0.elapsed().as_millis());
    SearchResponse {
        results,
        provider: provider.to_string(),
        timings_ms,
    }
}

#[derive(Debug, Clone)]
pub struct BraveSearchProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl BraveSearchProvider {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = brave_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing DILIGENIX_BRAVE_API_KEY (or BRAVE_SEARCH_API_KEY)".to_string(),
            )
        })?;
        let endpoint = env("DILIGENIX_BRAVE_ENDPOINT")
            .unwrap_or_else(|| "https://api.search.brave.com/res/v1/web/search".to_string());
        Ok(Self {
            client,
            api_key,
            endpoint,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BraveWebSearchResponse {
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    results: Option<Vec<BraveWebResult>>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    url: String,
    title: Option<String>,
    description: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for BraveSearchProvider {
    fn name(&self) -> &'static str {
        "brave"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let n = max_results_from_query(q, 10);
        let mut req = self
            .client
            .get(&self.endpoint)
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", q.query.as_str())])
            .query(&[("count", n.to_string())]);
        if let Some(lang) = q.language.as_deref() {
            req = req.query(&[("search_lang", lang)]);
        }
        if let Some(country) = q.country.as_deref() {
            req = req.query(&[("country", country)]);
        }

        let resp = req
            .timeout(std::time::Duration::from_millis(timeout_ms_from_query(q)))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("brave search HTTP {status}")));
        }

        let parsed: BraveWebSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let results = parsed
            .web
            .and_then(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .take(n)
            .map(|r| SearchResult {
                url: r.url,
                title: r.title,
                snippet: r.description,
                source: "brave".to_string(),
            })
            .collect();
        Ok(response("brave", results, t0))
    }
}

#[derive(Debug, Clone)]
pub struct TavilySearchProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl TavilySearchProvider {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = tavily_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing DILIGENIX_TAVILY_API_KEY (or TAVILY_API_KEY)".to_string(),
            )
        })?;
        let endpoint = env("DILIGENIX_TAVILY_ENDPOINT")
            .unwrap_or_else(|| "https://api.tavily.com/search".to_string());
        Ok(Self {
            client,
            api_key,
            endpoint,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TavilySearchResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    title: Option<String>,
    content: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for TavilySearchProvider {
    fn name(&self) -> &'static str {
        "tavily"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let n = max_results_from_query(q, 5);
        let body = serde_json::json!({
            "query": q.query,
            "max_results": n,
            "include_answer": false,
            "include_raw_content": false,
            "search_depth": "basic",
            "country": q.country,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&body)
            .timeout(std::time::Duration::from_millis(timeout_ms_from_query(q)))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("tavily search HTTP {status}")));
        }

        let parsed: TavilySearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let results = parsed
            .results
            .into_iter()
            .take(n)
            .map(|r| SearchResult {
                url: r.url,
                title: r.title,
                snippet: r.content,
                source: "tavily".to_string(),
            })
            .collect();
        Ok(response("tavily", results, t0))
    }
}

#[derive(Debug, Clone)]
pub struct SearxngSearchProvider {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl SearxngSearchProvider {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let endpoints = searxng_endpoints_from_env();
        if endpoints.is_empty() {
            return Err(Error::NotConfigured(
                "missing DILIGENIX_SEARXNG_ENDPOINT (or DILIGENIX_SEARXNG_ENDPOINTS)".to_string(),
            ));
        }
        Ok(Self { client, endpoints })
    }

    fn endpoint_search_for(base_endpoint: &str) -> String {
        // Accept either a base URL or a full /search endpoint.
        let mut base = base_endpoint.trim().trim_end_matches('/').to_string();
        if !base.ends_with("/search") {
            base.push_str("/search");
        }
        base
    }

    async fn search_at(&self, base_endpoint: &str, q: &SearchQuery) -> Result<Vec<SearchResult>> {
        let n = max_results_from_query(q, 10);
        let mut req = self
            .client
            .get(Self::endpoint_search_for(base_endpoint))
            .query(&[("q", q.query.as_str()), ("format", "json")]);
        if let Some(lang) = q.language.as_deref() {
            req = req.query(&[("language", lang)]);
        }
        let resp = req
            .timeout(std::time::Duration::from_millis(timeout_ms_from_query(q)))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("searxng search HTTP {status}")));
        }
        let parsed: SearxngSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        Ok(parsed
            .results
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| {
                Some(SearchResult {
                    url: r.url?,
                    title: r.title,
                    snippet: r.content,
                    source: "searxng".to_string(),
                })
            })
            .take(n)
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct SearxngSearchResponse {
    results: Option<Vec<SearxngResult>>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    url: Option<String>,
    title: Option<String>,
    // SearXNG uses `content` for snippets in JSON format.
    content: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for SearxngSearchProvider {
    fn name(&self) -> &'static str {
        "searxng"
    }

    /// Endpoints are tried in order; the first success wins.
    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let mut last_err = Error::NotConfigured("no searxng endpoints".to_string());
        for ep in &self.endpoints {
            match self.search_at(ep, q).await {
                Ok(results) => return Ok(response("searxng", results, t0)),
                Err(e) => {
                    tracing::debug!(endpoint = %ep, error = %e, "searxng endpoint failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

/// Keyless search over DuckDuckGo's HTML results page.
#[derive(Debug, Clone)]
pub struct DuckDuckGoSearchProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl DuckDuckGoSearchProvider {
    pub fn from_env(client: reqwest::Client) -> Self {
        let endpoint = env("DILIGENIX_DUCKDUCKGO_ENDPOINT")
            .unwrap_or_else(|| "https://html.duckduckgo.com/html/".to_string());
        Self { client, endpoint }
    }
}

/// Result links on the HTML page are either direct or wrapped as
/// `//duckduckgo.com/l/?uddg=<percent-encoded target>`.
fn unwrap_ddg_href(href: &str) -> Option<String> {
    let base = url::Url::parse("https://duckduckgo.com/").ok()?;
    let u = base.join(href).ok()?;
    let host = u.host_str().unwrap_or("");
    if host.ends_with("duckduckgo.com") {
        if u.path().starts_with("/l/") {
            let target = u.query_pairs().find(|(k, _)| k == "uddg")?.1.into_owned();
            return matches!(url::Url::parse(&target).ok()?.scheme(), "http" | "https")
                .then_some(target);
        }
        // Ads and internal links.
        return None;
    }
    matches!(u.scheme(), "http" | "https").then(|| u.to_string())
}

fn parse_ddg_html(html: &str, max_results: usize) -> Vec<SearchResult> {
    let doc = html_scraper::Html::parse_document(html);
    let Ok(sel) = html_scraper::Selector::parse("a.result__a") else {
        return Vec::new();
    };
    let mut out: Vec<SearchResult> = Vec::new();
    for a in doc.select(&sel) {
        if out.len() >= max_results {
            break;
        }
        let Some(url) = a.value().attr("href").and_then(unwrap_ddg_href) else {
            continue;
        };
        if out.iter().any(|r| r.url == url) {
            continue;
        }
        let title = a.text().collect::<Vec<_>>().join(" ");
        let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
        out.push(SearchResult {
            url,
            title: (!title.is_empty()).then_some(title),
            snippet: None,
            source: "duckduckgo".to_string(),
        });
    }
    out
}

#[async_trait::async_trait]
impl SearchProvider for DuckDuckGoSearchProvider {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", q.query.as_str())])
            .timeout(std::time::Duration::from_millis(timeout_ms_from_query(q)))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("duckduckgo search HTTP {status}")));
        }
        let html = resp.text().await.map_err(|e| Error::Search(e.to_string()))?;
        let results = parse_ddg_html(&html, max_results_from_query(q, 10));
        Ok(response("duckduckgo", results, t0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        k: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(k: &'static str, v: &str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::set_var(k, v);
            Self { k, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(v) = self.prev.take() {
                std::env::set_var(self.k, v);
            } else {
                std::env::remove_var(self.k);
            }
        }
    }

    #[test]
    fn empty_api_keys_are_treated_as_missing() {
        let _l = ENV_LOCK.lock().unwrap();
        let _g1 = EnvGuard::set("DILIGENIX_BRAVE_API_KEY", "");
        let _g2 = EnvGuard::set("BRAVE_SEARCH_API_KEY", " ");
        let _g3 = EnvGuard::set("DILIGENIX_TAVILY_API_KEY", "   ");
        let _g4 = EnvGuard::set("TAVILY_API_KEY", "");
        assert!(brave_api_key_from_env().is_none());
        assert!(tavily_api_key_from_env().is_none());
    }

    #[test]
    fn searxng_endpoints_from_env_accepts_list_and_dedups() {
        let _l = ENV_LOCK.lock().unwrap();
        let _g1 = EnvGuard::set("DILIGENIX_SEARXNG_ENDPOINTS", "http://a, http://b http://a");
        let _g2 = EnvGuard::set("DILIGENIX_SEARXNG_ENDPOINT", "http://b");
        assert_eq!(
            searxng_endpoints_from_env(),
            vec!["http://a".to_string(), "http://b".to_string()]
        );
    }

    #[test]
    fn auto_falls_back_to_duckduckgo_without_keys() {
        let _l = ENV_LOCK.lock().unwrap();
        let _g = [
            "DILIGENIX_BRAVE_API_KEY",
            "BRAVE_SEARCH_API_KEY",
            "DILIGENIX_TAVILY_API_KEY",
            "TAVILY_API_KEY",
            "DILIGENIX_SEARXNG_ENDPOINTS",
            "DILIGENIX_SEARXNG_ENDPOINT",
        ]
        .map(|k| EnvGuard::set(k, ""));
        let p = provider_from_env(reqwest::Client::new(), "auto").unwrap();
        assert_eq!(p.name(), "duckduckgo");
        assert!(matches!(
            provider_from_env(reqwest::Client::new(), "brave"),
            Err(Error::NotConfigured(_))
        ));
        assert!(matches!(
            provider_from_env(reqwest::Client::new(), "bing"),
            Err(Error::InvalidConfig(_))
        ));
        let c = configured_providers();
        assert_eq!(c.get("brave"), Some(&false));
        assert_eq!(c.get("duckduckgo"), Some(&true));
    }

    #[test]
    fn parses_minimal_brave_shape() {
        let js = r#"
        {
          "web": {
            "results": [
              {"url":"https://example.com","title":"Example","description":"Hello"}
            ]
          }
        }
        "#;
        let parsed: BraveWebSearchResponse = serde_json::from_str(js).unwrap();
        let rs = parsed.web.unwrap().results.unwrap();
        assert_eq!(rs.len(), 1);
        assert_eq!(rs[0].url, "https://example.com");
        assert_eq!(rs[0].description.as_deref(), Some("Hello"));
    }

    #[test]
    fn parses_minimal_tavily_and_searxng_shapes() {
        let js = r#"{"results":[{"url":"https://example.com","title":"Example","content":"Hello"}]}"#;
        let t: TavilySearchResponse = serde_json::from_str(js).unwrap();
        assert_eq!(t.results[0].content.as_deref(), Some("Hello"));
        let s: SearxngSearchResponse = serde_json::from_str(js).unwrap();
        assert_eq!(s.results.unwrap().len(), 1);
        let empty: TavilySearchResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.results.is_empty());
    }

    #[test]
    fn searxng_endpoint_accepts_base_or_search_path() {
        assert_eq!(
            SearxngSearchProvider::endpoint_search_for("http://h:8888/"),
            "http://h:8888/search"
        );
        assert_eq!(
            SearxngSearchProvider::endpoint_search_for("http://h:8888/search"),
            "http://h:8888/search"
        );
    }

    #[test]
    fn ddg_links_are_unwrapped_and_ads_dropped() {
        assert_eq!(
            unwrap_ddg_href("//duckduckgo.com/l/?uddg=https%3A%2F%2Facme.example%2Fabout&rut=abc")
                .as_deref(),
            Some("https://acme.example/about")
        );
        assert_eq!(
            unwrap_ddg_href("https://news.example/a?b=1").as_deref(),
            Some("https://news.example/a?b=1")
        );
        assert!(unwrap_ddg_href("https://duckduckgo.com/y.js?ad_provider=x").is_none());
        assert!(unwrap_ddg_href("//duckduckgo.com/l/?uddg=javascript%3Aalert(1)").is_none());
    }

    #[test]
    fn parses_ddg_result_page() {
        let html = r#"
        <html><body>
          <div class="result"><a class="result__a" href="https://duckduckgo.com/y.js?ad=1">Ad</a></div>
          <div class="result"><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fa.example%2F1">Acme   <b>Corp</b></a></div>
          <div class="result"><a class="result__a" href="https://b.example/2">B</a></div>
          <div class="result"><a class="result__a" href="https://b.example/2">B again</a></div>
          <div class="result"><a class="result__a" href="https://c.example/3">C</a></div>
          <div class="result"><a class="result__a" href="https://d.example/4">D</a></div>
        </body></html>
        "#;
        let rs = parse_ddg_html(html, 3);
        let urls: Vec<_> = rs.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://a.example/1", "https://b.example/2", "https://c.example/3"]
        );
        assert_eq!(rs[0].title.as_deref(), Some("Acme Corp"));
    }
}
