use std::future::Future;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::domain::{Candidate, Source, SourceKind};
use crate::errors::{FetchError, IngestError, IngestResult};
use crate::sources::http::HttpFetcher;
use crate::sources::traits::SourceAdapter;
use crate::sources::{endpoint, html_to_text, parse_timestamp};

fn default_cursor_param() -> String {
    "cursor".to_string()
}

fn default_max_pages() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiEndpoint {
    url: String,
    #[serde(default = "default_cursor_param")]
    cursor_param: String,
    /// Query parameter for the page size. Omitted when unset.
    #[serde(default)]
    page_size_param: Option<String>,
    #[serde(default)]
    page_size: Option<usize>,
    #[serde(default = "default_max_pages")]
    max_pages: usize,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiPage {
    #[serde(default, alias = "items", alias = "results", alias = "data")]
    articles: Vec<ApiItem>,
    #[serde(default, alias = "next", alias = "nextPage", alias = "next_page", alias = "cursor")]
    next_cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiItem {
    #[serde(default, alias = "headline")]
    title: Option<String>,
    #[serde(default, alias = "link", alias = "href")]
    url: Option<String>,
    #[serde(default, alias = "published", alias = "publishedAt", alias = "date")]
    published_at: Option<String>,
    #[serde(default, alias = "content", alias = "description", alias = "summary")]
    body: Option<String>,
    #[serde(default, alias = "lang")]
    language: Option<String>,
}

impl ApiItem {
    fn into_candidate(self, source_id: &str) -> Candidate {
        let published = self.published_at.as_deref().and_then(parse_timestamp);
        let candidate = Candidate::new(
            source_id,
            self.title.unwrap_or_default().trim(),
            self.url.unwrap_or_default(),
        )
        .with_body(html_to_text(&self.body.unwrap_or_default()))
        .with_published(published)
        .with_language(self.language);

        if published.is_none() {
            candidate.flag_missing("published")
        } else {
            candidate
        }
    }
}

impl ApiEndpoint {
    fn page_url(&self, cursor: Option<&str>, page_size: Option<usize>) -> Result<String, FetchError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| FetchError::structural(format!("invalid api url: {}", e)))?;
        let mut pairs: Vec<(&str, String)> = Vec::new();
        if let Some(cursor) = cursor {
            pairs.push((self.cursor_param.as_str(), cursor.to_string()));
        }
        if let (Some(param), Some(size)) = (&self.page_size_param, page_size) {
            pairs.push((param.as_str(), size.to_string()));
        }
        // Touching the serializer at all would leave a bare '?'
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url.to_string())
    }
}

/// Follow cursors until `limit` items or exhaustion. A `limit` of 0 reads a
/// single page at the API's default size.
pub(crate) async fn paginate<F, Fut>(
    config: &ApiEndpoint,
    source_id: &str,
    limit: usize,
    mut load: F,
) -> Result<Vec<Candidate>, FetchError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<ApiPage, FetchError>>,
{
    let mut candidates = Vec::new();
    let mut cursor: Option<String> = None;

    for page_no in 0..config.max_pages.max(1) {
        let page_size = if limit == 0 {
            None
        } else {
            let remaining = limit - candidates.len();
            Some(config.page_size.map_or(remaining, |s| s.min(remaining)))
        };

        let url = config.page_url(cursor.as_deref(), page_size)?;
        let page = load(url).await?;
        let received = page.articles.len();

        for item in page.articles {
            if limit > 0 && candidates.len() >= limit {
                break;
            }
            candidates.push(item.into_candidate(source_id));
        }
        debug!(page = page_no, received, total = candidates.len(), "api page");

        if limit == 0 || candidates.len() >= limit || received == 0 {
            break;
        }
        match page.next_cursor.filter(|c| !c.is_empty()) {
            Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
            _ => break,
        }
    }

    Ok(candidates)
}

/// JSON news APIs with cursor pagination.
pub struct PaginatedApiAdapter {
    http: HttpFetcher,
}

impl PaginatedApiAdapter {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SourceAdapter for PaginatedApiAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    fn validate(&self, source: &Source) -> IngestResult<()> {
        let config: ApiEndpoint = endpoint(source)?;
        Url::parse(&config.url)
            .map_err(|e| IngestError::Config(format!("source {}: invalid api url: {}", source.id, e)))?;
        Ok(())
    }

    #[instrument(skip_all, fields(source = %source.id))]
    async fn fetch(&self, source: &Source, limit: usize) -> Result<Vec<Candidate>, FetchError> {
        let config: ApiEndpoint =
            endpoint(source).map_err(|e| FetchError::structural(e.to_string()))?;

        let http = &self.http;
        paginate(&config, &source.id, limit, |url| async move {
            http.get_json::<ApiPage>(&url).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchErrorKind;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn config(json: serde_json::Value) -> ApiEndpoint {
        serde_json::from_value(json).unwrap()
    }

    fn page(json: serde_json::Value) -> ApiPage {
        serde_json::from_value(json).unwrap()
    }

    /// Serves canned pages and records the requested URLs.
    struct Pages {
        pages: Mutex<VecDeque<Result<ApiPage, FetchError>>>,
        requested: Mutex<Vec<String>>,
    }

    impl Pages {
        fn new(pages: Vec<Result<ApiPage, FetchError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                requested: Mutex::new(Vec::new()),
            }
        }

        async fn load(&self, url: String) -> Result<ApiPage, FetchError> {
            self.requested.lock().unwrap().push(url);
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ApiPage::default()))
        }
    }

    fn items(prefix: &str, n: usize) -> serde_json::Value {
        serde_json::Value::Array(
            (0..n)
                .map(|i| {
                    serde_json::json!({
                        "title": format!("{} {}", prefix, i),
                        "url": format!("https://news.example.com/{}/{}", prefix, i),
                        "publishedAt": "2024-03-01T10:00:00Z",
                        "content": "<p>Body text</p>"
                    })
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_follows_cursor_until_limit() {
        let cfg = config(serde_json::json!({
            "url": "https://api.example.com/v1/articles",
            "page_size_param": "page_size",
            "page_size": 2
        }));
        let pages = Pages::new(vec![
            Ok(page(serde_json::json!({"articles": items("a", 2), "next_cursor": "c2"}))),
            Ok(page(serde_json::json!({"articles": items("b", 2), "next_cursor": "c3"}))),
            Ok(page(serde_json::json!({"articles": items("c", 2), "next_cursor": "c4"}))),
        ]);

        let candidates = paginate(&cfg, "wire", 5, |url| pages.load(url)).await.unwrap();
        assert_eq!(candidates.len(), 5);
        assert_eq!(candidates[4].title, "c 0");
        assert_eq!(candidates[0].body, "Body text");

        let requested = pages.requested.lock().unwrap().clone();
        assert_eq!(requested.len(), 3);
        assert!(requested[1].contains("cursor=c2"));
        assert!(requested[2].contains("page_size=1"));
    }

    #[tokio::test]
    async fn test_stops_on_exhaustion() {
        let cfg = config(serde_json::json!({"url": "https://api.example.com/v1/articles"}));
        let pages = Pages::new(vec![
            Ok(page(serde_json::json!({"items": items("a", 3), "next": "p2"}))),
            Ok(page(serde_json::json!({"items": items("b", 1), "next": null}))),
        ]);

        let candidates = paginate(&cfg, "wire", 100, |url| pages.load(url)).await.unwrap();
        assert_eq!(candidates.len(), 4);
        assert_eq!(pages.requested.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_limit_reads_one_default_page() {
        let cfg = config(serde_json::json!({
            "url": "https://api.example.com/v1/articles",
            "page_size_param": "page_size",
            "page_size": 10
        }));
        let pages = Pages::new(vec![
            Ok(page(serde_json::json!({"results": items("a", 25), "next_cursor": "more"}))),
        ]);

        let candidates = paginate(&cfg, "wire", 0, |url| pages.load(url)).await.unwrap();
        assert_eq!(candidates.len(), 25);

        let requested = pages.requested.lock().unwrap().clone();
        assert_eq!(requested, vec!["https://api.example.com/v1/articles".to_string()]);
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces() {
        let cfg = config(serde_json::json!({"url": "https://api.example.com/v1/articles"}));
        let pages = Pages::new(vec![
            Ok(page(serde_json::json!({"articles": items("a", 2), "next_cursor": "c2"}))),
            Err(FetchError::rate_limited(
                "HTTP 429 Too Many Requests",
                Some(std::time::Duration::from_secs(60)),
            )),
        ]);

        let err = paginate(&cfg, "wire", 10, |url| pages.load(url)).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::RemoteRateLimited);
        assert_eq!(err.retry_after, Some(std::time::Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_repeated_cursor_stops() {
        let cfg = config(serde_json::json!({"url": "https://api.example.com/v1/articles"}));
        let pages = Pages::new(vec![
            Ok(page(serde_json::json!({"articles": items("a", 1), "next_cursor": "same"}))),
            Ok(page(serde_json::json!({"articles": items("b", 1), "next_cursor": "same"}))),
            Ok(page(serde_json::json!({"articles": items("c", 1), "next_cursor": "same"}))),
        ]);

        let candidates = paginate(&cfg, "wire", 10, |url| pages.load(url)).await.unwrap();
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_item_without_date_flagged() {
        let item: ApiItem = serde_json::from_value(serde_json::json!({
            "headline": "No date here",
            "link": "https://news.example.com/x",
            "lang": "en"
        }))
        .unwrap();
        let candidate = item.into_candidate("wire");
        assert_eq!(candidate.title, "No date here");
        assert_eq!(candidate.language.as_deref(), Some("en"));
        assert_eq!(candidate.missing_fields, vec!["published"]);
    }
}
