use async_trait::async_trait;
use feed_rs::parser;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::domain::{Candidate, Source, SourceKind};
use crate::errors::{FetchError, IngestError, IngestResult};
use crate::sources::http::HttpFetcher;
use crate::sources::traits::SourceAdapter;
use crate::sources::{endpoint, html_to_text};

#[derive(Debug, Deserialize)]
struct FeedEndpoint {
    url: String,
}

/// RSS, Atom and JSON Feed documents.
pub struct FeedAdapter {
    http: HttpFetcher,
}

impl FeedAdapter {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }

    /// Malformed documents are structural failures.
    pub(crate) fn candidates_from_bytes(
        source_id: &str,
        bytes: &[u8],
        limit: usize,
    ) -> Result<Vec<Candidate>, FetchError> {
        let parsed = parser::parse(bytes)
            .map_err(|e| FetchError::structural(format!("malformed feed: {}", e)))?;

        let language = parsed.language.clone();
        let cap = if limit == 0 { usize::MAX } else { limit };

        let candidates = parsed
            .entries
            .into_iter()
            .take(cap)
            .map(|entry| {
                let title = entry
                    .title
                    .map(|t| html_to_text(&t.content))
                    .unwrap_or_default();

                let url = entry
                    .links
                    .iter()
                    .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
                    .or_else(|| entry.links.first())
                    .map(|l| l.href.clone())
                    .unwrap_or_else(|| entry.id.clone());

                let body = entry
                    .content
                    .and_then(|c| c.body)
                    .or_else(|| entry.summary.map(|s| s.content))
                    .map(|html| html_to_text(&html))
                    .unwrap_or_default();

                let published = entry.published.or(entry.updated);

                let candidate = Candidate::new(source_id, title, url)
                    .with_body(body)
                    .with_published(published)
                    .with_language(language.clone());

                if published.is_none() {
                    candidate.flag_missing("published")
                } else {
                    candidate
                }
            })
            .collect();

        Ok(candidates)
    }
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Feed
    }

    fn validate(&self, source: &Source) -> IngestResult<()> {
        let config: FeedEndpoint = endpoint(source)?;
        url::Url::parse(&config.url)
            .map_err(|e| IngestError::Config(format!("source {}: invalid feed url: {}", source.id, e)))?;
        Ok(())
    }

    #[instrument(skip_all, fields(source = %source.id))]
    async fn fetch(&self, source: &Source, limit: usize) -> Result<Vec<Candidate>, FetchError> {
        let config: FeedEndpoint =
            endpoint(source).map_err(|e| FetchError::structural(e.to_string()))?;

        let bytes = self.http.get_bytes(&config.url).await?;
        let candidates = Self::candidates_from_bytes(&source.id, &bytes, limit)?;
        debug!(count = candidates.len(), "parsed feed");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchErrorKind;
    use serde_json::json;

    const SAMPLE_RSS: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Rust Blog</title>
    <link>https://blog.rust-lang.org/</link>
    <description>Empowering everyone to build reliable and efficient software.</description>
    <language>en-us</language>
    <item>
      <title>Announcing Rust 1.75.0</title>
      <link>https://blog.rust-lang.org/2023/12/28/Rust-1.75.0.html</link>
      <description><![CDATA[<p>The Rust team is happy to announce a new version of Rust, 1.75.0.</p><p>This release includes async fn in traits.</p>]]></description>
      <pubDate>Thu, 28 Dec 2023 00:00:00 +0000</pubDate>
      <guid>https://blog.rust-lang.org/2023/12/28/Rust-1.75.0.html</guid>
    </item>
    <item>
      <title>Rust 2024 Call for Testing</title>
      <link>https://blog.rust-lang.org/2024/01/10/Rust-2024-CFT.html</link>
      <description><![CDATA[<p>We're testing the next edition of Rust!</p>]]></description>
      <guid>https://blog.rust-lang.org/2024/01/10/Rust-2024-CFT.html</guid>
    </item>
  </channel>
</rss>"#;

    const SAMPLE_ATOM: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Tech Blog</title>
  <link href="https://example.com/"/>
  <id>https://example.com/feed.atom</id>
  <updated>2024-01-15T12:00:00Z</updated>
  <entry>
    <title>Understanding WebAssembly</title>
    <link href="https://example.com/posts/wasm-intro"/>
    <id>https://example.com/posts/wasm-intro</id>
    <updated>2024-01-15T12:00:00Z</updated>
    <content type="html"><![CDATA[<article><h1>Understanding WebAssembly</h1><p>WebAssembly is a binary instruction format.</p></article>]]></content>
  </entry>
</feed>"#;

    #[test]
    fn test_rss_candidates() {
        let candidates = FeedAdapter::candidates_from_bytes("rust", SAMPLE_RSS, 0).unwrap();
        assert_eq!(candidates.len(), 2);

        let first = &candidates[0];
        assert_eq!(first.title, "Announcing Rust 1.75.0");
        assert_eq!(first.url, "https://blog.rust-lang.org/2023/12/28/Rust-1.75.0.html");
        assert_eq!(first.source_id, "rust");
        assert!(first.body.contains("async fn in traits"));
        assert!(!first.body.contains("<p>"));
        assert!(first.published.is_some());
        assert_eq!(first.language.as_deref(), Some("en-us"));
        assert!(!first.is_partial());
    }

    #[test]
    fn test_missing_date_flagged_not_dropped() {
        let candidates = FeedAdapter::candidates_from_bytes("rust", SAMPLE_RSS, 0).unwrap();
        let second = &candidates[1];
        assert!(second.published.is_none());
        assert_eq!(second.missing_fields, vec!["published"]);
    }

    #[test]
    fn test_atom_candidates() {
        let candidates = FeedAdapter::candidates_from_bytes("blog", SAMPLE_ATOM, 0).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://example.com/posts/wasm-intro");
        assert!(candidates[0].body.contains("binary instruction format"));
        assert!(candidates[0].published.is_some());
    }

    #[test]
    fn test_limit_caps_entries() {
        let candidates = FeedAdapter::candidates_from_bytes("rust", SAMPLE_RSS, 1).unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_malformed_document_is_structural() {
        let err = FeedAdapter::candidates_from_bytes("rust", b"<html>not a feed", 0).unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::StructuralParse);
    }

    #[test]
    fn test_validate_endpoint() {
        let adapter = FeedAdapter::new(
            HttpFetcher::new(std::time::Duration::from_secs(5), Default::default()).unwrap(),
        );
        let good = Source::new("a", "A", SourceKind::Feed)
            .with_endpoint(json!({"url": "https://example.com/feed.xml"}));
        assert!(adapter.validate(&good).is_ok());

        let bad = Source::new("b", "B", SourceKind::Feed).with_endpoint(json!({"link": "x"}));
        assert!(matches!(adapter.validate(&bad), Err(IngestError::Config(_))));
    }
}
