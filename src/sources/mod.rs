pub mod traits;
pub mod http;
pub mod feed;
pub mod api;
pub mod scrape;
pub mod registry;

pub use traits::SourceAdapter;
pub use http::{HttpFetcher, RetryPolicy};
pub use feed::FeedAdapter;
pub use api::PaginatedApiAdapter;
pub use scrape::{CssRuleConfig, CssRules, ExtractionRules, ScraperAdapter};
pub use registry::AdapterRegistry;

use chrono::{DateTime, NaiveDate, Utc};
use scraper::Html;
use serde::de::DeserializeOwned;

use crate::domain::Source;
use crate::errors::{IngestError, IngestResult};

/// Decode a source's endpoint blob into an adapter's config type.
pub(crate) fn endpoint<T: DeserializeOwned>(source: &Source) -> IngestResult<T> {
    // A bare string is shorthand for {"url": "..."}
    let value = match &source.endpoint {
        serde_json::Value::String(url) => serde_json::json!({ "url": url }),
        other => other.clone(),
    };
    serde_json::from_value(value).map_err(|e| {
        IngestError::Config(format!(
            "source {}: invalid {} endpoint: {}",
            source.id, source.kind, e
        ))
    })
}

/// Plain text from an HTML fragment, keeping word boundaries between blocks.
pub(crate) fn html_to_text(html: &str) -> String {
    if !html.contains('<') {
        return html.split_whitespace().collect::<Vec<_>>().join(" ");
    }

    let document = Html::parse_fragment(html);
    let mut text = String::new();

    for node in document.root_element().descendants() {
        if let Some(text_node) = node.value().as_text() {
            text.push_str(text_node);
        }
        if let Some(element) = node.value().as_element() {
            match element.name() {
                "p" | "br" | "div" | "li" | "h1" | "h2" | "h3" | "h4" | "article" | "section" => {
                    text.push(' ')
                }
                _ => {}
            }
        }
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// RFC 3339, RFC 2822 or a bare `YYYY-MM-DD` date.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })
}
