use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::domain::{Candidate, Source, SourceKind};
use crate::errors::{FetchError, IngestError, IngestResult};
use crate::sources::http::HttpFetcher;
use crate::sources::traits::SourceAdapter;
use crate::sources::{endpoint, parse_timestamp};

/// Site-specific extraction. Implementations must not fail on partial
/// pages: items missing optional fields are returned flagged.
pub trait ExtractionRules: Send + Sync {
    fn extract(&self, document: &Html, base: &Url, source_id: &str) -> Vec<Candidate>;
}

fn default_href() -> String {
    "href".to_string()
}

fn default_datetime() -> String {
    "datetime".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct ScraperEndpoint {
    url: String,
    #[serde(flatten)]
    rules: CssRuleConfig,
}

/// Selector-based rules, as written in a source's endpoint config.
#[derive(Debug, Clone, Deserialize)]
pub struct CssRuleConfig {
    pub item: String,
    pub title: String,
    pub link: String,
    #[serde(default = "default_href")]
    pub link_attr: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default = "default_datetime")]
    pub date_attr: String,
    #[serde(default)]
    pub body: Option<String>,
}

pub struct CssRules {
    item: Selector,
    title: Selector,
    link: Selector,
    link_attr: String,
    date: Option<Selector>,
    date_attr: String,
    body: Option<Selector>,
}

fn selector(raw: &str) -> IngestResult<Selector> {
    Selector::parse(raw)
        .map_err(|e| IngestError::Config(format!("invalid selector '{}': {:?}", raw, e)))
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

impl CssRules {
    pub fn from_config(config: &CssRuleConfig) -> IngestResult<Self> {
        Ok(Self {
            item: selector(&config.item)?,
            title: selector(&config.title)?,
            link: selector(&config.link)?,
            link_attr: config.link_attr.clone(),
            date: config.date.as_deref().map(selector).transpose()?,
            date_attr: config.date_attr.clone(),
            body: config.body.as_deref().map(selector).transpose()?,
        })
    }

    fn extract_item(&self, item: ElementRef<'_>, base: &Url, source_id: &str) -> Option<Candidate> {
        let title = item.select(&self.title).next().map(text_of).filter(|t| !t.is_empty())?;
        let href = item
            .select(&self.link)
            .next()
            .and_then(|el| el.value().attr(&self.link_attr))?;
        let url = base.join(href.trim()).ok()?;

        let published = self.date.as_ref().and_then(|sel| {
            item.select(sel).next().and_then(|el| {
                el.value()
                    .attr(&self.date_attr)
                    .and_then(parse_timestamp)
                    .or_else(|| parse_timestamp(&text_of(el)))
            })
        });

        let body = self
            .body
            .as_ref()
            .and_then(|sel| item.select(sel).next().map(text_of))
            .unwrap_or_default();

        let mut candidate = Candidate::new(source_id, title, url.to_string())
            .with_body(body)
            .with_published(published);
        if candidate.published.is_none() {
            candidate = candidate.flag_missing("published");
        }
        if candidate.body.is_empty() {
            candidate = candidate.flag_missing("body");
        }
        Some(candidate)
    }
}

impl ExtractionRules for CssRules {
    fn extract(&self, document: &Html, base: &Url, source_id: &str) -> Vec<Candidate> {
        document
            .select(&self.item)
            .filter_map(|item| {
                let candidate = self.extract_item(item, base, source_id);
                if candidate.is_none() {
                    debug!(source = source_id, "skipping item without title or link");
                }
                candidate
            })
            .collect()
    }
}

/// HTML pages with pluggable extraction rules.
///
/// Rules registered for a source id take precedence; otherwise CSS rules are
/// built from the source's endpoint config.
pub struct ScraperAdapter {
    http: HttpFetcher,
    custom: HashMap<String, Arc<dyn ExtractionRules>>,
}

impl ScraperAdapter {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            http,
            custom: HashMap::new(),
        }
    }

    pub fn with_rules(mut self, source_id: impl Into<String>, rules: Arc<dyn ExtractionRules>) -> Self {
        self.custom.insert(source_id.into(), rules);
        self
    }

    fn rules_for(&self, source: &Source, config: &ScraperEndpoint) -> IngestResult<Arc<dyn ExtractionRules>> {
        match self.custom.get(&source.id) {
            Some(rules) => Ok(Arc::clone(rules)),
            None => Ok(Arc::new(CssRules::from_config(&config.rules)?)),
        }
    }

    fn page_url(source: &Source) -> IngestResult<(ScraperEndpoint, Url)> {
        let config: ScraperEndpoint = endpoint(source)?;
        let url = Url::parse(&config.url)
            .map_err(|e| IngestError::Config(format!("source {}: invalid page url: {}", source.id, e)))?;
        Ok((config, url))
    }

    pub(crate) fn extract_page(
        rules: &dyn ExtractionRules,
        html: &str,
        base: &Url,
        source_id: &str,
        limit: usize,
    ) -> Vec<Candidate> {
        let document = Html::parse_document(html);
        let mut candidates = rules.extract(&document, base, source_id);
        if limit > 0 {
            candidates.truncate(limit);
        }
        candidates
    }
}

#[async_trait]
impl SourceAdapter for ScraperAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Scraper
    }

    fn validate(&self, source: &Source) -> IngestResult<()> {
        if self.custom.contains_key(&source.id) {
            return Ok(());
        }
        let (config, _) = Self::page_url(source)?;
        CssRules::from_config(&config.rules)?;
        Ok(())
    }

    #[instrument(skip_all, fields(source = %source.id))]
    async fn fetch(&self, source: &Source, limit: usize) -> Result<Vec<Candidate>, FetchError> {
        let (config, base) =
            Self::page_url(source).map_err(|e| FetchError::structural(e.to_string()))?;
        let rules = self
            .rules_for(source, &config)
            .map_err(|e| FetchError::structural(e.to_string()))?;

        let html = self.http.get_text(base.as_str()).await?;
        let candidates = Self::extract_page(rules.as_ref(), &html, &base, &source.id, limit);
        debug!(count = candidates.len(), "scraped page");
        Ok(candidates)
    }
}
