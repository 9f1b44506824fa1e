//! Source definitions loaded from a JSON document.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::domain::{Priority, RateBudget, Source, SourceKind, SourceStatus};
use crate::errors::{IngestError, IngestResult};

fn default_language() -> String {
    "en".to_string()
}

fn default_per_hour() -> u32 {
    RateBudget::default().max_per_hour
}

fn default_per_day() -> u32 {
    RateBudget::default().max_per_day
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceDefinition {
    id: String,
    name: String,
    kind: String,
    #[serde(default)]
    endpoint: serde_json::Value,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default)]
    priority: Priority,
    #[serde(default = "default_per_hour")]
    max_per_hour: u32,
    #[serde(default = "default_per_day")]
    max_per_day: u32,
    #[serde(default)]
    status: Option<SourceStatus>,
}

impl SourceDefinition {
    fn into_source(self) -> IngestResult<Source> {
        let kind: SourceKind = self
            .kind
            .parse()
            .map_err(|e| IngestError::Config(format!("source {}: {}", self.id, e)))?;

        Ok(Source::new(self.id, self.name, kind)
            .with_endpoint(self.endpoint)
            .with_language(self.language)
            .with_priority(self.priority)
            .with_budget(RateBudget::new(self.max_per_hour, self.max_per_day))
            .with_status(self.status.unwrap_or_default()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    sources: Vec<Source>,
}

impl SourceCatalog {
    /// A missing file is an empty catalog.
    pub fn load<P: AsRef<Path>>(path: P) -> IngestResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no source catalog found");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> IngestResult<Self> {
        let definitions: Vec<SourceDefinition> = serde_json::from_str(content)
            .map_err(|e| IngestError::Config(format!("invalid source catalog: {}", e)))?;

        let mut ids = HashSet::new();
        let mut sources = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if definition.id.trim().is_empty() {
                return Err(IngestError::Config("source with empty id".to_string()));
            }
            if !ids.insert(definition.id.clone()) {
                return Err(IngestError::Config(format!(
                    "duplicate source id: {}",
                    definition.id
                )));
            }
            sources.push(definition.into_source()?);
        }

        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }
}
