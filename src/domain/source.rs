use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Feed,
    Api,
    Scraper,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Feed => "feed",
            SourceKind::Api => "api",
            SourceKind::Scraper => "scraper",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "feed" | "rss" | "atom" => Ok(SourceKind::Feed),
            "api" => Ok(SourceKind::Api),
            "scraper" => Ok(SourceKind::Scraper),
            _ => Err(format!("Unknown source kind: {}", s)),
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dispatch order: `High` sorts before `Normal` before `Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    #[default]
    Active,
    Inactive,
    Error,
    Maintenance,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Inactive => "inactive",
            SourceStatus::Error => "error",
            SourceStatus::Maintenance => "maintenance",
        }
    }
}

impl std::str::FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SourceStatus::Active),
            "inactive" => Ok(SourceStatus::Inactive),
            "error" => Ok(SourceStatus::Error),
            "maintenance" => Ok(SourceStatus::Maintenance),
            _ => Err(format!("Unknown source status: {}", s)),
        }
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBudget {
    pub max_per_hour: u32,
    pub max_per_day: u32,
}

impl RateBudget {
    pub fn new(max_per_hour: u32, max_per_day: u32) -> Self {
        Self {
            max_per_hour,
            max_per_day,
        }
    }

    /// A zero in either window means the source may never be fetched.
    pub fn is_zero(&self) -> bool {
        self.max_per_hour == 0 || self.max_per_day == 0
    }
}

impl Default for RateBudget {
    fn default() -> Self {
        Self::new(60, 1000)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub kind: SourceKind,
    /// Adapter-specific configuration. The orchestrator never looks inside.
    pub endpoint: serde_json::Value,
    pub language: String,
    pub priority: Priority,
    pub budget: RateBudget,
    pub status: SourceStatus,
    pub health_score: u8,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Set while the circuit breaker holds the source in `Error`.
    pub disabled_at: Option<DateTime<Utc>>,
    /// Remote throttling hold placed after a `429`.
    pub hold_until: Option<DateTime<Utc>>,
}

impl Source {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            endpoint: serde_json::Value::Null,
            language: "en".to_string(),
            priority: Priority::Normal,
            budget: RateBudget::default(),
            status: SourceStatus::Active,
            health_score: 100,
            consecutive_failures: 0,
            last_success_at: None,
            last_attempt_at: None,
            disabled_at: None,
            hold_until: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: serde_json::Value) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_budget(mut self, budget: RateBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_status(mut self, status: SourceStatus) -> Self {
        self.status = status;
        self
    }

    /// Primary language subtag, lower-cased ("en-US" -> "en").
    pub fn language_code(&self) -> String {
        primary_language(&self.language)
    }
}

pub(crate) fn primary_language(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}
