pub mod catalog;

pub use catalog::SourceCatalog;

use std::str::FromStr;
use std::time::Duration;

use crate::domain::NormalizerConfig;
use crate::errors::{IngestError, IngestResult};
use crate::services::{HealthConfig, OrchestratorConfig, QualityConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub sources_path: String,
    pub sink_path: String,
    pub workers: usize,
    pub failure_threshold: u32,
    pub cooldown: Option<Duration>,
    pub quality_threshold: f64,
    pub min_words: usize,
    pub grace_period: Duration,
    pub request_timeout: Duration,
    pub tracking_params: Vec<String>,
}

impl Config {
    /// Get the directory where the executable is located
    fn exe_dir() -> Option<std::path::PathBuf> {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    pub fn from_env() -> IngestResult<Self> {
        let exe_dir = Self::exe_dir();

        // Try to load .env from executable's directory first
        if let Some(ref dir) = exe_dir {
            let env_path = dir.join(".env");
            if env_path.exists() {
                dotenvy::from_path(&env_path).ok();
            }
        }
        // Fall back to current directory
        dotenvy::dotenv().ok();

        let default_db = exe_dir
            .map(|d| d.join("ingestor.db").to_string_lossy().into_owned())
            .unwrap_or_else(|| "./ingestor.db".to_string());

        Self::from_lookup(|name| std::env::var(name).ok(), default_db)
    }

    fn from_lookup<F>(lookup: F, default_db: String) -> IngestResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let workers: usize = parse_var(&var, "INGEST_WORKERS", 4)?;
        if workers == 0 {
            return Err(IngestError::Config("INGEST_WORKERS must be at least 1".to_string()));
        }

        let quality_threshold: f64 = parse_var(&var, "INGEST_QUALITY_THRESHOLD", 0.7)?;
        if !(0.0..=1.0).contains(&quality_threshold) {
            return Err(IngestError::Config(format!(
                "INGEST_QUALITY_THRESHOLD must be between 0 and 1, got {}",
                quality_threshold
            )));
        }

        let cooldown = match var("INGEST_COOLDOWN_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_value("INGEST_COOLDOWN_SECS", &raw)?)),
            None => None,
        };

        let tracking_params = var("INGEST_TRACKING_PARAMS")
            .map(|raw| {
                raw.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            db_path: var("INGEST_DB_PATH").unwrap_or(default_db),
            sources_path: var("INGEST_SOURCES_PATH").unwrap_or_else(|| "sources.json".to_string()),
            sink_path: var("INGEST_SINK_PATH").unwrap_or_else(|| "accepted.jsonl".to_string()),
            workers,
            failure_threshold: parse_var(&var, "INGEST_FAILURE_THRESHOLD", 5)?,
            cooldown,
            quality_threshold,
            min_words: parse_var(&var, "INGEST_MIN_WORDS", 80)?,
            grace_period: Duration::from_secs(parse_var(&var, "INGEST_GRACE_SECS", 10)?),
            request_timeout: Duration::from_secs(parse_var(&var, "INGEST_TIMEOUT_SECS", 30)?),
            tracking_params,
        })
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            workers: self.workers,
            grace_period: self.grace_period,
            health: HealthConfig {
                failure_threshold: self.failure_threshold,
                cooldown: self.cooldown,
                ..HealthConfig::default()
            },
            quality: QualityConfig {
                threshold: self.quality_threshold,
                min_words: self.min_words,
                ..QualityConfig::default()
            },
            normalizer: NormalizerConfig::default()
                .with_extra_params(self.tracking_params.iter().cloned()),
            ..OrchestratorConfig::default()
        }
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> IngestResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| IngestError::Config(format!("{} has invalid value '{}'", name, raw)))
}

fn parse_var<T, F>(var: &F, name: &str, default: T) -> IngestResult<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}
