//! Deterministic acceptance gate for candidates.
//!
//! Scores are compared in thousandths so that a candidate sitting exactly on
//! the threshold is accepted and one a thousandth below is not, whatever the
//! floating point representation of the weights.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::source::primary_language;
use crate::domain::{Candidate, Source};

/// Titles that carry no information.
const BOILERPLATE_TITLES: &[&str] = &[
    "untitled",
    "no title",
    "(no title)",
    "[no title]",
    "title",
    "placeholder",
    "test",
    "home",
    "index",
    "news",
    "article",
    "new post",
    "read more",
];

/// Body phrases typical of paywalls, cookie walls and template filler.
const BOILERPLATE_MARKERS: &[&str] = &[
    "lorem ipsum",
    "enable javascript",
    "subscribe to continue",
    "subscribe to read",
    "this content is for subscribers",
    "accept cookies",
    "we use cookies",
    "click here to read more",
    "page not found",
    "access denied",
];

static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("static regex"));

static STOPWORDS: &[(&str, &[&str])] = &[
    (
        "en",
        &["the", "and", "of", "to", "is", "in", "that", "for", "with", "was", "on", "are"],
    ),
    (
        "es",
        &["el", "la", "de", "que", "y", "los", "las", "en", "por", "con", "una", "para"],
    ),
    (
        "fr",
        &["le", "la", "les", "des", "et", "est", "une", "dans", "pour", "que", "qui", "du"],
    ),
    (
        "de",
        &["der", "die", "das", "und", "ist", "nicht", "mit", "ein", "eine", "den", "von", "zu"],
    ),
    (
        "it",
        &["il", "della", "che", "di", "gli", "una", "sono", "per", "non", "del", "nel", "con"],
    ),
    (
        "pt",
        &["o", "os", "da", "do", "que", "uma", "não", "em", "para", "com", "são", "das"],
    ),
    (
        "nl",
        &["de", "het", "een", "en", "van", "niet", "zijn", "op", "voor", "met", "dat", "ook"],
    ),
];

/// Minimum stopword hits before a guess is trusted.
const MIN_LANGUAGE_EVIDENCE: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Bodies shorter than this are rejected outright.
    pub min_words: usize,
    /// Word count that earns the full length component.
    pub target_words: usize,
    pub threshold: f64,
    pub length_weight: f64,
    pub date_weight: f64,
    pub boilerplate_weight: f64,
    pub check_language: bool,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_words: 80,
            target_words: 250,
            threshold: 0.7,
            length_weight: 0.5,
            date_weight: 0.2,
            boilerplate_weight: 0.3,
            check_language: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub accept: bool,
    pub score: f64,
    pub reason: String,
}

impl Verdict {
    fn reject(score: f64, reason: impl Into<String>) -> Self {
        Self {
            accept: false,
            score,
            reason: reason.into(),
        }
    }
}

fn to_milli(value: f64) -> i64 {
    (value * 1000.0).round() as i64
}

#[derive(Debug, Clone, Default)]
pub struct QualityFilter {
    config: QualityConfig,
}

impl QualityFilter {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn evaluate(&self, candidate: &Candidate, source: &Source) -> Verdict {
        let body = MARKUP.replace_all(&candidate.body, " ");
        let words = body.split_whitespace().count();

        let title = candidate.title.trim().to_lowercase();
        if title.is_empty() {
            return Verdict::reject(0.0, "empty title");
        }
        if BOILERPLATE_TITLES.contains(&title.as_str()) {
            return Verdict::reject(0.0, format!("boilerplate title '{}'", candidate.title.trim()));
        }

        if words < self.config.min_words {
            return Verdict::reject(
                0.0,
                format!("{} words, minimum is {}", words, self.config.min_words),
            );
        }

        if self.config.check_language {
            let expected = source.language_code();
            let found = candidate
                .language
                .as_deref()
                .map(primary_language)
                .filter(|l| !l.is_empty())
                .or_else(|| detect_language(&body));

            if let Some(found) = found {
                if !expected.is_empty() && found != expected {
                    return Verdict::reject(
                        0.0,
                        format!("language '{}' does not match '{}'", found, expected),
                    );
                }
            }
        }

        let score = self.score(candidate, &body, words);
        let score_milli = to_milli(score);
        let threshold_milli = to_milli(self.config.threshold);

        if score_milli >= threshold_milli {
            Verdict {
                accept: true,
                score,
                reason: format!("score {:.3}", score),
            }
        } else {
            Verdict::reject(
                score,
                format!("score {:.3} below {:.3}", score, self.config.threshold),
            )
        }
    }

    fn score(&self, candidate: &Candidate, body: &str, words: usize) -> f64 {
        let target = self.config.target_words.max(1) as f64;
        let length = (words as f64 / target).min(1.0);
        let dated = if candidate.published.is_some() { 1.0 } else { 0.0 };
        let clean = if has_boilerplate(body) { 0.0 } else { 1.0 };

        let total = self.config.length_weight * length
            + self.config.date_weight * dated
            + self.config.boilerplate_weight * clean;
        // Round to thousandths so equal inputs always compare equal
        (to_milli(total).clamp(0, 1000) as f64) / 1000.0
    }
}

fn has_boilerplate(body: &str) -> bool {
    let lower = body.to_lowercase();
    BOILERPLATE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Best-effort guess from stopword frequency. `None` when undecided.
fn detect_language(text: &str) -> Option<String> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();

    let mut hits: Vec<(&str, usize)> = STOPWORDS
        .iter()
        .map(|(lang, stops)| {
            let count = words.iter().filter(|w| stops.contains(&w.as_str())).count();
            (*lang, count)
        })
        .collect();
    hits.sort_by(|a, b| b.1.cmp(&a.1));

    match hits.as_slice() {
        [(lang, best), (_, second), ..] if *best >= MIN_LANGUAGE_EVIDENCE && best > second => {
            Some(lang.to_string())
        }
        _ => None,
    }
}
