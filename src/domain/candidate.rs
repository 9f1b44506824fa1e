use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw fetched item. Lives only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub url: String,
    pub published: Option<DateTime<Utc>>,
    pub body: String,
    pub source_id: String,
    /// Language declared by the remote document, if any.
    pub language: Option<String>,
    /// Non-essential fields the adapter could not extract.
    pub missing_fields: Vec<String>,
    pub quality_score: Option<f64>,
}

impl Candidate {
    pub fn new(source_id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            published: None,
            body: String::new(),
            source_id: source_id.into(),
            language: None,
            missing_fields: Vec::new(),
            quality_score: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_published(mut self, published: Option<DateTime<Utc>>) -> Self {
        self.published = published;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn flag_missing(mut self, field: &str) -> Self {
        if !self.missing_fields.iter().any(|f| f == field) {
            self.missing_fields.push(field.to_string());
        }
        self
    }

    pub fn is_partial(&self) -> bool {
        !self.missing_fields.is_empty()
    }

    pub fn word_count(&self) -> usize {
        self.body.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_missing_is_idempotent() {
        let candidate = Candidate::new("s", "Title", "https://example.com/a")
            .flag_missing("published")
            .flag_missing("published");
        assert_eq!(candidate.missing_fields, vec!["published"]);
        assert!(candidate.is_partial());
    }

    #[test]
    fn test_word_count() {
        let candidate = Candidate::new("s", "Title", "https://example.com/a")
            .with_body("  one two\nthree\tfour  ");
        assert_eq!(candidate.word_count(), 4);
    }
}
