//! Content identity: URL/title normalisation and digest computation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use super::Candidate;

/// Query parameters stripped before hashing unless configured otherwise.
pub const DEFAULT_TRACKING_PARAMS: &[&str] = &[
    "utm_*",
    "fbclid",
    "gclid",
    "dclid",
    "msclkid",
    "mc_cid",
    "mc_eid",
    "igshid",
    "ref",
    "ref_src",
    "cmpid",
    "smid",
    "_ga",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub digest: String,
    pub source_id: String,
    pub first_seen: DateTime<Utc>,
}

impl Fingerprint {
    pub fn new(digest: String, source_id: impl Into<String>, first_seen: DateTime<Utc>) -> Self {
        Self {
            digest,
            source_id: source_id.into(),
            first_seen,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Exact names, or prefixes when ending in `*`.
    pub tracking_params: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            tracking_params: DEFAULT_TRACKING_PARAMS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl NormalizerConfig {
    pub fn with_extra_params<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for param in extra {
            let param = param.into().trim().to_lowercase();
            if !param.is_empty() && !self.tracking_params.contains(&param) {
                self.tracking_params.push(param);
            }
        }
        self
    }
}

/// Turns candidates into digests. Trivially different URLs to the same
/// article must collide.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    fn is_tracking(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.config.tracking_params.iter().any(|p| match p.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == *p,
        })
    }

    /// Canonical form of a URL, or `None` when it is not a usable http(s) URL.
    pub fn normalize_url(&self, raw: &str) -> Option<String> {
        let mut url = Url::parse(raw.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return None;
        }

        // Scheme and host are already lower-cased by the parser
        url.set_fragment(None);

        let mut kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !self.is_tracking(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        kept.sort();

        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }

        let host = url.host_str()?.trim_start_matches("www.").to_string();
        let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path().trim_end_matches('/').to_lowercase();
        let query = url.query().map(|q| format!("?{}", q)).unwrap_or_default();

        // http and https variants of the same article collide
        Some(format!("{}{}{}{}", host, port, path, query))
    }

    pub fn normalize_title(&self, title: &str) -> String {
        title
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Digest from normalised title + canonical URL, falling back to a hash
    /// of the normalised body when the URL is unusable.
    pub fn digest(&self, candidate: &Candidate) -> String {
        let mut hasher = Sha256::new();
        match self.normalize_url(&candidate.url) {
            Some(url) => {
                hasher.update(b"url:");
                hasher.update(self.normalize_title(&candidate.title).as_bytes());
                hasher.update(b"\n");
                hasher.update(url.as_bytes());
            }
            None => {
                hasher.update(b"content:");
                hasher.update(self.normalize_title(&candidate.body).as_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }
}
