//! The extracted article handed to the exporter.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};

/// An article produced by the extraction step.
///
/// Read-only for the duration of an export. The JSON form uses camelCase keys
/// (`bodyHtml`, `sourceUrl`, ...); the upper-case spellings `bodyHTML` and
/// `sourceURL` are accepted too.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleInput {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub byline: Option<String>,
    #[serde(alias = "bodyHTML")]
    pub body_html: String,
    #[serde(default)]
    pub plain_text: String,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub site_name: Option<String>,
    #[serde(alias = "sourceURL")]
    pub source_url: String,
    #[serde(default = "Utc::now")]
    pub extracted_at: DateTime<Utc>,
}

impl ArticleInput {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        body_html: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            byline: None,
            body_html: body_html.into(),
            plain_text: String::new(),
            word_count: 0,
            excerpt: None,
            site_name: None,
            source_url: source_url.into(),
            extracted_at: Utc::now(),
        }
    }

    pub fn with_byline(mut self, byline: impl Into<String>) -> Self {
        self.byline = Some(byline.into());
        self
    }

    pub fn with_site_name(mut self, site_name: impl Into<String>) -> Self {
        self.site_name = Some(site_name.into());
        self
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }

    pub fn with_word_count(mut self, word_count: u64) -> Self {
        self.word_count = word_count;
        self
    }

    pub fn with_extracted_at(mut self, extracted_at: DateTime<Utc>) -> Self {
        self.extracted_at = extracted_at;
        self
    }

    /// Check the preconditions an export relies on.
    pub fn validate(&self) -> Result<()> {
        if self.body_html.trim().is_empty() {
            return Err(Error::EmptyBody);
        }
        if self.id.trim().is_empty() {
            return Err(Error::MissingIdentifier);
        }
        Ok(())
    }
}
