//! Campaign extraction.
//!
//! Two strategies produce the same [`CampaignRecord`] shape:
//! - [`StaticStrategy`] fetches markup over HTTP and reads it with CSS selectors
//! - [`RenderedStrategy`] drives a headless browser and reads the live DOM
//!
//! Callers pick a strategy explicitly; there is no automatic fallback because
//! the two see different fields (only the rendered DOM exposes donor and
//! share counters).

pub(crate) mod fetch;
pub(crate) mod rendered;
mod selectors;
mod static_markup;
mod webdriver;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::normalize::{self, NOT_AVAILABLE};

pub use fetch::{HttpFetcher, PageFetcher};
pub use rendered::{RenderError, RenderedStrategy};
pub use static_markup::StaticStrategy;
pub use webdriver::WebDriverRenderer;

/// Hard cap on donations kept from one page
pub const MAX_DONATIONS: usize = 10;

pub const TITLE_NOT_FOUND: &str = "Title not found";
pub const DESCRIPTION_NOT_FOUND: &str = "Description not found";
pub const ANONYMOUS_DONOR: &str = "Anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StrategyKind {
    Static,
    Rendered,
}

/// A displayed amount: the text as the page showed it plus its parsed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountField {
    pub raw: String,
    pub value: Option<f64>,
}

impl AmountField {
    pub fn from_raw(raw: &str) -> Self {
        let raw = normalize::clean_text(raw);
        let value = normalize::parse_amount(&raw);
        AmountField { raw, value }
    }

    pub fn missing() -> Self {
        AmountField {
            raw: NOT_AVAILABLE.to_string(),
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationEntry {
    pub name: String,
    pub amount: String,
}

impl DonationEntry {
    pub fn amount_value(&self) -> Option<f64> {
        normalize::parse_amount(&self.amount)
    }
}

/// Normalized result of one extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub title: String,
    pub description: String,
    pub short_description: String,
    pub amount_raised: AmountField,
    pub goal_amount: AmountField,
    pub donations: Vec<DonationEntry>,
    pub donor_count: Option<i64>,
    pub share_count: Option<i64>,
    pub organizer: Option<String>,
    pub location: Option<String>,
    pub url: String,
    /// Unix timestamp (UTC)
    pub extracted_at: i64,
    pub strategy: StrategyKind,
}

/// What a strategy managed to read off a page, before placeholders are applied.
/// Every field is optional on its own; a missing element never aborts extraction.
#[derive(Debug, Default)]
pub(crate) struct RawFields {
    pub title: Option<String>,
    pub description_blocks: Vec<String>,
    pub amount_raised: Option<String>,
    pub goal_text: Option<String>,
    pub donations: Vec<DonationEntry>,
    pub donor_count: Option<i64>,
    pub share_count: Option<i64>,
    pub organizer: Option<String>,
    pub location: Option<String>,
}

impl RawFields {
    pub fn into_record(self, url: &str, strategy: StrategyKind, extracted_at: i64) -> CampaignRecord {
        let title = self
            .title
            .map(|t| normalize::dedupe_words(&t))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| TITLE_NOT_FOUND.to_string());

        let joined = self
            .description_blocks
            .iter()
            .map(|block| block.trim())
            .filter(|block| !block.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let description = match normalize::dedupe_words(&joined) {
            d if d.is_empty() => DESCRIPTION_NOT_FOUND.to_string(),
            d => d,
        };

        let amount_raised = self
            .amount_raised
            .filter(|a| !a.trim().is_empty())
            .map(|a| AmountField::from_raw(&a))
            .unwrap_or_else(AmountField::missing);

        let goal_amount = self
            .goal_text
            .as_deref()
            .and_then(normalize::first_currency_amount)
            .map(|g| AmountField::from_raw(&g))
            .unwrap_or_else(AmountField::missing);

        let mut donations = self.donations;
        donations.truncate(MAX_DONATIONS);

        CampaignRecord {
            title,
            short_description: normalize::short_description(&description),
            description,
            amount_raised,
            goal_amount,
            donations,
            donor_count: self.donor_count,
            share_count: self.share_count,
            organizer: non_empty(self.organizer),
            location: non_empty(self.location),
            url: url.to_string(),
            extracted_at,
            strategy,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| normalize::clean_text(&v))
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    Transport,
    HttpStatus(u16),
    RenderTimeout,
    Render,
}

/// Per-URL extraction failure. Carried as data through batches, never panics.
#[derive(Error, Debug, Clone, Serialize)]
#[error("{url}: {cause}")]
pub struct ExtractionFailure {
    pub url: String,
    pub kind: FailureKind,
    pub cause: String,
}

impl ExtractionFailure {
    pub fn transport(url: &str, detail: impl std::fmt::Display) -> Self {
        ExtractionFailure {
            url: url.to_string(),
            kind: FailureKind::Transport,
            cause: format!("Error fetching URL: {}", detail),
        }
    }

    pub fn http_status(url: &str, status: u16) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown status");
        ExtractionFailure {
            url: url.to_string(),
            kind: FailureKind::HttpStatus(status),
            cause: format!("HTTP {} {}", status, reason),
        }
    }

    pub fn render(url: &str, err: &RenderError) -> Self {
        let kind = match err {
            RenderError::Timeout(_) => FailureKind::RenderTimeout,
            RenderError::Protocol(_) => FailureKind::Render,
        };
        ExtractionFailure {
            url: url.to_string(),
            kind,
            cause: format!("Render error: {}", err),
        }
    }
}

/// One way of turning a campaign URL into a [`CampaignRecord`]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn extract(&self, url: &str) -> Result<CampaignRecord, ExtractionFailure>;
}

/// Both strategies behind one entry point
#[derive(Clone)]
pub struct Extractor {
    static_strategy: Arc<dyn Strategy>,
    rendered_strategy: Arc<dyn Strategy>,
}

impl Extractor {
    pub fn new(static_strategy: Arc<dyn Strategy>, rendered_strategy: Arc<dyn Strategy>) -> Self {
        Extractor {
            static_strategy,
            rendered_strategy,
        }
    }

    pub fn strategy(&self, kind: StrategyKind) -> Arc<dyn Strategy> {
        match kind {
            StrategyKind::Static => Arc::clone(&self.static_strategy),
            StrategyKind::Rendered => Arc::clone(&self.rendered_strategy),
        }
    }

    pub fn extract(&self, url: &str, kind: StrategyKind) -> Result<CampaignRecord, ExtractionFailure> {
        self.strategy(kind).extract(url)
    }
}

pub(crate) fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_fields_get_placeholders() {
        let record = RawFields::default().into_record("https://x/f/a", StrategyKind::Static, 42);

        assert_eq!(record.title, TITLE_NOT_FOUND);
        assert_eq!(record.description, DESCRIPTION_NOT_FOUND);
        assert_eq!(record.amount_raised, AmountField::missing());
        assert_eq!(record.goal_amount, AmountField::missing());
        assert!(record.donations.is_empty());
        assert_eq!(record.donor_count, None);
        assert_eq!(record.organizer, None);
        assert_eq!(record.extracted_at, 42);
    }

    #[test]
    fn test_fields_are_normalized() {
        let fields = RawFields {
            title: Some("  Help Help the Dogs dogs ".to_string()),
            description_blocks: vec!["First block".to_string(), "  ".to_string(), "second Block".to_string()],
            amount_raised: Some(" $12,345.67 ".to_string()),
            goal_text: Some("raised of $20,000 goal".to_string()),
            organizer: Some("  Jo   Smith ".to_string()),
            location: Some("   ".to_string()),
            ..Default::default()
        };
        let record = fields.into_record("https://x/f/a", StrategyKind::Rendered, 1);

        assert_eq!(record.title, "Help the Dogs");
        assert_eq!(record.description, "First block second");
        assert_eq!(record.short_description, "First block second");
        assert_eq!(record.amount_raised.raw, "$12,345.67");
        assert_eq!(record.amount_raised.value, Some(12345.67));
        assert_eq!(record.goal_amount.raw, "$20,000");
        assert_eq!(record.goal_amount.value, Some(20000.0));
        assert_eq!(record.organizer.as_deref(), Some("Jo Smith"));
        assert_eq!(record.location, None);
        assert_eq!(record.strategy, StrategyKind::Rendered);
    }

    #[test]
    fn test_donations_are_capped() {
        let fields = RawFields {
            donations: (0..25)
                .map(|i| DonationEntry {
                    name: format!("Donor {}", i),
                    amount: format!("${}", i),
                })
                .collect(),
            ..Default::default()
        };
        let record = fields.into_record("https://x/f/a", StrategyKind::Static, 1);
        assert_eq!(record.donations.len(), MAX_DONATIONS);
        assert_eq!(record.donations[0].name, "Donor 0");
        assert_eq!(record.donations[9].name, "Donor 9");
    }

    #[test]
    fn test_failure_causes() {
        let f = ExtractionFailure::http_status("https://x/f/a", 404);
        assert_eq!(f.kind, FailureKind::HttpStatus(404));
        assert_eq!(f.url, "https://x/f/a");
        assert_eq!(f.cause, "HTTP 404 Not Found");

        let f = ExtractionFailure::render(
            "https://x/f/a",
            &RenderError::Timeout("waiting for 'h1'".to_string()),
        );
        assert_eq!(f.kind, FailureKind::RenderTimeout);
        assert!(f.cause.starts_with("Render error: "));
    }

    #[test]
    fn test_strategy_kind_strings() {
        assert_eq!(StrategyKind::Static.to_string(), "static");
        assert_eq!("RENDERED".parse::<StrategyKind>().unwrap(), StrategyKind::Rendered);
        assert!("other".parse::<StrategyKind>().is_err());
    }
}
