use std::sync::Arc;

use log::{debug, warn};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::fetch::PageFetcher;
use super::selectors::*;
use super::{
    now_timestamp, CampaignRecord, DonationEntry, ExtractionFailure, RawFields, Strategy,
    StrategyKind, ANONYMOUS_DONOR,
};
use crate::normalize::{self, NOT_AVAILABLE};

struct StaticSelectors {
    title: Selector,
    description: Selector,
    progress: Selector,
    amount: Selector,
    goal: Selector,
    donation: Selector,
    donation_name: Selector,
    donation_amount: Selector,
    organizer: Selector,
    location: Selector,
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static SELECTORS: Lazy<StaticSelectors> = Lazy::new(|| StaticSelectors {
    title: selector(STATIC_TITLE),
    description: selector(STATIC_DESCRIPTION),
    progress: selector(STATIC_PROGRESS),
    amount: selector(STATIC_AMOUNT),
    goal: selector(STATIC_GOAL),
    donation: selector(STATIC_DONATION),
    donation_name: selector(DONATION_NAME),
    donation_amount: selector(STATIC_DONATION_AMOUNT),
    organizer: selector(STATIC_ORGANIZER),
    location: selector(STATIC_LOCATION),
});

/// Fetches server-rendered markup and reads it with CSS selectors
pub struct StaticStrategy {
    fetcher: Arc<dyn PageFetcher>,
}

impl StaticStrategy {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        StaticStrategy { fetcher }
    }
}

impl Strategy for StaticStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Static
    }

    fn extract(&self, url: &str) -> Result<CampaignRecord, ExtractionFailure> {
        let page = self.fetcher.fetch(url).map_err(|e| {
            warn!("Error fetching URL {}: {}", url, e);
            ExtractionFailure::transport(url, e)
        })?;

        if !page.is_success() {
            warn!("Fetching {} returned HTTP {}", url, page.status);
            return Err(ExtractionFailure::http_status(url, page.status));
        }

        Ok(parse_campaign_page(url, &page.body, now_timestamp()))
    }
}

fn element_text(element: ElementRef) -> String {
    normalize::clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

/// Read a campaign page's markup. Never fails: absent elements become placeholders.
pub fn parse_campaign_page(url: &str, html: &str, extracted_at: i64) -> CampaignRecord {
    let document = Html::parse_document(html);
    let sel = &*SELECTORS;

    let mut fields = RawFields {
        title: document.select(&sel.title).next().map(element_text),
        description_blocks: document.select(&sel.description).map(element_text).collect(),
        organizer: document.select(&sel.organizer).next().map(element_text),
        location: document.select(&sel.location).next().map(element_text),
        ..Default::default()
    };

    match document.select(&sel.progress).next() {
        Some(progress) => {
            fields.amount_raised = progress.select(&sel.amount).next().map(element_text);
            fields.goal_text = progress.select(&sel.goal).next().map(element_text);
        }
        None => debug!("No progress meter on {}", url),
    }

    fields.donations = document
        .select(&sel.donation)
        .map(|donor| {
            let name = donor
                .select(&sel.donation_name)
                .next()
                .map(element_text)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| ANONYMOUS_DONOR.to_string());
            let amount = donor
                .select(&sel.donation_amount)
                .next()
                .map(element_text)
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());
            DonationEntry { name, amount }
        })
        .collect();

    fields.into_record(url, StrategyKind::Static, extracted_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::fetch::fake::FakeFetcher;
    use crate::extract::{AmountField, FailureKind, DESCRIPTION_NOT_FOUND, TITLE_NOT_FOUND};
    use pretty_assertions::assert_eq;

    const URL: &str = "https://www.gofundme.com/f/help-the-dogs";

    fn campaign_page(donor_blocks: usize) -> String {
        let donors: String = (0..donor_blocks)
            .map(|i| {
                format!(
                    r#"<div class="hrt-avatar-lockup-content"><div>Donor {i}</div><span class="hrt-font-bold">${i}0</span></div>"#
                )
            })
            .collect();
        format!(
            r#"<html><body>
            <h1 class="p-campaign-title">Help Help the Dogs dogs</h1>
            <a class="campaign-byline_name">Jo Smith</a>
            <span class="campaign-location">Austin, TX</span>
            <div class="campaign-description_content__C1C_5">Every dog deserves a home.</div>
            <div class="campaign-description_content__C1C_5">Please share this page.</div>
            <div class="progress-meter_progressMeterHeading__A6Slt">
              <div class="hrt-disp-inline progress-meter_largeType__L_4O8">$12,345.67</div>
              <span class="hrt-text-body-sm hrt-text-gray">raised of $20,000 goal</span>
            </div>
            {donors}
            </body></html>"#
        )
    }

    #[test]
    fn test_parse_full_page() {
        let record = parse_campaign_page(URL, &campaign_page(2), 100);

        assert_eq!(record.title, "Help the Dogs");
        assert_eq!(
            record.description,
            "Every dog deserves a home. Please share this page."
        );
        assert_eq!(record.amount_raised.value, Some(12345.67));
        assert_eq!(record.goal_amount.raw, "$20,000");
        assert_eq!(record.goal_amount.value, Some(20000.0));
        assert_eq!(
            record.donations,
            vec![
                DonationEntry { name: "Donor 0".to_string(), amount: "$00".to_string() },
                DonationEntry { name: "Donor 1".to_string(), amount: "$10".to_string() },
            ]
        );
        assert_eq!(record.organizer.as_deref(), Some("Jo Smith"));
        assert_eq!(record.location.as_deref(), Some("Austin, TX"));
        assert_eq!(record.donor_count, None);
        assert_eq!(record.share_count, None);
        assert_eq!(record.url, URL);
        assert_eq!(record.extracted_at, 100);
        assert_eq!(record.strategy, StrategyKind::Static);
    }

    #[test]
    fn test_parse_empty_page_uses_placeholders() {
        let record = parse_campaign_page(URL, "<html><body><p>nothing</p></body></html>", 1);

        assert_eq!(record.title, TITLE_NOT_FOUND);
        assert_eq!(record.description, DESCRIPTION_NOT_FOUND);
        assert_eq!(record.amount_raised, AmountField::missing());
        assert_eq!(record.goal_amount, AmountField::missing());
        assert!(record.donations.is_empty());
    }

    #[test]
    fn test_donation_defaults() {
        let html = r#"<div class="hrt-avatar-lockup-content"><p>no name block</p></div>"#;
        let record = parse_campaign_page(URL, html, 1);
        assert_eq!(
            record.donations,
            vec![DonationEntry {
                name: ANONYMOUS_DONOR.to_string(),
                amount: NOT_AVAILABLE.to_string()
            }]
        );
    }

    #[test]
    fn test_donations_capped_at_ten() {
        let record = parse_campaign_page(URL, &campaign_page(14), 1);
        assert_eq!(record.donations.len(), 10);
        assert_eq!(record.donations[9].name, "Donor 9");
    }

    #[test]
    fn test_http_404_is_failure_with_url() {
        let fetcher = FakeFetcher::default().with_page(URL, 404, "gone");
        let strategy = StaticStrategy::new(Arc::new(fetcher));

        let failure = strategy.extract(URL).unwrap_err();
        assert_eq!(failure.url, URL);
        assert_eq!(failure.kind, FailureKind::HttpStatus(404));
    }

    #[test]
    fn test_transport_error_is_failure() {
        let strategy = StaticStrategy::new(Arc::new(FakeFetcher::default()));

        let failure = strategy.extract(URL).unwrap_err();
        assert_eq!(failure.kind, FailureKind::Transport);
        assert!(failure.cause.starts_with("Error fetching URL: "));
    }

    #[test]
    fn test_successful_fetch_is_parsed() {
        let fetcher = FakeFetcher::default().with_page(URL, 200, &campaign_page(1));
        let strategy = StaticStrategy::new(Arc::new(fetcher));

        let record = strategy.extract(URL).unwrap();
        assert_eq!(record.title, "Help the Dogs");
        assert_eq!(record.donations.len(), 1);
    }
}
