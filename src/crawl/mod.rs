//! Campaign discovery by bounded breadth-first crawl.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::config::CrawlConfig;
use crate::error::FundPulseError;
use crate::extract::PageFetcher;

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

/// Outcome of one crawl
#[derive(Debug, Default)]
pub struct CrawlReport {
    /// Normalized campaign URLs (`prefix + slug`)
    pub found: HashSet<String>,
    /// Pages actually fetched
    pub visited: usize,
    pub interrupted: bool,
}

impl CrawlReport {
    pub fn sorted_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.found.iter().cloned().collect();
        urls.sort();
        urls
    }
}

pub struct Crawler {
    fetcher: Arc<dyn PageFetcher>,
    campaign_url: Regex,
    embedded_url: Regex,
    max_pages: usize,
    harvest_embedded: bool,
}

impl Crawler {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: &CrawlConfig) -> Result<Self, FundPulseError> {
        let slug = r"[A-Za-z0-9_\-]+";
        let prefix = regex::escape(&config.campaign_prefix);
        let campaign_url = Regex::new(&format!("^{}{}", prefix, slug))
            .map_err(|e| FundPulseError::Error(format!("Invalid campaign prefix: {}", e)))?;
        let embedded_url = Regex::new(&format!("{}{}", prefix, slug))
            .map_err(|e| FundPulseError::Error(format!("Invalid campaign prefix: {}", e)))?;

        Ok(Crawler {
            fetcher,
            campaign_url,
            embedded_url,
            max_pages: config.max_pages,
            harvest_embedded: config.harvest_embedded,
        })
    }

    /// The canonical `prefix + slug` form of a campaign URL, if it is one
    pub fn normalize_campaign_url(&self, url: &str) -> Option<String> {
        self.campaign_url.find(url).map(|m| m.as_str().to_string())
    }

    /// Breadth-first crawl from one seed until `max_found` campaigns are known
    /// or the frontier runs dry
    pub fn discover(&self, seed: &str, max_found: usize, interrupt: &Arc<AtomicBool>) -> CrawlReport {
        let mut report = CrawlReport::default();
        let mut seen = HashSet::new();
        self.crawl_from(seed, max_found, interrupt, &mut seen, &mut report);
        report
    }

    /// Crawl several seeds in order against one shared budget and visited set
    pub fn discover_seeds(
        &self,
        seeds: &[String],
        max_found: usize,
        interrupt: &Arc<AtomicBool>,
    ) -> CrawlReport {
        let mut report = CrawlReport::default();
        let mut seen = HashSet::new();

        for seed in seeds {
            if report.found.len() >= max_found || report.interrupted {
                break;
            }
            self.crawl_from(seed, max_found, interrupt, &mut seen, &mut report);
        }

        info!(
            "Discovery over {} seed(s) found {} campaign(s) in {} page(s)",
            seeds.len(),
            report.found.len(),
            report.visited
        );
        report
    }

    fn crawl_from(
        &self,
        seed: &str,
        max_found: usize,
        interrupt: &Arc<AtomicBool>,
        seen: &mut HashSet<String>,
        report: &mut CrawlReport,
    ) {
        let mut frontier = VecDeque::new();
        let mut pages = 0;
        if seen.insert(seed.to_string()) {
            frontier.push_back(seed.to_string());
        }

        while let Some(page_url) = frontier.pop_front() {
            if report.found.len() >= max_found || pages >= self.max_pages {
                break;
            }
            if interrupt.load(Ordering::Acquire) {
                info!("Crawl from {} interrupted", seed);
                report.interrupted = true;
                break;
            }

            pages += 1;
            report.visited += 1;

            let page = match self.fetcher.fetch(&page_url) {
                Ok(page) => page,
                Err(e) => {
                    warn!("Crawl: error fetching {}: {}", page_url, e);
                    continue;
                }
            };
            if !page.is_success() {
                warn!("Crawl: {} returned HTTP {}", page_url, page.status);
                continue;
            }

            let (campaigns, links) = self.scan_page(&page_url, &page.body);
            debug!(
                "Crawl: {} yielded {} campaign link(s), {} page link(s)",
                page_url,
                campaigns.len(),
                links.len()
            );

            for campaign in campaigns {
                if report.found.len() >= max_found {
                    break;
                }
                report.found.insert(campaign);
            }

            for link in links {
                if seen.insert(link.clone()) {
                    frontier.push_back(link);
                }
            }
        }
    }

    /// Split a page into campaign URLs (in page order) and same-site links to follow
    fn scan_page(&self, page_url: &str, body: &str) -> (Vec<String>, Vec<String>) {
        let mut campaigns = Vec::new();
        let mut links = Vec::new();
        let base = Url::parse(page_url).ok();

        let document = Html::parse_document(body);
        for anchor in document.select(&ANCHOR) {
            let Some(href) = anchor.value().attr("href").map(str::trim) else {
                continue;
            };

            let is_relative_path = href.starts_with('/') && !href.starts_with("//");
            let absolute = if is_relative_path {
                match base.as_ref().and_then(|b| b.join(href).ok()) {
                    Some(url) => url.to_string(),
                    None => continue,
                }
            } else {
                href.to_string()
            };

            if let Some(campaign) = self.normalize_campaign_url(&absolute) {
                campaigns.push(campaign);
            } else if is_relative_path {
                links.push(absolute);
            }
        }

        if self.harvest_embedded {
            for m in self.embedded_url.find_iter(body) {
                let url = m.as_str().trim_end_matches(['\\', '"', '\'']);
                campaigns.push(url.to_string());
            }
        }

        (campaigns, links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::extract::fetch::fake::FakeFetcher;
    use pretty_assertions::assert_eq;

    const SITE: &str = "https://www.gofundme.com";

    fn crawler(fetcher: Arc<FakeFetcher>, harvest: bool) -> Crawler {
        let mut config = Config::default().crawl;
        config.harvest_embedded = harvest;
        Crawler::new(fetcher, &config).unwrap()
    }

    fn no_interrupt() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    fn page(links: &[&str]) -> String {
        let anchors: String = links
            .iter()
            .map(|l| format!(r#"<a href="{}">link</a>"#, l))
            .collect();
        format!("<html><body>{}</body></html>", anchors)
    }

    fn site_fetcher() -> FakeFetcher {
        FakeFetcher::default()
            .with_page(
                &format!("{}/discover", SITE),
                200,
                &page(&[
                    "https://www.gofundme.com/f/alpha?utm=1",
                    "/f/beta",
                    "/discover/medical",
                    "/discover/medical",
                    "//cdn.example.com/script.js",
                    "https://elsewhere.org/page",
                    "mailto:help@example.com",
                ]),
            )
            .with_page(
                &format!("{}/discover/medical", SITE),
                200,
                &page(&["https://www.gofundme.com/f/gamma#story", "/discover", "/broken"]),
            )
            .with_page(&format!("{}/broken", SITE), 500, "oops")
    }

    #[test]
    fn test_bfs_collects_normalized_campaigns() {
        let fetcher = Arc::new(site_fetcher());
        let report = crawler(Arc::clone(&fetcher), false).discover(
            &format!("{}/discover", SITE),
            100,
            &no_interrupt(),
        );

        assert_eq!(
            report.sorted_urls(),
            vec![
                "https://www.gofundme.com/f/alpha".to_string(),
                "https://www.gofundme.com/f/beta".to_string(),
                "https://www.gofundme.com/f/gamma".to_string(),
            ]
        );
        // discover, medical, broken: each fetched once
        assert_eq!(report.visited, 3);
        assert_eq!(fetcher.request_count(), 3);
        let requests = fetcher.requests.lock().unwrap().clone();
        let unique: HashSet<_> = requests.iter().collect();
        assert_eq!(unique.len(), requests.len());
    }

    #[test]
    fn test_stops_at_max_found() {
        let fetcher = Arc::new(site_fetcher());
        let report = crawler(Arc::clone(&fetcher), false).discover(
            &format!("{}/discover", SITE),
            1,
            &no_interrupt(),
        );
        assert_eq!(report.found.len(), 1);
        assert_eq!(fetcher.request_count(), 1);
    }

    #[test]
    fn test_unreachable_seed_yields_empty_report() {
        let report = crawler(Arc::new(FakeFetcher::default()), false).discover(
            "https://www.gofundme.com/nowhere",
            10,
            &no_interrupt(),
        );
        assert!(report.found.is_empty());
        assert_eq!(report.visited, 1);
    }

    #[test]
    fn test_interrupt_stops_before_fetching() {
        let fetcher = Arc::new(site_fetcher());
        let interrupt = Arc::new(AtomicBool::new(true));
        let report = crawler(Arc::clone(&fetcher), false).discover(
            &format!("{}/discover", SITE),
            10,
            &interrupt,
        );
        assert!(report.interrupted);
        assert_eq!(fetcher.request_count(), 0);
    }

    #[test]
    fn test_harvests_embedded_urls() {
        let body = r#"<script>{"url":"https:\/\/x","next":"https://www.gofundme.com/f/delta-fund\\","other":'https://www.gofundme.com/f/echo_2'}</script>"#;
        let fetcher = Arc::new(FakeFetcher::default().with_page(&format!("{}/discover", SITE), 200, body));
        let report = crawler(fetcher, true).discover(&format!("{}/discover", SITE), 10, &no_interrupt());
        assert_eq!(
            report.sorted_urls(),
            vec![
                "https://www.gofundme.com/f/delta-fund".to_string(),
                "https://www.gofundme.com/f/echo_2".to_string(),
            ]
        );
    }

    #[test]
    fn test_seed_list_shares_budget() {
        let fetcher = Arc::new(
            FakeFetcher::default()
                .with_page("https://www.gofundme.com/a", 200, &page(&["/f/one", "/f/two"]))
                .with_page("https://www.gofundme.com/b", 200, &page(&["/f/three", "/f/four"]))
                .with_page("https://www.gofundme.com/c", 200, &page(&["/f/five"])),
        );
        let seeds = vec![
            "https://www.gofundme.com/a".to_string(),
            "https://www.gofundme.com/b".to_string(),
            "https://www.gofundme.com/c".to_string(),
        ];
        let report = crawler(Arc::clone(&fetcher), false).discover_seeds(&seeds, 3, &no_interrupt());

        assert_eq!(report.found.len(), 3);
        // third seed never fetched once the budget is spent
        assert_eq!(fetcher.request_count(), 2);
    }

    #[test]
    fn test_normalize_campaign_url() {
        let crawler = crawler(Arc::new(FakeFetcher::default()), false);
        assert_eq!(
            crawler.normalize_campaign_url("https://www.gofundme.com/f/save-the-farm?ref=home"),
            Some("https://www.gofundme.com/f/save-the-farm".to_string())
        );
        assert_eq!(crawler.normalize_campaign_url("https://www.gofundme.com/c/medical"), None);
        assert_eq!(crawler.normalize_campaign_url("https://evil.com/https://www.gofundme.com/f/x"), None);
    }
}
