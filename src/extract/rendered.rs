use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;

use super::selectors::*;
use super::{
    now_timestamp, CampaignRecord, DonationEntry, ExtractionFailure, RawFields, Strategy,
    StrategyKind, ANONYMOUS_DONOR, MAX_DONATIONS,
};
use crate::config::RenderConfig;
use crate::normalize::{self, NOT_AVAILABLE};

#[derive(Error, Debug, Clone)]
pub enum RenderError {
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("{0}")]
    Protocol(String),
}

/// Opaque handle to an element in a live DOM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementId(pub String);

/// One isolated browser context. Sessions are not shared between extractions.
pub trait BrowserSession: Send {
    fn navigate(&self, url: &str, timeout: Duration) -> Result<(), RenderError>;

    /// Block until `css` matches, or fail with [`RenderError::Timeout`]
    fn wait_for_selector(&self, css: &str, timeout: Duration) -> Result<ElementId, RenderError>;

    fn query_selector(&self, css: &str) -> Result<Option<ElementId>, RenderError>;

    fn query_selector_all(&self, css: &str) -> Result<Vec<ElementId>, RenderError>;

    fn query_child(&self, parent: &ElementId, css: &str) -> Result<Option<ElementId>, RenderError>;

    fn inner_text(&self, element: &ElementId) -> Result<String, RenderError>;

    fn close(&self) -> Result<(), RenderError>;
}

/// Factory for browser sessions
pub trait Renderer: Send + Sync {
    fn open_session(&self) -> Result<Box<dyn BrowserSession>, RenderError>;
}

/// Closes the wrapped session when dropped, whichever way extraction exits
struct SessionGuard(Box<dyn BrowserSession>);

impl Deref for SessionGuard {
    type Target = dyn BrowserSession;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.close() {
            warn!("Failed to close browser session: {}", e);
        }
    }
}

/// Drives a headless browser and reads the live DOM
pub struct RenderedStrategy {
    renderer: Arc<dyn Renderer>,
    navigation_timeout: Duration,
    ready_timeout: Duration,
}

impl RenderedStrategy {
    pub fn new(renderer: Arc<dyn Renderer>, config: &RenderConfig) -> Self {
        RenderedStrategy {
            renderer,
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            ready_timeout: Duration::from_secs(config.ready_timeout_secs),
        }
    }

    fn read_page(&self, session: &dyn BrowserSession, url: &str) -> Result<RawFields, RenderError> {
        session.navigate(url, self.navigation_timeout)?;
        session.wait_for_selector(RENDERED_READY, self.ready_timeout)?;

        let mut description_blocks = Vec::new();
        for element in session.query_selector_all(RENDERED_DESCRIPTION)? {
            description_blocks.push(session.inner_text(&element)?);
        }

        let mut donations = Vec::new();
        let donors = session.query_selector_all(RENDERED_DONATION)?;
        for donor in donors.iter().take(MAX_DONATIONS) {
            let name = child_text(session, donor, DONATION_NAME)?
                .unwrap_or_else(|| ANONYMOUS_DONOR.to_string());
            let amount = child_text(session, donor, RENDERED_DONATION_AMOUNT)?
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());
            donations.push(DonationEntry { name, amount });
        }

        Ok(RawFields {
            title: first_text(session, RENDERED_TITLE)?,
            description_blocks,
            amount_raised: first_text(session, RENDERED_AMOUNT)?,
            goal_text: first_text(session, RENDERED_GOAL)?,
            donations,
            donor_count: first_text(session, RENDERED_DONOR_COUNT)?
                .as_deref()
                .and_then(normalize::parse_count),
            share_count: first_text(session, RENDERED_SHARE_COUNT)?
                .as_deref()
                .and_then(normalize::parse_count),
            organizer: first_text(session, RENDERED_ORGANIZER)?,
            location: first_text(session, RENDERED_LOCATION)?,
        })
    }
}

fn first_text(session: &dyn BrowserSession, css: &str) -> Result<Option<String>, RenderError> {
    match session.query_selector(css)? {
        Some(element) => Ok(Some(normalize::clean_text(&session.inner_text(&element)?))),
        None => Ok(None),
    }
}

fn child_text(
    session: &dyn BrowserSession,
    parent: &ElementId,
    css: &str,
) -> Result<Option<String>, RenderError> {
    match session.query_child(parent, css)? {
        Some(element) => {
            let text = normalize::clean_text(&session.inner_text(&element)?);
            Ok(Some(text).filter(|t| !t.is_empty()))
        }
        None => Ok(None),
    }
}

impl Strategy for RenderedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rendered
    }

    fn extract(&self, url: &str) -> Result<CampaignRecord, ExtractionFailure> {
        let session = self.renderer.open_session().map_err(|e| {
            warn!("Could not open browser session for {}: {}", url, e);
            ExtractionFailure::render(url, &e)
        })?;
        let session = SessionGuard(session);

        let fields = self.read_page(&*session, url).map_err(|e| {
            warn!("Render error on {}: {}", url, e);
            ExtractionFailure::render(url, &e)
        })?;

        debug!("Rendered {} ({} donations)", url, fields.donations.len());
        Ok(fields.into_record(url, StrategyKind::Rendered, now_timestamp()))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// A canned DOM: selector -> texts for top-level queries, and
    /// (parent index, selector) -> text for child queries
    #[derive(Default, Clone)]
    pub struct FakeDom {
        pub ready: bool,
        pub navigate_error: Option<String>,
        pub elements: HashMap<String, Vec<String>>,
        pub children: HashMap<(String, String), String>,
    }

    pub struct FakeSession {
        dom: FakeDom,
        closes: Arc<AtomicUsize>,
        child_queries: Arc<AtomicUsize>,
    }

    impl BrowserSession for FakeSession {
        fn navigate(&self, _url: &str, _timeout: Duration) -> Result<(), RenderError> {
            match &self.dom.navigate_error {
                Some(msg) => Err(RenderError::Protocol(msg.clone())),
                None => Ok(()),
            }
        }

        fn wait_for_selector(&self, css: &str, _timeout: Duration) -> Result<ElementId, RenderError> {
            if self.dom.ready {
                Ok(ElementId(format!("{}#0", css)))
            } else {
                Err(RenderError::Timeout(format!("waiting for '{}'", css)))
            }
        }

        fn query_selector(&self, css: &str) -> Result<Option<ElementId>, RenderError> {
            Ok(self.query_selector_all(css)?.into_iter().next())
        }

        fn query_selector_all(&self, css: &str) -> Result<Vec<ElementId>, RenderError> {
            let count = self.dom.elements.get(css).map(|v| v.len()).unwrap_or(0);
            Ok((0..count).map(|i| ElementId(format!("{}#{}", css, i))).collect())
        }

        fn query_child(&self, parent: &ElementId, css: &str) -> Result<Option<ElementId>, RenderError> {
            self.child_queries.fetch_add(1, Ordering::SeqCst);
            let key = (parent.0.clone(), css.to_string());
            Ok(self
                .dom
                .children
                .contains_key(&key)
                .then(|| ElementId(format!("{}>{}", parent.0, css))))
        }

        fn inner_text(&self, element: &ElementId) -> Result<String, RenderError> {
            if let Some((parent, css)) = element.0.split_once('>') {
                let key = (parent.to_string(), css.to_string());
                return Ok(self.dom.children.get(&key).cloned().unwrap_or_default());
            }
            let (css, index) = element
                .0
                .rsplit_once('#')
                .ok_or_else(|| RenderError::Protocol("stale element".to_string()))?;
            let index: usize = index
                .parse()
                .map_err(|_| RenderError::Protocol("stale element".to_string()))?;
            Ok(self
                .dom
                .elements
                .get(css)
                .and_then(|texts| texts.get(index))
                .cloned()
                .unwrap_or_default())
        }

        fn close(&self) -> Result<(), RenderError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeRenderer {
        pub dom: Mutex<FakeDom>,
        pub opened: AtomicUsize,
        pub closes: Arc<AtomicUsize>,
        pub child_queries: Arc<AtomicUsize>,
    }

    impl FakeRenderer {
        pub fn new(dom: FakeDom) -> Self {
            FakeRenderer {
                dom: Mutex::new(dom),
                ..Default::default()
            }
        }

        pub fn open_count(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        pub fn close_count(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        pub fn child_query_count(&self) -> usize {
            self.child_queries.load(Ordering::SeqCst)
        }
    }

    impl Renderer for FakeRenderer {
        fn open_session(&self) -> Result<Box<dyn BrowserSession>, RenderError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                dom: self.dom.lock().unwrap().clone(),
                closes: Arc::clone(&self.closes),
                child_queries: Arc::clone(&self.child_queries),
            }))
        }
    }
}
