use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded};
use log::{error, info, warn, Level};
use logging_timer::timer;
use threadpool::ThreadPool;

use crate::config::Config;
use crate::crawl::{CrawlReport, Crawler};
use crate::database::Database;
use crate::error::FundPulseError;
use crate::extract::{
    CampaignRecord, ExtractionFailure, Extractor, HttpFetcher, PageFetcher, RenderedStrategy,
    StaticStrategy, StrategyKind, WebDriverRenderer,
};
use crate::schedule::{ScheduledTask, TaskRun, TaskType};
use crate::store::SnapshotStore;

/// Result of extracting a list of URLs. Per-URL failures are data, not errors.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Successful extractions, in input order
    pub records: Vec<CampaignRecord>,
    pub failures: Vec<ExtractionFailure>,
    /// URLs extracted fine but not persisted, with the storage error
    pub persist_errors: Vec<(String, String)>,
    pub interrupted: bool,
}

impl BatchOutcome {
    pub fn url_count(&self) -> usize {
        self.records.len() + self.failures.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len() + self.persist_errors.len()
    }

    pub fn succeeded_count(&self) -> usize {
        self.records.len().saturating_sub(self.persist_errors.len())
    }
}

enum UrlOutcome {
    Recorded(CampaignRecord),
    Unsaved(CampaignRecord, String),
    Failed(ExtractionFailure),
    Skipped,
}

/// Wires extraction, discovery and storage into the operations tasks run
pub struct Pipeline {
    store: Arc<SnapshotStore>,
    crawler: Crawler,
    extractor: Extractor,
    workers: usize,
    seeds: Vec<String>,
    discover_max: usize,
}

impl Pipeline {
    pub fn new(
        store: Arc<SnapshotStore>,
        crawler: Crawler,
        extractor: Extractor,
        config: &Config,
    ) -> Self {
        Pipeline {
            store,
            crawler,
            extractor,
            workers: config.fetch.workers,
            seeds: config.crawl.seeds.clone(),
            discover_max: config.crawl.discover_max,
        }
    }

    /// Build the production pipeline: HTTP fetching, WebDriver rendering, SQLite storage
    pub fn from_config(config: &Config, db: Database) -> Result<Self, FundPulseError> {
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config.fetch)?);
        let renderer = Arc::new(WebDriverRenderer::new(&config.render, &config.fetch)?);

        let extractor = Extractor::new(
            Arc::new(StaticStrategy::new(Arc::clone(&fetcher))),
            Arc::new(RenderedStrategy::new(renderer, &config.render)),
        );
        let crawler = Crawler::new(fetcher, &config.crawl)?;

        Ok(Pipeline::new(
            Arc::new(SnapshotStore::new(db)),
            crawler,
            extractor,
            config,
        ))
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    pub fn discover(&self, seeds: &[String], max_found: usize, interrupt: &Arc<AtomicBool>) -> CrawlReport {
        self.crawler.discover_seeds(seeds, max_found, interrupt)
    }

    /// Extract every URL on the worker pool, recording successes when `save` is set.
    /// Duplicate URLs are extracted once.
    pub fn extract_batch(
        &self,
        urls: &[String],
        kind: StrategyKind,
        save: bool,
        interrupt: &Arc<AtomicBool>,
    ) -> BatchOutcome {
        let _tmr = timer!(Level::Trace; "Pipeline::extract_batch", "{} url(s)", urls.len());

        let mut seen = HashSet::new();
        let urls: Vec<&String> = urls.iter().filter(|url| seen.insert(url.as_str())).collect();

        let mut outcome = BatchOutcome::default();
        if urls.is_empty() {
            return outcome;
        }

        let thread_count = self.workers.min(urls.len()).max(1);
        let pool = ThreadPool::new(thread_count);
        let (url_sender, url_receiver) = bounded::<(usize, String)>(thread_count * 2);
        let (result_sender, result_receiver) = unbounded::<(usize, UrlOutcome)>();

        for _ in 0..thread_count {
            let url_receiver = url_receiver.clone();
            let result_sender = result_sender.clone();
            let strategy = self.extractor.strategy(kind);
            let store = Arc::clone(&self.store);
            let interrupt = Arc::clone(interrupt);

            pool.execute(move || {
                while let Ok((index, url)) = url_receiver.recv() {
                    let url_outcome = if interrupt.load(Ordering::Acquire) {
                        UrlOutcome::Skipped
                    } else {
                        match strategy.extract(&url) {
                            Ok(record) if save => match store.record_extraction(&record) {
                                Ok(_) => UrlOutcome::Recorded(record),
                                Err(e) => {
                                    error!("Failed to store {}: {}", url, e);
                                    UrlOutcome::Unsaved(record, e.to_string())
                                }
                            },
                            Ok(record) => UrlOutcome::Recorded(record),
                            Err(failure) => UrlOutcome::Failed(failure),
                        }
                    };
                    if result_sender.send((index, url_outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_sender);

        for (index, url) in urls.iter().enumerate() {
            // blocks while the queue is full
            if url_sender.send((index, url.to_string())).is_err() {
                warn!("Extraction workers stopped early");
                break;
            }
        }
        drop(url_sender);
        pool.join();

        let mut results: Vec<(usize, UrlOutcome)> = result_receiver.iter().collect();
        results.sort_by_key(|(index, _)| *index);

        for (_, url_outcome) in results {
            match url_outcome {
                UrlOutcome::Recorded(record) => outcome.records.push(record),
                UrlOutcome::Unsaved(record, err) => {
                    outcome.persist_errors.push((record.url.clone(), err));
                    outcome.records.push(record);
                }
                UrlOutcome::Failed(failure) => outcome.failures.push(failure),
                UrlOutcome::Skipped => outcome.interrupted = true,
            }
        }

        info!(
            "Batch of {} url(s): {} extracted, {} failed",
            urls.len(),
            outcome.records.len(),
            outcome.failures.len()
        );
        outcome
    }

    /// Re-extract every active campaign in the store
    pub fn track_all(
        &self,
        kind: StrategyKind,
        interrupt: &Arc<AtomicBool>,
    ) -> Result<BatchOutcome, FundPulseError> {
        let urls = self.store.active_campaign_urls()?;
        Ok(self.extract_batch(&urls, kind, true, interrupt))
    }

    /// Execute a scheduled task once.
    ///
    /// Returns `Ok(None)` when the task no longer exists or is inactive.
    /// `last_run` is stamped whenever the batch itself ran, however many of
    /// its URLs failed. Every execution leaves a `task_runs` row.
    pub fn run_scheduled_scrape(
        &self,
        task_id: i64,
        interrupt: &Arc<AtomicBool>,
    ) -> Result<Option<BatchOutcome>, FundPulseError> {
        let _tmr = timer!(Level::Trace; "Pipeline::run_scheduled_scrape", "task {}", task_id);

        let db = self.store.database();
        let stored = {
            let conn = db.conn()?;
            ScheduledTask::get_by_id(&conn, task_id)?
        };
        let task = match stored {
            Some(task) if task.is_active => task,
            Some(task) => {
                info!("Skipping inactive task '{}' ({})", task.name, task_id);
                return Ok(None);
            }
            None => {
                warn!("Scheduled task {} no longer exists", task_id);
                return Ok(None);
            }
        };

        info!("Running scheduled task: {}", task.name);
        let started_at = chrono::Utc::now().timestamp();

        let batch = self.run_task_batch(&task, interrupt);
        let finished_at = chrono::Utc::now().timestamp();
        let conn = db.conn()?;

        match batch {
            Ok(outcome) => {
                ScheduledTask::stamp_last_run(&conn, task_id, finished_at)?;
                let first_error = outcome.failures.first().map(|f| f.to_string());
                TaskRun::record(
                    &conn,
                    task_id,
                    started_at,
                    finished_at,
                    outcome.url_count(),
                    outcome.succeeded_count(),
                    outcome.failed_count(),
                    first_error.as_deref(),
                )?;
                info!(
                    "Task {} completed: {} succeeded, {} failed",
                    task.name,
                    outcome.succeeded_count(),
                    outcome.failed_count()
                );
                Ok(Some(outcome))
            }
            Err(e) => {
                error!("Task {} failed: {}", task.name, e);
                TaskRun::record(&conn, task_id, started_at, finished_at, 0, 0, 0, Some(&e.to_string()))?;
                Err(e)
            }
        }
    }

    fn run_task_batch(
        &self,
        task: &ScheduledTask,
        interrupt: &Arc<AtomicBool>,
    ) -> Result<BatchOutcome, FundPulseError> {
        match task.task_type {
            TaskType::Scrape => Ok(self.extract_batch(&task.urls, task.strategy, true, interrupt)),
            TaskType::DiscoverAndScrape => {
                // a task's own URL list, when present, replaces the configured seeds
                let seeds = if task.urls.is_empty() {
                    &self.seeds
                } else {
                    &task.urls
                };
                let report = self.discover(seeds, self.discover_max, interrupt);
                if report.interrupted {
                    return Err(FundPulseError::Interrupted);
                }
                Ok(self.extract_batch(&report.sorted_urls(), task.strategy, true, interrupt))
            }
            TaskType::TrackAll => self.track_all(task.strategy, interrupt),
        }
    }
}
