mod campaigns;
mod donations;
mod snapshots;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, info};
use serde::Serialize;

use crate::database::Database;
use crate::error::FundPulseError;
use crate::extract::CampaignRecord;

pub use campaigns::Campaign;
pub use donations::Donation;
pub use snapshots::Snapshot;

/// Ids written by one recorded extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedExtraction {
    pub campaign_id: i64,
    pub snapshot_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub campaigns: i64,
    pub active_campaigns: i64,
    pub snapshots: i64,
    pub donations: i64,
    pub total_raised: f64,
}

/// Persistence for campaigns and their snapshot history
pub struct SnapshotStore {
    db: Database,
    url_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SnapshotStore {
    pub fn new(db: Database) -> Self {
        SnapshotStore {
            db,
            url_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn url_lock(&self, url: &str) -> Arc<Mutex<()>> {
        let mut locks = self.url_locks.lock().unwrap();
        Arc::clone(locks.entry(url.to_string()).or_default())
    }

    /// Drop the map entry once no other recording of `url` holds or awaits it
    fn release_url_lock(&self, url: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.url_locks.lock().unwrap();
        // one reference in the map plus ours
        if Arc::strong_count(&lock) == 2 {
            locks.remove(url);
        }
    }

    pub fn upsert_campaign(&self, record: &CampaignRecord) -> Result<i64, FundPulseError> {
        let conn = self.db.conn()?;
        Campaign::upsert(&conn, record, chrono::Utc::now().timestamp())
    }

    /// Insert a snapshot plus one donation row per entry, in one transaction
    pub fn append_snapshot(&self, campaign_id: i64, record: &CampaignRecord) -> Result<i64, FundPulseError> {
        let conn = self.db.conn()?;
        Database::immediate_transaction(&conn, |c| {
            let snapshot_id = Snapshot::append(c, campaign_id, record)?;
            Donation::insert_all(c, campaign_id, &record.donations, record.extracted_at)?;
            Ok(snapshot_id)
        })
    }

    /// Upsert the campaign and append its snapshot atomically.
    /// Concurrent recordings of the same URL run one at a time.
    pub fn record_extraction(&self, record: &CampaignRecord) -> Result<RecordedExtraction, FundPulseError> {
        let lock = self.url_lock(&record.url);
        let result = {
            let _guard = lock.lock().unwrap();
            self.record_locked(record)
        };
        self.release_url_lock(&record.url, lock);
        let recorded = result?;

        debug!(
            "Recorded {} as campaign {} snapshot {}",
            record.url, recorded.campaign_id, recorded.snapshot_id
        );
        Ok(recorded)
    }

    fn record_locked(&self, record: &CampaignRecord) -> Result<RecordedExtraction, FundPulseError> {
        let conn = self.db.conn()?;
        let now = chrono::Utc::now().timestamp();
        Database::immediate_transaction(&conn, |c| {
            let campaign_id = Campaign::upsert(c, record, now)?;
            let snapshot_id = Snapshot::append(c, campaign_id, record)?;
            Donation::insert_all(c, campaign_id, &record.donations, record.extracted_at)?;
            Ok(RecordedExtraction {
                campaign_id,
                snapshot_id,
            })
        })
    }

    pub fn latest_snapshot(&self, campaign_id: i64) -> Result<Option<Snapshot>, FundPulseError> {
        let conn = self.db.conn()?;
        Snapshot::latest(&conn, campaign_id)
    }

    pub fn snapshot_history(&self, campaign_id: i64, limit: usize) -> Result<Vec<Snapshot>, FundPulseError> {
        let conn = self.db.conn()?;
        Snapshot::history(&conn, campaign_id, limit)
    }

    pub fn aggregate_total_raised(&self) -> Result<f64, FundPulseError> {
        let conn = self.db.conn()?;
        Snapshot::aggregate_total_raised(&conn)
    }

    pub fn get_campaign(&self, campaign_id: i64) -> Result<Option<Campaign>, FundPulseError> {
        let conn = self.db.conn()?;
        Campaign::get_by_id(&conn, campaign_id)
    }

    pub fn get_campaign_by_url(&self, url: &str) -> Result<Option<Campaign>, FundPulseError> {
        let conn = self.db.conn()?;
        Campaign::get_by_url(&conn, url)
    }

    pub fn list_campaigns(&self) -> Result<Vec<Campaign>, FundPulseError> {
        let conn = self.db.conn()?;
        Campaign::list(&conn)
    }

    pub fn active_campaign_urls(&self) -> Result<Vec<String>, FundPulseError> {
        let conn = self.db.conn()?;
        Campaign::active_urls(&conn)
    }

    pub fn set_campaign_active(&self, campaign_id: i64, active: bool) -> Result<bool, FundPulseError> {
        let conn = self.db.conn()?;
        let changed = Campaign::set_active(
            &conn,
            campaign_id,
            active,
            chrono::Utc::now().timestamp(),
        )?;
        if changed {
            info!("Campaign {} marked {}", campaign_id, if active { "active" } else { "inactive" });
        }
        Ok(changed)
    }

    pub fn remove_campaign(&self, campaign_id: i64) -> Result<bool, FundPulseError> {
        let conn = self.db.conn()?;
        let removed = Database::immediate_transaction(&conn, |c| Campaign::delete(c, campaign_id))?;
        if removed {
            info!("Removed campaign {} and its history", campaign_id);
        }
        Ok(removed)
    }

    pub fn donations_for(&self, campaign_id: i64) -> Result<Vec<Donation>, FundPulseError> {
        let conn = self.db.conn()?;
        Donation::for_campaign(&conn, campaign_id)
    }

    pub fn store_stats(&self) -> Result<StoreStats, FundPulseError> {
        let conn = self.db.conn()?;
        let (campaigns, active_campaigns, snapshots, donations): (i64, i64, i64, i64) = conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM campaigns),
                (SELECT COUNT(*) FROM campaigns WHERE is_active = 1),
                (SELECT COUNT(*) FROM snapshots),
                (SELECT COUNT(*) FROM donations)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        Ok(StoreStats {
            campaigns,
            active_campaigns,
            snapshots,
            donations,
            total_raised: Snapshot::aggregate_total_raised(&conn)?,
        })
    }
}
