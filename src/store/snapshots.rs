use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::FundPulseError;
use crate::extract::{CampaignRecord, StrategyKind};

/// One observation of a campaign's funding state. Never updated after insert.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub snapshot_id: i64,
    pub campaign_id: i64,
    pub amount_raised: Option<f64>,
    pub donor_count: Option<i64>,
    pub share_count: Option<i64>,
    pub strategy: StrategyKind,
    pub scraped_at: i64,
}

const SNAPSHOT_COLUMNS: &str =
    "snapshot_id, campaign_id, amount_raised, donor_count, share_count, strategy, scraped_at";

impl Snapshot {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let strategy: String = row.get(5)?;
        let strategy = strategy
            .parse::<StrategyKind>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

        Ok(Snapshot {
            snapshot_id: row.get(0)?,
            campaign_id: row.get(1)?,
            amount_raised: row.get(2)?,
            donor_count: row.get(3)?,
            share_count: row.get(4)?,
            strategy,
            scraped_at: row.get(6)?,
        })
    }

    pub fn append(conn: &Connection, campaign_id: i64, record: &CampaignRecord) -> Result<i64, FundPulseError> {
        conn.execute(
            "INSERT INTO snapshots (campaign_id, amount_raised, donor_count, share_count, strategy, scraped_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                campaign_id,
                record.amount_raised.value,
                record.donor_count,
                record.share_count,
                record.strategy.to_string(),
                record.extracted_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent snapshot by scrape time; insertion order breaks ties
    pub fn latest(conn: &Connection, campaign_id: i64) -> Result<Option<Self>, FundPulseError> {
        conn.query_row(
            &format!(
                "SELECT {} FROM snapshots WHERE campaign_id = ?
                 ORDER BY scraped_at DESC, snapshot_id DESC LIMIT 1",
                SNAPSHOT_COLUMNS
            ),
            [campaign_id],
            Snapshot::from_row,
        )
        .optional()
        .map_err(FundPulseError::DatabaseError)
    }

    /// Newest first
    pub fn history(conn: &Connection, campaign_id: i64, limit: usize) -> Result<Vec<Self>, FundPulseError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM snapshots WHERE campaign_id = ?
             ORDER BY scraped_at DESC, snapshot_id DESC LIMIT ?",
            SNAPSHOT_COLUMNS
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let snapshots = stmt
            .query_map(params![campaign_id, limit], Snapshot::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(snapshots)
    }

    /// Sum of every campaign's latest amount raised. Campaigns without
    /// snapshots, and snapshots without an amount, count as zero.
    pub fn aggregate_total_raised(conn: &Connection) -> Result<f64, FundPulseError> {
        let total = conn.query_row(
            "SELECT COALESCE(SUM(s.amount_raised), 0.0)
             FROM snapshots s
             WHERE s.snapshot_id = (
                 SELECT s2.snapshot_id FROM snapshots s2
                 WHERE s2.campaign_id = s.campaign_id
                 ORDER BY s2.scraped_at DESC, s2.snapshot_id DESC
                 LIMIT 1
             )",
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}
