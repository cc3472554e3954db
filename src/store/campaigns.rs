use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::FundPulseError;
use crate::extract::CampaignRecord;

/// A tracked campaign. Mutable metadata only; funding history lives in snapshots.
#[derive(Clone, Debug, PartialEq)]
pub struct Campaign {
    pub campaign_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub goal_amount: Option<f64>,
    pub currency: String,
    pub category: Option<String>,
    pub organizer: Option<String>,
    pub location: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_active: bool,
}

const CAMPAIGN_COLUMNS: &str = "campaign_id, url, title, description, goal_amount, currency, \
     category, organizer, location, created_at, updated_at, is_active";

impl Campaign {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Campaign {
            campaign_id: row.get(0)?,
            url: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            goal_amount: row.get(4)?,
            currency: row.get(5)?,
            category: row.get(6)?,
            organizer: row.get(7)?,
            location: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            is_active: row.get(11)?,
        })
    }

    /// Insert or refresh the campaign for `record.url`, returning its id.
    ///
    /// Title, description and goal are overwritten with the latest observation.
    /// Organizer and location keep their previous value when this scrape did
    /// not see one.
    pub fn upsert(conn: &Connection, record: &CampaignRecord, now: i64) -> Result<i64, FundPulseError> {
        let campaign_id = conn.query_row(
            "INSERT INTO campaigns (url, title, description, goal_amount, organizer, location, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                goal_amount = excluded.goal_amount,
                organizer = COALESCE(excluded.organizer, campaigns.organizer),
                location = COALESCE(excluded.location, campaigns.location),
                updated_at = excluded.updated_at
             RETURNING campaign_id",
            params![
                record.url,
                record.title,
                record.description,
                record.goal_amount.value,
                record.organizer,
                record.location,
                now,
            ],
            |row| row.get(0),
        )?;

        Ok(campaign_id)
    }

    pub fn get_by_id(conn: &Connection, campaign_id: i64) -> Result<Option<Self>, FundPulseError> {
        conn.query_row(
            &format!("SELECT {} FROM campaigns WHERE campaign_id = ?", CAMPAIGN_COLUMNS),
            [campaign_id],
            Campaign::from_row,
        )
        .optional()
        .map_err(FundPulseError::DatabaseError)
    }

    pub fn get_by_url(conn: &Connection, url: &str) -> Result<Option<Self>, FundPulseError> {
        conn.query_row(
            &format!("SELECT {} FROM campaigns WHERE url = ?", CAMPAIGN_COLUMNS),
            [url],
            Campaign::from_row,
        )
        .optional()
        .map_err(FundPulseError::DatabaseError)
    }

    pub fn list(conn: &Connection) -> Result<Vec<Self>, FundPulseError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM campaigns ORDER BY campaign_id",
            CAMPAIGN_COLUMNS
        ))?;
        let rows = stmt.query_map([], Campaign::from_row)?;

        let mut campaigns = Vec::new();
        for campaign in rows {
            campaigns.push(campaign?);
        }
        Ok(campaigns)
    }

    pub fn active_urls(conn: &Connection) -> Result<Vec<String>, FundPulseError> {
        let mut stmt =
            conn.prepare("SELECT url FROM campaigns WHERE is_active = 1 ORDER BY campaign_id")?;
        let urls = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    /// Returns false when no such campaign exists
    pub fn set_active(conn: &Connection, campaign_id: i64, active: bool, now: i64) -> Result<bool, FundPulseError> {
        let changed = conn.execute(
            "UPDATE campaigns SET is_active = ?, updated_at = ? WHERE campaign_id = ?",
            params![active, now, campaign_id],
        )?;
        Ok(changed > 0)
    }

    /// Delete a campaign along with its snapshots and donations
    pub fn delete(conn: &Connection, campaign_id: i64) -> Result<bool, FundPulseError> {
        let changed = conn.execute("DELETE FROM campaigns WHERE campaign_id = ?", [campaign_id])?;
        Ok(changed > 0)
    }
}
