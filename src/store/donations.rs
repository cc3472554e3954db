use rusqlite::{params, Connection, Row};

use crate::error::FundPulseError;
use crate::extract::DonationEntry;

/// A donation as seen on one scrape. The same donation shows up again on
/// every later scrape that still lists it.
#[derive(Clone, Debug, PartialEq)]
pub struct Donation {
    pub donation_id: i64,
    pub campaign_id: i64,
    pub donor_name: Option<String>,
    pub amount: Option<f64>,
    pub amount_text: Option<String>,
    pub scraped_at: i64,
}

impl Donation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Donation {
            donation_id: row.get(0)?,
            campaign_id: row.get(1)?,
            donor_name: row.get(2)?,
            amount: row.get(3)?,
            amount_text: row.get(4)?,
            scraped_at: row.get(5)?,
        })
    }

    pub fn insert_all(
        conn: &Connection,
        campaign_id: i64,
        entries: &[DonationEntry],
        scraped_at: i64,
    ) -> Result<usize, FundPulseError> {
        let mut stmt = conn.prepare(
            "INSERT INTO donations (campaign_id, donor_name, amount, amount_text, scraped_at)
             VALUES (?, ?, ?, ?, ?)",
        )?;
        for entry in entries {
            stmt.execute(params![
                campaign_id,
                entry.name,
                entry.amount_value(),
                entry.amount,
                scraped_at
            ])?;
        }
        Ok(entries.len())
    }

    /// Newest scrape first, page order within a scrape
    pub fn for_campaign(conn: &Connection, campaign_id: i64) -> Result<Vec<Self>, FundPulseError> {
        let mut stmt = conn.prepare(
            "SELECT donation_id, campaign_id, donor_name, amount, amount_text, scraped_at
             FROM donations WHERE campaign_id = ?
             ORDER BY scraped_at DESC, donation_id ASC",
        )?;
        let donations = stmt
            .query_map([campaign_id], Donation::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(donations)
    }
}
