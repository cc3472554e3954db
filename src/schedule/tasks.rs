use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::FundPulseError;
use crate::extract::StrategyKind;

/// What a scheduled task does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TaskType {
    /// Re-extract the task's explicit URL list
    Scrape,
    /// Crawl the configured seeds, then extract what was found
    DiscoverAndScrape,
    /// Re-extract every active campaign in the store
    TrackAll,
}

/// Durable definition of a scheduled job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledTask {
    pub task_id: i64,
    pub name: String,
    pub task_type: TaskType,
    pub schedule: String,
    pub urls: Vec<String>,
    pub strategy: StrategyKind,
    pub is_active: bool,
    pub last_run: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub task_type: TaskType,
    pub schedule: String,
    pub urls: Vec<String>,
    pub strategy: StrategyKind,
    pub is_active: bool,
}

/// Partial edit; `None` leaves a field as it is
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub task_type: Option<TaskType>,
    pub schedule: Option<String>,
    pub urls: Option<Vec<String>>,
    pub strategy: Option<StrategyKind>,
    pub is_active: Option<bool>,
}

const TASK_COLUMNS: &str = "task_id, name, task_type, schedule, urls, strategy, is_active, \
     last_run, created_at, updated_at";

fn text_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl ScheduledTask {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let urls: Option<String> = row.get(4)?;
        let urls = match urls {
            Some(json) if !json.is_empty() => serde_json::from_str(&json)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
            _ => Vec::new(),
        };

        Ok(ScheduledTask {
            task_id: row.get(0)?,
            name: row.get(1)?,
            task_type: text_column(row, 2)?,
            schedule: row.get(3)?,
            urls,
            strategy: text_column(row, 5)?,
            is_active: row.get(6)?,
            last_run: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    pub fn create(conn: &Connection, new_task: &NewTask, now: i64) -> Result<Self, FundPulseError> {
        let urls = serde_json::to_string(&new_task.urls)?;
        conn.execute(
            "INSERT INTO scheduled_tasks (name, task_type, schedule, urls, strategy, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                new_task.name,
                new_task.task_type.to_string(),
                new_task.schedule,
                urls,
                new_task.strategy.to_string(),
                new_task.is_active,
                now,
            ],
        )?;

        let task_id = conn.last_insert_rowid();
        Self::get_by_id(conn, task_id)?
            .ok_or_else(|| FundPulseError::Error(format!("Task {} vanished after insert", task_id)))
    }

    pub fn get_by_id(conn: &Connection, task_id: i64) -> Result<Option<Self>, FundPulseError> {
        conn.query_row(
            &format!("SELECT {} FROM scheduled_tasks WHERE task_id = ?", TASK_COLUMNS),
            [task_id],
            ScheduledTask::from_row,
        )
        .optional()
        .map_err(FundPulseError::DatabaseError)
    }

    pub fn list(conn: &Connection) -> Result<Vec<Self>, FundPulseError> {
        Self::query_list(conn, "")
    }

    pub fn list_active(conn: &Connection) -> Result<Vec<Self>, FundPulseError> {
        Self::query_list(conn, "WHERE is_active = 1")
    }

    fn query_list(conn: &Connection, filter: &str) -> Result<Vec<Self>, FundPulseError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scheduled_tasks {} ORDER BY task_id",
            TASK_COLUMNS, filter
        ))?;
        let tasks = stmt
            .query_map([], ScheduledTask::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Apply `update` and return the stored result, or `None` if the task doesn't exist
    pub fn update(
        conn: &Connection,
        task_id: i64,
        update: &TaskUpdate,
        now: i64,
    ) -> Result<Option<Self>, FundPulseError> {
        let Some(mut task) = Self::get_by_id(conn, task_id)? else {
            return Ok(None);
        };

        if let Some(name) = &update.name {
            task.name = name.clone();
        }
        if let Some(task_type) = update.task_type {
            task.task_type = task_type;
        }
        if let Some(schedule) = &update.schedule {
            task.schedule = schedule.clone();
        }
        if let Some(urls) = &update.urls {
            task.urls = urls.clone();
        }
        if let Some(strategy) = update.strategy {
            task.strategy = strategy;
        }
        if let Some(is_active) = update.is_active {
            task.is_active = is_active;
        }
        task.updated_at = now;

        conn.execute(
            "UPDATE scheduled_tasks
             SET name = ?, task_type = ?, schedule = ?, urls = ?, strategy = ?, is_active = ?, updated_at = ?
             WHERE task_id = ?",
            params![
                task.name,
                task.task_type.to_string(),
                task.schedule,
                serde_json::to_string(&task.urls)?,
                task.strategy.to_string(),
                task.is_active,
                task.updated_at,
                task_id,
            ],
        )?;

        Ok(Some(task))
    }

    pub fn delete(conn: &Connection, task_id: i64) -> Result<bool, FundPulseError> {
        let changed = conn.execute("DELETE FROM scheduled_tasks WHERE task_id = ?", [task_id])?;
        Ok(changed > 0)
    }

    pub fn stamp_last_run(conn: &Connection, task_id: i64, at: i64) -> Result<(), FundPulseError> {
        conn.execute(
            "UPDATE scheduled_tasks SET last_run = ? WHERE task_id = ?",
            params![at, task_id],
        )?;
        Ok(())
    }
}

/// Outcome of one execution of a scheduled task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRun {
    pub run_id: i64,
    pub task_id: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub url_count: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub error: Option<String>,
}

impl TaskRun {
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        conn: &Connection,
        task_id: i64,
        started_at: i64,
        finished_at: i64,
        url_count: usize,
        succeeded: usize,
        failed: usize,
        error: Option<&str>,
    ) -> Result<i64, FundPulseError> {
        conn.execute(
            "INSERT INTO task_runs (task_id, started_at, finished_at, url_count, succeeded, failed, error)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                task_id,
                started_at,
                finished_at,
                url_count as i64,
                succeeded as i64,
                failed as i64,
                error
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest first
    pub fn recent(conn: &Connection, task_id: i64, limit: usize) -> Result<Vec<Self>, FundPulseError> {
        let mut stmt = conn.prepare(
            "SELECT run_id, task_id, started_at, finished_at, url_count, succeeded, failed, error
             FROM task_runs WHERE task_id = ?
             ORDER BY started_at DESC, run_id DESC LIMIT ?",
        )?;
        let runs = stmt
            .query_map(params![task_id, limit as i64], |row| {
                Ok(TaskRun {
                    run_id: row.get(0)?,
                    task_id: row.get(1)?,
                    started_at: row.get(2)?,
                    finished_at: row.get(3)?,
                    url_count: row.get(4)?,
                    succeeded: row.get(5)?,
                    failed: row.get(6)?,
                    error: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn new_task() -> NewTask {
        NewTask {
            name: "Dogs".to_string(),
            task_type: TaskType::Scrape,
            schedule: "every_30_minutes".to_string(),
            urls: vec![
                "https://www.gofundme.com/f/a".to_string(),
                "https://www.gofundme.com/f/b".to_string(),
            ],
            strategy: StrategyKind::Static,
            is_active: true,
        }
    }

    #[test]
    fn test_task_type_strings() {
        assert_eq!(TaskType::DiscoverAndScrape.to_string(), "discover_and_scrape");
        assert_eq!("track_all".parse::<TaskType>().unwrap(), TaskType::TrackAll);
        assert!("crawl".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_create_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let db = Database::connect(dir.path()).unwrap();
        let conn = db.conn().unwrap();

        let created = ScheduledTask::create(&conn, &new_task(), 100).unwrap();
        let loaded = ScheduledTask::get_by_id(&conn, created.task_id).unwrap().unwrap();

        assert_eq!(loaded, created);
        assert_eq!(loaded.urls.len(), 2);
        assert_eq!(loaded.last_run, None);
        assert_eq!(loaded.created_at, 100);
    }

    #[test]
    fn test_update_is_partial() {
        let dir = TempDir::new().unwrap();
        let db = Database::connect(dir.path()).unwrap();
        let conn = db.conn().unwrap();
        let created = ScheduledTask::create(&conn, &new_task(), 100).unwrap();

        let update = TaskUpdate {
            schedule: Some("daily".to_string()),
            is_active: Some(false),
            ..Default::default()
        };
        let updated = ScheduledTask::update(&conn, created.task_id, &update, 200)
            .unwrap()
            .unwrap();

        assert_eq!(updated.schedule, "daily");
        assert!(!updated.is_active);
        assert_eq!(updated.name, "Dogs");
        assert_eq!(updated.urls, created.urls);
        assert_eq!(updated.updated_at, 200);
        assert_eq!(ScheduledTask::list_active(&conn).unwrap().len(), 0);
        assert_eq!(ScheduledTask::list(&conn).unwrap().len(), 1);

        assert!(ScheduledTask::update(&conn, 999, &update, 300).unwrap().is_none());
    }

    #[test]
    fn test_delete_cascades_runs() {
        let dir = TempDir::new().unwrap();
        let db = Database::connect(dir.path()).unwrap();
        let conn = db.conn().unwrap();
        let task = ScheduledTask::create(&conn, &new_task(), 100).unwrap();

        TaskRun::record(&conn, task.task_id, 1, 2, 2, 1, 1, Some("HTTP 404 Not Found")).unwrap();
        TaskRun::record(&conn, task.task_id, 3, 4, 2, 2, 0, None).unwrap();
        let runs = TaskRun::recent(&conn, task.task_id, 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].started_at, 3);

        assert!(ScheduledTask::delete(&conn, task.task_id).unwrap());
        assert!(TaskRun::recent(&conn, task.task_id, 10).unwrap().is_empty());
    }
}
