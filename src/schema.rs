pub const CURRENT_SCHEMA_VERSION: &str = "1";

pub const CREATE_SCHEMA_SQL: &str = r#"
-- Database metadata
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', '1');

-- One row per tracked campaign, keyed by source URL
CREATE TABLE IF NOT EXISTS campaigns (
    campaign_id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT,
    description TEXT,
    goal_amount REAL,
    currency TEXT NOT NULL DEFAULT 'USD',
    category TEXT,
    organizer TEXT,
    location TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT 1
);

-- Append-only funding observations
CREATE TABLE IF NOT EXISTS snapshots (
    snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id INTEGER NOT NULL REFERENCES campaigns(campaign_id) ON DELETE CASCADE,
    amount_raised REAL,
    donor_count INTEGER,
    share_count INTEGER,
    strategy TEXT NOT NULL,
    scraped_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_campaign_time ON snapshots (campaign_id, scraped_at DESC);

-- Donations as observed on each scrape (not deduplicated across scrapes)
CREATE TABLE IF NOT EXISTS donations (
    donation_id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id INTEGER NOT NULL REFERENCES campaigns(campaign_id) ON DELETE CASCADE,
    donor_name TEXT,
    amount REAL,
    amount_text TEXT,
    message TEXT,
    donated_at INTEGER,
    scraped_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_donations_campaign ON donations (campaign_id);

-- Durable mirror of the scheduler's live jobs
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    task_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    task_type TEXT NOT NULL,
    schedule TEXT NOT NULL,
    urls TEXT,
    strategy TEXT NOT NULL DEFAULT 'static',
    is_active BOOLEAN NOT NULL DEFAULT 1,
    last_run INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Outcome of each task execution
CREATE TABLE IF NOT EXISTS task_runs (
    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES scheduled_tasks(task_id) ON DELETE CASCADE,
    started_at INTEGER NOT NULL,
    finished_at INTEGER NOT NULL,
    url_count INTEGER NOT NULL,
    succeeded INTEGER NOT NULL,
    failed INTEGER NOT NULL,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_task_runs_task ON task_runs (task_id, started_at DESC);
"#;
