//! Database schema definitions and migrations
//!
//! This module contains all SQL schema definitions for the progress database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Archive targets
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    root_kind TEXT NOT NULL,
    root_remote_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Crawl tree of every job
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES jobs(id),
    node_key TEXT NOT NULL,
    parent_id INTEGER REFERENCES nodes(id),
    kind TEXT NOT NULL,
    remote_id TEXT NOT NULL,
    parent_remote_id TEXT,
    cursor INTEGER NOT NULL DEFAULT 1,
    depth INTEGER NOT NULL,
    state TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TEXT,
    failure_kind TEXT,
    last_error TEXT,
    completed_seq INTEGER,
    discovered_at TEXT NOT NULL,
    UNIQUE(job_id, node_key)
);

CREATE INDEX IF NOT EXISTS idx_nodes_schedule ON nodes(job_id, state, depth, id);
CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent_id);

-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES jobs(id),
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_job ON runs(job_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", get_schema_version())?;
    Ok(())
}

/// Gets the current schema version
///
/// This can be used for future migrations if the schema changes.
pub fn get_schema_version() -> u32 {
    1
}
