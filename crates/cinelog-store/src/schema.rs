//! Final-shape DDL for the cinelog database.
//!
//! A fresh database gets these tables directly and is then stamped to the
//! latest migration version; historical migration units only run against
//! databases created by older releases. Migration units must never drop the
//! `schema_version` table.

use crate::config::BackendKind;
use crate::connect::Connection;
use crate::error::StoreError;

pub const SQLITE_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = 64000;
PRAGMA temp_store = MEMORY;
"#;

pub const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS searches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    prompt TEXT NOT NULL,
    kwargs TEXT,
    last_run_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS media (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    media_type TEXT NOT NULL,
    tmdb_id TEXT,
    source_provider TEXT,
    entity_type TEXT NOT NULL DEFAULT 'suggestion',
    ignored INTEGER NOT NULL DEFAULT 0,
    networks TEXT,
    overview TEXT,
    poster_url TEXT,
    search_id INTEGER REFERENCES searches(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS watch_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    media_id INTEGER NOT NULL REFERENCES media(id),
    watched_by TEXT NOT NULL,
    last_played_date TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    processed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schedules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    search_id INTEGER REFERENCES searches(id),
    job_id TEXT NOT NULL UNIQUE,
    func_name TEXT NOT NULL,
    year TEXT,
    month TEXT,
    day TEXT,
    day_of_week TEXT,
    hour TEXT,
    minute TEXT,
    args TEXT,
    kwargs TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    group_name TEXT NOT NULL,
    value TEXT,
    default_value TEXT,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_media_tmdb ON media(tmdb_id);
CREATE INDEX IF NOT EXISTS idx_media_entity_type ON media(entity_type);
CREATE INDEX IF NOT EXISTS idx_media_ignored ON media(ignored);
CREATE INDEX IF NOT EXISTS idx_watch_history_media ON watch_history(media_id);
CREATE INDEX IF NOT EXISTS idx_watch_history_played ON watch_history(last_played_date);
CREATE INDEX IF NOT EXISTS idx_watch_history_processed ON watch_history(processed);
CREATE INDEX IF NOT EXISTS idx_searches_name ON searches(name);
CREATE INDEX IF NOT EXISTS idx_schedules_search ON schedules(search_id);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS searches (
    id BIGSERIAL PRIMARY KEY,
    name TEXT,
    prompt TEXT NOT NULL,
    kwargs TEXT,
    last_run_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS media (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL,
    media_type TEXT NOT NULL,
    tmdb_id TEXT,
    source_provider TEXT,
    entity_type TEXT NOT NULL DEFAULT 'suggestion',
    ignored BOOLEAN NOT NULL DEFAULT FALSE,
    networks TEXT,
    overview TEXT,
    poster_url TEXT,
    search_id BIGINT REFERENCES searches(id),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS watch_history (
    id BIGSERIAL PRIMARY KEY,
    media_id BIGINT NOT NULL REFERENCES media(id),
    watched_by TEXT NOT NULL,
    last_played_date TEXT NOT NULL,
    processed BOOLEAN NOT NULL DEFAULT FALSE,
    processed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schedules (
    id BIGSERIAL PRIMARY KEY,
    search_id BIGINT REFERENCES searches(id),
    job_id TEXT NOT NULL UNIQUE,
    func_name TEXT NOT NULL,
    year TEXT,
    month TEXT,
    day TEXT,
    day_of_week TEXT,
    hour TEXT,
    minute TEXT,
    args TEXT,
    kwargs TEXT,
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    group_name TEXT NOT NULL,
    value TEXT,
    default_value TEXT,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_media_tmdb ON media(tmdb_id);
CREATE INDEX IF NOT EXISTS idx_media_entity_type ON media(entity_type);
CREATE INDEX IF NOT EXISTS idx_media_ignored ON media(ignored);
CREATE INDEX IF NOT EXISTS idx_watch_history_media ON watch_history(media_id);
CREATE INDEX IF NOT EXISTS idx_watch_history_played ON watch_history(last_played_date);
CREATE INDEX IF NOT EXISTS idx_watch_history_processed ON watch_history(processed);
CREATE INDEX IF NOT EXISTS idx_searches_name ON searches(name);
CREATE INDEX IF NOT EXISTS idx_schedules_search ON schedules(search_id);

CREATE TABLE IF NOT EXISTS schema_version (
    version BIGINT NOT NULL
);
"#;

/// Create the final-shape tables for the connection's backend.
pub fn apply(conn: &mut Connection) -> Result<(), StoreError> {
    let ddl = match conn.kind() {
        BackendKind::Sqlite => SQLITE_SCHEMA,
        BackendKind::Postgres => POSTGRES_SCHEMA,
    };
    conn.batch(ddl)
}
