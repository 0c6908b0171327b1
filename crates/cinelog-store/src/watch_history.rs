use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::StoreError;
use crate::value::{Row, Value};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchHistoryRow {
    pub id: i64,
    pub media_id: i64,
    pub watched_by: String,
    pub last_played_date: String,
    pub processed: bool,
    pub processed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Filters for listing watch history. Everything is optional; the default
/// returns the most recent entries.
#[derive(Clone, Debug, Default)]
pub struct HistoryQuery {
    pub media_id: Option<i64>,
    pub processed: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

const COLUMNS: &str =
    "id, media_id, watched_by, last_played_date, processed, processed_at, created_at, updated_at";

fn history_from_row(row: &Row) -> Result<WatchHistoryRow, StoreError> {
    Ok(WatchHistoryRow {
        id: row.integer(0, "watch_history", "id")?,
        media_id: row.integer(1, "watch_history", "media_id")?,
        watched_by: row.text(2, "watch_history", "watched_by")?,
        last_played_date: row.text(3, "watch_history", "last_played_date")?,
        processed: row.boolean(4, "watch_history", "processed")?,
        processed_at: row.opt_text(5, "watch_history", "processed_at")?,
        created_at: row.text(6, "watch_history", "created_at")?,
        updated_at: row.text(7, "watch_history", "updated_at")?,
    })
}

pub struct WatchHistoryRepo {
    db: Database,
}

impl WatchHistoryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a play event. One row per (media, viewer) pair: an existing
    /// entry gets its play date refreshed, and nothing changes when the
    /// date is already current. Returns whether anything was written.
    #[instrument(skip(self))]
    pub fn record(
        &self,
        media_id: i64,
        watched_by: &str,
        last_played: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let played = last_played.unwrap_or_else(Utc::now).to_rfc3339();
        let now = Utc::now().to_rfc3339();
        let viewer = watched_by.to_lowercase();

        self.db.with_conn(|conn| {
            let existing = conn.query_opt(
                "SELECT id, last_played_date FROM watch_history \
                 WHERE media_id = $1 AND LOWER(watched_by) = $2",
                &[Value::Integer(media_id), Value::from(viewer.clone())],
            )?;

            match existing {
                Some(row) => {
                    let id = row.integer(0, "watch_history", "id")?;
                    let recorded = row.text(1, "watch_history", "last_played_date")?;
                    if recorded == played {
                        debug!(media_id, "watch history already current");
                        return Ok(false);
                    }
                    conn.execute(
                        "UPDATE watch_history SET last_played_date = $1, updated_at = $2 \
                         WHERE id = $3",
                        &[
                            Value::from(played.clone()),
                            Value::from(now.clone()),
                            Value::Integer(id),
                        ],
                    )?;
                    Ok(true)
                }
                None => {
                    conn.execute(
                        "INSERT INTO watch_history \
                         (media_id, watched_by, last_played_date, created_at, updated_at) \
                         VALUES ($1, $2, $3, $4, $5)",
                        &[
                            Value::Integer(media_id),
                            Value::from(watched_by),
                            Value::from(played.clone()),
                            Value::from(now.clone()),
                            Value::from(now.clone()),
                        ],
                    )?;
                    Ok(true)
                }
            }
        })
    }

    /// Mark an entry processed (or not). Clears the processed timestamp
    /// when un-processing.
    #[instrument(skip(self))]
    pub fn set_processed(&self, id: i64, processed: bool) -> Result<bool, StoreError> {
        let now = Utc::now().to_rfc3339();
        let processed_at = processed.then(|| now.clone());
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE watch_history SET processed = $1, processed_at = $2, updated_at = $3 \
                 WHERE id = $4",
                &[
                    Value::Bool(processed),
                    Value::from(processed_at.clone()),
                    Value::from(now.clone()),
                    Value::Integer(id),
                ],
            )?;
            Ok(updated > 0)
        })
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<Option<WatchHistoryRow>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_opt(
                &format!("SELECT {COLUMNS} FROM watch_history WHERE id = $1"),
                &[Value::Integer(id)],
            )?
            .map(|row| history_from_row(&row))
            .transpose()
        })
    }

    /// List history entries, newest plays first.
    #[instrument(skip(self, query))]
    pub fn list(&self, query: &HistoryQuery) -> Result<Vec<WatchHistoryRow>, StoreError> {
        let mut sql = format!("SELECT {COLUMNS} FROM watch_history WHERE 1=1");
        let mut params: Vec<Value> = Vec::new();

        if let Some(media_id) = query.media_id {
            params.push(Value::Integer(media_id));
            sql.push_str(&format!(" AND media_id = ${}", params.len()));
        }
        if let Some(processed) = query.processed {
            params.push(Value::Bool(processed));
            sql.push_str(&format!(" AND processed = ${}", params.len()));
        }
        if let Some(since) = query.since {
            params.push(Value::from(since.to_rfc3339()));
            sql.push_str(&format!(" AND last_played_date >= ${}", params.len()));
        }
        if let Some(until) = query.until {
            params.push(Value::from(until.to_rfc3339()));
            sql.push_str(&format!(" AND last_played_date <= ${}", params.len()));
        }

        sql.push_str(" ORDER BY last_played_date DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        self.db.with_conn(|conn| {
            conn.query(&sql, &params)?
                .iter()
                .map(history_from_row)
                .collect()
        })
    }

    #[instrument(skip(self))]
    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM watch_history WHERE id = $1",
                &[Value::Integer(id)],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Delete everything, returning the number of rows removed.
    #[instrument(skip(self))]
    pub fn clear(&self) -> Result<u64, StoreError> {
        self.db
            .with_conn(|conn| conn.execute("DELETE FROM watch_history", &[]))
    }
}
