use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::value::{escape_like, parse_enum, Row, Value};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Produced by a search and awaiting a decision.
    #[default]
    Suggestion,
    /// Already present in the user's library.
    Library,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suggestion => write!(f, "suggestion"),
            Self::Library => write!(f, "library"),
        }
    }
}

impl FromStr for EntityType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "suggestion" => Ok(Self::Suggestion),
            "library" => Ok(Self::Library),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaRow {
    pub id: i64,
    pub title: String,
    pub media_type: String,
    pub tmdb_id: Option<String>,
    pub source_provider: Option<String>,
    pub entity_type: EntityType,
    pub ignored: bool,
    pub networks: Option<String>,
    pub overview: Option<String>,
    pub poster_url: Option<String>,
    pub search_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for a new media entry. Optional columns default to NULL.
#[derive(Clone, Debug, Default)]
pub struct NewMedia {
    pub title: String,
    pub media_type: String,
    pub tmdb_id: Option<String>,
    pub source_provider: Option<String>,
    pub entity_type: EntityType,
    pub networks: Option<String>,
    pub overview: Option<String>,
    pub poster_url: Option<String>,
    pub search_id: Option<i64>,
}

const COLUMNS: &str = "id, title, media_type, tmdb_id, source_provider, entity_type, ignored, \
                       networks, overview, poster_url, search_id, created_at, updated_at";

fn media_from_row(row: &Row) -> Result<MediaRow, StoreError> {
    Ok(MediaRow {
        id: row.integer(0, "media", "id")?,
        title: row.text(1, "media", "title")?,
        media_type: row.text(2, "media", "media_type")?,
        tmdb_id: row.opt_text(3, "media", "tmdb_id")?,
        source_provider: row.opt_text(4, "media", "source_provider")?,
        entity_type: parse_enum(&row.text(5, "media", "entity_type")?, "media", "entity_type")?,
        ignored: row.boolean(6, "media", "ignored")?,
        networks: row.opt_text(7, "media", "networks")?,
        overview: row.opt_text(8, "media", "overview")?,
        poster_url: row.opt_text(9, "media", "poster_url")?,
        search_id: row.opt_integer(10, "media", "search_id")?,
        created_at: row.text(11, "media", "created_at")?,
        updated_at: row.text(12, "media", "updated_at")?,
    })
}

pub struct MediaRepo {
    db: Database,
}

impl MediaRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new media entry and return its id.
    #[instrument(skip(self, media), fields(title = %media.title))]
    pub fn create(&self, media: &NewMedia) -> Result<i64, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let row = conn
                .query_opt(
                    "INSERT INTO media (title, media_type, tmdb_id, source_provider, entity_type, \
                     networks, overview, poster_url, search_id, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING id",
                    &[
                        Value::from(media.title.as_str()),
                        Value::from(media.media_type.as_str()),
                        Value::from(media.tmdb_id.clone()),
                        Value::from(media.source_provider.clone()),
                        Value::from(media.entity_type.to_string()),
                        Value::from(media.networks.clone()),
                        Value::from(media.overview.clone()),
                        Value::from(media.poster_url.clone()),
                        Value::from(media.search_id),
                        Value::from(now.clone()),
                        Value::from(now.clone()),
                    ],
                )?
                .ok_or_else(|| StoreError::Database("INSERT returned no id".into()))?;
            row.integer(0, "media", "id")
        })
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<Option<MediaRow>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_opt(
                &format!("SELECT {COLUMNS} FROM media WHERE id = $1"),
                &[Value::Integer(id)],
            )?
            .map(|row| media_from_row(&row))
            .transpose()
        })
    }

    #[instrument(skip(self))]
    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM media WHERE id = $1", &[Value::Integer(id)])?;
            Ok(deleted > 0)
        })
    }

    /// Delete by external identifier; returns whether anything was removed.
    #[instrument(skip(self))]
    pub fn delete_by_tmdb(&self, tmdb_id: &str, media_type: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM media WHERE tmdb_id = $1 AND media_type = $2",
                &[Value::from(tmdb_id), Value::from(media_type)],
            )?;
            Ok(deleted > 0)
        })
    }

    #[instrument(skip(self))]
    pub fn set_ignored(&self, id: i64, ignored: bool) -> Result<bool, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE media SET ignored = $1, updated_at = $2 WHERE id = $3",
                &[Value::Bool(ignored), Value::from(now.clone()), Value::Integer(id)],
            )?;
            Ok(updated > 0)
        })
    }

    /// Flip the ignored flag, returning the new state, or None if the entry
    /// does not exist.
    #[instrument(skip(self))]
    pub fn toggle_ignored(&self, id: i64) -> Result<Option<bool>, StoreError> {
        let Some(current) = self.get(id)? else {
            return Ok(None);
        };
        self.set_ignored(id, !current.ignored)?;
        Ok(Some(!current.ignored))
    }

    /// Title substring search, case-sensitive, ordered by title.
    #[instrument(skip(self))]
    pub fn search_by_title(&self, query: &str) -> Result<Vec<MediaRow>, StoreError> {
        let pattern = format!("%{}%", escape_like(query));
        self.db.with_conn(|conn| {
            conn.query(
                &format!(
                    "SELECT {COLUMNS} FROM media WHERE title LIKE $1 ESCAPE '\\' ORDER BY title"
                ),
                &[Value::from(pattern.clone())],
            )?
            .iter()
            .map(media_from_row)
            .collect()
        })
    }

    /// Suggestions filtered by their ignored state. Fresh suggestions come
    /// back newest-first; ignored ones alphabetically.
    #[instrument(skip(self))]
    pub fn suggestions(&self, ignored: bool) -> Result<Vec<MediaRow>, StoreError> {
        let order = if ignored { "title" } else { "created_at DESC" };
        self.db.with_conn(|conn| {
            conn.query(
                &format!(
                    "SELECT {COLUMNS} FROM media \
                     WHERE entity_type = 'suggestion' AND ignored = $1 ORDER BY {order}"
                ),
                &[Value::Bool(ignored)],
            )?
            .iter()
            .map(media_from_row)
            .collect()
        })
    }

    /// Distinct titles of ignored suggestions, for prompt exclusion lists.
    #[instrument(skip(self))]
    pub fn ignored_titles(&self) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query(
                "SELECT DISTINCT title FROM media \
                 WHERE entity_type = 'suggestion' AND ignored = $1 ORDER BY title",
                &[Value::Bool(true)],
            )?
            .iter()
            .map(|row| row.text(0, "media", "title"))
            .collect()
        })
    }

    #[instrument(skip(self))]
    pub fn count_for_provider(&self, provider: &str) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_opt(
                    "SELECT COUNT(*) FROM media WHERE source_provider = $1",
                    &[Value::from(provider)],
                )?
                .ok_or_else(|| StoreError::Database("COUNT returned no row".into()))?;
            row.integer(0, "media", "count")
        })
    }
}
