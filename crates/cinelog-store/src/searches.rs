use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::value::{parse_json, Row, Value};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchRow {
    pub id: i64,
    pub name: Option<String>,
    pub prompt: String,
    /// Free-form parameters forwarded to the search pipeline.
    pub kwargs: Option<serde_json::Value>,
    pub last_run_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, Default)]
pub struct NewSearch {
    /// Explicit id, used by seeding. Creation fails if it is taken.
    pub id: Option<i64>,
    pub name: Option<String>,
    pub prompt: String,
    pub kwargs: Option<serde_json::Value>,
}

const COLUMNS: &str = "id, name, prompt, kwargs, last_run_date, created_at, updated_at";

fn search_from_row(row: &Row) -> Result<SearchRow, StoreError> {
    let kwargs = row
        .opt_text(3, "searches", "kwargs")?
        .map(|raw| parse_json(&raw, "searches", "kwargs"))
        .transpose()?;
    Ok(SearchRow {
        id: row.integer(0, "searches", "id")?,
        name: row.opt_text(1, "searches", "name")?,
        prompt: row.text(2, "searches", "prompt")?,
        kwargs,
        last_run_date: row.opt_text(4, "searches", "last_run_date")?,
        created_at: row.text(5, "searches", "created_at")?,
        updated_at: row.text(6, "searches", "updated_at")?,
    })
}

fn encode_kwargs(kwargs: Option<&serde_json::Value>) -> Result<Option<String>, StoreError> {
    kwargs
        .map(|v| serde_json::to_string(v).map_err(StoreError::from))
        .transpose()
}

pub struct SearchRepo {
    db: Database,
}

impl SearchRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a search prompt. An explicit id that already exists is a
    /// conflict, not an overwrite.
    #[instrument(skip(self, search), fields(name = search.name.as_deref()))]
    pub fn create(&self, search: &NewSearch) -> Result<i64, StoreError> {
        let now = Utc::now().to_rfc3339();
        let kwargs = encode_kwargs(search.kwargs.as_ref())?;

        self.db.with_conn(|conn| match search.id {
            Some(id) => {
                let taken = conn
                    .query_opt("SELECT id FROM searches WHERE id = $1", &[Value::Integer(id)])?
                    .is_some();
                if taken {
                    return Err(StoreError::Conflict(format!("search id {id} already exists")));
                }
                conn.execute(
                    "INSERT INTO searches (id, name, prompt, kwargs, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    &[
                        Value::Integer(id),
                        Value::from(search.name.clone()),
                        Value::from(search.prompt.as_str()),
                        Value::from(kwargs.clone()),
                        Value::from(now.clone()),
                        Value::from(now.clone()),
                    ],
                )?;
                Ok(id)
            }
            None => {
                let row = conn
                    .query_opt(
                        "INSERT INTO searches (name, prompt, kwargs, created_at, updated_at) \
                         VALUES ($1, $2, $3, $4, $5) RETURNING id",
                        &[
                            Value::from(search.name.clone()),
                            Value::from(search.prompt.as_str()),
                            Value::from(kwargs.clone()),
                            Value::from(now.clone()),
                            Value::from(now.clone()),
                        ],
                    )?
                    .ok_or_else(|| StoreError::Database("INSERT returned no id".into()))?;
                row.integer(0, "searches", "id")
            }
        })
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<Option<SearchRow>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_opt(
                &format!("SELECT {COLUMNS} FROM searches WHERE id = $1"),
                &[Value::Integer(id)],
            )?
            .map(|row| search_from_row(&row))
            .transpose()
        })
    }

    #[instrument(skip(self))]
    pub fn get_by_name(&self, name: &str) -> Result<Option<SearchRow>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_opt(
                &format!("SELECT {COLUMNS} FROM searches WHERE name = $1"),
                &[Value::from(name)],
            )?
            .map(|row| search_from_row(&row))
            .transpose()
        })
    }

    /// Recent searches, newest first.
    #[instrument(skip(self))]
    pub fn list(&self, limit: Option<u32>) -> Result<Vec<SearchRow>, StoreError> {
        let mut sql = format!("SELECT {COLUMNS} FROM searches ORDER BY created_at DESC");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        self.db.with_conn(|conn| {
            conn.query(&sql, &[])?.iter().map(search_from_row).collect()
        })
    }

    /// Update prompt and optionally name/kwargs. Returns whether a row
    /// changed.
    #[instrument(skip(self, kwargs))]
    pub fn update(
        &self,
        id: i64,
        prompt: &str,
        name: Option<&str>,
        kwargs: Option<&serde_json::Value>,
    ) -> Result<bool, StoreError> {
        let now = Utc::now().to_rfc3339();
        let encoded = encode_kwargs(kwargs)?;

        let mut sql = String::from("UPDATE searches SET prompt = $1");
        let mut params: Vec<Value> = vec![Value::from(prompt)];
        if let Some(name) = name {
            params.push(Value::from(name));
            sql.push_str(&format!(", name = ${}", params.len()));
        }
        if let Some(encoded) = encoded {
            params.push(Value::from(encoded));
            sql.push_str(&format!(", kwargs = ${}", params.len()));
        }
        params.push(Value::from(now.clone()));
        sql.push_str(&format!(", updated_at = ${}", params.len()));
        params.push(Value::Integer(id));
        sql.push_str(&format!(" WHERE id = ${}", params.len()));

        self.db.with_conn(|conn| {
            let updated = conn.execute(&sql, &params)?;
            Ok(updated > 0)
        })
    }

    #[instrument(skip(self))]
    pub fn touch_last_run(&self, id: i64, when: DateTime<Utc>) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE searches SET last_run_date = $1 WHERE id = $2",
                &[Value::from(when.to_rfc3339()), Value::Integer(id)],
            )?;
            Ok(updated > 0)
        })
    }

    #[instrument(skip(self))]
    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let deleted =
                conn.execute("DELETE FROM searches WHERE id = $1", &[Value::Integer(id)])?;
            Ok(deleted > 0)
        })
    }

    #[instrument(skip(self))]
    pub fn clear(&self) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| conn.execute("DELETE FROM searches", &[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn repo() -> SearchRepo {
        SearchRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn create_and_get_with_kwargs() {
        let repo = repo();
        let id = repo
            .create(&NewSearch {
                name: Some("weekly".into()),
                prompt: "Suggest something new".into(),
                kwargs: Some(json!({"limit": 5, "media_type": "movie"})),
                ..NewSearch::default()
            })
            .unwrap();

        let row = repo.get(id).unwrap().unwrap();
        assert_eq!(row.prompt, "Suggest something new");
        assert_eq!(row.kwargs.unwrap()["limit"], 5);
    }

    #[test]
    fn explicit_id_conflicts_when_taken() {
        let repo = repo();
        repo.create(&NewSearch {
            id: Some(1),
            prompt: "first".into(),
            ..NewSearch::default()
        })
        .unwrap();

        let err = repo
            .create(&NewSearch {
                id: Some(1),
                prompt: "second".into(),
                ..NewSearch::default()
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn get_by_name() {
        let repo = repo();
        repo.create(&NewSearch {
            name: Some("recently_watched".into()),
            prompt: "p".into(),
            ..NewSearch::default()
        })
        .unwrap();
        assert!(repo.get_by_name("recently_watched").unwrap().is_some());
        assert!(repo.get_by_name("missing").unwrap().is_none());
    }

    #[test]
    fn update_partial_fields() {
        let repo = repo();
        let id = repo
            .create(&NewSearch {
                name: Some("old".into()),
                prompt: "old prompt".into(),
                ..NewSearch::default()
            })
            .unwrap();

        assert!(repo.update(id, "new prompt", None, None).unwrap());
        let row = repo.get(id).unwrap().unwrap();
        assert_eq!(row.prompt, "new prompt");
        assert_eq!(row.name.as_deref(), Some("old"));

        assert!(repo
            .update(id, "new prompt", Some("renamed"), Some(&json!({"k": 1})))
            .unwrap());
        let row = repo.get(id).unwrap().unwrap();
        assert_eq!(row.name.as_deref(), Some("renamed"));
        assert_eq!(row.kwargs.unwrap()["k"], 1);

        assert!(!repo.update(999, "x", None, None).unwrap());
    }

    #[test]
    fn touch_last_run() {
        let repo = repo();
        let id = repo
            .create(&NewSearch {
                prompt: "p".into(),
                ..NewSearch::default()
            })
            .unwrap();
        let when = Utc.with_ymd_and_hms(2026, 5, 1, 6, 0, 0).unwrap();
        assert!(repo.touch_last_run(id, when).unwrap());
        let row = repo.get(id).unwrap().unwrap();
        assert_eq!(row.last_run_date, Some(when.to_rfc3339()));
    }

    #[test]
    fn delete_and_clear() {
        let repo = repo();
        let id = repo
            .create(&NewSearch {
                prompt: "a".into(),
                ..NewSearch::default()
            })
            .unwrap();
        repo.create(&NewSearch {
            prompt: "b".into(),
            ..NewSearch::default()
        })
        .unwrap();

        assert!(repo.delete(id).unwrap());
        assert_eq!(repo.clear().unwrap(), 1);
        assert!(repo.list(None).unwrap().is_empty());
    }
}
