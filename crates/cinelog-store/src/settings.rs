use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::value::{Row, Value};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettingRow {
    pub id: i64,
    pub name: String,
    pub group_name: String,
    pub value: Option<String>,
    pub default_value: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const COLUMNS: &str =
    "id, name, group_name, value, default_value, description, created_at, updated_at";

fn setting_from_row(row: &Row) -> Result<SettingRow, StoreError> {
    Ok(SettingRow {
        id: row.integer(0, "settings", "id")?,
        name: row.text(1, "settings", "name")?,
        group_name: row.text(2, "settings", "group_name")?,
        value: row.opt_text(3, "settings", "value")?,
        default_value: row.opt_text(4, "settings", "default_value")?,
        description: row.opt_text(5, "settings", "description")?,
        created_at: row.text(6, "settings", "created_at")?,
        updated_at: row.text(7, "settings", "updated_at")?,
    })
}

pub struct SettingsRepo {
    db: Database,
}

impl SettingsRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn get(&self, name: &str) -> Result<Option<SettingRow>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_opt(
                &format!("SELECT {COLUMNS} FROM settings WHERE name = $1"),
                &[Value::from(name)],
            )?
            .map(|row| setting_from_row(&row))
            .transpose()
        })
    }

    #[instrument(skip(self))]
    pub fn group(&self, group_name: &str) -> Result<Vec<SettingRow>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query(
                &format!("SELECT {COLUMNS} FROM settings WHERE group_name = $1 ORDER BY name"),
                &[Value::from(group_name)],
            )?
            .iter()
            .map(setting_from_row)
            .collect()
        })
    }

    #[instrument(skip(self))]
    pub fn all(&self) -> Result<Vec<SettingRow>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query(
                &format!("SELECT {COLUMNS} FROM settings ORDER BY group_name, name"),
                &[],
            )?
            .iter()
            .map(setting_from_row)
            .collect()
        })
    }

    /// Create or update a setting by name. On update, a None default or
    /// description leaves the stored one untouched.
    #[instrument(skip(self, value, default_value, description))]
    pub fn upsert(
        &self,
        name: &str,
        value: &str,
        group_name: &str,
        default_value: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let existing = self.get(name)?;

        self.db.with_conn(|conn| {
            match existing {
                Some(current) => {
                    conn.execute(
                        "UPDATE settings SET value = $1, group_name = $2, default_value = $3, \
                         description = $4, updated_at = $5 WHERE name = $6",
                        &[
                            Value::from(value),
                            Value::from(group_name),
                            Value::from(
                                default_value
                                    .map(str::to_string)
                                    .or(current.default_value),
                            ),
                            Value::from(
                                description.map(str::to_string).or(current.description),
                            ),
                            Value::from(now.clone()),
                            Value::from(name),
                        ],
                    )?;
                }
                None => {
                    conn.execute(
                        "INSERT INTO settings \
                         (name, group_name, value, default_value, description, created_at, updated_at) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7)",
                        &[
                            Value::from(name),
                            Value::from(group_name),
                            Value::from(value),
                            Value::from(default_value.map(str::to_string)),
                            Value::from(description.map(str::to_string)),
                            Value::from(now.clone()),
                            Value::from(now.clone()),
                        ],
                    )?;
                }
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    pub fn delete(&self, name: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let deleted =
                conn.execute("DELETE FROM settings WHERE name = $1", &[Value::from(name)])?;
            Ok(deleted > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SettingsRepo {
        SettingsRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn upsert_creates_then_updates() {
        let repo = repo();
        repo.upsert("sync_interval", "3600", "sync", Some("3600"), Some("seconds"))
            .unwrap();

        let row = repo.get("sync_interval").unwrap().unwrap();
        assert_eq!(row.value.as_deref(), Some("3600"));
        assert_eq!(row.default_value.as_deref(), Some("3600"));

        // Update keeps the default/description when not re-supplied.
        repo.upsert("sync_interval", "7200", "sync", None, None).unwrap();
        let row = repo.get("sync_interval").unwrap().unwrap();
        assert_eq!(row.value.as_deref(), Some("7200"));
        assert_eq!(row.default_value.as_deref(), Some("3600"));
        assert_eq!(row.description.as_deref(), Some("seconds"));
    }

    #[test]
    fn get_missing_is_none() {
        assert!(repo().get("nope").unwrap().is_none());
    }

    #[test]
    fn group_and_all() {
        let repo = repo();
        repo.upsert("a", "1", "first", None, None).unwrap();
        repo.upsert("b", "2", "first", None, None).unwrap();
        repo.upsert("c", "3", "second", None, None).unwrap();

        assert_eq!(repo.group("first").unwrap().len(), 2);
        assert_eq!(repo.group("missing").unwrap().len(), 0);
        assert_eq!(repo.all().unwrap().len(), 3);
    }

    #[test]
    fn delete() {
        let repo = repo();
        repo.upsert("a", "1", "g", None, None).unwrap();
        assert!(repo.delete("a").unwrap());
        assert!(!repo.delete("a").unwrap());
    }
}
