use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::StoreError;
use crate::value::{parse_json, Row, Value};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub id: i64,
    pub search_id: Option<i64>,
    pub job_id: String,
    pub func_name: String,
    pub year: Option<String>,
    pub month: Option<String>,
    pub day: Option<String>,
    pub day_of_week: Option<String>,
    pub hour: Option<String>,
    pub minute: Option<String>,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub enabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for a new schedule. Cron fields left as None mean "any".
#[derive(Clone, Debug)]
pub struct NewSchedule {
    pub search_id: Option<i64>,
    pub job_id: String,
    pub func_name: String,
    pub year: Option<String>,
    pub month: Option<String>,
    pub day: Option<String>,
    pub day_of_week: Option<String>,
    pub hour: Option<String>,
    pub minute: Option<String>,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub enabled: bool,
}

impl Default for NewSchedule {
    fn default() -> Self {
        Self {
            search_id: None,
            job_id: String::new(),
            func_name: String::new(),
            year: None,
            month: None,
            day: None,
            day_of_week: None,
            hour: None,
            minute: None,
            args: serde_json::Value::Array(Vec::new()),
            kwargs: serde_json::Value::Object(serde_json::Map::new()),
            enabled: true,
        }
    }
}

/// Partial update for an existing schedule. Only the cron fields and the
/// enabled flag can change; everything else identifies the job.
#[derive(Clone, Debug, Default)]
pub struct ScheduleChanges {
    pub year: Option<String>,
    pub month: Option<String>,
    pub day: Option<String>,
    pub day_of_week: Option<String>,
    pub hour: Option<String>,
    pub minute: Option<String>,
    pub enabled: Option<bool>,
}

impl ScheduleChanges {
    fn is_empty(&self) -> bool {
        self.year.is_none()
            && self.month.is_none()
            && self.day.is_none()
            && self.day_of_week.is_none()
            && self.hour.is_none()
            && self.minute.is_none()
            && self.enabled.is_none()
    }
}

const COLUMNS: &str = "id, search_id, job_id, func_name, year, month, day, day_of_week, hour, \
                       minute, args, kwargs, enabled, created_at, updated_at";

fn schedule_from_row(row: &Row) -> Result<ScheduleRow, StoreError> {
    let args = row
        .opt_text(10, "schedules", "args")?
        .map(|raw| parse_json(&raw, "schedules", "args"))
        .transpose()?
        .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
    let kwargs = row
        .opt_text(11, "schedules", "kwargs")?
        .map(|raw| parse_json(&raw, "schedules", "kwargs"))
        .transpose()?
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));

    Ok(ScheduleRow {
        id: row.integer(0, "schedules", "id")?,
        search_id: row.opt_integer(1, "schedules", "search_id")?,
        job_id: row.text(2, "schedules", "job_id")?,
        func_name: row.text(3, "schedules", "func_name")?,
        year: row.opt_text(4, "schedules", "year")?,
        month: row.opt_text(5, "schedules", "month")?,
        day: row.opt_text(6, "schedules", "day")?,
        day_of_week: row.opt_text(7, "schedules", "day_of_week")?,
        hour: row.opt_text(8, "schedules", "hour")?,
        minute: row.opt_text(9, "schedules", "minute")?,
        args,
        kwargs,
        enabled: row.boolean(12, "schedules", "enabled")?,
        created_at: row.text(13, "schedules", "created_at")?,
        updated_at: row.text(14, "schedules", "updated_at")?,
    })
}

pub struct ScheduleRepo {
    db: Database,
}

impl ScheduleRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a schedule and return its id. Job ids are unique.
    #[instrument(skip(self, schedule), fields(job_id = %schedule.job_id))]
    pub fn create(&self, schedule: &NewSchedule) -> Result<i64, StoreError> {
        let now = Utc::now().to_rfc3339();
        let args = serde_json::to_string(&schedule.args)?;
        let kwargs = serde_json::to_string(&schedule.kwargs)?;

        self.db.with_conn(|conn| {
            let row = conn
                .query_opt(
                    "INSERT INTO schedules \
                     (search_id, job_id, func_name, year, month, day, day_of_week, hour, minute, \
                      args, kwargs, enabled, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
                     RETURNING id",
                    &[
                        Value::from(schedule.search_id),
                        Value::from(schedule.job_id.as_str()),
                        Value::from(schedule.func_name.as_str()),
                        Value::from(schedule.year.clone()),
                        Value::from(schedule.month.clone()),
                        Value::from(schedule.day.clone()),
                        Value::from(schedule.day_of_week.clone()),
                        Value::from(schedule.hour.clone()),
                        Value::from(schedule.minute.clone()),
                        Value::from(args.clone()),
                        Value::from(kwargs.clone()),
                        Value::Bool(schedule.enabled),
                        Value::from(now.clone()),
                        Value::from(now.clone()),
                    ],
                )?
                .ok_or_else(|| StoreError::Database("INSERT returned no id".into()))?;
            row.integer(0, "schedules", "id")
        })
    }

    #[instrument(skip(self))]
    pub fn get_by_job_id(&self, job_id: &str) -> Result<Option<ScheduleRow>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_opt(
                &format!("SELECT {COLUMNS} FROM schedules WHERE job_id = $1"),
                &[Value::from(job_id)],
            )?
            .map(|row| schedule_from_row(&row))
            .transpose()
        })
    }

    #[instrument(skip(self))]
    pub fn get_by_search_id(&self, search_id: i64) -> Result<Option<ScheduleRow>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_opt(
                &format!("SELECT {COLUMNS} FROM schedules WHERE search_id = $1"),
                &[Value::Integer(search_id)],
            )?
            .map(|row| schedule_from_row(&row))
            .transpose()
        })
    }

    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<ScheduleRow>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query(&format!("SELECT {COLUMNS} FROM schedules ORDER BY id"), &[])?
                .iter()
                .map(schedule_from_row)
                .collect()
        })
    }

    /// Schedules the job runner should actually fire.
    #[instrument(skip(self))]
    pub fn list_enabled(&self) -> Result<Vec<ScheduleRow>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query(
                &format!("SELECT {COLUMNS} FROM schedules WHERE enabled = $1 ORDER BY id"),
                &[Value::Bool(true)],
            )?
            .iter()
            .map(schedule_from_row)
            .collect()
        })
    }

    /// Update the cron fields / enabled flag of the schedule attached to a
    /// search. Returns whether a row changed; an empty change set changes
    /// nothing.
    #[instrument(skip(self, changes))]
    pub fn update_by_search_id(
        &self,
        search_id: i64,
        changes: &ScheduleChanges,
    ) -> Result<bool, StoreError> {
        if changes.is_empty() {
            debug!(search_id, "no schedule fields to update");
            return Ok(false);
        }

        let now = Utc::now().to_rfc3339();
        let mut sql = String::from("UPDATE schedules SET ");
        let mut params: Vec<Value> = Vec::new();
        let mut first = true;

        let mut push = |sql: &mut String, params: &mut Vec<Value>, column: &str, value: Value| {
            if !first {
                sql.push_str(", ");
            }
            first = false;
            params.push(value);
            sql.push_str(&format!("{column} = ${}", params.len()));
        };

        if let Some(v) = &changes.year {
            push(&mut sql, &mut params, "year", Value::from(v.clone()));
        }
        if let Some(v) = &changes.month {
            push(&mut sql, &mut params, "month", Value::from(v.clone()));
        }
        if let Some(v) = &changes.day {
            push(&mut sql, &mut params, "day", Value::from(v.clone()));
        }
        if let Some(v) = &changes.day_of_week {
            push(&mut sql, &mut params, "day_of_week", Value::from(v.clone()));
        }
        if let Some(v) = &changes.hour {
            push(&mut sql, &mut params, "hour", Value::from(v.clone()));
        }
        if let Some(v) = &changes.minute {
            push(&mut sql, &mut params, "minute", Value::from(v.clone()));
        }
        if let Some(v) = changes.enabled {
            push(&mut sql, &mut params, "enabled", Value::Bool(v));
        }
        push(&mut sql, &mut params, "updated_at", Value::from(now.clone()));

        params.push(Value::Integer(search_id));
        sql.push_str(&format!(" WHERE search_id = ${}", params.len()));

        self.db.with_conn(|conn| {
            let updated = conn.execute(&sql, &params)?;
            Ok(updated > 0)
        })
    }

    #[instrument(skip(self))]
    pub fn delete_by_job_id(&self, job_id: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM schedules WHERE job_id = $1",
                &[Value::from(job_id)],
            )?;
            Ok(deleted > 0)
        })
    }

    #[instrument(skip(self))]
    pub fn delete_by_search_id(&self, search_id: i64) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM schedules WHERE search_id = $1",
                &[Value::Integer(search_id)],
            )?;
            Ok(deleted > 0)
        })
    }
}
