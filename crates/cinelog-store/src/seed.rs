//! Default rows the application expects after bootstrap. Idempotent: each
//! row is created only if absent.

use tracing::{info, instrument};

use crate::database::Database;
use crate::error::StoreError;
use crate::schedules::{NewSchedule, ScheduleRepo};
use crate::searches::{NewSearch, SearchRepo};

/// Prompt for the built-in recently-watched search.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
Based on the media watched recently by {{ user }}, suggest {{ limit }} \
titles they have not seen. Exclude: {{ exclusions }}. For each suggestion \
give the title, the release year, and one sentence on why it fits.";

pub const RECENTLY_WATCHED_SEARCH_ID: i64 = 1;

/// Seed the default search and its schedules.
#[instrument(skip(db))]
pub fn ensure_defaults(db: &Database) -> Result<(), StoreError> {
    let searches = SearchRepo::new(db.clone());
    if searches.get(RECENTLY_WATCHED_SEARCH_ID)?.is_none() {
        searches.create(&NewSearch {
            id: Some(RECENTLY_WATCHED_SEARCH_ID),
            name: Some("recently_watched".to_string()),
            prompt: DEFAULT_PROMPT_TEMPLATE.to_string(),
            kwargs: None,
        })?;
        info!("seeded default recently_watched search");
    }

    let schedules = ScheduleRepo::new(db.clone());

    // Weekly suggestion run, off until the operator enables it.
    if schedules.get_by_job_id("recently_watched")?.is_none() {
        schedules.create(&NewSchedule {
            search_id: Some(RECENTLY_WATCHED_SEARCH_ID),
            job_id: "recently_watched".to_string(),
            func_name: "process_watch_history".to_string(),
            year: Some("*".to_string()),
            month: Some("*".to_string()),
            day: Some("*".to_string()),
            day_of_week: Some("sun".to_string()),
            hour: Some("0".to_string()),
            minute: Some("0".to_string()),
            enabled: false,
            ..NewSchedule::default()
        })?;
        info!("seeded recently_watched schedule");
    }

    // Nightly watch-history sync.
    if schedules.get_by_job_id("sync_watch_history")?.is_none() {
        schedules.create(&NewSchedule {
            job_id: "sync_watch_history".to_string(),
            func_name: "sync_watch_history".to_string(),
            year: Some("*".to_string()),
            month: Some("*".to_string()),
            day: Some("*".to_string()),
            day_of_week: Some("*".to_string()),
            hour: Some("3".to_string()),
            minute: Some("0".to_string()),
            enabled: true,
            ..NewSchedule::default()
        })?;
        info!("seeded sync_watch_history schedule");
    }

    Ok(())
}
