//! Registry and discovery of versioned schema changes.
//!
//! Units are compiled in as a static list of `(name, upgrade fn)` pairs.
//! The name starts with a contiguous run of decimal digits giving the
//! unit's version (`0003_watch_history_flags`); new units are appended with
//! the next number. No migration unit may drop the `schema_version` table.

use tracing::warn;

use crate::config::BackendKind;
use crate::connect::Connection;
use crate::error::StoreError;

pub type UpgradeFn = fn(&mut SchemaEditor<'_>) -> Result<(), StoreError>;

/// One versioned package of schema-mutating operations.
#[derive(Clone, Copy)]
pub struct MigrationUnit {
    pub version: i64,
    pub name: &'static str,
    pub upgrade: UpgradeFn,
}

impl std::fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish()
    }
}

/// Schema-mutation context handed to upgrade procedures, bound to the
/// transaction the runner opened for the unit.
pub struct SchemaEditor<'a> {
    conn: &'a mut Connection,
}

impl<'a> SchemaEditor<'a> {
    pub(crate) fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    pub fn kind(&self) -> BackendKind {
        self.conn.kind()
    }

    /// Run raw DDL. Table and column names come from compiled-in units,
    /// never from user input.
    pub fn batch(&mut self, sql: &str) -> Result<(), StoreError> {
        self.conn.batch(sql)
    }

    pub fn add_column(&mut self, table: &str, definition: &str) -> Result<(), StoreError> {
        self.batch(&format!("ALTER TABLE {table} ADD COLUMN {definition}"))
    }

    /// Add a boolean column with the backend's native representation.
    pub fn add_bool_column(
        &mut self,
        table: &str,
        column: &str,
        default: bool,
    ) -> Result<(), StoreError> {
        let definition = match self.kind() {
            BackendKind::Sqlite => {
                format!("{column} INTEGER NOT NULL DEFAULT {}", i64::from(default))
            }
            BackendKind::Postgres => {
                format!("{column} BOOLEAN NOT NULL DEFAULT {default}")
            }
        };
        self.add_column(table, &definition)
    }

    pub fn create_index(
        &mut self,
        name: &str,
        table: &str,
        columns: &str,
    ) -> Result<(), StoreError> {
        self.batch(&format!(
            "CREATE INDEX IF NOT EXISTS {name} ON {table} ({columns})"
        ))
    }

    pub fn drop_table(&mut self, table: &str) -> Result<(), StoreError> {
        self.batch(&format!("DROP TABLE IF EXISTS {table}"))
    }
}

/// Historical schema changes, oldest first. A fresh database never replays
/// these: it is created in final shape and stamped to the newest version.
const REGISTRY: &[(&str, UpgradeFn)] = &[
    ("0001_media_ignored_flag", units::media_ignored_flag),
    ("0002_watch_history_processed", units::watch_history_processed),
    ("0003_search_kwargs", units::search_kwargs),
    ("0004_media_networks", units::media_networks),
];

/// Produce the ordered list of migration units.
///
/// Entries whose name has no parseable version prefix are skipped with a
/// warning. Two entries claiming the same version are a configuration
/// error and abort discovery.
pub fn discover() -> Result<Vec<MigrationUnit>, StoreError> {
    discover_from(REGISTRY)
}

fn discover_from(registry: &[(&'static str, UpgradeFn)]) -> Result<Vec<MigrationUnit>, StoreError> {
    let mut units = Vec::with_capacity(registry.len());
    for &(name, upgrade) in registry {
        let Some(version) = parse_version(name) else {
            warn!(unit = name, "skipping migration with unparseable version prefix");
            continue;
        };
        units.push(MigrationUnit {
            version,
            name,
            upgrade,
        });
    }

    units.sort_by_key(|u| u.version);
    for pair in units.windows(2) {
        if pair[0].version == pair[1].version {
            return Err(StoreError::Discovery(format!(
                "duplicate migration version {}: {} and {}",
                pair[0].version, pair[0].name, pair[1].name
            )));
        }
    }

    Ok(units)
}

/// Parse the leading run of decimal digits from a unit name. Versions are
/// compared as integers, so `0010_x` sorts after `0009_x`.
fn parse_version(name: &str) -> Option<i64> {
    let digits: String = name.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok().filter(|v| *v > 0)
}

mod units {
    use super::SchemaEditor;
    use crate::error::StoreError;

    pub(super) fn media_ignored_flag(editor: &mut SchemaEditor<'_>) -> Result<(), StoreError> {
        editor.add_bool_column("media", "ignored", false)?;
        editor.create_index("idx_media_ignored", "media", "ignored")
    }

    pub(super) fn watch_history_processed(
        editor: &mut SchemaEditor<'_>,
    ) -> Result<(), StoreError> {
        editor.add_bool_column("watch_history", "processed", false)?;
        editor.add_column("watch_history", "processed_at TEXT")?;
        editor.create_index("idx_watch_history_processed", "watch_history", "processed")
    }

    pub(super) fn search_kwargs(editor: &mut SchemaEditor<'_>) -> Result<(), StoreError> {
        editor.add_column("searches", "kwargs TEXT")
    }

    pub(super) fn media_networks(editor: &mut SchemaEditor<'_>) -> Result<(), StoreError> {
        editor.add_column("media", "networks TEXT")?;
        editor.create_index("idx_media_entity_type", "media", "entity_type")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_editor: &mut SchemaEditor<'_>) -> Result<(), StoreError> {
        Ok(())
    }

    #[test]
    fn registry_discovers_in_ascending_order() {
        let units = discover().unwrap();
        assert!(!units.is_empty());
        for pair in units.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
        assert_eq!(units[0].version, 1);
        assert_eq!(units[0].name, "0001_media_ignored_flag");
    }

    #[test]
    fn parse_version_cases() {
        assert_eq!(parse_version("0007_add_index"), Some(7));
        assert_eq!(parse_version("12"), Some(12));
        assert_eq!(parse_version("0010_ten"), Some(10));
        assert_eq!(parse_version("notes"), None);
        assert_eq!(parse_version("_0007_x"), None);
        assert_eq!(parse_version("0000_zero"), None);
    }

    #[test]
    fn unparseable_names_are_skipped() {
        let registry: &[(&str, UpgradeFn)] =
            &[("0002_second", noop), ("readme", noop), ("0001_first", noop)];
        let units = discover_from(registry).unwrap();
        let versions: Vec<i64> = units.iter().map(|u| u.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn empty_registry_discovers_empty() {
        let units = discover_from(&[]).unwrap();
        assert!(units.is_empty());
    }

    #[test]
    fn integer_ordering_not_lexicographic() {
        let registry: &[(&str, UpgradeFn)] = &[("10_ten", noop), ("9_nine", noop)];
        let units = discover_from(registry).unwrap();
        let versions: Vec<i64> = units.iter().map(|u| u.version).collect();
        assert_eq!(versions, vec![9, 10]);
    }

    #[test]
    fn duplicate_versions_are_rejected() {
        let registry: &[(&str, UpgradeFn)] =
            &[("0003_one_of_them", noop), ("3_the_other", noop)];
        let err = discover_from(registry).unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, StoreError::Discovery(_)));
        assert!(message.contains("0003_one_of_them"), "got: {message}");
        assert!(message.contains("3_the_other"), "got: {message}");
    }
}
