//! Orchestrates the bootstrap migration pass.
//!
//! Runs once, synchronously, before anything else touches the database.
//! Each pending unit executes inside its own transaction and the recorded
//! version advances with the unit that produced it, so a crash or failure
//! leaves the database at the last successfully committed version.

use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::backup::{BackupGateway, BackupRequest};
use crate::config::DatabaseConfig;
use crate::connect::{Connection, ConstraintPolicy};
use crate::error::StoreError;
use crate::migrations::{MigrationUnit, SchemaEditor};
use crate::version;

/// Outcome of a migration pass.
#[derive(Clone, Debug)]
pub struct MigrationReport {
    pub from_version: i64,
    pub to_version: i64,
    /// The database was fresh and stamped straight to the latest version.
    pub stamped: bool,
    /// Versions applied, in order.
    pub applied: Vec<i64>,
    pub backup_artifact: Option<PathBuf>,
}

/// Bring the database to the latest discovered version.
///
/// A fresh database (recorded version 0) already has final-shape tables
/// from the base schema, so it is stamped straight to the newest unit
/// version instead of replaying history, which would re-apply column
/// additions. The pre-migration backup is best-effort: a failed backup is
/// logged and the run proceeds.
pub fn run(
    conn: &mut Connection,
    units: &[MigrationUnit],
    gateway: &dyn BackupGateway,
    config: &DatabaseConfig,
) -> Result<MigrationReport, StoreError> {
    let mut current = version::current(conn)?;
    let latest = units.last().map_or(0, |u| u.version);
    info!(current, latest, "resolved schema versions");

    let mut report = MigrationReport {
        from_version: current,
        to_version: current,
        stamped: false,
        applied: Vec::new(),
        backup_artifact: None,
    };

    if current == 0 && latest > 0 {
        version::record(conn, latest)?;
        current = latest;
        report.stamped = true;
        report.to_version = latest;
        info!(version = latest, "fresh database stamped to latest version");
    }

    let pending: Vec<&MigrationUnit> = units.iter().filter(|u| u.version > current).collect();
    if pending.is_empty() {
        debug!("no pending migrations");
        return Ok(report);
    }

    info!(pending = pending.len(), "applying pending migrations");

    let request = BackupRequest::system(config, conn.kind(), "pre-migration");
    match gateway.backup(&request) {
        Ok(artifact) => {
            info!(artifact = %artifact.display(), "database backed up before migrations");
            report.backup_artifact = Some(artifact);
        }
        Err(e) => {
            // Deliberate trade-off: a failed backup never blocks startup.
            warn!(error = %e, "pre-migration backup failed, continuing without one");
        }
    }

    let suspend = conn.constraint_policy() == ConstraintPolicy::SuspendForBulkDdl;

    for unit in pending {
        info!(version = unit.version, name = unit.name, "applying migration");

        // Structural rewrites transiently violate foreign keys on backends
        // without deferred checking. The pragma only takes effect outside a
        // transaction, so enforcement is switched around it, not inside it.
        if suspend {
            conn.set_constraints_enforced(false)?;
        }
        conn.begin()?;

        let result = apply_unit(conn, unit).and_then(|()| conn.commit());
        match result {
            Ok(()) => {
                if suspend {
                    conn.set_constraints_enforced(true)?;
                }
                report.applied.push(unit.version);
                report.to_version = unit.version;
                info!(version = unit.version, "migration applied");
            }
            Err(e) => {
                if let Err(rb) = conn.rollback() {
                    error!(error = %rb, "rollback failed");
                }
                if suspend {
                    if let Err(re) = conn.set_constraints_enforced(true) {
                        error!(error = %re, "failed to restore constraint enforcement");
                    }
                }
                error!(
                    version = unit.version,
                    error = %e,
                    "migration failed, aborting remaining units"
                );
                return Err(StoreError::Migration {
                    version: unit.version,
                    detail: e.to_string(),
                });
            }
        }
    }

    Ok(report)
}

fn apply_unit(conn: &mut Connection, unit: &MigrationUnit) -> Result<(), StoreError> {
    {
        let mut editor = SchemaEditor::new(conn);
        (unit.upgrade)(&mut editor)?;
    }
    // Recorded in the same transaction: the version is durable if and only
    // if the unit is.
    version::record(conn, unit.version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, PostgresConfig};
    use crate::connect::open_sqlite_in_memory;
    use crate::schema;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGateway {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingGateway {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl BackupGateway for CountingGateway {
        fn backup(&self, _request: &BackupRequest) -> Result<PathBuf, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(StoreError::Backup("simulated failure".into()))
            } else {
                Ok(PathBuf::from("/tmp/backup-artifact"))
            }
        }
    }

    fn test_conn() -> Connection {
        let mut conn = open_sqlite_in_memory().unwrap();
        schema::apply(&mut conn).unwrap();
        conn
    }

    fn test_config() -> DatabaseConfig {
        let dir = Path::new("/tmp/cinelog-runner-tests");
        DatabaseConfig {
            requested: BackendKind::Sqlite,
            data_dir: dir.to_owned(),
            sqlite_path: dir.join("cinelog.db"),
            postgres: PostgresConfig::default(),
        }
    }

    fn table_exists(conn: &mut Connection, name: &str) -> bool {
        conn.query_opt(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = $1",
            &[crate::value::Value::Text(name.into())],
        )
        .unwrap()
        .is_some()
    }

    fn create_table_x(editor: &mut SchemaEditor<'_>) -> Result<(), StoreError> {
        editor.batch("CREATE TABLE table_x (x INTEGER)")
    }

    fn add_column_y(editor: &mut SchemaEditor<'_>) -> Result<(), StoreError> {
        editor.batch("CREATE TABLE table_y (y INTEGER)")
    }

    fn add_index_z(editor: &mut SchemaEditor<'_>) -> Result<(), StoreError> {
        editor.batch("CREATE TABLE table_z (z INTEGER)")
    }

    fn partial_then_fail(editor: &mut SchemaEditor<'_>) -> Result<(), StoreError> {
        editor.batch("CREATE TABLE partial_table (p INTEGER)")?;
        Err(StoreError::Database("upgrade blew up".into()))
    }

    fn three_units() -> Vec<MigrationUnit> {
        vec![
            MigrationUnit {
                version: 1,
                name: "0001_create_table_x",
                upgrade: create_table_x,
            },
            MigrationUnit {
                version: 2,
                name: "0002_add_column_y",
                upgrade: add_column_y,
            },
            MigrationUnit {
                version: 3,
                name: "0003_add_index_z",
                upgrade: add_index_z,
            },
        ]
    }

    #[test]
    fn fresh_database_is_stamped_without_running_units() {
        let mut conn = test_conn();
        let gateway = CountingGateway::new();
        let report = run(&mut conn, &three_units(), &gateway, &test_config()).unwrap();

        assert!(report.stamped);
        assert_eq!(report.from_version, 0);
        assert_eq!(report.to_version, 3);
        assert!(report.applied.is_empty());
        assert_eq!(gateway.count(), 0);
        assert!(!table_exists(&mut conn, "table_x"));
        assert!(!table_exists(&mut conn, "table_y"));
        assert_eq!(version::current(&mut conn).unwrap(), 3);
    }

    #[test]
    fn pending_units_apply_in_order_with_one_backup() {
        let mut conn = test_conn();
        version::record(&mut conn, 1).unwrap();

        let gateway = CountingGateway::new();
        let report = run(&mut conn, &three_units(), &gateway, &test_config()).unwrap();

        assert!(!report.stamped);
        assert_eq!(report.from_version, 1);
        assert_eq!(report.to_version, 3);
        assert_eq!(report.applied, vec![2, 3]);
        assert_eq!(gateway.count(), 1);
        assert!(report.backup_artifact.is_some());
        assert!(!table_exists(&mut conn, "table_x"));
        assert!(table_exists(&mut conn, "table_y"));
        assert!(table_exists(&mut conn, "table_z"));
        assert_eq!(version::current(&mut conn).unwrap(), 3);
    }

    #[test]
    fn failure_rolls_back_unit_and_aborts_run() {
        let mut conn = test_conn();
        version::record(&mut conn, 1).unwrap();

        let units = vec![
            MigrationUnit {
                version: 2,
                name: "0002_partial_then_fail",
                upgrade: partial_then_fail,
            },
            MigrationUnit {
                version: 3,
                name: "0003_add_index_z",
                upgrade: add_index_z,
            },
        ];
        let gateway = CountingGateway::new();
        let err = run(&mut conn, &units, &gateway, &test_config()).unwrap_err();

        match err {
            StoreError::Migration { version, .. } => assert_eq!(version, 2),
            other => panic!("unexpected error: {other}"),
        }
        // The backup precedes any unit attempt.
        assert_eq!(gateway.count(), 1);
        // Rolled back: nothing from the failed unit survives, and the
        // version is exactly what it was before the unit started.
        assert!(!table_exists(&mut conn, "partial_table"));
        assert!(!table_exists(&mut conn, "table_z"));
        assert_eq!(version::current(&mut conn).unwrap(), 1);
        // Constraint enforcement restored on the failure path.
        let row = conn.query_opt("PRAGMA foreign_keys", &[]).unwrap().unwrap();
        assert_eq!(row.integer(0, "pragma", "foreign_keys").unwrap(), 1);
    }

    #[test]
    fn empty_unit_list_is_a_noop() {
        let mut conn = test_conn();
        let gateway = CountingGateway::new();
        let report = run(&mut conn, &[], &gateway, &test_config()).unwrap();

        assert!(!report.stamped);
        assert_eq!(report.to_version, 0);
        assert!(report.applied.is_empty());
        assert_eq!(gateway.count(), 0);
        assert_eq!(version::current(&mut conn).unwrap(), 0);
    }

    #[test]
    fn up_to_date_database_applies_nothing() {
        let mut conn = test_conn();
        version::record(&mut conn, 5).unwrap();

        let gateway = CountingGateway::new();
        let report = run(&mut conn, &three_units(), &gateway, &test_config()).unwrap();

        assert!(report.applied.is_empty());
        assert_eq!(report.to_version, 5);
        assert_eq!(gateway.count(), 0);
        assert_eq!(version::current(&mut conn).unwrap(), 5);
    }

    #[test]
    fn second_run_is_a_noop() {
        let mut conn = test_conn();
        version::record(&mut conn, 1).unwrap();
        let units = three_units();

        let gateway = CountingGateway::new();
        run(&mut conn, &units, &gateway, &test_config()).unwrap();
        let report = run(&mut conn, &units, &gateway, &test_config()).unwrap();

        assert!(report.applied.is_empty());
        assert!(!report.stamped);
        // Still exactly one backup, from the first run.
        assert_eq!(gateway.count(), 1);
        assert_eq!(version::current(&mut conn).unwrap(), 3);
    }

    #[test]
    fn backup_failure_does_not_block_migration() {
        let mut conn = test_conn();
        version::record(&mut conn, 1).unwrap();

        let gateway = CountingGateway::failing();
        let report = run(&mut conn, &three_units(), &gateway, &test_config()).unwrap();

        assert_eq!(gateway.count(), 1);
        assert!(report.backup_artifact.is_none());
        assert_eq!(report.applied, vec![2, 3]);
        assert_eq!(version::current(&mut conn).unwrap(), 3);
    }

    #[test]
    fn constraint_enforcement_restored_after_success() {
        let mut conn = test_conn();
        version::record(&mut conn, 2).unwrap();

        let gateway = CountingGateway::new();
        run(&mut conn, &three_units(), &gateway, &test_config()).unwrap();

        let row = conn.query_opt("PRAGMA foreign_keys", &[]).unwrap().unwrap();
        assert_eq!(row.integer(0, "pragma", "foreign_keys").unwrap(), 1);
    }
}
