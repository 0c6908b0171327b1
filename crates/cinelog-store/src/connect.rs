use std::path::Path;
use std::time::Duration;

use postgres::error::SqlState;
use tracing::{error, info, warn};

use crate::config::{BackendKind, DatabaseConfig, ResolvedPostgres};
use crate::error::StoreError;
use crate::schema;
use crate::value::{row_from_postgres, row_from_sqlite, Row, Value};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How a backend expects referential integrity to be handled around bulk
/// schema changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintPolicy {
    /// Constraint checks ride inside the transaction untouched.
    DeferredWithinTransaction,
    /// Enforcement must be switched off around structural rewrites and
    /// switched back on afterwards.
    SuspendForBulkDdl,
}

/// A live connection to the effective backend. Single-owner; the migration
/// runner holds it exclusively until bootstrap finishes, after which it is
/// wrapped by [`crate::database::Database`].
pub struct Connection {
    backend: Backend,
    kind: BackendKind,
}

enum Backend {
    Sqlite(rusqlite::Connection),
    Postgres(postgres::Client),
}

impl Connection {
    /// The backend actually in use, which may differ from the one requested.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn constraint_policy(&self) -> ConstraintPolicy {
        match self.kind {
            BackendKind::Postgres => ConstraintPolicy::DeferredWithinTransaction,
            BackendKind::Sqlite => ConstraintPolicy::SuspendForBulkDdl,
        }
    }

    /// Execute a statement, returning the affected row count.
    ///
    /// Placeholders are written `$1..$n`, each used once in ascending
    /// order: PostgreSQL binds them by number, and SQLite assigns named
    /// parameters indexes in order of first occurrence, so both drivers
    /// end up binding positionally.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, StoreError> {
        match &mut self.backend {
            Backend::Sqlite(conn) => {
                let n = conn.execute(sql, rusqlite::params_from_iter(params.iter()))?;
                Ok(n as u64)
            }
            Backend::Postgres(client) => {
                let refs: Vec<&(dyn postgres::types::ToSql + Sync)> =
                    params.iter().map(|p| p as _).collect();
                Ok(client.execute(sql, &refs)?)
            }
        }
    }

    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, StoreError> {
        match &mut self.backend {
            Backend::Sqlite(conn) => {
                let mut stmt = conn.prepare(sql)?;
                let ncols = stmt.column_count();
                let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_from_sqlite(row, ncols)?);
                }
                Ok(out)
            }
            Backend::Postgres(client) => {
                let refs: Vec<&(dyn postgres::types::ToSql + Sync)> =
                    params.iter().map(|p| p as _).collect();
                client
                    .query(sql, &refs)?
                    .iter()
                    .map(row_from_postgres)
                    .collect()
            }
        }
    }

    pub fn query_opt(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>, StoreError> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Run a batch of semicolon-separated statements with no parameters.
    pub fn batch(&mut self, sql: &str) -> Result<(), StoreError> {
        match &mut self.backend {
            Backend::Sqlite(conn) => Ok(conn.execute_batch(sql)?),
            Backend::Postgres(client) => Ok(client.batch_execute(sql)?),
        }
    }

    // Transaction control is issued as plain statements so one transaction
    // can span the schema editor and the version store.
    pub fn begin(&mut self) -> Result<(), StoreError> {
        self.batch("BEGIN")
    }

    pub fn commit(&mut self) -> Result<(), StoreError> {
        self.batch("COMMIT")
    }

    pub fn rollback(&mut self) -> Result<(), StoreError> {
        self.batch("ROLLBACK")
    }

    /// Switch referential-integrity enforcement on the fallback backend.
    /// SQLite ignores the pragma while a transaction is open, so callers
    /// must flip it outside one. A no-op on backends whose policy is
    /// [`ConstraintPolicy::DeferredWithinTransaction`].
    pub fn set_constraints_enforced(&mut self, enforced: bool) -> Result<(), StoreError> {
        match &mut self.backend {
            Backend::Sqlite(conn) => Ok(conn.pragma_update(None, "foreign_keys", enforced)?),
            Backend::Postgres(_) => Ok(()),
        }
    }
}

/// Select a backend and return a live connection.
///
/// Never returns a primary-selected-but-unconnected state: any recoverable
/// primary failure (missing parameters, unreachable server, failed database
/// creation) lands on the fallback, and only a fallback open failure is
/// fatal. Repeated calls with unchanged inputs are idempotent.
pub fn bootstrap(config: &DatabaseConfig) -> Result<Connection, StoreError> {
    if config.requested == BackendKind::Postgres {
        match config.postgres.resolve() {
            Ok(params) => match connect_postgres(&params) {
                Ok(client) => {
                    info!(
                        host = %params.host,
                        port = params.port,
                        dbname = %params.dbname,
                        "connected to PostgreSQL"
                    );
                    return Ok(Connection {
                        backend: Backend::Postgres(client),
                        kind: BackendKind::Postgres,
                    });
                }
                Err(e) => {
                    error!(error = %e, "PostgreSQL unavailable, falling back to SQLite");
                }
            },
            Err(e) => {
                // No connection attempt is made when parameters are missing.
                error!(error = %e, "PostgreSQL selected but not fully configured, falling back to SQLite");
            }
        }
    }
    open_sqlite(&config.sqlite_path)
}

fn connect_postgres(params: &ResolvedPostgres) -> Result<postgres::Client, StoreError> {
    match try_connect(params, &params.dbname) {
        Ok(client) => Ok(client),
        Err(e) if is_missing_database(&e) => {
            warn!(dbname = %params.dbname, "database does not exist, creating it");
            create_database(params)?;
            try_connect(params, &params.dbname)
                .map_err(|retry| StoreError::Connection(retry.to_string()))
        }
        Err(e) => Err(StoreError::Connection(e.to_string())),
    }
}

fn try_connect(params: &ResolvedPostgres, dbname: &str) -> Result<postgres::Client, postgres::Error> {
    postgres::Config::new()
        .host(&params.host)
        .port(params.port)
        .user(&params.user)
        .password(&params.password)
        .dbname(dbname)
        .connect_timeout(CONNECT_TIMEOUT)
        .connect(postgres::NoTls)
}

fn is_missing_database(e: &postgres::Error) -> bool {
    e.code() == Some(&SqlState::INVALID_CATALOG_NAME)
}

/// Create the target database from a maintenance connection to the
/// well-known `postgres` database. Creating an already-existing database is
/// treated as success so repeated bootstraps stay idempotent.
fn create_database(params: &ResolvedPostgres) -> Result<(), StoreError> {
    let mut maintenance = try_connect(params, "postgres")
        .map_err(|e| StoreError::DatabaseCreation(format!("maintenance connection: {e}")))?;
    let stmt = format!(
        "CREATE DATABASE \"{}\"",
        params.dbname.replace('"', "\"\"")
    );
    let result = maintenance.batch_execute(&stmt);
    drop(maintenance);
    match result {
        Ok(()) => {
            info!(dbname = %params.dbname, "created database");
            Ok(())
        }
        Err(e) if e.code() == Some(&SqlState::DUPLICATE_DATABASE) => Ok(()),
        Err(e) => Err(StoreError::DatabaseCreation(e.to_string())),
    }
}

/// Open (or create) the file-backed fallback with durability-oriented
/// settings. Failure here is fatal: there is no further fallback.
fn open_sqlite(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Io(format!("create {}: {e}", parent.display())))?;
    }

    let conn = rusqlite::Connection::open(path)
        .map_err(|e| StoreError::Connection(format!("open {}: {e}", path.display())))?;
    conn.execute_batch(schema::SQLITE_PRAGMAS)
        .map_err(|e| StoreError::Connection(format!("pragmas: {e}")))?;

    info!(path = %path.display(), "opened SQLite database");

    Ok(Connection {
        backend: Backend::Sqlite(conn),
        kind: BackendKind::Sqlite,
    })
}

/// In-memory SQLite connection for tests.
pub(crate) fn open_sqlite_in_memory() -> Result<Connection, StoreError> {
    let conn = rusqlite::Connection::open_in_memory()
        .map_err(|e| StoreError::Connection(e.to_string()))?;
    conn.execute_batch(schema::SQLITE_PRAGMAS)
        .map_err(|e| StoreError::Connection(format!("pragmas: {e}")))?;
    Ok(Connection {
        backend: Backend::Sqlite(conn),
        kind: BackendKind::Sqlite,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostgresConfig;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cinelog-connect-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sqlite_config(dir: &Path) -> DatabaseConfig {
        DatabaseConfig {
            requested: BackendKind::Sqlite,
            data_dir: dir.to_owned(),
            sqlite_path: dir.join("cinelog.db"),
            postgres: PostgresConfig::default(),
        }
    }

    #[test]
    fn bootstrap_opens_sqlite() {
        let dir = temp_dir();
        let conn = bootstrap(&sqlite_config(&dir)).unwrap();
        assert_eq!(conn.kind(), BackendKind::Sqlite);
        assert!(dir.join("cinelog.db").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bootstrap_creates_parent_directories() {
        let dir = temp_dir();
        let mut config = sqlite_config(&dir);
        config.sqlite_path = dir.join("nested/deeper/cinelog.db");
        let conn = bootstrap(&config).unwrap();
        assert_eq!(conn.kind(), BackendKind::Sqlite);
        assert!(config.sqlite_path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_primary_parameters_fall_back_without_connecting() {
        // Host/user/password absent: resolve() fails before any network
        // attempt, so this returns quickly with a SQLite connection.
        let dir = temp_dir();
        let mut config = sqlite_config(&dir);
        config.requested = BackendKind::Postgres;
        let conn = bootstrap(&config).unwrap();
        assert_eq!(conn.kind(), BackendKind::Sqlite);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn wal_mode_enabled_on_file_database() {
        let dir = temp_dir();
        let mut conn = bootstrap(&sqlite_config(&dir)).unwrap();
        let row = conn.query_opt("PRAGMA journal_mode", &[]).unwrap().unwrap();
        let mode = row.text(0, "pragma", "journal_mode").unwrap();
        assert_eq!(mode, "wal");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn constraint_policy_by_backend() {
        let conn = open_sqlite_in_memory().unwrap();
        assert_eq!(conn.constraint_policy(), ConstraintPolicy::SuspendForBulkDdl);
    }

    #[test]
    fn placeholders_bind_positionally() {
        let mut conn = open_sqlite_in_memory().unwrap();
        conn.batch("CREATE TABLE t (a INTEGER, b TEXT)").unwrap();
        conn.execute(
            "INSERT INTO t (a, b) VALUES ($1, $2)",
            &[Value::Integer(42), Value::Text("answer".into())],
        )
        .unwrap();
        let row = conn
            .query_opt("SELECT a, b FROM t WHERE a = $1", &[Value::Integer(42)])
            .unwrap()
            .unwrap();
        assert_eq!(row.integer(0, "t", "a").unwrap(), 42);
        assert_eq!(row.text(1, "t", "b").unwrap(), "answer");
    }

    #[test]
    fn constraint_toggle_round_trips() {
        let mut conn = open_sqlite_in_memory().unwrap();
        conn.set_constraints_enforced(false).unwrap();
        let row = conn.query_opt("PRAGMA foreign_keys", &[]).unwrap().unwrap();
        assert_eq!(row.integer(0, "pragma", "foreign_keys").unwrap(), 0);
        conn.set_constraints_enforced(true).unwrap();
        let row = conn.query_opt("PRAGMA foreign_keys", &[]).unwrap().unwrap();
        assert_eq!(row.integer(0, "pragma", "foreign_keys").unwrap(), 1);
    }

    #[test]
    fn transaction_rollback_discards_changes() {
        let mut conn = open_sqlite_in_memory().unwrap();
        conn.batch("CREATE TABLE t (a INTEGER)").unwrap();
        conn.begin().unwrap();
        conn.execute("INSERT INTO t (a) VALUES ($1)", &[Value::Integer(1)])
            .unwrap();
        conn.rollback().unwrap();
        assert!(conn.query_opt("SELECT a FROM t", &[]).unwrap().is_none());
    }
}
