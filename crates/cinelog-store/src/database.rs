use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::backup::BackupGateway;
use crate::config::{BackendKind, DatabaseConfig};
use crate::connect::{self, Connection};
use crate::error::StoreError;
use crate::migrations;
use crate::runner::{self, MigrationReport};
use crate::schema;
use crate::version;

/// Thread-safe handle to the bootstrapped connection.
///
/// Constructed only after the migration sequence has returned successfully,
/// so nothing else in the application can reach the connection earlier.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    kind: BackendKind,
}

impl Database {
    /// Bootstrap a connection, apply the base schema, and bring the
    /// database to the latest migration version.
    pub fn open(
        config: &DatabaseConfig,
        gateway: &dyn BackupGateway,
    ) -> Result<(Self, MigrationReport), StoreError> {
        let mut conn = connect::bootstrap(config)?;
        schema::apply(&mut conn)?;
        let units = migrations::discover()?;
        let report = runner::run(&mut conn, &units, gateway, config)?;

        let kind = conn.kind();
        info!(backend = %kind, version = report.to_version, "database ready");

        Ok((
            Self {
                conn: Arc::new(Mutex::new(conn)),
                kind,
            },
            report,
        ))
    }

    /// In-memory SQLite database with the final schema, stamped to the
    /// latest version (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let mut conn = connect::open_sqlite_in_memory()?;
        schema::apply(&mut conn)?;
        let units = migrations::discover()?;
        let latest = units.last().map_or(0, |u| u.version);
        version::record(&mut conn, latest)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            kind: BackendKind::Sqlite,
        })
    }

    /// The backend actually in use after the fallback policy has run.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Execute a closure with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            kind: self.kind,
        }
    }
}
