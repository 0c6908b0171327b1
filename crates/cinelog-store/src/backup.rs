use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use tracing::info;

use crate::config::{BackendKind, DatabaseConfig};
use crate::error::StoreError;

/// A point-in-time backup request. Ephemeral; built fresh per call from a
/// snapshot of the connection configuration.
#[derive(Clone, Debug)]
pub struct BackupRequest {
    pub config: DatabaseConfig,
    /// The backend actually in use, which decides the backup mechanism.
    pub effective: BackendKind,
    pub label: String,
    /// True for backups the migration runner triggers on its own, false for
    /// operator-requested ones.
    pub system_triggered: bool,
}

impl BackupRequest {
    pub fn system(config: &DatabaseConfig, effective: BackendKind, label: &str) -> Self {
        Self {
            config: config.clone(),
            effective,
            label: label.to_string(),
            system_triggered: true,
        }
    }

    pub fn user(config: &DatabaseConfig, effective: BackendKind, label: &str) -> Self {
        Self {
            config: config.clone(),
            effective,
            label: label.to_string(),
            system_triggered: false,
        }
    }
}

/// Produces a point-in-time backup artifact before destructive schema
/// changes. The migration runner depends only on this contract.
pub trait BackupGateway {
    fn backup(&self, request: &BackupRequest) -> Result<PathBuf, StoreError>;
}

/// Writes backups under a local directory: a file copy for SQLite, a
/// `pg_dump` run for PostgreSQL.
pub struct LocalBackupGateway {
    backup_dir: PathBuf,
}

impl LocalBackupGateway {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    fn artifact_path(&self, request: &BackupRequest) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let origin = if request.system_triggered { "system" } else { "user" };
        let extension = match request.effective {
            BackendKind::Sqlite => "db",
            BackendKind::Postgres => "sql",
        };
        self.backup_dir
            .join(format!("{}-{origin}-{stamp}.{extension}", request.label))
    }

    fn copy_sqlite(&self, source: &Path, target: &Path) -> Result<(), StoreError> {
        std::fs::copy(source, target).map_err(|e| {
            StoreError::Backup(format!("copy {} to {}: {e}", source.display(), target.display()))
        })?;
        Ok(())
    }

    fn dump_postgres(&self, request: &BackupRequest, target: &Path) -> Result<(), StoreError> {
        let params = request
            .config
            .postgres
            .resolve()
            .map_err(|e| StoreError::Backup(e.to_string()))?;
        let status = Command::new("pg_dump")
            .arg("--host")
            .arg(&params.host)
            .arg("--port")
            .arg(params.port.to_string())
            .arg("--username")
            .arg(&params.user)
            .arg("--dbname")
            .arg(&params.dbname)
            .arg("--file")
            .arg(target)
            .env("PGPASSWORD", &params.password)
            .status()
            .map_err(|e| StoreError::Backup(format!("spawn pg_dump: {e}")))?;
        if !status.success() {
            return Err(StoreError::Backup(format!("pg_dump exited with {status}")));
        }
        Ok(())
    }
}

impl BackupGateway for LocalBackupGateway {
    fn backup(&self, request: &BackupRequest) -> Result<PathBuf, StoreError> {
        std::fs::create_dir_all(&self.backup_dir)
            .map_err(|e| StoreError::Backup(format!("create {}: {e}", self.backup_dir.display())))?;

        let target = self.artifact_path(request);
        match request.effective {
            BackendKind::Sqlite => self.copy_sqlite(&request.config.sqlite_path, &target)?,
            BackendKind::Postgres => self.dump_postgres(request, &target)?,
        }

        info!(
            artifact = %target.display(),
            system = request.system_triggered,
            "backup written"
        );
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostgresConfig;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cinelog-backup-{}", uuid::Uuid::now_v7()));
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
    fn sqlite_backup_copies_the_file() {
        let dir = temp_dir();
        let config = sqlite_config(&dir);
        std::fs::write(&config.sqlite_path, b"database bytes").unwrap();

        let gateway = LocalBackupGateway::new(config.backups_dir());
        let request = BackupRequest::system(&config, BackendKind::Sqlite, "pre-migration");
        let artifact = gateway.backup(&request).unwrap();

        assert!(artifact.exists());
        assert_eq!(std::fs::read(&artifact).unwrap(), b"database bytes");
        let name = artifact.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("pre-migration-system-"), "got: {name}");
        assert!(name.ends_with(".db"), "got: {name}");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn user_backup_is_labelled_user() {
        let dir = temp_dir();
        let config = sqlite_config(&dir);
        std::fs::write(&config.sqlite_path, b"x").unwrap();

        let gateway = LocalBackupGateway::new(config.backups_dir());
        let request = BackupRequest::user(&config, BackendKind::Sqlite, "manual");
        let artifact = gateway.backup(&request).unwrap();
        let name = artifact.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("manual-user-"), "got: {name}");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_source_file_is_a_backup_error() {
        let dir = temp_dir();
        let config = sqlite_config(&dir);
        let gateway = LocalBackupGateway::new(config.backups_dir());
        let request = BackupRequest::system(&config, BackendKind::Sqlite, "pre-migration");
        let err = gateway.backup(&request).unwrap_err();
        assert!(matches!(err, StoreError::Backup(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
