use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;

pub const DEFAULT_POSTGRES_PORT: u16 = 5432;
pub const DEFAULT_POSTGRES_DBNAME: &str = "cinelog";

/// The database engine behind a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Network-based primary backend.
    Postgres,
    /// File-based fallback backend.
    Sqlite,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown backend kind: {other}")),
        }
    }
}

/// Raw PostgreSQL settings as read from the environment. Validation is
/// deferred to [`PostgresConfig::resolve`] so a missing or malformed value
/// can select the fallback backend instead of failing startup.
#[derive(Clone, Debug, Default)]
pub struct PostgresConfig {
    pub host: Option<String>,
    pub port: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: Option<String>,
}

/// Fully validated PostgreSQL connection parameters.
#[derive(Clone, Debug)]
pub struct ResolvedPostgres {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl PostgresConfig {
    /// Validate that every required parameter is present and the port
    /// parses. The error names each missing variable so the operator can
    /// fix the environment without tracing through logs.
    pub fn resolve(&self) -> Result<ResolvedPostgres, StoreError> {
        let mut missing = Vec::new();
        if self.host.as_deref().map_or(true, str::is_empty) {
            missing.push("POSTGRES_HOST");
        }
        if self.user.as_deref().map_or(true, str::is_empty) {
            missing.push("POSTGRES_USER");
        }
        if self.password.as_deref().map_or(true, str::is_empty) {
            missing.push("POSTGRES_PASSWORD");
        }
        if self.dbname.as_deref().map_or(true, str::is_empty) {
            missing.push("POSTGRES_DBNAME");
        }
        if !missing.is_empty() {
            return Err(StoreError::Config(format!(
                "missing required PostgreSQL settings: {}",
                missing.join(", ")
            )));
        }

        let port = match self.port.as_deref() {
            None | Some("") => DEFAULT_POSTGRES_PORT,
            Some(raw) => raw.parse().map_err(|_| {
                StoreError::Config(format!("invalid POSTGRES_PORT: {raw:?}, must be an integer"))
            })?,
        };

        Ok(ResolvedPostgres {
            host: self.host.clone().unwrap_or_default(),
            port,
            user: self.user.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            dbname: self.dbname.clone().unwrap_or_default(),
        })
    }
}

/// Immutable database configuration, built once per process start.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// Backend the operator asked for. The effective backend may differ
    /// after the fallback policy has run.
    pub requested: BackendKind,
    pub data_dir: PathBuf,
    pub sqlite_path: PathBuf,
    pub postgres: PostgresConfig,
}

impl DatabaseConfig {
    /// Read configuration from the environment:
    /// `CINELOG_DATABASE` selects the backend (default `sqlite`),
    /// `CINELOG_DATA_DIR` the data directory, and the `POSTGRES_*`
    /// variables parameterize the primary backend.
    pub fn from_env() -> Self {
        let requested = match env_value("CINELOG_DATABASE") {
            None => BackendKind::Sqlite,
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!(error = %e, "CINELOG_DATABASE not recognized, using sqlite");
                BackendKind::Sqlite
            }),
        };

        let data_dir = env_value("CINELOG_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let sqlite_path = data_dir.join("cinelog.db");

        let postgres = PostgresConfig {
            host: env_value("POSTGRES_HOST"),
            port: env_value("POSTGRES_PORT"),
            user: env_value("POSTGRES_USER"),
            password: env_value("POSTGRES_PASSWORD"),
            dbname: env_value("POSTGRES_DBNAME")
                .or_else(|| Some(DEFAULT_POSTGRES_DBNAME.to_string())),
        };

        Self {
            requested,
            data_dir,
            sqlite_path,
            postgres,
        }
    }

    /// Where backup artifacts are written.
    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Fallback data dir for default paths.
fn default_data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".cinelog")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_postgres() -> PostgresConfig {
        PostgresConfig {
            host: Some("db.internal".into()),
            port: Some("5433".into()),
            user: Some("cinelog".into()),
            password: Some("secret".into()),
            dbname: Some("cinelog".into()),
        }
    }

    #[test]
    fn resolve_full_config() {
        let resolved = full_postgres().resolve().unwrap();
        assert_eq!(resolved.host, "db.internal");
        assert_eq!(resolved.port, 5433);
        assert_eq!(resolved.dbname, "cinelog");
    }

    #[test]
    fn resolve_defaults_port() {
        let mut config = full_postgres();
        config.port = None;
        assert_eq!(config.resolve().unwrap().port, DEFAULT_POSTGRES_PORT);
    }

    #[test]
    fn resolve_reports_each_missing_setting() {
        let config = PostgresConfig {
            host: None,
            port: None,
            user: Some("cinelog".into()),
            password: None,
            dbname: Some("cinelog".into()),
        };
        let err = config.resolve().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("POSTGRES_HOST"), "got: {message}");
        assert!(message.contains("POSTGRES_PASSWORD"), "got: {message}");
        assert!(!message.contains("POSTGRES_USER"), "got: {message}");
    }

    #[test]
    fn resolve_treats_empty_as_missing() {
        let mut config = full_postgres();
        config.dbname = Some(String::new());
        let err = config.resolve().unwrap_err();
        assert!(err.to_string().contains("POSTGRES_DBNAME"));
    }

    #[test]
    fn resolve_rejects_bad_port() {
        let mut config = full_postgres();
        config.port = Some("not-a-port".into());
        let err = config.resolve().unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
        assert!(err.to_string().contains("POSTGRES_PORT"));
    }

    #[test]
    fn backend_kind_round_trip() {
        assert_eq!("postgres".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert!("mysql".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Postgres.to_string(), "postgres");
    }
}
