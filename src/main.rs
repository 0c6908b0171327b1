use anyhow::Context;
use clap::{Parser, Subcommand};

use cinelog_store::backup::BackupRequest;
use cinelog_store::{connect, migrations, schema, seed, version};
use cinelog_store::{BackupGateway, Database, DatabaseConfig, LocalBackupGateway};
use cinelog_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "cinelog", about = "Media watchlist server", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap the database: select a backend, migrate, seed defaults.
    Migrate,
    /// Show the effective backend and schema version state.
    Status,
    /// Take a backup of the database.
    Backup {
        #[arg(long, default_value = "manual")]
        label: String,
    },
}

fn main() -> anyhow::Result<()> {
    init_telemetry(&TelemetryConfig::default());

    let cli = Cli::parse();
    let config = DatabaseConfig::from_env();
    let gateway = LocalBackupGateway::new(config.backups_dir());

    match cli.command.unwrap_or(Command::Migrate) {
        Command::Migrate => {
            let (db, report) =
                Database::open(&config, &gateway).context("database bootstrap failed")?;
            seed::ensure_defaults(&db).context("seeding defaults failed")?;
            tracing::info!(
                backend = %db.kind(),
                from = report.from_version,
                to = report.to_version,
                stamped = report.stamped,
                applied = report.applied.len(),
                "bootstrap complete"
            );
        }
        Command::Status => {
            let mut conn = connect::bootstrap(&config).context("connection failed")?;
            schema::apply(&mut conn)?;
            let current = version::current(&mut conn)?;
            let units = migrations::discover()?;
            let latest = units.last().map_or(0, |u| u.version);
            let pending = units.iter().filter(|u| u.version > current).count();
            println!("backend:  {}", conn.kind());
            println!("version:  {current}");
            println!("latest:   {latest}");
            println!("pending:  {pending}");
        }
        Command::Backup { label } => {
            let conn = connect::bootstrap(&config).context("connection failed")?;
            let request = BackupRequest::user(&config, conn.kind(), &label);
            // Release the handle before copying the database file.
            drop(conn);
            let artifact = gateway.backup(&request).context("backup failed")?;
            println!("backup written to {}", artifact.display());
        }
    }

    Ok(())
}
