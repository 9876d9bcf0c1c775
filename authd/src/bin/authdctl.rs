//! Administrative commands for authd: schema migrations and version info.

use authd::config::DatabaseConfig;
use authd::db;
use clap::{Parser, Subcommand};
use service_core::observability::init_tracing;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "authdctl", about = "authd administration", version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage the database schema
    Migrate {
        /// PostgreSQL connection string
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,

        #[command(subcommand)]
        direction: Direction,
    },
    /// Print the version
    Version,
}

#[derive(Debug, Subcommand)]
enum Direction {
    /// Apply all pending migrations
    Up,
    /// Revert the most recently applied migration
    Down,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing("authdctl", &cli.log_level, None) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "authdctl failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Version => {
            println!("authd {}", env!("CARGO_PKG_VERSION"));
            for (version, description) in db::known_migrations() {
                println!("  migration {version} {description}");
            }
        }
        Commands::Migrate {
            database_url,
            direction,
        } => {
            let pool = db::create_pool(&DatabaseConfig {
                url: database_url,
                max_connections: 1,
                min_connections: 1,
            })
            .await?;

            match direction {
                Direction::Up => db::run_migrations(&pool).await?,
                Direction::Down => match db::revert_last_migration(&pool).await? {
                    Some(version) => println!("reverted migration {version}"),
                    None => println!("no migrations to revert"),
                },
            }

            pool.close().await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_migrate_down() {
        let cli = Cli::try_parse_from([
            "authdctl",
            "migrate",
            "--database-url",
            "postgres://localhost/authd",
            "down",
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Commands::Migrate {
                direction: Direction::Down,
                ..
            }
        ));
    }
}
