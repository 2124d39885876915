//! `dsm` - command-line front end for the pooled data-source manager

mod logging;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dsm_connection::{ConnectionManager, DataSourceSettings};
use dsm_core::Value;
use dsm_driver_sqlite::SqliteConnectionFactory;

#[derive(Debug, Parser)]
#[command(name = "dsm", version, about = "Pooled data-source manager")]
struct Cli {
    /// Settings file (defaults to <config dir>/dsm/datasource.toml)
    #[arg(long, global = true, env = "DSM_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the data source URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Override the driver
    #[arg(long, global = true)]
    driver: Option<String>,

    /// Write JSON logs, to DIR or the default log directory
    #[arg(long, global = true, value_name = "DIR")]
    json_logs: Option<Option<PathBuf>>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show pool bounds and connection counts
    Status {
        /// Open min_idle connections first
        #[arg(long)]
        warm: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a query and print its rows
    Query {
        sql: String,

        /// Positional parameter, repeatable
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a statement and print the affected row count
    Exec {
        sql: String,

        /// Positional parameter, repeatable
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
    },
}

/// Interpret a command-line parameter as the narrowest matching value
fn parse_param(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int64(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float64(f);
    }
    Value::String(raw.to_string())
}

fn load_settings(cli: &Cli) -> Result<DataSourceSettings> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => DataSourceSettings::default_path()
            .context("could not determine the config directory; pass --config")?,
    };

    let mut settings = DataSourceSettings::load_or_default(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    settings.apply_env();
    if let Some(url) = &cli.url {
        settings.datasource.url = url.clone();
    }
    if let Some(driver) = &cli.driver {
        settings.datasource.driver = driver.clone();
    }
    if settings.datasource.driver.is_empty() {
        settings.datasource.driver = "sqlite".to_string();
    }
    Ok(settings)
}

fn build_manager(settings: &DataSourceSettings) -> Result<ConnectionManager> {
    match settings.datasource.driver.to_ascii_lowercase().as_str() {
        "sqlite" => ConnectionManager::from_settings(SqliteConnectionFactory::new(), settings)
            .context("failed to create connection manager"),
        other => bail!("unsupported driver '{}' (available: sqlite)", other),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;
    let manager = build_manager(&settings)?;

    let outcome = run_command(&manager, cli.command).await;
    if let Err(e) = manager.close().await {
        tracing::warn!(error = %e, "failed to close connection manager cleanly");
    }
    outcome
}

async fn run_command(manager: &ConnectionManager, command: Command) -> Result<()> {
    match command {
        Command::Status { warm, json } => {
            if warm {
                let opened = manager.warm_up().await.context("failed to warm up pool")?;
                tracing::info!(opened, "pool warmed up");
            }
            let stats = manager.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", output::status_table(&stats, &manager.config()));
            }
        }
        Command::Query { sql, params, json } => {
            let params: Vec<Value> = params.iter().map(|p| parse_param(p)).collect();
            let mut session = manager.get_session().await?;
            let query = session.prepare(&sql).await?;
            let cursor = session.open_cursor(&query, &params).await?;
            let rows = session.fetch_all(&cursor).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&output::rows_json(&rows))?);
            } else {
                let columns = rows
                    .first()
                    .map(|row| row.columns().to_vec())
                    .unwrap_or_default();
                println!("{}", output::rows_table(&columns, &rows));
                println!("{} row(s)", rows.len());
            }
            session.close().await?;
        }
        Command::Exec { sql, params } => {
            let params: Vec<Value> = params.iter().map(|p| parse_param(p)).collect();
            let mut session = manager.get_session().await?;
            let stmt = session.prepare(&sql).await?;
            let affected = session.execute(&stmt, &params).await?;
            println!("{} row(s) affected", affected);
            session.close().await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = logging::LoggingConfig::default()
        .with_verbosity(cli.verbose)
        .with_json_logs(
            cli.json_logs
                .clone()
                .map(|dir| dir.unwrap_or_else(logging::log_directory)),
        );
    let _guard = logging::init(logging)?;

    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("42"), Value::Int64(42));
        assert_eq!(parse_param("2.5"), Value::Float64(2.5));
        assert_eq!(parse_param("true"), Value::Bool(true));
        assert_eq!(parse_param("NULL"), Value::Null);
        assert_eq!(parse_param("ada"), Value::from("ada"));
    }

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::try_parse_from([
            "dsm",
            "--url",
            ":memory:",
            "query",
            "SELECT ?1",
            "-p",
            "7",
            "--json",
        ])
        .expect("parse");

        assert_eq!(cli.url.as_deref(), Some(":memory:"));
        match cli.command {
            Command::Query { sql, params, json } => {
                assert_eq!(sql, "SELECT ?1");
                assert_eq!(params, vec!["7".to_string()]);
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_json_logs_optional_dir() {
        let cli = Cli::try_parse_from(["dsm", "status", "--json-logs"]).expect("parse");
        assert_eq!(cli.json_logs, Some(None));

        let cli = Cli::try_parse_from(["dsm", "status", "--json-logs", "/tmp/dsm"]).expect("parse");
        assert_eq!(cli.json_logs, Some(Some(PathBuf::from("/tmp/dsm"))));
    }

    #[test]
    fn test_unsupported_driver() {
        let mut settings = DataSourceSettings::default();
        settings.datasource.driver = "oracle".into();
        settings.datasource.url = "oracle://db".into();
        let err = build_manager(&settings).unwrap_err();
        assert!(err.to_string().contains("unsupported driver"));
    }

    #[tokio::test]
    async fn test_query_against_memory_database() {
        let mut settings = DataSourceSettings::default();
        settings.datasource.driver = "sqlite".into();
        settings.datasource.url = ":memory:".into();
        settings.pool = dsm_connection::PoolConfig::new(0, 1);

        let manager = build_manager(&settings).expect("manager");
        run_command(
            &manager,
            Command::Query {
                sql: "SELECT ?1 AS answer".into(),
                params: vec!["42".into()],
                json: false,
            },
        )
        .await
        .expect("query");
        assert_eq!(manager.status().idle(), 1);
        manager.close().await.expect("close");
    }
}
