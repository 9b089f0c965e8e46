//! dbpool: run statements through a connection pool
//!
//! # Usage
//!
//! ```bash
//! # Run a query with the pool from ~/.config/dbpool/pool.toml
//! dbpool query "SELECT id, name FROM users WHERE id = ?" --param 42
//!
//! # Explicit connection, JSON output
//! dbpool --driver sqlite --database :memory: query "SELECT 1 AS one" --format json
//!
//! # Reconnect every idle connection
//! dbpool reconnect --timeout 5
//! ```

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use dbpool::prelude::*;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dbpool")]
#[command(version)]
#[command(about = "Run SQL through a fixed-size connection pool", long_about = None)]
#[command(after_help = "EXAMPLES:
    dbpool query 'SELECT * FROM users WHERE id = ?' --param 7
    dbpool --pool-size 8 query 'DELETE FROM sessions WHERE expired'
    dbpool reconnect --timeout 5")]
struct Cli {
    /// Pool configuration file (TOML)
    #[arg(short, long, env = "DBPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Database driver (postgres, mysql, sqlite)
    #[arg(long, env = "DBPOOL_DRIVER")]
    driver: Option<String>,

    #[arg(long, env = "DBPOOL_USER")]
    user: Option<String>,

    #[arg(long, env = "DBPOOL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long, env = "DBPOOL_SERVER")]
    server: Option<String>,

    #[arg(long, env = "DBPOOL_PORT")]
    port: Option<u16>,

    #[arg(long, env = "DBPOOL_DATABASE")]
    database: Option<String>,

    /// Number of connections (and workers)
    #[arg(long, env = "DBPOOL_POOL_SIZE", allow_negative_numbers = true)]
    pool_size: Option<i32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one statement
    Query {
        sql: String,

        /// Positional parameter: null, true/false, a number, a date, a timestamp or text
        #[arg(short, long = "param")]
        params: Vec<String>,

        #[arg(short, long, value_enum, default_value = "lines")]
        format: OutputFormat,
    },
    /// Reconnect every idle connection
    Reconnect {
        /// Connect timeout in seconds (0 = driver default)
        #[arg(short, long, default_value_t = 0)]
        timeout: u64,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Lines,
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let pool = DatabasePool::create_sync(&AnyDriver, &config)
        .map_err(|kind| anyhow::anyhow!("Failed to create pool: {}", kind))?;

    match &cli.command {
        Commands::Query {
            sql,
            params,
            format,
        } => {
            let params: Vec<Value> = params.iter().map(|p| parse_literal(p)).collect();
            let (kind, result) = pool.query_sync(sql, &params);
            if kind.is_err() {
                bail!("Query failed: {}", kind);
            }
            print_result(&result, format)?;
        }
        Commands::Reconnect { timeout } => {
            let (report, kind) = pool.reconnect_sync(Duration::from_secs(*timeout));
            println!(
                "{} reconnected, {} skipped, {} failed",
                report.reconnected.to_string().green(),
                report.skipped.to_string().yellow(),
                report.failed.to_string().red()
            );
            if kind.is_err() {
                bail!("No connection could be reconnected");
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<PoolConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| PoolConfig::default_path().filter(|p| p.exists()));

    let mut config = match path {
        Some(path) => PoolConfig::from_file(&path)
            .with_context(|| format!("Loading {}", path.display()))?,
        None => PoolConfig::default(),
    };

    if let Some(driver) = &cli.driver {
        config.driver = driver.clone();
    }
    if let Some(user) = &cli.user {
        config.user = user.clone();
    }
    if let Some(password) = &cli.password {
        config.password = password.clone();
    }
    if let Some(server) = &cli.server {
        config.server = server.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if let Some(size) = cli.pool_size {
        config.pool_size = size;
    }

    Ok(config)
}

/// Parse a command line parameter into a bind value.
fn parse_literal(literal: &str) -> Value {
    match literal {
        "null" | "NULL" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    if let Ok(n) = literal.parse::<i32>() {
        Value::Int32(n)
    } else if let Ok(n) = literal.parse::<i64>() {
        Value::Int64(n)
    } else if let Ok(f) = literal.parse::<f64>() {
        Value::Double(f)
    } else if let Ok(ts) = literal.parse::<Timestamp>() {
        Value::Timestamp(ts)
    } else if let Ok(date) = literal.parse::<Date>() {
        Value::Date(date)
    } else {
        Value::String(literal.to_string())
    }
}

fn print_result(result: &QueryResult, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Lines => {
            if result.column_count() == 0 {
                println!("{} {} rows affected", "✓".green(), result.affected_rows());
                return Ok(());
            }

            println!("{}", result.columns().join("\t").white().bold());
            for row in result.rows() {
                let cells: Vec<String> = row.iter().map(Value::to_string).collect();
                println!("{}", cells.join("\t"));
            }
            println!();
            println!("{} row(s) returned", result.row_count().to_string().cyan());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal() {
        assert_eq!(parse_literal("null"), Value::Null);
        assert_eq!(parse_literal("true"), Value::Bool(true));
        assert_eq!(parse_literal("42"), Value::Int32(42));
        assert_eq!(parse_literal("8589934592"), Value::Int64(8589934592));
        assert_eq!(parse_literal("2.5"), Value::Double(2.5));
        assert_eq!(parse_literal("2024-03-01"), Value::Date(Date::new(2024, 3, 1)));
        assert_eq!(
            parse_literal("2024-03-01 10:20:30"),
            Value::Timestamp(Timestamp::new(2024, 3, 1, 10, 20, 30))
        );
        assert_eq!(parse_literal("ada"), Value::String("ada".into()));
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "dbpool",
            "--driver",
            "sqlite",
            "--database",
            ":memory:",
            "--pool-size",
            "2",
            "query",
            "SELECT 1",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.driver, "sqlite");
        assert_eq!(config.pool_size, 2);
        assert!(config.connection_string().contains("DATABASE=:memory:"));
    }
}
