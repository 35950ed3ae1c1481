use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::time::Duration;
use tcache::{termination_signal, CacheClient, CacheConfig, CacheResult, LifecycleManager};
use tracing::{error, info, warn};
use tracing_appender::non_blocking;
// no EnvFilter feature; use a simple level switch via RUST_LOG

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[derive(Parser)]
#[command(name = "tcache")]
#[command(about = "Typed key-value cache client")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "demos/cache.yaml")]
    config: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum CliCommand {
    /// Check that the store answers
    Ping,
    Get {
        key: String,
    },
    Set {
        key: String,
        value: String,
        /// Expiry in seconds, 0 for none
        #[arg(long, default_value_t = 0)]
        ttl: u64,
    },
    Del {
        key: String,
    },
    Exists {
        key: String,
    },
    /// Seconds to live (-2 missing, -1 no expiry)
    Ttl {
        key: String,
    },
    Expire {
        key: String,
        seconds: u64,
    },
    Incr {
        key: String,
        #[arg(long, default_value_t = 1)]
        by: i64,
    },
    Decr {
        key: String,
        #[arg(long, default_value_t = 1)]
        by: i64,
    },
    Hget {
        key: String,
        field: String,
    },
    Hset {
        key: String,
        field: String,
        value: String,
    },
    /// Print every field of a hash as JSON
    Hgetall {
        key: String,
    },
    /// Pop the head of a list, waiting up to --timeout seconds (0 waits forever)
    Blpop {
        key: String,
        #[arg(long, default_value_t = 0)]
        timeout: u64,
    },
}

fn init_logging() {
    let (non_blocking_writer, guard) = non_blocking(std::io::stderr());
    // Keep guard alive for the program lifetime to avoid log loss
    let _ = LOG_GUARD.set(guard);

    let fmt = tracing_subscriber::fmt()
        .with_writer(non_blocking_writer)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .compact();

    // Map RUST_LOG to a max level (debug/info/warn/error/trace)
    let level = match std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "warn".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::WARN,
    };

    let _ = fmt.with_max_level(level).try_init();
}

const NIL: &str = "(nil)";

fn display_bytes(value: Option<Vec<u8>>) -> String {
    value
        .map(|data| String::from_utf8_lossy(&data).into_owned())
        .unwrap_or_else(|| NIL.to_string())
}

async fn run_command(client: &CacheClient, command: CliCommand) -> CacheResult<String> {
    let output = match command {
        CliCommand::Ping => {
            client.ping().await?;
            "PONG".to_string()
        }
        CliCommand::Get { key } => display_bytes(client.get(&key).await?),
        CliCommand::Set { key, value, ttl } => {
            client.set(&key, value, ttl).await?;
            "OK".to_string()
        }
        CliCommand::Del { key } => client.del(&key).await?.to_string(),
        CliCommand::Exists { key } => client.exists(&key).await?.to_string(),
        CliCommand::Ttl { key } => client.ttl(&key).await?.as_seconds().to_string(),
        CliCommand::Expire { key, seconds } => client.expire(&key, seconds).await?.to_string(),
        CliCommand::Incr { key, by } => client.incr_by(&key, by).await?.to_string(),
        CliCommand::Decr { key, by } => client.decr_by(&key, by).await?.to_string(),
        CliCommand::Hget { key, field } => display_bytes(client.hget(&key, &field).await?),
        CliCommand::Hset { key, field, value } => {
            client.hset(&key, &field, value).await?.to_string()
        }
        CliCommand::Hgetall { key } => {
            match client.hgetall::<BTreeMap<String, String>>(&key).await? {
                Some(fields) => serde_json::to_string_pretty(&fields)
                    .map_err(|e| tcache::CacheError::Encode(e.to_string()))?,
                None => NIL.to_string(),
            }
        }
        CliCommand::Blpop { key, timeout } => display_bytes(client.blpop(&key, timeout).await?),
    };
    Ok(output)
}

/// Run one command, racing it against `shutdown`. The pool is drained either way.
///
/// Returns `Ok(None)` when shutdown fired before the command finished.
async fn run_with_config_path_and_shutdown(
    config_path: &str,
    command: CliCommand,
    shutdown: impl std::future::Future<Output = ()> + Send,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let config = CacheConfig::from_yaml_file(config_path).await?;
    info!("Store: {} (db {})", config.addr, config.db);

    let client = CacheClient::new(&config)?;
    let lifecycle = LifecycleManager::new(
        client.pool().clone(),
        Duration::from_millis(config.shutdown_grace_ms),
    );

    let (output, report) = lifecycle.run(run_command(&client, command), shutdown).await;
    if !report.drained {
        warn!(
            "{} connection(s) abandoned during shutdown",
            report.abandoned
        );
    }

    match output {
        Some(Ok(text)) => Ok(Some(text)),
        Some(Err(e)) => {
            error!("Command failed: {}", e);
            Err(e.into())
        }
        None => {
            info!("Shutdown signal received");
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();
    if let Some(output) =
        run_with_config_path_and_shutdown(&args.config, args.command, termination_signal()).await?
    {
        println!("{}", output);
    }
    Ok(())
}
