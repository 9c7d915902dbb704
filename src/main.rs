//! DB Pool Cluster - command line harness.
//!
//! Runs one parameterized statement against the configured nodes and prints the result as JSON.

use clap::Parser;
use db_pool_cluster::config::Config;
use db_pool_cluster::{Database, DbError, DbResult, QueryExecutor};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only the result
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(config: &Config) -> DbResult<serde_json::Value> {
    let cluster = config.cluster_config()?;
    if cluster.is_empty() {
        return Err(DbError::configuration(
            "At least one node must be configured (--node name=url or --config file.json)",
        ));
    }
    let params = config.query_params()?;

    let db = Database::with_policy(cluster, config.policy)
        .with_executor(QueryExecutor::with_default_timeout(config.timeout_ms));
    let established = db.establish().await?;
    info!(established, policy = %config.policy, "Pool cluster ready");

    let result = match &config.target {
        Some(node) => {
            let mut handle = db.get_connection_from(node).await?;
            let result = db
                .query_with_connection(&mut handle, &config.sql, &params, None)
                .await;
            handle.release();
            result
        }
        None => db.query(&config.sql, &params, None).await,
    };
    db.close().await;

    let result = result?;
    let value = if result.is_rows() {
        serde_json::to_value(result.into_non_empty_rows())
    } else {
        serde_json::to_value(&result)
    };
    value.map_err(|e| DbError::internal(format!("Cannot serialize result: {e}")))
}

#[tokio::main]
async fn main() {
    let config = Config::parse();
    init_tracing(&config);

    info!("Starting db-pool-cluster v{}", env!("CARGO_PKG_VERSION"));

    match run(&config).await {
        Ok(value) => println!("{}", value),
        Err(e) => {
            error!(error = %e, "Statement failed");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Error: {e}\nHint: {suggestion}");
            } else {
                eprintln!("Error: {e}");
            }
            std::process::exit(1);
        }
    }
}
