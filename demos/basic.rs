//! Basic example showing how to use sea-orm-querylog.
//!
//! Run with: cargo run --example basic --features postgres

use sea_orm::{ConnectionTrait, DbBackend, Statement};
use sea_orm_querylog::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Query records are emitted at debug level under this target
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sea_orm_querylog=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/test?pool_max_conns=5".into());

    tracing::info!("Connecting to database...");

    // Option 1: straight from the connection string
    let pool = connect_with_trace(TracingSink, &database_url).await?;

    // Option 2: from a config, which also logs the pool options
    // let pool = connect_with_config(
    //     TracingSink,
    //     PoolConfig::parse(&database_url)?.with_max_connections(10),
    // ).await?;

    pool.query_all(Statement::from_string(
        DbBackend::Postgres,
        "SELECT   1 AS one,\n       2 AS two",
    ))
    .await?;

    // A failing query is logged at error level and still returned to the caller
    if let Err(err) = pool.execute_unprepared("SELECT * FROM missing_table").await {
        tracing::info!(error = %err, "query failed as expected");
    }

    Ok(())
}
