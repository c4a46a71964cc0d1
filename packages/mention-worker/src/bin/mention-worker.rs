//! Singleton batch entry point. No subcommands, no flags — reads entirely
//! from the environment and exits 0 (success or skipped) or 1 (failed run).

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use mention_worker::store::PgStore;
use mention_worker::{Pipeline, Settings};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::from_filename(".env.local").ok();
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mention_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_target(false))
        .init();

    let settings = Settings::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to database")?;

    let store = Arc::new(PgStore::new(pool));
    let pipeline = Pipeline::new(store, settings)?;

    let exit_code = pipeline.run_once().await;
    Ok(ExitCode::from(exit_code as u8))
}
