//! Accrual Ledger daemon
//!
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌────────────┐    ┌──────────────┐
//! │  Config  │───▶│ Postgres  │───▶│   Engine   │───▶│ Ctrl-C: stop │
//! │  (YAML)  │    │ (migrate) │    │ (pool+poll)│    │ poll, drain  │
//! └──────────┘    └───────────┘    └────────────┘    └──────────────┘
//! ```
//!
//! Flags: `--env/-e <name>`, `--database-uri/-d <url>`,
//! `--accrual-url/-r <url>`, `--memory` (in-process store, no database).

use anyhow::Context;
use std::sync::Arc;

use accrual_ledger::accrual::{AccrualClient, HttpAccrualClient};
use accrual_ledger::config::{self, AppConfig, Overrides};
use accrual_ledger::db::Database;
use accrual_ledger::engine::LoyaltyEngine;
use accrual_ledger::ledger::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
use accrual_ledger::logging::{component_span, init_logging};

fn use_memory_store(args: &[String]) -> bool {
    args.iter().any(|a| a == "--memory")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let env = config::get_env(&args);
    let memory_mode = use_memory_store(&args);

    let mut app_config = AppConfig::load(&env)?;
    app_config.apply_overrides(&Overrides::from_process(&args));
    if memory_mode && app_config.database.url.is_empty() {
        app_config.database.url = "memory".to_string();
    }
    app_config.validate()?;

    let _log_guard = init_logging(&app_config);
    tracing::info!("Starting Accrual Ledger in {} mode", env);

    let (store, db): (Arc<dyn LedgerStore>, Option<Database>) = if memory_mode {
        tracing::warn!("Using in-memory ledger store; state is lost on exit");
        (Arc::new(MemoryLedgerStore::new()), None)
    } else {
        let db = Database::connect(&app_config.database)
            .await
            .context("Failed to connect to PostgreSQL")?;
        db.health_check().await.context("Database health check")?;
        if app_config.database.run_migrations {
            db.migrate().await.context("Failed to run migrations")?;
        }
        (Arc::new(PgLedgerStore::new(db.pool().clone())), Some(db))
    };

    let accrual: Arc<dyn AccrualClient> = Arc::new(
        HttpAccrualClient::new(&app_config.accrual, component_span("accrual_client"))
            .context("Failed to build accrual client")?,
    );
    tracing::info!(accrual_url = %app_config.accrual.base_url, "Accrual provider configured");

    let engine = LoyaltyEngine::start(store, accrual, &app_config.sync, component_span("engine"));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    engine.shutdown().await;
    if let Some(db) = db {
        db.close().await;
    }
    tracing::info!("Accrual Ledger stopped");
    Ok(())
}
