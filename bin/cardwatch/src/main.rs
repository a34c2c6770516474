use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use alerts::AlertManager;
use common::{Config, Store};
use engine::{BinanceFeed, MonitorCommand, PriceMonitor};
use store::{CardSeedFile, SqliteStore};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!("CardWatch starting");

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to database: {e}"));
    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .unwrap_or_else(|e| panic!("Database migration failed: {e}"));
    info!("Database ready");

    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db));

    // ── Seed cards (only into an empty database) ──────────────────────────────
    if let Some(path) = &cfg.cards_seed_path {
        let existing = store
            .load_cards()
            .await
            .unwrap_or_else(|e| panic!("Failed to load battle cards: {e}"));
        if existing.is_empty() {
            let cards = CardSeedFile::load(path).into_cards();
            info!(count = cards.len(), path = %path, "seeding battle cards");
            for card in &cards {
                store
                    .save_card(card)
                    .await
                    .unwrap_or_else(|e| panic!("Failed to seed card: {e}"));
            }
        }
    }

    // ── Monitor ───────────────────────────────────────────────────────────────
    let feed = Arc::new(BinanceFeed::new());
    let alert_manager = AlertManager::new(cfg.alert_capacity);
    let (monitor, handle) = PriceMonitor::new(feed, store, alert_manager, cfg.save_retry_attempts);
    tokio::spawn(monitor.run());

    info!("Monitor running. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await.unwrap();
    info!("Shutdown signal received. Exiting.");
    handle.send(MonitorCommand::Shutdown).await;
}
