use async_trait::async_trait;

use crate::{Alert, BattleCard, Result};

/// Persistence collaborator.
///
/// `SqliteStore` in `crates/store` implements this against SQLite;
/// `MemoryStore` implements it for tests.
///
/// The engine calls `save_card`/`save_alerts` after every mutation and
/// re-derives its subscription set from `load_cards` on restart. It never
/// assumes durability beyond what the implementation guarantees — on a
/// failed write the in-memory card remains authoritative.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load_cards(&self) -> Result<Vec<BattleCard>>;

    /// Insert or update a single card and its scenarios.
    async fn save_card(&self, card: &BattleCard) -> Result<()>;

    async fn load_alerts(&self) -> Result<Vec<Alert>>;

    /// Persist the full alert set (the alert book is capacity-bounded,
    /// so a snapshot write stays small).
    async fn save_alerts(&self, alerts: &[Alert]) -> Result<()>;
}

/// AI reassessment collaborator. Takes a plain-text summary of a card's
/// trigger/stop state and returns free text; the engine attaches the
/// response to the card verbatim and never parses it.
#[async_trait]
pub trait ThesisAnalyst: Send + Sync {
    async fn reassess(&self, summary: &str) -> Result<String>;
}
