use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::{Alert, BattleCard, Result, Store};

/// In-memory store for tests and development without a database.
#[derive(Default)]
pub struct MemoryStore {
    cards: RwLock<HashMap<String, BattleCard>>,
    alerts: RwLock<Vec<Alert>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct lookup, for test assertions.
    pub async fn card(&self, id: &str) -> Option<BattleCard> {
        self.cards.read().await.get(id).cloned()
    }

    pub async fn card_count(&self) -> usize {
        self.cards.read().await.len()
    }

    pub async fn alert_count(&self) -> usize {
        self.alerts.read().await.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_cards(&self) -> Result<Vec<BattleCard>> {
        Ok(self.cards.read().await.values().cloned().collect())
    }

    async fn save_card(&self, card: &BattleCard) -> Result<()> {
        self.cards
            .write()
            .await
            .insert(card.id.clone(), card.clone());
        Ok(())
    }

    async fn load_alerts(&self) -> Result<Vec<Alert>> {
        Ok(self.alerts.read().await.clone())
    }

    async fn save_alerts(&self, alerts: &[Alert]) -> Result<()> {
        *self.alerts.write().await = alerts.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BattleCard, Timeframe};

    #[tokio::test]
    async fn card_save_is_an_upsert() {
        let store = MemoryStore::new();
        let mut card = BattleCard::new("BTCUSDT", Timeframe::H4, "first");
        store.save_card(&card).await.unwrap();

        card.thesis = "revised".into();
        store.save_card(&card).await.unwrap();

        assert_eq!(store.card_count().await, 1);
        let loaded = store.card(&card.id).await.unwrap();
        assert_eq!(loaded.thesis, "revised");
    }

    #[tokio::test]
    async fn alert_save_replaces_the_snapshot() {
        let store = MemoryStore::new();
        assert!(store.load_alerts().await.unwrap().is_empty());
        store.save_alerts(&[]).await.unwrap();
        assert_eq!(store.alert_count().await, 0);
    }
}
