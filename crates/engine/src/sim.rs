use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use common::{Error, PriceFeed, PriceTick, Result};

/// Channel-backed feed for tests and development. Ticks are pushed by
/// hand; per-symbol ordering holds because each symbol is one channel.
pub struct SimFeed {
    senders: Arc<RwLock<HashMap<String, mpsc::Sender<PriceTick>>>>,
}

impl SimFeed {
    pub fn new() -> Self {
        Self {
            senders: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Deliver a tick to the symbol's subscriber, if any. Returns false
    /// when nobody is subscribed — in tests this doubles as an
    /// "unsubscribed" probe.
    pub async fn push(&self, tick: PriceTick) -> bool {
        let senders = self.senders.read().await;
        match senders.get(&tick.symbol) {
            Some(tx) => tx.send(tick).await.is_ok(),
            None => {
                debug!(symbol = %tick.symbol, "sim tick dropped — no subscriber");
                false
            }
        }
    }

    pub async fn is_subscribed(&self, symbol: &str) -> bool {
        self.senders.read().await.contains_key(symbol)
    }

    /// Convenience constructor for a plain tick at the current time.
    pub fn tick(symbol: &str, price: f64) -> PriceTick {
        PriceTick {
            symbol: symbol.to_string(),
            price,
            change_pct_24h: 0.0,
            timestamp: Utc::now(),
        }
    }
}

impl Default for SimFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceFeed for SimFeed {
    async fn subscribe(&self, symbol: &str) -> Result<mpsc::Receiver<PriceTick>> {
        let mut senders = self.senders.write().await;
        if senders.contains_key(symbol) {
            return Err(Error::Feed(format!("{symbol} is already subscribed")));
        }
        let (tx, rx) = mpsc::channel(64);
        senders.insert(symbol.to_string(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, symbol: &str) {
        // dropping the sender closes the stream after in-flight ticks drain
        self.senders.write().await.remove(symbol);
    }
}
