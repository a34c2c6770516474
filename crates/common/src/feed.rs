use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{PriceTick, Result};

/// Abstraction over the market-data transport.
///
/// `BinanceFeed` in `crates/engine` implements this against the live
/// exchange WebSocket; `SimFeed` implements it for tests and development.
///
/// Contract: ticks for one symbol arrive in order on the returned
/// receiver. Nothing is assumed about ordering across symbols or about
/// exactly-once delivery. Reconnect/backoff is the feed's problem; a gap
/// simply loses intermediate prices.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Start streaming ticks for a symbol. Dropping the subscription via
    /// `unsubscribe` closes the returned receiver once in-flight ticks
    /// have drained.
    async fn subscribe(&self, symbol: &str) -> Result<mpsc::Receiver<PriceTick>>;

    /// Stop streaming a symbol. Idempotent; unknown symbols are a no-op.
    async fn unsubscribe(&self, symbol: &str);
}
