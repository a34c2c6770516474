use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use common::{Error, PriceFeed, PriceTick, Result};

const STREAM_ENDPOINT: &str = "wss://stream.binance.com:9443/ws";
const TICK_CHANNEL_CAPACITY: usize = 256;

/// Binance 24h ticker WebSocket feed, one socket per subscribed symbol.
///
/// Each subscription spawns a stream task that parses ticker events into
/// `PriceTick` and reconnects with exponential backoff. Unsubscribing
/// aborts the task; the consumer's receiver drains any in-flight ticks
/// and then closes.
pub struct BinanceFeed {
    tasks: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
}

impl BinanceFeed {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for BinanceFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceFeed for BinanceFeed {
    async fn subscribe(&self, symbol: &str) -> Result<mpsc::Receiver<PriceTick>> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(symbol) {
            return Err(Error::Feed(format!("{symbol} is already subscribed")));
        }

        let (tick_tx, tick_rx) = mpsc::channel(TICK_CHANNEL_CAPACITY);
        let task = tokio::spawn(stream_loop(symbol.to_string(), tick_tx));
        tasks.insert(symbol.to_string(), task);
        Ok(tick_rx)
    }

    async fn unsubscribe(&self, symbol: &str) {
        if let Some(task) = self.tasks.write().await.remove(symbol) {
            task.abort();
            info!(symbol, "Binance stream closed");
        }
    }
}

/// Run the stream forever, reconnecting on failure. A feed gap is not an
/// error for the consumer — it simply loses intermediate prices.
async fn stream_loop(symbol: String, tick_tx: mpsc::Sender<PriceTick>) {
    let mut backoff = Duration::from_secs(1);
    const MAX_BACKOFF: Duration = Duration::from_secs(60);

    loop {
        info!(symbol = %symbol, "connecting to Binance ticker stream");
        match connect_once(&symbol, &tick_tx).await {
            Ok(()) => {
                if tick_tx.is_closed() {
                    return;
                }
                info!(symbol = %symbol, "ticker stream closed cleanly");
                // clean close (e.g. 24h session end) — reconnect shortly
                tokio::time::sleep(Duration::from_secs(1)).await;
                backoff = Duration::from_secs(1);
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, backoff = ?backoff, "ticker stream error, reconnecting");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

async fn connect_once(symbol: &str, tick_tx: &mpsc::Sender<PriceTick>) -> Result<()> {
    let url_str = format!("{STREAM_ENDPOINT}/{}@ticker", symbol.to_lowercase());
    let url = Url::parse(&url_str).map_err(|e| Error::WebSocket(e.to_string()))?;

    let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocket(e.to_string()))?;

    let (_, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;

        if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
            match parse_ticker_event(symbol, &text) {
                Ok(Some(tick)) => {
                    if tick_tx.send(tick).await.is_err() {
                        // consumer gone — treat as a clean close
                        return Ok(());
                    }
                }
                Ok(None) => {} // non-ticker message, skip
                Err(e) => {
                    warn!(error = %e, "failed to parse ticker event");
                }
            }
        }
    }

    Ok(())
}

// ─── Binance ticker JSON parsing ─────────────────────────────────────────────

#[derive(Deserialize)]
struct TickerEvent {
    /// Last traded price.
    #[serde(rename = "c")]
    last_price: String,
    /// 24h price change percent.
    #[serde(rename = "P")]
    change_pct: String,
    #[serde(rename = "E")]
    event_time_ms: i64,
}

fn parse_ticker_event(symbol: &str, text: &str) -> Result<Option<PriceTick>> {
    // Ticker messages have an "e" field set to "24hrTicker"
    let wrapper: serde_json::Value = serde_json::from_str(text)?;
    if wrapper.get("e").and_then(|v| v.as_str()) != Some("24hrTicker") {
        return Ok(None);
    }

    let event: TickerEvent = serde_json::from_value(wrapper)?;

    let timestamp: DateTime<Utc> = Utc
        .timestamp_millis_opt(event.event_time_ms)
        .single()
        .unwrap_or_else(Utc::now);

    // An unparseable price becomes NaN and is dropped downstream as a
    // malformed tick without advancing the previous-price cursor.
    Ok(Some(PriceTick {
        symbol: symbol.to_string(),
        price: event.last_price.parse().unwrap_or(f64::NAN),
        change_pct_24h: event.change_pct.parse().unwrap_or(0.0),
        timestamp,
    }))
}
