use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{error, info, warn};

use alerts::AlertManager;
use common::{
    AlertCandidate, AlertEvent, AlertSeverity, BattleCard, CardChanged, Error, PriceFeed,
    PriceTick, Store, ThesisAnalyst, UserAction,
};

use crate::subscriptions::SubscriptionTable;

/// Commands sent to the monitor via its command channel.
#[derive(Debug)]
pub enum MonitorCommand {
    /// Insert or replace a card (editor save).
    UpsertCard(Box<BattleCard>),
    /// Explicit user lifecycle action on a card.
    UserAction { card_id: String, action: UserAction },
    /// Ask the analysis collaborator to reassess a card and attach the
    /// returned text.
    AttachReassessment { card_id: String },
    Shutdown,
}

/// Cloneable handle passed to the presentation/persistence layers.
#[derive(Clone)]
pub struct MonitorHandle {
    command_tx: mpsc::Sender<MonitorCommand>,
    card_tx: broadcast::Sender<CardChanged>,
    alerts: AlertManager,
}

impl MonitorHandle {
    pub async fn send(&self, cmd: MonitorCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    /// Subscribe to the card-changed broadcast: one notification per
    /// processing pass that mutated a card.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<CardChanged> {
        self.card_tx.subscribe()
    }

    /// The alert read model (`list`, `mark_read`, `dismiss`, counts).
    pub fn alerts(&self) -> AlertManager {
        self.alerts.clone()
    }
}

/// State shared between the command loop and the per-symbol workers.
struct Shared {
    cards: RwLock<HashMap<String, BattleCard>>,
    subs: Mutex<SubscriptionTable>,
    feed: Arc<dyn PriceFeed>,
    store: Arc<dyn Store>,
    alerts: AlertManager,
    card_tx: broadcast::Sender<CardChanged>,
    save_retry_attempts: u32,
}

impl Shared {
    /// Persistence write-back with bounded retry. On final failure the
    /// in-memory card remains authoritative for subsequent ticks.
    async fn save_card_with_retry(&self, card: &BattleCard) -> bool {
        for attempt in 1..=self.save_retry_attempts.max(1) {
            match self.store.save_card(card).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(card_id = %card.id, attempt, error = %e, "card write-back failed")
                }
            }
        }
        error!(
            card_id = %card.id,
            "card write-back abandoned — in-memory state remains authoritative"
        );
        false
    }

    /// Emit candidates through the dedup table, then snapshot the alert
    /// book to the store if anything new came out.
    async fn emit_alerts(&self, candidates: Vec<AlertCandidate>) {
        let mut emitted = false;
        for candidate in candidates {
            if self.alerts.emit(candidate).await.is_some() {
                emitted = true;
            }
        }
        if emitted {
            let snapshot = self.alerts.snapshot().await;
            if let Err(e) = self.store.save_alerts(&snapshot).await {
                warn!(error = %e, "alert write-back failed");
            }
        }
    }

    fn notify_changed(&self, card: &BattleCard) {
        // ignore send errors (no active receivers)
        let _ = self.card_tx.send(CardChanged { card: card.clone() });
    }

    /// Drop one subscription reference; close the stream on the last one.
    async fn release_symbol(&self, symbol: &str) {
        let last = self.subs.lock().await.release(symbol);
        if last {
            self.feed.unsubscribe(symbol).await;
            info!(symbol, "no watched card left — unsubscribed");
        }
    }
}

fn save_failed_alert(card: &BattleCard) -> AlertCandidate {
    AlertCandidate {
        card_id: card.id.clone(),
        scenario_id: None,
        event: AlertEvent::SaveFailed,
        severity: AlertSeverity::Warning,
        title: format!("{} changes may not be saved", card.symbol),
        message: "Persisting the battle card failed after retries; the engine keeps running on in-memory state.".into(),
    }
}

/// The orchestrator: maintains the subscription set over all watched
/// cards, spawns one worker per subscribed symbol, and processes user
/// commands. Each worker applies its symbol's ticks strictly in arrival
/// order; a card is only ever mutated under the shared card-table lock,
/// so no pass interleaves partial updates from two ticks.
pub struct PriceMonitor {
    shared: Arc<Shared>,
    command_rx: mpsc::Receiver<MonitorCommand>,
    analyst: Option<Arc<dyn ThesisAnalyst>>,
}

impl PriceMonitor {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        store: Arc<dyn Store>,
        alerts: AlertManager,
        save_retry_attempts: u32,
    ) -> (Self, MonitorHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (card_tx, _) = broadcast::channel(256);

        let shared = Arc::new(Shared {
            cards: RwLock::new(HashMap::new()),
            subs: Mutex::new(SubscriptionTable::new()),
            feed,
            store,
            alerts: alerts.clone(),
            card_tx: card_tx.clone(),
            save_retry_attempts,
        });

        let handle = MonitorHandle {
            command_tx,
            card_tx,
            alerts,
        };

        let monitor = PriceMonitor {
            shared,
            command_rx,
            analyst: None,
        };

        (monitor, handle)
    }

    /// Attach the optional analysis collaborator.
    pub fn set_analyst(&mut self, analyst: Arc<dyn ThesisAnalyst>) {
        self.analyst = Some(analyst);
    }

    /// Run the monitor. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        self.bootstrap().await;

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                MonitorCommand::UpsertCard(card) => self.handle_upsert(*card).await,
                MonitorCommand::UserAction { card_id, action } => {
                    self.handle_user_action(&card_id, action).await
                }
                MonitorCommand::AttachReassessment { card_id } => {
                    self.handle_reassessment(&card_id).await
                }
                MonitorCommand::Shutdown => break,
            }
        }
        info!("monitor stopped");
    }

    /// Re-derive everything from the store: restore the alert book (and
    /// its dedup keys), load the cards, and rebuild the subscription set.
    async fn bootstrap(&self) {
        match self.shared.store.load_alerts().await {
            Ok(alerts) => self.shared.alerts.restore(alerts).await,
            Err(e) => warn!(error = %e, "failed to load alerts — starting empty"),
        }

        match self.shared.store.load_cards().await {
            Ok(cards) => {
                info!(count = cards.len(), "battle cards loaded");
                for card in cards {
                    let watched = card.is_watched();
                    let symbol = card.symbol.clone();
                    self.shared.cards.write().await.insert(card.id.clone(), card);
                    if watched {
                        self.watch(&symbol).await;
                    }
                }
            }
            Err(e) => error!(error = %e, "failed to load cards — starting with an empty set"),
        }
    }

    /// Add a subscription reference; open the stream and spawn the
    /// symbol worker on the first one.
    async fn watch(&self, symbol: &str) {
        let first = self.shared.subs.lock().await.acquire(symbol);
        if !first {
            return;
        }
        match self.shared.feed.subscribe(symbol).await {
            Ok(tick_rx) => {
                info!(symbol, "subscribed");
                let worker = SymbolWorker {
                    symbol: symbol.to_string(),
                    tick_rx,
                    shared: self.shared.clone(),
                    prev_price: None,
                };
                tokio::spawn(worker.run());
            }
            Err(e) => {
                error!(symbol, error = %e, "feed subscription failed");
                self.shared.subs.lock().await.release(symbol);
            }
        }
    }

    async fn handle_upsert(&self, card: BattleCard) {
        let prior = self
            .shared
            .cards
            .write()
            .await
            .insert(card.id.clone(), card.clone());

        let prior_watch = prior.filter(|p| p.is_watched()).map(|p| p.symbol);
        let new_watch = card.is_watched().then(|| card.symbol.clone());
        if prior_watch != new_watch {
            if let Some(symbol) = &new_watch {
                self.watch(symbol).await;
            }
            if let Some(symbol) = &prior_watch {
                self.shared.release_symbol(symbol).await;
            }
        }

        if !self.shared.save_card_with_retry(&card).await {
            self.shared.emit_alerts(vec![save_failed_alert(&card)]).await;
        }
        self.shared.notify_changed(&card);
    }

    async fn handle_user_action(&self, card_id: &str, action: UserAction) {
        let mut cards = self.shared.cards.write().await;
        let Some(card) = cards.get_mut(card_id) else {
            let err = Error::UnknownCard(card_id.to_string());
            warn!(%action, error = %err, "user action ignored");
            return;
        };

        let was_watched = card.is_watched();
        let card = match triggers::state::apply_user_action(card, action) {
            Ok(status) => {
                info!(card_id, %status, "user transition applied");
                card.clone()
            }
            Err(e) => {
                // no-op by contract; reported, never applied
                warn!(card_id, error = %e, "user transition rejected");
                return;
            }
        };
        drop(cards);

        if action == UserAction::Close {
            self.shared
                .emit_alerts(vec![AlertCandidate {
                    card_id: card.id.clone(),
                    scenario_id: None,
                    event: AlertEvent::Closed,
                    severity: AlertSeverity::Info,
                    title: format!("{} card closed", card.symbol),
                    message: "Battle card closed by user action.".into(),
                }])
                .await;
        }

        if was_watched && !card.is_watched() {
            self.shared.release_symbol(&card.symbol).await;
        } else if !was_watched && card.is_watched() {
            self.watch(&card.symbol).await;
        }

        if !self.shared.save_card_with_retry(&card).await {
            self.shared.emit_alerts(vec![save_failed_alert(&card)]).await;
        }
        self.shared.notify_changed(&card);
    }

    async fn handle_reassessment(&self, card_id: &str) {
        let Some(analyst) = &self.analyst else {
            warn!(card_id, "reassessment requested but no analyst configured");
            return;
        };

        let summary = match self.shared.cards.read().await.get(card_id) {
            Some(card) => card.state_summary(),
            None => {
                warn!(card_id, "reassessment requested for unknown card");
                return;
            }
        };

        // The response is attached verbatim; the engine never parses it.
        match analyst.reassess(&summary).await {
            Ok(text) => {
                let mut cards = self.shared.cards.write().await;
                let Some(card) = cards.get_mut(card_id) else {
                    return;
                };
                card.reassessment = Some(text);
                card.updated_at = chrono::Utc::now();
                let card = card.clone();
                drop(cards);

                if !self.shared.save_card_with_retry(&card).await {
                    self.shared.emit_alerts(vec![save_failed_alert(&card)]).await;
                }
                self.shared.notify_changed(&card);
            }
            Err(e) => warn!(card_id, error = %e, "reassessment call failed"),
        }
    }
}

/// One worker per subscribed symbol, processing that symbol's ticks
/// strictly in arrival order. Exits when the feed closes its channel
/// after an unsubscribe, once in-flight ticks have drained.
struct SymbolWorker {
    symbol: String,
    tick_rx: mpsc::Receiver<PriceTick>,
    shared: Arc<Shared>,
    /// Last valid price seen. Crossings compare only the two most recent
    /// prices — a feed gap just loses the intermediate ones.
    prev_price: Option<f64>,
}

impl SymbolWorker {
    async fn run(mut self) {
        info!(symbol = %self.symbol, "symbol worker started");
        while let Some(tick) = self.tick_rx.recv().await {
            self.handle_tick(tick).await;
        }
        info!(symbol = %self.symbol, "symbol worker stopped");
    }

    async fn handle_tick(&mut self, tick: PriceTick) {
        if !tick.has_valid_price() {
            // dropped without advancing the previous-price cursor
            let err = Error::MalformedTick {
                symbol: self.symbol.clone(),
                reason: format!("price {}", tick.price),
            };
            warn!(error = %err, "tick dropped");
            return;
        }
        let cur = tick.price;
        let prev = match self.prev_price.replace(cur) {
            Some(prev) => prev,
            None => return, // first tick only seeds the cursor
        };

        let mut cards = self.shared.cards.write().await;
        let ids: Vec<String> = cards
            .values()
            .filter(|c| c.symbol == self.symbol && c.is_watched())
            .map(|c| c.id.clone())
            .collect();

        for id in ids {
            let Some(card) = cards.get_mut(&id) else {
                continue;
            };

            let outcome = match triggers::apply_tick(card, prev, cur, tick.timestamp) {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Defect report for the operator: the event was
                    // discarded and the card rolled back.
                    error!(card_id = %id, error = %e, "tick discarded after consistency failure");
                    continue;
                }
            };

            if outcome.alerts.is_empty() && !outcome.changed {
                continue;
            }

            let card = card.clone();
            self.shared.emit_alerts(outcome.alerts).await;

            if outcome.changed {
                if !self.shared.save_card_with_retry(&card).await {
                    self.shared.emit_alerts(vec![save_failed_alert(&card)]).await;
                }
                self.shared.notify_changed(&card);

                if !card.is_watched() {
                    self.shared.release_symbol(&self.symbol).await;
                }
            }
        }
    }
}
