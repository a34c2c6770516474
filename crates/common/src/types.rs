use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Live price update for a single instrument, delivered by the feed.
/// Ephemeral — never persisted. Per-symbol ordering is guaranteed by the
/// feed; nothing is assumed across symbols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    /// Last traded price.
    pub price: f64,
    /// 24h rolling change in percent, as reported by the exchange.
    pub change_pct_24h: f64,
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    /// A tick with a non-finite or non-positive price is malformed and
    /// must not advance the previous-price cursor for its symbol.
    pub fn has_valid_price(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Trade side, inferred from the entry/stop ordering of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Direction of a price crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Chart timeframe a battle card's thesis is framed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn parse(s: &str) -> Option<Timeframe> {
        match s {
            "1m" => Some(Timeframe::M1),
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "1h" => Some(Timeframe::H1),
            "4h" => Some(Timeframe::H4),
            "1d" => Some(Timeframe::D1),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed scenario taxonomy: the four forward paths of a battle card.
/// A = primary, B = secondary, C = chaos, D = invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioKind {
    Primary,
    Secondary,
    Chaos,
    Invalidation,
}

impl ScenarioKind {
    pub fn letter(&self) -> char {
        match self {
            ScenarioKind::Primary => 'A',
            ScenarioKind::Secondary => 'B',
            ScenarioKind::Chaos => 'C',
            ScenarioKind::Invalidation => 'D',
        }
    }
}

impl std::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioKind::Primary => write!(f, "primary"),
            ScenarioKind::Secondary => write!(f, "secondary"),
            ScenarioKind::Chaos => write!(f, "chaos"),
            ScenarioKind::Invalidation => write!(f, "invalidation"),
        }
    }
}

/// One forward path of a trade thesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub kind: ScenarioKind,
    /// Price threshold whose crossing fires the entry trigger.
    pub trigger_price: f64,
    /// Free-form description of the trigger condition, shown in alerts.
    /// Numeric evaluation uses `trigger_price` only.
    pub trigger_condition: String,
    pub entry_price: f64,
    pub stop_loss: f64,
    /// Up to three take-profit levels, closest first.
    pub targets: Vec<f64>,
    /// Trader-assigned probability, 0–100.
    pub probability: u8,
    pub is_active: bool,
    /// Set exactly once by the engine when the trigger fires; never reset.
    pub triggered_at: Option<DateTime<Utc>>,
    /// Non-owning back-reference to a sibling on the same card. A child's
    /// trigger only becomes evaluable after the parent has fired.
    pub parent_id: Option<String>,
}

impl Scenario {
    pub fn new(kind: ScenarioKind, trigger_price: f64, entry_price: f64, stop_loss: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            trigger_price,
            trigger_condition: String::new(),
            entry_price,
            stop_loss,
            targets: Vec::new(),
            probability: 0,
            is_active: false,
            triggered_at: None,
            parent_id: None,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered_at.is_some()
    }

    /// Side is never asked of the user — it is inferred from the
    /// entry/stop ordering. Entry above stop reads long, below reads short.
    pub fn side(&self) -> Side {
        if self.entry_price >= self.stop_loss {
            Side::Long
        } else {
            Side::Short
        }
    }

    /// Direction the price must cross `trigger_price` for the entry to
    /// fire. Trigger on the far side of entry from the stop is a breakout
    /// (crossed with the trend); trigger between stop and entry is a
    /// pullback (crossed against it).
    pub fn entry_direction(&self) -> Direction {
        match self.side() {
            Side::Long => {
                if self.trigger_price >= self.entry_price {
                    Direction::Up
                } else {
                    Direction::Down
                }
            }
            Side::Short => {
                if self.trigger_price <= self.entry_price {
                    Direction::Down
                } else {
                    Direction::Up
                }
            }
        }
    }

    /// Direction a stop-loss breach crosses `stop_loss`.
    pub fn stop_direction(&self) -> Direction {
        match self.side() {
            Side::Long => Direction::Down,
            Side::Short => Direction::Up,
        }
    }

    /// Direction a target hit crosses a target price.
    pub fn target_direction(&self) -> Direction {
        match self.side() {
            Side::Long => Direction::Up,
            Side::Short => Direction::Down,
        }
    }
}

/// Battle-card status. `Draft` cards are not watched; `Active` cards are
/// subscribed; `Monitoring` means at least one scenario has fired.
/// `Closed`, `Completed` and `Archived` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum CardStatus {
    Draft,
    Active,
    Monitoring,
    Closed,
    Completed,
    Archived,
}

impl CardStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CardStatus::Closed | CardStatus::Completed | CardStatus::Archived)
    }

    /// Whether cards in this status contribute to the subscription set.
    pub fn is_watched(&self) -> bool {
        matches!(self, CardStatus::Active | CardStatus::Monitoring)
    }
}

impl std::fmt::Display for CardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CardStatus::Draft => write!(f, "draft"),
            CardStatus::Active => write!(f, "active"),
            CardStatus::Monitoring => write!(f, "monitoring"),
            CardStatus::Closed => write!(f, "closed"),
            CardStatus::Completed => write!(f, "completed"),
            CardStatus::Archived => write!(f, "archived"),
        }
    }
}

/// Explicit user actions on a card. Everything except the two
/// engine-driven transitions (active→monitoring, monitoring→closed)
/// comes through here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserAction {
    /// Commit a draft — the engine starts watching its instrument.
    Activate,
    Close,
    Complete,
    Archive,
}

impl std::fmt::Display for UserAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserAction::Activate => write!(f, "activate"),
            UserAction::Close => write!(f, "close"),
            UserAction::Complete => write!(f, "complete"),
            UserAction::Archive => write!(f, "archive"),
        }
    }
}

/// One trade thesis with up to four mutually-exclusive forward scenarios.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleCard {
    pub id: String,
    /// Instrument symbol, e.g. "BTCUSDT".
    pub symbol: String,
    pub timeframe: Timeframe,
    pub thesis: String,
    pub scenarios: Vec<Scenario>,
    pub status: CardStatus,
    /// Mirrors the id of the single scenario with `is_active = true`.
    pub active_scenario: Option<String>,
    /// Free-text reassessment attached from the analysis collaborator.
    /// Never parsed by the engine.
    pub reassessment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BattleCard {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, thesis: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            timeframe,
            thesis: thesis.into(),
            scenarios: Vec::new(),
            status: CardStatus::Draft,
            active_scenario: None,
            reassessment: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_watched(&self) -> bool {
        self.status.is_watched()
    }

    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    pub fn scenario_mut(&mut self, id: &str) -> Option<&mut Scenario> {
        self.scenarios.iter_mut().find(|s| s.id == id)
    }

    /// The currently active scenario, if any.
    pub fn active(&self) -> Option<&Scenario> {
        self.active_scenario.as_deref().and_then(|id| self.scenario(id))
    }

    /// Derived child view: scenarios whose `parent_id` points at `id`.
    /// Always computed by scanning, never cached as a back-pointer.
    pub fn children_of(&self, id: &str) -> Vec<&Scenario> {
        self.scenarios
            .iter()
            .filter(|s| s.parent_id.as_deref() == Some(id))
            .collect()
    }

    /// Whether a scenario's parent gate is open: no parent, or the parent
    /// has fired.
    pub fn parent_triggered(&self, scenario: &Scenario) -> bool {
        match scenario.parent_id.as_deref() {
            None => true,
            Some(pid) => self.scenario(pid).map(|p| p.is_triggered()).unwrap_or(false),
        }
    }

    /// Core invariant: at most one scenario is active and
    /// `active_scenario` mirrors it exactly.
    pub fn check_single_active(&self) -> Result<()> {
        let active: Vec<&Scenario> = self.scenarios.iter().filter(|s| s.is_active).collect();
        if active.len() > 1 {
            return Err(Error::InvariantViolation(format!(
                "card {}: {} scenarios active simultaneously",
                self.id,
                active.len()
            )));
        }
        let expected = active.first().map(|s| s.id.as_str());
        if self.active_scenario.as_deref() != expected {
            return Err(Error::InvariantViolation(format!(
                "card {}: active_scenario is {:?} but the active flag says {:?}",
                self.id, self.active_scenario, expected
            )));
        }
        Ok(())
    }

    /// One-line summary of the card's trigger/stop state, handed to the
    /// analysis collaborator. Plain text in, plain text out.
    pub fn state_summary(&self) -> String {
        let fired: Vec<String> = self
            .scenarios
            .iter()
            .filter(|s| s.is_triggered())
            .map(|s| format!("{} ({})", s.kind, s.trigger_price))
            .collect();
        format!(
            "{} {} [{}]: status {}, fired scenarios: {}",
            self.symbol,
            self.timeframe,
            self.thesis,
            self.status,
            if fired.is_empty() { "none".to_string() } else { fired.join(", ") }
        )
    }
}

/// Dedup key discriminant for alerts. At most one alert exists per
/// (card, scenario, event) triple over the system's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertEvent {
    /// A scenario's entry trigger fired.
    Triggered,
    /// An active scenario's stop-loss was breached.
    StopBreached,
    /// An active scenario crossed its n-th target (informational).
    TargetHit(u8),
    /// The invalidation scenario fired and closed the card.
    Invalidated,
    /// The card was closed by user action.
    Closed,
    /// A persistence write kept failing; in-memory state is authoritative.
    SaveFailed,
}

/// Display severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Success,
    Warning,
    Danger,
}

/// An alert the evaluation layer wants emitted. Dedup and timestamping
/// happen in the alert manager, not at the originating tick.
#[derive(Debug, Clone)]
pub struct AlertCandidate {
    pub card_id: String,
    pub scenario_id: Option<String>,
    pub event: AlertEvent,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
}

/// A deduplicated, emission-ordered notification. References its card and
/// scenario by id only — it stays valid after the card is archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub card_id: String,
    pub scenario_id: Option<String>,
    pub event: AlertEvent,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    /// Assigned at emission, not at the originating tick — display order
    /// is emission order even when ticks arrive with skew.
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// Notification broadcast once per processing pass that mutated a card.
/// The presentation/persistence layers subscribe to this instead of
/// hooking into engine internals.
#[derive(Debug, Clone)]
pub struct CardChanged {
    pub card: BattleCard,
}
