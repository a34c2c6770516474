use thiserror::Error;

use crate::{CardStatus, UserAction};

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed tick for {symbol}: {reason}")]
    MalformedTick { symbol: String, reason: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("card {card_id} is terminal ({status}); transition rejected")]
    TerminalCard { card_id: String, status: CardStatus },

    #[error("unknown card: {0}")]
    UnknownCard(String),

    #[error("cannot {action} card {card_id} while {status}")]
    IllegalAction {
        card_id: String,
        status: CardStatus,
        action: UserAction,
    },

    #[error("unknown scenario {scenario_id} on card {card_id}")]
    UnknownScenario { card_id: String, scenario_id: String },

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("feed error: {0}")]
    Feed(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
