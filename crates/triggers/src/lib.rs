pub mod apply;
pub mod cascade;
pub mod evaluator;
pub mod state;

pub use apply::{apply_tick, TickOutcome};
pub use cascade::{resolve_entry, resolve_stop, Cascade};
pub use evaluator::{evaluate, FireKind, Fired};
