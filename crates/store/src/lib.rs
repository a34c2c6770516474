pub mod memory;
pub mod seed;
pub mod sqlite;

pub use memory::MemoryStore;
pub use seed::{CardSeed, CardSeedFile, ScenarioSeed};
pub use sqlite::SqliteStore;
