/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Alerts
    pub alert_capacity: usize,

    // Persistence write-back
    pub save_retry_attempts: u32,

    // Optional TOML file of battle cards used to seed an empty database
    pub cards_seed_path: Option<String>,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Config {
            database_url: required_env("DATABASE_URL"),
            alert_capacity: optional_env("ALERT_CAPACITY")
                .and_then(|v| v.parse().ok())
                .unwrap_or(200),
            save_retry_attempts: optional_env("SAVE_RETRY_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            cards_seed_path: optional_env("CARDS_SEED_PATH"),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
