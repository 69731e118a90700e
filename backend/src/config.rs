use std::env;

/// Runtime configuration, read once at boot from the environment
/// (a `.env` file is honored via dotenv before this runs).
#[derive(Debug, Clone)]
pub struct Config {
    /// `sqlite://…` (embedded) or `postgres://…` (networked). The URL scheme
    /// selects the backend and with it the primary-key generation strategy.
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Authorizes the startup manager to run a full ingestion pass when the
    /// store looks empty.
    pub auto_import: bool,
    /// Caps the number of price files processed per chain. Testing aid.
    pub import_limit: Option<usize>,
    /// When set, re-runs ingestion on this interval after boot.
    pub import_interval_hours: Option<u64>,
    /// Signing key for bearer tokens.
    pub secret_key: String,
    /// Suppresses startup-time schema creation.
    pub testing: bool,
    /// Product-name improvement heuristic: replace a stored product name when
    /// a strictly longer label shows up in a later price file.
    pub prefer_longer_names: bool,
    /// Pool size for the networked backend. The embedded backend is pinned
    /// to a single connection regardless.
    pub db_max_connections: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let secret_key = env::var("SECRET_KEY").unwrap_or_else(|_| {
            tracing::warn!("SECRET_KEY not set; using development default");
            "dev-secret-change-in-production".to_string()
        });

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://basket.db?mode=rwc".to_string()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            auto_import: env_bool("AUTO_IMPORT"),
            import_limit: env::var("IMPORT_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n| n > 0),
            import_interval_hours: env::var("IMPORT_INTERVAL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n| n > 0),
            secret_key,
            testing: env_bool("TESTING"),
            prefer_longer_names: env::var("PREFER_LONGER_NAMES")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }
}

fn env_bool(name: &str) -> bool {
    env::var(name)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        // Scoped to names nothing else sets in CI
        assert!(!env_bool("BASKET_TEST_UNSET_FLAG"));
    }

    #[test]
    fn env_bool_accepts_true_and_one() {
        env::set_var("BASKET_TEST_FLAG_A", "TRUE");
        env::set_var("BASKET_TEST_FLAG_B", "1");
        env::set_var("BASKET_TEST_FLAG_C", "no");
        assert!(env_bool("BASKET_TEST_FLAG_A"));
        assert!(env_bool("BASKET_TEST_FLAG_B"));
        assert!(!env_bool("BASKET_TEST_FLAG_C"));
    }
}
