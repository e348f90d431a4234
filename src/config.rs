// src/config.rs

use std::env;
use dotenvy::dotenv;

/// Reason string a client (or the engine itself) passes to mark a submission as automatic.
pub const AUTO_SUBMIT_REASON: &str = "AUTO_SUBMIT";

/// Gap (seconds) below which a read does not count as time away from the test.
pub const DEFAULT_IDLE_THRESHOLD_SECONDS: i64 = 5;

/// Upper bound on one client-reported time increment.
pub const MAX_TIME_INCREMENT_SECONDS: i64 = 86_400;

pub const DEFAULT_SWEEP_GRACE_SECONDS: i64 = 60;

pub const DEFAULT_LEADERBOARD_LIMIT: i64 = 50;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub port: u16,
    pub idle_threshold_seconds: i64,
    /// Background sweep of stale attempts. `None` keeps expiry purely poll-driven.
    pub sweep_interval_seconds: Option<u64>,
    pub sweep_grace_seconds: i64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let jwt_expiration = parse_var("JWT_EXPIRATION").unwrap_or(86_400);

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            port: parse_var("PORT").unwrap_or(3000),
            idle_threshold_seconds: parse_var("IDLE_THRESHOLD_SECONDS")
                .unwrap_or(DEFAULT_IDLE_THRESHOLD_SECONDS),
            sweep_interval_seconds: parse_var("STALE_SWEEP_INTERVAL_SECONDS"),
            sweep_grace_seconds: parse_var("STALE_SWEEP_GRACE_SECONDS")
                .unwrap_or(DEFAULT_SWEEP_GRACE_SECONDS),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={:?}", key, raw);
            None
        }
    }
}
