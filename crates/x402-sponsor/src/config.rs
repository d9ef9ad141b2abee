//! Process configuration, read once at startup from the environment
//! (`.env` loading is the binary's job, via `dotenvy`).

use std::path::PathBuf;
use std::time::Duration;

use crate::amount::parse_amount;
use crate::constants::DEFAULT_PAYOUT_TIMEOUT_SECS;
use crate::error::SponsorError;

/// Everything the sponsorship service needs to run. Missing required values
/// are a [`SponsorError::ConfigError`]; the caller decides whether that is
/// fatal (the server refuses to start).
#[derive(Debug, Clone)]
pub struct SponsorConfig {
    /// Shared secret for webhook HMAC signatures. Required.
    pub webhook_secret: Vec<u8>,
    /// SQLite ledger path.
    pub database_path: PathBuf,
    /// Campaign seed file, loaded when present.
    pub campaigns_path: PathBuf,
    /// Base URL of the upstream x402 verifier. Required.
    pub verifier_url: String,
    /// Base URL embedded in offer checkout links.
    pub checkout_base_url: String,
    /// Price of the paid content, in base units.
    pub content_price: u64,
    /// Upper bound on a single payout call.
    pub payout_timeout: Duration,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl SponsorConfig {
    pub fn from_env() -> Result<Self, SponsorError> {
        let webhook_secret = std::env::var("WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.into_bytes())
            .ok_or_else(|| {
                SponsorError::ConfigError(
                    "WEBHOOK_SECRET is required; set it to a secure random value \
                     (e.g. `openssl rand -hex 32`)"
                        .to_string(),
                )
            })?;
        if webhook_secret.len() < 32 {
            tracing::warn!(
                "WEBHOOK_SECRET is only {} bytes (minimum 32 recommended); \
                 use `openssl rand -hex 32` to generate a secure secret",
                webhook_secret.len()
            );
        }

        let verifier_url = std::env::var("VERIFIER_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                SponsorError::ConfigError(
                    "VERIFIER_URL is required; point it at an x402 facilitator \
                     (e.g. http://localhost:4021)"
                        .to_string(),
                )
            })?;

        let content_price_raw = env_or("CONTENT_PRICE", "0.10");
        let content_price = parse_amount(&content_price_raw).map_err(|e| {
            SponsorError::ConfigError(format!("CONTENT_PRICE {content_price_raw:?}: {e}"))
        })?;

        let payout_timeout_secs: u64 = std::env::var("PAYOUT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PAYOUT_TIMEOUT_SECS);

        Ok(Self {
            webhook_secret,
            database_path: PathBuf::from(env_or("DATABASE_PATH", "sponsor.db")),
            campaigns_path: PathBuf::from(env_or("CAMPAIGNS_PATH", "campaigns.json")),
            verifier_url,
            checkout_base_url: env_or("CHECKOUT_BASE_URL", "http://localhost:3000"),
            content_price,
            payout_timeout: Duration::from_secs(payout_timeout_secs),
        })
    }
}
