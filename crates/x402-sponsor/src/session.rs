//! Payment sessions: one row per verified micropayment, the anti-replay
//! boundary. A session's rebate can be settled exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_ASSET;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    /// Unique key, minted by the resource server. The primary anti-replay token.
    pub session_id: String,
    pub user_address: String,
    pub network: String,
    pub amount_paid: u64,
    pub payment_asset: String,
    pub payment_hash: Option<String>,
    pub verified_at: DateTime<Utc>,
    /// Flips false -> true exactly once, never reverts.
    pub rebate_settled: bool,
    pub correlation_id: Option<String>,
}

impl PaymentSession {
    pub fn new(
        session_id: impl Into<String>,
        user_address: impl Into<String>,
        network: impl Into<String>,
        amount_paid: u64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_address: user_address.into(),
            network: network.into(),
            amount_paid,
            payment_asset: DEFAULT_ASSET.to_string(),
            payment_hash: None,
            verified_at: Utc::now(),
            rebate_settled: false,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}
