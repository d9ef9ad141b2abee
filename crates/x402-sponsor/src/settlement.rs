//! Settlements: the audit trail of actual rebate payouts, kept independent
//! of webhook bookkeeping so operators can reconcile "what did we pay".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Confirmed,
    Failed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Confirmed => "confirmed",
            SettlementStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SettlementStatus::Pending),
            "confirmed" => Some(SettlementStatus::Confirmed),
            "failed" => Some(SettlementStatus::Failed),
            _ => None,
        }
    }
}

/// One rebate payout attempt. Created `pending` immediately before the
/// payout call; resolved to `confirmed` (with tx hash) or `failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub settlement_id: String,
    pub session_id: String,
    pub webhook_id: String,
    pub user_address: String,
    pub rebate_amount: u64,
    pub rebate_asset: String,
    pub network: String,
    pub tx_hash: Option<String>,
    pub status: SettlementStatus,
    pub campaign_id: String,
    pub settled_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
}

impl Settlement {
    /// Mint a pending settlement for a webhook that passed every gate.
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        session_id: &str,
        webhook_id: &str,
        user_address: &str,
        rebate_amount: u64,
        rebate_asset: &str,
        network: &str,
        campaign_id: &str,
        correlation_id: Option<&str>,
    ) -> Self {
        Self {
            settlement_id: new_settlement_id(),
            session_id: session_id.to_string(),
            webhook_id: webhook_id.to_string(),
            user_address: user_address.to_string(),
            rebate_amount,
            rebate_asset: rebate_asset.to_string(),
            network: network.to_string(),
            tx_hash: None,
            status: SettlementStatus::Pending,
            campaign_id: campaign_id.to_string(),
            settled_at: Utc::now(),
            confirmed_at: None,
            correlation_id: correlation_id.map(str::to_string),
        }
    }
}

/// `settle-` plus 12 hex chars.
pub fn new_settlement_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("settle-{}", &id[..12])
}
