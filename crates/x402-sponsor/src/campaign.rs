//! Sponsor campaigns: a standing, budget-capped offer of a rebate.
//!
//! Campaigns are provisioned from a JSON seed file at startup (idempotent,
//! keyed by campaign id) and mutated only through budget reservation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::parse_amount;
use crate::constants::{DEFAULT_ASSET, DEFAULT_EVM_NETWORK};
use crate::error::SponsorError;

/// A sponsor's standing offer. Amounts are integer base units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub campaign_id: String,
    pub merchant_name: String,
    pub offer_text: String,
    pub rebate_amount: u64,
    pub rebate_asset: String,
    pub rebate_network: String,
    pub budget_total: u64,
    pub budget_remaining: u64,
    pub budget_asset: String,
    #[serde(default)]
    pub coupons: Vec<Coupon>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Whether this campaign can back one more rebate right now.
    pub fn is_eligible(&self) -> bool {
        self.active && self.budget_remaining >= self.rebate_amount
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

/// A coupon attached to a campaign, surfaced verbatim on sponsored offers.
/// Serializes camelCase for the offer wire; seed files may use snake_case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub code: String,
    pub description: String,
    #[serde(alias = "discount_type")]
    pub discount_type: DiscountType,
    #[serde(alias = "discount_value")]
    pub discount_value: String,
}

/// Seed-file form of a campaign. Amounts are decimal strings or JSON
/// numbers; `budget.remaining` defaults to `budget.total`.
#[derive(Debug, Deserialize)]
pub struct CampaignSeed {
    pub id: String,
    pub merchant_name: String,
    pub offer_text: String,
    pub rebate: RebateSeed,
    pub budget: BudgetSeed,
    #[serde(default)]
    pub coupons: Vec<Coupon>,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct RebateSeed {
    pub amount: serde_json::Value,
    #[serde(default = "default_asset")]
    pub asset: String,
    #[serde(default = "default_network")]
    pub network: String,
}

#[derive(Debug, Deserialize)]
pub struct BudgetSeed {
    pub total: serde_json::Value,
    pub remaining: Option<serde_json::Value>,
    #[serde(default = "default_asset")]
    pub asset: String,
}

fn default_active() -> bool {
    true
}

fn default_asset() -> String {
    DEFAULT_ASSET.to_string()
}

fn default_network() -> String {
    DEFAULT_EVM_NETWORK.to_string()
}

/// Accepts `"5.00"` or `5.0`; either way the decimal text is parsed with
/// integer arithmetic.
fn seed_amount(value: &serde_json::Value) -> Result<u64, SponsorError> {
    match value {
        serde_json::Value::String(s) => parse_amount(s),
        serde_json::Value::Number(n) => parse_amount(&n.to_string()),
        other => Err(SponsorError::MalformedPayload(format!(
            "amount must be a string or number, got {other}"
        ))),
    }
}

impl CampaignSeed {
    pub fn into_campaign(self) -> Result<Campaign, SponsorError> {
        let budget_total = seed_amount(&self.budget.total)?;
        let budget_remaining = match &self.budget.remaining {
            Some(v) => seed_amount(v)?,
            None => budget_total,
        };
        if budget_remaining > budget_total {
            return Err(SponsorError::MalformedPayload(format!(
                "campaign '{}': budget remaining exceeds total",
                self.id
            )));
        }
        let now = Utc::now();
        Ok(Campaign {
            campaign_id: self.id,
            merchant_name: self.merchant_name,
            offer_text: self.offer_text,
            rebate_amount: seed_amount(&self.rebate.amount)?,
            rebate_asset: self.rebate.asset,
            rebate_network: self.rebate.network,
            budget_total,
            budget_remaining,
            budget_asset: self.budget.asset,
            coupons: self.coupons,
            active: self.active,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Convert parsed seeds into campaigns, validating amounts as one batch.
pub fn load_seed_campaigns(seeds: Vec<CampaignSeed>) -> Result<Vec<Campaign>, SponsorError> {
    seeds.into_iter().map(CampaignSeed::into_campaign).collect()
}

/// Load and convert a campaign seed file.
pub fn load_seed_file(path: &std::path::Path) -> Result<Vec<Campaign>, SponsorError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        SponsorError::ConfigError(format!("cannot read campaign seed {}: {e}", path.display()))
    })?;
    let seeds: Vec<CampaignSeed> = serde_json::from_str(&raw)?;
    load_seed_campaigns(seeds)
}
