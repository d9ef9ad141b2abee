//! The offer engine: decides whether a verified payment gets a sponsored
//! offer attached, reserving campaign budget as the side effect.
//!
//! Budget is reserved at offer time, not at settlement time. Every offer
//! shown to a user is already funded, so showing many offers concurrently
//! can never promise more rebates than a campaign can pay.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::format_amount;
use crate::campaign::Coupon;
use crate::ledger::CampaignStore;
use crate::session::PaymentSession;

/// A minted offer, shown to the user alongside the paid content. Ephemeral:
/// derived from a campaign plus the triggering session, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsoredOffer {
    /// Campaign id of the sponsoring merchant.
    pub sponsor_id: String,
    pub merchant_name: String,
    pub offer_text: String,
    /// Decimal string ("5.00"); base units never leave the ledger.
    pub rebate_amount: String,
    pub rebate_asset: String,
    pub rebate_network: String,
    pub coupons: Vec<Coupon>,
    /// Checkout link with the session embedded for conversion attribution.
    pub checkout_url: String,
    pub session_id: String,
    pub offer_id: String,
}

/// `offer-` plus 12 hex chars.
pub fn new_offer_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("offer-{}", &id[..12])
}

pub struct OfferEngine {
    campaigns: Arc<dyn CampaignStore>,
    checkout_base_url: String,
}

impl OfferEngine {
    pub fn new(campaigns: Arc<dyn CampaignStore>, checkout_base_url: impl Into<String>) -> Self {
        Self {
            campaigns,
            checkout_base_url: checkout_base_url.into(),
        }
    }

    /// Mint an offer for a verified session, or nothing.
    ///
    /// Sponsorship is best-effort: no eligible campaign, a lost reservation
    /// race, or a storage hiccup all yield `None` so the paid content is
    /// never blocked on sponsor bookkeeping.
    pub fn generate_offer(&self, session: &PaymentSession) -> Option<SponsoredOffer> {
        let campaigns = match self.campaigns.list_active() {
            Ok(campaigns) => campaigns,
            Err(e) => {
                tracing::error!(error = %e, "campaign lookup failed, skipping sponsorship");
                return None;
            }
        };

        // Selection policy is deliberately simple: first eligible campaign.
        let campaign = match campaigns.into_iter().next() {
            Some(campaign) => campaign,
            None => {
                tracing::debug!(
                    session_id = %session.session_id,
                    "no eligible campaigns, no offer"
                );
                return None;
            }
        };

        match self
            .campaigns
            .reserve_budget(&campaign.campaign_id, campaign.rebate_amount)
        {
            Ok(true) => {}
            Ok(false) => {
                // Lost the race or the campaign was paused in between.
                tracing::debug!(
                    campaign_id = %campaign.campaign_id,
                    session_id = %session.session_id,
                    "budget reservation declined, no offer"
                );
                return None;
            }
            Err(e) => {
                tracing::error!(
                    campaign_id = %campaign.campaign_id,
                    error = %e,
                    "budget reservation failed, no offer"
                );
                return None;
            }
        }

        let offer_id = new_offer_id();
        tracing::info!(
            offer_id = %offer_id,
            campaign_id = %campaign.campaign_id,
            session_id = %session.session_id,
            rebate = %format_amount(campaign.rebate_amount),
            "minted sponsored offer"
        );

        Some(SponsoredOffer {
            sponsor_id: campaign.campaign_id,
            merchant_name: campaign.merchant_name,
            offer_text: campaign.offer_text,
            rebate_amount: format_amount(campaign.rebate_amount),
            rebate_asset: campaign.rebate_asset,
            rebate_network: campaign.rebate_network,
            coupons: campaign.coupons,
            checkout_url: format!(
                "{}/checkout?session={}",
                self.checkout_base_url.trim_end_matches('/'),
                session.session_id
            ),
            session_id: session.session_id.clone(),
            offer_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::Campaign;
    use crate::memory::MemoryCampaignStore;
    use chrono::Utc;

    fn store_with(campaigns: &[Campaign]) -> Arc<MemoryCampaignStore> {
        let store = Arc::new(MemoryCampaignStore::new());
        for campaign in campaigns {
            store.insert_if_absent(campaign).unwrap();
        }
        store
    }

    fn campaign(id: &str, rebate: u64, budget: u64) -> Campaign {
        let now = Utc::now();
        Campaign {
            campaign_id: id.to_string(),
            merchant_name: "Burger Palace".to_string(),
            offer_text: "Get $5 back".to_string(),
            rebate_amount: rebate,
            rebate_asset: "USDC".to_string(),
            rebate_network: "eip155:84532".to_string(),
            budget_total: budget,
            budget_remaining: budget,
            budget_asset: "USDC".to_string(),
            coupons: vec![],
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn session() -> PaymentSession {
        PaymentSession::new("sess-1", "0xabc", "eip155:84532", 100_000)
    }

    #[test]
    fn test_offer_reserves_budget() {
        let store = store_with(&[campaign("promo-1", 5_000_000, 10_000_000)]);
        let engine = OfferEngine::new(store.clone(), "https://shop.example");

        let offer = engine.generate_offer(&session()).unwrap();
        assert_eq!(offer.sponsor_id, "promo-1");
        assert_eq!(offer.rebate_amount, "5.00");
        assert_eq!(offer.session_id, "sess-1");
        assert_eq!(
            offer.checkout_url,
            "https://shop.example/checkout?session=sess-1"
        );
        assert!(offer.offer_id.starts_with("offer-"));

        assert_eq!(
            store.get("promo-1").unwrap().unwrap().budget_remaining,
            5_000_000
        );
    }

    #[test]
    fn test_no_campaigns_means_no_offer() {
        let engine = OfferEngine::new(store_with(&[]), "https://shop.example");
        assert!(engine.generate_offer(&session()).is_none());
    }

    #[test]
    fn test_exhausted_budget_means_no_offer() {
        let store = store_with(&[campaign("promo-1", 5_000_000, 10_000_000)]);
        let engine = OfferEngine::new(store.clone(), "https://shop.example");

        assert!(engine.generate_offer(&session()).is_some());
        assert!(engine.generate_offer(&session()).is_some());
        // Budget gone: the third request gets no offer, not an error.
        assert!(engine.generate_offer(&session()).is_none());
        assert_eq!(store.get("promo-1").unwrap().unwrap().budget_remaining, 0);
    }

    #[test]
    fn test_offer_wire_format() {
        let store = store_with(&[campaign("promo-1", 2_500_000, 10_000_000)]);
        let engine = OfferEngine::new(store, "https://shop.example/");

        let offer = engine.generate_offer(&session()).unwrap();
        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(json["sponsorId"], "promo-1");
        assert_eq!(json["rebateAmount"], "2.50");
        assert_eq!(json["merchantName"], "Burger Palace");
        assert!(json.get("sponsor_id").is_none());
    }
}
