//! In-memory ledger stores backed by DashMap. Fast, lost on restart; used by
//! tests and ephemeral deployments.
//!
//! Per-key atomicity comes from DashMap: `entry()` claims are
//! first-writer-wins and `get_mut` holds the shard lock for the duration of
//! a mutation, which is all the serialization the single-key invariants
//! need.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::campaign::Campaign;
use crate::error::SponsorError;
use crate::ledger::{CampaignStore, SessionRegistry, SettlementLedger, WebhookLedger};
use crate::session::PaymentSession;
use crate::settlement::{Settlement, SettlementStatus};
use crate::webhook::{WebhookRecord, WebhookStatus};

#[derive(Default)]
pub struct MemoryCampaignStore {
    campaigns: DashMap<String, Campaign>,
}

impl MemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CampaignStore for MemoryCampaignStore {
    fn get(&self, campaign_id: &str) -> Result<Option<Campaign>, SponsorError> {
        Ok(self.campaigns.get(campaign_id).map(|c| c.value().clone()))
    }

    fn list_active(&self) -> Result<Vec<Campaign>, SponsorError> {
        let mut active: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|entry| entry.is_eligible())
            .map(|entry| entry.value().clone())
            .collect();
        // DashMap iteration order is arbitrary; keep "first" deterministic.
        active.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.campaign_id.cmp(&b.campaign_id))
        });
        Ok(active)
    }

    fn first_active(&self) -> Result<Option<Campaign>, SponsorError> {
        // Active flag only, no budget filter; same ordering as list_active.
        Ok(self
            .campaigns
            .iter()
            .filter(|entry| entry.active)
            .map(|entry| entry.value().clone())
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.campaign_id.cmp(&b.campaign_id))
            }))
    }

    fn reserve_budget(&self, campaign_id: &str, amount: u64) -> Result<bool, SponsorError> {
        // get_mut holds the shard lock, so check-and-subtract is atomic per key.
        match self.campaigns.get_mut(campaign_id) {
            Some(mut campaign) if campaign.active && campaign.budget_remaining >= amount => {
                campaign.budget_remaining -= amount;
                campaign.updated_at = chrono::Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn insert_if_absent(&self, campaign: &Campaign) -> Result<bool, SponsorError> {
        match self.campaigns.entry(campaign.campaign_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(v) => {
                v.insert(campaign.clone());
                Ok(true)
            }
        }
    }
}

#[derive(Default)]
pub struct MemorySessionRegistry {
    sessions: DashMap<String, PaymentSession>,
}

impl MemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionRegistry for MemorySessionRegistry {
    fn create(&self, session: &PaymentSession) -> Result<(), SponsorError> {
        match self.sessions.entry(session.session_id.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    "duplicate session registration, keeping original"
                );
                Ok(())
            }
            Entry::Vacant(v) => {
                v.insert(session.clone());
                Ok(())
            }
        }
    }

    fn get(&self, session_id: &str) -> Result<Option<PaymentSession>, SponsorError> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    fn mark_settled(&self, session_id: &str) -> Result<bool, SponsorError> {
        match self.sessions.get_mut(session_id) {
            Some(mut session) if !session.rebate_settled => {
                session.rebate_settled = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryWebhookLedger {
    webhooks: DashMap<String, WebhookRecord>,
}

impl MemoryWebhookLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WebhookLedger for MemoryWebhookLedger {
    fn create_if_absent(&self, record: &WebhookRecord) -> Result<bool, SponsorError> {
        match self.webhooks.entry(record.webhook_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(v) => {
                v.insert(record.clone());
                Ok(true)
            }
        }
    }

    fn get(&self, webhook_id: &str) -> Result<Option<WebhookRecord>, SponsorError> {
        Ok(self.webhooks.get(webhook_id).map(|w| w.value().clone()))
    }

    fn update_status(
        &self,
        webhook_id: &str,
        status: WebhookStatus,
        error_message: Option<&str>,
        tx_hash: Option<&str>,
    ) -> Result<(), SponsorError> {
        if let Some(mut record) = self.webhooks.get_mut(webhook_id) {
            record.status = status;
            record.processed_at = Some(chrono::Utc::now());
            record.error_message = error_message.map(str::to_string);
            record.rebate_tx_hash = tx_hash.map(str::to_string);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySettlementLedger {
    settlements: DashMap<String, Settlement>,
}

impl MemorySettlementLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettlementLedger for MemorySettlementLedger {
    fn create(&self, settlement: &Settlement) -> Result<(), SponsorError> {
        self.settlements
            .insert(settlement.settlement_id.clone(), settlement.clone());
        Ok(())
    }

    fn update_status(
        &self,
        settlement_id: &str,
        status: SettlementStatus,
        tx_hash: Option<&str>,
    ) -> Result<(), SponsorError> {
        if let Some(mut settlement) = self.settlements.get_mut(settlement_id) {
            settlement.status = status;
            if status == SettlementStatus::Confirmed {
                settlement.tx_hash = tx_hash.map(str::to_string);
                settlement.confirmed_at = Some(chrono::Utc::now());
            }
        }
        Ok(())
    }

    fn list_for_session(&self, session_id: &str) -> Result<Vec<Settlement>, SponsorError> {
        let mut rows: Vec<Settlement> = self
            .settlements
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| {
            b.settled_at
                .cmp(&a.settled_at)
                .then_with(|| a.settlement_id.cmp(&b.settlement_id))
        });
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn test_campaign(id: &str, rebate: u64, budget: u64) -> Campaign {
        let now = Utc::now();
        Campaign {
            campaign_id: id.to_string(),
            merchant_name: "Noodle Bar".to_string(),
            offer_text: "$2.50 back on ramen".to_string(),
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

    #[test]
    fn test_reserve_budget_scenario() {
        let store = MemoryCampaignStore::new();
        store
            .insert_if_absent(&test_campaign("promo-1", 5_000_000, 10_000_000))
            .unwrap();

        assert!(store.reserve_budget("promo-1", 5_000_000).unwrap());
        assert!(store.reserve_budget("promo-1", 5_000_000).unwrap());
        assert!(!store.reserve_budget("promo-1", 5_000_000).unwrap());
        assert_eq!(store.get("promo-1").unwrap().unwrap().budget_remaining, 0);
    }

    #[test]
    fn test_concurrent_reservations_never_oversubscribe() {
        let store = Arc::new(MemoryCampaignStore::new());
        store
            .insert_if_absent(&test_campaign("promo-1", 5_000_000, 10_000_000))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.reserve_budget("promo-1", 5_000_000).unwrap())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();

        assert_eq!(wins, 2);
        assert_eq!(store.get("promo-1").unwrap().unwrap().budget_remaining, 0);
    }

    #[test]
    fn test_list_active_is_deterministic_and_filtered() {
        let store = MemoryCampaignStore::new();
        let mut early = test_campaign("early", 1_000_000, 10_000_000);
        early.created_at = Utc::now() - chrono::Duration::hours(1);
        store.insert_if_absent(&early).unwrap();
        store
            .insert_if_absent(&test_campaign("late", 1_000_000, 10_000_000))
            .unwrap();
        store
            .insert_if_absent(&test_campaign("broke", 5_000_000, 1_000_000))
            .unwrap();

        let active = store.list_active().unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].campaign_id, "early");
    }

    #[test]
    fn test_first_active_ignores_budget_filter() {
        let store = MemoryCampaignStore::new();
        store
            .insert_if_absent(&test_campaign("promo-1", 5_000_000, 5_000_000))
            .unwrap();
        assert!(store.reserve_budget("promo-1", 5_000_000).unwrap());

        assert!(store.list_active().unwrap().is_empty());
        let first = store.first_active().unwrap().unwrap();
        assert_eq!(first.campaign_id, "promo-1");
        assert_eq!(first.budget_remaining, 0);
    }

    #[test]
    fn test_webhook_create_if_absent_races() {
        let ledger = Arc::new(MemoryWebhookLedger::new());
        let webhook = crate::webhook::ConversionWebhook {
            webhook_id: "wh-race".to_string(),
            session_id: "sess-1".to_string(),
            user_address: "0xabc".to_string(),
            purchase_amount: 10.0,
            purchase_asset: "USD".to_string(),
            timestamp: "2026-08-01T12:00:00Z".to_string(),
            merchant_id: None,
        };
        let record = WebhookRecord::processing(&webhook);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let record = record.clone();
                std::thread::spawn(move || ledger.create_if_absent(&record).unwrap())
            })
            .collect();

        let firsts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();

        assert_eq!(firsts, 1);
    }

    #[test]
    fn test_mark_settled_flips_exactly_once() {
        let registry = MemorySessionRegistry::new();
        registry
            .create(&PaymentSession::new("sess-1", "0xabc", "eip155:84532", 100_000))
            .unwrap();

        assert!(registry.mark_settled("sess-1").unwrap());
        assert!(!registry.mark_settled("sess-1").unwrap());
        assert!(!registry.mark_settled("missing").unwrap());
    }

    #[test]
    fn test_settlements_listed_newest_first() {
        let ledger = MemorySettlementLedger::new();
        let mut older = Settlement::pending(
            "sess-1", "wh-1", "0xabc", 1, "USDC", "eip155:84532", "promo-1", None,
        );
        older.settled_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = Settlement::pending(
            "sess-1", "wh-2", "0xabc", 1, "USDC", "eip155:84532", "promo-1", None,
        );
        ledger.create(&older).unwrap();
        ledger.create(&newer).unwrap();

        let rows = ledger.list_for_session("sess-1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].settlement_id, newer.settlement_id);
    }
}
