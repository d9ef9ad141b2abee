//! Storage traits for the four ledgers, plus the [`Ledger`] aggregate that
//! request handlers receive.
//!
//! Each store guards exactly one invariant: the Campaign Store owns the
//! budget decision, the Session Registry owns anti-replay, the Webhook
//! Ledger owns idempotency, and the Settlement Ledger is pure record
//! keeping. There is no cross-store lock; operations on different keys never
//! contend.
//!
//! Two backends ship: SQLite ([`crate::sqlite`]) for deployments and an
//! in-memory one ([`crate::memory`]) for tests and ephemeral runs. Methods
//! are synchronous and short; callers never hold a store lock across an
//! await point.

use std::path::Path;
use std::sync::Arc;

use crate::campaign::Campaign;
use crate::error::SponsorError;
use crate::session::PaymentSession;
use crate::settlement::{Settlement, SettlementStatus};
use crate::webhook::{WebhookRecord, WebhookStatus};

/// Campaign budgets. `reserve_budget` is the only mutation after seeding.
pub trait CampaignStore: Send + Sync {
    fn get(&self, campaign_id: &str) -> Result<Option<Campaign>, SponsorError>;

    /// Campaigns that can back one more rebate: active and
    /// `budget_remaining >= rebate_amount`.
    fn list_active(&self) -> Result<Vec<Campaign>, SponsorError>;

    /// First active campaign in creation order, regardless of remaining
    /// budget. Settlement resolves campaigns through this: the rebate was
    /// already reserved at offer time, so a drained budget must not block
    /// the conversion it was drained for.
    fn first_active(&self) -> Result<Option<Campaign>, SponsorError>;

    /// Atomic compare-and-subtract. Returns true and decrements
    /// `budget_remaining` by `amount` iff the campaign exists, is active,
    /// and has at least `amount` left; otherwise changes nothing and
    /// returns false. Unknown ids and exhausted budgets are expected
    /// traffic, not errors.
    fn reserve_budget(&self, campaign_id: &str, amount: u64) -> Result<bool, SponsorError>;

    /// First-writer-wins insert used by idempotent seeding. Returns true if
    /// the campaign was inserted, false if the id already existed.
    fn insert_if_absent(&self, campaign: &Campaign) -> Result<bool, SponsorError>;
}

/// Verified payment sessions, the anti-replay boundary.
pub trait SessionRegistry: Send + Sync {
    /// Insert a session. A duplicate `session_id` is swallowed with a WARN
    /// (verification retries are expected), never a hard error.
    fn create(&self, session: &PaymentSession) -> Result<(), SponsorError>;

    fn get(&self, session_id: &str) -> Result<Option<PaymentSession>, SponsorError>;

    /// Idempotent flip of `rebate_settled` to true. Returns true if this
    /// call performed the flip, false if it was already set (the caller
    /// treats that as an anomaly worth logging).
    fn mark_settled(&self, session_id: &str) -> Result<bool, SponsorError>;
}

/// Webhook attempts keyed by the merchant-supplied webhook id.
pub trait WebhookLedger: Send + Sync {
    /// Atomic first-writer-wins insert. Under concurrent identical
    /// deliveries exactly one caller gets true; the rest see false and read
    /// the existing record instead of processing again.
    fn create_if_absent(&self, record: &WebhookRecord) -> Result<bool, SponsorError>;

    fn get(&self, webhook_id: &str) -> Result<Option<WebhookRecord>, SponsorError>;

    /// Set the terminal state and `processed_at`.
    fn update_status(
        &self,
        webhook_id: &str,
        status: WebhookStatus,
        error_message: Option<&str>,
        tx_hash: Option<&str>,
    ) -> Result<(), SponsorError>;
}

/// Rebate payout records for audit and reconciliation.
pub trait SettlementLedger: Send + Sync {
    fn create(&self, settlement: &Settlement) -> Result<(), SponsorError>;

    /// `Confirmed` also stamps `confirmed_at` and the tx hash.
    fn update_status(
        &self,
        settlement_id: &str,
        status: SettlementStatus,
        tx_hash: Option<&str>,
    ) -> Result<(), SponsorError>;

    /// All settlement attempts for a session, most recent first.
    fn list_for_session(&self, session_id: &str) -> Result<Vec<Settlement>, SponsorError>;
}

/// The four stores as one injectable handle. Cloning is cheap (four Arcs).
#[derive(Clone)]
pub struct Ledger {
    pub campaigns: Arc<dyn CampaignStore>,
    pub sessions: Arc<dyn SessionRegistry>,
    pub webhooks: Arc<dyn WebhookLedger>,
    pub settlements: Arc<dyn SettlementLedger>,
}

impl Ledger {
    /// SQLite-backed ledger at `path`. Creates the schema if missing.
    pub fn open_sqlite(path: &Path) -> Result<Self, SponsorError> {
        Ok(Self {
            campaigns: Arc::new(crate::sqlite::SqliteCampaignStore::open(path)?),
            sessions: Arc::new(crate::sqlite::SqliteSessionRegistry::open(path)?),
            webhooks: Arc::new(crate::sqlite::SqliteWebhookLedger::open(path)?),
            settlements: Arc::new(crate::sqlite::SqliteSettlementLedger::open(path)?),
        })
    }

    /// Process-local ledger for tests and ephemeral deployments.
    pub fn in_memory() -> Self {
        Self {
            campaigns: Arc::new(crate::memory::MemoryCampaignStore::new()),
            sessions: Arc::new(crate::memory::MemorySessionRegistry::new()),
            webhooks: Arc::new(crate::memory::MemoryWebhookLedger::new()),
            settlements: Arc::new(crate::memory::MemorySettlementLedger::new()),
        }
    }

    /// Idempotent campaign provisioning: inserts campaigns whose ids are
    /// new, leaves existing ones (and their spent budgets) untouched.
    /// Returns how many were newly inserted.
    pub fn seed_campaigns(&self, campaigns: &[Campaign]) -> Result<usize, SponsorError> {
        let mut inserted = 0;
        for campaign in campaigns {
            if self.campaigns.insert_if_absent(campaign)? {
                inserted += 1;
                tracing::info!(
                    campaign_id = %campaign.campaign_id,
                    merchant = %campaign.merchant_name,
                    "seeded campaign"
                );
            } else {
                tracing::debug!(
                    campaign_id = %campaign.campaign_id,
                    "campaign already provisioned, skipping"
                );
            }
        }
        Ok(inserted)
    }
}
