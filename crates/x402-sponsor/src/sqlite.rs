//! SQLite-backed ledger stores. Survive restarts; safe across processes.
//!
//! Each store wraps its own connection in a `Mutex`. Critical sections are
//! single statements and never span an await point, so contention stays per
//! store. Mutations that carry an invariant are pushed down to the database:
//! budget reservation is one conditional UPDATE (compare-and-subtract,
//! atomic even across processes) and webhook creation is a bare INSERT whose
//! primary-key constraint is the first-writer-wins arbiter.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::campaign::{Campaign, Coupon};
use crate::error::SponsorError;
use crate::ledger::{CampaignStore, SessionRegistry, SettlementLedger, WebhookLedger};
use crate::session::PaymentSession;
use crate::settlement::{Settlement, SettlementStatus};
use crate::webhook::{WebhookRecord, WebhookStatus};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS campaigns (
    campaign_id      TEXT PRIMARY KEY,
    merchant_name    TEXT NOT NULL,
    offer_text       TEXT NOT NULL,
    rebate_amount    INTEGER NOT NULL,
    rebate_asset     TEXT NOT NULL,
    rebate_network   TEXT NOT NULL,
    budget_total     INTEGER NOT NULL,
    budget_remaining INTEGER NOT NULL CHECK (budget_remaining >= 0),
    budget_asset     TEXT NOT NULL,
    coupons          TEXT NOT NULL DEFAULT '[]',
    active           INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS payment_sessions (
    session_id     TEXT PRIMARY KEY,
    user_address   TEXT NOT NULL,
    network        TEXT NOT NULL,
    amount_paid    INTEGER NOT NULL,
    payment_asset  TEXT NOT NULL,
    payment_hash   TEXT,
    verified_at    TEXT NOT NULL,
    rebate_settled INTEGER NOT NULL DEFAULT 0,
    correlation_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON payment_sessions(user_address);
CREATE INDEX IF NOT EXISTS idx_sessions_settled ON payment_sessions(rebate_settled);

CREATE TABLE IF NOT EXISTS webhooks (
    webhook_id     TEXT PRIMARY KEY,
    session_id     TEXT NOT NULL,
    user_address   TEXT NOT NULL,
    status         TEXT NOT NULL CHECK (status IN ('processing', 'completed', 'failed')),
    received_at    TEXT NOT NULL,
    processed_at   TEXT,
    error_message  TEXT,
    rebate_tx_hash TEXT
);
CREATE INDEX IF NOT EXISTS idx_webhooks_session ON webhooks(session_id);
CREATE INDEX IF NOT EXISTS idx_webhooks_status ON webhooks(status);

CREATE TABLE IF NOT EXISTS settlements (
    settlement_id  TEXT PRIMARY KEY,
    session_id     TEXT NOT NULL,
    webhook_id     TEXT NOT NULL,
    user_address   TEXT NOT NULL,
    rebate_amount  INTEGER NOT NULL,
    rebate_asset   TEXT NOT NULL,
    network        TEXT NOT NULL,
    tx_hash        TEXT,
    status         TEXT NOT NULL CHECK (status IN ('pending', 'confirmed', 'failed')),
    campaign_id    TEXT NOT NULL,
    settled_at     TEXT NOT NULL,
    confirmed_at   TEXT,
    correlation_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_settlements_session ON settlements(session_id);
CREATE INDEX IF NOT EXISTS idx_settlements_webhook ON settlements(webhook_id);

PRAGMA journal_mode=WAL;
PRAGMA busy_timeout=5000;
";

/// Open a connection to the ledger database, creating the schema if needed.
/// Every store opens its own connection to the same file; WAL plus the busy
/// timeout keep them from tripping over each other.
fn open_connection(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Recover from a poisoned lock instead of propagating the panic. The guard
/// only protects the connection handle; a panicked writer leaves no
/// half-applied SQL behind.
fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    match conn.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("ledger connection mutex poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_ts_opt(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, s)).transpose()
}

pub struct SqliteCampaignStore {
    conn: Mutex<Connection>,
}

impl SqliteCampaignStore {
    pub fn open(path: &Path) -> Result<Self, SponsorError> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
        })
    }
}

fn row_to_campaign(row: &rusqlite::Row<'_>) -> rusqlite::Result<Campaign> {
    let coupons_json: String = row.get(9)?;
    let coupons: Vec<Coupon> = serde_json::from_str(&coupons_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Campaign {
        campaign_id: row.get(0)?,
        merchant_name: row.get(1)?,
        offer_text: row.get(2)?,
        rebate_amount: row.get(3)?,
        rebate_asset: row.get(4)?,
        rebate_network: row.get(5)?,
        budget_total: row.get(6)?,
        budget_remaining: row.get(7)?,
        budget_asset: row.get(8)?,
        coupons,
        active: row.get(10)?,
        created_at: parse_ts(11, row.get(11)?)?,
        updated_at: parse_ts(12, row.get(12)?)?,
    })
}

const CAMPAIGN_COLUMNS: &str = "campaign_id, merchant_name, offer_text, rebate_amount, \
     rebate_asset, rebate_network, budget_total, budget_remaining, budget_asset, coupons, \
     active, created_at, updated_at";

impl CampaignStore for SqliteCampaignStore {
    fn get(&self, campaign_id: &str) -> Result<Option<Campaign>, SponsorError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE campaign_id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![campaign_id], row_to_campaign)?;
        rows.next().transpose().map_err(SponsorError::from)
    }

    fn list_active(&self) -> Result<Vec<Campaign>, SponsorError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
             WHERE active = 1 AND budget_remaining >= rebate_amount
             ORDER BY created_at, campaign_id"
        ))?;
        let rows = stmt.query_map([], row_to_campaign)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(SponsorError::from)
    }

    fn first_active(&self) -> Result<Option<Campaign>, SponsorError> {
        let conn = lock(&self.conn);
        // No budget filter: settlement must still find the campaign whose
        // reservation drained the budget.
        let mut stmt = conn.prepare(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
             WHERE active = 1
             ORDER BY created_at, campaign_id
             LIMIT 1"
        ))?;
        let mut rows = stmt.query_map([], row_to_campaign)?;
        rows.next().transpose().map_err(SponsorError::from)
    }

    fn reserve_budget(&self, campaign_id: &str, amount: u64) -> Result<bool, SponsorError> {
        let conn = lock(&self.conn);
        // Single conditional UPDATE: the check and the decrement are one
        // atomic statement, so concurrent reservations can never drive the
        // budget negative.
        let changed = conn.execute(
            "UPDATE campaigns
             SET budget_remaining = budget_remaining - ?1, updated_at = ?2
             WHERE campaign_id = ?3 AND active = 1 AND budget_remaining >= ?1",
            params![amount, Utc::now().to_rfc3339(), campaign_id],
        )?;
        Ok(changed > 0)
    }

    fn insert_if_absent(&self, campaign: &Campaign) -> Result<bool, SponsorError> {
        let coupons_json = serde_json::to_string(&campaign.coupons)?;
        let conn = lock(&self.conn);
        let result = conn.execute(
            "INSERT INTO campaigns (campaign_id, merchant_name, offer_text, rebate_amount,
                 rebate_asset, rebate_network, budget_total, budget_remaining, budget_asset,
                 coupons, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                campaign.campaign_id,
                campaign.merchant_name,
                campaign.offer_text,
                campaign.rebate_amount,
                campaign.rebate_asset,
                campaign.rebate_network,
                campaign.budget_total,
                campaign.budget_remaining,
                campaign.budget_asset,
                coupons_json,
                campaign.active,
                campaign.created_at.to_rfc3339(),
                campaign.updated_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(e) if is_constraint_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct SqliteSessionRegistry {
    conn: Mutex<Connection>,
}

impl SqliteSessionRegistry {
    pub fn open(path: &Path) -> Result<Self, SponsorError> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentSession> {
    Ok(PaymentSession {
        session_id: row.get(0)?,
        user_address: row.get(1)?,
        network: row.get(2)?,
        amount_paid: row.get(3)?,
        payment_asset: row.get(4)?,
        payment_hash: row.get(5)?,
        verified_at: parse_ts(6, row.get(6)?)?,
        rebate_settled: row.get(7)?,
        correlation_id: row.get(8)?,
    })
}

impl SessionRegistry for SqliteSessionRegistry {
    fn create(&self, session: &PaymentSession) -> Result<(), SponsorError> {
        let conn = lock(&self.conn);
        let result = conn.execute(
            "INSERT INTO payment_sessions (session_id, user_address, network, amount_paid,
                 payment_asset, payment_hash, verified_at, rebate_settled, correlation_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.session_id,
                session.user_address,
                session.network,
                session.amount_paid,
                session.payment_asset,
                session.payment_hash,
                session.verified_at.to_rfc3339(),
                session.rebate_settled,
                session.correlation_id,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => {
                // Verification retries re-register the same session; the
                // original row (and its settled flag) wins.
                tracing::warn!(
                    session_id = %session.session_id,
                    "duplicate session registration, keeping original"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, session_id: &str) -> Result<Option<PaymentSession>, SponsorError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT session_id, user_address, network, amount_paid, payment_asset,
                 payment_hash, verified_at, rebate_settled, correlation_id
             FROM payment_sessions WHERE session_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![session_id], row_to_session)?;
        rows.next().transpose().map_err(SponsorError::from)
    }

    fn mark_settled(&self, session_id: &str) -> Result<bool, SponsorError> {
        let conn = lock(&self.conn);
        let changed = conn.execute(
            "UPDATE payment_sessions SET rebate_settled = 1
             WHERE session_id = ?1 AND rebate_settled = 0",
            params![session_id],
        )?;
        Ok(changed > 0)
    }
}

pub struct SqliteWebhookLedger {
    conn: Mutex<Connection>,
}

impl SqliteWebhookLedger {
    pub fn open(path: &Path) -> Result<Self, SponsorError> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
        })
    }
}

fn row_to_webhook(row: &rusqlite::Row<'_>) -> rusqlite::Result<WebhookRecord> {
    let status_raw: String = row.get(3)?;
    let status = WebhookStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown webhook status '{status_raw}'").into(),
        )
    })?;
    Ok(WebhookRecord {
        webhook_id: row.get(0)?,
        session_id: row.get(1)?,
        user_address: row.get(2)?,
        status,
        received_at: parse_ts(4, row.get(4)?)?,
        processed_at: parse_ts_opt(5, row.get(5)?)?,
        error_message: row.get(6)?,
        rebate_tx_hash: row.get(7)?,
    })
}

impl WebhookLedger for SqliteWebhookLedger {
    fn create_if_absent(&self, record: &WebhookRecord) -> Result<bool, SponsorError> {
        let conn = lock(&self.conn);
        // Bare INSERT; the primary-key constraint arbitrates concurrent
        // duplicate deliveries at the database level.
        let result = conn.execute(
            "INSERT INTO webhooks (webhook_id, session_id, user_address, status,
                 received_at, processed_at, error_message, rebate_tx_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.webhook_id,
                record.session_id,
                record.user_address,
                record.status.as_str(),
                record.received_at.to_rfc3339(),
                record.processed_at.map(|t| t.to_rfc3339()),
                record.error_message,
                record.rebate_tx_hash,
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(e) if is_constraint_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, webhook_id: &str) -> Result<Option<WebhookRecord>, SponsorError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT webhook_id, session_id, user_address, status, received_at,
                 processed_at, error_message, rebate_tx_hash
             FROM webhooks WHERE webhook_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![webhook_id], row_to_webhook)?;
        rows.next().transpose().map_err(SponsorError::from)
    }

    fn update_status(
        &self,
        webhook_id: &str,
        status: WebhookStatus,
        error_message: Option<&str>,
        tx_hash: Option<&str>,
    ) -> Result<(), SponsorError> {
        let conn = lock(&self.conn);
        conn.execute(
            "UPDATE webhooks
             SET status = ?1, processed_at = ?2, error_message = ?3, rebate_tx_hash = ?4
             WHERE webhook_id = ?5",
            params![
                status.as_str(),
                Utc::now().to_rfc3339(),
                error_message,
                tx_hash,
                webhook_id,
            ],
        )?;
        Ok(())
    }
}

pub struct SqliteSettlementLedger {
    conn: Mutex<Connection>,
}

impl SqliteSettlementLedger {
    pub fn open(path: &Path) -> Result<Self, SponsorError> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
        })
    }
}

fn row_to_settlement(row: &rusqlite::Row<'_>) -> rusqlite::Result<Settlement> {
    let status_raw: String = row.get(8)?;
    let status = SettlementStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown settlement status '{status_raw}'").into(),
        )
    })?;
    Ok(Settlement {
        settlement_id: row.get(0)?,
        session_id: row.get(1)?,
        webhook_id: row.get(2)?,
        user_address: row.get(3)?,
        rebate_amount: row.get(4)?,
        rebate_asset: row.get(5)?,
        network: row.get(6)?,
        tx_hash: row.get(7)?,
        status,
        campaign_id: row.get(9)?,
        settled_at: parse_ts(10, row.get(10)?)?,
        confirmed_at: parse_ts_opt(11, row.get(11)?)?,
        correlation_id: row.get(12)?,
    })
}

impl SettlementLedger for SqliteSettlementLedger {
    fn create(&self, settlement: &Settlement) -> Result<(), SponsorError> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO settlements (settlement_id, session_id, webhook_id, user_address,
                 rebate_amount, rebate_asset, network, tx_hash, status, campaign_id,
                 settled_at, confirmed_at, correlation_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                settlement.settlement_id,
                settlement.session_id,
                settlement.webhook_id,
                settlement.user_address,
                settlement.rebate_amount,
                settlement.rebate_asset,
                settlement.network,
                settlement.tx_hash,
                settlement.status.as_str(),
                settlement.campaign_id,
                settlement.settled_at.to_rfc3339(),
                settlement.confirmed_at.map(|t| t.to_rfc3339()),
                settlement.correlation_id,
            ],
        )?;
        Ok(())
    }

    fn update_status(
        &self,
        settlement_id: &str,
        status: SettlementStatus,
        tx_hash: Option<&str>,
    ) -> Result<(), SponsorError> {
        let conn = lock(&self.conn);
        match status {
            SettlementStatus::Confirmed => {
                conn.execute(
                    "UPDATE settlements SET status = ?1, tx_hash = ?2, confirmed_at = ?3
                     WHERE settlement_id = ?4",
                    params![
                        status.as_str(),
                        tx_hash,
                        Utc::now().to_rfc3339(),
                        settlement_id,
                    ],
                )?;
            }
            _ => {
                conn.execute(
                    "UPDATE settlements SET status = ?1 WHERE settlement_id = ?2",
                    params![status.as_str(), settlement_id],
                )?;
            }
        }
        Ok(())
    }

    fn list_for_session(&self, session_id: &str) -> Result<Vec<Settlement>, SponsorError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(
            "SELECT settlement_id, session_id, webhook_id, user_address, rebate_amount,
                 rebate_asset, network, tx_hash, status, campaign_id, settled_at,
                 confirmed_at, correlation_id
             FROM settlements WHERE session_id = ?1
             ORDER BY settled_at DESC, settlement_id",
        )?;
        let rows = stmt.query_map(params![session_id], row_to_settlement)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(SponsorError::from)
    }
}
