//! The webhook processor: the orchestrator that turns a merchant's
//! conversion report into at most one rebate payout.
//!
//! State machine per webhook id: unseen -> processing -> completed | failed.
//! The gates run strictly in order: authenticity, parse, idempotency,
//! anti-replay, campaign re-validation, payout, write-back. Each gate
//! observes the effect of the previous one; webhook ids never observe each
//! other.
//!
//! The payout call is the only slow operation and runs under a timeout with
//! no ledger lock held. Terminal statuses are written last, after the payout
//! result is known, so a crash mid-payout leaves `processing`/`pending` rows
//! rather than corrupt state.

use std::time::Duration;

use crate::constants::DEFAULT_PAYOUT_TIMEOUT_SECS;
use crate::error::SponsorError;
use crate::hmac;
use crate::ledger::Ledger;
use crate::payout::{PayoutRequest, PayoutSender};
use crate::settlement::{Settlement, SettlementStatus};
use crate::webhook::{ConversionWebhook, WebhookRecord, WebhookStatus};

/// Why a webhook was recorded as `failed`. Drives metrics labels and lets
/// callers distinguish replay violations from payout trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    SessionNotFound,
    SessionAlreadySettled,
    NoActiveCampaign,
    Payout,
    PayoutTimeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::SessionNotFound => "session_not_found",
            FailureKind::SessionAlreadySettled => "session_already_settled",
            FailureKind::NoActiveCampaign => "no_active_campaign",
            FailureKind::Payout => "payout",
            FailureKind::PayoutTimeout => "payout_timeout",
        }
    }
}

/// Every non-exceptional way a webhook delivery can end. Authentication and
/// malformed-body rejections are [`SponsorError`]s instead: they happen
/// before any record exists.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// First delivery, rebate sent.
    Settled {
        webhook_id: String,
        settlement_id: String,
        tx_hash: String,
        rebate_amount: u64,
        rebate_asset: String,
    },
    /// Duplicate of a completed webhook; carries the recorded tx hash.
    AlreadyCompleted {
        webhook_id: String,
        tx_hash: Option<String>,
    },
    /// Duplicate of a failed webhook. Failed is terminal: the merchant
    /// retries with a fresh webhook id, never by re-driving this one.
    AlreadyFailed {
        webhook_id: String,
        error: Option<String>,
    },
    /// A concurrent delivery of the same id is mid-flight.
    InFlight { webhook_id: String },
    /// First delivery, permanently failed; recorded against the id.
    Failed {
        webhook_id: String,
        kind: FailureKind,
        error: String,
    },
}

pub struct WebhookProcessor<P: PayoutSender> {
    ledger: Ledger,
    payout: P,
    webhook_secret: Vec<u8>,
    payout_timeout: Duration,
}

impl<P: PayoutSender> WebhookProcessor<P> {
    pub fn new(ledger: Ledger, payout: P, webhook_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            ledger,
            payout,
            webhook_secret: webhook_secret.into(),
            payout_timeout: Duration::from_secs(DEFAULT_PAYOUT_TIMEOUT_SECS),
        }
    }

    pub fn with_payout_timeout(mut self, timeout: Duration) -> Self {
        self.payout_timeout = timeout;
        self
    }

    /// Run one webhook delivery through the state machine.
    ///
    /// `raw_body` is the exact bytes received; the signature covers them
    /// byte for byte, so verification happens before parsing and before any
    /// ledger write.
    pub async fn process(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
        correlation_id: Option<&str>,
    ) -> Result<ProcessOutcome, SponsorError> {
        let corr = correlation_id.unwrap_or("-");

        // 1. Authenticity. Reject before the body is even parsed.
        let signature = signature.ok_or(SponsorError::InvalidSignature)?;
        if !hmac::verify_signature(&self.webhook_secret, raw_body, signature) {
            tracing::warn!(correlation_id = %corr, "webhook signature rejected");
            return Err(SponsorError::InvalidSignature);
        }

        // 2. Parse.
        let webhook: ConversionWebhook = serde_json::from_slice(raw_body)
            .map_err(|e| SponsorError::MalformedPayload(format!("webhook body: {e}")))?;

        tracing::info!(
            webhook_id = %webhook.webhook_id,
            session_id = %webhook.session_id,
            correlation_id = %corr,
            "processing conversion webhook"
        );

        // 3. Idempotency gate: exactly one delivery per id claims the record.
        let record = WebhookRecord::processing(&webhook);
        if !self.ledger.webhooks.create_if_absent(&record)? {
            return Ok(self.duplicate_outcome(&webhook.webhook_id, corr)?);
        }

        // 4. Anti-replay gate: the session must exist and be unsettled.
        let session = match self.ledger.sessions.get(&webhook.session_id)? {
            Some(session) => session,
            None => {
                let error = format!("payment session not found: {}", webhook.session_id);
                tracing::warn!(
                    webhook_id = %webhook.webhook_id,
                    session_id = %webhook.session_id,
                    correlation_id = %corr,
                    "webhook references an unpaid session"
                );
                return self.record_failure(&webhook.webhook_id, FailureKind::SessionNotFound, error);
            }
        };

        if session.rebate_settled {
            let error = format!(
                "rebate already settled for session {}",
                webhook.session_id
            );
            tracing::warn!(
                webhook_id = %webhook.webhook_id,
                session_id = %webhook.session_id,
                correlation_id = %corr,
                "replay attempt against a settled session"
            );
            return self.record_failure(
                &webhook.webhook_id,
                FailureKind::SessionAlreadySettled,
                error,
            );
        }

        if webhook.user_address != session.user_address {
            // The payout still goes to the webhook's address (the merchant
            // attests the conversion), but the mismatch is worth eyes.
            tracing::warn!(
                webhook_id = %webhook.webhook_id,
                webhook_address = %webhook.user_address,
                session_address = %session.user_address,
                "webhook user address differs from verified payer"
            );
        }

        // 5. Campaign re-validation. The rebate was reserved at offer time,
        // so this checks only that a campaign is still active. A drained
        // budget is not a blocker here (the drain IS the reservation), but
        // no active campaign at all means something was deactivated
        // mid-flight.
        let campaign = match self.ledger.campaigns.first_active()? {
            Some(campaign) => campaign,
            None => {
                tracing::warn!(
                    webhook_id = %webhook.webhook_id,
                    session_id = %webhook.session_id,
                    correlation_id = %corr,
                    "no active campaign at settlement time despite offer-time reservation"
                );
                return self.record_failure(
                    &webhook.webhook_id,
                    FailureKind::NoActiveCampaign,
                    "no active campaigns".to_string(),
                );
            }
        };

        // 6. Payout. Settlement row first, then the slow call with no lock
        // held, then the result write-back.
        let settlement = Settlement::pending(
            &webhook.session_id,
            &webhook.webhook_id,
            &webhook.user_address,
            campaign.rebate_amount,
            &campaign.rebate_asset,
            &session.network,
            &campaign.campaign_id,
            correlation_id,
        );
        self.ledger.settlements.create(&settlement)?;

        let request = PayoutRequest {
            user_address: &webhook.user_address,
            amount: campaign.rebate_amount,
            asset: &campaign.rebate_asset,
            network: &session.network,
        };

        let (payout_result, timed_out) =
            match tokio::time::timeout(self.payout_timeout, self.payout.send_rebate(&request))
                .await
            {
                Ok(result) => (result, false),
                Err(_) => (
                    Err(SponsorError::PayoutError(format!(
                        "payout timed out after {:?}",
                        self.payout_timeout
                    ))),
                    true,
                ),
            };

        match payout_result {
            Ok(receipt) => {
                self.ledger.settlements.update_status(
                    &settlement.settlement_id,
                    SettlementStatus::Confirmed,
                    Some(&receipt.tx_hash),
                )?;

                if !self.ledger.sessions.mark_settled(&webhook.session_id)? {
                    tracing::warn!(
                        session_id = %webhook.session_id,
                        webhook_id = %webhook.webhook_id,
                        "session already marked settled while finalizing"
                    );
                }

                self.ledger.webhooks.update_status(
                    &webhook.webhook_id,
                    WebhookStatus::Completed,
                    None,
                    Some(&receipt.tx_hash),
                )?;

                tracing::info!(
                    webhook_id = %webhook.webhook_id,
                    settlement_id = %settlement.settlement_id,
                    tx_hash = %receipt.tx_hash,
                    correlation_id = %corr,
                    "rebate settled"
                );

                Ok(ProcessOutcome::Settled {
                    webhook_id: webhook.webhook_id,
                    settlement_id: settlement.settlement_id,
                    tx_hash: receipt.tx_hash,
                    rebate_amount: campaign.rebate_amount,
                    rebate_asset: campaign.rebate_asset,
                })
            }
            Err(e) => {
                let error = e.to_string();
                tracing::error!(
                    webhook_id = %webhook.webhook_id,
                    settlement_id = %settlement.settlement_id,
                    error = %error,
                    correlation_id = %corr,
                    "rebate payout failed"
                );

                self.ledger.settlements.update_status(
                    &settlement.settlement_id,
                    SettlementStatus::Failed,
                    None,
                )?;

                let kind = if timed_out {
                    FailureKind::PayoutTimeout
                } else {
                    FailureKind::Payout
                };
                self.record_failure(&webhook.webhook_id, kind, error)
            }
        }
    }

    /// Map an already-present record to the duplicate-delivery outcome.
    fn duplicate_outcome(
        &self,
        webhook_id: &str,
        corr: &str,
    ) -> Result<ProcessOutcome, SponsorError> {
        let existing = self.ledger.webhooks.get(webhook_id)?;
        tracing::info!(
            webhook_id = %webhook_id,
            status = existing.as_ref().map(|r| r.status.as_str()).unwrap_or("unknown"),
            correlation_id = %corr,
            "duplicate webhook delivery"
        );
        Ok(match existing {
            Some(record) => match record.status {
                WebhookStatus::Completed => ProcessOutcome::AlreadyCompleted {
                    webhook_id: webhook_id.to_string(),
                    tx_hash: record.rebate_tx_hash,
                },
                WebhookStatus::Failed => ProcessOutcome::AlreadyFailed {
                    webhook_id: webhook_id.to_string(),
                    error: record.error_message,
                },
                WebhookStatus::Processing => ProcessOutcome::InFlight {
                    webhook_id: webhook_id.to_string(),
                },
            },
            // Records are never deleted, so a lost race with no readable row
            // can only mean the other delivery is still writing. Tell the
            // merchant to retry later.
            None => ProcessOutcome::InFlight {
                webhook_id: webhook_id.to_string(),
            },
        })
    }

    fn record_failure(
        &self,
        webhook_id: &str,
        kind: FailureKind,
        error: String,
    ) -> Result<ProcessOutcome, SponsorError> {
        self.ledger.webhooks.update_status(
            webhook_id,
            WebhookStatus::Failed,
            Some(&error),
            None,
        )?;
        Ok(ProcessOutcome::Failed {
            webhook_id: webhook_id.to_string(),
            kind,
            error,
        })
    }
}
