//! Conversion webhooks: the merchant-reported signal that a paid session
//! turned into a purchase, and the ledger record that makes re-deliveries
//! safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound webhook body as merchants POST it. `purchase_amount` is the
/// merchant-reported purchase total; it is informational only and never
/// enters rebate arithmetic (rebates come from the campaign terms).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionWebhook {
    /// Merchant-supplied idempotency key.
    pub webhook_id: String,
    pub session_id: String,
    pub user_address: String,
    pub purchase_amount: f64,
    pub purchase_asset: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Processing,
    Completed,
    Failed,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Processing => "processing",
            WebhookStatus::Completed => "completed",
            WebhookStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(WebhookStatus::Processing),
            "completed" => Some(WebhookStatus::Completed),
            "failed" => Some(WebhookStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states never change again; a re-delivered webhook id gets
    /// the recorded result back.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WebhookStatus::Completed | WebhookStatus::Failed)
    }
}

/// One webhook id's ledger row. Created at first sight with status
/// `processing`; updated once to a terminal state; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub webhook_id: String,
    pub session_id: String,
    pub user_address: String,
    pub status: WebhookStatus,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub rebate_tx_hash: Option<String>,
}

impl WebhookRecord {
    /// Fresh row for a webhook id seen for the first time.
    pub fn processing(webhook: &ConversionWebhook) -> Self {
        Self {
            webhook_id: webhook.webhook_id.clone(),
            session_id: webhook.session_id.clone(),
            user_address: webhook.user_address.clone(),
            status: WebhookStatus::Processing,
            received_at: Utc::now(),
            processed_at: None,
            error_message: None,
            rebate_tx_hash: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_is_camel_case() {
        let webhook: ConversionWebhook = serde_json::from_str(
            r#"{
                "webhookId": "wh-1",
                "sessionId": "sess-1",
                "userAddress": "0xabc",
                "purchaseAmount": 24.90,
                "purchaseAsset": "USD",
                "timestamp": "2026-08-01T12:00:00Z",
                "merchantId": "burger-palace"
            }"#,
        )
        .unwrap();
        assert_eq!(webhook.webhook_id, "wh-1");
        assert_eq!(webhook.merchant_id.as_deref(), Some("burger-palace"));

        let json = serde_json::to_value(&webhook).unwrap();
        assert!(json.get("webhookId").is_some());
        assert!(json.get("webhook_id").is_none());
    }

    #[test]
    fn test_merchant_id_optional() {
        let webhook: ConversionWebhook = serde_json::from_str(
            r#"{
                "webhookId": "wh-2",
                "sessionId": "sess-1",
                "userAddress": "0xabc",
                "purchaseAmount": 10,
                "purchaseAsset": "USD",
                "timestamp": "2026-08-01T12:00:00Z"
            }"#,
        )
        .unwrap();
        assert!(webhook.merchant_id.is_none());
        let json = serde_json::to_string(&webhook).unwrap();
        assert!(!json.contains("merchantId"));
    }

    #[test]
    fn test_status_round_trips_through_sql_text() {
        for status in [
            WebhookStatus::Processing,
            WebhookStatus::Completed,
            WebhookStatus::Failed,
        ] {
            assert_eq!(WebhookStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(WebhookStatus::parse("settled"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!WebhookStatus::Processing.is_terminal());
        assert!(WebhookStatus::Completed.is_terminal());
        assert!(WebhookStatus::Failed.is_terminal());
    }
}
