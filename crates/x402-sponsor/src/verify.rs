//! Payment verification: the boundary to the external x402 facilitator.
//!
//! The protocol blobs (`paymentPayload`, `paymentRequirements`) stay opaque
//! here; they are forwarded verbatim and the upstream's answer is converted
//! exactly once, at this boundary, into [`VerificationResult`]. Nothing
//! outside this module ever inspects an upstream response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /verify` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// Minted by the resource server; becomes the payment session key.
    pub session_id: String,
    pub payment_payload: Value,
    pub payment_requirements: Value,
}

/// What the ledger needs to know about a payment: did it verify, who paid,
/// and on which network. Expected rejections are values, not errors.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub verified: bool,
    pub user_address: Option<String>,
    pub network: Option<String>,
    pub error: Option<String>,
}

impl VerificationResult {
    pub fn verified(user_address: String, network: Option<String>) -> Self {
        Self {
            verified: true,
            user_address: Some(user_address),
            network,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            verified: false,
            user_address: None,
            network: None,
            error: Some(error.into()),
        }
    }
}

/// Verifies payment payloads against their requirements.
pub trait PaymentVerifier: Send + Sync {
    fn verify(
        &self,
        payload: &Value,
        requirements: &Value,
    ) -> impl std::future::Future<Output = VerificationResult> + Send;
}

/// x402 facilitator `/verify` response wire shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamVerifyResponse {
    is_valid: bool,
    invalid_reason: Option<String>,
    payer: Option<String>,
}

fn network_from_requirements(requirements: &Value) -> Option<String> {
    requirements
        .get("network")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn adapt_upstream(response: UpstreamVerifyResponse, requirements: &Value) -> VerificationResult {
    if !response.is_valid {
        return VerificationResult::rejected(
            response
                .invalid_reason
                .unwrap_or_else(|| "payment rejected by verifier".to_string()),
        );
    }
    match response.payer {
        Some(payer) => {
            VerificationResult::verified(payer, network_from_requirements(requirements))
        }
        // Valid but anonymous is useless here: rebates need a recipient.
        None => VerificationResult::rejected("verifier returned no payer address"),
    }
}

/// Calls a remote x402 facilitator's `/verify` endpoint.
#[derive(Debug, Clone)]
pub struct HttpPaymentVerifier {
    client: reqwest::Client,
    base_url: String,
    timeout: std::time::Duration,
}

impl HttpPaymentVerifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout: std::time::Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl PaymentVerifier for HttpPaymentVerifier {
    async fn verify(&self, payload: &Value, requirements: &Value) -> VerificationResult {
        let url = format!("{}/verify", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "paymentPayload": payload,
            "paymentRequirements": requirements,
        });

        let response = match self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, url = %url, "verifier request failed");
                return VerificationResult::rejected(format!("verifier unreachable: {e}"));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(status = %status, url = %url, "verifier returned non-success");
            return VerificationResult::rejected(format!("verifier returned {status}"));
        }

        match response.json::<UpstreamVerifyResponse>().await {
            Ok(upstream) => adapt_upstream(upstream, requirements),
            Err(e) => {
                tracing::error!(error = %e, "verifier response parse failed");
                VerificationResult::rejected(format!("verifier response malformed: {e}"))
            }
        }
    }
}
