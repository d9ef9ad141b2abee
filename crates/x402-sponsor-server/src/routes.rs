use actix_web::{get, post, web, HttpRequest, HttpResponse};
use serde::Serialize;
use uuid::Uuid;

use sponsor::amount::format_amount;
use sponsor::constants::{CORRELATION_HEADER, SIGNATURE_HEADER};
use sponsor::error::SponsorError;
use sponsor::offers::SponsoredOffer;
use sponsor::processor::{FailureKind, ProcessOutcome};
use sponsor::session::PaymentSession;
use sponsor::verify::{PaymentVerifier, VerifyRequest};

use crate::metrics;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub verified: bool,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    pub sponsors: Vec<SponsoredOffer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Pull the caller's correlation id from the header, or mint one so the
/// journey is greppable even when the caller didn't bother.
fn correlation_id(req: &HttpRequest) -> String {
    req.headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let id = Uuid::new_v4().simple().to_string();
            format!("corr-{}", &id[..12])
        })
}

#[post("/verify")]
pub async fn verify(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<VerifyRequest>,
) -> HttpResponse {
    let corr = correlation_id(&req);
    let request = body.into_inner();

    let result = state
        .verifier
        .verify(&request.payment_payload, &request.payment_requirements)
        .await;

    let user_address = match (result.verified, result.user_address) {
        (true, Some(address)) => address,
        _ => {
            // Expected outcome, not a transport error: the resource server
            // fails closed on `verified: false`.
            metrics::VERIFY_REQUESTS
                .with_label_values(&["rejected"])
                .inc();
            tracing::info!(
                session_id = %request.session_id,
                correlation_id = %corr,
                reason = result.error.as_deref().unwrap_or("unknown"),
                "payment verification rejected"
            );
            return HttpResponse::Ok().json(VerifyResponse {
                verified: false,
                session_id: request.session_id,
                user_address: None,
                network: None,
                sponsors: Vec::new(),
                error: result.error,
            });
        }
    };

    let session = PaymentSession::new(
        &request.session_id,
        &user_address,
        result.network.unwrap_or_else(|| "unknown".to_string()),
        state.content_price,
    )
    .with_correlation_id(&corr);

    if let Err(e) = state.ledger.sessions.create(&session) {
        metrics::VERIFY_REQUESTS.with_label_values(&["error"]).inc();
        tracing::error!(
            session_id = %session.session_id,
            error = %e,
            "payment session registration failed"
        );
        return HttpResponse::InternalServerError().json(VerifyResponse {
            verified: false,
            session_id: session.session_id,
            user_address: None,
            network: None,
            sponsors: Vec::new(),
            error: Some("storage unavailable".to_string()),
        });
    }

    metrics::VERIFY_REQUESTS
        .with_label_values(&["verified"])
        .inc();

    let sponsor_offers = match state.offer_engine.generate_offer(&session) {
        Some(offer) => {
            metrics::OFFERS.with_label_values(&["minted"]).inc();
            vec![offer]
        }
        None => {
            metrics::OFFERS.with_label_values(&["skipped"]).inc();
            Vec::new()
        }
    };

    tracing::info!(
        session_id = %session.session_id,
        user_address = %session.user_address,
        network = %session.network,
        sponsors = sponsor_offers.len(),
        correlation_id = %corr,
        "payment verified, session registered"
    );

    HttpResponse::Ok().json(VerifyResponse {
        verified: true,
        session_id: session.session_id.clone(),
        user_address: Some(session.user_address.clone()),
        network: Some(session.network.clone()),
        sponsors: sponsor_offers,
        error: None,
    })
}

#[post("/webhooks/conversion")]
pub async fn conversion_webhook(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    let corr = correlation_id(&req);
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let header_present = signature.is_some();

    let start = std::time::Instant::now();
    let outcome = state
        .processor
        .process(&body, signature.as_deref(), Some(&corr))
        .await;
    let elapsed = start.elapsed().as_secs_f64();

    match outcome {
        Ok(ProcessOutcome::Settled {
            webhook_id,
            settlement_id,
            tx_hash,
            rebate_amount,
            rebate_asset,
        }) => {
            metrics::WEBHOOK_REQUESTS
                .with_label_values(&["settled"])
                .inc();
            metrics::PAYOUT_SECONDS
                .with_label_values(&["success"])
                .observe(elapsed);
            HttpResponse::Ok().json(serde_json::json!({
                "status": "success",
                "message": "rebate settled",
                "webhookId": webhook_id,
                "settlementId": settlement_id,
                "txHash": tx_hash,
                "rebateAmount": format_amount(rebate_amount),
                "rebateAsset": rebate_asset,
            }))
        }
        Ok(ProcessOutcome::AlreadyCompleted {
            webhook_id,
            tx_hash,
        }) => {
            metrics::WEBHOOK_REQUESTS
                .with_label_values(&["duplicate"])
                .inc();
            HttpResponse::Ok().json(serde_json::json!({
                "status": "success",
                "message": "webhook already processed",
                "webhookId": webhook_id,
                "txHash": tx_hash,
            }))
        }
        Ok(ProcessOutcome::AlreadyFailed { webhook_id, error }) => {
            metrics::WEBHOOK_REQUESTS
                .with_label_values(&["duplicate"])
                .inc();
            HttpResponse::BadRequest().json(serde_json::json!({
                "status": "error",
                "webhookId": webhook_id,
                "error": error,
            }))
        }
        Ok(ProcessOutcome::InFlight { webhook_id }) => {
            metrics::WEBHOOK_REQUESTS
                .with_label_values(&["in_flight"])
                .inc();
            HttpResponse::Ok().json(serde_json::json!({
                "status": "processing",
                "message": "webhook is being processed",
                "webhookId": webhook_id,
            }))
        }
        Ok(ProcessOutcome::Failed {
            webhook_id,
            kind,
            error,
        }) => {
            metrics::WEBHOOK_REQUESTS
                .with_label_values(&["failed"])
                .inc();
            match kind {
                FailureKind::NoActiveCampaign => metrics::SETTLEMENT_ANOMALIES
                    .with_label_values(&["no_active_campaign"])
                    .inc(),
                FailureKind::SessionAlreadySettled => metrics::SETTLEMENT_ANOMALIES
                    .with_label_values(&["already_settled"])
                    .inc(),
                FailureKind::Payout => metrics::PAYOUT_SECONDS
                    .with_label_values(&["failed"])
                    .observe(elapsed),
                FailureKind::PayoutTimeout => metrics::PAYOUT_SECONDS
                    .with_label_values(&["timeout"])
                    .observe(elapsed),
                FailureKind::SessionNotFound => {}
            }
            HttpResponse::BadRequest().json(serde_json::json!({
                "status": "error",
                "webhookId": webhook_id,
                "error": error,
            }))
        }
        Err(SponsorError::InvalidSignature) => {
            metrics::WEBHOOK_REQUESTS
                .with_label_values(&["unauthorized"])
                .inc();
            let error = if header_present {
                tracing::warn!(correlation_id = %corr, "webhook signature mismatch");
                "authentication failed"
            } else {
                tracing::warn!(correlation_id = %corr, "webhook signature header missing");
                "authentication required"
            };
            HttpResponse::Unauthorized().json(serde_json::json!({ "error": error }))
        }
        Err(SponsorError::MalformedPayload(e)) => {
            metrics::WEBHOOK_REQUESTS
                .with_label_values(&["malformed"])
                .inc();
            tracing::warn!(correlation_id = %corr, error = %e, "malformed webhook payload");
            HttpResponse::BadRequest().json(serde_json::json!({
                "status": "error",
                "error": "invalid webhook payload",
            }))
        }
        Err(e) => {
            metrics::WEBHOOK_REQUESTS.with_label_values(&["error"]).inc();
            tracing::error!(correlation_id = %corr, error = %e, "webhook processing error");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "status": "error",
                "error": "internal error",
            }))
        }
    }
}

#[get("/sponsors/{session_id}")]
pub async fn sponsors(path: web::Path<String>, state: web::Data<AppState>) -> HttpResponse {
    let session_id = path.into_inner();

    let session = match state.ledger.sessions.get(&session_id) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "session lookup failed");
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "storage unavailable" }));
        }
    };

    let sponsors: Vec<SponsoredOffer> = match session {
        Some(session) if !session.rebate_settled => {
            match state.offer_engine.generate_offer(&session) {
                Some(offer) => {
                    metrics::OFFERS.with_label_values(&["minted"]).inc();
                    vec![offer]
                }
                None => {
                    metrics::OFFERS.with_label_values(&["skipped"]).inc();
                    Vec::new()
                }
            }
        }
        // Unknown or already-settled sessions get no offer: a conversion
        // against them could never settle, so reserving budget would leak it.
        _ => Vec::new(),
    };

    HttpResponse::Ok().json(serde_json::json!({ "sponsors": sponsors }))
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    match state.ledger.campaigns.list_active() {
        Ok(campaigns) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "x402-sponsor",
            "activeCampaigns": campaigns.len(),
        })),
        Err(e) => {
            tracing::error!(error = %e, "health probe cannot read the ledger");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "degraded",
                "service": "x402-sponsor",
                "error": "storage unreachable",
            }))
        }
    }
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let token = match &state.metrics_token {
        Some(token) => token,
        // Unset means the endpoint is not exposed at all.
        None => return HttpResponse::NotFound().finish(),
    };

    let authorized = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| sponsor::hmac::constant_time_eq(t.as_bytes(), token))
        .unwrap_or(false);

    if !authorized {
        return HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "unauthorized",
            "message": "Valid Bearer token required for /metrics"
        }));
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::metrics_output())
}
