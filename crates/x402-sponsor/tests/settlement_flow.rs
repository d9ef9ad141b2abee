//! End-to-end settlement flows over the SQLite ledger: seed, offer, webhook,
//! payout, and the replay/duplicate edges, all against one database file.

use std::sync::Arc;

use sponsor::campaign::{load_seed_campaigns, CampaignSeed};
use sponsor::hmac;
use sponsor::ledger::Ledger;
use sponsor::offers::OfferEngine;
use sponsor::payout::SimulatedPayoutSender;
use sponsor::processor::{FailureKind, ProcessOutcome, WebhookProcessor};
use sponsor::session::PaymentSession;
use sponsor::settlement::SettlementStatus;
use sponsor::webhook::WebhookStatus;

const SECRET: &[u8] = b"integration-test-webhook-secret!";

fn seed_json() -> serde_json::Value {
    serde_json::json!([{
        "id": "burger-palace-summer",
        "merchant_name": "Burger Palace",
        "offer_text": "Get $5 back on your next burger",
        "rebate": { "amount": "5.00", "asset": "USDC", "network": "eip155:84532" },
        "budget": { "total": "10.00", "asset": "USDC" },
        "coupons": [{ "code": "SUMMER5", "description": "$5 off", "discount_type": "fixed", "discount_value": "5.00" }]
    }])
}

fn seeded_ledger(dir: &tempfile::TempDir) -> Ledger {
    let seeds: Vec<CampaignSeed> = serde_json::from_value(seed_json()).unwrap();
    let campaigns = load_seed_campaigns(seeds).unwrap();
    let ledger = Ledger::open_sqlite(&dir.path().join("sponsor.db")).unwrap();
    ledger.seed_campaigns(&campaigns).unwrap();
    ledger
}

fn processor(ledger: &Ledger) -> WebhookProcessor<SimulatedPayoutSender> {
    WebhookProcessor::new(ledger.clone(), SimulatedPayoutSender::new(), SECRET)
}

fn signed_webhook(webhook_id: &str, session_id: &str) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(&serde_json::json!({
        "webhookId": webhook_id,
        "sessionId": session_id,
        "userAddress": "0x1111111111111111111111111111111111111111",
        "purchaseAmount": 12.50,
        "purchaseAsset": "USD",
        "timestamp": "2026-08-01T12:00:00Z",
        "merchantId": "burger-palace"
    }))
    .unwrap();
    let sig = hmac::sign_body(SECRET, &body);
    (body, sig)
}

fn verified_session(ledger: &Ledger, session_id: &str) {
    ledger
        .sessions
        .create(&PaymentSession::new(
            session_id,
            "0x1111111111111111111111111111111111111111",
            "eip155:84532",
            100_000,
        ))
        .unwrap();
}

// -- Happy path --

#[tokio::test]
async fn test_full_sponsorship_journey() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = seeded_ledger(&dir);

    verified_session(&ledger, "sess-1");
    let session = ledger.sessions.get("sess-1").unwrap().unwrap();

    // Offer generation funds the rebate up front.
    let engine = OfferEngine::new(ledger.campaigns.clone(), "http://localhost:3000");
    let offer = engine.generate_offer(&session).expect("offer minted");
    assert_eq!(offer.merchant_name, "Burger Palace");
    assert_eq!(offer.rebate_amount, "5.00");
    assert_eq!(offer.coupons[0].code, "SUMMER5");
    assert!(offer.checkout_url.contains("session=sess-1"));
    assert_eq!(
        ledger
            .campaigns
            .get("burger-palace-summer")
            .unwrap()
            .unwrap()
            .budget_remaining,
        5_000_000
    );

    // The conversion webhook settles it.
    let (body, sig) = signed_webhook("wh-1", "sess-1");
    let outcome = processor(&ledger)
        .process(&body, Some(&sig), Some("corr-abc123def456"))
        .await
        .unwrap();

    let tx_hash = match outcome {
        ProcessOutcome::Settled {
            tx_hash,
            rebate_amount,
            ref rebate_asset,
            ..
        } => {
            assert_eq!(rebate_amount, 5_000_000);
            assert_eq!(rebate_asset, "USDC");
            tx_hash
        }
        other => panic!("expected Settled, got {other:?}"),
    };
    assert!(tx_hash.starts_with("0x"));

    let record = ledger.webhooks.get("wh-1").unwrap().unwrap();
    assert_eq!(record.status, WebhookStatus::Completed);
    assert_eq!(record.rebate_tx_hash.as_deref(), Some(tx_hash.as_str()));

    assert!(ledger.sessions.get("sess-1").unwrap().unwrap().rebate_settled);

    let settlements = ledger.settlements.list_for_session("sess-1").unwrap();
    assert_eq!(settlements.len(), 1);
    assert_eq!(settlements[0].status, SettlementStatus::Confirmed);
    assert_eq!(settlements[0].rebate_amount, 5_000_000);
    assert_eq!(
        settlements[0].correlation_id.as_deref(),
        Some("corr-abc123def456")
    );

    // Settlement never touches the budget again.
    assert_eq!(
        ledger
            .campaigns
            .get("burger-palace-summer")
            .unwrap()
            .unwrap()
            .budget_remaining,
        5_000_000
    );
}

// -- Replay and duplicate edges --

#[tokio::test]
async fn test_replayed_conversion_cannot_double_spend() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = seeded_ledger(&dir);
    verified_session(&ledger, "sess-1");
    let processor = processor(&ledger);

    let (body, sig) = signed_webhook("wh-1", "sess-1");
    processor.process(&body, Some(&sig), None).await.unwrap();

    // Same session, fresh webhook id: a replay, not a retry.
    let (body2, sig2) = signed_webhook("wh-2", "sess-1");
    let outcome = processor.process(&body2, Some(&sig2), None).await.unwrap();
    match outcome {
        ProcessOutcome::Failed { kind, .. } => {
            assert_eq!(kind, FailureKind::SessionAlreadySettled)
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    assert_eq!(
        ledger.webhooks.get("wh-2").unwrap().unwrap().status,
        WebhookStatus::Failed
    );
    assert_eq!(
        ledger.settlements.list_for_session("sess-1").unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_duplicate_webhook_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = seeded_ledger(&dir);
    verified_session(&ledger, "sess-1");
    let processor = processor(&ledger);

    let (body, sig) = signed_webhook("wh-1", "sess-1");
    let first = processor.process(&body, Some(&sig), None).await.unwrap();
    let first_tx = match first {
        ProcessOutcome::Settled { tx_hash, .. } => tx_hash,
        other => panic!("expected Settled, got {other:?}"),
    };

    // The merchant retries the exact same delivery.
    let second = processor.process(&body, Some(&sig), None).await.unwrap();
    match second {
        ProcessOutcome::AlreadyCompleted { tx_hash, .. } => {
            assert_eq!(tx_hash.as_deref(), Some(first_tx.as_str()))
        }
        other => panic!("expected AlreadyCompleted, got {other:?}"),
    }

    assert_eq!(
        ledger.settlements.list_for_session("sess-1").unwrap().len(),
        1
    );
}

// -- Budget cap under concurrency --

#[test]
fn test_budget_caps_concurrent_offers() {
    // 10.00 budget, 5.00 rebates: eight racing sessions mint exactly two
    // offers, and the campaign can never owe more than it holds.
    let dir = tempfile::tempdir().unwrap();
    let ledger = seeded_ledger(&dir);
    let engine = Arc::new(OfferEngine::new(
        ledger.campaigns.clone(),
        "http://localhost:3000",
    ));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let ledger = ledger.clone();
            std::thread::spawn(move || {
                let session_id = format!("sess-{i}");
                ledger
                    .sessions
                    .create(&PaymentSession::new(
                        &session_id,
                        "0x2222222222222222222222222222222222222222",
                        "eip155:84532",
                        100_000,
                    ))
                    .unwrap();
                let session = ledger.sessions.get(&session_id).unwrap().unwrap();
                engine.generate_offer(&session).is_some()
            })
        })
        .collect();

    let minted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&ok| ok)
        .count();
    assert_eq!(minted, 2);
    assert_eq!(
        ledger
            .campaigns
            .get("burger-palace-summer")
            .unwrap()
            .unwrap()
            .budget_remaining,
        0
    );
}

// -- Durability --

#[tokio::test]
async fn test_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sponsor.db");

    {
        let ledger = seeded_ledger(&dir);
        verified_session(&ledger, "sess-1");
        let (body, sig) = signed_webhook("wh-1", "sess-1");
        processor(&ledger).process(&body, Some(&sig), None).await.unwrap();
    }

    // A fresh process over the same file sees everything, and re-seeding
    // does not reset the spent budget.
    let ledger = Ledger::open_sqlite(&path).unwrap();
    let seeds: Vec<CampaignSeed> = serde_json::from_value(seed_json()).unwrap();
    let campaigns = load_seed_campaigns(seeds).unwrap();
    assert_eq!(ledger.seed_campaigns(&campaigns).unwrap(), 0);

    assert_eq!(
        ledger
            .campaigns
            .get("burger-palace-summer")
            .unwrap()
            .unwrap()
            .budget_remaining,
        5_000_000
    );
    assert_eq!(
        ledger.webhooks.get("wh-1").unwrap().unwrap().status,
        WebhookStatus::Completed
    );
    assert!(ledger.sessions.get("sess-1").unwrap().unwrap().rebate_settled);

    // And the replay guard still holds across the restart.
    let (body2, sig2) = signed_webhook("wh-2", "sess-1");
    let outcome = processor(&ledger)
        .process(&body2, Some(&sig2), None)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Failed {
            kind: FailureKind::SessionAlreadySettled,
            ..
        }
    ));
}

// -- Authentication --

#[tokio::test]
async fn test_rejected_signature_leaves_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = seeded_ledger(&dir);
    verified_session(&ledger, "sess-1");

    let (body, _) = signed_webhook("wh-1", "sess-1");
    let forged = hmac::sign_body(b"not-the-shared-secret", &body);

    let err = processor(&ledger)
        .process(&body, Some(&forged), None)
        .await
        .unwrap_err();
    assert!(matches!(err, sponsor::SponsorError::InvalidSignature));

    assert!(ledger.webhooks.get("wh-1").unwrap().is_none());
    assert!(ledger.settlements.list_for_session("sess-1").unwrap().is_empty());
    assert_eq!(
        ledger
            .campaigns
            .get("burger-palace-summer")
            .unwrap()
            .unwrap()
            .budget_remaining,
        10_000_000
    );
}
