use sponsor::ledger::Ledger;
use sponsor::offers::OfferEngine;
use sponsor::payout::SimulatedPayoutSender;
use sponsor::processor::WebhookProcessor;
use sponsor::verify::HttpPaymentVerifier;

/// Shared application state for the sponsorship server.
///
/// Every service object is constructed once in `main` and injected into
/// handlers through actix application data; nothing here is a process-wide
/// singleton.
pub struct AppState {
    /// The four ledger stores (campaigns, sessions, webhooks, settlements).
    pub ledger: Ledger,
    /// Mints sponsored offers, reserving campaign budget as it does.
    pub offer_engine: OfferEngine,
    /// Upstream x402 facilitator client for payment verification.
    pub verifier: HttpPaymentVerifier,
    /// The webhook state machine. Payouts run in simulation mode; a real
    /// treasury sender slots in behind the same trait.
    pub processor: WebhookProcessor<SimulatedPayoutSender>,
    /// Price of the paid content in base units; recorded on each session.
    pub content_price: u64,
    /// Bearer token for /metrics. Unset means the endpoint is disabled.
    pub metrics_token: Option<Vec<u8>>,
}
