// Core types
pub mod amount;
pub mod campaign;
pub mod config;
pub mod constants;
pub mod error;
pub mod hmac;
pub mod session;
pub mod settlement;
pub mod webhook;

// Ledger storage (trait seams plus the two backends)
pub mod ledger;
pub mod memory;
pub mod sqlite;

// Sponsorship pipeline
pub mod offers;
pub mod payout;
pub mod processor;
pub mod verify;

// Re-exports
pub use campaign::{Campaign, CampaignSeed, Coupon};
pub use config::SponsorConfig;
pub use error::SponsorError;
pub use ledger::Ledger;
pub use offers::{OfferEngine, SponsoredOffer};
pub use payout::{PayoutReceipt, PayoutRequest, PayoutSender, SimulatedPayoutSender};
pub use processor::{FailureKind, ProcessOutcome, WebhookProcessor};
pub use session::PaymentSession;
pub use settlement::{Settlement, SettlementStatus};
pub use verify::{HttpPaymentVerifier, PaymentVerifier, VerificationResult, VerifyRequest};
pub use webhook::{ConversionWebhook, WebhookRecord, WebhookStatus};
