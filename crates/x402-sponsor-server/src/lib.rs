//! x402 sponsorship service: attaches rebate offers to verified payments
//! and settles them when merchants report conversions.
//!
//! The ledger, offer, and settlement logic live in the core [`sponsor`]
//! crate; this crate provides the HTTP server, shared state, and metrics.
//!
//! # Modules
//!
//! - [`routes`]: HTTP endpoints (verify, conversion webhook, sponsors, health, metrics)
//! - [`state`]: shared [`AppState`](state::AppState) injected into handlers
//! - [`metrics`]: Prometheus metrics for the sponsorship pipeline

pub mod metrics;
pub mod routes;
pub mod state;
