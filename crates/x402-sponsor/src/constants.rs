/// Rebates and budgets are denominated in USDC base units.
pub const ASSET_DECIMALS: u32 = 6;

/// Default asset for payments and rebates.
pub const DEFAULT_ASSET: &str = "USDC";

/// CAIP-2 network identifier for Base Sepolia, the default rebate network.
pub const DEFAULT_EVM_NETWORK: &str = "eip155:84532";

/// Header carrying the hex HMAC-SHA256 of the raw webhook body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Optional header threading a correlation id through a user journey.
pub const CORRELATION_HEADER: &str = "X-Correlation-Id";

/// Default upper bound on a single payout call, in seconds.
pub const DEFAULT_PAYOUT_TIMEOUT_SECS: u64 = 30;
