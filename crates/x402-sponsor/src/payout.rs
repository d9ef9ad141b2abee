//! The payout capability: sending a rebate to a user wallet.
//!
//! Production blockchain transfers are out of scope for this crate; the
//! trait is the seam where a real treasury integration plugs in. The shipped
//! [`SimulatedPayoutSender`] mints synthetic transaction references so the
//! whole settlement pipeline is exercisable end to end.

use uuid::Uuid;

use crate::error::SponsorError;

/// One rebate transfer, denominated in base units.
#[derive(Debug, Clone, Copy)]
pub struct PayoutRequest<'a> {
    pub user_address: &'a str,
    pub amount: u64,
    pub asset: &'a str,
    pub network: &'a str,
}

/// Proof of a sent rebate.
#[derive(Debug, Clone)]
pub struct PayoutReceipt {
    pub tx_hash: String,
    pub simulated: bool,
}

/// Sends rebates from the treasury wallet.
///
/// Implementations must be cheap to call concurrently; the processor runs
/// them under a timeout and holds no ledger lock while awaiting.
pub trait PayoutSender: Send + Sync {
    fn send_rebate(
        &self,
        request: &PayoutRequest<'_>,
    ) -> impl std::future::Future<Output = Result<PayoutReceipt, SponsorError>> + Send;
}

/// Simulation-mode sender: accepts `eip155:*` and `solana:*` networks and
/// returns unique synthetic transaction references; anything else is a
/// payout error, which exercises the failure path.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPayoutSender {
    latency: Option<std::time::Duration>,
}

impl SimulatedPayoutSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay each send, for exercising the processor's payout timeout.
    pub fn with_latency(latency: std::time::Duration) -> Self {
        Self {
            latency: Some(latency),
        }
    }
}

impl PayoutSender for SimulatedPayoutSender {
    async fn send_rebate(
        &self,
        request: &PayoutRequest<'_>,
    ) -> Result<PayoutReceipt, SponsorError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let tx_hash = if request.network.starts_with("eip155") {
            format!("0x{}", hex_entropy(64))
        } else if request.network.starts_with("solana") {
            // Real Solana signatures are base58; hex entropy is fine for a
            // simulated reference.
            format!("5{}", hex_entropy(80))
        } else {
            return Err(SponsorError::PayoutError(format!(
                "unsupported network: {}",
                request.network
            )));
        };

        tracing::info!(
            to = %request.user_address,
            amount = request.amount,
            asset = %request.asset,
            network = %request.network,
            tx_hash = %tx_hash,
            "simulated rebate payout"
        );

        Ok(PayoutReceipt {
            tx_hash,
            simulated: true,
        })
    }
}

/// `n` hex chars of fresh entropy.
fn hex_entropy(n: usize) -> String {
    let mut out = String::with_capacity(n);
    while out.len() < n {
        out.push_str(&Uuid::new_v4().simple().to_string());
    }
    out.truncate(n);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(network: &str) -> PayoutRequest<'_> {
        PayoutRequest {
            user_address: "0xabc",
            amount: 5_000_000,
            asset: "USDC",
            network,
        }
    }

    #[tokio::test]
    async fn test_evm_payout_shape() {
        let sender = SimulatedPayoutSender::new();
        let receipt = sender.send_rebate(&request("eip155:84532")).await.unwrap();
        assert!(receipt.simulated);
        assert!(receipt.tx_hash.starts_with("0x"));
        assert_eq!(receipt.tx_hash.len(), 66);
        assert!(receipt.tx_hash[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_solana_payout_shape() {
        let sender = SimulatedPayoutSender::new();
        let receipt = sender
            .send_rebate(&request("solana:EtWTRABZaYq6iMfeYKouRu166VU2xqa1"))
            .await
            .unwrap();
        assert!(receipt.tx_hash.starts_with('5'));
        assert_eq!(receipt.tx_hash.len(), 81);
    }

    #[tokio::test]
    async fn test_unsupported_network_fails() {
        let sender = SimulatedPayoutSender::new();
        let err = sender
            .send_rebate(&request("cosmos:hub"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported network"));
    }

    #[tokio::test]
    async fn test_tx_hashes_are_unique() {
        let sender = SimulatedPayoutSender::new();
        let a = sender.send_rebate(&request("eip155:84532")).await.unwrap();
        let b = sender.send_rebate(&request("eip155:84532")).await.unwrap();
        assert_ne!(a.tx_hash, b.tx_hash);
    }
}
