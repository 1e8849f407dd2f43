use crate::config::GatewayConfig;
use crate::domain::ports::{ChargeRequest, GatewayOutcome, PaymentGateway};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

pub const APPROVED_RESPONSE: &str = "Payment processed successfully";
pub const DECLINED_REASON: &str = "Payment declined by gateway";

const TXN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TXN_SUFFIX_LEN: usize = 9;

/// Generates a gateway style transaction id: `txn_<millis>_<9 chars>`.
pub fn generate_transaction_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..TXN_SUFFIX_LEN)
        .map(|_| TXN_ALPHABET[rng.gen_range(0..TXN_ALPHABET.len())] as char)
        .collect();
    format!("txn_{}_{}", Utc::now().timestamp_millis(), suffix)
}

/// Stand-in for a real payment gateway.
///
/// Waits a random latency inside the configured window and approves the
/// charge with the configured probability.
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    config: GatewayConfig,
}

impl SimulatedGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayOutcome> {
        // The rng is not Send; draw everything before the first await.
        let (latency, approved) = {
            let mut rng = rand::thread_rng();
            let low = self.config.min_latency_ms;
            let high = self.config.max_latency_ms.max(low);
            let latency = if high > low {
                rng.gen_range(low..=high)
            } else {
                low
            };
            let approved = rng.gen_bool(self.config.success_rate.clamp(0.0, 1.0));
            (Duration::from_millis(latency), approved)
        };

        debug!(payment_id = %request.payment_id, latency_ms = latency.as_millis() as u64, "Calling gateway");
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if approved {
            Ok(GatewayOutcome::Approved {
                transaction_id: request
                    .transaction_id
                    .clone()
                    .unwrap_or_else(generate_transaction_id),
                response: APPROVED_RESPONSE.to_string(),
            })
        } else {
            Ok(GatewayOutcome::Declined {
                reason: DECLINED_REASON.to_string(),
            })
        }
    }
}
