//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::AttemptId;
use domain::{CustomerId, Money};
use thiserror::Error;
use tokio::sync::Mutex;

/// The provider could not produce a charge decision.
///
/// A decline is not a fault: it is a [`PaymentResult`] with
/// `succeeded == false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentFault {
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    /// No answer in time. The charge may still have gone through.
    #[error("Payment provider timed out after {0:?}")]
    Timeout(Duration),

    /// The idempotency key was first used for a different charge.
    #[error("Idempotency key {0} was first used for a different charge")]
    KeyReuse(AttemptId),
}

/// A charge for one checkout attempt.
#[derive(Clone)]
pub struct PaymentRequest {
    pub customer_id: CustomerId,
    pub amount: Money,
    pub currency: String,
    /// Opaque payment method token. Never logged.
    pub token: String,
    /// Repeating a key returns the first decision instead of charging again.
    pub idempotency_key: AttemptId,
}

impl std::fmt::Debug for PaymentRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentRequest")
            .field("customer_id", &self.customer_id)
            .field("amount", &self.amount)
            .field("currency", &self.currency)
            .field("token", &"<redacted>")
            .field("idempotency_key", &self.idempotency_key)
            .finish()
    }
}

/// The provider's decision on a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResult {
    pub succeeded: bool,
    /// Provider-side reference of an approved charge.
    pub provider_ref: Option<String>,
    /// Decline reason.
    pub error: Option<String>,
}

impl PaymentResult {
    pub fn approved(provider_ref: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            provider_ref: Some(provider_ref.into()),
            error: None,
        }
    }

    pub fn declined(reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            provider_ref: None,
            error: Some(reason.into()),
        }
    }
}

/// Reversal of an earlier approved charge.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    /// Idempotency key of the charge being reversed.
    pub charge_key: AttemptId,
    pub provider_ref: Option<String>,
    pub amount: Money,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    /// The charge is reversed, now or by an earlier refund.
    Refunded,
    /// Nothing was captured under the key, so there is nothing to reverse.
    NoCharge,
}

/// External payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges a payment method.
    ///
    /// Repeating an idempotency key with the same request replays the first
    /// decision. Repeating it with a different customer, amount, currency or
    /// token fails with [`PaymentFault::KeyReuse`].
    async fn charge(&self, request: &PaymentRequest) -> Result<PaymentResult, PaymentFault>;

    /// Reverses an approved charge. Refunding an already reversed charge
    /// succeeds without doing anything.
    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, PaymentFault>;
}

/// What a charge was first requested for.
#[derive(Debug, PartialEq, Eq)]
struct ChargeFingerprint {
    customer_id: CustomerId,
    amount: Money,
    currency: String,
    token: String,
}

impl From<&PaymentRequest> for ChargeFingerprint {
    fn from(request: &PaymentRequest) -> Self {
        Self {
            customer_id: request.customer_id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            token: request.token.clone(),
        }
    }
}

#[derive(Debug)]
struct ChargeRecord {
    fingerprint: ChargeFingerprint,
    result: PaymentResult,
    reversed: bool,
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    charges: HashMap<AttemptId, ChargeRecord>,
    next_id: u32,
    charge_count: usize,
    refund_count: usize,
    decline_reason: Option<String>,
    fault: bool,
    delay: Option<Duration>,
    refund_delay: Option<Duration>,
}

/// In-memory payment gateway for testing and local runs.
///
/// Approves every charge unless told otherwise.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryPaymentState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory payment gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines new charges with `reason`, or approves them again on None.
    pub async fn set_decline(&self, reason: Option<&str>) {
        self.state.lock().await.decline_reason = reason.map(str::to_string);
    }

    /// Makes every call fail with [`PaymentFault::Unavailable`].
    pub async fn set_fault(&self, fault: bool) {
        self.state.lock().await.fault = fault;
    }

    /// Delays every charge, before any decision is made.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.delay = delay;
    }

    /// Delays every refund, before the charge is looked up.
    pub async fn set_refund_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.refund_delay = delay;
    }

    /// Number of charges actually decided (idempotent replays excluded).
    pub async fn charge_count(&self) -> usize {
        self.state.lock().await.charge_count
    }

    /// Number of charges reversed.
    pub async fn refund_count(&self) -> usize {
        self.state.lock().await.refund_count
    }

    /// Returns true if the charge made under `key` has been reversed.
    pub async fn is_reversed(&self, key: AttemptId) -> bool {
        self.state
            .lock()
            .await
            .charges
            .get(&key)
            .is_some_and(|c| c.reversed)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn charge(&self, request: &PaymentRequest) -> Result<PaymentResult, PaymentFault> {
        let (delay, fault) = {
            let state = self.state.lock().await;
            (state.delay, state.fault)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fault {
            return Err(PaymentFault::Unavailable("simulated outage".to_string()));
        }

        let mut state = self.state.lock().await;

        if let Some(existing) = state.charges.get(&request.idempotency_key) {
            if existing.fingerprint != ChargeFingerprint::from(request) {
                return Err(PaymentFault::KeyReuse(request.idempotency_key));
            }
            if existing.reversed {
                return Ok(PaymentResult::declined("charge was reversed"));
            }
            return Ok(existing.result.clone());
        }

        state.charge_count += 1;
        let result = match state.decline_reason.clone() {
            Some(reason) => PaymentResult::declined(reason),
            None => {
                state.next_id += 1;
                PaymentResult::approved(format!("PAY-{:04}", state.next_id))
            }
        };
        state.charges.insert(
            request.idempotency_key,
            ChargeRecord {
                fingerprint: ChargeFingerprint::from(request),
                result: result.clone(),
                reversed: false,
            },
        );

        Ok(result)
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, PaymentFault> {
        let delay = self.state.lock().await.refund_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.fault {
            return Err(PaymentFault::Unavailable("simulated outage".to_string()));
        }

        let Some(record) = state.charges.get_mut(&request.charge_key) else {
            return Ok(RefundOutcome::NoCharge);
        };
        if !record.result.succeeded {
            return Ok(RefundOutcome::NoCharge);
        }
        if record.reversed {
            return Ok(RefundOutcome::Refunded);
        }

        record.reversed = true;
        state.refund_count += 1;
        Ok(RefundOutcome::Refunded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: AttemptId) -> PaymentRequest {
        PaymentRequest {
            customer_id: CustomerId::parse("alice").unwrap(),
            amount: Money::from_cents(2500),
            currency: "GBP".to_string(),
            token: "tok_visa".to_string(),
            idempotency_key: key,
        }
    }

    fn refund(key: AttemptId) -> RefundRequest {
        RefundRequest {
            charge_key: key,
            provider_ref: None,
            amount: Money::from_cents(2500),
            currency: "GBP".to_string(),
        }
    }

    #[tokio::test]
    async fn test_approves_by_default() {
        let gateway = InMemoryPaymentGateway::new();
        let result = gateway.charge(&request(AttemptId::new())).await.unwrap();

        assert!(result.succeeded);
        assert_eq!(result.provider_ref.as_deref(), Some("PAY-0001"));
        assert_eq!(gateway.charge_count().await, 1);
    }

    #[tokio::test]
    async fn test_decline_is_a_result_not_a_fault() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_decline(Some("insufficient funds")).await;

        let result = gateway.charge(&request(AttemptId::new())).await.unwrap();
        assert!(!result.succeeded);
        assert_eq!(result.error.as_deref(), Some("insufficient funds"));
        assert!(result.provider_ref.is_none());
    }

    #[tokio::test]
    async fn test_fault_makes_no_charge() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_fault(true).await;

        let err = gateway.charge(&request(AttemptId::new())).await.unwrap_err();
        assert!(matches!(err, PaymentFault::Unavailable(_)));
        assert_eq!(gateway.charge_count().await, 0);
    }

    #[tokio::test]
    async fn test_same_key_replays_first_decision() {
        let gateway = InMemoryPaymentGateway::new();
        let key = AttemptId::new();

        let first = gateway.charge(&request(key)).await.unwrap();
        gateway.set_decline(Some("card blocked")).await;
        let second = gateway.charge(&request(key)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(gateway.charge_count().await, 1);
    }

    #[tokio::test]
    async fn test_refund_reverses_once() {
        let gateway = InMemoryPaymentGateway::new();
        let key = AttemptId::new();
        gateway.charge(&request(key)).await.unwrap();

        assert_eq!(gateway.refund(&refund(key)).await, Ok(RefundOutcome::Refunded));
        assert_eq!(gateway.refund(&refund(key)).await, Ok(RefundOutcome::Refunded));

        assert!(gateway.is_reversed(key).await);
        assert_eq!(gateway.refund_count().await, 1);

        let replay = gateway.charge(&request(key)).await.unwrap();
        assert!(!replay.succeeded);
    }

    #[tokio::test]
    async fn test_same_key_with_different_request_is_refused() {
        let gateway = InMemoryPaymentGateway::new();
        let key = AttemptId::new();
        gateway.charge(&request(key)).await.unwrap();

        let bigger = PaymentRequest {
            amount: Money::from_cents(500_000),
            ..request(key)
        };
        assert_eq!(
            gateway.charge(&bigger).await,
            Err(PaymentFault::KeyReuse(key))
        );

        let other_customer = PaymentRequest {
            customer_id: CustomerId::parse("mallory").unwrap(),
            ..request(key)
        };
        assert_eq!(
            gateway.charge(&other_customer).await,
            Err(PaymentFault::KeyReuse(key))
        );
        assert_eq!(gateway.charge_count().await, 1);
    }

    #[tokio::test]
    async fn test_refund_without_capture_reports_no_charge() {
        let gateway = InMemoryPaymentGateway::new();
        assert_eq!(
            gateway.refund(&refund(AttemptId::new())).await,
            Ok(RefundOutcome::NoCharge)
        );

        gateway.set_decline(Some("insufficient funds")).await;
        let key = AttemptId::new();
        gateway.charge(&request(key)).await.unwrap();
        assert_eq!(gateway.refund(&refund(key)).await, Ok(RefundOutcome::NoCharge));
        assert_eq!(gateway.refund_count().await, 0);
    }

    #[test]
    fn test_debug_redacts_token() {
        let output = format!("{:?}", request(AttemptId::new()));
        assert!(!output.contains("tok_visa"));
        assert!(output.contains("<redacted>"));
    }
}
