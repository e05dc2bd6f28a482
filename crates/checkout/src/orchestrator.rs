//! The checkout orchestrator.

use std::time::Instant;

use common::AttemptId;
use domain::{Cart, CartLine, CustomerId, Money, Order, OrderDraft, OrderStatus, Sku};
use storage::{
    CartWriter, CheckoutStorage, InventoryLedger, OrderStore, Reservation, StoreError, UnitOfWork,
};

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, Result};
use crate::payment::{PaymentFault, PaymentGateway, PaymentRequest, PaymentResult};
use crate::reconciliation::{InMemoryReconciliationLog, ReconciliationEntry, ReconciliationLog};
use crate::state::CheckoutState;

/// Input of one checkout attempt.
#[derive(Clone)]
pub struct CheckoutRequest {
    pub customer_id: String,
    pub payment_token: String,
    /// Reuse the key of an earlier attempt that failed with
    /// [`CheckoutError::Persistence`] or a payment timeout to retry without
    /// charging twice. A key is only good for the same customer and cart
    /// total, and only until an order commits under it.
    pub idempotency_key: Option<AttemptId>,
}

impl CheckoutRequest {
    pub fn new(customer_id: impl Into<String>, payment_token: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            payment_token: payment_token.into(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: AttemptId) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

impl std::fmt::Debug for CheckoutRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutRequest")
            .field("customer_id", &self.customer_id)
            .field("payment_token", &"<redacted>")
            .field("idempotency_key", &self.idempotency_key)
            .finish()
    }
}

/// Tracks where a single attempt is in its state machine.
struct Attempt {
    id: AttemptId,
    state: CheckoutState,
}

impl Attempt {
    fn new(id: AttemptId) -> Self {
        Self {
            id,
            state: CheckoutState::default(),
        }
    }

    fn advance(&mut self, next: CheckoutState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(CheckoutError::Unexpected(format!(
                "illegal checkout transition {} -> {}",
                self.state, next
            )));
        }
        tracing::debug!(from = %self.state, to = %next, "checkout state changed");
        self.state = next;
        Ok(())
    }

    fn abort(&mut self) {
        if !self.state.is_terminal() {
            tracing::debug!(from = %self.state, "checkout aborted");
            self.state = CheckoutState::Aborted;
        }
    }
}

/// Turns a customer's cart into an order.
///
/// Runs the attempt as: validate, load cart, reserve stock, charge, create
/// order, clear cart, commit. Stock, order and cart changes are buffered in
/// one unit of work and become visible together on commit. Stock is
/// reserved in ascending SKU order so concurrent attempts lock rows in the
/// same order.
pub struct CheckoutOrchestrator<S, P, L = InMemoryReconciliationLog>
where
    S: CheckoutStorage,
    P: PaymentGateway,
    L: ReconciliationLog,
{
    storage: S,
    payment: P,
    reconciliation: L,
    config: CheckoutConfig,
}

impl<S, P, L> CheckoutOrchestrator<S, P, L>
where
    S: CheckoutStorage,
    P: PaymentGateway,
    L: ReconciliationLog,
{
    /// Creates a new checkout orchestrator.
    pub fn new(storage: S, payment: P, reconciliation: L, config: CheckoutConfig) -> Self {
        Self {
            storage,
            payment,
            reconciliation,
            config,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn reconciliation(&self) -> &L {
        &self.reconciliation
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Runs one checkout attempt.
    ///
    /// A declined payment is not an error: it commits an order with status
    /// [`OrderStatus::Failed`].
    #[tracing::instrument(
        skip(self, request),
        fields(customer_id = %request.customer_id, attempt_id = tracing::field::Empty)
    )]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<Order> {
        metrics::counter!("checkout_attempts_total").increment(1);
        let started = Instant::now();

        let mut attempt = Attempt::new(request.idempotency_key.unwrap_or_default());
        tracing::Span::current().record("attempt_id", tracing::field::display(attempt.id));

        let result = self.run(&request, &mut attempt).await;
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                metrics::counter!("checkout_completed_total", "status" => order.status().as_str())
                    .increment(1);
                tracing::info!(
                    order_id = %order.id(),
                    status = %order.status(),
                    total = %order.total(),
                    "checkout committed"
                );
            }
            Err(err) => {
                attempt.abort();
                metrics::counter!("checkout_aborted_total", "kind" => err.kind().as_str())
                    .increment(1);
                match err {
                    CheckoutError::Unexpected(_) | CheckoutError::Persistence { .. } => {
                        tracing::error!(error = %err, kind = %err.kind(), "checkout aborted")
                    }
                    _ => tracing::warn!(error = %err, kind = %err.kind(), "checkout aborted"),
                }
            }
        }

        result
    }

    async fn run(&self, request: &CheckoutRequest, attempt: &mut Attempt) -> Result<Order> {
        let customer_id = CustomerId::parse(&request.customer_id)
            .map_err(|_| CheckoutError::Validation("customer id required".to_string()))?;
        if request.payment_token.trim().is_empty() {
            return Err(CheckoutError::Validation(
                "payment token required".to_string(),
            ));
        }

        // 1. Load the cart
        let cart = self
            .storage
            .get_cart(&customer_id)
            .await
            .map_err(|e| unexpected("load cart", e))?
            .filter(|cart| !cart.is_empty())
            .ok_or_else(|| CheckoutError::CartEmpty(customer_id.clone()))?;

        // 2. Total from the snapshotted prices
        let total = cart
            .total()
            .map_err(|e| CheckoutError::Validation(e.to_string()))?;
        attempt.advance(CheckoutState::CartLoaded)?;
        tracing::debug!(lines = cart.lines().len(), total = %total, "cart loaded");

        if request.idempotency_key.is_some() {
            self.check_reused_key(attempt.id, &customer_id, total).await?;
        }

        // 3. Reserve stock
        attempt.advance(CheckoutState::Reserving)?;
        let mut work = self
            .storage
            .begin()
            .await
            .map_err(|e| unexpected("begin unit of work", e))?;
        if let Err(err) = self.reserve_all(&mut work, &cart).await {
            discard(work).await;
            return Err(err);
        }

        // 4. Charge
        attempt.advance(CheckoutState::Charging)?;
        let payment = match self
            .charge(attempt.id, &customer_id, total, &request.payment_token)
            .await
        {
            Ok(payment) => payment,
            Err(fault) => {
                discard(work).await;
                return Err(self.payment_failure(attempt.id, &customer_id, total, fault).await);
            }
        };
        let status = if payment.succeeded {
            attempt.advance(CheckoutState::Paid)?;
            OrderStatus::Paid
        } else {
            tracing::info!(reason = ?payment.error, "payment declined");
            attempt.advance(CheckoutState::Failed)?;
            OrderStatus::Failed
        };

        // 5-6. Create order, clear cart
        let order = match stage(&mut work, attempt.id, &cart, status, total).await {
            Ok(order) => order,
            Err(source) => {
                discard(work).await;
                return Err(self
                    .persistence_failure(attempt.id, &customer_id, total, &payment, source)
                    .await);
            }
        };

        // Settle before commit: once the worker has claimed the entry the
        // charge is being refunded and must not back an order.
        if payment.succeeded {
            match self.reconciliation.settle(attempt.id).await {
                Ok(true) => tracing::info!("retry settled pending reconciliation"),
                Ok(false) => {}
                Err(conflict) => {
                    discard(work).await;
                    return Err(CheckoutError::IdempotencyConflict {
                        attempt_id: attempt.id,
                        reason: conflict.to_string(),
                    });
                }
            }
        }

        // 7. Commit
        attempt.advance(CheckoutState::Committing)?;
        match self.commit(work).await {
            Ok(()) => {
                attempt.advance(CheckoutState::Committed)?;
                Ok(order)
            }
            Err(source) => Err(self
                .persistence_failure(attempt.id, &customer_id, total, &payment, source)
                .await),
        }
    }

    /// Refuses a caller-supplied key that already committed an order or
    /// that was recorded for another customer or cart total.
    async fn check_reused_key(
        &self,
        attempt_id: AttemptId,
        customer_id: &CustomerId,
        total: Money,
    ) -> Result<()> {
        let conflict = |reason: &str| CheckoutError::IdempotencyConflict {
            attempt_id,
            reason: reason.to_string(),
        };

        let committed = self
            .storage
            .order_for_attempt(attempt_id)
            .await
            .map_err(|e| unexpected("look up idempotency key", e))?;
        if let Some(order) = committed {
            if order.customer_id() != customer_id {
                return Err(conflict("key belongs to another customer"));
            }
            return Err(conflict("an order was already committed under this key"));
        }

        if let Some(entry) = self.reconciliation.get(attempt_id).await {
            if entry.customer_id != *customer_id {
                return Err(conflict("key belongs to another customer"));
            }
            if entry.amount != total {
                return Err(conflict("cart total differs from the original attempt"));
            }
        }
        Ok(())
    }

    /// Reserves every cart line in ascending SKU order. On the first line
    /// that cannot be covered, gives back what was already taken.
    async fn reserve_all(&self, work: &mut S::Work, cart: &Cart) -> Result<()> {
        let mut lines: Vec<&CartLine> = cart.lines().iter().collect();
        lines.sort_by(|a, b| a.sku.cmp(&b.sku));

        let mut taken: Vec<(&Sku, u32)> = Vec::with_capacity(lines.len());
        for line in lines {
            let reservation = work
                .try_reserve(&line.sku, line.quantity)
                .await
                .map_err(|e| unexpected("reserve stock", e))?;

            match reservation {
                Reservation::Reserved { remaining } => {
                    metrics::counter!("inventory_reservations_total", "outcome" => "reserved")
                        .increment(1);
                    tracing::debug!(sku = %line.sku, quantity = line.quantity, remaining, "stock reserved");
                    taken.push((&line.sku, line.quantity));
                }
                Reservation::Insufficient { available } => {
                    metrics::counter!("inventory_reservations_total", "outcome" => "insufficient")
                        .increment(1);
                    tracing::info!(
                        sku = %line.sku,
                        requested = line.quantity,
                        available,
                        "insufficient stock"
                    );
                    for (sku, quantity) in taken.into_iter().rev() {
                        if let Err(e) = work.release(sku, quantity).await {
                            tracing::warn!(sku = %sku, error = %e, "release failed, rollback will discard it");
                        }
                    }
                    return Err(CheckoutError::InsufficientStock {
                        sku: line.sku.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, customer_id, token))]
    async fn charge(
        &self,
        attempt_id: AttemptId,
        customer_id: &CustomerId,
        amount: Money,
        token: &str,
    ) -> std::result::Result<PaymentResult, PaymentFault> {
        let request = PaymentRequest {
            customer_id: customer_id.clone(),
            amount,
            currency: self.config.currency.clone(),
            token: token.to_string(),
            idempotency_key: attempt_id,
        };

        let started = Instant::now();
        let timeout = self.config.payment_timeout;
        let result = tokio::time::timeout(timeout, self.payment.charge(&request))
            .await
            .unwrap_or(Err(PaymentFault::Timeout(timeout)));
        metrics::histogram!("payment_charge_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn commit(&self, work: S::Work) -> std::result::Result<(), StoreError> {
        let timeout = self.config.commit_timeout;
        match tokio::time::timeout(timeout, work.commit()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }

    async fn payment_failure(
        &self,
        attempt_id: AttemptId,
        customer_id: &CustomerId,
        amount: Money,
        fault: PaymentFault,
    ) -> CheckoutError {
        match fault {
            PaymentFault::KeyReuse(_) => {
                return CheckoutError::IdempotencyConflict {
                    attempt_id,
                    reason: fault.to_string(),
                };
            }
            PaymentFault::Timeout(_) => {
                let entry = ReconciliationEntry::unconfirmed(
                    attempt_id,
                    customer_id.clone(),
                    amount,
                    self.config.currency.clone(),
                    fault.to_string(),
                );
                self.reconciliation.record(entry).await;
                metrics::counter!("reconciliation_recorded_total", "payment" => "unconfirmed")
                    .increment(1);
                tracing::warn!(
                    amount = %amount,
                    error = %fault,
                    "payment outcome unknown, queued for reconciliation"
                );
            }
            PaymentFault::Unavailable(_) => {}
        }
        CheckoutError::PaymentFault { attempt_id, fault }
    }

    async fn persistence_failure(
        &self,
        attempt_id: AttemptId,
        customer_id: &CustomerId,
        amount: Money,
        payment: &PaymentResult,
        source: StoreError,
    ) -> CheckoutError {
        // Another attempt with this key won the commit; its order owns the charge.
        if let StoreError::DuplicateAttempt(_) = source {
            return CheckoutError::IdempotencyConflict {
                attempt_id,
                reason: source.to_string(),
            };
        }

        if payment.succeeded {
            let entry = ReconciliationEntry::new(
                attempt_id,
                customer_id.clone(),
                amount,
                self.config.currency.clone(),
                payment.provider_ref.clone(),
                source.to_string(),
            );
            self.reconciliation.record(entry).await;
            metrics::counter!("reconciliation_recorded_total", "payment" => "captured")
                .increment(1);
            tracing::error!(
                provider_ref = ?payment.provider_ref,
                amount = %amount,
                error = %source,
                "payment captured but checkout not persisted, queued for reconciliation"
            );
        }

        CheckoutError::Persistence {
            attempt_id,
            payment_captured: payment.succeeded,
            source,
        }
    }
}

/// Buffers the order and the cart clear in the unit of work.
async fn stage<W: UnitOfWork>(
    work: &mut W,
    attempt_id: AttemptId,
    cart: &Cart,
    status: OrderStatus,
    total: Money,
) -> std::result::Result<Order, StoreError> {
    let order = work
        .create_order(attempt_id, OrderDraft::from_cart(cart, status, total))
        .await?;
    work.clear_lines(cart.customer_id()).await?;
    Ok(order)
}

async fn discard<W: UnitOfWork>(work: W) {
    if let Err(e) = work.rollback().await {
        tracing::warn!(error = %e, "rollback failed, unit of work dropped");
    }
}

fn unexpected(step: &str, err: StoreError) -> CheckoutError {
    tracing::error!(step, error = %err, "storage failure before commit");
    CheckoutError::Unexpected(format!("{step}: {err}"))
}
