use crate::{
    config::{Config, CreditPackageConfig},
    error::{ApiError, Result},
    models::{
        common::ClientMeta,
        coupon_ext::CouponExt,
        events::PaymentEvent,
        payment::{ConfirmPaymentRequest, ConfirmationResult, RefundResult},
    },
    services::{
        catalog_service::CatalogLookup,
        coupon_service::CouponService,
        credits_service::CreditsService,
        daily_limit_service::DailyLimitService,
        event_service::PaymentEventPublisher,
        gateway_service::{GatewayApproval, GatewayError, PaymentGateway},
        idempotency_service::{IdempotencyDecision, IdempotencyService},
        ledger_service::LedgerReference,
        order_service::{
            payment_type_for, LineDraft, OrderAssembly, OrderService, OrderWithLines, Settlement,
        },
    },
};
use entity::sea_orm_active_enums::{ItemType, LedgerEntryType, OrderStatus, PaymentStatus};
use sea_orm::{entity::*, query::*, DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::{sync::Arc, time::Duration};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Method recorded for payments settled entirely with credit
const CREDIT_METHOD: &str = "CREDIT";

/// Validated amounts of one confirmation, decided before the gateway is called
#[derive(Debug, Clone)]
struct PaymentPlan {
    drafts: Vec<LineDraft>,
    total_original: i64,
    discount: i64,
    cash: i64,
    credit: i64,
}

impl PaymentPlan {
    fn final_amount(&self) -> i64 {
        self.total_original - self.discount
    }

    fn has_packages(&self) -> bool {
        self.drafts
            .iter()
            .any(|d| d.item.item_type == ItemType::CreditPackage)
    }
}

/// What the read-only pre-check found
enum Precheck {
    /// A DONE payment already exists for this key
    Settled(ConfirmationResult),
    Planned(PaymentPlan),
}

/// Payment orchestrator.
///
/// Runs one confirmation as a saga: dedup, pre-validation, gateway approval,
/// then a single transaction that reserves the coupon, writes the order and,
/// only if the gateway approved, spends credit and marks everything PAID.
pub struct PaymentService {
    db: DatabaseConnection,
    gateway: Arc<dyn PaymentGateway>,
    publisher: Arc<dyn PaymentEventPublisher>,
    gateway_timeout: Duration,
    idempotency: IdempotencyService,
    coupons: CouponService,
    orders: OrderService,
    credits: CreditsService,
    limits: DailyLimitService,
}

impl PaymentService {
    pub fn new(
        db: DatabaseConnection,
        config: &Config,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<dyn CatalogLookup>,
        publisher: Arc<dyn PaymentEventPublisher>,
    ) -> Self {
        Self {
            gateway,
            publisher,
            gateway_timeout: Duration::from_millis(config.gateway.timeout_ms),
            idempotency: IdempotencyService::new(db.clone(), &config.wallet),
            coupons: CouponService::new(db.clone()),
            orders: OrderService::new(db.clone(), catalog),
            credits: CreditsService::new(db.clone(), config.wallet.clone()),
            limits: DailyLimitService::new(db.clone(), config.limits.clone()),
            db,
        }
    }

    /// Confirm a payment exactly once per payment key
    #[instrument(
        skip(self, request, meta),
        fields(payment_key = %request.payment_key, order_number = %request.order_number)
    )]
    pub async fn confirm_payment(
        &self,
        request: ConfirmPaymentRequest,
        user_id: Uuid,
        meta: ClientMeta,
    ) -> Result<ConfirmationResult> {
        if request.amount < 0 || request.credit_amount < 0 {
            return Err(ApiError::BadRequest(
                "Payment amounts must not be negative".to_string(),
            ));
        }

        let key = request.payment_key.clone();
        match self
            .idempotency
            .begin(user_id, &key, &request.fingerprint())
            .await?
        {
            IdempotencyDecision::Replay(cached) => return Ok(cached),
            IdempotencyDecision::Proceed => {}
        }

        info!(
            "Confirming payment: user={}, cash={}, credit={}, ip={:?}",
            user_id, request.amount, request.credit_amount, meta.ip
        );

        match self.run_saga(&request, user_id).await {
            Ok(result) => {
                // The DONE payment row still anchors replays if this write is lost
                if let Err(e) = self.idempotency.complete(&key, &result).await {
                    error!("Failed to mark idempotency key {} completed: {}", key, e);
                }
                Ok(result)
            }
            Err(err) => {
                let snapshot = serde_json::json!({
                    "code": err.code(),
                    "message": err.to_string(),
                })
                .to_string();
                if let Err(e) = self.idempotency.fail(&key, &snapshot).await {
                    error!("Failed to mark idempotency key {} failed: {}", key, e);
                }
                Err(err)
            }
        }
    }

    async fn run_saga(&self, request: &ConfirmPaymentRequest, user_id: Uuid) -> Result<ConfirmationResult> {
        // Catalog reads happen before any transaction is open
        let priced = if request.items.is_empty() {
            Vec::new()
        } else {
            self.orders.price_items(&request.items).await?
        };

        let plan = match self.precheck(request, user_id, priced).await {
            Ok(Precheck::Settled(result)) => {
                info!("Payment {} already settled, replaying", request.payment_key);
                return Ok(result);
            }
            Ok(Precheck::Planned(plan)) => plan,
            Err(err) => {
                self.release_stale_reservation(request, user_id).await;
                return Err(err);
            }
        };

        let approval = self.call_gateway(request, &plan).await;

        match approval {
            Ok(approval) => match self.settle(request, user_id, &plan, &approval).await {
                Ok(result) => Ok(result),
                Err(err) => {
                    error!(
                        alert = true,
                        "Saga failed after gateway approval for {}: {}", request.payment_key, err
                    );
                    self.compensate(request, &plan).await;
                    if let Err(e) = self
                        .record_failure(request, user_id, &plan, &approval.method, &err.to_string())
                        .await
                    {
                        error!(
                            alert = true,
                            "Failed to record failed payment {}: {}", request.payment_key, e
                        );
                    }
                    Err(err)
                }
            },
            Err(reason) => {
                warn!("Gateway failed for payment {}: {}", request.payment_key, reason);
                let method = if plan.cash > 0 { "UNKNOWN" } else { CREDIT_METHOD };
                if let Err(e) = self
                    .record_failure(request, user_id, &plan, method, &reason.to_string())
                    .await
                {
                    error!(
                        alert = true,
                        "Failed to record failed payment {}: {}", request.payment_key, e
                    );
                }
                Err(ApiError::Gateway(reason.to_string()))
            }
        }
    }

    /// Read-only validation of the request against the current state
    async fn precheck(
        &self,
        request: &ConfirmPaymentRequest,
        user_id: Uuid,
        priced: Vec<LineDraft>,
    ) -> Result<Precheck> {
        let txn = self.db.begin().await?;
        let outcome = self.precheck_in_txn(request, user_id, priced, &txn).await;
        txn.rollback().await?;
        outcome
    }

    async fn precheck_in_txn(
        &self,
        request: &ConfirmPaymentRequest,
        user_id: Uuid,
        priced: Vec<LineDraft>,
        txn: &DatabaseTransaction,
    ) -> Result<Precheck> {
        if let Some(settled) = self.settled_result_in_txn(&request.payment_key, user_id, txn).await? {
            return Ok(Precheck::Settled(settled));
        }

        let existing = self
            .orders
            .find_reusable_in_txn(&request.order_number, user_id, txn)
            .await?;
        let drafts = match &existing {
            Some((_, lines)) if !lines.is_empty() => OrderService::drafts_from_lines(lines),
            _ => priced,
        };
        if drafts.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Order {} has no items",
                request.order_number
            )));
        }

        let total_original: i64 = drafts.iter().map(|d| d.original_amount).sum();

        let discount = match request.coupon_instance_id {
            Some(instance_id) => {
                let reservation = self
                    .coupons
                    .validate_in_txn(instance_id, user_id, total_original, txn)
                    .await?;
                reservation.coupon.compute_discount(total_original)
            }
            None => 0,
        };

        let plan = PaymentPlan {
            drafts,
            total_original,
            discount,
            cash: request.amount,
            credit: request.credit_amount,
        };

        if plan.credit > plan.final_amount() {
            return Err(ApiError::BadRequest(format!(
                "Credit {} exceeds the order amount {}",
                plan.credit,
                plan.final_amount()
            )));
        }
        if plan.cash != plan.final_amount() - plan.credit {
            return Err(ApiError::BadRequest(format!(
                "Amount mismatch: expected cash {}, got {}",
                plan.final_amount() - plan.credit,
                plan.cash
            )));
        }

        if plan.has_packages() {
            if plan.credit > 0 {
                return Err(ApiError::BadRequest(
                    "Credit packages cannot be paid with credit".to_string(),
                ));
            }
            if request.coupon_instance_id.is_some() {
                return Err(ApiError::BadRequest(
                    "Coupons cannot be applied to credit packages".to_string(),
                ));
            }
        }

        if plan.credit > 0 {
            let available = self
                .credits
                .available_credit_in_txn(user_id, OffsetDateTime::now_utc(), txn)
                .await?;
            if available < plan.credit {
                return Err(ApiError::InsufficientBalance(format!(
                    "Requested {} credits, only {} available",
                    plan.credit, available
                )));
            }
        }

        self.limits
            .check_in_txn(
                user_id,
                OffsetDateTime::now_utc().date(),
                plan.cash,
                plan.credit,
                txn,
            )
            .await?;

        Ok(Precheck::Planned(plan))
    }

    /// Rebuild the response of a payment that already reached DONE
    async fn settled_result_in_txn(
        &self,
        payment_key: &str,
        user_id: Uuid,
        txn: &DatabaseTransaction,
    ) -> Result<Option<ConfirmationResult>> {
        let payment = entity::payments::Entity::find()
            .filter(entity::payments::Column::PaymentKey.eq(payment_key))
            .filter(entity::payments::Column::Status.eq(PaymentStatus::Done))
            .one(txn)
            .await?;

        let Some(payment) = payment else {
            return Ok(None);
        };

        if payment.user_id != user_id {
            return Err(ApiError::Integrity(format!(
                "Payment {} belongs to another user",
                payment_key
            )));
        }

        let order = entity::orders::Entity::find_by_id(payment.order_id)
            .one(txn)
            .await?
            .ok_or_else(|| {
                ApiError::Integrity(format!("Payment {} points at a missing order", payment_key))
            })?;

        Ok(Some(Self::confirmation_result(&order, &payment)))
    }

    fn confirmation_result(
        order: &entity::orders::Model,
        payment: &entity::payments::Model,
    ) -> ConfirmationResult {
        ConfirmationResult {
            success: true,
            order_id: order.id,
            order_number: order.order_number.clone(),
            amount: order.final_amount,
            cash_amount: payment.cash_amount,
            credit_amount: payment.credit_amount,
            discount_amount: order.discount_amount,
            payment_method: payment.method.clone(),
            payment_type: order
                .payment_type
                .unwrap_or_else(|| payment_type_for(payment.cash_amount, payment.credit_amount)),
            paid_at: order
                .paid_at
                .or(payment.approved_at)
                .unwrap_or(payment.created_at),
        }
    }

    /// Ask the gateway to capture the cash part. Credit-only payments skip the call.
    async fn call_gateway(
        &self,
        request: &ConfirmPaymentRequest,
        plan: &PaymentPlan,
    ) -> std::result::Result<GatewayApproval, GatewayError> {
        if plan.cash == 0 {
            return Ok(GatewayApproval {
                status: "DONE".to_string(),
                method: CREDIT_METHOD.to_string(),
                approved_at: OffsetDateTime::now_utc(),
                total_amount: 0,
            });
        }

        let approval = tokio::time::timeout(
            self.gateway_timeout,
            self.gateway
                .confirm(&request.payment_key, &request.order_number, plan.cash),
        )
        .await
        .map_err(|_| GatewayError::Timeout)??;

        if approval.total_amount != plan.cash {
            warn!(
                "Gateway approved {} for {} but {} was requested",
                approval.total_amount, request.payment_key, plan.cash
            );
            // Give back whatever the gateway actually took
            self.cancel_at_gateway(&request.payment_key, "Amount mismatch", approval.total_amount)
                .await;
            return Err(GatewayError::InvalidResponse(format!(
                "Approved amount {} does not match {}",
                approval.total_amount, plan.cash
            )));
        }

        Ok(approval)
    }

    /// Success path: everything in one transaction, committed only if every step holds
    async fn settle(
        &self,
        request: &ConfirmPaymentRequest,
        user_id: Uuid,
        plan: &PaymentPlan,
        approval: &GatewayApproval,
    ) -> Result<ConfirmationResult> {
        let txn = self.db.begin().await?;
        let (order, lines) = self
            .assemble_in_txn(request, user_id, plan, request.coupon_instance_id, &txn)
            .await?;

        if let Some(instance_id) = request.coupon_instance_id {
            self.coupons.commit_in_txn(instance_id, &txn).await?;
        }

        if plan.credit > 0 {
            self.credits
                .debit_in_txn(user_id, plan.credit, order.id, &order.order_number, &txn)
                .await?;
        }

        for line in lines.iter().filter(|l| l.item_type == ItemType::CreditPackage) {
            let package = self.package_for_line(line)?;
            let quantity = line.quantity as i64;
            let lots = self.credits.package_lots(
                package.base_credits * quantity,
                package.bonus_credits * quantity,
                line.id,
            );
            self.credits
                .issue_in_txn(
                    user_id,
                    lots,
                    LedgerEntryType::Charge,
                    &format!("Purchased {} x{}", package.title, line.quantity),
                    Some(LedgerReference::order(order.id)),
                    &txn,
                )
                .await?;
        }

        let paid_at = approval.approved_at;
        let payment = self
            .insert_payment_in_txn(
                &order,
                user_id,
                request,
                plan,
                &approval.method,
                PaymentStatus::Done,
                None,
                Some(paid_at),
                &txn,
            )
            .await?;

        let spend_date = paid_at.date();
        self.limits
            .check_in_txn(user_id, spend_date, plan.cash, plan.credit, &txn)
            .await?;
        self.limits
            .add_in_txn(user_id, spend_date, plan.cash, plan.credit, &txn)
            .await?;

        let (order, _lines) = self
            .orders
            .mark_paid_in_txn(
                order,
                lines,
                Settlement {
                    payment_type: payment_type_for(plan.cash, plan.credit),
                    credit_spent: plan.credit,
                    cash_amount: plan.cash,
                    paid_at,
                },
                &txn,
            )
            .await?;

        txn.commit().await?;

        info!(
            "Payment completed: user={}, order={}, cash={}, credit={}, discount={}",
            user_id, order.order_number, plan.cash, plan.credit, plan.discount
        );

        // Downstream delivery must never fail a committed payment
        let event = PaymentEvent::PaymentCompleted {
            user_id,
            order_id: order.id,
            order_number: order.order_number.clone(),
            paid_at,
        };
        if let Err(e) = self.publisher.publish(event).await {
            warn!("Failed to publish completion of order {}: {}", order.order_number, e);
        }

        Ok(Self::confirmation_result(&order, &payment))
    }

    /// Reserve the coupon, if any, and write the PENDING order with its discount split
    async fn assemble_in_txn(
        &self,
        request: &ConfirmPaymentRequest,
        user_id: Uuid,
        plan: &PaymentPlan,
        coupon_instance_id: Option<Uuid>,
        txn: &DatabaseTransaction,
    ) -> Result<OrderWithLines> {
        let existing = self
            .orders
            .find_reusable_in_txn(&request.order_number, user_id, txn)
            .await?;

        let discount = match coupon_instance_id {
            Some(instance_id) => {
                let reservation = self
                    .coupons
                    .reserve_in_txn(
                        instance_id,
                        user_id,
                        &request.order_number,
                        plan.total_original,
                        txn,
                    )
                    .await?;
                let discount = reservation.coupon.compute_discount(plan.total_original);
                if discount != plan.discount {
                    return Err(ApiError::InvalidState(format!(
                        "Coupon {} changed during payment",
                        instance_id
                    )));
                }
                discount
            }
            None => 0,
        };

        self.orders
            .create_or_reuse_in_txn(
                existing,
                OrderAssembly {
                    order_number: request.order_number.clone(),
                    user_id,
                    drafts: plan.drafts.clone(),
                    discount,
                    coupon_instance_id,
                    idempotency_key: Some(request.payment_key.clone()),
                },
                txn,
            )
            .await
    }

    /// Failure path: persist the failed attempt for audit and put the coupon back.
    /// When the coupon can no longer be reserved, the attempt is recorded against
    /// the order without it.
    async fn record_failure(
        &self,
        request: &ConfirmPaymentRequest,
        user_id: Uuid,
        plan: &PaymentPlan,
        method: &str,
        reason: &str,
    ) -> Result<()> {
        let coupon = request.coupon_instance_id;
        let txn = self.db.begin().await?;

        let (txn, order) = match self.assemble_in_txn(request, user_id, plan, coupon, &txn).await {
            Ok((order, _lines)) => {
                if let Some(instance_id) = coupon {
                    self.coupons.release_in_txn(instance_id, &txn).await?;
                }
                (txn, order)
            }
            Err(e) if coupon.is_some() => {
                warn!(
                    "Recording failed payment {} without its coupon: {}",
                    request.payment_key, e
                );
                txn.rollback().await?;
                self.release_stale_reservation(request, user_id).await;

                let txn = self.db.begin().await?;
                let (order, _lines) = self
                    .assemble_in_txn(request, user_id, plan, None, &txn)
                    .await?;
                (txn, order)
            }
            Err(e) => {
                txn.rollback().await?;
                return Err(e);
            }
        };

        self.insert_payment_in_txn(
            &order,
            user_id,
            request,
            plan,
            method,
            PaymentStatus::Failed,
            Some(reason.to_string()),
            None,
            &txn,
        )
        .await?;

        txn.commit().await?;
        Ok(())
    }

    /// Put back a coupon an earlier, interrupted attempt left reserved for this order
    async fn release_stale_reservation(&self, request: &ConfirmPaymentRequest, user_id: Uuid) {
        let Some(instance_id) = request.coupon_instance_id else {
            return;
        };

        let outcome = async {
            let txn = self.db.begin().await?;
            let instance = entity::coupon_instances::Entity::find_by_id(instance_id)
                .one(&txn)
                .await?;

            let held_by_this_order = instance.is_some_and(|i| {
                i.user_id == user_id
                    && i.reserved_order_number.as_deref() == Some(request.order_number.as_str())
            });
            if held_by_this_order {
                self.coupons.release_in_txn(instance_id, &txn).await?;
            }
            txn.commit().await?;
            Ok::<(), ApiError>(())
        }
        .await;

        if let Err(e) = outcome {
            warn!("Failed to release coupon {}: {}", instance_id, e);
        }
    }

    /// Best-effort reversal of an approved charge whose saga rolled back
    async fn compensate(&self, request: &ConfirmPaymentRequest, plan: &PaymentPlan) {
        if plan.cash == 0 {
            return;
        }
        self.cancel_at_gateway(&request.payment_key, "Payment could not be completed", plan.cash)
            .await;
    }

    async fn cancel_at_gateway(&self, payment_key: &str, reason: &str, amount: i64) {
        if amount <= 0 {
            return;
        }
        let result = tokio::time::timeout(
            self.gateway_timeout,
            self.gateway.cancel(payment_key, reason, amount),
        )
        .await;

        match result {
            Ok(Ok(_)) => info!("Cancelled {} on payment {}", amount, payment_key),
            Ok(Err(e)) => error!(
                alert = true,
                "Could not cancel {} on payment {}: {}", amount, payment_key, e
            ),
            Err(_) => error!(
                alert = true,
                "Timed out cancelling {} on payment {}", amount, payment_key
            ),
        }
    }

    fn package_for_line(&self, line: &entity::order_lines::Model) -> Result<CreditPackageConfig> {
        let package_id = line.package_id.as_deref().ok_or_else(|| {
            ApiError::Integrity(format!("Package line {} has no package id", line.id))
        })?;
        self.orders
            .credit_package(package_id)
            .ok_or_else(|| ApiError::NotFound(format!("Credit package {} not found", package_id)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_payment_in_txn(
        &self,
        order: &entity::orders::Model,
        user_id: Uuid,
        request: &ConfirmPaymentRequest,
        plan: &PaymentPlan,
        method: &str,
        status: PaymentStatus,
        failure_reason: Option<String>,
        approved_at: Option<OffsetDateTime>,
        txn: &DatabaseTransaction,
    ) -> Result<entity::payments::Model> {
        let now = OffsetDateTime::now_utc();
        let payment = entity::payments::ActiveModel {
            id: Set(Uuid::now_v7()),
            order_id: Set(order.id),
            user_id: Set(user_id),
            payment_key: Set(request.payment_key.clone()),
            method: Set(method.to_string()),
            status: Set(status),
            cash_amount: Set(plan.cash),
            credit_amount: Set(plan.credit),
            failure_reason: Set(failure_reason),
            approved_at: Set(approved_at),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await?;
        Ok(payment)
    }

    /// Refund a PAID order: cancel the cash part at the gateway, give back spent
    /// credit, take back package credit, and mark everything REFUNDED.
    #[instrument(skip(self, reason))]
    pub async fn refund_order(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        reason: &str,
    ) -> Result<RefundResult> {
        let txn = self.db.begin().await?;

        let (order, lines) = self.orders.find_with_lines_in_txn(order_id, &txn).await?;
        if order.user_id != user_id {
            return Err(ApiError::Forbidden(format!(
                "Order {} belongs to another user",
                order_id
            )));
        }
        if order.status != OrderStatus::Paid {
            return Err(ApiError::InvalidState(format!(
                "Order {} is {:?}, only PAID orders can be refunded",
                order_id, order.status
            )));
        }

        let payment = entity::payments::Entity::find()
            .filter(entity::payments::Column::OrderId.eq(order.id))
            .filter(entity::payments::Column::Status.eq(PaymentStatus::Done))
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ApiError::Integrity(format!("Paid order {} has no settled payment", order_id))
            })?;

        let credit_restored = match self
            .credits
            .restore_for_order_in_txn(user_id, order.id, order.credit_spent, &txn)
            .await?
        {
            Some(restore) => restore.entry.amount,
            None => 0,
        };

        let package_lines: Vec<Uuid> = lines
            .iter()
            .filter(|l| l.item_type == ItemType::CreditPackage)
            .map(|l| l.id)
            .collect();
        let credit_revoked = if package_lines.is_empty() {
            0
        } else {
            self.credits
                .revoke_issued_lots_in_txn(user_id, order.id, package_lines, &txn)
                .await?
        };

        if let Some(paid_at) = order.paid_at {
            self.limits
                .subtract_in_txn(
                    user_id,
                    paid_at.date(),
                    payment.cash_amount,
                    payment.credit_amount,
                    &txn,
                )
                .await?;
        }

        let now = OffsetDateTime::now_utc();
        let mut payment_active: entity::payments::ActiveModel = payment.clone().into();
        payment_active.status = Set(PaymentStatus::Cancelled);
        payment_active.updated_at = Set(now);
        payment_active.update(&txn).await?;

        let (order, _lines) = self.orders.mark_refunded_in_txn(order, lines, &txn).await?;

        // Last step before commit: any failure above leaves the charge untouched
        if payment.cash_amount > 0 {
            tokio::time::timeout(
                self.gateway_timeout,
                self.gateway
                    .cancel(&payment.payment_key, reason, payment.cash_amount),
            )
            .await
            .map_err(|_| ApiError::Gateway(GatewayError::Timeout.to_string()))?
            .map_err(|e| ApiError::Gateway(e.to_string()))?;
        }

        txn.commit().await?;

        info!(
            "Refunded order {}: cash={}, credit_restored={}, credit_revoked={}",
            order.order_number, payment.cash_amount, credit_restored, credit_revoked
        );

        let event = PaymentEvent::OrderRefunded {
            user_id,
            order_id: order.id,
            refunded_at: now,
        };
        if let Err(e) = self.publisher.publish(event).await {
            warn!("Failed to publish refund of order {}: {}", order.order_number, e);
        }

        Ok(RefundResult {
            order_id: order.id,
            cash_refunded: payment.cash_amount,
            credit_restored,
            credit_revoked,
            refunded_at: now,
        })
    }

    pub fn orders(&self) -> &OrderService {
        &self.orders
    }
}
