use crate::{
    error::{ApiError, Result},
    models::payment::{OrderInfo, OrderItemRequest, OrderLineInfo},
    services::catalog_service::{CatalogLookup, PricedItem},
    utils::is_unique_violation,
};
use entity::sea_orm_active_enums::{ItemType, OrderLineStatus, OrderStatus, PaymentType};
use sea_orm::{entity::*, query::*, DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

/// A priced line before it is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDraft {
    pub item: PricedItem,
    pub quantity: i32,
    pub original_amount: i64,
}

impl LineDraft {
    pub fn new(item: PricedItem, quantity: i32) -> Self {
        let original_amount = item.unit_price * quantity as i64;
        Self {
            item,
            quantity,
            original_amount,
        }
    }
}

/// Everything needed to write (or rewrite) a PENDING order
#[derive(Debug, Clone)]
pub struct OrderAssembly {
    pub order_number: String,
    pub user_id: Uuid,
    pub drafts: Vec<LineDraft>,
    pub discount: i64,
    pub coupon_instance_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
}

/// How a paid order was settled
#[derive(Debug, Clone, Copy)]
pub struct Settlement {
    pub payment_type: PaymentType,
    pub credit_spent: i64,
    pub cash_amount: i64,
    pub paid_at: OffsetDateTime,
}

pub type OrderWithLines = (entity::orders::Model, Vec<entity::order_lines::Model>);

/// Split one order-level discount over its lines.
///
/// Every line but the last gets `round(original / total * discount)` (half up);
/// the last line takes the remainder so the shares sum exactly to the discount.
/// No line is discounted below zero: if the remainder exceeds the last line's
/// amount, the excess moves to earlier lines that still have room.
pub fn allocate_discount(originals: &[i64], total_discount: i64) -> Vec<i64> {
    let n = originals.len();
    if n == 0 {
        return Vec::new();
    }

    let total: i64 = originals.iter().sum();
    if total <= 0 || total_discount <= 0 {
        return vec![0; n];
    }
    let discount = total_discount.min(total);

    let mut shares = Vec::with_capacity(n);
    let mut allocated = 0i64;
    for &original in &originals[..n - 1] {
        let numerator = original as i128 * discount as i128 * 2 + total as i128;
        let share = (numerator / (2 * total as i128)) as i64;
        let share = share.min(original).min(discount - allocated);
        shares.push(share);
        allocated += share;
    }
    shares.push(discount - allocated);

    let last = n - 1;
    if shares[last] > originals[last] {
        let mut excess = shares[last] - originals[last];
        shares[last] = originals[last];
        for i in (0..last).rev() {
            if excess == 0 {
                break;
            }
            let room = originals[i] - shares[i];
            let add = room.min(excess);
            shares[i] += add;
            excess -= add;
        }
    }

    shares
}

/// `ORD-YYYYMMDD-<12 hex>`
pub fn generate_order_number(now: OffsetDateTime) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "ORD-{:04}{:02}{:02}-{}",
        now.year(),
        now.month() as u8,
        now.day(),
        &suffix[..12]
    )
}

/// Credit packages are bought on their own; an order holding one holds nothing else
pub fn check_item_mix(item_types: impl IntoIterator<Item = ItemType>) -> Result<()> {
    let (mut packages, mut others) = (0usize, 0usize);
    for item_type in item_types {
        match item_type {
            ItemType::CreditPackage => packages += 1,
            _ => others += 1,
        }
    }

    if packages > 0 && others > 0 {
        return Err(ApiError::BadRequest(
            "Credit packages cannot be ordered together with courses or sections".to_string(),
        ));
    }
    Ok(())
}

pub fn payment_type_for(cash: i64, credit: i64) -> PaymentType {
    match (cash > 0, credit > 0) {
        (true, true) => PaymentType::Mixed,
        (false, true) => PaymentType::Credit,
        _ => PaymentType::Cash,
    }
}

/// Orders and order lines
pub struct OrderService {
    db: DatabaseConnection,
    catalog: Arc<dyn CatalogLookup>,
}

impl OrderService {
    pub fn new(db: DatabaseConnection, catalog: Arc<dyn CatalogLookup>) -> Self {
        Self { db, catalog }
    }

    /// Price request items through the catalog
    pub async fn price_items(&self, items: &[OrderItemRequest]) -> Result<Vec<LineDraft>> {
        check_item_mix(items.iter().map(|item| item.item_type))?;

        let mut drafts = Vec::with_capacity(items.len());
        for item in items {
            if item.quantity <= 0 {
                return Err(ApiError::BadRequest(format!(
                    "Quantity for {} must be positive",
                    item.item_id
                )));
            }
            let priced = self.catalog.resolve(item.item_type, &item.item_id).await?;
            drafts.push(LineDraft::new(priced, item.quantity));
        }
        Ok(drafts)
    }

    /// Create a PENDING order that a later confirmation pays by order number
    #[instrument(skip(self, items))]
    pub async fn prepare_order(&self, user_id: Uuid, items: &[OrderItemRequest]) -> Result<OrderInfo> {
        if items.is_empty() {
            return Err(ApiError::BadRequest("An order needs at least one item".to_string()));
        }

        let drafts = self.price_items(items).await?;
        let order_number = generate_order_number(OffsetDateTime::now_utc());

        let txn = self.db.begin().await?;
        let (order, lines) = self
            .create_or_reuse_in_txn(
                None,
                OrderAssembly {
                    order_number,
                    user_id,
                    drafts,
                    discount: 0,
                    coupon_instance_id: None,
                    idempotency_key: None,
                },
                &txn,
            )
            .await?;
        txn.commit().await?;

        info!(
            "Prepared order {} for user {}: total={}",
            order.order_number, user_id, order.total_amount
        );

        Ok(Self::to_info(&order, &lines))
    }

    async fn lines_in_txn(
        &self,
        order_id: Uuid,
        txn: &DatabaseTransaction,
    ) -> Result<Vec<entity::order_lines::Model>> {
        let lines = entity::order_lines::Entity::find()
            .filter(entity::order_lines::Column::OrderId.eq(order_id))
            .order_by_asc(entity::order_lines::Column::LineNo)
            .all(txn)
            .await?;
        Ok(lines)
    }

    /// Existing order with this number that the caller may still pay, locked.
    /// Another user's order is Forbidden; a settled one is InvalidState.
    pub async fn find_reusable_in_txn(
        &self,
        order_number: &str,
        user_id: Uuid,
        txn: &DatabaseTransaction,
    ) -> Result<Option<OrderWithLines>> {
        let order = entity::orders::Entity::find()
            .filter(entity::orders::Column::OrderNumber.eq(order_number))
            .lock_exclusive()
            .one(txn)
            .await?;

        let Some(order) = order else {
            return Ok(None);
        };

        if order.user_id != user_id {
            return Err(ApiError::Forbidden(format!(
                "Order {} belongs to another user",
                order_number
            )));
        }

        if order.status != OrderStatus::Pending {
            return Err(ApiError::InvalidState(format!(
                "Order {} is {:?}, not payable",
                order_number, order.status
            )));
        }

        let lines = self.lines_in_txn(order.id, txn).await?;
        Ok(Some((order, lines)))
    }

    /// Rebuild line drafts from a stored order
    pub fn drafts_from_lines(lines: &[entity::order_lines::Model]) -> Vec<LineDraft> {
        lines
            .iter()
            .map(|line| LineDraft {
                item: PricedItem {
                    item_type: line.item_type,
                    course_id: line.course_id,
                    section_id: line.section_id,
                    package_id: line.package_id.clone(),
                    title: line.title.clone(),
                    unit_price: line.unit_price,
                },
                quantity: line.quantity,
                original_amount: line.original_amount,
            })
            .collect()
    }

    /// Write a PENDING order with its lines and allocated discounts.
    /// An existing order is rewritten in place (same id and number).
    #[instrument(skip(self, existing, assembly, txn), fields(order_number = %assembly.order_number))]
    pub async fn create_or_reuse_in_txn(
        &self,
        existing: Option<OrderWithLines>,
        assembly: OrderAssembly,
        txn: &DatabaseTransaction,
    ) -> Result<OrderWithLines> {
        if assembly.drafts.is_empty() {
            return Err(ApiError::BadRequest("An order needs at least one item".to_string()));
        }

        let now = OffsetDateTime::now_utc();
        let originals: Vec<i64> = assembly.drafts.iter().map(|d| d.original_amount).collect();
        let total: i64 = originals.iter().sum();
        let discount = assembly.discount.clamp(0, total);
        let shares = allocate_discount(&originals, discount);

        let (order, old_lines) = match existing {
            Some((order, lines)) => {
                let mut order_active: entity::orders::ActiveModel = order.into();
                order_active.total_amount = Set(total);
                order_active.discount_amount = Set(discount);
                order_active.final_amount = Set(total - discount);
                order_active.coupon_instance_id = Set(assembly.coupon_instance_id);
                order_active.idempotency_key = Set(assembly.idempotency_key.clone());
                order_active.updated_at = Set(now);
                (order_active.update(txn).await?, lines)
            }
            None => {
                let order = entity::orders::ActiveModel {
                    id: Set(Uuid::now_v7()),
                    order_number: Set(assembly.order_number.clone()),
                    user_id: Set(assembly.user_id),
                    status: Set(OrderStatus::Pending),
                    total_amount: Set(total),
                    discount_amount: Set(discount),
                    final_amount: Set(total - discount),
                    credit_spent: Set(0),
                    cash_amount: Set(0),
                    payment_type: Set(None),
                    idempotency_key: Set(assembly.idempotency_key.clone()),
                    coupon_instance_id: Set(assembly.coupon_instance_id),
                    paid_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(txn)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ApiError::DuplicateRequest(format!(
                            "Order {} is being created concurrently",
                            assembly.order_number
                        ))
                    } else {
                        ApiError::Database(e)
                    }
                })?;
                (order, Vec::new())
            }
        };

        let mut lines = Vec::with_capacity(assembly.drafts.len());
        for (index, (draft, share)) in assembly.drafts.iter().zip(shares).enumerate() {
            let line_no = index as i32 + 1;
            let line_coupon = (share > 0).then_some(assembly.coupon_instance_id).flatten();

            let line = match old_lines.iter().find(|l| l.line_no == line_no) {
                Some(old) => {
                    let mut line_active: entity::order_lines::ActiveModel = old.clone().into();
                    line_active.discount_amount = Set(share);
                    line_active.final_amount = Set(draft.original_amount - share);
                    line_active.coupon_instance_id = Set(line_coupon);
                    line_active.updated_at = Set(now);
                    line_active.update(txn).await?
                }
                None => {
                    entity::order_lines::ActiveModel {
                        id: Set(Uuid::now_v7()),
                        order_id: Set(order.id),
                        line_no: Set(line_no),
                        item_type: Set(draft.item.item_type),
                        course_id: Set(draft.item.course_id),
                        section_id: Set(draft.item.section_id),
                        package_id: Set(draft.item.package_id.clone()),
                        title: Set(draft.item.title.clone()),
                        quantity: Set(draft.quantity),
                        unit_price: Set(draft.item.unit_price),
                        original_amount: Set(draft.original_amount),
                        discount_amount: Set(share),
                        final_amount: Set(draft.original_amount - share),
                        coupon_instance_id: Set(line_coupon),
                        status: Set(OrderLineStatus::Pending),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(txn)
                    .await?
                }
            };
            lines.push(line);
        }

        Ok((order, lines))
    }

    /// PENDING -> PAID for the order and every line
    pub async fn mark_paid_in_txn(
        &self,
        order: entity::orders::Model,
        lines: Vec<entity::order_lines::Model>,
        settlement: Settlement,
        txn: &DatabaseTransaction,
    ) -> Result<OrderWithLines> {
        if order.status != OrderStatus::Pending {
            return Err(ApiError::InvalidState(format!(
                "Order {} is {:?}, cannot be paid",
                order.order_number, order.status
            )));
        }

        let mut order_active: entity::orders::ActiveModel = order.into();
        order_active.status = Set(OrderStatus::Paid);
        order_active.payment_type = Set(Some(settlement.payment_type));
        order_active.credit_spent = Set(settlement.credit_spent);
        order_active.cash_amount = Set(settlement.cash_amount);
        order_active.paid_at = Set(Some(settlement.paid_at));
        order_active.updated_at = Set(settlement.paid_at);
        let order = order_active.update(txn).await?;

        let lines = self
            .set_line_status_in_txn(lines, OrderLineStatus::Paid, txn)
            .await?;

        Ok((order, lines))
    }

    /// PAID -> REFUNDED for the order and every line
    pub async fn mark_refunded_in_txn(
        &self,
        order: entity::orders::Model,
        lines: Vec<entity::order_lines::Model>,
        txn: &DatabaseTransaction,
    ) -> Result<OrderWithLines> {
        let mut order_active: entity::orders::ActiveModel = order.into();
        order_active.status = Set(OrderStatus::Refunded);
        order_active.updated_at = Set(OffsetDateTime::now_utc());
        let order = order_active.update(txn).await?;

        let lines = self
            .set_line_status_in_txn(lines, OrderLineStatus::Refunded, txn)
            .await?;

        Ok((order, lines))
    }

    async fn set_line_status_in_txn(
        &self,
        lines: Vec<entity::order_lines::Model>,
        status: OrderLineStatus,
        txn: &DatabaseTransaction,
    ) -> Result<Vec<entity::order_lines::Model>> {
        let now = OffsetDateTime::now_utc();
        let mut updated = Vec::with_capacity(lines.len());
        for line in lines {
            let mut line_active: entity::order_lines::ActiveModel = line.into();
            line_active.status = Set(status);
            line_active.updated_at = Set(now);
            updated.push(line_active.update(txn).await?);
        }
        Ok(updated)
    }

    /// Order by id with its lines, locked
    pub async fn find_with_lines_in_txn(
        &self,
        order_id: Uuid,
        txn: &DatabaseTransaction,
    ) -> Result<OrderWithLines> {
        let order = entity::orders::Entity::find_by_id(order_id)
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Order {} not found", order_id)))?;
        let lines = self.lines_in_txn(order.id, txn).await?;
        Ok((order, lines))
    }

    pub async fn find_by_number(&self, order_number: &str) -> Result<Option<OrderWithLines>> {
        let order = entity::orders::Entity::find()
            .filter(entity::orders::Column::OrderNumber.eq(order_number))
            .one(&self.db)
            .await?;

        let Some(order) = order else {
            return Ok(None);
        };

        let lines = entity::order_lines::Entity::find()
            .filter(entity::order_lines::Column::OrderId.eq(order.id))
            .order_by_asc(entity::order_lines::Column::LineNo)
            .all(&self.db)
            .await?;
        Ok(Some((order, lines)))
    }

    pub fn credit_package(&self, package_id: &str) -> Option<crate::config::CreditPackageConfig> {
        self.catalog.credit_package(package_id)
    }

    pub fn to_info(order: &entity::orders::Model, lines: &[entity::order_lines::Model]) -> OrderInfo {
        OrderInfo {
            order_id: order.id,
            order_number: order.order_number.clone(),
            status: order.status,
            total_amount: order.total_amount,
            discount_amount: order.discount_amount,
            final_amount: order.final_amount,
            lines: lines
                .iter()
                .map(|line| OrderLineInfo {
                    line_no: line.line_no,
                    item_type: line.item_type,
                    item_id: match line.item_type {
                        ItemType::Course => line.course_id.map(|id| id.to_string()),
                        ItemType::Section => line.section_id.map(|id| id.to_string()),
                        ItemType::CreditPackage => line.package_id.clone(),
                    }
                    .unwrap_or_default(),
                    title: line.title.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    original_amount: line.original_amount,
                    discount_amount: line.discount_amount,
                    final_amount: line.final_amount,
                })
                .collect(),
        }
    }
}
