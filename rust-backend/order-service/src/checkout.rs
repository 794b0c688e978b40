//! Order creation.
//!
//! One transaction turns a cart (or an explicit item list) into an order with
//! an immutable item snapshot, takes the stock, and empties the consumed cart
//! lines. Prices and stock always come from the catalog rows locked inside
//! that transaction; anything the client sent about prices is ignored.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::dispatch;
use crate::error::AppError;
use crate::models::{
    CheckoutResponse, CreateOrderRequest, MenuItem, NewOrder, NewPayment, Order, OrderEvent,
    OrderItem, OrderStatus, PaymentMethod, PricedLine, Supplier, SupplierQuote,
};
use crate::redis_pub::{publish_best_effort, EventPublisher};
use crate::store::{Store, StoreTx};

/// A validated checkout request.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub owner: String,
    pub supplier_id: Option<i64>,
    pub payment_method: PaymentMethod,
    pub items: Option<Vec<WantedLine>>,
    pub delivery_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WantedLine {
    pub menu_item_id: i64,
    pub quantity: i32,
    pub cart_line_id: Option<i64>,
}

impl TryFrom<CreateOrderRequest> for Checkout {
    type Error = AppError;

    fn try_from(req: CreateOrderRequest) -> Result<Self, Self::Error> {
        let owner = req
            .owner
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .ok_or_else(|| AppError::Validation("cartId (owner) is required".into()))?
            .to_string();

        let items = req
            .items
            .map(|lines| {
                lines
                    .into_iter()
                    .map(|line| {
                        if line.quantity <= 0 {
                            return Err(AppError::Validation(format!(
                                "quantity for item {} must be at least 1",
                                line.item_ref
                            )));
                        }
                        Ok(WantedLine {
                            menu_item_id: line.item_ref,
                            quantity: line.quantity,
                            cart_line_id: line.cart_id,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        Ok(Self {
            owner,
            supplier_id: req.supplier_id,
            payment_method: PaymentMethod::parse(req.payment_method.as_deref())?,
            items,
            delivery_address: req.delivery_address.filter(|a| !a.trim().is_empty()),
        })
    }
}

/// The result of pricing a set of lines against locked catalog rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPlan {
    pub lines: Vec<PricedLine>,
    pub items_total: i64,
    pub delivery_fee: i64,
    pub total: i64,
}

#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub client_token: Option<String>,
}

/// Prices `wanted` from the catalog rows. Stock is checked for every line
/// before supplier ownership.
pub fn price_order(
    wanted: &[WantedLine],
    catalog: &[MenuItem],
    supplier: Option<&Supplier>,
) -> Result<OrderPlan, AppError> {
    if wanted.is_empty() {
        return Err(AppError::EmptyOrder);
    }

    let by_id: BTreeMap<i64, &MenuItem> = catalog.iter().map(|item| (item.id, item)).collect();
    let mut lines = Vec::with_capacity(wanted.len());

    for line in wanted {
        let item = by_id
            .get(&line.menu_item_id)
            .ok_or_else(|| AppError::Validation(format!("Menu item {} does not exist", line.menu_item_id)))?;

        if !item.available {
            return Err(AppError::Conflict(format!("{} is no longer available", item.name)));
        }
        if line.quantity > item.stock {
            return Err(AppError::InsufficientStock {
                item_id: item.id,
                name: item.name.clone(),
                requested: line.quantity,
                available: item.stock,
            });
        }

        lines.push(PricedLine {
            menu_item_id: item.id,
            name: item.name.clone(),
            unit_price: item.price,
            quantity: line.quantity,
            subtotal: item.price * i64::from(line.quantity),
        });
    }

    if let Some(supplier) = supplier {
        if let Some(foreign) = wanted
            .iter()
            .filter_map(|line| by_id.get(&line.menu_item_id))
            .find(|item| item.supplier_id != Some(supplier.id))
        {
            return Err(AppError::MixedSupplier {
                item_id: foreign.id,
                name: foreign.name.clone(),
                supplier_id: supplier.id,
            });
        }
    }

    let items_total: i64 = lines.iter().map(|l| l.subtotal).sum();
    let delivery_fee = supplier.map_or(0, |s| s.delivery_fee);

    Ok(OrderPlan {
        lines,
        items_total,
        delivery_fee,
        total: items_total + delivery_fee,
    })
}

/// Sums repeated items so each menu row is checked and decremented once.
fn merge_lines(lines: impl IntoIterator<Item = WantedLine>) -> Result<Vec<WantedLine>, AppError> {
    let mut merged: Vec<WantedLine> = Vec::new();
    for line in lines {
        match merged.iter_mut().find(|m| m.menu_item_id == line.menu_item_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(line.quantity).ok_or_else(|| {
                    AppError::Validation(format!("quantity for item {} is too large", line.menu_item_id))
                })?;
            }
            None => merged.push(line),
        }
    }
    Ok(merged)
}

/// Resolves the lines to order and the cart lines they consume. An empty id
/// list means "every cart line of the owner".
async fn resolve_lines(
    tx: &mut dyn StoreTx,
    checkout: &Checkout,
    cart_cutoff: DateTime<Utc>,
) -> Result<(Vec<WantedLine>, Vec<i64>), AppError> {
    if let Some(items) = checkout.items.as_ref().filter(|items| !items.is_empty()) {
        let consumed = items.iter().filter_map(|l| l.cart_line_id).collect();
        return Ok((merge_lines(items.iter().copied())?, consumed));
    }

    let lines: Vec<WantedLine> = tx
        .cart_lines(&checkout.owner)
        .await?
        .into_iter()
        .filter(|line| line.created_at >= cart_cutoff)
        .map(|line| WantedLine {
            menu_item_id: line.menu_item_id,
            quantity: line.quantity,
            cart_line_id: Some(line.id),
        })
        .collect();

    Ok((merge_lines(lines)?, Vec::new()))
}

/// Runs the whole checkout in one transaction. On any error the transaction
/// is dropped unfinished and nothing is written.
pub async fn create_order(
    store: &dyn Store,
    checkout: &Checkout,
    settings: &Settings,
    now: DateTime<Utc>,
) -> Result<CreatedOrder, AppError> {
    let mut tx = store.begin().await?;

    let (wanted, consumed_cart_lines) = resolve_lines(&mut *tx, checkout, now - settings.cart_ttl).await?;
    if wanted.is_empty() {
        return Err(AppError::EmptyOrder);
    }

    let ids: Vec<i64> = wanted.iter().map(|l| l.menu_item_id).collect();
    let catalog = tx.lock_menu_items(&ids).await?;

    let supplier = match checkout.supplier_id {
        Some(id) => Some(
            tx.supplier(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Supplier {id} not found")))?,
        ),
        None => None,
    };

    let plan = price_order(&wanted, &catalog, supplier.as_ref())?;

    let order = tx
        .insert_order(&NewOrder {
            owner: checkout.owner.clone(),
            supplier_id: supplier.as_ref().map(|s| s.id),
            status: OrderStatus::Pending,
            items_total: plan.items_total,
            delivery_fee: plan.delivery_fee,
            total: plan.total,
            payment_method: checkout.payment_method,
            delivery_address: checkout.delivery_address.clone(),
            created_at: now,
            expires_at: now + settings.order_expiry,
        })
        .await?;

    let mut items = Vec::with_capacity(plan.lines.len());
    for line in &plan.lines {
        items.push(tx.insert_order_item(order.id, line).await?);
    }

    for line in &plan.lines {
        tx.adjust_stock(line.menu_item_id, -line.quantity).await?;
    }

    tx.delete_cart_lines(&checkout.owner, &consumed_cart_lines).await?;

    let client_token = match checkout.payment_method {
        PaymentMethod::Card => {
            let token = format!("mock_{}_{}", order.id, Uuid::new_v4().simple());
            tx.insert_payment(&NewPayment {
                order_id: order.id,
                provider: "mock".into(),
                status: "initiated".into(),
                amount: order.total,
                client_token: Some(token.clone()),
                created_at: now,
            })
            .await?;
            Some(token)
        }
        PaymentMethod::Cod => None,
    };

    tx.commit().await?;

    info!(
        "✅ Order {} created for {}: {} item(s), total {}",
        order.id,
        order.owner,
        items.len(),
        order.total
    );

    Ok(CreatedOrder {
        order,
        items,
        client_token,
    })
}

/// Checkout plus the post-commit steps: the `order.created` event, and for
/// cash on delivery the `Cod` status and supplier dispatch. Post-commit
/// failures are logged and never undo the order.
pub async fn place_order(
    store: &dyn Store,
    events: &dyn EventPublisher,
    checkout: &Checkout,
    settings: &Settings,
    now: DateTime<Utc>,
) -> Result<CheckoutResponse, AppError> {
    let created = create_order(store, checkout, settings, now).await?;
    let order = &created.order;

    publish_best_effort(events, "order.created", &OrderEvent::from_order("order.created", order)).await;

    let next = match checkout.payment_method {
        PaymentMethod::Card => "pay",
        PaymentMethod::Cod => {
            match store.update_order_status(order.id, OrderStatus::Cod.as_str(), now).await {
                Ok(_) => dispatch::notify_supplier(store, events, order.id).await,
                Err(e) => warn!("Failed to mark order {} as cash on delivery: {}", order.id, e),
            }
            "confirmation"
        }
    };

    Ok(CheckoutResponse {
        order_id: order.id,
        next,
        payment: checkout.payment_method,
        client_token: created.client_token,
        total: order.total,
    })
}

/// Groups the owner's live cart by supplier, priced from the catalog.
pub async fn supplier_quotes(
    store: &dyn Store,
    owner: &str,
    cart_ttl: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<SupplierQuote>, AppError> {
    let cutoff = now - cart_ttl;
    let lines: Vec<_> = store
        .cart_lines(owner)
        .await?
        .into_iter()
        .filter(|l| l.created_at >= cutoff)
        .collect();
    if lines.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = lines.iter().map(|l| l.menu_item_id).collect();
    let catalog: BTreeMap<i64, MenuItem> = store
        .menu_items(&ids)
        .await?
        .into_iter()
        .map(|item| (item.id, item))
        .collect();

    let mut items_total_by_supplier: BTreeMap<i64, i64> = BTreeMap::new();
    for line in &lines {
        if let Some(item) = catalog.get(&line.menu_item_id) {
            if let Some(supplier_id) = item.supplier_id {
                *items_total_by_supplier.entry(supplier_id).or_default() += item.price * i64::from(line.quantity);
            }
        }
    }

    let supplier_ids: Vec<i64> = items_total_by_supplier.keys().copied().collect();
    let suppliers = store.suppliers(&supplier_ids).await?;

    Ok(suppliers
        .into_iter()
        .map(|s| {
            let items_total = items_total_by_supplier.get(&s.id).copied().unwrap_or_default();
            SupplierQuote {
                id: s.id,
                eta: format!("{}-{} minutes", s.eta_min, s.eta_max),
                name: s.name,
                location: s.location,
                phone: s.phone,
                items_total,
                delivery_fee: s.delivery_fee,
                total: items_total + s.delivery_fee,
            }
        })
        .collect())
}
