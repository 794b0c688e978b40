//! Payment provider callbacks.
//!
//! `Pending`, `Failed` and `Cod` orders follow the provider outcome. `Paid`
//! never moves back, and statuses set later by the supplier are left alone.
//! The raw callback is always stored on the payment row. A successful charge
//! against an order that is already closed is stored too and reported on
//! `order.paid_after_cancel` so someone can refund it.

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::dispatch;
use crate::error::AppError;
use crate::models::{Order, OrderEvent, OrderStatus, PaymentResult, ProviderCallback};
use crate::redis_pub::{publish_best_effort, EventPublisher};
use crate::store::Store;

pub const PROVIDER_SUCCEEDED: &str = "succeeded";
pub const PAID_AFTER_CANCEL_CHANNEL: &str = "order.paid_after_cancel";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub order_id: i64,
    pub status: String,
    /// True when this callback moved the order into `Paid`.
    pub newly_paid: bool,
    /// True when the provider took the money but the order was already closed.
    pub paid_after_close: bool,
}

pub fn provider_outcome(provider_status: Option<&str>) -> OrderStatus {
    match provider_status.map(str::trim) {
        Some(s) if s.eq_ignore_ascii_case(PROVIDER_SUCCEEDED) => OrderStatus::Paid,
        _ => OrderStatus::Failed,
    }
}

/// The status an order ends up with after a callback reporting `outcome`.
pub fn next_status(current: &str, outcome: OrderStatus) -> Option<OrderStatus> {
    match OrderStatus::from_raw(current) {
        Some(OrderStatus::Pending | OrderStatus::Failed | OrderStatus::Cod) => Some(outcome),
        Some(OrderStatus::Paid) => Some(OrderStatus::Paid),
        _ => None,
    }
}

async fn reconcile(
    store: &dyn Store,
    order_id: i64,
    callback: &ProviderCallback,
    raw: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<(Order, CallbackOutcome), AppError> {
    let mut tx = store.begin().await?;

    let order = tx
        .lock_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))?;

    let outcome = provider_outcome(callback.status.as_deref());
    let target = next_status(&order.status, outcome);

    if let Some(target) = target {
        if target.as_str() != order.status {
            tx.set_order_status(order.id, target.as_str(), now).await?;
        }
    }

    tx.record_payment_result(
        order.id,
        &PaymentResult {
            status: callback.status.clone().unwrap_or_else(|| "unknown".into()),
            provider_ref: callback.provider_ref.clone(),
            raw,
            amount: order.total,
            at: now,
        },
    )
    .await?;

    tx.commit().await?;

    let status = target.map_or_else(|| order.status.clone(), |t| t.as_str().to_string());
    let newly_paid = target == Some(OrderStatus::Paid) && order.status != OrderStatus::Paid.as_str();
    let paid_after_close = target.is_none() && outcome == OrderStatus::Paid;

    Ok((
        order,
        CallbackOutcome {
            order_id,
            status,
            newly_paid,
            paid_after_close,
        },
    ))
}

/// Applies one provider callback. Duplicate callbacks are accepted and leave
/// the order where the first one put it.
pub async fn apply_provider_callback(
    store: &dyn Store,
    events: &dyn EventPublisher,
    callback: &ProviderCallback,
    raw: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<CallbackOutcome, AppError> {
    let order_id = callback
        .order_id
        .ok_or_else(|| AppError::Validation("orderId is required".into()))?;

    let (mut order, outcome) = reconcile(store, order_id, callback, raw, now).await?;

    info!(
        "💳 Payment callback for order {}: provider status {:?}, order status {}",
        order_id, callback.status, outcome.status
    );

    if order.status != outcome.status {
        order.status = outcome.status.clone();
        order.updated_at = now;
        let channel = if outcome.status == OrderStatus::Paid.as_str() {
            "order.paid"
        } else {
            "order.failed"
        };
        publish_best_effort(events, channel, &OrderEvent::from_order(channel, &order)).await;
    }

    if outcome.paid_after_close {
        warn!(
            "⚠️ Order {} was paid while {}, provider ref {:?} needs a refund",
            order_id, order.status, callback.provider_ref
        );
        publish_best_effort(
            events,
            PAID_AFTER_CANCEL_CHANNEL,
            &OrderEvent::from_order(PAID_AFTER_CANCEL_CHANNEL, &order),
        )
        .await;
    }

    if outcome.newly_paid {
        dispatch::notify_supplier(store, events, order_id).await;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_succeeded_means_paid() {
        assert_eq!(provider_outcome(Some("succeeded")), OrderStatus::Paid);
        assert_eq!(provider_outcome(Some("SUCCEEDED ")), OrderStatus::Paid);
        assert_eq!(provider_outcome(Some("requires_action")), OrderStatus::Failed);
        assert_eq!(provider_outcome(None), OrderStatus::Failed);
    }

    #[test]
    fn transitions() {
        assert_eq!(next_status("Pending", OrderStatus::Paid), Some(OrderStatus::Paid));
        assert_eq!(next_status("Pending", OrderStatus::Failed), Some(OrderStatus::Failed));
        assert_eq!(next_status("Failed", OrderStatus::Paid), Some(OrderStatus::Paid));
        assert_eq!(next_status("Cod", OrderStatus::Paid), Some(OrderStatus::Paid));
        // paid is terminal for payment
        assert_eq!(next_status("Paid", OrderStatus::Failed), Some(OrderStatus::Paid));
        assert_eq!(next_status("Paid", OrderStatus::Paid), Some(OrderStatus::Paid));
        // fulfilment statuses belong to the supplier
        assert_eq!(next_status("Completed", OrderStatus::Failed), None);
        assert_eq!(next_status("Cancelled", OrderStatus::Paid), None);
        assert_eq!(next_status("out for delivery", OrderStatus::Paid), None);
    }
}
