use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::error::AppError;
use crate::models::{Order, OrderEvent, OrderStatus};
use crate::redis_pub::{publish_best_effort, EventPublisher};
use crate::store::Store;

const SWEEP_BATCH: i64 = 100;

pub fn start_order_expiration_worker(
    store: Arc<dyn Store>,
    events: Arc<dyn EventPublisher>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;

            match expire_orders(store.as_ref(), events.as_ref(), Utc::now(), SWEEP_BATCH).await {
                Ok(0) => {}
                Ok(n) => info!("⏰ Order expiration check cancelled {} order(s)", n),
                Err(e) => error!("Order expiration worker error: {}", e),
            }
        }
    })
}

/// Cancels `Pending` orders whose payment window has passed and puts their
/// items back in stock, all in one transaction. Returns how many were cancelled.
pub async fn expire_orders(
    store: &dyn Store,
    events: &dyn EventPublisher,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<usize, AppError> {
    let mut tx = store.begin().await?;
    let expired = tx.lock_expired_orders(now, limit).await?;
    if expired.is_empty() {
        return Ok(0);
    }

    let mut cancelled: Vec<Order> = Vec::with_capacity(expired.len());
    for mut order in expired {
        for item in tx.order_items(order.id).await? {
            // a positive delta only fails when the menu row is gone
            match tx.adjust_stock(item.menu_item_id, item.quantity).await {
                Ok(()) => {}
                Err(AppError::Conflict(_)) => warn!(
                    "Menu item {} of order {} no longer exists, skipping restock",
                    item.menu_item_id, order.id
                ),
                Err(e) => return Err(e),
            }
        }
        tx.set_order_status(order.id, OrderStatus::Cancelled.as_str(), now).await?;

        order.status = OrderStatus::Cancelled.as_str().to_string();
        order.updated_at = now;
        cancelled.push(order);
    }

    tx.commit().await?;

    for order in &cancelled {
        publish_best_effort(events, "order.expired", &OrderEvent::from_order("order.expired", order)).await;
    }

    Ok(cancelled.len())
}
