use log::{info, warn};

use crate::error::AppError;
use crate::models::SupplierDispatch;
use crate::redis_pub::{publish, EventPublisher};
use crate::store::Store;

pub const SUPPLIER_DISPATCH_CHANNEL: &str = "supplier.dispatch";

async fn build_dispatch(store: &dyn Store, order_id: i64) -> Result<SupplierDispatch, AppError> {
    let order = store
        .order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))?;
    let items = store.order_items(&[order_id]).await?;

    let supplier_name = match order.supplier_id {
        Some(id) => store.suppliers(&[id]).await?.into_iter().next().map(|s| s.name),
        None => None,
    };

    Ok(SupplierDispatch {
        order_id: order.id,
        supplier_id: order.supplier_id,
        supplier_name,
        status: order.status,
        payment_method: order.payment_method,
        total: order.total,
        delivery_address: order.delivery_address,
        items,
    })
}

/// Hands a settled order to its supplier. Never fails the caller: the order
/// is already committed and stays visible in the supplier's order list.
pub async fn notify_supplier(store: &dyn Store, events: &dyn EventPublisher, order_id: i64) {
    let result = match build_dispatch(store, order_id).await {
        Ok(dispatch) => publish(events, SUPPLIER_DISPATCH_CHANNEL, &dispatch).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => info!("📦 Order {} dispatched to supplier", order_id),
        Err(e) => warn!("⚠️ Supplier notification for order {} failed: {}", order_id, e),
    }
}
