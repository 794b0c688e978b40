use std::collections::BTreeMap;

use actix_web::{delete, error::InternalError, get, post, put, web, HttpRequest, HttpResponse};
use chrono::Utc;
use log::info;
use serde_json::json;

use crate::cart::{validate_owner, CartStore};
use crate::checkout::{place_order, supplier_quotes, Checkout};
use crate::config::Settings;
use crate::error::AppError;
use crate::models::{
    AddCartItemRequest, CreateOrderRequest, Order, OrderItem, OrderStatus, OrderSummary, OrdersQuery,
    ProviderCallback, QuoteQuery, SetQuantityRequest, UpdateOrderStatus,
};
use crate::payments::apply_provider_callback;
use crate::redis_pub::EventPublisher;
use crate::status::NormalizedStatus;
use crate::store::Store;

const OWNER_HISTORY_LIMIT: i64 = 10;
const SUPPLIER_QUEUE_LIMIT: i64 = 500;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        let message = format!("Invalid request body: {err}");
        InternalError::from_response(err, HttpResponse::BadRequest().json(json!({ "error": message }))).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        let message = format!("Invalid path: {err}");
        InternalError::from_response(err, HttpResponse::BadRequest().json(json!({ "error": message }))).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        let message = format!("Invalid query: {err}");
        InternalError::from_response(err, HttpResponse::BadRequest().json(json!({ "error": message }))).into()
    }))
    .service(add_to_cart)
    .service(get_cart)
    .service(remove_cart_item)
    .service(set_cart_quantity)
    .service(clear_cart)
    .service(create_checkout)
    .service(checkout_suppliers)
    .service(owner_orders)
    .service(latest_order)
    .service(payment_webhook)
    .service(payment_status)
    .service(list_orders)
    .service(get_order)
    .service(update_status)
    .service(delete_order);
}

async fn summaries(store: &dyn Store, orders: Vec<Order>) -> Result<Vec<OrderSummary>, AppError> {
    let ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
    let mut items_by_order: BTreeMap<i64, Vec<OrderItem>> = BTreeMap::new();
    for item in store.order_items(&ids).await? {
        items_by_order.entry(item.order_id).or_default().push(item);
    }

    Ok(orders
        .into_iter()
        .map(|order| {
            let items = items_by_order.remove(&order.id).unwrap_or_default();
            OrderSummary::new(order, items)
        })
        .collect())
}

// -- cart

#[post("/cart")]
pub async fn add_to_cart(
    store: web::Data<dyn Store>,
    settings: web::Data<Settings>,
    req: web::Json<AddCartItemRequest>,
) -> Result<HttpResponse, AppError> {
    let req = req.into_inner();
    let (Some(owner), Some(item_ref), Some(quantity)) = (req.owner, req.item_ref, req.quantity) else {
        return Err(AppError::Validation("owner, itemRef and quantity are required".into()));
    };

    let cart = CartStore::new(store.get_ref(), settings.cart_ttl);
    let now = Utc::now();
    cart.add_item(&owner, item_ref, quantity, now).await?;
    let lines = cart.list_items(&owner, now).await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Item added to cart",
        "cart": lines,
    })))
}

#[get("/cart/{owner}")]
pub async fn get_cart(
    store: web::Data<dyn Store>,
    settings: web::Data<Settings>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let cart = CartStore::new(store.get_ref(), settings.cart_ttl);
    let lines = cart.list_items(&path.into_inner(), Utc::now()).await?;
    Ok(HttpResponse::Ok().json(lines))
}

#[delete("/cart/item/{owner}/{item_ref}")]
pub async fn remove_cart_item(
    store: web::Data<dyn Store>,
    settings: web::Data<Settings>,
    path: web::Path<(String, i64)>,
) -> Result<HttpResponse, AppError> {
    let (owner, item_ref) = path.into_inner();
    let cart = CartStore::new(store.get_ref(), settings.cart_ttl);

    cart.remove_item(&owner, item_ref).await?;
    let lines = cart.list_items(&owner, Utc::now()).await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Item removed from cart",
        "cart": lines,
    })))
}

#[put("/cart/item/{owner}/{item_ref}")]
pub async fn set_cart_quantity(
    store: web::Data<dyn Store>,
    settings: web::Data<Settings>,
    path: web::Path<(String, i64)>,
    req: web::Json<SetQuantityRequest>,
) -> Result<HttpResponse, AppError> {
    let (owner, item_ref) = path.into_inner();
    let quantity = req
        .quantity
        .ok_or_else(|| AppError::Validation("quantity is required".into()))?;
    let cart = CartStore::new(store.get_ref(), settings.cart_ttl);

    cart.set_quantity(&owner, item_ref, quantity).await?;
    let lines = cart.list_items(&owner, Utc::now()).await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Cart updated",
        "cart": lines,
    })))
}

#[delete("/cart/{owner}")]
pub async fn clear_cart(
    store: web::Data<dyn Store>,
    settings: web::Data<Settings>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let cart = CartStore::new(store.get_ref(), settings.cart_ttl);
    let deleted = cart.clear(&path.into_inner()).await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Cart cleared",
        "deletedItems": deleted,
    })))
}

// -- checkout

#[post("/checkout/create")]
pub async fn create_checkout(
    store: web::Data<dyn Store>,
    events: web::Data<dyn EventPublisher>,
    settings: web::Data<Settings>,
    req: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, AppError> {
    let checkout = Checkout::try_from(req.into_inner())?;
    let response = place_order(
        store.get_ref(),
        events.get_ref(),
        &checkout,
        settings.get_ref(),
        Utc::now(),
    )
    .await?;

    Ok(HttpResponse::Created().json(response))
}

#[get("/checkout/suppliers")]
pub async fn checkout_suppliers(
    store: web::Data<dyn Store>,
    settings: web::Data<Settings>,
    query: web::Query<QuoteQuery>,
) -> Result<HttpResponse, AppError> {
    let owner = validate_owner(query.owner.as_deref().unwrap_or_default())?;
    let quotes = supplier_quotes(store.get_ref(), owner, settings.cart_ttl, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(quotes))
}

#[get("/checkout/orders/{owner}")]
pub async fn owner_orders(store: web::Data<dyn Store>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let owner = path.into_inner();
    let owner = validate_owner(&owner)?;
    let orders = store.recent_orders(Some(owner), OWNER_HISTORY_LIMIT).await?;
    Ok(HttpResponse::Ok().json(summaries(store.get_ref(), orders).await?))
}

#[get("/checkout/latest/{owner}")]
pub async fn latest_order(store: web::Data<dyn Store>, path: web::Path<String>) -> Result<HttpResponse, AppError> {
    let owner = path.into_inner();
    let owner = validate_owner(&owner)?;
    let orders = store.recent_orders(Some(owner), 1).await?;
    if orders.is_empty() {
        return Err(AppError::NotFound(format!("No orders found for {owner}")));
    }

    let mut summary = summaries(store.get_ref(), orders).await?;
    Ok(HttpResponse::Ok().json(summary.remove(0)))
}

// -- payments

#[post("/payments/webhook")]
pub async fn payment_webhook(
    store: web::Data<dyn Store>,
    events: web::Data<dyn EventPublisher>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let raw = body.into_inner();
    let callback: ProviderCallback = serde_json::from_value(raw.clone())
        .map_err(|e| AppError::Validation(format!("Invalid webhook payload: {e}")))?;

    apply_provider_callback(store.get_ref(), events.get_ref(), &callback, raw, Utc::now()).await?;

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

/// Lets the client poll for the provider outcome after a card checkout.
#[get("/payments/{order_id}")]
pub async fn payment_status(store: web::Data<dyn Store>, path: web::Path<i64>) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let order = store
        .order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;
    let payment = store
        .payment(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Order {order_id} has no card payment")))?;

    Ok(HttpResponse::Ok().json(json!({
        "orderId": order.id,
        "orderStatus": order.status,
        "paymentStatus": payment.status,
        "provider": payment.provider,
        "providerRef": payment.provider_ref,
        "amount": payment.amount,
        "updatedAt": payment.updated_at,
    })))
}

// -- supplier order queue

#[get("/orders")]
pub async fn list_orders(
    store: web::Data<dyn Store>,
    query: web::Query<OrdersQuery>,
) -> Result<HttpResponse, AppError> {
    let filter = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("all"));

    let orders = store.recent_orders(None, SUPPLIER_QUEUE_LIMIT).await?;
    let mut queue = summaries(store.get_ref(), orders).await?;
    if let Some(filter) = filter {
        queue.retain(|s| s.status.as_str().eq_ignore_ascii_case(filter));
    }

    Ok(HttpResponse::Ok().json(queue))
}

#[get("/orders/{id}")]
pub async fn get_order(store: web::Data<dyn Store>, path: web::Path<i64>) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let order = store
        .order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;

    let mut summary = summaries(store.get_ref(), vec![order]).await?;
    Ok(HttpResponse::Ok().json(summary.remove(0)))
}

#[put("/orders/{id}/status")]
pub async fn update_status(
    store: web::Data<dyn Store>,
    path: web::Path<i64>,
    req: web::Json<UpdateOrderStatus>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let status: NormalizedStatus = req
        .status
        .as_deref()
        .ok_or_else(|| AppError::Validation("status is required".into()))?
        .parse()?;

    let order = store
        .update_order_status(order_id, OrderStatus::from(status).as_str(), Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;

    info!("Order {} set to {} by supplier", order.id, order.status);

    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "id": order.id,
        "status": status,
    })))
}

#[delete("/orders/{id}")]
pub async fn delete_order(store: web::Data<dyn Store>, path: web::Path<i64>) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    match store.delete_order(order_id).await? {
        0 => Err(AppError::NotFound("Order not found".into())),
        _ => Ok(HttpResponse::Ok().json(json!({ "message": "Order deleted successfully" }))),
    }
}

pub async fn not_found(req: HttpRequest) -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "error": format!("No route for {} {}", req.method(), req.path()) }))
}
