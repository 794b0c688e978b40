use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;
use crate::status::NormalizedStatus;

// -- catalog

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: i64,
    pub name: String,
    pub price: i64, // minor currency units
    pub stock: i32,
    pub supplier_id: Option<i64>,
    pub available: bool,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub id: i64,
    pub name: String,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub delivery_fee: i64,
    pub eta_min: i32,
    pub eta_max: i32,
}

// -- cart

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub id: i64,
    pub owner: String,
    #[serde(rename = "itemRef")]
    pub menu_item_id: i64,
    pub name: String,
    pub price: i64,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCartItemRequest {
    #[serde(alias = "username")]
    pub owner: Option<String>,
    #[serde(alias = "item_ref", alias = "meal_id")]
    pub item_ref: Option<i64>,
    pub quantity: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct SetQuantityRequest {
    pub quantity: Option<i32>,
}

// -- orders

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub owner: String,
    pub supplier_id: Option<i64>,
    pub status: String,
    pub items_total: i64,
    pub delivery_fee: i64,
    pub total: i64,
    pub payment_method: String,
    pub delivery_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub menu_item_id: i64,
    pub name: String,
    pub unit_price: i64,
    pub quantity: i32,
    pub subtotal: i64,
}

/// Row to insert at checkout; totals are computed server-side.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub owner: String,
    pub supplier_id: Option<i64>,
    pub status: OrderStatus,
    pub items_total: i64,
    pub delivery_fee: i64,
    pub total: i64,
    pub payment_method: PaymentMethod,
    pub delivery_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A line priced from the catalog inside the checkout transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub menu_item_id: i64,
    pub name: String,
    pub unit_price: i64,
    pub quantity: i32,
    pub subtotal: i64,
}

/// Raw status values written by this service. Suppliers may write others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Cod,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Paid => "Paid",
            OrderStatus::Failed => "Failed",
            OrderStatus::Cod => "Cod",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw {
            "Pending" => Some(OrderStatus::Pending),
            "Paid" => Some(OrderStatus::Paid),
            "Failed" => Some(OrderStatus::Failed),
            "Cod" => Some(OrderStatus::Cod),
            "Completed" => Some(OrderStatus::Completed),
            "Cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl From<NormalizedStatus> for OrderStatus {
    fn from(status: NormalizedStatus) -> Self {
        match status {
            NormalizedStatus::Pending => OrderStatus::Pending,
            NormalizedStatus::Completed => OrderStatus::Completed,
            NormalizedStatus::Cancelled => OrderStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cod,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cod => "cod",
            PaymentMethod::Card => "card",
        }
    }

    pub fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("cod") => Ok(PaymentMethod::Cod),
            Some("card") => Ok(PaymentMethod::Card),
            Some(other) => Err(AppError::Validation(format!("unsupported payment method: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedLine {
    #[serde(alias = "item_ref", alias = "meal_id", alias = "menuId")]
    pub item_ref: i64,
    pub quantity: i32,
    #[serde(default, alias = "cart_id", alias = "cartLineId")]
    pub cart_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(alias = "cartId", alias = "username")]
    pub owner: Option<String>,
    #[serde(default, alias = "supplier_id")]
    pub supplier_id: Option<i64>,
    #[serde(default, alias = "payment_method")]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub items: Option<Vec<RequestedLine>>,
    #[serde(default, alias = "delivery_address")]
    pub delivery_address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub order_id: i64,
    pub next: &'static str,
    pub payment: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    pub total: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplierQuote {
    pub id: i64,
    pub name: String,
    pub location: Option<String>,
    pub phone: Option<String>,
    pub eta: String,
    pub items_total: i64,
    pub delivery_fee: i64,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    #[serde(alias = "cartId", alias = "username")]
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatus {
    pub status: Option<String>,
}

/// What suppliers and the order list see.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: i64,
    pub customer: String,
    pub supplier_id: Option<i64>,
    pub items: Vec<OrderItem>,
    pub subtotal: i64,
    pub delivery_fee: i64,
    pub total_price: i64,
    pub payment_method: String,
    pub raw_status: String,
    pub status: NormalizedStatus,
    pub delivery_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderSummary {
    pub fn new(order: Order, items: Vec<OrderItem>) -> Self {
        let status = crate::status::normalize(Some(&order.status));
        Self {
            id: order.id,
            customer: order.owner,
            supplier_id: order.supplier_id,
            items,
            subtotal: order.items_total,
            delivery_fee: order.delivery_fee,
            total_price: order.total,
            payment_method: order.payment_method,
            raw_status: order.status,
            status,
            delivery_address: order.delivery_address,
            created_at: order.created_at,
        }
    }
}

// -- payments

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub status: String,
    pub amount: i64,
    pub client_token: Option<String>,
    pub raw_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: i64,
    pub provider: String,
    pub status: String,
    pub amount: i64,
    pub client_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Body posted by the payment provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCallback {
    #[serde(alias = "orderId")]
    pub order_id: Option<i64>,
    #[serde(default, alias = "providerRef")]
    pub provider_ref: Option<String>,
    pub status: Option<String>,
}

/// Provider outcome persisted on the payment row.
#[derive(Debug, Clone)]
pub struct PaymentResult {
    pub status: String,
    pub provider_ref: Option<String>,
    pub raw: serde_json::Value,
    pub amount: i64,
    pub at: DateTime<Utc>,
}

// -- events

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrderEvent {
    pub event_type: String,
    pub order_id: i64,
    pub owner: Option<String>,
    pub supplier_id: Option<i64>,
    pub status: Option<String>,
    pub total: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl OrderEvent {
    pub fn from_order(event_type: &str, order: &Order) -> Self {
        Self {
            event_type: event_type.to_string(),
            order_id: order.id,
            owner: Some(order.owner.clone()),
            supplier_id: order.supplier_id,
            status: Some(order.status.clone()),
            total: Some(order.total),
            timestamp: Some(order.updated_at),
        }
    }
}

/// Payload handed to a supplier when an order is ready to prepare.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplierDispatch {
    pub order_id: i64,
    pub supplier_id: Option<i64>,
    pub supplier_name: Option<String>,
    pub status: String,
    pub payment_method: String,
    pub total: i64,
    pub delivery_address: Option<String>,
    pub items: Vec<OrderItem>,
}
