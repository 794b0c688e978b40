//! Storage seam.
//!
//! [`Store`] covers single-statement reads and writes. Anything that touches
//! more than one row atomically goes through [`StoreTx`], obtained from
//! [`Store::begin`]. A transaction that is dropped without [`StoreTx::commit`]
//! is rolled back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{
    CartLine, MenuItem, NewOrder, NewPayment, Order, OrderItem, Payment, PaymentResult, PricedLine,
    Supplier,
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn menu_items(&self, ids: &[i64]) -> Result<Vec<MenuItem>, AppError>;
    async fn suppliers(&self, ids: &[i64]) -> Result<Vec<Supplier>, AppError>;

    /// Lines for `owner` in insertion order.
    async fn cart_lines(&self, owner: &str) -> Result<Vec<CartLine>, AppError>;
    /// Deletes lines created strictly before `cutoff`.
    async fn purge_cart_lines(&self, owner: &str, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
    /// Inserts a line, or adds `quantity` to the existing (owner, item) line.
    async fn merge_cart_line(
        &self,
        owner: &str,
        item: &MenuItem,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> Result<CartLine, AppError>;
    async fn set_cart_quantity(&self, owner: &str, item_ref: i64, quantity: i32) -> Result<u64, AppError>;
    async fn remove_cart_line(&self, owner: &str, item_ref: i64) -> Result<u64, AppError>;
    async fn clear_cart(&self, owner: &str) -> Result<u64, AppError>;

    async fn order(&self, id: i64) -> Result<Option<Order>, AppError>;
    /// Newest first, optionally restricted to one owner.
    async fn recent_orders(&self, owner: Option<&str>, limit: i64) -> Result<Vec<Order>, AppError>;
    async fn order_items(&self, order_ids: &[i64]) -> Result<Vec<OrderItem>, AppError>;
    async fn payment(&self, order_id: i64) -> Result<Option<Payment>, AppError>;
    async fn update_order_status(
        &self,
        id: i64,
        status: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, AppError>;
    async fn delete_order(&self, id: i64) -> Result<u64, AppError>;

    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn cart_lines(&mut self, owner: &str) -> Result<Vec<CartLine>, AppError>;
    /// Reads and row-locks the given menu items until commit, in id order.
    async fn lock_menu_items(&mut self, ids: &[i64]) -> Result<Vec<MenuItem>, AppError>;
    async fn supplier(&mut self, id: i64) -> Result<Option<Supplier>, AppError>;

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order, AppError>;
    async fn insert_order_item(&mut self, order_id: i64, line: &PricedLine) -> Result<OrderItem, AppError>;
    async fn order_items(&mut self, order_id: i64) -> Result<Vec<OrderItem>, AppError>;
    /// Adds `delta` to the item's stock. Fails with a conflict rather than go below zero.
    async fn adjust_stock(&mut self, item_id: i64, delta: i32) -> Result<(), AppError>;
    /// Deletes the listed cart lines of `owner`, or all of them when `line_ids` is empty.
    async fn delete_cart_lines(&mut self, owner: &str, line_ids: &[i64]) -> Result<u64, AppError>;

    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, AppError>;
    /// Upserts the provider outcome onto the order's payment row.
    async fn record_payment_result(&mut self, order_id: i64, result: &PaymentResult) -> Result<(), AppError>;

    async fn lock_order(&mut self, id: i64) -> Result<Option<Order>, AppError>;
    /// `Pending` orders past `expires_at`; rows already locked elsewhere are skipped.
    async fn lock_expired_orders(&mut self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Order>, AppError>;
    async fn set_order_status(&mut self, id: i64, status: &str, now: DateTime<Utc>) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}
