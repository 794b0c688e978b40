use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::config::Config;
use crate::error::AppError;
use crate::models::{
    CartLine, MenuItem, NewOrder, NewPayment, Order, OrderItem, Payment, PaymentResult, PricedLine,
    Supplier,
};
use crate::store::{Store, StoreTx};

pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

const MENU_COLUMNS: &str = "id, name, price, stock, supplier_id, available, category";
const ORDER_COLUMNS: &str = "id, owner, supplier_id, status, items_total, delivery_fee, total, payment_method, delivery_address, created_at, updated_at, expires_at";
/// SQLSTATE raised when the merged quantity no longer fits the INT column.
const NUMERIC_OUT_OF_RANGE: &str = "22003";
const PAYMENT_COLUMNS: &str = "id, order_id, provider, provider_ref, status, amount, client_token, raw_response, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: &PgPool) -> Self {
        Self { pool: pool.clone() }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn menu_items(&self, ids: &[i64]) -> Result<Vec<MenuItem>, AppError> {
        let items = sqlx::query_as::<_, MenuItem>(&format!(
            "SELECT {MENU_COLUMNS} FROM menu WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn suppliers(&self, ids: &[i64]) -> Result<Vec<Supplier>, AppError> {
        let suppliers = sqlx::query_as::<_, Supplier>(
            r#"
                SELECT id, name, location, phone, delivery_fee, eta_min, eta_max
                FROM suppliers
                WHERE id = ANY($1)
                ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(suppliers)
    }

    async fn cart_lines(&self, owner: &str) -> Result<Vec<CartLine>, AppError> {
        let lines = sqlx::query_as::<_, CartLine>(
            r#"
                SELECT id, owner, menu_item_id, name, price, quantity, created_at
                FROM cart
                WHERE owner = $1
                ORDER BY id
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    async fn purge_cart_lines(&self, owner: &str, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM cart WHERE owner = $1 AND created_at < $2")
            .bind(owner)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn merge_cart_line(
        &self,
        owner: &str,
        item: &MenuItem,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> Result<CartLine, AppError> {
        // created_at is kept from the first add so the TTL runs from then
        let line = sqlx::query_as::<_, CartLine>(
            r#"
                INSERT INTO cart (owner, menu_item_id, name, price, quantity, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (owner, menu_item_id)
                DO UPDATE SET
                    quantity = cart.quantity + EXCLUDED.quantity,
                    name = EXCLUDED.name,
                    price = EXCLUDED.price
                RETURNING id, owner, menu_item_id, name, price, quantity, created_at
            "#,
        )
        .bind(owner)
        .bind(item.id)
        .bind(&item.name)
        .bind(item.price)
        .bind(quantity)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some(NUMERIC_OUT_OF_RANGE) => {
                AppError::Validation(format!("quantity for item {} is too large", item.id))
            }
            e => e.into(),
        })?;

        Ok(line)
    }

    async fn set_cart_quantity(&self, owner: &str, item_ref: i64, quantity: i32) -> Result<u64, AppError> {
        let result = sqlx::query("UPDATE cart SET quantity = $1 WHERE owner = $2 AND menu_item_id = $3")
            .bind(quantity)
            .bind(owner)
            .bind(item_ref)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn remove_cart_line(&self, owner: &str, item_ref: i64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM cart WHERE owner = $1 AND menu_item_id = $2")
            .bind(owner)
            .bind(item_ref)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn clear_cart(&self, owner: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM cart WHERE owner = $1")
            .bind(owner)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn order(&self, id: i64) -> Result<Option<Order>, AppError> {
        let order = sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(order)
    }

    async fn recent_orders(&self, owner: Option<&str>, limit: i64) -> Result<Vec<Order>, AppError> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            r#"
                SELECT {ORDER_COLUMNS}
                FROM orders
                WHERE ($1::text IS NULL OR owner = $1)
                ORDER BY created_at DESC, id DESC
                LIMIT $2
            "#
        ))
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    async fn order_items(&self, order_ids: &[i64]) -> Result<Vec<OrderItem>, AppError> {
        let items = sqlx::query_as::<_, OrderItem>(
            r#"
                SELECT id, order_id, menu_item_id, name, unit_price, quantity, subtotal
                FROM order_items
                WHERE order_id = ANY($1)
                ORDER BY order_id, id
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn payment(&self, order_id: i64) -> Result<Option<Payment>, AppError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    async fn update_order_status(
        &self,
        id: i64,
        status: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, AppError> {
        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
                UPDATE orders
                SET status = $1, updated_at = $2
                WHERE id = $3
                RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(status)
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn delete_order(&self, id: i64) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn cart_lines(&mut self, owner: &str) -> Result<Vec<CartLine>, AppError> {
        let lines = sqlx::query_as::<_, CartLine>(
            r#"
                SELECT id, owner, menu_item_id, name, price, quantity, created_at
                FROM cart
                WHERE owner = $1
                ORDER BY id
                FOR UPDATE
            "#,
        )
        .bind(owner)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(lines)
    }

    async fn lock_menu_items(&mut self, ids: &[i64]) -> Result<Vec<MenuItem>, AppError> {
        // fixed lock order keeps two overlapping checkouts from deadlocking
        let items = sqlx::query_as::<_, MenuItem>(&format!(
            "SELECT {MENU_COLUMNS} FROM menu WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        ))
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(items)
    }

    async fn supplier(&mut self, id: i64) -> Result<Option<Supplier>, AppError> {
        let supplier = sqlx::query_as::<_, Supplier>(
            r#"
                SELECT id, name, location, phone, delivery_fee, eta_min, eta_max
                FROM suppliers
                WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(supplier)
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order, AppError> {
        let created = sqlx::query_as::<_, Order>(&format!(
            r#"
                INSERT INTO orders
                    (owner, supplier_id, status, items_total, delivery_fee, total,
                     payment_method, delivery_address, created_at, updated_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9, $10)
                RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(&order.owner)
        .bind(order.supplier_id)
        .bind(order.status.as_str())
        .bind(order.items_total)
        .bind(order.delivery_fee)
        .bind(order.total)
        .bind(order.payment_method.as_str())
        .bind(order.delivery_address.as_deref())
        .bind(order.created_at)
        .bind(order.expires_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(created)
    }

    async fn insert_order_item(&mut self, order_id: i64, line: &PricedLine) -> Result<OrderItem, AppError> {
        let item = sqlx::query_as::<_, OrderItem>(
            r#"
                INSERT INTO order_items (order_id, menu_item_id, name, unit_price, quantity, subtotal)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id, order_id, menu_item_id, name, unit_price, quantity, subtotal
            "#,
        )
        .bind(order_id)
        .bind(line.menu_item_id)
        .bind(&line.name)
        .bind(line.unit_price)
        .bind(line.quantity)
        .bind(line.subtotal)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(item)
    }

    async fn order_items(&mut self, order_id: i64) -> Result<Vec<OrderItem>, AppError> {
        let items = sqlx::query_as::<_, OrderItem>(
            r#"
                SELECT id, order_id, menu_item_id, name, unit_price, quantity, subtotal
                FROM order_items
                WHERE order_id = $1
                ORDER BY id
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(items)
    }

    async fn adjust_stock(&mut self, item_id: i64, delta: i32) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
                UPDATE menu
                SET stock = stock + $1
                WHERE id = $2 AND stock + $1 >= 0
            "#,
        )
        .bind(delta)
        .bind(item_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!("Stock for menu item {item_id} changed, please retry")));
        }
        Ok(())
    }

    async fn delete_cart_lines(&mut self, owner: &str, line_ids: &[i64]) -> Result<u64, AppError> {
        let result = if line_ids.is_empty() {
            sqlx::query("DELETE FROM cart WHERE owner = $1")
                .bind(owner)
                .execute(&mut *self.tx)
                .await?
        } else {
            sqlx::query("DELETE FROM cart WHERE owner = $1 AND id = ANY($2)")
                .bind(owner)
                .bind(line_ids)
                .execute(&mut *self.tx)
                .await?
        };

        Ok(result.rows_affected())
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, AppError> {
        let created = sqlx::query_as::<_, Payment>(&format!(
            r#"
                INSERT INTO payments (order_id, provider, status, amount, client_token, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $6)
                RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.order_id)
        .bind(&payment.provider)
        .bind(&payment.status)
        .bind(payment.amount)
        .bind(payment.client_token.as_deref())
        .bind(payment.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(created)
    }

    async fn record_payment_result(&mut self, order_id: i64, result: &PaymentResult) -> Result<(), AppError> {
        sqlx::query(
            r#"
                INSERT INTO payments (order_id, provider, provider_ref, status, amount, raw_response, created_at, updated_at)
                VALUES ($1, 'external', $2, $3, $4, $5, $6, $6)
                ON CONFLICT (order_id)
                DO UPDATE SET
                    provider_ref = COALESCE(EXCLUDED.provider_ref, payments.provider_ref),
                    status = EXCLUDED.status,
                    raw_response = EXCLUDED.raw_response,
                    updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(order_id)
        .bind(result.provider_ref.as_deref())
        .bind(&result.status)
        .bind(result.amount)
        .bind(Json(&result.raw))
        .bind(result.at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn lock_order(&mut self, id: i64) -> Result<Option<Order>, AppError> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(order)
    }

    async fn lock_expired_orders(&mut self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Order>, AppError> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            r#"
                SELECT {ORDER_COLUMNS}
                FROM orders
                WHERE status = 'Pending' AND expires_at < $1
                ORDER BY id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(orders)
    }

    async fn set_order_status(&mut self, id: i64, status: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE orders SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(status)
            .bind(now)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}
