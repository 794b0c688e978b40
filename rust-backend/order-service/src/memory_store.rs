//! In-process [`Store`] with the same transactional contract as Postgres.
//!
//! Every transaction works on a private copy of the whole state while holding
//! the state mutex, and writes it back on commit. Transactions are therefore
//! fully serialised, which is at least as strict as the row locks `PgStore`
//! takes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::AppError;
use crate::models::{
    CartLine, MenuItem, NewOrder, NewPayment, Order, OrderItem, Payment, PaymentResult, PricedLine,
    Supplier,
};
use crate::store::{Store, StoreTx};

#[derive(Debug, Clone, Default)]
struct State {
    suppliers: BTreeMap<i64, Supplier>,
    menu: BTreeMap<i64, MenuItem>,
    cart: Vec<CartLine>,
    orders: BTreeMap<i64, Order>,
    order_items: Vec<OrderItem>,
    payments: BTreeMap<i64, Payment>,
    last_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn menu_items(&self, ids: &[i64]) -> Vec<MenuItem> {
        self.menu
            .values()
            .filter(|item| ids.contains(&item.id))
            .cloned()
            .collect()
    }

    fn cart_lines(&self, owner: &str) -> Vec<CartLine> {
        self.cart.iter().filter(|l| l.owner == owner).cloned().collect()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_supplier(&self, supplier: Supplier) {
        let mut state = self.state.lock().await;
        state.last_id = state.last_id.max(supplier.id);
        state.suppliers.insert(supplier.id, supplier);
    }

    pub async fn insert_menu_item(&self, item: MenuItem) {
        let mut state = self.state.lock().await;
        state.last_id = state.last_id.max(item.id);
        state.menu.insert(item.id, item);
    }

    pub async fn menu_item(&self, id: i64) -> Option<MenuItem> {
        self.state.lock().await.menu.get(&id).cloned()
    }

    pub async fn set_menu_price(&self, id: i64, price: i64) {
        if let Some(item) = self.state.lock().await.menu.get_mut(&id) {
            item.price = price;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn menu_items(&self, ids: &[i64]) -> Result<Vec<MenuItem>, AppError> {
        Ok(self.state.lock().await.menu_items(ids))
    }

    async fn suppliers(&self, ids: &[i64]) -> Result<Vec<Supplier>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .suppliers
            .values()
            .filter(|s| ids.contains(&s.id))
            .cloned()
            .collect())
    }

    async fn cart_lines(&self, owner: &str) -> Result<Vec<CartLine>, AppError> {
        Ok(self.state.lock().await.cart_lines(owner))
    }

    async fn purge_cart_lines(&self, owner: &str, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let before = state.cart.len();
        state.cart.retain(|l| !(l.owner == owner && l.created_at < cutoff));
        Ok((before - state.cart.len()) as u64)
    }

    async fn merge_cart_line(
        &self,
        owner: &str,
        item: &MenuItem,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> Result<CartLine, AppError> {
        let mut state = self.state.lock().await;

        if let Some(line) = state
            .cart
            .iter_mut()
            .find(|l| l.owner == owner && l.menu_item_id == item.id)
        {
            line.quantity = line
                .quantity
                .checked_add(quantity)
                .ok_or_else(|| AppError::Validation(format!("quantity for item {} is too large", item.id)))?;
            line.name = item.name.clone();
            line.price = item.price;
            return Ok(line.clone());
        }

        let line = CartLine {
            id: state.next_id(),
            owner: owner.to_string(),
            menu_item_id: item.id,
            name: item.name.clone(),
            price: item.price,
            quantity,
            created_at: now,
        };
        state.cart.push(line.clone());
        Ok(line)
    }

    async fn set_cart_quantity(&self, owner: &str, item_ref: i64, quantity: i32) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let mut touched = 0;
        for line in state
            .cart
            .iter_mut()
            .filter(|l| l.owner == owner && l.menu_item_id == item_ref)
        {
            line.quantity = quantity;
            touched += 1;
        }
        Ok(touched)
    }

    async fn remove_cart_line(&self, owner: &str, item_ref: i64) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let before = state.cart.len();
        state.cart.retain(|l| !(l.owner == owner && l.menu_item_id == item_ref));
        Ok((before - state.cart.len()) as u64)
    }

    async fn clear_cart(&self, owner: &str) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let before = state.cart.len();
        state.cart.retain(|l| l.owner != owner);
        Ok((before - state.cart.len()) as u64)
    }

    async fn order(&self, id: i64) -> Result<Option<Order>, AppError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn recent_orders(&self, owner: Option<&str>, limit: i64) -> Result<Vec<Order>, AppError> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| owner.map_or(true, |owner| o.owner == owner))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders.truncate(limit.max(0) as usize);
        Ok(orders)
    }

    async fn order_items(&self, order_ids: &[i64]) -> Result<Vec<OrderItem>, AppError> {
        let state = self.state.lock().await;
        let mut items: Vec<OrderItem> = state
            .order_items
            .iter()
            .filter(|i| order_ids.contains(&i.order_id))
            .cloned()
            .collect();
        items.sort_by_key(|i| (i.order_id, i.id));
        Ok(items)
    }

    async fn payment(&self, order_id: i64) -> Result<Option<Payment>, AppError> {
        Ok(self.state.lock().await.payments.get(&order_id).cloned())
    }

    async fn update_order_status(
        &self,
        id: i64,
        status: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, AppError> {
        let mut state = self.state.lock().await;
        Ok(state.orders.get_mut(&id).map(|order| {
            order.status = status.to_string();
            order.updated_at = now;
            order.clone()
        }))
    }

    async fn delete_order(&self, id: i64) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        if state.orders.remove(&id).is_none() {
            return Ok(0);
        }
        state.order_items.retain(|i| i.order_id != id);
        state.payments.remove(&id);
        Ok(1)
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    work: State,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn cart_lines(&mut self, owner: &str) -> Result<Vec<CartLine>, AppError> {
        Ok(self.work.cart_lines(owner))
    }

    async fn lock_menu_items(&mut self, ids: &[i64]) -> Result<Vec<MenuItem>, AppError> {
        Ok(self.work.menu_items(ids))
    }

    async fn supplier(&mut self, id: i64) -> Result<Option<Supplier>, AppError> {
        Ok(self.work.suppliers.get(&id).cloned())
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order, AppError> {
        let created = Order {
            id: self.work.next_id(),
            owner: order.owner.clone(),
            supplier_id: order.supplier_id,
            status: order.status.as_str().to_string(),
            items_total: order.items_total,
            delivery_fee: order.delivery_fee,
            total: order.total,
            payment_method: order.payment_method.as_str().to_string(),
            delivery_address: order.delivery_address.clone(),
            created_at: order.created_at,
            updated_at: order.created_at,
            expires_at: order.expires_at,
        };
        self.work.orders.insert(created.id, created.clone());
        Ok(created)
    }

    async fn insert_order_item(&mut self, order_id: i64, line: &PricedLine) -> Result<OrderItem, AppError> {
        let item = OrderItem {
            id: self.work.next_id(),
            order_id,
            menu_item_id: line.menu_item_id,
            name: line.name.clone(),
            unit_price: line.unit_price,
            quantity: line.quantity,
            subtotal: line.subtotal,
        };
        self.work.order_items.push(item.clone());
        Ok(item)
    }

    async fn order_items(&mut self, order_id: i64) -> Result<Vec<OrderItem>, AppError> {
        Ok(self
            .work
            .order_items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn adjust_stock(&mut self, item_id: i64, delta: i32) -> Result<(), AppError> {
        match self.work.menu.get_mut(&item_id) {
            Some(item) if item.stock + delta >= 0 => {
                item.stock += delta;
                Ok(())
            }
            _ => Err(AppError::Conflict(format!("Stock for menu item {item_id} changed, please retry"))),
        }
    }

    async fn delete_cart_lines(&mut self, owner: &str, line_ids: &[i64]) -> Result<u64, AppError> {
        let before = self.work.cart.len();
        self.work
            .cart
            .retain(|l| !(l.owner == owner && (line_ids.is_empty() || line_ids.contains(&l.id))));
        Ok((before - self.work.cart.len()) as u64)
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<Payment, AppError> {
        if self.work.payments.contains_key(&payment.order_id) {
            return Err(AppError::Conflict(format!(
                "Payment for order {} already exists",
                payment.order_id
            )));
        }
        let created = Payment {
            id: self.work.next_id(),
            order_id: payment.order_id,
            provider: payment.provider.clone(),
            provider_ref: None,
            status: payment.status.clone(),
            amount: payment.amount,
            client_token: payment.client_token.clone(),
            raw_response: None,
            created_at: payment.created_at,
            updated_at: payment.created_at,
        };
        self.work.payments.insert(created.order_id, created.clone());
        Ok(created)
    }

    async fn record_payment_result(&mut self, order_id: i64, result: &PaymentResult) -> Result<(), AppError> {
        let id = self.work.next_id();
        let payment = self.work.payments.entry(order_id).or_insert_with(|| Payment {
            id,
            order_id,
            provider: "external".to_string(),
            provider_ref: None,
            status: String::new(),
            amount: result.amount,
            client_token: None,
            raw_response: None,
            created_at: result.at,
            updated_at: result.at,
        });
        if result.provider_ref.is_some() {
            payment.provider_ref = result.provider_ref.clone();
        }
        payment.status = result.status.clone();
        payment.raw_response = Some(result.raw.clone());
        payment.updated_at = result.at;
        Ok(())
    }

    async fn lock_order(&mut self, id: i64) -> Result<Option<Order>, AppError> {
        Ok(self.work.orders.get(&id).cloned())
    }

    async fn lock_expired_orders(&mut self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Order>, AppError> {
        Ok(self
            .work
            .orders
            .values()
            .filter(|o| o.status == "Pending" && o.expires_at < now)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn set_order_status(&mut self, id: i64, status: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(order) = self.work.orders.get_mut(&id) {
            order.status = status.to_string();
            order.updated_at = now;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
