//! Cart store: per-owner line items with merge-on-add and a read-triggered TTL.

use chrono::{DateTime, Duration, Utc};
use log::info;

use crate::error::AppError;
use crate::models::{CartLine, MenuItem};
use crate::store::Store;

pub struct CartStore<'a> {
    store: &'a dyn Store,
    ttl: Duration,
}

impl<'a> CartStore<'a> {
    pub fn new(store: &'a dyn Store, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn add_item(
        &self,
        owner: &str,
        item_ref: i64,
        quantity: i32,
        now: DateTime<Utc>,
    ) -> Result<CartLine, AppError> {
        let owner = validate_owner(owner)?;
        if quantity <= 0 {
            return Err(AppError::Validation("quantity must be at least 1".into()));
        }

        let item = self.catalog_item(item_ref).await?;
        if !item.available {
            return Err(AppError::Validation(format!("{} is not available", item.name)));
        }

        // An expired line must not absorb the new quantity and its old timestamp.
        self.purge_expired(owner, now).await?;
        self.store.merge_cart_line(owner, &item, quantity, now).await
    }

    /// Drops lines older than the TTL, then returns what is left in insertion order.
    pub async fn list_items(&self, owner: &str, now: DateTime<Utc>) -> Result<Vec<CartLine>, AppError> {
        let owner = validate_owner(owner)?;
        self.purge_expired(owner, now).await?;
        self.store.cart_lines(owner).await
    }

    async fn purge_expired(&self, owner: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let purged = self.store.purge_cart_lines(owner, now - self.ttl).await?;
        if purged > 0 {
            info!("🧹 Expired {} cart line(s) for {}", purged, owner);
        }
        Ok(())
    }

    pub async fn remove_item(&self, owner: &str, item_ref: i64) -> Result<(), AppError> {
        let owner = validate_owner(owner)?;
        self.store.remove_cart_line(owner, item_ref).await?;
        Ok(())
    }

    pub async fn clear(&self, owner: &str) -> Result<u64, AppError> {
        let owner = validate_owner(owner)?;
        self.store.clear_cart(owner).await
    }

    /// Quantity 0 removes the line. Setting a quantity on a line that does not exist is a not-found.
    pub async fn set_quantity(&self, owner: &str, item_ref: i64, quantity: i32) -> Result<(), AppError> {
        let owner = validate_owner(owner)?;
        if quantity < 0 {
            return Err(AppError::Validation("quantity cannot be negative".into()));
        }
        if quantity == 0 {
            return self.remove_item(owner, item_ref).await;
        }

        match self.store.set_cart_quantity(owner, item_ref, quantity).await? {
            0 => Err(AppError::NotFound(format!("Item {item_ref} is not in the cart"))),
            _ => Ok(()),
        }
    }

    async fn catalog_item(&self, item_ref: i64) -> Result<MenuItem, AppError> {
        self.store
            .menu_items(&[item_ref])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Validation(format!("Menu item {item_ref} does not exist")))
    }
}

pub(crate) fn validate_owner(owner: &str) -> Result<&str, AppError> {
    let owner = owner.trim();
    if owner.is_empty() {
        return Err(AppError::Validation("owner is required".into()));
    }
    Ok(owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    fn meal(id: i64, price: i64, stock: i32) -> MenuItem {
        MenuItem {
            id,
            name: format!("meal-{id}"),
            price,
            stock,
            supplier_id: None,
            available: true,
            category: None,
        }
    }

    async fn store_with(items: Vec<MenuItem>) -> MemoryStore {
        let store = MemoryStore::new();
        for item in items {
            store.insert_menu_item(item).await;
        }
        store
    }

    #[tokio::test]
    async fn repeat_add_merges_quantity() {
        let store = store_with(vec![meal(1, 1000, 10)]).await;
        let cart = CartStore::new(&store, Duration::hours(48));
        let now = Utc::now();

        cart.add_item("amina", 1, 2, now).await.unwrap();
        cart.add_item("amina", 1, 3, now).await.unwrap();

        let lines = cart.list_items("amina", now).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 5);
        assert_eq!(lines[0].price, 1000);
    }

    #[tokio::test]
    async fn rejects_bad_quantities_and_unknown_items() {
        let store = store_with(vec![meal(1, 1000, 10)]).await;
        let cart = CartStore::new(&store, Duration::hours(48));
        let now = Utc::now();

        assert!(matches!(cart.add_item("amina", 1, 0, now).await, Err(AppError::Validation(_))));
        assert!(matches!(cart.add_item("amina", 1, -4, now).await, Err(AppError::Validation(_))));
        assert!(matches!(cart.add_item("amina", 99, 1, now).await, Err(AppError::Validation(_))));
        assert!(matches!(cart.add_item("  ", 1, 1, now).await, Err(AppError::Validation(_))));
        assert!(cart.list_items("amina", now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_items_cannot_be_added() {
        let mut item = meal(1, 1000, 10);
        item.available = false;
        let store = store_with(vec![item]).await;
        let cart = CartStore::new(&store, Duration::hours(48));

        let err = cart.add_item("amina", 1, 1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn stale_lines_are_purged_on_read() {
        let store = store_with(vec![meal(1, 1000, 10), meal(2, 400, 10)]).await;
        let cart = CartStore::new(&store, Duration::hours(48));
        let now = Utc::now();

        cart.add_item("amina", 1, 1, now - Duration::hours(49)).await.unwrap();
        cart.add_item("amina", 2, 1, now - Duration::hours(47)).await.unwrap();

        let lines = cart.list_items("amina", now).await.unwrap();
        assert_eq!(lines.iter().map(|l| l.menu_item_id).collect::<Vec<_>>(), vec![2]);

        // physically gone, not just hidden
        let raw = store.cart_lines("amina").await.unwrap();
        assert_eq!(raw.len(), 1);
    }

    #[tokio::test]
    async fn fresh_add_replaces_expired_line() {
        let store = store_with(vec![meal(10, 500, 10)]).await;
        let cart = CartStore::new(&store, Duration::hours(48));
        let now = Utc::now();

        cart.add_item("amina", 10, 1, now - Duration::hours(49)).await.unwrap();
        let line = cart.add_item("amina", 10, 3, now).await.unwrap();
        assert_eq!(line.quantity, 3);
        assert_eq!(line.created_at, now);

        let lines = cart.list_items("amina", now).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 3);
    }

    #[tokio::test]
    async fn quantity_overflow_is_rejected() {
        let store = store_with(vec![meal(1, 100, 10)]).await;
        let cart = CartStore::new(&store, Duration::hours(48));
        let now = Utc::now();

        cart.add_item("amina", 1, i32::MAX, now).await.unwrap();
        let err = cart.add_item("amina", 1, 1, now).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(cart.list_items("amina", now).await.unwrap()[0].quantity, i32::MAX);
    }

    #[tokio::test]
    async fn lines_keep_insertion_order() {
        let store = store_with(vec![meal(3, 100, 5), meal(1, 100, 5), meal(2, 100, 5)]).await;
        let cart = CartStore::new(&store, Duration::hours(48));
        let now = Utc::now();

        for id in [3, 1, 2] {
            cart.add_item("amina", id, 1, now).await.unwrap();
        }
        cart.add_item("amina", 3, 1, now).await.unwrap();

        let ids: Vec<i64> = cart.list_items("amina", now).await.unwrap().iter().map(|l| l.menu_item_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn remove_and_clear_are_idempotent() {
        let store = store_with(vec![meal(1, 1000, 10), meal(2, 500, 10)]).await;
        let cart = CartStore::new(&store, Duration::hours(48));
        let now = Utc::now();
        cart.add_item("amina", 1, 1, now).await.unwrap();
        cart.add_item("amina", 2, 1, now).await.unwrap();

        cart.remove_item("amina", 1).await.unwrap();
        cart.remove_item("amina", 1).await.unwrap();
        assert_eq!(cart.list_items("amina", now).await.unwrap().len(), 1);

        assert_eq!(cart.clear("amina").await.unwrap(), 1);
        assert_eq!(cart.clear("amina").await.unwrap(), 0);
        assert!(cart.list_items("amina", now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_quantity_rules() {
        let store = store_with(vec![meal(1, 1000, 10)]).await;
        let cart = CartStore::new(&store, Duration::hours(48));
        let now = Utc::now();
        cart.add_item("amina", 1, 2, now).await.unwrap();

        cart.set_quantity("amina", 1, 7).await.unwrap();
        assert_eq!(cart.list_items("amina", now).await.unwrap()[0].quantity, 7);

        assert!(matches!(cart.set_quantity("amina", 1, -1).await, Err(AppError::Validation(_))));
        assert!(matches!(cart.set_quantity("amina", 42, 3).await, Err(AppError::NotFound(_))));

        cart.set_quantity("amina", 1, 0).await.unwrap();
        assert!(cart.list_items("amina", now).await.unwrap().is_empty());
        // zero on a missing line is still fine
        cart.set_quantity("amina", 1, 0).await.unwrap();
    }

    #[tokio::test]
    async fn carts_are_isolated_per_owner() {
        let store = store_with(vec![meal(1, 1000, 10)]).await;
        let cart = CartStore::new(&store, Duration::hours(48));
        let now = Utc::now();
        cart.add_item("amina", 1, 1, now).await.unwrap();
        cart.add_item("baraka", 1, 4, now).await.unwrap();

        cart.clear("amina").await.unwrap();
        let left = cart.list_items("baraka", now).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].quantity, 4);
    }
}
