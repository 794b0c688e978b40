use std::sync::Mutex;

use async_trait::async_trait;

use crate::checkout::Checkout;
use crate::error::AppError;
use crate::memory_store::MemoryStore;
use crate::models::{MenuItem, PaymentMethod, Supplier};
use crate::redis_pub::EventPublisher;

pub const SUPPLIER: i64 = 7;
pub const OTHER_SUPPLIER: i64 = 8;

/// Keeps every published message for inspection.
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingPublisher {
    pub fn channels(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn on(&self, channel: &str) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_json(&self, channel: &str, payload: &serde_json::Value) -> Result<(), AppError> {
        self.sent.lock().unwrap().push((channel.to_string(), payload.clone()));
        Ok(())
    }
}

/// Redis down.
pub struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish_json(&self, _channel: &str, _payload: &serde_json::Value) -> Result<(), AppError> {
        Err(AppError::ExternalService("connection refused".into()))
    }
}

pub fn meal(id: i64, price: i64, stock: i32, supplier_id: i64) -> MenuItem {
    MenuItem {
        id,
        name: format!("meal-{id}"),
        price,
        stock,
        supplier_id: Some(supplier_id),
        available: true,
        category: Some("mains".into()),
    }
}

/// Supplier 7 (fee 200) sells items 10 (500, stock 5) and 11 (300, stock 5);
/// supplier 8 sells item 20.
pub async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store
        .insert_supplier(Supplier {
            id: SUPPLIER,
            name: "Mama Ntilie".into(),
            location: Some("Kariakoo".into()),
            phone: Some("+255700000001".into()),
            delivery_fee: 200,
            eta_min: 20,
            eta_max: 40,
        })
        .await;
    store
        .insert_supplier(Supplier {
            id: OTHER_SUPPLIER,
            name: "Chips Corner".into(),
            location: None,
            phone: None,
            delivery_fee: 150,
            eta_min: 15,
            eta_max: 30,
        })
        .await;
    store.insert_menu_item(meal(10, 500, 5, SUPPLIER)).await;
    store.insert_menu_item(meal(11, 300, 5, SUPPLIER)).await;
    store.insert_menu_item(meal(20, 700, 5, OTHER_SUPPLIER)).await;
    store
}

pub fn from_cart(owner: &str, payment_method: PaymentMethod) -> Checkout {
    Checkout {
        owner: owner.to_string(),
        supplier_id: Some(SUPPLIER),
        payment_method,
        items: None,
        delivery_address: Some("Msasani, plot 12".into()),
    }
}
