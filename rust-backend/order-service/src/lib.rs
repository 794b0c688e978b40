//! Order service for the meal marketplace.
//!
//! Customers fill a cart, check out against one supplier, and pay either on
//! delivery or by card through an external provider whose webhook settles the
//! order. Suppliers read and update their order queue over the same API.
//!
//! # Layout
//! - [`cart`]: per-owner cart lines with a 48h read-triggered TTL
//! - [`checkout`]: the order-creation transaction
//! - [`payments`]: provider callback reconciliation
//! - [`status`]: the three-bucket display status
//! - [`store`]: the storage seam, implemented by [`db::PgStore`] and [`memory_store::MemoryStore`]
//! - [`worker`]: expiry of unpaid orders
//!
//! # Setup
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/meals REDIS_URL=redis://127.0.0.1/ cargo run
//! ```

pub mod cart;
pub mod checkout;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod memory_store;
pub mod models;
pub mod payments;
pub mod redis_pub;
pub mod routes;
pub mod status;
pub mod store;
pub mod worker;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use log::info;

use crate::config::{Config, Settings};
use crate::redis_pub::{EventPublisher, RedisPublisher};
use crate::store::Store;

fn io_error(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

/// Registers shared state and every route on an actix `App`.
pub fn app_config(
    store: Arc<dyn Store>,
    events: Arc<dyn EventPublisher>,
    settings: Settings,
) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(web::Data::from(store))
            .app_data(web::Data::from(events))
            .app_data(web::Data::new(settings));
        routes::configure(cfg);
    }
}

pub async fn start_server(config: Config) -> std::io::Result<()> {
    let pool = db::connect(&config).await.map_err(io_error)?;
    let store: Arc<dyn Store> = Arc::new(db::PgStore::new(&pool));

    let publisher = match &config.redis_url {
        Some(url) => RedisPublisher::new(url).map_err(io_error)?,
        None => RedisPublisher::new_noop(),
    };
    if publisher.is_enabled() {
        info!("📡 Publishing order events to Redis");
    } else {
        info!("REDIS_URL not set, order events will not be published");
    }
    let events: Arc<dyn EventPublisher> = Arc::new(publisher);

    worker::start_order_expiration_worker(
        store.clone(),
        events.clone(),
        tokio::time::Duration::from_secs(config.order_expiry_sweep_secs.max(1)),
    );

    let settings = Settings::from_config(&config);
    let addr = config.address();
    info!("🚀 Order Service running at http://{}", addr);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .configure(app_config(store.clone(), events.clone(), settings))
            .default_service(web::route().to(routes::not_found))
    })
    .bind(addr)?
    .run()
    .await?;

    pool.close().await;
    Ok(())
}
