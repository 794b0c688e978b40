// Background jobs spawned next to the HTTP server.

pub mod order_expiration_worker;

pub use order_expiration_worker::{expire_orders, start_order_expiration_worker};
