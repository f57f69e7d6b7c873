//! HTTP request handlers for the dispatch controller.

pub mod health;
pub mod history;
pub mod metrics;

pub use health::health_check;
pub use history::{get_alert, get_transmission, list_alerts, list_transmissions};
pub use metrics::metrics_handler;
