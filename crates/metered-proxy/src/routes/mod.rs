pub mod balance;
pub mod endpoints;
pub mod gateway;
pub mod health;

use actix_web::web;

/// Mount every route the proxy serves.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::configure)
        .configure(balance::configure)
        .configure(endpoints::configure)
        .configure(gateway::configure);
}
