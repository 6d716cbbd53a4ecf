pub mod auth;
pub mod config;
pub mod dispatch;
pub mod endpoints;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod oracle;
pub mod payment;
pub mod proxy;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod validation;

pub use config::ProxyConfig;
pub use dispatch::Dispatcher;
pub use endpoints::{Endpoint, EndpointRegistry};
pub use error::GatewayError;
pub use oracle::{BalanceOracle, Oracle};
pub use state::AppState;
pub use store::Store;
