use std::sync::Arc;
use std::time::Duration;

use crate::config::ProxyConfig;
use crate::dispatch::Dispatcher;
use crate::endpoints::EndpointRegistry;
use crate::oracle::Oracle;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client shared by the forwarder and the balance oracle.
///
/// Redirects are passed back to the caller untouched rather than followed.
/// There is no overall request timeout because response bodies are streamed;
/// callers bound the wait for the response head themselves.
pub fn build_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub dispatcher: Arc<Dispatcher<Oracle>>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: ProxyConfig,
        endpoints: EndpointRegistry,
        oracle: Oracle,
        http_client: reqwest::Client,
    ) -> Self {
        let dispatcher = Dispatcher::new(endpoints, Arc::new(oracle), config.meter.clone());
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            http_client,
        }
    }
}
