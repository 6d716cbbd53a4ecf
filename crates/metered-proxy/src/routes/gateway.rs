use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::{GatewayError, ThrottleReason};
use crate::metrics::PROXY_REQUESTS_TOTAL;
use crate::proxy::{forward, upstream_url};
use crate::state::AppState;
use crate::validation::sanitize_path;

/// Metrics label for how a proxied request ended.
fn outcome_label(result: &Result<HttpResponse, GatewayError>) -> &'static str {
    match result {
        Ok(_) => "forwarded",
        Err(GatewayError::Throttled(ThrottleReason::RateLimited)) => "rate_limited",
        Err(GatewayError::Throttled(ThrottleReason::PaymentOverdue)) => "payment_overdue",
        Err(GatewayError::EndpointNotFound(_)) => "not_found",
        Err(GatewayError::InvalidPath(_)) => "invalid_path",
        Err(GatewayError::OracleUnavailable(_)) => "oracle_unavailable",
        Err(GatewayError::Upstream(_)) => "upstream_error",
        Err(GatewayError::UpstreamTimeout(_)) => "upstream_timeout",
        Err(_) => "error",
    }
}

/// Sessions are keyed by the caller's IP; the port changes per connection.
fn client_id(req: &HttpRequest) -> String {
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn do_proxy(
    req: &HttpRequest,
    state: &AppState,
    endpoint_id: &str,
    rest_path: &str,
    body: web::Bytes,
) -> Result<HttpResponse, GatewayError> {
    let rest_path = sanitize_path(rest_path)?;
    let client = client_id(req);

    let admission = state.dispatcher.admit(endpoint_id, &client).await?;

    let target = upstream_url(&admission.endpoint.url, &rest_path, Some(req.query_string()))?;
    tracing::debug!(
        client = %client,
        endpoint = %endpoint_id,
        session = %admission.session.id(),
        target = %target,
        "forwarding request"
    );

    forward(
        &state.http_client,
        req,
        &target,
        body,
        state.config.upstream_timeout,
    )
    .await
}

fn record(
    endpoint_id: &str,
    result: Result<HttpResponse, GatewayError>,
) -> Result<HttpResponse, GatewayError> {
    // Unknown ids all share one label.
    let label = match &result {
        Err(GatewayError::EndpointNotFound(_)) => "unknown",
        _ => endpoint_id,
    };
    PROXY_REQUESTS_TOTAL
        .with_label_values(&[label, outcome_label(&result)])
        .inc();
    result
}

/// ANY /endpoint/{id} - proxy to the endpoint's base URL
pub async fn proxy_root(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let endpoint_id = path.into_inner();
    let result = do_proxy(&req, &state, &endpoint_id, "", body).await;
    record(&endpoint_id, result)
}

/// ANY /endpoint/{id}/{path:.*} - proxy with a forwarded path
pub async fn proxy_with_path(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let (endpoint_id, rest_path) = path.into_inner();
    let result = do_proxy(&req, &state, &endpoint_id, &rest_path, body).await;
    record(&endpoint_id, result)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/endpoint/{id}", web::route().to(proxy_root))
        .route("/endpoint/{id}/{path:.*}", web::route().to(proxy_with_path));
}
