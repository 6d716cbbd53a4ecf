use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::auth::bearer_matches;
use crate::endpoints::Endpoint;
use crate::error::GatewayError;
use crate::state::AppState;

/// Body of `PUT /endpoints/{id}`; the id comes from the path.
#[derive(Debug, Deserialize)]
pub struct EndpointUpdate {
    pub url: String,
    pub address: String,
}

/// GET /endpoints - List all registered endpoints
pub async fn list_endpoints(state: web::Data<AppState>) -> Result<HttpResponse, GatewayError> {
    let endpoints = state.dispatcher.endpoints().list()?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "count": endpoints.len(),
        "endpoints": endpoints,
    })))
}

/// GET /endpoints/{id} - Get endpoint details
pub async fn get_endpoint(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let id = path.into_inner();
    let endpoint = state.dispatcher.endpoints().lookup(&id)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "id": endpoint.id,
        "url": endpoint.url,
        "address": endpoint.address,
        "proxy_url": format!("/endpoint/{}", endpoint.id),
    })))
}

/// PUT /endpoints/{id} - Create or replace an endpoint (admin token required)
pub async fn put_endpoint(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<EndpointUpdate>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    // Writes stay closed until an admin token is configured.
    let authorized = state
        .config
        .admin_token
        .as_deref()
        .is_some_and(|token| bearer_matches(&req, token));
    if !authorized {
        return Err(GatewayError::Unauthorized);
    }

    let update = body.into_inner();
    let endpoint = Endpoint::new(path.into_inner(), update.url, update.address);
    state.dispatcher.endpoints().register(&endpoint)?;

    tracing::info!(endpoint = %endpoint.id, url = %endpoint.url, "endpoint registered");

    Ok(HttpResponse::Ok().json(endpoint))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/endpoints", web::get().to(list_endpoints))
        .route("/endpoints/{id}", web::get().to(get_endpoint))
        .route("/endpoints/{id}", web::put().to(put_endpoint));
}
