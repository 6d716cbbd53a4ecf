use actix_web::body::SizedStream;
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse};
use bytes::Bytes;
use futures::TryStreamExt;
use std::borrow::Cow;
use std::time::{Duration, Instant};

use crate::error::GatewayError;
use crate::metrics::UPSTREAM_LATENCY;
use crate::validation::sanitize_query;

/// Hop-by-hop headers never cross the proxy, in either direction.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request headers dropped on top of the hop-by-hop set. The upstream host is
/// taken from the target URL and the length is recomputed from the body.
const REQUEST_HEADERS_TO_STRIP: &[&str] = &["host", "content-length", "x-forwarded-for"];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name)
}

/// Re-encode the delimiters the router decoded out of the forwarded path.
///
/// The router leaves `%25`, `%2F` and `%2B` encoded, so any `%` still present
/// already starts an escape and is kept as is.
fn escape_path(path: &str) -> Cow<'_, str> {
    if !path.contains(['?', '#']) {
        return Cow::Borrowed(path);
    }
    Cow::Owned(path.replace('?', "%3F").replace('#', "%23"))
}

/// Join the endpoint's base URL, the forwarded path and the original query.
pub fn upstream_url(
    base_url: &str,
    forward_path: &str,
    query: Option<&str>,
) -> Result<String, GatewayError> {
    let mut url = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        escape_path(forward_path.trim_start_matches('/'))
    );
    if let Some(query) = query {
        let query = sanitize_query(query)?;
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
    }
    Ok(url)
}

/// Value for the upstream `X-Forwarded-For`: any incoming chain plus the peer address.
fn forwarded_for(req: &HttpRequest) -> Option<String> {
    let peer = req.peer_addr().map(|addr| addr.ip().to_string());
    let prior = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    match (prior, peer) {
        (Some(prior), Some(peer)) => Some(format!("{prior}, {peer}")),
        (Some(prior), None) => Some(prior.to_string()),
        (None, peer) => peer,
    }
}

fn map_send_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::UpstreamTimeout(e.to_string())
    } else {
        GatewayError::Upstream(e.to_string())
    }
}

/// Forward `original_req` to `target_url` and stream the upstream response back.
///
/// `timeout` bounds the wait for the response head; the body is streamed
/// without a deadline.
pub async fn forward(
    client: &reqwest::Client,
    original_req: &HttpRequest,
    target_url: &str,
    body: Bytes,
    timeout: Duration,
) -> Result<HttpResponse, GatewayError> {
    let method = reqwest::Method::from_bytes(original_req.method().as_str().as_bytes())
        .map_err(|_| GatewayError::InvalidPath("unsupported HTTP method".to_string()))?;

    let mut request_builder = client.request(method.clone(), target_url);

    for (name, value) in original_req.headers() {
        let name = name.as_str();
        if is_hop_by_hop(name) || REQUEST_HEADERS_TO_STRIP.contains(&name) {
            continue;
        }
        request_builder = request_builder.header(name, value.as_bytes());
    }
    if let Some(chain) = forwarded_for(original_req) {
        request_builder = request_builder.header("x-forwarded-for", chain);
    }
    if !body.is_empty() {
        request_builder = request_builder.body(body);
    }

    let started = Instant::now();
    let response = tokio::time::timeout(timeout, request_builder.send())
        .await
        .map_err(|_| {
            GatewayError::UpstreamTimeout(format!(
                "no response from {} within {:?}",
                target_url, timeout
            ))
        })?
        .map_err(map_send_error)?;
    UPSTREAM_LATENCY.observe(started.elapsed().as_secs_f64());

    let status = StatusCode::from_u16(response.status().as_u16())
        .map_err(|e| GatewayError::Upstream(format!("invalid upstream status: {e}")))?;
    let mut builder = HttpResponse::build(status);

    for (name, value) in response.headers() {
        let name = name.as_str();
        if is_hop_by_hop(name) || name == "content-length" {
            continue;
        }
        builder.append_header((name, value.as_bytes()));
    }

    let content_length = response.content_length();
    let upstream = target_url.to_string();
    let stream = response.bytes_stream().map_err(move |e| {
        tracing::warn!(upstream = %upstream, error = %e, "upstream body stream failed");
        e
    });

    let bodyless = method == reqwest::Method::HEAD
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;

    Ok(match content_length {
        Some(len) if !bodyless => builder.body(SizedStream::new(len, stream)),
        _ => builder.streaming(stream),
    })
}
