use actix_web::{web, HttpResponse};

use crate::error::GatewayError;
use crate::metrics::BALANCE_LOOKUP_FAILURES;
use crate::oracle::BalanceOracle;
use crate::state::AppState;
use crate::validation::validate_account;

/// GET /balance/{address} - current ledger balance of an account
pub async fn get_balance(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let address = path.into_inner();
    validate_account(&address)?;

    let balance = state
        .dispatcher
        .oracle()
        .balance_of(&address)
        .await
        .inspect_err(|_| BALANCE_LOOKUP_FAILURES.inc())?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "address": address,
        "balance": balance,
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/balance/{address}", web::get().to(get_balance));
}
