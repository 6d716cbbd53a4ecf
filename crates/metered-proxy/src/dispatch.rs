//! Per-request admission: endpoint resolution, session lookup, payment check
//! and rate limiting. Forwarding itself lives in [`crate::proxy`].

use std::sync::Arc;

use crate::config::MeterSettings;
use crate::endpoints::{Endpoint, EndpointRegistry};
use crate::error::{GatewayError, ThrottleReason};
use crate::metrics::BALANCE_LOOKUP_FAILURES;
use crate::oracle::{BalanceOracle, OracleError};
use crate::payment::{self, Ledger};
use crate::session::{Session, SessionRegistry};

/// A request that passed every check and may be forwarded.
#[derive(Debug)]
pub struct Admission {
    pub endpoint: Endpoint,
    pub session: Arc<Session>,
    /// Debt counters right after this request was charged.
    pub ledger: Ledger,
}

/// Decides whether a client's request to an endpoint may go upstream.
pub struct Dispatcher<O> {
    endpoints: EndpointRegistry,
    sessions: Arc<SessionRegistry>,
    oracle: Arc<O>,
    settings: MeterSettings,
}

fn oracle_failed(e: OracleError) -> GatewayError {
    BALANCE_LOOKUP_FAILURES.inc();
    GatewayError::OracleUnavailable(e)
}

impl<O: BalanceOracle> Dispatcher<O> {
    pub fn new(endpoints: EndpointRegistry, oracle: Arc<O>, settings: MeterSettings) -> Self {
        let sessions = Arc::new(SessionRegistry::new(settings.bucket, settings.sessions));
        Self {
            endpoints,
            sessions,
            oracle,
            settings,
        }
    }

    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn settings(&self) -> &MeterSettings {
        &self.settings
    }

    /// Run the metering pipeline for one request from `client_id` to `endpoint_id`.
    ///
    /// Debt is charged before the rate limiter is polled, so requests the
    /// limiter rejects still count, unless `charge_throttled` is off. Counters
    /// are never rolled back on rejection.
    pub async fn admit(
        &self,
        endpoint_id: &str,
        client_id: &str,
    ) -> Result<Admission, GatewayError> {
        let endpoint = self.endpoints.lookup(endpoint_id)?;

        let session = self
            .sessions
            .get_or_create(
                client_id,
                &self.settings.consumer_account,
                &endpoint.address,
                self.oracle.as_ref(),
            )
            .await
            .map_err(oracle_failed)?;

        let mut ledger = session.lock_ledger().await;

        let (paid_up, allowed) = if self.settings.charge_throttled {
            let paid_up = payment::validate(
                self.oracle.as_ref(),
                session.consumer(),
                &mut ledger,
                &self.settings.payment,
            )
            .await
            .map_err(oracle_failed)?;
            (paid_up, session.allow())
        } else {
            if !session.allow() {
                return Err(GatewayError::Throttled(ThrottleReason::RateLimited));
            }
            let paid_up = payment::validate(
                self.oracle.as_ref(),
                session.consumer(),
                &mut ledger,
                &self.settings.payment,
            )
            .await
            .map_err(oracle_failed)?;
            (paid_up, true)
        };

        if !paid_up {
            tracing::info!(
                client = %client_id,
                endpoint = %endpoint.id,
                expected = ledger.expected_value,
                paid = ledger.paid_value,
                "payment overdue"
            );
            return Err(GatewayError::Throttled(ThrottleReason::PaymentOverdue));
        }
        if !allowed {
            tracing::debug!(client = %client_id, endpoint = %endpoint.id, "rate limited");
            return Err(GatewayError::Throttled(ThrottleReason::RateLimited));
        }

        tracing::debug!(
            client = %client_id,
            endpoint = %endpoint.id,
            expected = ledger.expected_value,
            paid = ledger.paid_value,
            "request admitted"
        );

        let snapshot = *ledger;
        drop(ledger);
        Ok(Admission {
            endpoint,
            session,
            ledger: snapshot,
        })
    }
}
