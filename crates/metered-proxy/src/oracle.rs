//! Balance oracle: the external ledger query that reports how much an account holds.
//!
//! - [`NodeBalanceOracle`] asks a ledger node's HTTP API (`getBalances`)
//! - [`FixedBalanceOracle`] serves balances from memory (development and tests)
//! - [`Oracle`] picks one of the two at startup

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Confirmation threshold passed to the node with every balance query.
const BALANCE_THRESHOLD: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("balance query timed out")]
    Timeout,

    #[error("balance query failed: {0}")]
    Request(String),

    #[error("node answered with status {0}")]
    Status(u16),

    #[error("malformed node response: {0}")]
    Malformed(String),
}

/// Reports an account's current spendable balance.
pub trait BalanceOracle: Send + Sync {
    fn balance_of(
        &self,
        account: &str,
    ) -> impl Future<Output = Result<i64, OracleError>> + Send;
}

/// Queries a ledger node's JSON command API.
#[derive(Clone)]
pub struct NodeBalanceOracle {
    client: reqwest::Client,
    node_url: String,
    timeout: Duration,
}

impl NodeBalanceOracle {
    pub fn new(client: reqwest::Client, node_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            node_url: node_url.into(),
            timeout,
        }
    }
}

/// Pull the first balance out of a `getBalances` reply. Nodes encode it as a
/// decimal string; a bare number is accepted too.
fn parse_balance(body: &serde_json::Value) -> Result<i64, OracleError> {
    let first = body
        .get("balances")
        .and_then(|b| b.as_array())
        .and_then(|b| b.first())
        .ok_or_else(|| OracleError::Malformed("missing balances[0]".to_string()))?;

    match first {
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .map_err(|e| OracleError::Malformed(format!("balance '{s}': {e}"))),
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| OracleError::Malformed(format!("balance {n} out of range"))),
        other => Err(OracleError::Malformed(format!(
            "unexpected balance value: {other}"
        ))),
    }
}

impl BalanceOracle for NodeBalanceOracle {
    async fn balance_of(&self, account: &str) -> Result<i64, OracleError> {
        let body = serde_json::json!({
            "command": "getBalances",
            "addresses": [account],
            "threshold": BALANCE_THRESHOLD,
        });

        let resp = self
            .client
            .post(&self.node_url)
            .header("X-IOTA-API-Version", "1")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout
                } else {
                    OracleError::Request(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(OracleError::Status(resp.status().as_u16()));
        }

        let reply: serde_json::Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout
            } else {
                OracleError::Malformed(e.to_string())
            }
        })?;

        let balance = parse_balance(&reply)?;
        tracing::debug!(account = %account, balance, "balance lookup");
        Ok(balance)
    }
}

/// In-memory balances. Unknown accounts report `default_balance`.
#[derive(Default)]
pub struct FixedBalanceOracle {
    balances: DashMap<String, i64>,
    default_balance: i64,
    unavailable: AtomicBool,
}

impl FixedBalanceOracle {
    pub fn new(default_balance: i64) -> Self {
        Self {
            balances: DashMap::new(),
            default_balance,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_balance(&self, account: &str, balance: i64) {
        self.balances.insert(account.to_string(), balance);
    }

    /// Add `amount` to the account's balance, as a payment would.
    pub fn credit(&self, account: &str, amount: i64) {
        let mut entry = self
            .balances
            .entry(account.to_string())
            .or_insert(self.default_balance);
        *entry = entry.saturating_add(amount);
    }

    /// Make every query fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl BalanceOracle for FixedBalanceOracle {
    async fn balance_of(&self, account: &str) -> Result<i64, OracleError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(OracleError::Request("oracle marked unavailable".to_string()));
        }
        Ok(self
            .balances
            .get(account)
            .map(|b| *b)
            .unwrap_or(self.default_balance))
    }
}

/// The oracle chosen at startup.
pub enum Oracle {
    Node(NodeBalanceOracle),
    Fixed(Arc<FixedBalanceOracle>),
}

impl BalanceOracle for Oracle {
    async fn balance_of(&self, account: &str) -> Result<i64, OracleError> {
        match self {
            Oracle::Node(node) => node.balance_of(account).await,
            Oracle::Fixed(fixed) => fixed.balance_of(account).await,
        }
    }
}
