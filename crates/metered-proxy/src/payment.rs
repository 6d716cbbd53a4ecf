//! Pay-as-you-go consistency check.
//!
//! Every request raises the value a client is expected to have paid by a fixed
//! price. What the client actually paid is the growth of its balance since the
//! session started. The request is authorized while the gap stays within a
//! buffer.

use crate::oracle::{BalanceOracle, OracleError};

/// Price and tolerance of the payment check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentSettings {
    /// Value added to the expected total on every request.
    pub price: i64,
    /// Largest tolerated gap between expected and paid value.
    pub buffer: i64,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            price: 1,
            buffer: 10,
        }
    }
}

/// Debt counters of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct Ledger {
    /// Consumer balance when the session was created.
    pub initial_value: i64,
    /// Balance growth observed since then.
    pub paid_value: i64,
    /// Value the consumer should have paid so far.
    pub expected_value: i64,
}

impl Ledger {
    pub fn new(initial_value: i64) -> Self {
        Self {
            initial_value,
            paid_value: 0,
            expected_value: 0,
        }
    }

    /// Expected minus paid value.
    pub fn outstanding(&self) -> i64 {
        self.expected_value.saturating_sub(self.paid_value)
    }

    /// Charge one request against `current_balance`; true while within the buffer.
    pub fn charge(&mut self, current_balance: i64, settings: &PaymentSettings) -> bool {
        self.expected_value = self.expected_value.saturating_add(settings.price);
        self.paid_value = current_balance.saturating_sub(self.initial_value);
        self.outstanding() <= settings.buffer
    }
}

/// Look up `consumer`'s balance and charge one request to `ledger`.
///
/// The counters are left untouched when the lookup fails.
pub async fn validate<O: BalanceOracle>(
    oracle: &O,
    consumer: &str,
    ledger: &mut Ledger,
    settings: &PaymentSettings,
) -> Result<bool, OracleError> {
    let balance = oracle.balance_of(consumer).await?;
    Ok(ledger.charge(balance, settings))
}
