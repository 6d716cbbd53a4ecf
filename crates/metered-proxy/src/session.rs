//! Per-client sessions: creation, last-seen refresh and idle eviction.
//!
//! The registry is a sharded map (`DashMap`) and is the only owner of sessions.
//! Shard locks are held just long enough to read or change the map, never
//! across an await. A session's debt counters sit behind their own async
//! mutex so that one client's metering steps run one at a time.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::MutexGuard;
use tokio_util::sync::CancellationToken;

use crate::limiter::{BucketSettings, TokenBucket};
use crate::metrics::{SESSIONS_ACTIVE, SESSIONS_CREATED, SESSIONS_EVICTED};
use crate::oracle::{BalanceOracle, OracleError};
use crate::payment::Ledger;

/// Session lifetime knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Sessions idle for longer than this are evicted.
    pub idle_timeout: Duration,
    /// How often the sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// One client's metered relationship with a producer account.
pub struct Session {
    id: String,
    consumer: String,
    producer: String,
    limiter: TokenBucket,
    last_seen: Mutex<Instant>,
    ledger: tokio::sync::Mutex<Ledger>,
}

impl Session {
    fn new(
        id: &str,
        consumer: &str,
        producer: &str,
        initial_value: i64,
        bucket: BucketSettings,
    ) -> Self {
        Self {
            id: id.to_string(),
            consumer: consumer.to_string(),
            producer: producer.to_string(),
            limiter: TokenBucket::new(bucket),
            last_seen: Mutex::new(Instant::now()),
            ledger: tokio::sync::Mutex::new(Ledger::new(initial_value)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Poll the session's token bucket.
    pub fn allow(&self) -> bool {
        self.limiter.allow()
    }

    pub fn last_seen(&self) -> Instant {
        match self.last_seen.lock() {
            Ok(at) => *at,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn touch(&self) {
        let now = Instant::now();
        match self.last_seen.lock() {
            Ok(mut at) => *at = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    /// Time since the last access, as seen from `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen())
    }

    /// Exclusive access to the debt counters for one metering step.
    pub async fn lock_ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().await
    }

    /// Copy of the current debt counters.
    pub async fn ledger(&self) -> Ledger {
        *self.ledger.lock().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("consumer", &self.consumer)
            .field("producer", &self.producer)
            .field("last_seen", &self.last_seen())
            .finish_non_exhaustive()
    }
}

/// Concurrent map from client identity to session.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    bucket: BucketSettings,
    settings: SessionSettings,
}

impl SessionRegistry {
    pub fn new(bucket: BucketSettings, settings: SessionSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            bucket,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Existing session for `client_id`, with its last-seen time refreshed.
    pub fn get(&self, client_id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(client_id).map(|s| Arc::clone(s.value()))?;
        session.touch();
        Some(session)
    }

    /// Return the session for `client_id`, creating it on first sight.
    ///
    /// A new session snapshots `consumer`'s balance. The snapshot is taken
    /// before the map is touched; if another request inserted the session in
    /// the meantime, that session wins and the snapshot is dropped.
    pub async fn get_or_create<O: BalanceOracle>(
        &self,
        client_id: &str,
        consumer: &str,
        producer: &str,
        oracle: &O,
    ) -> Result<Arc<Session>, OracleError> {
        if let Some(session) = self.get(client_id) {
            return Ok(session);
        }

        let initial_value = oracle.balance_of(consumer).await?;

        let session = match self.sessions.entry(client_id.to_string()) {
            Entry::Occupied(existing) => {
                let session = Arc::clone(existing.get());
                session.touch();
                session
            }
            Entry::Vacant(slot) => {
                let session = Arc::new(Session::new(
                    client_id,
                    consumer,
                    producer,
                    initial_value,
                    self.bucket,
                ));
                slot.insert(Arc::clone(&session));
                SESSIONS_CREATED.inc();
                tracing::info!(
                    client = %client_id,
                    producer = %producer,
                    initial_value,
                    "new session"
                );
                session
            }
        };
        SESSIONS_ACTIVE.set(self.sessions.len() as i64);
        Ok(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every session idle for longer than the idle timeout. Returns the number evicted.
    pub fn sweep(&self, now: Instant) -> usize {
        let idle_timeout = self.settings.idle_timeout;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.idle_for(now) <= idle_timeout);
        let evicted = before.saturating_sub(self.sessions.len());
        SESSIONS_EVICTED.inc_by(evicted as u64);
        SESSIONS_ACTIVE.set(self.sessions.len() as i64);
        evicted
    }

    /// Run [`sweep`](Self::sweep) every sweep interval until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let period = self.settings.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("session sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let evicted = self.sweep(Instant::now());
                        if evicted > 0 {
                            tracing::info!(evicted, remaining = self.len(), "evicted idle sessions");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::FixedBalanceOracle;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(BucketSettings::default(), SessionSettings::default())
    }

    #[tokio::test]
    async fn test_create_snapshots_balance() {
        let registry = registry();
        let oracle = FixedBalanceOracle::new(0);
        oracle.set_balance("consumer", 42);

        let session = registry
            .get_or_create("10.0.0.1", "consumer", "producer", &oracle)
            .await
            .unwrap();

        assert_eq!(session.id(), "10.0.0.1");
        assert_eq!(session.consumer(), "consumer");
        assert_eq!(session.producer(), "producer");
        assert_eq!(session.ledger().await, Ledger::new(42));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_existing_session_is_reused() {
        let registry = registry();
        let oracle = FixedBalanceOracle::new(10);

        let first = registry
            .get_or_create("10.0.0.1", "consumer", "producer", &oracle)
            .await
            .unwrap();
        first.lock_ledger().await.expected_value = 3;

        // Balance changes after creation do not reset the snapshot.
        oracle.set_balance("consumer", 99);
        let second = registry
            .get_or_create("10.0.0.1", "consumer", "other-producer", &oracle)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.producer(), "producer");
        assert_eq!(second.ledger().await.initial_value, 10);
        assert_eq!(second.ledger().await.expected_value, 3);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_during_request_orphans_session() {
        let registry = registry();
        let oracle = FixedBalanceOracle::new(7);

        let held = registry
            .get_or_create("10.0.0.1", "consumer", "producer", &oracle)
            .await
            .unwrap();
        held.lock_ledger().await.expected_value = 4;

        let later = Instant::now() + registry.settings().idle_timeout + Duration::from_secs(1);
        assert_eq!(registry.sweep(later), 1);

        // The in-flight request still meters its own handle.
        assert!(held.allow());
        held.lock_ledger().await.expected_value += 1;
        assert_eq!(held.ledger().await.expected_value, 5);

        // The client's next request starts over with a new snapshot.
        oracle.set_balance("consumer", 30);
        let fresh = registry
            .get_or_create("10.0.0.1", "consumer", "producer", &oracle)
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&held, &fresh));
        assert_eq!(fresh.ledger().await, Ledger::new(30));
    }

    #[tokio::test]
    async fn test_oracle_failure_creates_nothing() {
        let registry = registry();
        let oracle = FixedBalanceOracle::new(0);
        oracle.set_unavailable(true);

        assert!(registry
            .get_or_create("10.0.0.1", "consumer", "producer", &oracle)
            .await
            .is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_creation_keeps_one_session() {
        let registry = Arc::new(registry());
        let oracle = Arc::new(FixedBalanceOracle::new(5));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            let oracle = Arc::clone(&oracle);
            handles.push(tokio::spawn(async move {
                registry
                    .get_or_create("10.0.0.9", "consumer", "producer", oracle.as_ref())
                    .await
                    .unwrap()
            }));
        }

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }
        assert_eq!(registry.len(), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    }

    #[tokio::test]
    async fn test_sweep_evicts_idle_sessions() {
        let registry = registry();
        let oracle = FixedBalanceOracle::new(0);
        registry
            .get_or_create("idle", "consumer", "producer", &oracle)
            .await
            .unwrap();

        let later = Instant::now() + Duration::from_secs(10 * 60 + 1);
        assert_eq!(registry.sweep(later), 1);
        assert!(registry.get("idle").is_none());
    }

    #[tokio::test]
    async fn test_sweep_keeps_recent_sessions() {
        let registry = registry();
        let oracle = FixedBalanceOracle::new(0);
        registry
            .get_or_create("busy", "consumer", "producer", &oracle)
            .await
            .unwrap();

        let later = Instant::now() + Duration::from_secs(5 * 60);
        assert_eq!(registry.sweep(later), 0);
        assert!(registry.get("busy").is_some());
    }

    #[tokio::test]
    async fn test_touch_extends_lifetime() {
        let registry = registry();
        let oracle = FixedBalanceOracle::new(0);
        let session = registry
            .get_or_create("client", "consumer", "producer", &oracle)
            .await
            .unwrap();
        let created = session.last_seen();

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.get("client").unwrap();
        assert!(session.last_seen() > created);

        // Idle from creation, but not from the refresh.
        let cutoff = created + Duration::from_secs(10 * 60) + Duration::from_millis(10);
        assert_eq!(registry.sweep(cutoff), 0);
    }

    #[tokio::test]
    async fn test_sweeper_task_evicts_and_stops() {
        let registry = Arc::new(SessionRegistry::new(
            BucketSettings::default(),
            SessionSettings {
                idle_timeout: Duration::ZERO,
                sweep_interval: Duration::from_millis(10),
            },
        ));
        let oracle = FixedBalanceOracle::new(0);
        registry
            .get_or_create("client", "consumer", "producer", &oracle)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&registry).spawn_sweeper(cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.is_empty());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop after cancellation")
            .unwrap();
    }
}
