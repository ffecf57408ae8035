// src/sys/readiness.rs

use std::time::Duration;

use tracing::warn;

use crate::error::{SetupError, SetupResult};
use crate::sys::traits::DatabaseClient;

/// Fixed pause between liveness probes. No backoff.
pub const WAIT_INTERVAL: Duration = Duration::from_secs(5);

/// Blocks the pipeline until the database answers.
///
/// Unbounded by default: a container waits for its infrastructure as long as
/// it takes. `max_failures` turns that into a fatal error after N failed
/// probes.
pub struct ReadinessGate {
    interval: Duration,
    max_failures: Option<u32>,
}

impl ReadinessGate {
    pub fn new(max_failures: Option<u32>) -> Self {
        Self {
            interval: WAIT_INTERVAL,
            max_failures,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns the number of failed probes before the database came up.
    pub async fn await_ready(&self, db: &dyn DatabaseClient) -> SetupResult<u32> {
        let mut failures = 0;
        while !db.ping().await {
            failures += 1;
            if self.max_failures.is_some_and(|max| failures >= max) {
                return Err(SetupError::DatabaseUnavailable(failures));
            }
            warn!(
                "**** MySQL server is not available. Waiting {} seconds...",
                self.interval.as_secs()
            );
            tokio::time::sleep(self.interval).await;
        }
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tokio::time::Instant;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    /// Database that refuses the first `down_for` probes.
    struct FlakyDb {
        down_for: AtomicU32,
        probes: AtomicU32,
    }

    impl FlakyDb {
        fn new(down_for: u32) -> Self {
            Self {
                down_for: AtomicU32::new(down_for),
                probes: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DatabaseClient for FlakyDb {
        async fn ping(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.down_for
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        }

        async fn query(&self, _sql: &str) -> Result<String, String> {
            Err("not used".into())
        }

        async fn load_dump(&self, _database: &str, _dump: &Path) -> Result<(), String> {
            Err("not used".into())
        }
    }

    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_mean_two_sleeps_and_two_warnings() {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let db = FlakyDb::new(2);
        let started = Instant::now();
        let failures = ReadinessGate::new(None).await_ready(&db).await.unwrap();

        assert_eq!(failures, 2);
        assert_eq!(db.probes.load(Ordering::SeqCst), 3);
        assert_eq!(warnings.load(Ordering::SeqCst), 2);
        let waited = started.elapsed();
        assert!(waited >= WAIT_INTERVAL * 2 && waited < WAIT_INTERVAL * 3, "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn ready_database_passes_without_sleeping() {
        let started = Instant::now();
        let failures = ReadinessGate::new(None)
            .await_ready(&FlakyDb::new(0))
            .await
            .unwrap();

        assert_eq!(failures, 0);
        assert!(started.elapsed() < WAIT_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_gate_keeps_waiting() {
        let failures = ReadinessGate::new(None)
            .await_ready(&FlakyDb::new(500))
            .await
            .unwrap();
        assert_eq!(failures, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_gate_gives_up() {
        let db = FlakyDb::new(10);
        let err = ReadinessGate::new(Some(3))
            .with_interval(Duration::from_millis(10))
            .await_ready(&db)
            .await
            .unwrap_err();

        assert!(matches!(err, SetupError::DatabaseUnavailable(3)));
        assert_eq!(db.probes.load(Ordering::SeqCst), 3);
    }
}
