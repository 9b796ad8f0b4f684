//! Scheduled statistics refresh
//!
//! One background task refreshes the snapshot store: once right after
//! start, then every interval, whether or not the previous attempt
//! succeeded. A refresh is awaited inside the loop, so two refreshes never
//! run at once; ticks that come due meanwhile collapse into one.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::stats::{DatasetSource, FetchError, SnapshotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// Waiting for the next tick
    Idle,
    /// A fetch is outstanding
    Refreshing,
    /// The loop has exited; nothing will be published anymore
    Stopped,
}

pub struct RefreshScheduler {
    source: Arc<dyn DatasetSource>,
    store: Arc<SnapshotStore>,
    interval: Duration,
    timeout: Duration,
}

impl RefreshScheduler {
    /// `interval` must be non-zero.
    pub fn new(
        source: Arc<dyn DatasetSource>,
        store: Arc<SnapshotStore>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            store,
            interval,
            timeout,
        }
    }

    /// Fetch once and publish on success, returning the number of records
    /// published. On failure the store keeps serving whatever it had.
    pub async fn refresh_once(&self) -> Result<usize, FetchError> {
        let dataset = match tokio::time::timeout(self.timeout, self.source.fetch()).await {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout(self.timeout)),
        };

        let records = dataset.len();
        self.store.publish(dataset);
        Ok(records)
    }

    /// Start the refresh loop on the tokio runtime.
    ///
    /// Dropping the returned handle also stops the loop, once any refresh
    /// in flight has finished.
    pub fn spawn(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(watch::Sender::new(RefreshState::Idle));

        let task = tokio::spawn(self.run(stop_rx, state.clone()));

        SchedulerHandle {
            stop: stop_tx,
            state,
            task,
        }
    }

    async fn run(self, mut stop: watch::Receiver<bool>, state: Arc<watch::Sender<RefreshState>>) {
        tracing::info!(
            "Scheduling statistics refresh (interval: {:.1} min, timeout: {}s)",
            self.interval.as_secs_f64() / 60.0,
            self.timeout.as_secs()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = ticker.tick() => {}
            }

            state.send_replace(RefreshState::Refreshing);
            let started = Instant::now();
            match self.refresh_once().await {
                Ok(records) => {
                    tracing::info!(
                        "✓ Statistics refresh completed: {} records, last update {}, {:.2}s",
                        records,
                        self.store.last_update().as_deref().unwrap_or("-"),
                        started.elapsed().as_secs_f64()
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "✗ Statistics refresh failed ({} error): {}. Keeping previous dataset",
                        e.kind(),
                        e
                    );
                }
            }
            state.send_replace(RefreshState::Idle);
        }

        state.send_replace(RefreshState::Stopped);
        tracing::info!("Statistics refresh scheduler stopped");
    }
}

/// Control handle for a running [`RefreshScheduler`]
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    state: Arc<watch::Sender<RefreshState>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn state(&self) -> RefreshState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.state.subscribe()
    }

    /// Ask the loop to stop and wait up to `grace` for it.
    ///
    /// A refresh already in flight may still publish. If it outlives
    /// `grace` the task is aborted before it can publish. Either way the
    /// state ends at `Stopped`. Returns whether the loop stopped on its own.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let Self { stop, state, mut task } = self;
        stop.send_replace(true);

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!("Refresh scheduler task ended abnormally: {}", e);
                state.send_replace(RefreshState::Stopped);
                false
            }
            Err(_) => {
                let last_state = *state.borrow();
                tracing::warn!(
                    "Refresh scheduler still {:?} after {:?}, abandoning in-flight refresh",
                    last_state,
                    grace
                );
                task.abort();
                // wait for the cancellation so the aborted loop cannot overwrite `Stopped`
                let _ = task.await;
                state.send_replace(RefreshState::Stopped);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use covid_common::{Dataset, Record};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake provider: call `n` returns a dataset tagged `n`, unless `n` is
    /// listed in `failing_calls`.
    struct FakeSource {
        delay: Duration,
        failing_calls: Vec<usize>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeSource {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                failing_calls: Vec::new(),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn failing_on(mut self, calls: &[usize]) -> Self {
            self.failing_calls = calls.to_vec();
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DatasetSource for FakeSource {
        async fn fetch(&self) -> Result<Dataset, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing_calls.contains(&call) {
                return Err(FetchError::Protocol {
                    status: 503,
                    body: "busy".to_string(),
                });
            }
            Ok(tagged_dataset(&call.to_string()))
        }
    }

    enum FailureKind {
        Transport,
        Protocol,
        Parse,
    }

    struct FailingSource(FailureKind);

    #[async_trait]
    impl DatasetSource for FailingSource {
        async fn fetch(&self) -> Result<Dataset, FetchError> {
            match self.0 {
                FailureKind::Transport => {
                    // nothing listens on port 1
                    let err = reqwest::Client::new()
                        .post("http://127.0.0.1:1/")
                        .send()
                        .await
                        .unwrap_err();
                    Err(FetchError::Transport(err))
                }
                FailureKind::Protocol => Err(FetchError::Protocol {
                    status: 500,
                    body: "internal".to_string(),
                }),
                FailureKind::Parse => {
                    let err = serde_json::from_str::<Vec<Record>>("<html>").unwrap_err();
                    Err(FetchError::Parse(err))
                }
            }
        }
    }

    fn tagged_dataset(tag: &str) -> Dataset {
        Dataset::from_records(vec![
            Record::from_iter([("Country_text", "World"), ("Tag", tag)]),
            Record::from_iter([("Country_text", "Italy"), ("Tag", tag)]),
        ])
        .stamped(format!("stamp {tag}"))
    }

    fn scheduler(source: Arc<dyn DatasetSource>, store: &Arc<SnapshotStore>, interval: Duration) -> RefreshScheduler {
        RefreshScheduler::new(source, store.clone(), interval, Duration::from_secs(5))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_refresh_once_publishes() {
        let store = Arc::new(SnapshotStore::default());
        let source = Arc::new(FakeSource::new(Duration::ZERO));
        let scheduler = scheduler(source, &store, Duration::from_secs(3600));

        assert_eq!(scheduler.refresh_once().await.unwrap(), 2);
        assert_eq!(store.last_update().as_deref(), Some("stamp 1"));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_dataset() {
        let store = Arc::new(SnapshotStore::default());
        store.publish(tagged_dataset("d1"));
        let before = store.query_all().unwrap();

        for kind in [FailureKind::Transport, FailureKind::Protocol, FailureKind::Parse] {
            let scheduler = scheduler(Arc::new(FailingSource(kind)), &store, Duration::from_secs(3600));
            let err = scheduler.refresh_once().await.unwrap_err();

            assert!(!matches!(err, FetchError::Timeout(_)));
            assert_eq!(*store.query_all().unwrap(), *before);
            assert_eq!(store.query_country("italy").unwrap().get("Tag"), Some("d1"));
        }
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out_without_publishing() {
        let store = Arc::new(SnapshotStore::default());
        let source = Arc::new(FakeSource::new(Duration::from_millis(300)));
        let scheduler = RefreshScheduler::new(source, store.clone(), Duration::from_secs(3600), Duration::from_millis(30));

        let err = scheduler.refresh_once().await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
        assert_eq!(err.kind(), "transport");
        assert!(!store.is_ready());
    }

    #[tokio::test]
    async fn test_refreshes_at_start_and_every_interval() {
        let store = Arc::new(SnapshotStore::default());
        let source = Arc::new(FakeSource::new(Duration::ZERO));
        let handle = scheduler(source.clone(), &store, Duration::from_millis(40)).spawn();

        wait_until(|| store.is_ready()).await;
        wait_until(|| source.calls() >= 3).await;

        assert!(handle.shutdown(Duration::from_secs(1)).await);
        let calls = source.calls();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(source.calls(), calls, "no refresh after stop");
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_schedule() {
        let store = Arc::new(SnapshotStore::default());
        let source = Arc::new(FakeSource::new(Duration::ZERO).failing_on(&[1]));
        let handle = scheduler(source.clone(), &store, Duration::from_millis(30)).spawn();

        wait_until(|| store.is_ready()).await;
        assert!(source.calls() >= 2);
        assert_ne!(store.last_update().as_deref(), Some("stamp 1"));

        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_refreshes_never_overlap() {
        let store = Arc::new(SnapshotStore::default());
        // every fetch outlasts several intervals
        let source = Arc::new(FakeSource::new(Duration::from_millis(120)));
        let handle = scheduler(source.clone(), &store, Duration::from_millis(25)).spawn();

        tokio::time::sleep(Duration::from_millis(650)).await;
        handle.shutdown(Duration::from_secs(1)).await;

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        let calls = source.calls();
        assert!((2..=6).contains(&calls), "expected back-to-back refreshes, got {calls}");
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let store = Arc::new(SnapshotStore::default());
        let source = Arc::new(FakeSource::new(Duration::from_millis(50)));
        let handle = scheduler(source, &store, Duration::from_secs(3600)).spawn();
        let mut states = handle.subscribe();

        states.wait_for(|s| *s == RefreshState::Refreshing).await.unwrap();
        states.wait_for(|s| *s == RefreshState::Idle).await.unwrap();
        assert!(store.is_ready());
        assert_eq!(handle.state(), RefreshState::Idle);

        assert!(handle.shutdown(Duration::from_secs(1)).await);
        assert_eq!(*states.borrow(), RefreshState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_hung_refresh() {
        let store = Arc::new(SnapshotStore::default());
        let source = Arc::new(FakeSource::new(Duration::from_secs(30)));
        let handle = RefreshScheduler::new(source, store.clone(), Duration::from_secs(3600), Duration::from_secs(60)).spawn();
        let mut states = handle.subscribe();
        states.wait_for(|s| *s == RefreshState::Refreshing).await.unwrap();

        let started = Instant::now();
        assert!(!handle.shutdown(Duration::from_millis(100)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!store.is_ready());
        assert_eq!(*states.borrow_and_update(), RefreshState::Stopped);
    }
}
