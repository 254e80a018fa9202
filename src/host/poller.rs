//! Poller contract, poller events, and the ready-made interval poller.

use crate::config::PollerConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle states a poller reports through [`PollerEvent::StateChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerLifecycle {
    Stopped,
    Running,
}

/// Events emitted by managed pollers.
#[derive(Debug, Clone)]
pub enum PollerEvent {
    /// A poll completed and produced data.
    DataAvailable {
        poller: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        elapsed_ms: u64,
        size_bytes: u64,
        has_changed: bool,
    },
    /// A poll failed; the loop keeps going unless cancellation is observed.
    PollingError {
        poller: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        consecutive_errors: u32,
        will_retry: bool,
    },
    /// The poller changed lifecycle state.
    StateChanged {
        poller: String,
        previous: PollerLifecycle,
        next: PollerLifecycle,
        timestamp: chrono::DateTime<chrono::Utc>,
        reason: String,
    },
}

/// What one successful poll produced.
#[derive(Debug, Clone, Copy)]
pub struct PollOutcome {
    pub size_bytes: u64,
    /// False when the polled source returned the same data as last time.
    pub has_changed: bool,
}

/// A long-running background service the host can start and stop.
#[async_trait]
pub trait Poller: Send + Sync {
    fn name(&self) -> &str;

    /// Bring the poller up. The token is the host's shared cancellation
    /// scope; observing it must wind the poller down promptly.
    async fn start(&self, cancellation: CancellationToken) -> anyhow::Result<()>;

    /// Wind the poller down. Called by the host under a stop timeout.
    async fn stop(&self) -> anyhow::Result<()>;
}

/// Periodic poller around a fallible async poll function.
///
/// When `adaptive_enabled` is set, unchanged data widens the interval by
/// half (capped at `max_interval_ms`) and fresh data snaps it back to
/// `min_interval_ms`, so an idle source is polled lazily and an active one
/// eagerly.
pub struct IntervalPoller<F> {
    name: String,
    config: PollerConfig,
    poll_fn: Arc<F>,
    events: broadcast::Sender<PollerEvent>,
    current_interval_ms: Arc<AtomicU64>,
    run: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl<F, Fut> IntervalPoller<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<PollOutcome>> + Send,
{
    pub fn new(
        name: impl Into<String>,
        config: PollerConfig,
        events: broadcast::Sender<PollerEvent>,
        poll_fn: F,
    ) -> Self {
        let initial = config
            .polling_interval_ms
            .clamp(config.min_interval_ms, config.max_interval_ms);
        Self {
            name: name.into(),
            config,
            poll_fn: Arc::new(poll_fn),
            events,
            current_interval_ms: Arc::new(AtomicU64::new(initial)),
            run: Mutex::new(None),
        }
    }

    /// Interval the loop will sleep before its next poll. Diagnostic only.
    pub fn current_interval_ms(&self) -> u64 {
        self.current_interval_ms.load(Ordering::Relaxed)
    }

    fn emit_state_change(
        events: &broadcast::Sender<PollerEvent>,
        name: &str,
        previous: PollerLifecycle,
        next: PollerLifecycle,
        reason: &str,
    ) {
        let _ = events.send(PollerEvent::StateChanged {
            poller: name.to_string(),
            previous,
            next,
            timestamp: chrono::Utc::now(),
            reason: reason.to_string(),
        });
    }

    async fn poll_loop(
        name: String,
        config: PollerConfig,
        poll_fn: Arc<F>,
        events: broadcast::Sender<PollerEvent>,
        interval_ms: Arc<AtomicU64>,
        token: CancellationToken,
    ) {
        let mut consecutive_errors: u32 = 0;

        loop {
            let interval = std::time::Duration::from_millis(interval_ms.load(Ordering::Relaxed));
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(interval) => {}
            }

            let begun = Instant::now();
            match (poll_fn)().await {
                Ok(outcome) => {
                    consecutive_errors = 0;
                    let elapsed_ms = begun.elapsed().as_millis() as u64;
                    debug!(
                        poller = %name,
                        elapsed_ms,
                        size_bytes = outcome.size_bytes,
                        has_changed = outcome.has_changed,
                        "poll completed"
                    );
                    let _ = events.send(PollerEvent::DataAvailable {
                        poller: name.clone(),
                        timestamp: chrono::Utc::now(),
                        elapsed_ms,
                        size_bytes: outcome.size_bytes,
                        has_changed: outcome.has_changed,
                    });

                    if config.adaptive_enabled {
                        let next = if outcome.has_changed {
                            config.min_interval_ms
                        } else {
                            let widened = interval_ms.load(Ordering::Relaxed);
                            (widened + widened / 2).min(config.max_interval_ms)
                        };
                        interval_ms.store(next, Ordering::Relaxed);
                    }
                }
                Err(err) => {
                    consecutive_errors += 1;
                    let will_retry = !token.is_cancelled();
                    warn!(
                        poller = %name,
                        error = %err,
                        consecutive_errors,
                        will_retry,
                        "poll failed"
                    );
                    let _ = events.send(PollerEvent::PollingError {
                        poller: name.clone(),
                        message: format!("{err:#}"),
                        timestamp: chrono::Utc::now(),
                        consecutive_errors,
                        will_retry,
                    });
                }
            }
        }

        Self::emit_state_change(
            &events,
            &name,
            PollerLifecycle::Running,
            PollerLifecycle::Stopped,
            "polling loop ended",
        );
    }
}

#[async_trait]
impl<F, Fut> Poller for IntervalPoller<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<PollOutcome>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, cancellation: CancellationToken) -> anyhow::Result<()> {
        let mut run = self.run.lock();
        if run.is_some() {
            warn!(poller = %self.name, "start requested but already running");
            return Ok(());
        }

        let token = cancellation.child_token();
        let handle = tokio::spawn(Self::poll_loop(
            self.name.clone(),
            self.config.clone(),
            self.poll_fn.clone(),
            self.events.clone(),
            self.current_interval_ms.clone(),
            token.clone(),
        ));
        *run = Some((token, handle));

        info!(poller = %self.name, "poller started");
        Self::emit_state_change(
            &self.events,
            &self.name,
            PollerLifecycle::Stopped,
            PollerLifecycle::Running,
            "started",
        );
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let Some((token, handle)) = self.run.lock().take() else {
            return Ok(());
        };
        token.cancel();
        handle.await?;
        info!(poller = %self.name, "poller stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn adaptive_config() -> PollerConfig {
        PollerConfig {
            polling_interval_ms: 100,
            min_interval_ms: 100,
            max_interval_ms: 400,
            adaptive_enabled: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_data_widens_the_adaptive_interval() {
        let (events, mut rx) = broadcast::channel(64);
        let poller = Arc::new(IntervalPoller::new(
            "quiet-source",
            adaptive_config(),
            events,
            || async {
                Ok(PollOutcome {
                    size_bytes: 64,
                    has_changed: false,
                })
            },
        ));

        poller.start(CancellationToken::new()).await.unwrap();

        let mut data_events = 0;
        while data_events < 4 {
            match rx.recv().await.unwrap() {
                PollerEvent::DataAvailable { has_changed, .. } => {
                    assert!(!has_changed);
                    data_events += 1;
                }
                _ => {}
            }
        }

        // 100 -> 150 -> 225 -> 337 after four unchanged polls.
        assert!(poller.current_interval_ms() > 100);
        assert!(poller.current_interval_ms() <= 400);

        poller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_data_snaps_the_interval_back_to_min() {
        let (events, _rx) = broadcast::channel(64);
        let polls = Arc::new(AtomicU32::new(0));

        let polls_in = polls.clone();
        let poller = Arc::new(IntervalPoller::new(
            "busy-source",
            adaptive_config(),
            events,
            move || {
                let polls = polls_in.clone();
                async move {
                    let n = polls.fetch_add(1, Ordering::SeqCst);
                    Ok(PollOutcome {
                        size_bytes: 128,
                        // Quiet for three polls, then fresh data.
                        has_changed: n >= 3,
                    })
                }
            },
        ));

        poller.start(CancellationToken::new()).await.unwrap();
        while polls.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        poller.stop().await.unwrap();

        assert_eq!(poller.current_interval_ms(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_failures_count_consecutively_and_keep_retrying() {
        let (events, mut rx) = broadcast::channel(64);
        let poller = Arc::new(IntervalPoller::new(
            "flaky-source",
            PollerConfig::default(),
            events,
            || async { Err::<PollOutcome, _>(anyhow::anyhow!("connection refused")) },
        ));

        poller.start(CancellationToken::new()).await.unwrap();

        let mut seen = Vec::new();
        while seen.len() < 3 {
            if let PollerEvent::PollingError {
                consecutive_errors,
                will_retry,
                ..
            } = rx.recv().await.unwrap()
            {
                assert!(will_retry);
                seen.push(consecutive_errors);
            }
        }
        assert_eq!(seen, vec![1, 2, 3]);

        poller.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_the_shared_scope_stops_the_loop() {
        let (events, mut rx) = broadcast::channel(64);
        let poller = Arc::new(IntervalPoller::new(
            "scoped",
            PollerConfig::default(),
            events,
            || async {
                Ok(PollOutcome {
                    size_bytes: 1,
                    has_changed: true,
                })
            },
        ));

        let scope = CancellationToken::new();
        poller.start(scope.clone()).await.unwrap();
        scope.cancel();

        loop {
            if let PollerEvent::StateChanged { next, .. } = rx.recv().await.unwrap() {
                if next == PollerLifecycle::Stopped {
                    break;
                }
            }
        }
    }
}
