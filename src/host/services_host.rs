//! Host that owns a fixed set of pollers and their shared lifecycle.

use crate::config::HostConfig;
use crate::error::{CoreError, Result};
use crate::host::Poller;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct HostState {
    scope: Option<CancellationToken>,
}

/// Hosts a fixed set of pollers behind gated, idempotent start and stop.
///
/// `start_all` brings each poller up concurrently with a bounded retry per
/// poller; if any poller still fails, the pollers that did start are stopped
/// again and the start reports failure. `stop_all` cancels the shared scope
/// and winds each poller down under a per-poller timeout.
pub struct BackgroundServicesHost {
    pollers: Vec<Arc<dyn Poller>>,
    config: HostConfig,
    /// Serializes start/stop; holds the shared cancellation scope.
    state: Mutex<HostState>,
    /// Running flag, only written while the state mutex is held.
    running: AtomicBool,
}

impl BackgroundServicesHost {
    pub fn new(pollers: Vec<Arc<dyn Poller>>, config: HostConfig) -> Self {
        Self {
            pollers,
            config,
            state: Mutex::new(HostState { scope: None }),
            running: AtomicBool::new(false),
        }
    }

    /// Whether the host currently has its pollers running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn poller_count(&self) -> usize {
        self.pollers.len()
    }

    /// Start every poller. Concurrent and repeated calls are serialized by
    /// the state gate; a call while already running is a no-op.
    pub async fn start_all(&self, cancellation: &CancellationToken) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.running.load(Ordering::SeqCst) {
            warn!("start requested while services are already running");
            return Ok(());
        }

        let scope = cancellation.child_token();
        info!(pollers = self.pollers.len(), "starting background services");

        let attempts = self.config.start_attempts.max(1);
        let starts = self.pollers.iter().map(|poller| {
            let poller = poller.clone();
            let scope = scope.clone();
            async move {
                let outcome = Self::start_with_retry(&*poller, &scope, attempts).await;
                (poller, outcome)
            }
        });

        let mut started: Vec<Arc<dyn Poller>> = Vec::new();
        let mut first_failure: Option<CoreError> = None;
        for (poller, outcome) in join_all(starts).await {
            match outcome {
                Ok(()) => started.push(poller),
                Err(err) => {
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_failure {
            error!(error = %err, "background services failed to start; rolling back");
            scope.cancel();
            self.stop_pollers(&started).await;
            return Err(err);
        }

        state.scope = Some(scope);
        self.running.store(true, Ordering::SeqCst);
        info!("background services started");
        Ok(())
    }

    /// Stop every poller. A call while not running is a no-op.
    pub async fn stop_all(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !self.running.load(Ordering::SeqCst) {
            warn!("stop requested while services are not running");
            return Ok(());
        }

        if let Some(scope) = state.scope.take() {
            scope.cancel();
        }
        self.stop_pollers(&self.pollers).await;

        self.running.store(false, Ordering::SeqCst);
        info!("background services stopped");
        Ok(())
    }

    async fn start_with_retry(
        poller: &dyn Poller,
        scope: &CancellationToken,
        attempts: u32,
    ) -> Result<()> {
        let mut last_message = String::new();

        for attempt in 1..=attempts {
            match poller.start(scope.clone()).await {
                Ok(()) => {
                    info!(poller = %poller.name(), attempt, "poller started");
                    return Ok(());
                }
                Err(err) => {
                    last_message = format!("{err:#}");
                    warn!(
                        poller = %poller.name(),
                        attempt,
                        error = %last_message,
                        "poller failed to start"
                    );
                    if attempt < attempts {
                        let backoff = Duration::from_secs(1u64 << attempt);
                        tokio::select! {
                            _ = scope.cancelled() => break,
                            _ = sleep(backoff) => {}
                        }
                    }
                }
            }
        }

        Err(CoreError::PollerStartFailed {
            poller: poller.name().to_string(),
            attempts,
            message: last_message,
        })
    }

    async fn stop_pollers(&self, pollers: &[Arc<dyn Poller>]) {
        let limit = self.config.stop_timeout();
        let stops = pollers.iter().map(|poller| {
            let poller = poller.clone();
            async move {
                match timeout(limit, poller.stop()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(poller = %poller.name(), error = %err, "poller stop failed");
                    }
                    Err(_) => {
                        warn!(
                            poller = %poller.name(),
                            timeout_seconds = limit.as_secs(),
                            "poller stop timed out; abandoning"
                        );
                    }
                }
            }
        });
        join_all(stops).await;
    }
}
