//! Connectivity probe.
//!
//! A background task calls `GET /api/health` on a fixed interval and
//! publishes the verdict on a [`watch`] channel. The verdict gates job
//! submission and annotates poll failures; it never takes part in merging
//! job updates.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::api::JobApi;
use crate::events::MonitorEvent;

pub struct ConnectivityProbe {
    api: JobApi,
    state: Arc<watch::Sender<bool>>,
    event_tx: broadcast::Sender<MonitorEvent>,
    cancel: CancellationToken,
}

impl ConnectivityProbe {
    /// Spawn the probe task. The verdict starts as `false` until the first
    /// check completes; the first check runs immediately.
    pub fn start(
        api: JobApi,
        interval: Duration,
        event_tx: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        let (state, _) = watch::channel(false);
        let probe = Self {
            api,
            state: Arc::new(state),
            event_tx,
            cancel: CancellationToken::new(),
        };

        let api = probe.api.clone();
        let state = Arc::clone(&probe.state);
        let event_tx = probe.event_tx.clone();
        let cancel = probe.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    connected = check(&api) => publish(&state, &event_tx, connected),
                }
            }

            tracing::debug!("Connectivity probe stopped");
        });

        probe
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Run one check right now and publish its verdict.
    pub async fn check_now(&self) -> bool {
        let connected = check(&self.api).await;
        publish(&self.state, &self.event_tx, connected);
        connected
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ConnectivityProbe {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn check(api: &JobApi) -> bool {
    match api.health().await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "Health check failed");
            false
        }
    }
}

fn publish(state: &watch::Sender<bool>, event_tx: &broadcast::Sender<MonitorEvent>, connected: bool) {
    let changed = state.send_if_modified(|current| {
        if *current == connected {
            return false;
        }
        *current = connected;
        true
    });

    if changed {
        if connected {
            tracing::info!("Service reachable");
        } else {
            tracing::warn!("Service unreachable");
        }
        let _ = event_tx.send(MonitorEvent::ConnectivityChanged { connected });
    }
}
