//! One monitoring session per watched strategy.
//!
//! The session owns its channel, its poll loop and the single consumer task
//! that applies telemetry events to LiveState. Producers never touch state
//! directly: both feed the same mpsc queue, so every mutation goes through
//! the reconciler in delivery order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::channel::{ConnectionInfo, StrategyChannel};
use crate::config::{BACKEND_REST_URL, BACKEND_WS_URL, POLL_INTERVAL_SECS};
use crate::reconciler::{PollSnapshot, TelemetryEvent, TelemetryReconciler};
use crate::rest_api::{ApiError, StatusClient};
use crate::types::LiveState;

const EVENT_QUEUE_DEPTH: usize = 256;

pub struct MonitoringSession {
    strategy_id: String,
    reconciler: Arc<Mutex<TelemetryReconciler>>,
    connection: crate::channel::ConnectionStatus,
    shutdown_tx: watch::Sender<bool>,
    poll_paused: Arc<AtomicBool>,
    channel_task: JoinHandle<()>,
    poll_task: JoinHandle<()>,
    consumer_task: JoinHandle<()>,
}

impl MonitoringSession {
    pub fn open(strategy_id: &str) -> Self {
        Self::open_with(strategy_id, BACKEND_WS_URL, BACKEND_REST_URL)
    }

    /// Endpoint-parameterized constructor, used by integration tests.
    pub fn open_with(strategy_id: &str, ws_url: &str, rest_base: &str) -> Self {
        let (events_tx, events_rx) = mpsc::channel::<TelemetryEvent>(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconciler = Arc::new(Mutex::new(TelemetryReconciler::new(strategy_id)));
        let poll_paused = Arc::new(AtomicBool::new(false));

        let mut channel =
            StrategyChannel::new(strategy_id, ws_url, events_tx.clone(), shutdown_rx.clone());
        let connection = channel.status.clone();
        let channel_task = tokio::spawn(async move {
            channel.run().await;
        });

        let poll_task = tokio::spawn(poll_loop(
            strategy_id.to_string(),
            StatusClient::with_base_url(rest_base),
            events_tx,
            shutdown_rx.clone(),
            poll_paused.clone(),
        ));

        let consumer_task = tokio::spawn(consume_events(
            reconciler.clone(),
            events_rx,
            shutdown_rx,
        ));

        MonitoringSession {
            strategy_id: strategy_id.to_string(),
            reconciler,
            connection,
            shutdown_tx,
            poll_paused,
            channel_task,
            poll_task,
            consumer_task,
        }
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    /// Snapshot of the canonical state.
    pub fn state(&self) -> LiveState {
        self.reconciler.lock().unwrap().state().clone()
    }

    pub fn connection(&self) -> ConnectionInfo {
        self.connection.snapshot()
    }

    /// Stops only the poll loop; push delivery continues.
    pub fn pause_polling(&self) {
        self.poll_paused.store(true, Ordering::Relaxed);
    }

    pub fn resume_polling(&self) {
        self.poll_paused.store(false, Ordering::Relaxed);
    }

    /// Close the session: unsubscribe, cancel the poll timer and stop
    /// applying updates. In-flight requests may still complete but their
    /// results never reach LiveState. Returns the final state.
    pub async fn close(self) -> LiveState {
        let _ = self.shutdown_tx.send(true);

        // Give the channel a moment to send its unsubscribe frame before
        // tearing the tasks down.
        let mut channel_task = self.channel_task;
        let grace = tokio::time::timeout(Duration::from_secs(2), &mut channel_task);
        if grace.await.is_err() {
            log::warn!("[{}] channel did not release in time", self.strategy_id);
            channel_task.abort();
        }
        self.poll_task.abort();
        let _ = self.consumer_task.await;

        let reconciler = Arc::try_unwrap(self.reconciler)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_else(|arc| {
                let guard = arc.lock().unwrap();
                TelemetryReconciler::from_state(guard.state().clone())
            });
        reconciler.into_state()
    }
}

async fn poll_loop(
    strategy_id: String,
    client: StatusClient,
    events: mpsc::Sender<TelemetryEvent>,
    mut shutdown: watch::Receiver<bool>,
    paused: Arc<AtomicBool>,
) {
    let mut ticker = interval(Duration::from_secs(POLL_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if paused.load(Ordering::Relaxed) {
                    continue;
                }
                let received_at_ms = chrono::Utc::now().timestamp_millis();
                let event = match client.fetch_status(&strategy_id).await {
                    Ok(snap) => TelemetryEvent::Poll(PollSnapshot {
                        received_at_ms,
                        metrics: snap.metrics,
                        audit_trail: snap.audit_trail,
                        candles: snap.candles,
                    }),
                    Err(ApiError::NotFound) => TelemetryEvent::PollNotFound { received_at_ms },
                    Err(ApiError::Malformed(e)) => {
                        // Discard the tick; previous LiveState stays intact.
                        log::warn!("[{}] poll body malformed, tick skipped: {}", strategy_id, e);
                        continue;
                    }
                    Err(e) => {
                        log::warn!("[{}] poll failed, tick skipped: {}", strategy_id, e);
                        continue;
                    }
                };
                if events.send(event).await.is_err() {
                    break; // consumer gone, session closed
                }
            }
        }
    }
    log::debug!("[{}] poll loop stopped", strategy_id);
}

async fn consume_events(
    reconciler: Arc<Mutex<TelemetryReconciler>>,
    mut events: mpsc::Receiver<TelemetryEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            // Teardown guard: once the session closes, queued and in-flight
            // results are discarded rather than applied.
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                Some(event) => reconciler.lock().unwrap().apply(event),
                None => break,
            },
        }
    }
}
