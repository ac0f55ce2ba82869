//! Real-time channel for one monitoring session.
//!
//! Each session owns exactly one channel — nothing here is shared process
//! wide. The channel connects, subscribes to the strategy-update and
//! market-data topics, and feeds parsed events into the session's
//! single-writer queue. On any drop it reconnects indefinitely with capped
//! exponential backoff and re-issues both subscriptions unconditionally
//! (subscriptions are not assumed to survive a reconnect).

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::config::{
    HANDSHAKE_TIMEOUT_SECS, PING_INTERVAL_SECS, RECONNECT_INITIAL_DELAY_SECS,
    next_reconnect_delay,
};
use crate::reconciler::{PushUpdate, TelemetryEvent};
use crate::types::ConnectionState;
use crate::wire;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection dropped: {0}")]
    Dropped(String),
}

/// Shared, read-only view of the channel's state machine. This is the only
/// surface a transport failure reaches — everything else is absorbed by the
/// reconnect policy.
#[derive(Clone)]
pub struct ConnectionStatus {
    inner: Arc<Mutex<ConnectionInfo>>,
}

#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    pub subscriptions: HashSet<String>,
    pub reconnect_attempts: u32,
}

impl ConnectionStatus {
    fn new() -> Self {
        ConnectionStatus {
            inner: Arc::new(Mutex::new(ConnectionInfo {
                state: ConnectionState::Disconnected,
                subscriptions: HashSet::new(),
                reconnect_attempts: 0,
            })),
        }
    }

    pub fn snapshot(&self) -> ConnectionInfo {
        self.inner.lock().unwrap().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.lock().unwrap().state = state;
    }

    fn set_subscriptions(&self, topics: HashSet<String>) {
        self.inner.lock().unwrap().subscriptions = topics;
    }

    fn bump_attempts(&self) {
        self.inner.lock().unwrap().reconnect_attempts += 1;
    }

    fn reset_attempts(&self) {
        self.inner.lock().unwrap().reconnect_attempts = 0;
    }
}

/// Both subscribe frames for a strategy, in send order. Re-sent in full on
/// every (re)connect.
pub fn subscription_frames(strategy_id: &str) -> Vec<String> {
    vec![
        json!({"action": "subscribe_strategy", "strategy_id": strategy_id}).to_string(),
        json!({"action": "subscribe_market_data", "strategy_id": strategy_id}).to_string(),
    ]
}

pub fn unsubscribe_frame(strategy_id: &str) -> String {
    json!({"action": "unsubscribe_strategy", "strategy_id": strategy_id}).to_string()
}

pub struct StrategyChannel {
    strategy_id: String,
    url: String,
    events: mpsc::Sender<TelemetryEvent>,
    shutdown: watch::Receiver<bool>,
    pub status: ConnectionStatus,
}

impl StrategyChannel {
    pub fn new(
        strategy_id: &str,
        url: &str,
        events: mpsc::Sender<TelemetryEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        StrategyChannel {
            strategy_id: strategy_id.to_string(),
            url: url.to_string(),
            events,
            shutdown,
            status: ConnectionStatus::new(),
        }
    }

    /// Connect-and-serve until the session closes. Reconnects forever; only
    /// a session shutdown ends the loop.
    pub async fn run(&mut self) {
        let mut delay = RECONNECT_INITIAL_DELAY_SECS;
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.connect_once().await {
                Ok(()) => break, // session closed cleanly
                Err(e) => {
                    // A drop after a successful connect starts a new outage,
                    // so the backoff restarts from its initial delay.
                    if matches!(e, ChannelError::Dropped(_)) {
                        delay = RECONNECT_INITIAL_DELAY_SECS;
                    }
                    self.status.set_state(ConnectionState::Disconnected);
                    self.status.bump_attempts();
                    log::warn!(
                        "[{}] channel error: {}. Reconnect in {}s…",
                        self.strategy_id, e, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                        _ = self.shutdown.changed() => break,
                    }
                    delay = next_reconnect_delay(delay);
                }
            }
        }
        self.status.set_state(ConnectionState::Disconnected);
        self.status.set_subscriptions(HashSet::new());
    }

    /// One connection lifetime. Ok(()) means the session shut down and the
    /// strategy was unsubscribed; Err means the transport dropped and the
    /// caller should reconnect.
    async fn connect_once(&mut self) -> Result<(), ChannelError> {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return Ok(());
        }
        self.status.set_state(ConnectionState::Connecting);

        let handshake = timeout(
            Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            connect_async(self.url.as_str()),
        );
        let (ws_stream, _) = match handshake.await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(ChannelError::Handshake(e.to_string())),
            Err(_) => {
                return Err(ChannelError::Handshake(format!(
                    "no handshake within {}s",
                    HANDSHAKE_TIMEOUT_SECS
                )))
            }
        };
        log::info!("[{}] channel connected ({})", self.strategy_id, self.url);

        let (mut write, mut read) = ws_stream.split();

        // Re-issue both subscriptions unconditionally on every connect.
        for frame in subscription_frames(&self.strategy_id) {
            write
                .send(Message::Text(frame))
                .await
                .map_err(|e| ChannelError::Dropped(format!("subscribe failed: {}", e)))?;
        }
        self.status.set_state(ConnectionState::Connected);
        self.status.set_subscriptions(HashSet::from([
            format!("strategy-updates:{}", self.strategy_id),
            format!("market-data:{}", self.strategy_id),
        ]));
        self.status.reset_attempts();
        log::info!("[{}] subscribed to strategy-updates and market-data", self.strategy_id);

        let mut ping_timer = interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping_timer.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    // Session close: unsubscribe, then release the channel.
                    let _ = write.send(Message::Text(unsubscribe_frame(&self.strategy_id))).await;
                    let _ = write.send(Message::Close(None)).await;
                    log::info!("[{}] unsubscribed and channel released", self.strategy_id);
                    return Ok(());
                }
                _ = ping_timer.tick() => {
                    let ping = json!({"action": "ping"}).to_string();
                    if let Err(e) = write.send(Message::Text(ping)).await {
                        return Err(ChannelError::Dropped(format!("ping failed: {}", e)));
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_frame(&text).await.is_err() {
                                // consumer gone — session already closed
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            return Err(ChannelError::Dropped("closed by server".into()));
                        }
                        Some(Err(e)) => {
                            return Err(ChannelError::Dropped(e.to_string()));
                        }
                        None => {
                            return Err(ChannelError::Dropped("stream ended".into()));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) -> Result<(), ()> {
        let data: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                log::debug!("[{}] unparsable frame dropped: {}", self.strategy_id, e);
                return Ok(());
            }
        };
        if data["action"].as_str() == Some("pong") {
            return Ok(());
        }

        let received_at_ms = chrono::Utc::now().timestamp_millis();
        let event = match data["type"].as_str() {
            Some("strategy_update") => {
                if data["strategy_id"].as_str() != Some(self.strategy_id.as_str()) {
                    return Ok(());
                }
                TelemetryEvent::Push(PushUpdate {
                    received_at_ms,
                    log: data["log"].as_str().map(str::to_string),
                    logic_status: wire::parse_logic_statuses(&data),
                    candles: wire::parse_candle_batch(&data),
                    metrics: data["metrics"].clone(),
                })
            }
            Some("market_data") => TelemetryEvent::Tick {
                received_at_ms,
                tick: wire::parse_market_tick(&data),
            },
            _ => return Ok(()),
        };

        self.events.send(event).await.map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_topics_are_subscribed_per_connect() {
        let frames = subscription_frames("S1");
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("subscribe_strategy"));
        assert!(frames[1].contains("subscribe_market_data"));
        assert!(frames.iter().all(|f| f.contains("\"strategy_id\":\"S1\"")));
    }

    #[test]
    fn unsubscribe_targets_the_strategy() {
        let frame = unsubscribe_frame("S1");
        assert!(frame.contains("unsubscribe_strategy"));
        assert!(frame.contains("S1"));
    }

    #[test]
    fn status_tracks_state_and_attempts() {
        let status = ConnectionStatus::new();
        assert_eq!(status.snapshot().state, ConnectionState::Disconnected);
        status.set_state(ConnectionState::Connecting);
        status.bump_attempts();
        status.bump_attempts();
        assert_eq!(status.snapshot().state, ConnectionState::Connecting);
        assert_eq!(status.snapshot().reconnect_attempts, 2);
        status.reset_attempts();
        assert_eq!(status.snapshot().reconnect_attempts, 0);
    }
}
