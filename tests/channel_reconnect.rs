//! Reconnect behavior against a real local WebSocket server: the server
//! accepts, records the subscribe frames, then drops the connection. Each
//! recovery must re-issue the full topic set exactly once.

use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

use strategy_monitor::channel::StrategyChannel;
use strategy_monitor::reconciler::TelemetryEvent;
use strategy_monitor::types::ConnectionState;

/// Accepts `connections` WebSocket clients in sequence. For each, collects
/// the first two text frames and then drops the socket.
async fn drop_after_subscribe(
    listener: TcpListener,
    connections: usize,
    frames_tx: mpsc::UnboundedSender<Vec<String>>,
) {
    for _ in 0..connections {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => return,
        };
        let mut ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(_) => continue,
        };
        let mut frames = Vec::new();
        while frames.len() < 2 {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => frames.push(text),
                Some(Ok(_)) => {}
                _ => break,
            }
        }
        let _ = frames_tx.send(frames);
        // dropping ws severs the connection, forcing the client to reconnect
    }
}

#[tokio::test]
async fn each_recovery_resubscribes_the_full_topic_set_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    tokio::spawn(drop_after_subscribe(listener, 3, frames_tx));

    let (events_tx, _events_rx) = mpsc::channel::<TelemetryEvent>(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let url = format!("ws://{}", addr);
    let mut channel = StrategyChannel::new("S1", &url, events_tx, shutdown_rx);
    let status = channel.status.clone();
    let runner = tokio::spawn(async move {
        channel.run().await;
    });

    // Three connection lifetimes: the initial connect plus two recoveries.
    for generation in 0..3 {
        let frames = timeout(Duration::from_secs(10), frames_rx.recv())
            .await
            .unwrap_or_else(|_| panic!("no connection {} within 10s", generation))
            .expect("server task ended early");
        assert_eq!(frames.len(), 2, "connection {} frame set: {:?}", generation, frames);
        assert!(frames[0].contains("subscribe_strategy"));
        assert!(frames[1].contains("subscribe_market_data"));
        assert!(frames.iter().all(|f| f.contains("S1")));
    }

    // No fourth connection is served, so the channel is mid-backoff; close
    // the session and make sure the state machine settles.
    let _ = shutdown_tx.send(true);
    let _ = timeout(Duration::from_secs(10), runner).await;

    let snapshot = status.snapshot();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert!(snapshot.subscriptions.is_empty());
}
