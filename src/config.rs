// ─── Backend endpoints ────────────────────────────────────────────────────────
pub const BACKEND_WS_URL: &str = "wss://api.algoplatform.in/ws/live";
pub const BACKEND_REST_URL: &str = "https://api.algoplatform.in";

// ─── Real-time channel ────────────────────────────────────────────────────────
/// Handshake must complete within this window before the reconnect policy
/// takes over.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 20;
pub const RECONNECT_INITIAL_DELAY_SECS: u64 = 1;
pub const RECONNECT_MAX_DELAY_SECS: u64 = 5;
pub const PING_INTERVAL_SECS: u64 = 20;

// ─── Poll loop ────────────────────────────────────────────────────────────────
pub const POLL_INTERVAL_SECS: u64 = 2;
/// A poll snapshot defers to push on overlapping metric fields when a push
/// update arrived within this window (1.5× the poll period).
pub const PUSH_FRESHNESS_MS: i64 = 3_000;

// ─── Bounded history ──────────────────────────────────────────────────────────
pub const ACTIVITY_LOG_CAPACITY: usize = 200;
pub const AUDIT_TRAIL_CAPACITY: usize = 100;
pub const MARKET_TICKS_CAPACITY: usize = 100;

/// Capped exponential backoff for the reconnect policy: 1, 2, 4, 5, 5…
pub fn next_reconnect_delay(current_secs: u64) -> u64 {
    (current_secs * 2).min(RECONNECT_MAX_DELAY_SECS)
}
