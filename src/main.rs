use std::time::Duration;

use strategy_monitor::session::MonitoringSession;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let strategy_id = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STRATEGY_ID").ok())
        .ok_or("usage: strategy_monitor <strategy-id>")?;

    log::info!("Opening monitoring session for {}", strategy_id);
    let session = MonitoringSession::open(&strategy_id);

    let mut status_timer = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status_timer.tick() => {
                let state = session.state();
                let conn = session.connection();
                log::info!(
                    "[{}] {} | price={:.2} pnl={:+.2} qty={:.0} | conn={:?} (attempts={}) | log={} audit={} ticks={}",
                    strategy_id,
                    state.status.as_str(),
                    state.current_price,
                    state.current_pnl,
                    state.quantity,
                    conn.state,
                    conn.reconnect_attempts,
                    state.activity_log.len(),
                    state.audit_trail.len(),
                    state.market_ticks.len(),
                );
            }
        }
    }

    log::info!("Closing session for {}", strategy_id);
    let final_state = session.close().await;
    log::info!(
        "[{}] final status: {} | realized pnl {:+.2}",
        strategy_id,
        final_state.status.as_str(),
        final_state.realized_pnl
    );
    Ok(())
}
