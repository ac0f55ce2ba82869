//! Telemetry reconciliation: merges push events and poll snapshots from two
//! independent producers into one canonical, bounded LiveState.
//!
//! The reducer is pure with respect to time — every event carries the
//! arrival timestamp its producer observed, so push-over-poll precedence is
//! deterministic under test without a live transport.

use serde_json::Value;
use std::collections::HashSet;

use crate::coerce::{field_f64, field_str, to_i64};
use crate::config::{
    ACTIVITY_LOG_CAPACITY, AUDIT_TRAIL_CAPACITY, MARKET_TICKS_CAPACITY, PUSH_FRESHNESS_MS,
};
use crate::types::{
    ActivityEntry, AuditEntry, Candle, ConditionStatus, LiveState, MarketTick, MoneynessBucket,
    OptionLegPrices, Position, StrategyStatus,
};

/// A batch of historical candles with its server-provided window length and
/// optional signal-candle anchors.
#[derive(Clone, Debug)]
pub struct CandleBatch {
    pub candles: Vec<Candle>,
    pub window: usize,
    pub signal_high: Option<f64>,
    pub signal_low: Option<f64>,
}

/// One push frame from the real-time channel.
#[derive(Clone, Debug)]
pub struct PushUpdate {
    pub received_at_ms: i64,
    pub metrics: Value,
    pub log: Option<String>,
    pub logic_status: Option<Vec<ConditionStatus>>,
    pub candles: Option<CandleBatch>,
}

/// One snapshot from the 2s poll loop, pre-split by the REST client.
#[derive(Clone, Debug)]
pub struct PollSnapshot {
    pub received_at_ms: i64,
    pub metrics: Value,
    pub audit_trail: Vec<AuditEntry>,
    pub candles: Option<CandleBatch>,
}

/// Unified input to the reducer. Producers stamp arrival time; the reducer
/// never reads a clock.
#[derive(Clone, Debug)]
pub enum TelemetryEvent {
    Push(PushUpdate),
    Tick { received_at_ms: i64, tick: MarketTick },
    Poll(PollSnapshot),
    /// Poll collaborator returned 404 — strategy is not running. A valid,
    /// displayable state, not an error.
    PollNotFound { received_at_ms: i64 },
}

/// Alias sets for every metric field the backend is known to serve. The
/// first alias doubles as the field's canonical name in the push-supplied
/// shield set.
const F_CURRENT_PRICE: &[&str] = &["current_price", "currentPrice", "last_price", "ltp", "price"];
const F_ENTRY_PRICE: &[&str] = &["entry_price", "entryPrice", "buy_price"];
const F_CURRENT_PNL: &[&str] = &["current_pnl", "currentPnl", "pnl"];
const F_UNREALIZED_PNL: &[&str] = &["unrealized_pnl", "unrealised_pnl", "open_pnl"];
const F_REALIZED_PNL: &[&str] = &["realized_pnl", "realised_pnl", "booked_pnl"];
const F_QUANTITY: &[&str] = &["quantity", "qty", "total_quantity"];
const F_STOP_LOSS: &[&str] = &["stop_loss", "stoploss", "sl"];
const F_TARGET_PROFIT: &[&str] = &["target_profit", "target", "tp"];
const F_SIGNAL_HIGH: &[&str] = &["signal_candle_high", "signalCandleHigh"];
const F_SIGNAL_LOW: &[&str] = &["signal_candle_low", "signalCandleLow"];
const F_POSITION: &[&str] = &["position", "position_type", "side"];
const F_STATUS: &[&str] = &["status", "strategy_status", "state"];
const F_MESSAGE: &[&str] = &["message", "status_message"];
const F_STRATEGY_NAME: &[&str] = &["strategy_name", "name"];
const F_INSTRUMENT: &[&str] = &["instrument", "symbol", "tradingsymbol"];
const F_SIGNAL_STATUS: &[&str] = &["signal_status", "signalStatus"];
const F_SIGNAL_TIME: &[&str] = &["signal_candle_time", "signalCandleTime"];
const F_ENTRY_ORDER: &[&str] = &["entry_order_id", "order_id"];
const F_SL_ORDER: &[&str] = &["sl_order_id", "stop_loss_order_id"];
const F_TARGET_ORDER: &[&str] = &["target_order_id", "tp_order_id"];
const F_TOKEN: &[&str] = &["instrument_token", "token"];
const F_PAPER: &[&str] = &["paper_trade", "is_paper"];

const METRIC_FIELDS: &[(&str, &[&str])] = &[
    ("current_price", F_CURRENT_PRICE),
    ("entry_price", F_ENTRY_PRICE),
    ("current_pnl", F_CURRENT_PNL),
    ("unrealized_pnl", F_UNREALIZED_PNL),
    ("realized_pnl", F_REALIZED_PNL),
    ("quantity", F_QUANTITY),
    ("stop_loss", F_STOP_LOSS),
    ("target_profit", F_TARGET_PROFIT),
    ("signal_candle_high", F_SIGNAL_HIGH),
    ("signal_candle_low", F_SIGNAL_LOW),
    ("position", F_POSITION),
    ("status", F_STATUS),
    ("message", F_MESSAGE),
    ("strategy_name", F_STRATEGY_NAME),
    ("instrument", F_INSTRUMENT),
    ("signal_status", F_SIGNAL_STATUS),
    ("signal_candle_time", F_SIGNAL_TIME),
    ("entry_order_id", F_ENTRY_ORDER),
    ("sl_order_id", F_SL_ORDER),
    ("target_order_id", F_TARGET_ORDER),
    ("instrument_token", F_TOKEN),
    ("paper_trade", F_PAPER),
    ("atm_minus_2_ce", &["atm_minus_2_ce"]),
    ("atm_minus_2_pe", &["atm_minus_2_pe"]),
    ("atm_ce", &["atm_ce"]),
    ("atm_pe", &["atm_pe"]),
    ("atm_plus_2_ce", &["atm_plus_2_ce"]),
    ("atm_plus_2_pe", &["atm_plus_2_pe"]),
];

fn is_supplied(v: Option<&Value>) -> bool {
    match v {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Canonical names of the metric fields a payload actually carries.
fn supplied_metric_fields(m: &Value) -> HashSet<&'static str> {
    let mut out = HashSet::new();
    for (name, aliases) in METRIC_FIELDS {
        if aliases.iter().any(|key| is_supplied(m.get(key))) {
            out.insert(*name);
        }
    }
    out
}

pub struct TelemetryReconciler {
    state: LiveState,
    last_push_ms: Option<i64>,
    /// Armed only by push frames that carried a candle batch; metric-only
    /// pushes must not starve the chart of poll-delivered batches.
    last_push_candles_ms: Option<i64>,
    /// Fields the most recent push actually supplied. Precedence is per
    /// field: a fresh push shields exactly these from poll overwrite.
    last_push_fields: HashSet<&'static str>,
}

impl TelemetryReconciler {
    pub fn new(strategy_id: &str) -> Self {
        TelemetryReconciler {
            state: LiveState::new(strategy_id),
            last_push_ms: None,
            last_push_candles_ms: None,
            last_push_fields: HashSet::new(),
        }
    }

    /// Rehydrate a reconciler around an existing state (e.g. when handing a
    /// final snapshot out of a closing session).
    pub fn from_state(state: LiveState) -> Self {
        TelemetryReconciler {
            state,
            last_push_ms: None,
            last_push_candles_ms: None,
            last_push_fields: HashSet::new(),
        }
    }

    pub fn state(&self) -> &LiveState {
        &self.state
    }

    pub fn into_state(self) -> LiveState {
        self.state
    }

    /// Single entry point for both producers. Within one producer, callers
    /// must deliver events in arrival order; across producers only the
    /// push-over-poll precedence holds.
    pub fn apply(&mut self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::Push(update) => self.apply_push(update),
            TelemetryEvent::Tick { received_at_ms, tick } => self.apply_tick(received_at_ms, tick),
            TelemetryEvent::Poll(snapshot) => self.apply_poll(snapshot),
            TelemetryEvent::PollNotFound { received_at_ms } => {
                // A 404 racing a live push stream is stale poll noise; the
                // push source stays authoritative until it goes silent.
                if self.push_is_fresh(received_at_ms) {
                    return;
                }
                self.state.status = StrategyStatus::NotRunning;
                self.state.strategy_name = "Strategy not running".to_string();
                self.state.status_message = "Strategy not running".to_string();
                self.state.last_update_ms = received_at_ms;
            }
        }
    }

    fn push_is_fresh(&self, now_ms: i64) -> bool {
        self.last_push_ms
            .map(|t| now_ms - t <= PUSH_FRESHNESS_MS)
            .unwrap_or(false)
    }

    fn apply_push(&mut self, update: PushUpdate) {
        self.last_push_ms = Some(update.received_at_ms);
        self.last_push_fields = supplied_metric_fields(&update.metrics);
        self.apply_metrics(&update.metrics, None);

        if let Some(line) = update.log {
            push_front_bounded(
                &mut self.state.activity_log,
                ActivityEntry { received_at_ms: update.received_at_ms, message: line },
                ACTIVITY_LOG_CAPACITY,
            );
        }
        if let Some(statuses) = update.logic_status {
            self.state.logic_status = statuses;
        }
        if let Some(batch) = update.candles {
            self.last_push_candles_ms = Some(update.received_at_ms);
            self.replace_chart(batch);
        }
        self.state.last_update_ms = update.received_at_ms;
    }

    fn apply_tick(&mut self, received_at_ms: i64, tick: MarketTick) {
        if tick.last_price > 0.0 {
            self.state.current_price = tick.last_price;
            // Ticks overlay the newest chart point without touching its OHLC.
            if !self.state.chart_series.is_empty() {
                self.state.chart_live_price = Some(tick.last_price);
            }
        }
        push_front_bounded(&mut self.state.market_ticks, tick, MARKET_TICKS_CAPACITY);
        self.state.last_update_ms = received_at_ms;
    }

    fn apply_poll(&mut self, snapshot: PollSnapshot) {
        // Precedence is per field, not per event: a fresh push shields only
        // the fields it actually supplied. Everything else falls through to
        // poll, and poll applies in full before the first push arrives or
        // once push goes silent.
        if self.push_is_fresh(snapshot.received_at_ms) {
            let shielded = self.last_push_fields.clone();
            self.apply_metrics(&snapshot.metrics, Some(&shielded));
        } else {
            self.apply_metrics(&snapshot.metrics, None);
        }

        // Candle freshness is tracked separately — metric-only push frames
        // carry no batch, so poll remains the chart's source then.
        let push_candles_fresh = self
            .last_push_candles_ms
            .map(|t| snapshot.received_at_ms - t <= PUSH_FRESHNESS_MS)
            .unwrap_or(false);
        if !push_candles_fresh {
            if let Some(batch) = snapshot.candles {
                self.replace_chart(batch);
            }
        }

        // Audit trail only ever arrives via poll, so it applies regardless.
        for entry in snapshot.audit_trail {
            self.state.audit_trail.push_back(entry);
        }
        while self.state.audit_trail.len() > AUDIT_TRAIL_CAPACITY {
            self.state.audit_trail.pop_front();
        }

        self.state.last_update_ms = snapshot.received_at_ms;
    }

    fn replace_chart(&mut self, batch: CandleBatch) {
        let mut candles = batch.candles;
        let window = if batch.window > 0 { batch.window } else { candles.len() };
        if candles.len() > window {
            // keep the most recent `window` candles, chronological order
            candles.drain(..candles.len() - window);
        }
        self.state.chart_series = candles;
        self.state.chart_live_price = None;
        if let Some(h) = batch.signal_high {
            self.state.signal_candle_high = h;
        }
        if let Some(l) = batch.signal_low {
            self.state.signal_candle_low = l;
        }
    }

    /// Applies whichever metric fields the payload supplies, under the alias
    /// sets the backend is known to use. Absent fields leave the previous
    /// value untouched — a partial snapshot never zeroes state. Fields named
    /// in `shield` are skipped (a fresh push already supplied them).
    fn apply_metrics(&mut self, m: &Value, shield: Option<&HashSet<&'static str>>) {
        let shielded = |name: &str| shield.map_or(false, |set| set.contains(name));
        let s = &mut self.state;

        let set_f64 = |name: &str, aliases: &[&str], slot: &mut f64| {
            if !shielded(name) {
                if let Some(v) = field_f64(m, aliases) {
                    *slot = v;
                }
            }
        };
        set_f64("current_price", F_CURRENT_PRICE, &mut s.current_price);
        set_f64("entry_price", F_ENTRY_PRICE, &mut s.entry_price);
        set_f64("current_pnl", F_CURRENT_PNL, &mut s.current_pnl);
        set_f64("unrealized_pnl", F_UNREALIZED_PNL, &mut s.unrealized_pnl);
        set_f64("realized_pnl", F_REALIZED_PNL, &mut s.realized_pnl);
        set_f64("quantity", F_QUANTITY, &mut s.quantity);
        set_f64("stop_loss", F_STOP_LOSS, &mut s.stop_loss);
        set_f64("target_profit", F_TARGET_PROFIT, &mut s.target_profit);
        set_f64("signal_candle_high", F_SIGNAL_HIGH, &mut s.signal_candle_high);
        set_f64("signal_candle_low", F_SIGNAL_LOW, &mut s.signal_candle_low);

        if !shielded("position") {
            if let Some(text) = field_str(m, F_POSITION) {
                s.position = parse_position(&text);
            }
        }
        if !shielded("status") {
            if let Some(text) = field_str(m, F_STATUS) {
                s.status = StrategyStatus::parse(&text);
            }
        }
        let set_str = |name: &str, aliases: &[&str], slot: &mut String| {
            if !shielded(name) {
                if let Some(text) = field_str(m, aliases) {
                    *slot = text;
                }
            }
        };
        set_str("message", F_MESSAGE, &mut s.status_message);
        set_str("strategy_name", F_STRATEGY_NAME, &mut s.strategy_name);
        set_str("instrument", F_INSTRUMENT, &mut s.instrument);
        set_str("signal_status", F_SIGNAL_STATUS, &mut s.signal_status);
        set_str("signal_candle_time", F_SIGNAL_TIME, &mut s.signal_candle_time);
        set_str("entry_order_id", F_ENTRY_ORDER, &mut s.entry_order_id);
        set_str("sl_order_id", F_SL_ORDER, &mut s.stop_loss_order_id);
        set_str("target_order_id", F_TARGET_ORDER, &mut s.target_order_id);

        if !shielded("instrument_token") {
            if let Some(v) = m.get("instrument_token").or_else(|| m.get("token")) {
                if !v.is_null() {
                    s.instrument_token = to_i64(v);
                }
            }
        }
        if !shielded("paper_trade") {
            if let Some(b) = m
                .get("paper_trade")
                .or_else(|| m.get("is_paper"))
                .and_then(Value::as_bool)
            {
                s.paper_trade = b;
            }
        }

        for bucket in MoneynessBucket::ALL {
            let ce_key = bucket.ce_key();
            let pe_key = bucket.pe_key();
            let ce = if shielded(ce_key) { None } else { field_f64(m, &[ce_key]) };
            let pe = if shielded(pe_key) { None } else { field_f64(m, &[pe_key]) };
            if ce.is_some() || pe.is_some() {
                let legs = s.option_legs.entry(bucket).or_insert_with(OptionLegPrices::default);
                if let Some(v) = ce {
                    legs.ce = v;
                }
                if let Some(v) = pe {
                    legs.pe = v;
                }
            }
        }
    }
}

fn parse_position(text: &str) -> Position {
    match text.to_ascii_lowercase().as_str() {
        "long" | "buy" => Position::Long,
        "short" | "sell" => Position::Short,
        _ => Position::Flat,
    }
}

fn push_front_bounded<T>(buf: &mut std::collections::VecDeque<T>, item: T, cap: usize) {
    buf.push_front(item);
    while buf.len() > cap {
        buf.pop_back();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn push_metrics(t: i64, metrics: Value) -> TelemetryEvent {
        TelemetryEvent::Push(PushUpdate {
            received_at_ms: t,
            metrics,
            log: None,
            logic_status: None,
            candles: None,
        })
    }

    fn poll_metrics(t: i64, metrics: Value) -> TelemetryEvent {
        TelemetryEvent::Poll(PollSnapshot {
            received_at_ms: t,
            metrics,
            audit_trail: Vec::new(),
            candles: None,
        })
    }

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 1000.0,
            trend_value: close,
        }
    }

    #[test]
    fn poll_is_sole_source_before_first_push() {
        let mut rec = TelemetryReconciler::new("S1");
        rec.apply(poll_metrics(1_000, json!({"ltp": "105.5", "status": "running"})));
        assert_eq!(rec.state().current_price, 105.5);
        assert_eq!(rec.state().status, StrategyStatus::Running);
    }

    #[test]
    fn fresh_push_wins_over_overlapping_poll() {
        let mut rec = TelemetryReconciler::new("S1");
        rec.apply(push_metrics(10_000, json!({"current_price": 200.0})));
        rec.apply(poll_metrics(11_000, json!({"current_price": 150.0})));
        assert_eq!(rec.state().current_price, 200.0);
    }

    #[test]
    fn poll_takes_over_when_push_goes_silent() {
        let mut rec = TelemetryReconciler::new("S1");
        rec.apply(push_metrics(10_000, json!({"current_price": 200.0})));
        // 10 simulated seconds of push silence — well past the freshness window
        rec.apply(poll_metrics(20_000, json!({"current_price": 150.0})));
        assert_eq!(rec.state().current_price, 150.0);
    }

    #[test]
    fn fresh_poll_fills_fields_the_push_never_supplied() {
        let mut rec = TelemetryReconciler::new("S1");
        rec.apply(push_metrics(10_000, json!({"current_price": 200.0})));
        rec.apply(poll_metrics(
            11_000,
            json!({"current_price": 150.0, "entry_price": 180.0, "status": "running"}),
        ));
        // Overlapping field keeps the push value; the rest come from poll.
        assert_eq!(rec.state().current_price, 200.0);
        assert_eq!(rec.state().entry_price, 180.0);
        assert_eq!(rec.state().status, StrategyStatus::Running);
    }

    #[test]
    fn poll_candle_batch_fills_chart_when_push_carried_none() {
        let mut rec = TelemetryReconciler::new("S1");
        rec.apply(push_metrics(10_000, json!({"current_price": 200.0})));
        rec.apply(TelemetryEvent::Poll(PollSnapshot {
            received_at_ms: 11_000,
            metrics: json!({"current_price": 150.0}),
            audit_trail: Vec::new(),
            candles: Some(CandleBatch {
                candles: vec![candle(1, 100.0)],
                window: 1,
                signal_high: None,
                signal_low: None,
            }),
        }));
        assert_eq!(rec.state().chart_series.len(), 1);
        assert_eq!(rec.state().current_price, 200.0);
    }

    #[test]
    fn push_candle_batch_shields_poll_batch_while_fresh() {
        let mut rec = TelemetryReconciler::new("S1");
        rec.apply(TelemetryEvent::Push(PushUpdate {
            received_at_ms: 10_000,
            metrics: json!({}),
            log: None,
            logic_status: None,
            candles: Some(CandleBatch {
                candles: vec![candle(1, 100.0), candle(2, 101.0)],
                window: 2,
                signal_high: None,
                signal_low: None,
            }),
        }));
        rec.apply(TelemetryEvent::Poll(PollSnapshot {
            received_at_ms: 11_000,
            metrics: json!({}),
            audit_trail: Vec::new(),
            candles: Some(CandleBatch {
                candles: vec![candle(3, 102.0)],
                window: 1,
                signal_high: None,
                signal_low: None,
            }),
        }));
        assert_eq!(rec.state().chart_series.len(), 2);
    }

    #[test]
    fn not_found_poll_is_ignored_while_push_is_fresh() {
        let mut rec = TelemetryReconciler::new("S1");
        rec.apply(push_metrics(10_000, json!({"status": "running"})));
        rec.apply(TelemetryEvent::PollNotFound { received_at_ms: 11_000 });
        assert_eq!(rec.state().status, StrategyStatus::Running);
        // Once push goes silent the 404 is believed again.
        rec.apply(TelemetryEvent::PollNotFound { received_at_ms: 20_000 });
        assert_eq!(rec.state().status, StrategyStatus::NotRunning);
    }

    #[test]
    fn audit_trail_applies_even_when_push_is_fresh() {
        let mut rec = TelemetryReconciler::new("S1");
        rec.apply(push_metrics(10_000, json!({"current_price": 200.0})));
        rec.apply(TelemetryEvent::Poll(PollSnapshot {
            received_at_ms: 10_500,
            metrics: json!({"current_price": 1.0}),
            audit_trail: vec![AuditEntry {
                timestamp: "09:30:01".into(),
                action: "ORDER".into(),
                detail: "entry placed".into(),
            }],
            candles: None,
        }));
        assert_eq!(rec.state().current_price, 200.0);
        assert_eq!(rec.state().audit_trail.len(), 1);
    }

    #[test]
    fn activity_log_is_bounded_and_most_recent_first() {
        let mut rec = TelemetryReconciler::new("S1");
        for i in 0..250 {
            rec.apply(TelemetryEvent::Push(PushUpdate {
                received_at_ms: i,
                metrics: json!({}),
                log: Some(format!("entry {}", i)),
                logic_status: None,
                candles: None,
            }));
        }
        assert_eq!(rec.state().activity_log.len(), 200);
        assert_eq!(rec.state().activity_log[0].message, "entry 249");
        assert_eq!(rec.state().activity_log[199].message, "entry 50");
    }

    #[test]
    fn audit_trail_keeps_most_recent_100_in_insertion_order() {
        let mut rec = TelemetryReconciler::new("S1");
        for i in 0..130 {
            rec.apply(TelemetryEvent::Poll(PollSnapshot {
                received_at_ms: i,
                metrics: json!({}),
                audit_trail: vec![AuditEntry {
                    timestamp: format!("t{}", i),
                    action: "A".into(),
                    detail: String::new(),
                }],
                candles: None,
            }));
        }
        assert_eq!(rec.state().audit_trail.len(), 100);
        assert_eq!(rec.state().audit_trail[0].timestamp, "t30");
        assert_eq!(rec.state().audit_trail[99].timestamp, "t129");
    }

    #[test]
    fn market_ticks_are_bounded() {
        let mut rec = TelemetryReconciler::new("S1");
        for i in 0..150 {
            rec.apply(TelemetryEvent::Tick {
                received_at_ms: i,
                tick: MarketTick {
                    instrument_token: 1,
                    last_price: 100.0 + i as f64,
                    timestamp: i,
                    volume: 0.0,
                },
            });
        }
        assert_eq!(rec.state().market_ticks.len(), 100);
        assert_eq!(rec.state().market_ticks[0].last_price, 249.0);
        assert_eq!(rec.state().current_price, 249.0);
    }

    #[test]
    fn candle_batch_replaces_wholesale_and_honours_window() {
        let mut rec = TelemetryReconciler::new("S1");
        let batch = CandleBatch {
            candles: (0..300).map(|i| candle(i, i as f64)).collect(),
            window: 200,
            signal_high: None,
            signal_low: None,
        };
        rec.apply(TelemetryEvent::Push(PushUpdate {
            received_at_ms: 0,
            metrics: json!({}),
            log: None,
            logic_status: None,
            candles: Some(batch),
        }));
        let series = &rec.state().chart_series;
        assert_eq!(series.len(), 200);
        // most-recent last
        assert_eq!(series.first().unwrap().timestamp, 100);
        assert_eq!(series.last().unwrap().timestamp, 299);
    }

    #[test]
    fn tick_overlays_newest_chart_point_without_touching_ohlc() {
        let mut rec = TelemetryReconciler::new("S1");
        rec.apply(TelemetryEvent::Push(PushUpdate {
            received_at_ms: 0,
            metrics: json!({}),
            log: None,
            logic_status: None,
            candles: Some(CandleBatch {
                candles: vec![candle(1, 100.0), candle(2, 101.0)],
                window: 2,
                signal_high: None,
                signal_low: None,
            }),
        }));
        rec.apply(TelemetryEvent::Tick {
            received_at_ms: 10,
            tick: MarketTick {
                instrument_token: 1,
                last_price: 103.25,
                timestamp: 10,
                volume: 5.0,
            },
        });
        assert_eq!(rec.state().chart_live_price, Some(103.25));
        assert_eq!(rec.state().chart_series[1].close, 101.0);
    }

    #[test]
    fn new_batch_clears_the_live_overlay() {
        let mut rec = TelemetryReconciler::new("S1");
        let batch = |w| CandleBatch {
            candles: vec![candle(1, 100.0)],
            window: w,
            signal_high: None,
            signal_low: None,
        };
        rec.apply(TelemetryEvent::Push(PushUpdate {
            received_at_ms: 0,
            metrics: json!({}),
            log: None,
            logic_status: None,
            candles: Some(batch(1)),
        }));
        rec.apply(TelemetryEvent::Tick {
            received_at_ms: 1,
            tick: MarketTick { instrument_token: 1, last_price: 99.0, timestamp: 1, volume: 0.0 },
        });
        assert!(rec.state().chart_live_price.is_some());
        rec.apply(TelemetryEvent::Push(PushUpdate {
            received_at_ms: 2,
            metrics: json!({}),
            log: None,
            logic_status: None,
            candles: Some(batch(1)),
        }));
        assert_eq!(rec.state().chart_live_price, None);
    }

    #[test]
    fn not_found_poll_yields_displayable_not_running_state() {
        let mut rec = TelemetryReconciler::new("S1");
        rec.apply(TelemetryEvent::PollNotFound { received_at_ms: 500 });
        assert_eq!(rec.state().status, StrategyStatus::NotRunning);
        assert_eq!(rec.state().strategy_name, "Strategy not running");
    }

    #[test]
    fn partial_snapshot_never_zeroes_previous_values() {
        let mut rec = TelemetryReconciler::new("S1");
        rec.apply(poll_metrics(0, json!({"entry_price": 150.0, "quantity": 50})));
        rec.apply(poll_metrics(2_000, json!({"current_price": 151.0})));
        assert_eq!(rec.state().entry_price, 150.0);
        assert_eq!(rec.state().quantity, 50.0);
        assert_eq!(rec.state().current_price, 151.0);
    }

    #[test]
    fn unparsable_numerics_coerce_to_zero() {
        let mut rec = TelemetryReconciler::new("S1");
        rec.apply(poll_metrics(
            0,
            json!({"current_price": "not-a-number", "quantity": "", "pnl": "12.5"}),
        ));
        assert_eq!(rec.state().current_price, 0.0);
        assert_eq!(rec.state().quantity, 0.0);
        assert_eq!(rec.state().current_pnl, 12.5);
    }

    #[test]
    fn option_legs_fill_per_moneyness_bucket() {
        let mut rec = TelemetryReconciler::new("S1");
        rec.apply(poll_metrics(
            0,
            json!({"atm_ce": "101.2", "atm_pe": 98.4, "atm_plus_2_ce": 55.0}),
        ));
        let legs = &rec.state().option_legs;
        assert_eq!(legs[&MoneynessBucket::Atm].ce, 101.2);
        assert_eq!(legs[&MoneynessBucket::Atm].pe, 98.4);
        assert_eq!(legs[&MoneynessBucket::AtmPlus2].ce, 55.0);
        assert!(!legs.contains_key(&MoneynessBucket::AtmMinus2));
    }

    #[test]
    fn identical_log_redelivery_is_not_deduplicated() {
        // Log entries are arrival-stamped with no source identity, so the
        // guarantee is ordering-only.
        let mut rec = TelemetryReconciler::new("S1");
        for t in [0, 1] {
            rec.apply(TelemetryEvent::Push(PushUpdate {
                received_at_ms: t,
                metrics: json!({}),
                log: Some("Entry order placed".into()),
                logic_status: None,
                candles: None,
            }));
        }
        assert_eq!(rec.state().activity_log.len(), 2);
    }
}
