use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::config::{ACTIVITY_LOG_CAPACITY, AUDIT_TRAIL_CAPACITY, MARKET_TICKS_CAPACITY};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Trend indicator value the backend attaches per candle (e.g. supertrend).
    pub trend_value: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Position {
    Long,
    Short,
    Flat,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StrategyStatus {
    Idle,
    Running,
    InPosition,
    Stopped,
    NotRunning,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Idle => "idle",
            StrategyStatus::Running => "running",
            StrategyStatus::InPosition => "in_position",
            StrategyStatus::Stopped => "stopped",
            StrategyStatus::NotRunning => "not_running",
        }
    }

    /// Lenient mapping from backend status text.
    pub fn parse(text: &str) -> StrategyStatus {
        match text.to_ascii_lowercase().as_str() {
            "running" | "active" | "live" => StrategyStatus::Running,
            "in_position" | "position_open" | "entered" => StrategyStatus::InPosition,
            "stopped" | "exited" | "complete" | "completed" => StrategyStatus::Stopped,
            "not_running" | "not_found" => StrategyStatus::NotRunning,
            _ => StrategyStatus::Idle,
        }
    }
}

/// Option legs are quoted per moneyness bucket, CE and PE side by side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MoneynessBucket {
    AtmMinus2,
    Atm,
    AtmPlus2,
}

impl MoneynessBucket {
    pub const ALL: [MoneynessBucket; 3] = [
        MoneynessBucket::AtmMinus2,
        MoneynessBucket::Atm,
        MoneynessBucket::AtmPlus2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MoneynessBucket::AtmMinus2 => "atm_minus_2",
            MoneynessBucket::Atm => "atm",
            MoneynessBucket::AtmPlus2 => "atm_plus_2",
        }
    }

    pub fn ce_key(&self) -> &'static str {
        match self {
            MoneynessBucket::AtmMinus2 => "atm_minus_2_ce",
            MoneynessBucket::Atm => "atm_ce",
            MoneynessBucket::AtmPlus2 => "atm_plus_2_ce",
        }
    }

    pub fn pe_key(&self) -> &'static str {
        match self {
            MoneynessBucket::AtmMinus2 => "atm_minus_2_pe",
            MoneynessBucket::Atm => "atm_pe",
            MoneynessBucket::AtmPlus2 => "atm_plus_2_pe",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OptionLegPrices {
    pub ce: f64,
    pub pe: f64,
}

/// One line of the activity feed. Timestamped at arrival — the backend does
/// not assign log entries an identity, so duplicate delivery produces
/// duplicate entries (best-effort, ordering-only guarantee).
#[derive(Clone, Debug)]
pub struct ActivityEntry {
    pub received_at_ms: i64,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub timestamp: String,
    pub action: String,
    pub detail: String,
}

#[derive(Clone, Debug)]
pub struct MarketTick {
    pub instrument_token: i64,
    pub last_price: f64,
    pub timestamp: i64,
    pub volume: f64,
}

/// Per-condition evaluation status pushed by the execution engine.
#[derive(Clone, Debug)]
pub struct ConditionStatus {
    pub indicator: String,
    pub description: String,
    pub satisfied: bool,
}

/// Canonical, continuously-updated snapshot of one running strategy.
/// Mutated exclusively by the reconciler; everything else reads.
#[derive(Clone, Debug)]
pub struct LiveState {
    pub strategy_id: String,
    pub strategy_name: String,
    pub status: StrategyStatus,
    pub status_message: String,

    pub current_price: f64,
    pub entry_price: f64,
    pub current_pnl: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub quantity: f64,
    pub position: Position,

    pub instrument: String,
    pub instrument_token: i64,
    pub option_legs: HashMap<MoneynessBucket, OptionLegPrices>,

    pub entry_order_id: String,
    pub stop_loss_order_id: String,
    pub target_order_id: String,

    pub stop_loss: f64,
    pub target_profit: f64,

    pub signal_status: String,
    pub signal_candle_high: f64,
    pub signal_candle_low: f64,
    pub signal_candle_time: String,

    pub paper_trade: bool,
    pub last_update_ms: i64,

    pub logic_status: Vec<ConditionStatus>,

    /// Most-recent-first, capped at 200.
    pub activity_log: VecDeque<ActivityEntry>,
    /// Insertion order, most recent 100 kept.
    pub audit_trail: VecDeque<AuditEntry>,
    /// Most-recent-first, capped at 100.
    pub market_ticks: VecDeque<MarketTick>,
    /// Chronological; replaced wholesale per candle batch, capacity set by the
    /// batch's server-provided window length.
    pub chart_series: Vec<Candle>,
    /// Live overlay price on the newest chart point (ticks never rewrite OHLC).
    pub chart_live_price: Option<f64>,
}

impl LiveState {
    pub fn new(strategy_id: &str) -> Self {
        LiveState {
            strategy_id: strategy_id.to_string(),
            strategy_name: String::new(),
            status: StrategyStatus::Idle,
            status_message: String::new(),
            current_price: 0.0,
            entry_price: 0.0,
            current_pnl: 0.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            quantity: 0.0,
            position: Position::Flat,
            instrument: String::new(),
            instrument_token: 0,
            option_legs: HashMap::new(),
            entry_order_id: String::new(),
            stop_loss_order_id: String::new(),
            target_order_id: String::new(),
            stop_loss: 0.0,
            target_profit: 0.0,
            signal_status: String::new(),
            signal_candle_high: 0.0,
            signal_candle_low: 0.0,
            signal_candle_time: String::new(),
            paper_trade: false,
            last_update_ms: 0,
            logic_status: Vec::new(),
            activity_log: VecDeque::with_capacity(ACTIVITY_LOG_CAPACITY),
            audit_trail: VecDeque::with_capacity(AUDIT_TRAIL_CAPACITY),
            market_ticks: VecDeque::with_capacity(MARKET_TICKS_CAPACITY),
            chart_series: Vec::new(),
            chart_live_price: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}
