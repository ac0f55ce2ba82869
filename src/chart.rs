//! Pure projection of LiveState into a plot-ready series with overlay
//! reference levels. Produces data, never pixels, and never mutates state.

use crate::types::{LiveState, Position};

#[derive(Clone, Debug, PartialEq)]
pub struct PlotPoint {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trend_value: f64,
    /// Live tick overlay, present only on the newest point.
    pub live_price: Option<f64>,
    pub signal_candidate: bool,
}

/// Horizontal reference levels drawn over the candle series. A level is None
/// when the state has nothing meaningful for it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OverlayLevels {
    pub signal_high: Option<f64>,
    pub signal_low: Option<f64>,
    pub stop_loss: Option<f64>,
    pub target: Option<f64>,
    pub entry: Option<f64>,
    /// Directional breakout level: long positions watch the signal high,
    /// shorts the signal low.
    pub breakout: Option<f64>,
}

fn level(v: f64) -> Option<f64> {
    if v > 0.0 {
        Some(v)
    } else {
        None
    }
}

/// One point per candle in the latest batch. The two most recent slots are
/// eligible as signal-candle candidates when the batch carries a positive
/// signal high or low.
pub fn assemble_series(state: &LiveState) -> Vec<PlotPoint> {
    let len = state.chart_series.len();
    let has_signal = state.signal_candle_high > 0.0 || state.signal_candle_low > 0.0;

    state
        .chart_series
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let newest = i + 1 == len;
            PlotPoint {
                time: c.timestamp,
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
                volume: c.volume,
                trend_value: c.trend_value,
                live_price: if newest { state.chart_live_price } else { None },
                signal_candidate: has_signal && i + 2 >= len,
            }
        })
        .collect()
}

pub fn assemble_overlays(state: &LiveState) -> OverlayLevels {
    let breakout = match state.position {
        Position::Long => level(state.signal_candle_high),
        Position::Short => level(state.signal_candle_low),
        Position::Flat => None,
    };
    OverlayLevels {
        signal_high: level(state.signal_candle_high),
        signal_low: level(state.signal_candle_low),
        stop_loss: level(state.stop_loss),
        target: level(state.target_profit),
        entry: level(state.entry_price),
        breakout,
    }
}
