//! Parsing of backend payloads into reconciler inputs. Both the real-time
//! channel and the poll collaborator serve overlapping shapes, so the
//! helpers live here rather than in either transport.

use serde_json::Value;

use crate::coerce::{field_f64, field_str, to_f64, to_i64};
use crate::reconciler::CandleBatch;
use crate::types::{AuditEntry, Candle, ConditionStatus, MarketTick};

pub fn parse_candle(v: &Value) -> Candle {
    Candle {
        timestamp: to_i64(v.get("timestamp").or_else(|| v.get("time")).or_else(|| v.get("start")).unwrap_or(&Value::Null)),
        open: to_f64(v.get("open").unwrap_or(&Value::Null)),
        high: to_f64(v.get("high").unwrap_or(&Value::Null)),
        low: to_f64(v.get("low").unwrap_or(&Value::Null)),
        close: to_f64(v.get("close").unwrap_or(&Value::Null)),
        volume: to_f64(v.get("volume").unwrap_or(&Value::Null)),
        trend_value: field_f64(v, &["trend_value", "supertrend", "trend"]).unwrap_or(0.0),
    }
}

/// Extracts a candle batch from a payload that carries `historical_candles`.
/// The window length is server-provided; when absent the batch's own length
/// is the window.
pub fn parse_candle_batch(body: &Value) -> Option<CandleBatch> {
    let arr = body.get("historical_candles")?.as_array()?;
    if arr.is_empty() {
        return None;
    }
    let candles: Vec<Candle> = arr.iter().map(parse_candle).collect();
    let window = body
        .get("chart_window")
        .or_else(|| body.get("window"))
        .map(to_i64)
        .filter(|w| *w > 0)
        .map(|w| w as usize)
        .unwrap_or(candles.len());
    Some(CandleBatch {
        candles,
        window,
        signal_high: field_f64(body, &["signal_candle_high", "signalCandleHigh"]),
        signal_low: field_f64(body, &["signal_candle_low", "signalCandleLow"]),
    })
}

pub fn parse_audit_entries(body: &Value) -> Vec<AuditEntry> {
    body.get("audit_trail")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|e| AuditEntry {
                    timestamp: field_str(e, &["timestamp", "time"]).unwrap_or_default(),
                    action: field_str(e, &["action", "event"]).unwrap_or_default(),
                    detail: field_str(e, &["detail", "details", "message"]).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_logic_statuses(body: &Value) -> Option<Vec<ConditionStatus>> {
    let arr = body.get("logic_status")?.as_array()?;
    Some(
        arr.iter()
            .map(|e| ConditionStatus {
                indicator: field_str(e, &["indicator", "indicator_ref"]).unwrap_or_default(),
                description: field_str(e, &["description", "condition"]).unwrap_or_default(),
                satisfied: e
                    .get("satisfied")
                    .or_else(|| e.get("status"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
            .collect(),
    )
}

pub fn parse_market_tick(body: &Value) -> MarketTick {
    MarketTick {
        instrument_token: to_i64(body.get("instrument_token").unwrap_or(&Value::Null)),
        last_price: to_f64(body.get("last_price").unwrap_or(&Value::Null)),
        timestamp: to_i64(body.get("timestamp").unwrap_or(&Value::Null)),
        volume: to_f64(body.get("volume").unwrap_or(&Value::Null)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candles_coerce_string_fields() {
        let c = parse_candle(&json!({
            "time": "1700000000",
            "open": "101.5", "high": 103, "low": null, "close": "102.25",
            "volume": "", "supertrend": "101.9"
        }));
        assert_eq!(c.timestamp, 1_700_000_000);
        assert_eq!(c.open, 101.5);
        assert_eq!(c.low, 0.0);
        assert_eq!(c.volume, 0.0);
        assert_eq!(c.trend_value, 101.9);
    }

    #[test]
    fn batch_window_defaults_to_batch_length() {
        let body = json!({"historical_candles": [{"close": 1}, {"close": 2}]});
        let batch = parse_candle_batch(&body).unwrap();
        assert_eq!(batch.window, 2);

        let body = json!({"historical_candles": [{"close": 1}], "chart_window": 200});
        assert_eq!(parse_candle_batch(&body).unwrap().window, 200);
    }

    #[test]
    fn empty_batch_is_no_batch() {
        assert!(parse_candle_batch(&json!({"historical_candles": []})).is_none());
        assert!(parse_candle_batch(&json!({})).is_none());
    }

    #[test]
    fn audit_entries_tolerate_alias_names() {
        let body = json!({"audit_trail": [
            {"time": "09:15", "event": "START", "message": "strategy armed"}
        ]});
        let entries = parse_audit_entries(&body);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].timestamp, "09:15");
        assert_eq!(entries[0].action, "START");
        assert_eq!(entries[0].detail, "strategy armed");
    }
}
