//! Live strategy telemetry core.
//!
//! Reconciles overlapping updates from a push channel and a polling
//! fallback into one bounded, continuously-updating LiveState per watched
//! strategy, and models the declarative indicator/rule definitions the
//! execution engine consumes.

pub mod channel;
pub mod chart;
pub mod coerce;
pub mod config;
pub mod reconciler;
pub mod rest_api;
pub mod session;
pub mod strategy_model;
pub mod types;
pub mod wire;

pub use reconciler::{CandleBatch, PollSnapshot, PushUpdate, TelemetryEvent, TelemetryReconciler};
pub use session::MonitoringSession;
pub use strategy_model::{StrategyDefinition, StrategyType};
pub use types::LiveState;
