//! Declarative strategy authoring model: indicators + entry/exit rule trees.
//! Pure data and validation — persistence is the REST collaborator's job.

use serde_json::{json, Value};
use std::collections::BTreeMap;

// ── Indicator catalog ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndicatorKind {
    Ema,
    Sma,
    Rsi,
    Macd,
    Bollinger,
    Vwap,
    Supertrend,
    Stochastic,
}

impl IndicatorKind {
    pub const CATALOG: [IndicatorKind; 8] = [
        IndicatorKind::Ema,
        IndicatorKind::Sma,
        IndicatorKind::Rsi,
        IndicatorKind::Macd,
        IndicatorKind::Bollinger,
        IndicatorKind::Vwap,
        IndicatorKind::Supertrend,
        IndicatorKind::Stochastic,
    ];

    /// Stable key used both in the model and on the wire.
    pub fn key(&self) -> &'static str {
        match self {
            IndicatorKind::Ema => "ema",
            IndicatorKind::Sma => "sma",
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Macd => "macd",
            IndicatorKind::Bollinger => "bollinger",
            IndicatorKind::Vwap => "vwap",
            IndicatorKind::Supertrend => "supertrend",
            IndicatorKind::Stochastic => "stochastic",
        }
    }

    pub fn default_params(&self) -> Vec<(&'static str, f64)> {
        match self {
            IndicatorKind::Ema => vec![("period", 12.0)],
            IndicatorKind::Sma => vec![("period", 20.0)],
            IndicatorKind::Rsi => vec![("period", 14.0)],
            IndicatorKind::Macd => vec![("fast", 12.0), ("slow", 26.0), ("signal", 9.0)],
            IndicatorKind::Bollinger => vec![("period", 20.0), ("std_dev", 2.0)],
            IndicatorKind::Vwap => vec![],
            IndicatorKind::Supertrend => vec![("period", 10.0), ("multiplier", 3.0)],
            IndicatorKind::Stochastic => vec![("k_period", 14.0), ("d_period", 3.0)],
        }
    }
}

#[derive(Clone, Debug)]
pub struct Indicator {
    pub kind: IndicatorKind,
    /// name → value; BTreeMap keeps serialization deterministic.
    pub params: BTreeMap<String, f64>,
}

// ── Rules ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOperator {
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Equal,
    CrossAbove,
    CrossBelow,
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::Equal => "=",
            ComparisonOperator::CrossAbove => "cross-above",
            ComparisonOperator::CrossBelow => "cross-below",
        }
    }
}

/// How a condition chains onto the accumulated boolean to its left.
/// Ignored for the first condition in a rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
    None,
}

impl Combinator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
            Combinator::None => "none",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RulePhase {
    Entry,
    Exit,
}

#[derive(Clone, Debug)]
pub struct Condition {
    pub id: u32,
    pub indicator_ref: String,
    pub operator: ComparisonOperator,
    pub threshold: f64,
    pub combinator: Combinator,
    pub phase: RulePhase,
}

/// Conditions evaluate strictly left-to-right via their combinators — no
/// precedence, no grouping beyond sequence order.
#[derive(Clone, Debug)]
pub struct Rule {
    pub id: u32,
    pub name: String,
    pub phase: RulePhase,
    pub conditions: Vec<Condition>,
}

// ── Strategy definition ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyType {
    OpeningRangeBreakout,
    SignalCapture,
    Custom,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::OpeningRangeBreakout => "opening-range-breakout",
            StrategyType::SignalCapture => "signal-capture",
            StrategyType::Custom => "custom",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RiskParams {
    pub stop_loss_pct: f64,
    pub target_profit_pct: f64,
    pub trailing_stop_pct: f64,
    pub lot_size: u32,
}

impl Default for RiskParams {
    fn default() -> Self {
        RiskParams {
            stop_loss_pct: 1.0,
            target_profit_pct: 2.0,
            trailing_stop_pct: 0.0,
            lot_size: 1,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct OptionParams {
    pub trade_type: String,
    pub strike_selection: String,
    pub expiry_type: String,
}

#[derive(Clone, Debug)]
pub struct StrategyDefinition {
    pub id: Option<String>,
    pub name: String,
    pub strategy_type: StrategyType,
    pub instrument: String,
    pub segment: String,
    pub timeframe: String,
    pub execution_start: String,
    pub execution_end: String,
    pub risk: RiskParams,
    pub options: OptionParams,
    pub paper_trade: bool,
    pub indicators: Vec<Indicator>,
    pub entry_rules: Vec<Rule>,
    pub exit_rules: Vec<Rule>,
    next_id: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Outcome of `validate()`: blocking errors refuse a save, warnings do not.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<FieldError>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl StrategyDefinition {
    pub fn new(name: &str, strategy_type: StrategyType) -> Self {
        StrategyDefinition {
            id: None,
            name: name.to_string(),
            strategy_type,
            instrument: String::new(),
            segment: String::new(),
            timeframe: "5m".to_string(),
            execution_start: "09:20".to_string(),
            execution_end: "15:10".to_string(),
            risk: RiskParams::default(),
            options: OptionParams::default(),
            paper_trade: true,
            indicators: Vec::new(),
            entry_rules: Vec::new(),
            exit_rules: Vec::new(),
            next_id: 1,
        }
    }

    fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Toggle semantics: selecting an already-selected kind removes it,
    /// otherwise the indicator is appended with catalog defaults.
    pub fn add_indicator(&mut self, kind: IndicatorKind) {
        if let Some(pos) = self.indicators.iter().position(|i| i.kind == kind) {
            self.indicators.remove(pos);
            return;
        }
        let params = kind
            .default_params()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.indicators.push(Indicator { kind, params });
    }

    /// Removes by catalog key. Referencing conditions are left in place;
    /// `validate()` reports them as dangling.
    pub fn remove_indicator(&mut self, key: &str) {
        self.indicators.retain(|i| i.kind.key() != key);
    }

    pub fn set_indicator_param(&mut self, key: &str, param: &str, value: f64) {
        if let Some(ind) = self.indicators.iter_mut().find(|i| i.kind.key() == key) {
            ind.params.insert(param.to_string(), value);
        }
    }

    pub fn add_rule(&mut self, phase: RulePhase) -> u32 {
        let id = self.fresh_id();
        let rules = match phase {
            RulePhase::Entry => &mut self.entry_rules,
            RulePhase::Exit => &mut self.exit_rules,
        };
        let name = match phase {
            RulePhase::Entry => format!("Entry Rule {}", rules.len() + 1),
            RulePhase::Exit => format!("Exit Rule {}", rules.len() + 1),
        };
        rules.push(Rule { id, name, phase, conditions: Vec::new() });
        id
    }

    pub fn remove_rule(&mut self, rule_id: u32) {
        self.entry_rules.retain(|r| r.id != rule_id);
        self.exit_rules.retain(|r| r.id != rule_id);
    }

    /// Appends a condition with defaults: first selected indicator (or empty
    /// ref), `>`, threshold 0, combinator AND. Returns None if the rule does
    /// not exist.
    pub fn add_condition(&mut self, rule_id: u32) -> Option<u32> {
        let default_ref = self
            .indicators
            .first()
            .map(|i| i.kind.key().to_string())
            .unwrap_or_default();
        let id = self.fresh_id();
        let rule = self.find_rule_mut(rule_id)?;
        let phase = rule.phase;
        rule.conditions.push(Condition {
            id,
            indicator_ref: default_ref,
            operator: ComparisonOperator::GreaterThan,
            threshold: 0.0,
            combinator: Combinator::And,
            phase,
        });
        Some(id)
    }

    pub fn remove_condition(&mut self, rule_id: u32, condition_id: u32) {
        if let Some(rule) = self.find_rule_mut(rule_id) {
            rule.conditions.retain(|c| c.id != condition_id);
        }
    }

    pub fn find_rule_mut(&mut self, rule_id: u32) -> Option<&mut Rule> {
        self.entry_rules
            .iter_mut()
            .chain(self.exit_rules.iter_mut())
            .find(|r| r.id == rule_id)
    }

    fn indicator_selected(&self, key: &str) -> bool {
        self.indicators.iter().any(|i| i.kind.key() == key)
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.name.trim().is_empty() {
            report.errors.push(FieldError {
                field: "strategy-name".into(),
                message: "Strategy name is required".into(),
            });
        }

        if self.strategy_type == StrategyType::Custom {
            let has_usable_entry = self
                .entry_rules
                .iter()
                .any(|r| !r.conditions.is_empty());
            if !has_usable_entry {
                report.errors.push(FieldError {
                    field: "entry_rules".into(),
                    message: "A custom strategy needs at least one entry rule with a condition"
                        .into(),
                });
            }

            // Dangling-reference policy: a condition pointing at an unselected
            // indicator blocks the save rather than being silently ignored.
            for rule in self.entry_rules.iter().chain(self.exit_rules.iter()) {
                for cond in &rule.conditions {
                    if cond.indicator_ref.is_empty() {
                        report.errors.push(FieldError {
                            field: format!("rule:{}", rule.name),
                            message: "Condition has no indicator selected".into(),
                        });
                    } else if !self.indicator_selected(&cond.indicator_ref) {
                        report.errors.push(FieldError {
                            field: format!("rule:{}", rule.name),
                            message: format!(
                                "Condition references removed indicator '{}'",
                                cond.indicator_ref
                            ),
                        });
                    }
                }
            }

            if self.exit_rules.iter().all(|r| r.conditions.is_empty()) {
                report
                    .warnings
                    .push("No exit rules defined — exits rely on stop-loss/target only".into());
            }
        }

        report
    }

    /// Maps the model onto the wire schema for `POST /strategy/save`.
    /// Ordering indices are re-numbered sequentially so the payload never
    /// carries gaps from removed rules/conditions.
    pub fn serialize(&self) -> Value {
        let indicators: Vec<Value> = self
            .indicators
            .iter()
            .map(|i| {
                json!({
                    "indicator": i.kind.key(),
                    "params": i.params,
                })
            })
            .collect();

        json!({
            "strategy": self.strategy_type.as_str(),
            "strategy-name": self.name,
            "instrument": self.instrument,
            "segment": self.segment,
            "candle-time": self.timeframe,
            "execution-start": self.execution_start,
            "execution-end": self.execution_end,
            "stop-loss": self.risk.stop_loss_pct,
            "target-profit": self.risk.target_profit_pct,
            "trailing-stop-loss": self.risk.trailing_stop_pct,
            "total-lot": self.risk.lot_size,
            "trade-type": self.options.trade_type,
            "strike-price": self.options.strike_selection,
            "expiry-type": self.options.expiry_type,
            "paper_trade": self.paper_trade,
            "indicators": indicators,
            "entry_rules": serialize_rules(&self.entry_rules),
            "exit_rules": serialize_rules(&self.exit_rules),
        })
    }
}

fn serialize_rules(rules: &[Rule]) -> Vec<Value> {
    rules
        .iter()
        .enumerate()
        .map(|(ri, rule)| {
            let conditions: Vec<Value> = rule
                .conditions
                .iter()
                .enumerate()
                .map(|(ci, c)| {
                    json!({
                        "order": ci + 1,
                        "indicator": c.indicator_ref,
                        "operator": c.operator.as_str(),
                        "threshold": c.threshold,
                        "combinator": if ci == 0 { Combinator::None.as_str() } else { c.combinator.as_str() },
                    })
                })
                .collect();
            json!({
                "order": ri + 1,
                "name": rule.name,
                "conditions": conditions,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom_with_one_rule() -> StrategyDefinition {
        let mut def = StrategyDefinition::new("Breakout v2", StrategyType::Custom);
        def.add_indicator(IndicatorKind::Ema);
        let rule = def.add_rule(RulePhase::Entry);
        def.add_condition(rule).unwrap();
        def
    }

    #[test]
    fn indicator_selection_toggles() {
        let mut def = StrategyDefinition::new("t", StrategyType::Custom);
        def.add_indicator(IndicatorKind::Rsi);
        assert_eq!(def.indicators.len(), 1);
        assert_eq!(def.indicators[0].params.get("period"), Some(&14.0));
        def.add_indicator(IndicatorKind::Rsi);
        assert!(def.indicators.is_empty());
    }

    #[test]
    fn custom_without_entry_rules_is_blocking() {
        let def = StrategyDefinition::new("t", StrategyType::Custom);
        let report = def.validate();
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.field == "entry_rules"));
    }

    #[test]
    fn custom_with_rule_and_condition_is_valid() {
        let def = custom_with_one_rule();
        let report = def.validate();
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn empty_rules_do_not_satisfy_the_entry_requirement() {
        let mut def = StrategyDefinition::new("t", StrategyType::Custom);
        def.add_rule(RulePhase::Entry);
        def.add_rule(RulePhase::Entry);
        assert!(!def.validate().is_valid());
    }

    #[test]
    fn empty_name_is_always_blocking() {
        let def = StrategyDefinition::new("  ", StrategyType::OpeningRangeBreakout);
        let report = def.validate();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].field, "strategy-name");
    }

    #[test]
    fn missing_exit_rules_is_a_warning_only() {
        let def = custom_with_one_rule();
        let report = def.validate();
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn removed_indicator_leaves_condition_and_validation_flags_it() {
        let mut def = custom_with_one_rule();
        def.remove_indicator("ema");
        assert_eq!(def.entry_rules[0].conditions.len(), 1);
        let report = def.validate();
        assert!(report
            .errors
            .iter()
            .any(|e| e.message.contains("removed indicator 'ema'")));
    }

    #[test]
    fn condition_defaults_follow_first_selected_indicator() {
        let mut def = StrategyDefinition::new("t", StrategyType::Custom);
        def.add_indicator(IndicatorKind::Supertrend);
        def.add_indicator(IndicatorKind::Ema);
        let rule = def.add_rule(RulePhase::Entry);
        def.add_condition(rule).unwrap();
        let cond = &def.entry_rules[0].conditions[0];
        assert_eq!(cond.indicator_ref, "supertrend");
        assert_eq!(cond.operator, ComparisonOperator::GreaterThan);
        assert_eq!(cond.threshold, 0.0);
        assert_eq!(cond.combinator, Combinator::And);
    }

    #[test]
    fn serialize_maps_onto_the_wire_schema() {
        let mut def = custom_with_one_rule();
        def.instrument = "NIFTY".into();
        def.entry_rules[0].conditions[0].threshold = 100.0;
        let wire = def.serialize();

        assert_eq!(wire["strategy"], "custom");
        assert_eq!(wire["strategy-name"], "Breakout v2");
        assert_eq!(wire["instrument"], "NIFTY");
        let entry_rules = wire["entry_rules"].as_array().unwrap();
        assert_eq!(entry_rules.len(), 1);
        let conds = entry_rules[0]["conditions"].as_array().unwrap();
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0]["indicator"], "ema");
        assert_eq!(conds[0]["operator"], ">");
        assert_eq!(conds[0]["threshold"], 100.0);
        // first condition's combinator is suppressed
        assert_eq!(conds[0]["combinator"], "none");
    }

    #[test]
    fn serialize_renumbers_after_removals() {
        let mut def = custom_with_one_rule();
        let rule_id = def.entry_rules[0].id;
        def.add_condition(rule_id).unwrap();
        def.add_condition(rule_id).unwrap();
        let middle = def.entry_rules[0].conditions[1].id;
        def.remove_condition(rule_id, middle);

        let wire = def.serialize();
        let conds = wire["entry_rules"][0]["conditions"].as_array().unwrap();
        let orders: Vec<i64> = conds.iter().map(|c| c["order"].as_i64().unwrap()).collect();
        assert_eq!(orders, vec![1, 2]);
    }

    #[test]
    fn sequential_default_rule_names() {
        let mut def = StrategyDefinition::new("t", StrategyType::Custom);
        def.add_rule(RulePhase::Entry);
        def.add_rule(RulePhase::Entry);
        def.add_rule(RulePhase::Exit);
        assert_eq!(def.entry_rules[1].name, "Entry Rule 2");
        assert_eq!(def.exit_rules[0].name, "Exit Rule 1");
    }
}
