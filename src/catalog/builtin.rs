//! Contracts for the platform-provided node types.

use serde_json::Value;

use super::rules::{
    collect, cross_param_error, fraction, int_at_least, int_in_range, non_empty_array,
    non_negative_number, one_of, param_error, positive_number, string_array,
};
use super::schema::{
    Arity, ColumnRequirement, DataSchema, DataShape, InputContract, OutputSchemaResolver,
    ParamKind,
};
use super::{NodeTypeContract, RuntimeKind};
use crate::dsl::{NodeDeclaration, Params, ValidationError};

pub const OHLCV_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

pub const INDICATORS: [&str; 5] = ["SMA", "EMA", "RSI", "MACD", "BB"];
pub const TIMEFRAMES: [&str; 8] = ["1m", "5m", "15m", "30m", "1h", "4h", "1d", "1w"];
pub const LABELING_METHODS: [&str; 8] = [
    "future_returns",
    "crossover",
    "threshold",
    "pattern",
    "rsi_signals",
    "bollinger_signals",
    "macd_signals",
    "multi_class",
];
pub const AGGREGATE_OPS: [&str; 7] = ["sum", "mean", "min", "max", "count", "first", "last"];
const FILL_NA_METHODS: [&str; 4] = ["forward", "backward", "drop", "zero"];
const SHAPES: [&str; 4] = ["dataframe", "signals", "backtest_results", "any"];

pub const DEFAULT_FAST_PERIOD: i64 = 20;
pub const DEFAULT_SLOW_PERIOD: i64 = 50;
pub const DEFAULT_SIGNAL_COLUMN: &str = "signal";
const MAX_SCRIPT_INPUTS: usize = 8;

pub fn contracts() -> Vec<NodeTypeContract> {
    use ParamKind::*;
    let tabular = [DataShape::Dataframe, DataShape::Signals];

    vec![
        NodeTypeContract::new("InlineDataNode", RuntimeKind::Builtin)
            .describe("Emit a dataframe from records embedded in the pipeline")
            .required("rows", Array)
            .optional("columns", Array)
            .output(OutputSchemaResolver::Derived(inline_output))
            .rule(inline_rules),
        NodeTypeContract::new("DataLoaderNode", RuntimeKind::Python)
            .describe("Load OHLCV market data from a dataset file")
            .required("symbol", String)
            .required("timeframe", String)
            .required("dataset", String)
            .optional("start_date", String)
            .optional("end_date", String)
            .optional("columns", Array)
            .output(OutputSchemaResolver::Derived(loader_output))
            .rule(data_loader_rules),
        NodeTypeContract::new("IndicatorNode", RuntimeKind::Builtin)
            .describe("Compute a technical indicator column")
            .required("indicator", String)
            .required("period", Integer)
            .optional("column", String)
            .optional("fast_period", Integer)
            .optional("slow_period", Integer)
            .optional("signal_period", Integer)
            .optional("std_dev", Number)
            .input(
                InputContract::new(Arity::exactly(1), &tabular)
                    .requiring(ColumnRequirement::Derived(indicator_columns)),
            )
            .output(OutputSchemaResolver::Derived(indicator_output))
            .rule(indicator_rules),
        NodeTypeContract::new("CrossoverSignalNode", RuntimeKind::Builtin)
            .describe("Generate buy/sell signals from moving average crossovers")
            .optional("fast_period", Integer)
            .optional("slow_period", Integer)
            .optional("signal_column", String)
            .optional("fast_ma_column", String)
            .optional("slow_ma_column", String)
            .optional("buy_threshold", Number)
            .optional("sell_threshold", Number)
            .optional("confirmation_periods", Integer)
            .input(
                InputContract::new(Arity::range(1, 2), &[DataShape::Dataframe])
                    .requiring(ColumnRequirement::Derived(crossover_columns)),
            )
            .output(OutputSchemaResolver::Derived(crossover_output))
            .rule(crossover_rules),
        NodeTypeContract::new("FeatureGeneratorNode", RuntimeKind::Python)
            .describe("Derive model features from OHLCV data")
            .required("features", Array)
            .optional("lookback_period", Integer)
            .optional("fill_na_method", String)
            .input(
                InputContract::new(Arity::exactly(1), &[DataShape::Dataframe]).requiring(
                    ColumnRequirement::of(["open", "high", "low", "close", "volume"]),
                ),
            )
            .output(OutputSchemaResolver::Derived(feature_output))
            .rule(feature_rules),
        NodeTypeContract::new("LabelingNode", RuntimeKind::Python)
            .describe("Attach supervised-learning labels to a dataframe")
            .optional("method", String)
            .optional("forward_periods", IntegerOrArray)
            .optional("return_threshold", Number)
            .optional("num_classes", Integer)
            .optional("class_names", Array)
            .optional("fast_column", String)
            .optional("slow_column", String)
            .optional("stop_loss_pct", Number)
            .optional("take_profit_pct", Number)
            .input(
                InputContract::new(Arity::exactly(1), &[DataShape::Dataframe])
                    .requiring(ColumnRequirement::of(["close"])),
            )
            .output(OutputSchemaResolver::Static(
                DataSchema::new(DataShape::Dataframe, ["label", "signal"]).inheriting(),
            ))
            .rule(labeling_rules),
        NodeTypeContract::new("BacktestNode", RuntimeKind::Python)
            .describe("Simulate trading on signals and report performance")
            .optional("initial_capital", Number)
            .optional("commission", Number)
            .optional("slippage", Number)
            .optional("position_size", Number)
            .optional("max_positions", Integer)
            .optional("signal_column", String)
            .input(
                InputContract::new(Arity::range(1, 2), &tabular)
                    .requiring(ColumnRequirement::Derived(backtest_columns)),
            )
            .output(OutputSchemaResolver::Static(DataSchema::new(
                DataShape::BacktestResults,
                ["metrics", "trades", "equity_curve"],
            )))
            .rule(backtest_rules),
        NodeTypeContract::new("AggregateNode", RuntimeKind::Builtin)
            .describe("Group rows and aggregate columns")
            .required("aggregations", Array)
            .optional("group_by", String)
            .input(
                InputContract::new(Arity::exactly(1), &[DataShape::Dataframe])
                    .requiring(ColumnRequirement::Derived(aggregate_columns)),
            )
            .output(OutputSchemaResolver::Derived(aggregate_output))
            .rule(aggregate_rules),
        NodeTypeContract::new("PythonScriptNode", RuntimeKind::Python)
            .describe("Run user-authored Python code in the sandbox")
            .required("code", String)
            .optional("output_shape", String)
            .optional("output_columns", Array)
            .input(InputContract::new(
                Arity::range(0, MAX_SCRIPT_INPUTS),
                &[DataShape::Any],
            ))
            .output(OutputSchemaResolver::Derived(script_output))
            .rule(script_rules),
        NodeTypeContract::new("JavaScriptNode", RuntimeKind::JavaScript)
            .describe("Run user-authored JavaScript code in the sandbox")
            .required("code", String)
            .optional("output_shape", String)
            .optional("output_columns", Array)
            .input(InputContract::new(
                Arity::range(0, MAX_SCRIPT_INPUTS),
                &[DataShape::Any],
            ))
            .output(OutputSchemaResolver::Derived(script_output))
            .rule(script_rules),
    ]
}

fn str_param<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn int_param(params: &Params, key: &str, default: i64) -> i64 {
    params.get(key).and_then(Value::as_i64).unwrap_or(default)
}

fn string_list(params: &Params, key: &str) -> Option<Vec<String>> {
    let items = params.get(key)?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Output schemas
// ---------------------------------------------------------------------------

fn inline_output(params: &Params) -> DataSchema {
    if let Some(columns) = string_list(params, "columns") {
        return DataSchema::new(DataShape::Dataframe, columns);
    }
    let first_row_keys = params
        .get("rows")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(Value::as_object)
        .map(|row| row.keys().cloned().collect::<Vec<_>>());
    match first_row_keys {
        Some(keys) => DataSchema::new(DataShape::Dataframe, keys),
        None => DataSchema::new(DataShape::Dataframe, Vec::<String>::new()),
    }
}

fn loader_output(params: &Params) -> DataSchema {
    match string_list(params, "columns") {
        Some(columns) => DataSchema::new(DataShape::Dataframe, columns),
        None => DataSchema::new(DataShape::Dataframe, OHLCV_COLUMNS),
    }
}

/// Column names an indicator adds, in output order.
pub fn indicator_output_columns(params: &Params) -> Vec<String> {
    let period = int_param(params, "period", 14);
    match str_param(params, "indicator").unwrap_or("SMA") {
        "EMA" => vec![format!("EMA_{}", period)],
        "RSI" => vec![format!("RSI_{}", period)],
        "MACD" => vec![
            "MACD".to_string(),
            "MACD_Signal".to_string(),
            "MACD_Histogram".to_string(),
        ],
        "BB" => vec![
            format!("BB_Middle_{}", period),
            format!("BB_Upper_{}", period),
            format!("BB_Lower_{}", period),
            format!("BB_Percent_{}", period),
        ],
        _ => vec![format!("SMA_{}", period)],
    }
}

fn indicator_output(params: &Params) -> DataSchema {
    DataSchema::new(DataShape::Dataframe, indicator_output_columns(params)).inheriting()
}

fn crossover_output(params: &Params) -> DataSchema {
    let signal = str_param(params, "signal_column").unwrap_or(DEFAULT_SIGNAL_COLUMN);
    DataSchema::new(DataShape::Signals, [signal.to_string(), "position".to_string()]).inheriting()
}

/// Output column name for one feature spec.
pub fn feature_column_name(feature: &Value) -> Option<String> {
    if let Some(name) = feature.get("name").and_then(Value::as_str) {
        return Some(name.to_string());
    }
    let kind = feature.get("type").and_then(Value::as_str)?;
    Some(match feature.get("period").and_then(Value::as_i64) {
        Some(period) => format!("{}_{}", kind, period),
        None => kind.to_string(),
    })
}

fn feature_output(params: &Params) -> DataSchema {
    let columns: Vec<String> = params
        .get("features")
        .and_then(Value::as_array)
        .map(|features| features.iter().filter_map(feature_column_name).collect())
        .unwrap_or_default();
    DataSchema::new(DataShape::Dataframe, columns).inheriting()
}

/// Output column name for one aggregation spec.
pub fn aggregation_column_name(aggregation: &Value) -> Option<String> {
    if let Some(alias) = aggregation.get("as").and_then(Value::as_str) {
        return Some(alias.to_string());
    }
    let op = aggregation.get("op").and_then(Value::as_str)?;
    match aggregation.get("column").and_then(Value::as_str) {
        Some(column) => Some(format!("{}_{}", column, op)),
        None => Some(op.to_string()),
    }
}

fn aggregate_output(params: &Params) -> DataSchema {
    let mut columns = Vec::new();
    if let Some(group_by) = str_param(params, "group_by") {
        columns.push(group_by.to_string());
    }
    if let Some(aggs) = params.get("aggregations").and_then(Value::as_array) {
        columns.extend(aggs.iter().filter_map(aggregation_column_name));
    }
    DataSchema::new(DataShape::Dataframe, columns)
}

fn script_output(params: &Params) -> DataSchema {
    let shape = str_param(params, "output_shape")
        .and_then(DataShape::parse)
        .unwrap_or(DataShape::Any);
    match string_list(params, "output_columns") {
        Some(columns) => DataSchema::new(shape, columns),
        None => DataSchema::open(shape),
    }
}

// ---------------------------------------------------------------------------
// Required input columns
// ---------------------------------------------------------------------------

fn indicator_columns(params: &Params) -> Vec<String> {
    vec![str_param(params, "column").unwrap_or("close").to_string()]
}

fn crossover_columns(params: &Params) -> Vec<String> {
    let mut columns = vec!["timestamp".to_string()];
    for key in ["fast_ma_column", "slow_ma_column"] {
        if let Some(col) = str_param(params, key) {
            columns.push(col.to_string());
        }
    }
    columns
}

fn backtest_columns(params: &Params) -> Vec<String> {
    vec![
        "timestamp".to_string(),
        "close".to_string(),
        str_param(params, "signal_column")
            .unwrap_or(DEFAULT_SIGNAL_COLUMN)
            .to_string(),
    ]
}

fn aggregate_columns(params: &Params) -> Vec<String> {
    let mut columns = Vec::new();
    if let Some(group_by) = str_param(params, "group_by") {
        columns.push(group_by.to_string());
    }
    if let Some(aggs) = params.get("aggregations").and_then(Value::as_array) {
        for column in aggs
            .iter()
            .filter_map(|a| a.get("column").and_then(Value::as_str))
        {
            if !columns.iter().any(|c| c == column) {
                columns.push(column.to_string());
            }
        }
    }
    columns
}

// ---------------------------------------------------------------------------
// Parameter rules
// ---------------------------------------------------------------------------

fn inline_rules(node: &NodeDeclaration) -> Vec<ValidationError> {
    let mut errors = string_array(node, "columns");
    if let Some(Value::Array(rows)) = node.param("rows") {
        for (i, row) in rows.iter().enumerate() {
            if !row.is_object() {
                errors.push(param_error(
                    node,
                    &format!("rows[{}]", i),
                    "Each row must be a mapping of column to value",
                ));
            }
        }
    }
    errors
}

fn data_loader_rules(node: &NodeDeclaration) -> Vec<ValidationError> {
    let mut errors = collect([one_of(node, "timeframe", &TIMEFRAMES)]);
    if let Some(dataset) = node.param_str("dataset") {
        if !dataset.to_ascii_lowercase().ends_with(".csv") {
            errors.push(param_error(
                node,
                "dataset",
                format!("Dataset '{}' must be a .csv file", dataset),
            ));
        }
    }
    if let (Some(start), Some(end)) = (node.param_str("start_date"), node.param_str("end_date")) {
        if start > end {
            errors.push(cross_param_error(
                node,
                "start_date",
                format!("start_date ({}) must not be after end_date ({})", start, end),
            ));
        }
    }
    errors.extend(string_array(node, "columns"));
    errors
}

fn indicator_rules(node: &NodeDeclaration) -> Vec<ValidationError> {
    let mut errors = collect([
        one_of(node, "indicator", &INDICATORS),
        int_in_range(node, "period", 1, 1000),
        int_at_least(node, "fast_period", 1),
        int_at_least(node, "slow_period", 1),
        int_at_least(node, "signal_period", 1),
        positive_number(node, "std_dev"),
    ]);
    if node.param_str("indicator") == Some("MACD") {
        let fast = node.param_i64("fast_period").unwrap_or(12);
        let slow = node.param_i64("slow_period").unwrap_or(26);
        if fast >= slow {
            errors.push(cross_param_error(
                node,
                "fast_period",
                format!("fast_period ({}) must be less than slow_period ({})", fast, slow),
            ));
        }
    }
    errors
}

fn crossover_rules(node: &NodeDeclaration) -> Vec<ValidationError> {
    let mut errors = collect([
        int_at_least(node, "fast_period", 1),
        int_at_least(node, "slow_period", 1),
        int_at_least(node, "confirmation_periods", 1),
    ]);
    let fast = node.param_i64("fast_period").unwrap_or(DEFAULT_FAST_PERIOD);
    let slow = node.param_i64("slow_period").unwrap_or(DEFAULT_SLOW_PERIOD);
    if fast > 0 && slow > 0 && fast >= slow {
        errors.push(cross_param_error(
            node,
            "fast_period",
            format!("fast_period ({}) must be less than slow_period ({})", fast, slow),
        ));
    }
    let fast_col = node.param("fast_ma_column").is_some();
    let slow_col = node.param("slow_ma_column").is_some();
    if fast_col != slow_col {
        errors.push(cross_param_error(
            node,
            if fast_col { "slow_ma_column" } else { "fast_ma_column" },
            "fast_ma_column and slow_ma_column must be given together",
        ));
    }
    if let (Some(buy), Some(sell)) = (node.param_f64("buy_threshold"), node.param_f64("sell_threshold")) {
        if sell > buy {
            errors.push(cross_param_error(
                node,
                "sell_threshold",
                format!("sell_threshold ({}) must not exceed buy_threshold ({})", sell, buy),
            ));
        }
    }
    errors
}

fn feature_rules(node: &NodeDeclaration) -> Vec<ValidationError> {
    let mut errors = collect([
        non_empty_array(node, "features"),
        int_at_least(node, "lookback_period", 1),
        one_of(node, "fill_na_method", &FILL_NA_METHODS),
    ]);
    if let Some(Value::Array(features)) = node.param("features") {
        for (i, feature) in features.iter().enumerate() {
            let has_type = feature.get("type").map_or(false, Value::is_string);
            if !has_type {
                errors.push(param_error(
                    node,
                    &format!("features[{}].type", i),
                    "Each feature must be a mapping with a string 'type'",
                ));
            }
        }
    }
    errors
}

fn labeling_rules(node: &NodeDeclaration) -> Vec<ValidationError> {
    let mut errors = collect([
        one_of(node, "method", &LABELING_METHODS),
        positive_number(node, "return_threshold"),
        int_at_least(node, "num_classes", 2),
        fraction(node, "stop_loss_pct", false),
        fraction(node, "take_profit_pct", false),
    ]);
    match node.param("forward_periods") {
        Some(Value::Array(periods)) => {
            if periods.is_empty() {
                errors.push(param_error(node, "forward_periods", "'forward_periods' must not be empty"));
            }
            for (i, p) in periods.iter().enumerate() {
                if p.as_i64().map_or(true, |p| p < 1) {
                    errors.push(param_error(
                        node,
                        &format!("forward_periods[{}]", i),
                        "Forward periods must be positive integers",
                    ));
                }
            }
        }
        Some(_) => errors.extend(int_at_least(node, "forward_periods", 1)),
        None => {}
    }
    if node.param_str("method") == Some("crossover") {
        for key in ["fast_column", "slow_column"] {
            if node.param_str(key).is_none() {
                errors.push(cross_param_error(
                    node,
                    key,
                    format!("crossover labeling requires '{}'", key),
                ));
            }
        }
    }
    errors.extend(string_array(node, "class_names"));
    if let Some(Value::Array(names)) = node.param("class_names") {
        let num_classes = node.param_i64("num_classes").unwrap_or(3);
        if names.len() as i64 != num_classes {
            errors.push(cross_param_error(
                node,
                "class_names",
                format!(
                    "class_names has {} entries but num_classes is {}",
                    names.len(),
                    num_classes
                ),
            ));
        }
    }
    errors
}

fn backtest_rules(node: &NodeDeclaration) -> Vec<ValidationError> {
    collect([
        positive_number(node, "initial_capital"),
        non_negative_number(node, "commission"),
        non_negative_number(node, "slippage"),
        fraction(node, "position_size", true),
        int_at_least(node, "max_positions", 1),
    ])
}

fn aggregate_rules(node: &NodeDeclaration) -> Vec<ValidationError> {
    let mut errors = collect([non_empty_array(node, "aggregations")]);
    let Some(Value::Array(aggs)) = node.param("aggregations") else {
        return errors;
    };
    let mut seen: Vec<String> = node.param_str("group_by").map(str::to_string).into_iter().collect();
    for (i, agg) in aggs.iter().enumerate() {
        let field = format!("aggregations[{}]", i);
        let Some(obj) = agg.as_object() else {
            errors.push(param_error(node, &field, "Each aggregation must be a mapping"));
            continue;
        };
        let op = obj.get("op").and_then(Value::as_str);
        match op {
            Some(op) if AGGREGATE_OPS.contains(&op) => {}
            Some(op) => errors.push(param_error(
                node,
                &format!("{}.op", field),
                format!(
                    "Unknown aggregation '{}', expected one of: {}",
                    op,
                    AGGREGATE_OPS.join(", ")
                ),
            )),
            None => errors.push(param_error(
                node,
                &format!("{}.op", field),
                "Aggregation is missing 'op'",
            )),
        }
        if op != Some("count") && !obj.get("column").map_or(false, Value::is_string) {
            errors.push(param_error(
                node,
                &format!("{}.column", field),
                "Aggregation is missing 'column'",
            ));
        }
        if let Some(name) = aggregation_column_name(agg) {
            if seen.contains(&name) {
                errors.push(cross_param_error(
                    node,
                    &field,
                    format!("Duplicate output column '{}'", name),
                ));
            } else {
                seen.push(name);
            }
        }
    }
    errors
}

fn script_rules(node: &NodeDeclaration) -> Vec<ValidationError> {
    let mut errors = collect([one_of(node, "output_shape", &SHAPES)]);
    if node.param_str("code").map_or(false, |c| c.trim().is_empty()) {
        errors.push(param_error(node, "code", "'code' must not be empty"));
    }
    errors.extend(string_array(node, "output_columns"));
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Params {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_indicator_output_depends_on_params() {
        let s = indicator_output(&params(json!({"indicator": "EMA", "period": 9})));
        assert_eq!(s.columns, vec!["EMA_9"]);
        assert!(s.inherits_inputs);
        let s = indicator_output(&params(json!({"indicator": "BB", "period": 20})));
        assert_eq!(s.columns.len(), 4);
        assert!(s.columns.contains(&"BB_Upper_20".to_string()));
    }

    #[test]
    fn test_aggregate_output_follows_configuration() {
        let p = params(json!({
            "group_by": "symbol",
            "aggregations": [
                {"column": "close", "op": "mean"},
                {"column": "volume", "op": "sum", "as": "total_volume"},
                {"op": "count"}
            ]
        }));
        let s = aggregate_output(&p);
        assert_eq!(s.columns, vec!["symbol", "close_mean", "total_volume", "count"]);
        assert!(!s.inherits_inputs);
        assert_eq!(aggregate_columns(&p), vec!["symbol", "close", "volume"]);
    }

    #[test]
    fn test_script_output_open_unless_columns_declared() {
        let s = script_output(&params(json!({"code": "x"})));
        assert!(s.open);
        assert_eq!(s.shape, DataShape::Any);
        let s = script_output(&params(json!({"code": "x", "output_shape": "signals", "output_columns": ["signal"]})));
        assert!(!s.open);
        assert_eq!(s.shape, DataShape::Signals);
    }

    #[test]
    fn test_macd_requires_fast_below_slow() {
        let n = NodeDeclaration::new("m", "IndicatorNode")
            .with_param("indicator", json!("MACD"))
            .with_param("period", json!(14))
            .with_param("fast_period", json!(30))
            .with_param("slow_period", json!(26));
        let errs = indicator_rules(&n);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].code, "E204");
    }

    #[test]
    fn test_crossover_defaults_are_valid() {
        let n = NodeDeclaration::new("x", "CrossoverSignalNode");
        assert!(crossover_rules(&n).is_empty());
        let n = n.with_param("fast_period", json!(60));
        assert_eq!(crossover_rules(&n).len(), 1);
    }

    #[test]
    fn test_labeling_class_names_must_match() {
        let n = NodeDeclaration::new("l", "LabelingNode")
            .with_param("num_classes", json!(2))
            .with_param("class_names", json!(["down", "flat", "up"]));
        let errs = labeling_rules(&n);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("num_classes is 2"));
    }

    #[test]
    fn test_crossover_labeling_names_both_columns() {
        let n = NodeDeclaration::new("l", "LabelingNode")
            .with_param("method", json!("crossover"))
            .with_param("fast_column", json!("sma_10"));
        let errs = labeling_rules(&n);
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("slow_column"));
        let n = n.with_param("slow_column", json!("sma_30"));
        assert!(labeling_rules(&n).is_empty());
    }

    #[test]
    fn test_data_loader_rules() {
        let n = NodeDeclaration::new("d", "DataLoaderNode")
            .with_param("timeframe", json!("2h"))
            .with_param("dataset", json!("prices.parquet"))
            .with_param("start_date", json!("2024-02-01"))
            .with_param("end_date", json!("2024-01-01"));
        let errs = data_loader_rules(&n);
        assert_eq!(errs.len(), 3);
    }

    #[test]
    fn test_feature_types_required() {
        let n = NodeDeclaration::new("f", "FeatureGeneratorNode")
            .with_param("features", json!([{"type": "returns"}, {"period": 5}]));
        let errs = feature_rules(&n);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].field_path.as_deref(), Some("params.features[1].type"));
    }
}
