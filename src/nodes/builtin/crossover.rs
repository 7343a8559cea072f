//! Moving-average crossover signals.

use serde_json::Value;

use super::frame::Frame;
use super::BuiltinNode;
use crate::catalog::builtin::{DEFAULT_FAST_PERIOD, DEFAULT_SIGNAL_COLUMN, DEFAULT_SLOW_PERIOD};
use crate::catalog::DataShape;
use crate::dsl::Params;
use crate::error::{NodeError, NodeResult};

const PRICE_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

struct CrossoverParams<'a> {
    fast_period: i64,
    slow_period: i64,
    signal_column: &'a str,
    fast_ma_column: Option<&'a str>,
    slow_ma_column: Option<&'a str>,
    buy_threshold: f64,
    sell_threshold: f64,
    confirmation_periods: usize,
}

impl<'a> CrossoverParams<'a> {
    fn from_params(params: &'a Params) -> Self {
        let str_param = |name: &str| params.get(name).and_then(Value::as_str);
        Self {
            fast_period: params
                .get("fast_period")
                .and_then(Value::as_i64)
                .unwrap_or(DEFAULT_FAST_PERIOD),
            slow_period: params
                .get("slow_period")
                .and_then(Value::as_i64)
                .unwrap_or(DEFAULT_SLOW_PERIOD),
            signal_column: str_param("signal_column").unwrap_or(DEFAULT_SIGNAL_COLUMN),
            fast_ma_column: params.get("fast_ma_column").and_then(Value::as_str),
            slow_ma_column: params.get("slow_ma_column").and_then(Value::as_str),
            buy_threshold: params.get("buy_threshold").and_then(Value::as_f64).unwrap_or(0.0),
            sell_threshold: params.get("sell_threshold").and_then(Value::as_f64).unwrap_or(0.0),
            confirmation_periods: params
                .get("confirmation_periods")
                .and_then(Value::as_u64)
                .map_or(1, |v| v.max(1) as usize),
        }
    }
}

pub struct CrossoverSignalNode;

impl BuiltinNode for CrossoverSignalNode {
    fn node_type(&self) -> &'static str {
        "CrossoverSignalNode"
    }

    fn execute(&self, node_id: &str, params: &Params, inputs: &[Value]) -> NodeResult<Value> {
        let p = CrossoverParams::from_params(params);
        let frames = inputs
            .iter()
            .map(Frame::from_value)
            .collect::<NodeResult<Vec<_>>>()?;
        if frames.is_empty() {
            return Err(NodeError::InputError("crossover requires input data".to_string()));
        }
        let mut frame = Frame::merge_on(&frames, "timestamp")?;

        let (fast_col, slow_col) = detect_ma_columns(node_id, &frame, &p)?;
        let fast = frame.column_f64(&fast_col);
        let slow = frame.column_f64(&slow_col);
        let mut signals = crossover_signals(&fast, &slow, p.buy_threshold, p.sell_threshold);
        if p.confirmation_periods > 1 {
            confirm(&mut signals, &fast, &slow, p.confirmation_periods);
        }
        let positions = positions(&signals);
        let diff_pct: Vec<Option<f64>> = fast
            .iter()
            .zip(&slow)
            .map(|(f, s)| match (f, s) {
                (Some(f), Some(s)) if *s != 0.0 => Some((f - s) / s * 100.0),
                _ => None,
            })
            .collect();

        let signal_values: Vec<Option<f64>> = signals.iter().map(|s| Some(*s)).collect();
        frame.set_column(p.signal_column, &signal_values);
        frame.set_column("position", &positions);
        frame.set_column("ma_diff_pct", &diff_pct);
        frame.shape = DataShape::Signals;

        let buys = signals.iter().filter(|s| **s > 0.0).count();
        let sells = signals.iter().filter(|s| **s < 0.0).count();
        let meta = &mut frame.metadata;
        meta.insert("signal_column".into(), Value::from(p.signal_column));
        meta.insert("fast_ma_column".into(), Value::from(fast_col));
        meta.insert("slow_ma_column".into(), Value::from(slow_col));
        meta.insert("buy_signals".into(), Value::from(buys));
        meta.insert("sell_signals".into(), Value::from(sells));
        meta.insert("total_signals".into(), Value::from(buys + sells));
        meta.insert("confirmation_periods".into(), Value::from(p.confirmation_periods));
        Ok(frame.to_value())
    }
}

/// Pick the fast and slow MA columns: explicit params, then names matching the
/// configured periods, then the first two MA-like columns, then the first two
/// non-price numeric columns.
fn detect_ma_columns(node_id: &str, frame: &Frame, p: &CrossoverParams<'_>) -> NodeResult<(String, String)> {
    if let (Some(fast), Some(slow)) = (p.fast_ma_column, p.slow_ma_column) {
        frame.require_column(node_id, fast)?;
        frame.require_column(node_id, slow)?;
        return Ok((fast.to_string(), slow.to_string()));
    }

    let columns = frame.columns();
    let ma_columns: Vec<&String> = columns
        .iter()
        .filter(|c| c.to_ascii_lowercase().contains("ma"))
        .collect();
    if ma_columns.len() >= 2 {
        let fast_tag = format!("_{}", p.fast_period);
        let slow_tag = format!("_{}", p.slow_period);
        let fast = ma_columns.iter().find(|c| c.ends_with(&fast_tag));
        let slow = ma_columns.iter().find(|c| c.ends_with(&slow_tag));
        if let (Some(fast), Some(slow)) = (fast, slow) {
            return Ok(((*fast).clone(), (*slow).clone()));
        }
        tracing::warn!(node_id, "could not match MA columns by period, using the first two");
        return Ok((ma_columns[0].clone(), ma_columns[1].clone()));
    }

    let numeric: Vec<&String> = columns
        .iter()
        .filter(|c| !PRICE_COLUMNS.contains(&c.to_ascii_lowercase().as_str()))
        .filter(|c| frame.column_f64(c).iter().any(Option::is_some))
        .collect();
    if numeric.len() >= 2 {
        return Ok((numeric[0].clone(), numeric[1].clone()));
    }

    Err(NodeError::InputError(format!(
        "could not detect moving average columns among [{}]; set fast_ma_column and slow_ma_column",
        columns.join(", ")
    )))
}

/// +1 where fast crosses above slow, -1 where it crosses below, 0 elsewhere.
pub fn crossover_signals(fast: &[Option<f64>], slow: &[Option<f64>], buy: f64, sell: f64) -> Vec<f64> {
    let above: Vec<bool> = fast
        .iter()
        .zip(slow)
        .map(|(f, s)| matches!((f, s), (Some(f), Some(s)) if f > s))
        .collect();
    (0..above.len())
        .map(|i| {
            let prev = i > 0 && above[i - 1];
            let strength = match (fast[i], slow[i]) {
                (Some(f), Some(s)) if s != 0.0 => ((f - s) / s * 100.0).abs(),
                _ => 0.0,
            };
            if above[i] && !prev && strength >= buy {
                1.0
            } else if !above[i] && prev && strength >= sell {
                -1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Drop signals whose condition does not persist for `periods - 1` further rows.
fn confirm(signals: &mut [f64], fast: &[Option<f64>], slow: &[Option<f64>], periods: usize) {
    let original = signals.to_vec();
    for (i, signal) in original.iter().enumerate() {
        if *signal == 0.0 {
            continue;
        }
        let confirmed = (1..periods)
            .filter(|j| i + j < signals.len())
            .filter(|j| match (fast[i + j], slow[i + j]) {
                (Some(f), Some(s)) => (*signal > 0.0 && f > s) || (*signal < 0.0 && f < s),
                _ => false,
            })
            .count();
        if confirmed < periods - 1 {
            signals[i] = 0.0;
        }
    }
}

/// Position held after each row: the sign of the latest non-zero signal.
fn positions(signals: &[f64]) -> Vec<Option<f64>> {
    let mut position = 0.0;
    signals
        .iter()
        .map(|s| {
            if *s != 0.0 {
                position = s.signum();
            }
            Some(position)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Value {
        json!({"type": "dataframe", "data": [
            {"timestamp": 1, "close": 10.0, "SMA_20": 1.0, "SMA_50": 2.0},
            {"timestamp": 2, "close": 11.0, "SMA_20": 3.0, "SMA_50": 2.0},
            {"timestamp": 3, "close": 12.0, "SMA_20": 4.0, "SMA_50": 2.0},
            {"timestamp": 4, "close": 9.0,  "SMA_20": 1.0, "SMA_50": 2.0}
        ]})
    }

    #[test]
    fn test_detects_columns_by_period() {
        let out = CrossoverSignalNode
            .execute("x", &Params::new(), &[rows()])
            .unwrap();
        assert_eq!(out["type"], "signals");
        let signals: Vec<f64> = out["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["signal"].as_f64().unwrap())
            .collect();
        assert_eq!(signals, vec![0.0, 1.0, 0.0, -1.0]);
        assert_eq!(out["data"][2]["position"], 1.0);
        assert_eq!(out["metadata"]["fast_ma_column"], "SMA_20");
    }

    #[test]
    fn test_confirmation_filters_short_lived_cross() {
        let params = json!({"confirmation_periods": 3});
        let out = CrossoverSignalNode
            .execute("x", params.as_object().unwrap(), &[rows()])
            .unwrap();
        // The golden cross at row 1 holds for only one more row.
        assert_eq!(out["data"][1]["signal"], 0.0);
    }

    #[test]
    fn test_explicit_columns_must_exist() {
        let params = json!({"fast_ma_column": "EMA_5", "slow_ma_column": "SMA_50"});
        let err = CrossoverSignalNode
            .execute("x", params.as_object().unwrap(), &[rows()])
            .unwrap_err();
        assert!(err.to_string().contains("EMA_5"));
    }

    #[test]
    fn test_merges_two_inputs() {
        let fast = json!([{"timestamp": 1, "EMA_20": 1.0}, {"timestamp": 2, "EMA_20": 3.0}]);
        let slow = json!([{"timestamp": 1, "EMA_50": 2.0}, {"timestamp": 2, "EMA_50": 2.0}]);
        let out = CrossoverSignalNode
            .execute("x", &Params::new(), &[fast, slow])
            .unwrap();
        assert_eq!(out["data"][1]["signal"], 1.0);
    }

    #[test]
    fn test_thresholds_suppress_weak_crosses() {
        let s = crossover_signals(&[Some(1.0), Some(2.01)], &[Some(2.0), Some(2.0)], 5.0, 0.0);
        assert_eq!(s, vec![0.0, 0.0]);
    }
}
