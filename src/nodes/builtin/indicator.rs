//! Technical indicators over one numeric column.

use serde_json::Value;

use super::frame::Frame;
use super::{single_input, BuiltinNode};
use crate::dsl::Params;
use crate::error::{NodeError, NodeResult};

const DEFAULT_PERIOD: usize = 14;
const DEFAULT_STD_DEV: f64 = 2.0;

pub struct IndicatorNode;

impl BuiltinNode for IndicatorNode {
    fn node_type(&self) -> &'static str {
        "IndicatorNode"
    }

    fn execute(&self, node_id: &str, params: &Params, inputs: &[Value]) -> NodeResult<Value> {
        let mut frame = single_input(node_id, inputs)?;
        let indicator = params
            .get("indicator")
            .and_then(Value::as_str)
            .unwrap_or("SMA")
            .to_ascii_uppercase();
        let period = usize_param(params, "period").unwrap_or(DEFAULT_PERIOD);
        if period == 0 {
            return Err(NodeError::ConfigError("period must be positive".to_string()));
        }
        let column = params.get("column").and_then(Value::as_str).unwrap_or("close");
        frame.require_column(node_id, column)?;
        let values = frame.column_f64(column);

        match indicator.as_str() {
            "SMA" => frame.set_column(&format!("SMA_{}", period), &sma(&values, period)),
            "EMA" => frame.set_column(&format!("EMA_{}", period), &ema(&values, period)),
            "RSI" => frame.set_column(&format!("RSI_{}", period), &rsi(&values, period)),
            "MACD" => {
                let fast = usize_param(params, "fast_period").unwrap_or(12);
                let slow = usize_param(params, "slow_period").unwrap_or(26);
                let signal = usize_param(params, "signal_period").unwrap_or(9);
                let (line, signal_line, histogram) = macd(&values, fast, slow, signal);
                frame.set_column("MACD", &line);
                frame.set_column("MACD_Signal", &signal_line);
                frame.set_column("MACD_Histogram", &histogram);
            }
            "BB" => {
                let std_dev = params
                    .get("std_dev")
                    .and_then(Value::as_f64)
                    .unwrap_or(DEFAULT_STD_DEV);
                let bands = bollinger(&values, period, std_dev);
                frame.set_column(&format!("BB_Middle_{}", period), &bands.middle);
                frame.set_column(&format!("BB_Upper_{}", period), &bands.upper);
                frame.set_column(&format!("BB_Lower_{}", period), &bands.lower);
                frame.set_column(&format!("BB_Percent_{}", period), &bands.percent);
            }
            other => {
                return Err(NodeError::ConfigError(format!(
                    "unsupported indicator: {}",
                    other
                )))
            }
        }

        frame.metadata.insert("indicator".into(), Value::from(indicator));
        frame.metadata.insert("period".into(), Value::from(period));
        Ok(frame.to_value())
    }
}

fn usize_param(params: &Params, name: &str) -> Option<usize> {
    params
        .get(name)
        .and_then(Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
}

/// Rolling mean; the first `period - 1` entries and any window with a gap are `None`.
pub fn sma(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    rolling(values, period, |window| {
        Some(window.iter().sum::<f64>() / window.len() as f64)
    })
}

/// Exponential moving average with `alpha = 2 / (period + 1)`, seeded by the
/// first observed value. Gaps carry the previous value forward.
pub fn ema(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev: Option<f64> = None;
    values
        .iter()
        .map(|value| {
            prev = match (prev, value) {
                (None, Some(v)) => Some(*v),
                (Some(p), Some(v)) => Some(alpha * v + (1.0 - alpha) * p),
                (p, None) => p,
            };
            prev
        })
        .collect()
}

/// Relative strength index from rolling mean gains and losses.
pub fn rsi(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut gains = vec![None; values.len()];
    let mut losses = vec![None; values.len()];
    for i in 1..values.len() {
        if let (Some(prev), Some(cur)) = (values[i - 1], values[i]) {
            let delta = cur - prev;
            gains[i] = Some(delta.max(0.0));
            losses[i] = Some((-delta).max(0.0));
        }
    }
    let avg_gain = sma(&gains, period);
    let avg_loss = sma(&losses, period);
    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(gain, loss)| match (gain, loss) {
            (Some(_), Some(l)) if *l == 0.0 => Some(100.0),
            (Some(g), Some(l)) => Some(100.0 - 100.0 / (1.0 + g / l)),
            _ => None,
        })
        .collect()
}

type Series = Vec<Option<f64>>;

pub fn macd(values: &[Option<f64>], fast: usize, slow: usize, signal: usize) -> (Series, Series, Series) {
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);
    let line: Series = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal_line = ema(&line, signal);
    let histogram = line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| Some((*m)? - (*s)?))
        .collect();
    (line, signal_line, histogram)
}

pub struct Bands {
    pub middle: Series,
    pub upper: Series,
    pub lower: Series,
    pub percent: Series,
}

pub fn bollinger(values: &[Option<f64>], period: usize, std_dev: f64) -> Bands {
    let middle = sma(values, period);
    let deviation = rolling(values, period, |window| {
        if window.len() < 2 {
            return None;
        }
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window.len() - 1) as f64;
        Some(var.sqrt())
    });
    let mut bands = Bands {
        upper: Vec::with_capacity(values.len()),
        lower: Vec::with_capacity(values.len()),
        percent: Vec::with_capacity(values.len()),
        middle: Vec::new(),
    };
    for i in 0..values.len() {
        let upper = middle[i].zip(deviation[i]).map(|(m, d)| m + d * std_dev);
        let lower = middle[i].zip(deviation[i]).map(|(m, d)| m - d * std_dev);
        let percent = match (values[i], upper, lower) {
            (Some(v), Some(u), Some(l)) if u != l => Some((v - l) / (u - l)),
            _ => None,
        };
        bands.upper.push(upper);
        bands.lower.push(lower);
        bands.percent.push(percent);
    }
    bands.middle = middle;
    bands
}

fn rolling(values: &[Option<f64>], period: usize, f: impl Fn(&[f64]) -> Option<f64>) -> Series {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    let mut window = Vec::with_capacity(period);
    for end in period..=values.len() {
        window.clear();
        window.extend(values[end - period..end].iter().flatten());
        if window.len() == period {
            out[end - 1] = f(&window);
        }
    }
    out
}
