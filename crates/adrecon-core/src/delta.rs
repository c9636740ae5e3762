use serde::{Deserialize, Serialize};

/// `num / den`, or `0.0` when the denominator is zero or the result is not
/// finite.
pub fn safe_ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 || !den.is_finite() {
        return 0.0;
    }
    let ratio = num / den;
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaSignal {
    Up,
    Down,
    NoSignal,
}

/// A headline value with its change against the comparison window.
///
/// `delta_pct` is `None` whenever there is no usable baseline (no comparison
/// window, or a previous value of zero). Changes smaller than the noise
/// threshold report `0.0` with [`DeltaSignal::NoSignal`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub value: f64,
    pub previous_value: Option<f64>,
    pub delta_pct: Option<f64>,
    pub signal: DeltaSignal,
}

impl MetricDelta {
    pub fn new(value: f64, previous_value: Option<f64>, noise_threshold_pct: f64) -> Self {
        let value = finite(value);
        let previous_value = previous_value.map(finite);
        let raw_pct = previous_value
            .filter(|prev| *prev != 0.0)
            .map(|prev| (value - prev) / prev.abs() * 100.0)
            .filter(|pct| pct.is_finite());

        let (delta_pct, signal) = match raw_pct {
            None => (None, DeltaSignal::NoSignal),
            Some(pct) if pct.abs() < noise_threshold_pct => (Some(0.0), DeltaSignal::NoSignal),
            Some(pct) if pct > 0.0 => (Some(pct), DeltaSignal::Up),
            Some(pct) => (Some(pct), DeltaSignal::Down),
        };
        Self {
            value,
            previous_value,
            delta_pct,
            signal,
        }
    }

    pub fn current_only(value: f64) -> Self {
        Self::new(value, None, 0.0)
    }

    /// Absolute percentage change, zero when there is none.
    pub fn magnitude(&self) -> f64 {
        self.delta_pct.map(f64::abs).unwrap_or(0.0)
    }
}

fn finite(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
