//! Chart Specifications
//!
//! Provider-neutral chart specs with `data` and `layout` sections, built
//! from recipe outputs. No rendering happens here.

use serde_json::{json, Value};

/// Supported chart forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Line,
    Scatter,
    Bar,
    Heatmap,
    Histogram,
}

impl ChartKind {
    pub fn label(&self) -> &'static str {
        match self {
            ChartKind::Line => "line",
            ChartKind::Scatter => "scatter",
            ChartKind::Bar => "bar",
            ChartKind::Heatmap => "heatmap",
            ChartKind::Histogram => "histogram",
        }
    }
}

/// Build a chart spec for a recipe payload. Returns `None` when the payload
/// carries nothing chartable.
pub fn chart_for_recipe(recipe: &str, payload: &Value) -> Option<Value> {
    match recipe {
        "forecast" => {
            let dates = payload.get("dates")?.as_array()?.clone();
            let forecast = payload.get("forecast")?.as_array()?.clone();
            Some(spec(
                ChartKind::Line,
                json!([{"x": dates, "y": forecast, "type": "line", "name": "forecast"}]),
                "Forecast",
                "date",
                "value",
            ))
        }
        "correlation" => {
            let correlations = payload.get("correlations")?.as_object()?;
            let labels: Vec<&String> = correlations.keys().collect();
            let values: Vec<&Value> = correlations.values().collect();
            Some(spec(
                ChartKind::Heatmap,
                json!([{"x": labels, "y": ["correlation"], "z": [values], "type": "heatmap"}]),
                "Correlation Matrix",
                "factor",
                "",
            ))
        }
        "anomaly" => {
            let indices = payload.get("anomalies")?.as_array()?.clone();
            let values = payload.get("anomaly_values")?.as_array()?.clone();
            Some(spec(
                ChartKind::Scatter,
                json!([{"x": indices, "y": values, "type": "scatter", "name": "anomalies"}]),
                "Detected Anomalies",
                "row",
                "value",
            ))
        }
        "summary" => {
            let stats = payload.get("summary_stats")?.as_object()?;
            let labels: Vec<&String> = stats.keys().collect();
            let means: Vec<Value> = stats
                .values()
                .map(|s| s.get("mean").cloned().unwrap_or(Value::Null))
                .collect();
            Some(spec(
                ChartKind::Bar,
                json!([{"x": labels, "y": means, "type": "bar", "name": "mean"}]),
                "Column Means",
                "column",
                "mean",
            ))
        }
        "simulation" => {
            let distribution = payload.get("distribution")?.as_array()?.clone();
            Some(spec(
                ChartKind::Histogram,
                json!([{"x": distribution, "type": "histogram", "name": "scenarios"}]),
                "Scenario Distribution",
                "outcome",
                "frequency",
            ))
        }
        _ => None,
    }
}

fn spec(kind: ChartKind, data: Value, title: &str, x_title: &str, y_title: &str) -> Value {
    json!({
        "data": data,
        "layout": {
            "title": title,
            "chart_type": kind.label(),
            "xaxis": {"title": x_title},
            "yaxis": {"title": y_title},
        }
    })
}
