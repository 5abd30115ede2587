//! Analysis Recipes
//!
//! Code synthesis for the analytics catalog. Each recipe emits a Python
//! source string that reads the `df` dataframe from the sandbox context,
//! computes the recipe's contract output, and assigns a `result` variable.
//!
//! Column names and simulation variables come from the request and are
//! untrusted. Every interpolated string is serialized as a JSON literal
//! (valid Python string syntax), so it can never break out of the
//! generated source.

/// A hypothetical variable for Monte-Carlo simulation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SimulationVariable {
    pub name: String,
    pub change_pct: f64,
}

pub const DEFAULT_SIMULATION_ITERATIONS: usize = 1000;
pub const MAX_SIMULATION_ITERATIONS: usize = 10_000;

/// Encode an untrusted string as a Python string literal.
fn py_str(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Encode the simulation variables as a Python list-of-pairs literal.
fn py_variable_pairs(variables: &[SimulationVariable]) -> String {
    let pairs: Vec<serde_json::Value> = variables
        .iter()
        .map(|v| serde_json::json!([v.name, v.change_pct]))
        .collect();
    serde_json::to_string(&pairs).unwrap_or_else(|_| "[]".to_string())
}

/// 7-period moving-average forecast over `horizon_days`.
pub fn forecast_code(time_column: &str, target_column: &str, horizon_days: usize) -> String {
    format!(
        r#"import pandas as pd
import numpy as np
from datetime import timedelta

time_col = {time}
target_col = {target}

df[time_col] = pd.to_datetime(df[time_col])
df = df.sort_values(time_col)

window = min(7, max(1, len(df) // 2))
ma = df[target_col].rolling(window=window).mean()
last_value = float(ma.iloc[-1]) if len(ma) else 0.0

forecast = [last_value] * {horizon}
last_date = df[time_col].iloc[-1]
dates = [str((last_date + timedelta(days=i + 1)).date()) for i in range({horizon})]

result = {{
    'forecast': forecast,
    'dates': dates,
    'model': f'{{window}}-period moving average',
    'interpretation': f'Projected level of {{target_col}}: {{last_value:.2f}} per day over the next {horizon} days',
}}
"#,
        time = py_str(time_column),
        target = py_str(target_column),
        horizon = horizon_days,
    )
}

/// Pearson correlation of numeric columns against the target.
pub fn correlation_code(target_column: &str) -> String {
    format!(
        r#"import pandas as pd
import numpy as np

target_col = {target}

numeric_cols = df.select_dtypes(include=[np.number]).columns
correlations = {{}}

if target_col in df.columns:
    for col in numeric_cols:
        if col != target_col:
            corr = df[col].corr(df[target_col])
            if not np.isnan(corr):
                correlations[col] = float(corr)

ranked = sorted(correlations.items(), key=lambda item: abs(item[1]), reverse=True)
top_factors = [name for name, _ in ranked]

result = {{
    'correlations': correlations,
    'top_factors': top_factors,
    'methodology': 'Pearson correlation coefficient on numeric columns',
}}
"#,
        target = py_str(target_column),
    )
}

/// Z-score anomaly detection on the target column.
pub fn anomaly_code(target_column: &str, threshold: f64) -> String {
    format!(
        r#"import pandas as pd
import numpy as np

target_col = {target}

mean = df[target_col].mean()
std = df[target_col].std()
threshold = {threshold}

if std and std > 0:
    z_scores = (df[target_col] - mean) / std
    anomalies = df[abs(z_scores) > threshold].index.tolist()
else:
    anomalies = []
anomaly_values = df.loc[anomalies, target_col].tolist()

result = {{
    'anomalies': anomalies,
    'anomaly_values': anomaly_values,
    'threshold_used': threshold,
    'interpretation': f'Found {{len(anomalies)}} points beyond {{threshold}} standard deviations',
}}
"#,
        target = py_str(target_column),
        threshold = threshold,
    )
}

/// Descriptive statistics, IQR outliers, and missing-data percentages.
pub fn summary_code() -> String {
    r#"import pandas as pd
import numpy as np

numeric_cols = df.select_dtypes(include=[np.number]).columns

summary_stats = {}
for col in numeric_cols:
    series = df[col]
    summary_stats[col] = {
        'count': int(series.count()),
        'mean': float(series.mean()),
        'std': float(series.std()) if series.count() > 1 else 0.0,
        'min': float(series.min()),
        'p25': float(series.quantile(0.25)),
        'p50': float(series.quantile(0.50)),
        'p75': float(series.quantile(0.75)),
        'max': float(series.max()),
    }

outliers = {}
for col in numeric_cols:
    q1 = df[col].quantile(0.25)
    q3 = df[col].quantile(0.75)
    iqr = q3 - q1
    mask = (df[col] < q1 - 1.5 * iqr) | (df[col] > q3 + 1.5 * iqr)
    outliers[col] = df[mask].index.tolist()

missing_data = {col: float(df[col].isnull().sum() / len(df) * 100) for col in df.columns}

result = {
    'summary_stats': summary_stats,
    'outliers': outliers,
    'missing_data': missing_data,
    'key_insights': f'Analyzed {len(numeric_cols)} numeric columns across {len(df)} rows',
}
"#
    .to_string()
}

/// Monte-Carlo scenario simulation: each hypothetical variable is perturbed
/// by a Normal(change/100, |change|/300) draw and the target is recomputed
/// from its mean-aggregated baseline.
pub fn simulation_code(
    target_column: &str,
    variables: &[SimulationVariable],
    iterations: usize,
) -> String {
    let iterations = iterations.clamp(1, MAX_SIMULATION_ITERATIONS);

    format!(
        r#"import pandas as pd
import numpy as np

target_col = {target}

baseline = float(df[target_col].mean())
iterations = {iterations}
variables = {variables}

multipliers = np.ones(iterations)
mean_impacts = {{}}
for name, change_pct in variables:
    samples = np.random.normal(change_pct / 100.0, abs(change_pct) / 300.0, iterations)
    mean_impacts[name] = float(np.mean(samples) * 100.0)
    multipliers = multipliers * (1.0 + samples)

distribution = baseline * multipliers
low, expected, high = (float(np.percentile(distribution, p)) for p in (10, 50, 90))
ci_low, ci_high = (float(np.percentile(distribution, p)) for p in (2.5, 97.5))

sensitivity = '; '.join(
    f'{{name}}: {{impact:+.1f}}% mean impact' for name, impact in mean_impacts.items()
)

result = {{
    'baseline': baseline,
    'scenarios': {{'low': low, 'expected': expected, 'high': high}},
    'distribution': distribution.tolist(),
    'confidence_interval': [ci_low, ci_high],
    'sensitivity_analysis': sensitivity,
    'interpretation': f'Expected {{target_col}}: {{expected:.2f}} (baseline {{baseline:.2f}}) across {{iterations}} scenarios',
}}
"#,
        target = py_str(target_column),
        iterations = iterations,
        variables = py_variable_pairs(variables),
    )
}
