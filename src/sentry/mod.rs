//! Anomaly Sentry
//!
//! Background monitor that periodically evaluates key business metrics
//! against a rolling baseline and broadcasts alerts when the latest value
//! deviates beyond each metric's threshold.

pub mod alert_bus;

use crate::error::{InsightError, Result};
use crate::sentry::alert_bus::AlertBus;
use crate::sql_executor::{QueryOutcome, SqlExecutor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Bounded alert history length.
pub const ALERT_HISTORY_CAPACITY: usize = 100;
/// SQL timeout for one metric evaluation.
const METRIC_QUERY_TIMEOUT_SECS: u64 = 30;
/// Budget for one full sweep to wind down on stop.
const SWEEP_TIMEOUT_SECS: u64 = 60;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// A detected metric anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub metric_name: String,
    pub current_value: f64,
    pub baseline_value: f64,
    pub deviation_percent: f64,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
}

/// A monitored metric: a read-only query producing a (date, value) series
/// ordered latest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub query: String,
    pub description: String,
    pub threshold_percent: f64,
    pub rolling_window_days: usize,
}

impl MetricDefinition {
    pub fn new(name: &str, query: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            query: query.to_string(),
            description: description.to_string(),
            threshold_percent: 20.0,
            rolling_window_days: 7,
        }
    }

    pub fn with_threshold(mut self, threshold_percent: f64) -> Self {
        self.threshold_percent = threshold_percent;
        self
    }
}

/// The five default metrics every deployment monitors.
fn default_metrics() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::new(
            "daily_revenue",
            "SELECT DATE(order_date) AS date, SUM(total_amount) AS value \
             FROM orders WHERE order_date >= DATE('now', '-14 days') \
             GROUP BY DATE(order_date) ORDER BY date DESC",
            "Total daily revenue from orders",
        ),
        MetricDefinition::new(
            "order_count",
            "SELECT DATE(order_date) AS date, COUNT(*) AS value \
             FROM orders WHERE order_date >= DATE('now', '-14 days') \
             GROUP BY DATE(order_date) ORDER BY date DESC",
            "Number of orders per day",
        ),
        MetricDefinition::new(
            "average_order_value",
            "SELECT DATE(order_date) AS date, AVG(total_amount) AS value \
             FROM orders WHERE order_date >= DATE('now', '-14 days') \
             GROUP BY DATE(order_date) ORDER BY date DESC",
            "Average revenue per order",
        ),
        MetricDefinition::new(
            "new_customers",
            "SELECT DATE(created_date) AS date, COUNT(*) AS value \
             FROM customers WHERE created_date >= DATE('now', '-14 days') \
             GROUP BY DATE(created_date) ORDER BY date DESC",
            "New customer registrations per day",
        )
        .with_threshold(30.0),
        MetricDefinition::new(
            "units_sold",
            "SELECT DATE(order_date) AS date, SUM(quantity) AS value \
             FROM orders WHERE order_date >= DATE('now', '-14 days') \
             GROUP BY DATE(order_date) ORDER BY date DESC",
            "Total units sold per day",
        ),
    ]
}

/// Monitoring status block for the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringStatus {
    pub running: bool,
    pub metrics_tracked: usize,
    pub interval_minutes: u64,
}

/// Result of an on-demand metric check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricCheck {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
    pub metric: String,
}

/// Periodic metric evaluator and alert dispatcher.
pub struct AnomalySentry {
    executor: Arc<SqlExecutor>,
    bus: Arc<AlertBus>,
    metrics: std::sync::RwLock<Vec<MetricDefinition>>,
    history: Mutex<VecDeque<Alert>>,
    interval_minutes: u64,
    running: AtomicBool,
    sweep_guard: Mutex<()>,
    shutdown: tokio::sync::Notify,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AnomalySentry {
    pub fn new(executor: Arc<SqlExecutor>, bus: Arc<AlertBus>, interval_minutes: u64) -> Self {
        let metrics = default_metrics();
        info!("Anomaly sentry initialized with {} metrics", metrics.len());
        Self {
            executor,
            bus,
            metrics: std::sync::RwLock::new(metrics),
            history: Mutex::new(VecDeque::with_capacity(ALERT_HISTORY_CAPACITY)),
            interval_minutes,
            running: AtomicBool::new(false),
            sweep_guard: Mutex::new(()),
            shutdown: tokio::sync::Notify::new(),
            task: Mutex::new(None),
        }
    }

    pub fn bus(&self) -> Arc<AlertBus> {
        self.bus.clone()
    }

    /// Register an additional metric. Only allowed before `start()`.
    pub fn register_metric(&self, metric: MetricDefinition) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(InsightError::Sentry(
                "metrics must be registered before the sentry starts".to_string(),
            ));
        }
        self.metrics
            .write()
            .map_err(|_| InsightError::Internal("metric registry lock poisoned".to_string()))?
            .push(metric);
        Ok(())
    }

    /// Start monitoring: one synchronous sweep now, then periodic sweeps.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Sentry is already running");
            return;
        }

        info!(
            "Starting anomaly sentry (checking every {} minutes)",
            self.interval_minutes
        );
        self.sweep().await;

        let sentry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let period = Duration::from_secs(sentry.interval_minutes * 60);
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = sentry.shutdown.notified() => break,
                    _ = ticker.tick() => {
                        // A sweep still in flight means this tick is skipped.
                        match sentry.sweep_guard.try_lock() {
                            Ok(_guard) => sentry.sweep_locked().await,
                            Err(_) => warn!("Previous sweep still running; skipping this tick"),
                        }
                    }
                }
            }
        });
        *self.task.lock().await = Some(handle);
    }

    /// Stop monitoring: cancel the schedule, wait for any in-flight sweep,
    /// close subscribers.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping anomaly sentry");
        self.shutdown.notify_waiters();
        if let Some(handle) = self.task.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(SWEEP_TIMEOUT_SECS), handle)
                .await
                .is_err()
            {
                warn!("Sweep did not wind down within budget");
            }
        }
        self.bus.close_all().await;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn monitoring_status(&self) -> MonitoringStatus {
        MonitoringStatus {
            running: self.is_running(),
            metrics_tracked: self.metrics.read().map(|m| m.len()).unwrap_or(0),
            interval_minutes: self.interval_minutes,
        }
    }

    /// One pass over all metrics, serialized by the sweep guard.
    pub async fn sweep(&self) {
        let _guard = self.sweep_guard.lock().await;
        self.sweep_locked().await;
    }

    async fn sweep_locked(&self) {
        let metrics = match self.metrics.read() {
            Ok(metrics) => metrics.clone(),
            Err(_) => {
                error!("Metric registry lock poisoned; skipping sweep");
                return;
            }
        };

        info!("Sweeping {} metrics for anomalies", metrics.len());
        for metric in &metrics {
            if let Some(mut alert) = self.evaluate_metric(metric).await {
                if matches!(alert.severity, Severity::Warning | Severity::Critical) {
                    alert.root_cause = Some(root_cause_analysis(&alert));
                }
                self.record_alert(alert.clone()).await;
                self.bus.publish(alert).await;
            }
        }
    }

    /// Evaluate one metric: latest point against the mean of the preceding
    /// window. A zero or absent baseline skips the metric without alerting.
    async fn evaluate_metric(&self, metric: &MetricDefinition) -> Option<Alert> {
        let outcome = self
            .executor
            .run(&metric.query, 1000, METRIC_QUERY_TIMEOUT_SECS)
            .await;

        let rows = match outcome {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Error { error, .. } => {
                error!("Metric '{}' query failed: {}", metric.name, error);
                return None;
            }
        };

        let value_idx = rows
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case("value"))
            .or_else(|| rows.columns.len().checked_sub(1))?;

        let values: Vec<f64> = rows
            .rows
            .iter()
            .filter_map(|row| row.get(value_idx).and_then(|v| v.as_f64()))
            .collect();

        if values.len() < 2 {
            return None;
        }

        let current = values[0];
        let window_end = (1 + metric.rolling_window_days).min(values.len());
        let baseline_slice = &values[1..window_end];
        let baseline = baseline_slice.iter().sum::<f64>() / baseline_slice.len() as f64;

        if baseline == 0.0 {
            return None;
        }

        let deviation = (current - baseline) / baseline * 100.0;
        if deviation.abs() < metric.threshold_percent {
            return None;
        }

        let severity = severity_for(deviation.abs());
        warn!(
            "Anomaly detected in '{}': current={:.2}, baseline={:.2}, deviation={:+.1}%",
            metric.name, current, baseline, deviation
        );

        Some(Alert {
            metric_name: metric.name.clone(),
            current_value: current,
            baseline_value: baseline,
            deviation_percent: deviation,
            severity,
            timestamp: Utc::now(),
            description: format!(
                "{}: {:+.1}% deviation detected",
                metric.description, deviation
            ),
            root_cause: None,
        })
    }

    async fn record_alert(&self, alert: Alert) {
        let mut history = self.history.lock().await;
        if history.len() == ALERT_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(alert);
    }

    /// Most recent alerts, newest first.
    pub async fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let history = self.history.lock().await;
        history.iter().rev().take(limit).cloned().collect()
    }

    /// On-demand check of one registered metric.
    pub async fn check_metric(&self, name: &str) -> Result<MetricCheck> {
        let metric = self
            .metrics
            .read()
            .map_err(|_| InsightError::Internal("metric registry lock poisoned".to_string()))?
            .iter()
            .find(|m| m.name == name)
            .cloned()
            .ok_or_else(|| InsightError::Sentry(format!("metric '{}' not found", name)))?;

        let alert = self.evaluate_metric(&metric).await;
        Ok(MetricCheck {
            status: if alert.is_some() {
                "anomaly_detected".to_string()
            } else {
                "normal".to_string()
            },
            alert,
            metric: name.to_string(),
        })
    }
}

/// Severity follows deviation magnitude; the boundaries are exclusive so a
/// deviation of exactly 50% stays a warning.
fn severity_for(abs_deviation: f64) -> Severity {
    if abs_deviation > 50.0 {
        Severity::Critical
    } else if abs_deviation > 30.0 {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Compose the root-cause text: direction of movement plus contextual
/// hints derived from the metric's known sensitivities.
fn root_cause_analysis(alert: &Alert) -> String {
    let mut parts = vec![
        format!(
            "Detected {:+.1}% deviation in {}.",
            alert.deviation_percent, alert.metric_name
        ),
        format!("Current value: {:.2}", alert.current_value),
        format!("Rolling baseline: {:.2}", alert.baseline_value),
    ];

    if alert.deviation_percent < 0.0 {
        parts.push(
            "Metric is trending DOWN. Possible causes: decreased demand, operational issues, or seasonal effects."
                .to_string(),
        );
    } else {
        parts.push(
            "Metric is trending UP. Possible causes: successful campaign, seasonal spike, or data quality issue."
                .to_string(),
        );
    }

    let hint = match alert.metric_name.as_str() {
        "daily_revenue" => Some("Check pricing changes, campaign activity, and checkout health."),
        "order_count" => Some("Check traffic sources and order funnel conversion."),
        "average_order_value" => Some("Check product mix and discounting."),
        "new_customers" => Some("Check acquisition channels and signup flow."),
        "units_sold" => Some("Check inventory availability and top-seller demand."),
        _ => None,
    };
    if let Some(hint) = hint {
        parts.push(hint.to_string());
    }

    parts.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_boundaries() {
        assert_eq!(severity_for(25.0), Severity::Info);
        assert_eq!(severity_for(30.0), Severity::Info);
        assert_eq!(severity_for(35.0), Severity::Warning);
        assert_eq!(severity_for(50.0), Severity::Warning);
        assert_eq!(severity_for(50.1), Severity::Critical);
    }

    #[test]
    fn test_default_metrics_are_five_and_read_only() {
        let metrics = default_metrics();
        assert_eq!(metrics.len(), 5);
        for metric in &metrics {
            assert!(metric.query.trim_start().to_uppercase().starts_with("SELECT"));
            assert_eq!(metric.rolling_window_days, 7);
        }
    }

    #[test]
    fn test_root_cause_mentions_direction() {
        let alert = Alert {
            metric_name: "daily_revenue".to_string(),
            current_value: 5000.0,
            baseline_value: 10000.0,
            deviation_percent: -50.0,
            severity: Severity::Warning,
            timestamp: Utc::now(),
            description: String::new(),
            root_cause: None,
        };
        let analysis = root_cause_analysis(&alert);
        assert!(analysis.contains("trending DOWN"));
        assert!(analysis.contains("pricing changes"));
    }
}
