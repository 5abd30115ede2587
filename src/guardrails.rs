//! Safety Guardrails
//!
//! Bidirectional PII protection: scans incoming queries before any SQL is
//! generated, and masks outbound result rows before they leave the engine.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Types of PII that can be detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PiiKind {
    #[serde(rename = "EMAIL")]
    Email,
    #[serde(rename = "SSN")]
    Ssn,
    #[serde(rename = "CREDIT_CARD")]
    CreditCard,
    #[serde(rename = "PHONE")]
    Phone,
    #[serde(rename = "IP")]
    Ip,
    #[serde(rename = "ACCOUNT")]
    Account,
    #[serde(rename = "NAME")]
    Name,
    #[serde(rename = "ADDRESS")]
    Address,
    #[serde(rename = "DOB")]
    Dob,
}

impl PiiKind {
    pub fn label(&self) -> &'static str {
        match self {
            PiiKind::Email => "EMAIL",
            PiiKind::Ssn => "SSN",
            PiiKind::CreditCard => "CREDIT_CARD",
            PiiKind::Phone => "PHONE",
            PiiKind::Ip => "IP",
            PiiKind::Account => "ACCOUNT",
            PiiKind::Name => "NAME",
            PiiKind::Address => "ADDRESS",
            PiiKind::Dob => "DOB",
        }
    }
}

/// Risk level of a scanned input
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

/// One detected PII instance
#[derive(Debug, Clone, Serialize)]
pub struct PiiDetection {
    pub kind: PiiKind,
    pub value: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
}

/// Aggregate result of scanning one piece of text
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub contains_pii: bool,
    pub detections: Vec<PiiDetection>,
    pub sanitized_text: String,
    pub risk_level: RiskLevel,
}

/// Guardrails activity counters; monotonically increasing within a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailsSummary {
    pub blocked_queries: u64,
    pub redacted_results: u64,
    pub total_detections: u64,
}

const REGEX_CONFIDENCE: f64 = 0.9;

/// Pattern-based PII scanner with risk-graded blocking and deterministic
/// masking. NAME/ADDRESS detection is an optional advanced mode.
pub struct PiiScanner {
    patterns: Vec<(PiiKind, Regex)>,
    blocked_queries: AtomicU64,
    redacted_results: AtomicU64,
    total_detections: AtomicU64,
}

impl PiiScanner {
    pub fn new(advanced: bool) -> Self {
        // Detection order matters: a span claimed by an earlier pattern
        // suppresses later overlapping hits, so EMAIL wins over the digit
        // patterns and ACCOUNT only counts where nothing else matched.
        let mut patterns = vec![
            (
                PiiKind::Email,
                Regex::new(r"(?i)\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
            ),
            (PiiKind::Ssn, Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()),
            (
                PiiKind::CreditCard,
                Regex::new(r"\b\d(?:[- ]?\d){12,18}\b").unwrap(),
            ),
            (
                PiiKind::Phone,
                Regex::new(r"(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap(),
            ),
            (
                PiiKind::Ip,
                Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap(),
            ),
            (
                PiiKind::Dob,
                Regex::new(r"\b(?:0[1-9]|1[0-2])[/-](?:0[1-9]|[12]\d|3[01])[/-](?:19|20)\d{2}\b")
                    .unwrap(),
            ),
            (PiiKind::Account, Regex::new(r"\b\d{8,16}\b").unwrap()),
        ];

        if advanced {
            patterns.push((
                PiiKind::Address,
                Regex::new(
                    r"\b\d{1,5} [A-Z][a-z]+ (?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr)\b",
                )
                .unwrap(),
            ));
            patterns.push((
                PiiKind::Name,
                Regex::new(r"\b[A-Z][a-z]+ [A-Z][a-z]+\b").unwrap(),
            ));
            info!("PII scanner initialized with advanced NAME/ADDRESS detection");
        } else {
            info!("PII scanner initialized with base pattern set");
        }

        Self {
            patterns,
            blocked_queries: AtomicU64::new(0),
            redacted_results: AtomicU64::new(0),
            total_detections: AtomicU64::new(0),
        }
    }

    /// Scan arbitrary text; no counters are touched.
    pub fn scan_text(&self, text: &str) -> ScanResult {
        if text.is_empty() {
            return ScanResult {
                contains_pii: false,
                detections: Vec::new(),
                sanitized_text: text.to_string(),
                risk_level: RiskLevel::Low,
            };
        }

        let mut detections: Vec<PiiDetection> = Vec::new();
        for (kind, pattern) in &self.patterns {
            for m in pattern.find_iter(text) {
                let overlaps = detections
                    .iter()
                    .any(|d| m.start() < d.end && d.start < m.end());
                if overlaps {
                    continue;
                }
                detections.push(PiiDetection {
                    kind: *kind,
                    value: m.as_str().to_string(),
                    start: m.start(),
                    end: m.end(),
                    confidence: REGEX_CONFIDENCE,
                });
            }
        }
        detections.sort_by_key(|d| d.start);

        let sanitized_text = redact_spans(text, &detections);
        let risk_level = classify_risk(&detections);

        ScanResult {
            contains_pii: !detections.is_empty(),
            detections,
            sanitized_text,
            risk_level,
        }
    }

    /// Scan a user query before SQL generation. Returns the scan result and
    /// whether the pipeline may proceed.
    pub fn scan_query(&self, query: &str, strict: bool) -> (ScanResult, bool) {
        let result = self.scan_text(query);
        self.total_detections
            .fetch_add(result.detections.len() as u64, Ordering::Relaxed);

        let blocked = result.risk_level == RiskLevel::Critical
            || (strict && result.risk_level != RiskLevel::Low);

        if blocked {
            self.blocked_queries.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Query blocked: {} PII detected ({} hits)",
                result.risk_level.label(),
                result.detections.len()
            );
        }

        (result, !blocked)
    }

    /// Redact PII from a JSON-like tree. String leaves are masked on a deep
    /// copy; numbers, booleans and nulls pass through unchanged.
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.redact(v)))
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact(v)).collect()),
            Value::String(s) => {
                let result = self.scan_text(s);
                if result.contains_pii {
                    self.redacted_results.fetch_add(1, Ordering::Relaxed);
                    self.total_detections
                        .fetch_add(result.detections.len() as u64, Ordering::Relaxed);
                    Value::String(result.sanitized_text)
                } else {
                    Value::String(s.clone())
                }
            }
            other => other.clone(),
        }
    }

    /// Advisory check on generated SQL: flags shapes that tend to expose
    /// PII columns. Never blocks on its own.
    pub fn validate_sql(&self, sql: &str) -> Option<String> {
        let sql_lower = sql.to_lowercase();

        if Regex::new(r"\bselect\s+\*\s+from\b")
            .unwrap()
            .is_match(&sql_lower)
        {
            for table in ["users", "customers", "employees", "accounts"] {
                if sql_lower.contains(table) {
                    return Some(format!(
                        "SELECT * from sensitive table '{}' may expose PII columns",
                        table
                    ));
                }
            }
        }

        for column in [
            "email",
            "ssn",
            "social_security",
            "credit_card",
            "phone",
            "date_of_birth",
            "account_number",
        ] {
            if Regex::new(&format!(r"\b{}\b", column))
                .unwrap()
                .is_match(&sql_lower)
            {
                return Some(format!(
                    "Query selects potentially sensitive column '{}'; output will be redacted",
                    column
                ));
            }
        }

        None
    }

    pub fn summary(&self) -> GuardrailsSummary {
        GuardrailsSummary {
            blocked_queries: self.blocked_queries.load(Ordering::Relaxed),
            redacted_results: self.redacted_results.load(Ordering::Relaxed),
            total_detections: self.total_detections.load(Ordering::Relaxed),
        }
    }
}

/// Rebuild `text` with every detected span replaced by its mask.
fn redact_spans(text: &str, detections: &[PiiDetection]) -> String {
    if detections.is_empty() {
        return text.to_string();
    }

    let mut sanitized = String::with_capacity(text.len());
    let mut cursor = 0;
    for detection in detections {
        sanitized.push_str(&text[cursor..detection.start]);
        sanitized.push_str(&mask_value(detection.kind, &detection.value));
        cursor = detection.end;
    }
    sanitized.push_str(&text[cursor..]);
    sanitized
}

/// Deterministic per-kind masking rules.
fn mask_value(kind: PiiKind, value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    let last4 = |digits: &str| -> String {
        digits
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    };

    match kind {
        PiiKind::Email => match value.split_once('@') {
            Some((local, domain)) => {
                let first = local.chars().next().map(String::from).unwrap_or_default();
                format!("{}***@{}", first, domain)
            }
            None => "***@***".to_string(),
        },
        PiiKind::Ssn => format!("***-**-{}", last4(&digits)),
        PiiKind::CreditCard => format!("****-****-****-{}", last4(&digits)),
        PiiKind::Phone => format!("(***) ***-{}", last4(&digits)),
        PiiKind::Name => value
            .split_whitespace()
            .map(|token| {
                token
                    .chars()
                    .next()
                    .map(|c| format!("{}***", c))
                    .unwrap_or_else(|| "***".to_string())
            })
            .collect::<Vec<_>>()
            .join(" "),
        PiiKind::Account => format!("****{}", last4(&digits)),
        PiiKind::Ip => {
            let octets: Vec<&str> = value.split('.').collect();
            if octets.len() == 4 {
                format!("{}.{}.***.***", octets[0], octets[1])
            } else {
                "***.***.***.***".to_string()
            }
        }
        PiiKind::Address | PiiKind::Dob => "[REDACTED]".to_string(),
    }
}

/// Risk classification over a set of detections.
fn classify_risk(detections: &[PiiDetection]) -> RiskLevel {
    if detections.is_empty() {
        return RiskLevel::Low;
    }

    let critical = detections.iter().any(|d| {
        matches!(
            d.kind,
            PiiKind::Ssn | PiiKind::CreditCard | PiiKind::Account
        )
    });
    if critical {
        return RiskLevel::Critical;
    }

    let high_bucket = detections
        .iter()
        .filter(|d| matches!(d.kind, PiiKind::Email | PiiKind::Phone | PiiKind::Address))
        .count();
    let has_name = detections.iter().any(|d| d.kind == PiiKind::Name);
    let has_address = detections.iter().any(|d| d.kind == PiiKind::Address);

    if high_bucket >= 3 || (has_name && has_address) {
        RiskLevel::High
    } else if high_bucket >= 1 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scanner() -> PiiScanner {
        PiiScanner::new(false)
    }

    #[test]
    fn test_ssn_is_critical_and_blocked() {
        let (result, proceed) =
            scanner().scan_query("Show orders where customer_ssn = '123-45-6789'", false);
        assert!(!proceed);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert!(result.detections.iter().any(|d| d.kind == PiiKind::Ssn));
        assert!(result.sanitized_text.contains("***-**-6789"));
    }

    #[test]
    fn test_email_is_medium_and_proceeds() {
        let (result, proceed) = scanner().scan_query("orders for john.doe@example.com", false);
        assert!(proceed);
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert!(result.sanitized_text.contains("j***@example.com"));
    }

    #[test]
    fn test_strict_mode_blocks_any_nonlow() {
        let (_, proceed) = scanner().scan_query("orders for john.doe@example.com", true);
        assert!(!proceed);
        let (_, proceed) = scanner().scan_query("total revenue last month", true);
        assert!(proceed);
    }

    #[test]
    fn test_credit_card_masking() {
        let result = scanner().scan_text("card 4111-1111-1111-1234 charged");
        assert!(result.detections.iter().any(|d| d.kind == PiiKind::CreditCard));
        assert!(result.sanitized_text.contains("****-****-****-1234"));
    }

    #[test]
    fn test_account_not_double_counted_with_card() {
        let result = scanner().scan_text("card 4111111111111111 on file");
        let kinds: Vec<PiiKind> = result.detections.iter().map(|d| d.kind).collect();
        assert!(kinds.contains(&PiiKind::CreditCard));
        assert!(!kinds.contains(&PiiKind::Account));
    }

    #[test]
    fn test_account_detected_standalone() {
        let result = scanner().scan_text("account 12345678 balance");
        assert!(result.detections.iter().any(|d| d.kind == PiiKind::Account));
        assert!(result.sanitized_text.contains("****5678"));
        assert_eq!(result.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_ip_masking() {
        let result = scanner().scan_text("request from 192.168.10.42 failed");
        assert!(result.sanitized_text.contains("192.168.***.***"));
    }

    #[test]
    fn test_phone_masking() {
        let result = scanner().scan_text("call (555) 123-4567 today");
        assert!(result.detections.iter().any(|d| d.kind == PiiKind::Phone));
        assert!(result.sanitized_text.contains("(***) ***-4567"));
    }

    #[test]
    fn test_dob_full_replacement() {
        let result = scanner().scan_text("born 04/15/1990 in town");
        assert!(result.detections.iter().any(|d| d.kind == PiiKind::Dob));
        assert!(result.sanitized_text.contains("[REDACTED]"));
    }

    #[test]
    fn test_sanitized_text_has_no_remaining_patterns() {
        let s = scanner();
        let dirty = "john.doe@example.com 123-45-6789 (555) 123-4567 192.168.1.1 12345678";
        let result = s.scan_text(dirty);
        let rescan = s.scan_text(&result.sanitized_text);
        assert!(!rescan.contains_pii, "residual: {:?}", rescan.detections);
    }

    #[test]
    fn test_redact_is_idempotent() {
        let s = scanner();
        let value = json!({
            "rows": [
                {"email": "john.doe@example.com", "phone": "555-123-4567", "amount": 42.5}
            ]
        });
        let once = s.redact(&value);
        let twice = s.redact(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_redact_preserves_non_strings() {
        let s = scanner();
        let value = json!({"n": 123456789, "ok": true, "nothing": null});
        assert_eq!(s.redact(&value), value);
    }

    #[test]
    fn test_redact_distributes_over_disjoint_merge() {
        let s = scanner();
        let a = json!({"email": "john.doe@example.com"});
        let b = json!({"phone": "(555) 123-4567"});

        let mut merged = a.as_object().unwrap().clone();
        merged.extend(b.as_object().unwrap().clone());
        let merged = Value::Object(merged);

        let redacted_merged = s.redact(&merged);

        let ra = s.redact(&a);
        let rb = s.redact(&b);
        let mut merged_redacted = ra.as_object().unwrap().clone();
        merged_redacted.extend(rb.as_object().unwrap().clone());
        assert_eq!(redacted_merged, Value::Object(merged_redacted));
    }

    #[test]
    fn test_name_masking_in_advanced_mode() {
        let s = PiiScanner::new(true);
        let result = s.scan_text("customer John Doe called");
        assert!(result.detections.iter().any(|d| d.kind == PiiKind::Name));
        assert!(result.sanitized_text.contains("J*** D***"));
    }

    #[test]
    fn test_counters_increase() {
        let s = scanner();
        let before = s.summary();
        s.scan_query("ssn 123-45-6789", false);
        s.redact(&json!("mail me at a.b@example.com"));
        let after = s.summary();
        assert_eq!(after.blocked_queries, before.blocked_queries + 1);
        assert_eq!(after.redacted_results, before.redacted_results + 1);
        assert!(after.total_detections > before.total_detections);
    }

    #[test]
    fn test_validate_sql_advisories() {
        let s = scanner();
        assert!(s.validate_sql("SELECT * FROM customers").is_some());
        assert!(s.validate_sql("SELECT email FROM contacts").is_some());
        assert!(s
            .validate_sql("SELECT SUM(total_amount) FROM orders")
            .is_none());
    }
}
