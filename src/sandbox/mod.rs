//! Code Sandbox
//!
//! Executes untrusted analysis code with two isolation tiers: a
//! network-disabled container (preferred) and a restricted interpreter
//! fallback. The tier is selected at construction; running in the
//! restricted tier is an explicit, logged downgrade.

pub mod container;
pub mod restricted;
pub mod screen;

use crate::config::SandboxMode;
use crate::error::Result;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default wall-clock cap for one execution.
pub const SANDBOX_TIMEOUT_SECS: u64 = 30;
/// Container memory ceiling.
pub const SANDBOX_MEMORY_LIMIT: &str = "512m";

/// Modules the sandboxed code may import.
pub const ALLOWED_MODULES: &[&str] = &[
    "pandas",
    "numpy",
    "scipy",
    "math",
    "statistics",
    "json",
    "datetime",
    "plotly",
];

/// Outcome of one sandboxed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResult {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub output: String,
    pub error: Option<String>,
    pub visualization: Option<serde_json::Value>,
}

impl SandboxResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            output: String::new(),
            error: Some(error.into()),
            visualization: None,
        }
    }
}

/// The isolation tier actually in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxTier {
    Container,
    Restricted,
}

/// Secure executor for analysis code.
pub struct CodeSandbox {
    tier: SandboxTier,
    timeout: Duration,
}

impl CodeSandbox {
    /// Select the isolation tier. Under `auto` the container runtime is
    /// probed; when it is unavailable the sandbox degrades to the
    /// restricted tier and logs the downgrade.
    pub async fn new(mode: SandboxMode) -> Self {
        let tier = match mode {
            SandboxMode::Container => SandboxTier::Container,
            SandboxMode::Restricted => {
                warn!("Sandbox explicitly configured for the restricted tier; container isolation is off");
                SandboxTier::Restricted
            }
            SandboxMode::Auto => {
                if container::probe_container_runtime().await {
                    info!("Sandbox using container isolation");
                    SandboxTier::Container
                } else {
                    warn!("Container runtime unavailable; sandbox degraded to restricted tier");
                    SandboxTier::Restricted
                }
            }
        };

        Self {
            tier,
            timeout: Duration::from_secs(SANDBOX_TIMEOUT_SECS),
        }
    }

    pub fn tier(&self) -> SandboxTier {
        self.tier
    }

    /// Execute `code` with the given named dataframes available in scope.
    /// Every failure mode (violation, timeout, crash, syntax error) comes
    /// back as `success = false`; this method does not error.
    pub async fn run(&self, code: &str, context: &HashMap<String, DataFrame>) -> SandboxResult {
        if let Err(violation) = screen::screen_code(code) {
            return SandboxResult::failure(format!("sandbox violation: {}", violation));
        }

        let result = match self.tier {
            SandboxTier::Container => container::execute(code, context, self.timeout).await,
            SandboxTier::Restricted => restricted::execute(code, context, self.timeout).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => SandboxResult::failure(e.to_string()),
        }
    }
}

/// Write the context dataframes as CSV files into the workspace.
pub(crate) fn materialize_context(
    dir: &Path,
    context: &HashMap<String, DataFrame>,
) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for (name, frame) in context {
        let path = dir.join(format!("{}.csv", name));
        let mut file = std::fs::File::create(&path)?;
        CsvWriter::new(&mut file).finish(&mut frame.clone())?;
        names.push(name.clone());
    }
    names.sort();
    Ok(names)
}

/// Build the harness script that loads the context, runs the user code and
/// serializes `result` / `visualization` into `output.json`.
pub(crate) fn build_harness_script(
    user_code: &str,
    context_names: &[String],
    input_dir: &str,
    output_path: &str,
) -> String {
    let mut loads = String::new();
    for name in context_names {
        loads.push_str(&format!(
            "{} = pd.read_csv(r'{}/{}.csv')\n",
            name, input_dir, name
        ));
    }

    let indented: String = user_code
        .lines()
        .map(|line| format!("    {}\n", line))
        .collect();

    format!(
        r#"import io
import json
import sys
import traceback

import pandas as pd
import numpy as np

stdout_capture = io.StringIO()
sys.stdout = stdout_capture

{loads}
result = None
visualization = None
error = None

try:
{indented}
except Exception:
    error = traceback.format_exc()

def _plain(value):
    if hasattr(value, 'to_dict'):
        return value.to_dict()
    if hasattr(value, 'tolist'):
        return value.tolist()
    return value

payload = {{
    'result': _plain(result),
    'output': stdout_capture.getvalue(),
    'error': error,
    'visualization': _plain(visualization),
}}

with open(r'{output_path}', 'w') as f:
    json.dump(payload, f, default=str)
"#,
        loads = loads,
        indented = indented,
        output_path = output_path,
    )
}

/// Interpret the harness `output.json` payload.
pub(crate) fn parse_harness_output(raw: &str) -> SandboxResult {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(payload) => {
            let error = payload
                .get("error")
                .and_then(|e| e.as_str())
                .map(|s| s.to_string());
            let result = payload.get("result").cloned().filter(|v| !v.is_null());
            let visualization = payload
                .get("visualization")
                .cloned()
                .filter(|v| !v.is_null());
            let output = payload
                .get("output")
                .and_then(|o| o.as_str())
                .unwrap_or_default()
                .to_string();

            SandboxResult {
                success: error.is_none(),
                result,
                output,
                error,
                visualization,
            }
        }
        Err(e) => SandboxResult::failure(format!("unreadable sandbox output: {}", e)),
    }
}
