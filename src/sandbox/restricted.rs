//! Restricted Tier
//!
//! Fallback execution without a container runtime. Code has already passed
//! the static screen; it runs in an isolated interpreter process with an
//! empty environment inside the ephemeral workspace. This tier cannot
//! forcibly interrupt in-progress computation; the timeout is post-hoc.

use crate::error::{InsightError, Result};
use crate::sandbox::{
    build_harness_script, materialize_context, parse_harness_output, SandboxResult,
};
use polars::prelude::DataFrame;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// Execute screened code in an isolated interpreter process.
pub async fn execute(
    code: &str,
    context: &HashMap<String, DataFrame>,
    timeout: Duration,
) -> Result<SandboxResult> {
    let workspace = tempfile::tempdir()?;
    let input_dir = workspace.path().join("input");
    let out_dir = workspace.path().join("out");
    std::fs::create_dir_all(&input_dir)?;
    std::fs::create_dir_all(&out_dir)?;

    let context_names = materialize_context(&input_dir, context)?;
    let script = build_harness_script(
        code,
        &context_names,
        &input_dir.display().to_string(),
        &out_dir.join("output.json").display().to_string(),
    );
    let script_path = input_dir.join("script.py");
    std::fs::write(&script_path, script)?;

    let child = Command::new("python3")
        .arg("-I")
        .arg("-S")
        .arg(&script_path)
        .current_dir(workspace.path())
        .env_clear()
        .env("PATH", "/usr/bin:/bin")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| InsightError::Sandbox(format!("failed to start interpreter: {}", e)))?;

    let waited = tokio::time::timeout(timeout, child.wait_with_output()).await;

    let output = match waited {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Ok(SandboxResult::failure(format!(
                "interpreter execution error: {}",
                e
            )))
        }
        Err(_) => {
            warn!("Restricted sandbox exceeded {:?}; killed", timeout);
            return Ok(SandboxResult::failure(format!(
                "execution timed out after {}s",
                timeout.as_secs()
            )));
        }
    };

    let output_path = out_dir.join("output.json");
    if output_path.exists() {
        let raw = std::fs::read_to_string(&output_path)?;
        return Ok(parse_harness_output(&raw));
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok(SandboxResult::failure(if stderr.trim().is_empty() {
        "interpreter produced no output".to_string()
    } else {
        format!("execution failed: {}", stderr.trim())
    }))
}
