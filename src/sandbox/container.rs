//! Container Tier
//!
//! Runs analysis code in a fresh, network-disabled container. Input
//! dataframes are materialized as CSV in a read-only mount; results come
//! back through a separate writable mount. The container removes itself.

use crate::error::{InsightError, Result};
use crate::sandbox::{
    build_harness_script, materialize_context, parse_harness_output, SandboxResult,
    SANDBOX_MEMORY_LIMIT,
};
use polars::prelude::DataFrame;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const CONTAINER_IMAGE: &str = "python:3.11-slim";

/// Check whether a container runtime is reachable.
pub async fn probe_container_runtime() -> bool {
    let probe = Command::new("docker")
        .arg("info")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match tokio::time::timeout(Duration::from_secs(3), probe).await {
        Ok(Ok(status)) => status.success(),
        _ => false,
    }
}

/// Execute screened code in a container with resource caps.
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
        "/workspace/input",
        "/workspace/out/output.json",
    );
    std::fs::write(input_dir.join("script.py"), script)?;

    let child = Command::new("docker")
        .arg("run")
        .arg("--rm")
        .arg("--network")
        .arg("none")
        .arg("--memory")
        .arg(SANDBOX_MEMORY_LIMIT)
        .arg("-v")
        .arg(format!("{}:/workspace/input:ro", input_dir.display()))
        .arg("-v")
        .arg(format!("{}:/workspace/out:rw", out_dir.display()))
        .arg(CONTAINER_IMAGE)
        .arg("python")
        .arg("/workspace/input/script.py")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| InsightError::Sandbox(format!("failed to start container: {}", e)))?;

    let waited = tokio::time::timeout(timeout, child.wait_with_output()).await;

    let output = match waited {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Ok(SandboxResult::failure(format!(
                "container execution error: {}",
                e
            )))
        }
        Err(_) => {
            warn!("Sandbox container exceeded {:?}; killed", timeout);
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
    debug!("Container produced no output file; stderr: {}", stderr);
    Ok(SandboxResult::failure(if stderr.trim().is_empty() {
        "container produced no output".to_string()
    } else {
        format!("container failed: {}", stderr.trim())
    }))
}
