//! Static Code Screen
//!
//! Rejects analysis code that reaches for anything outside the allowed
//! surface before it is handed to either execution tier: imports outside
//! the allow-list, dynamic code construction, filesystem/process/network
//! primitives, and dunder attribute access.

use crate::sandbox::ALLOWED_MODULES;
use regex::Regex;

/// Check user code against the sandbox policy. Returns the first violation.
pub fn screen_code(code: &str) -> Result<(), String> {
    let import_re = Regex::new(r"(?m)^\s*import\s+([A-Za-z_][A-Za-z0-9_.]*)").unwrap();
    let from_re = Regex::new(r"(?m)^\s*from\s+([A-Za-z_][A-Za-z0-9_.]*)\s+import").unwrap();

    for caps in import_re.captures_iter(code).chain(from_re.captures_iter(code)) {
        let module = caps[1].split('.').next().unwrap_or(&caps[1]);
        if !ALLOWED_MODULES.contains(&module) {
            return Err(format!("import of '{}' is not allowed", module));
        }
    }

    let dunder_re = Regex::new(r"__[A-Za-z0-9_]+__").unwrap();
    if let Some(m) = dunder_re.find(code) {
        return Err(format!("dunder access '{}' is not allowed", m.as_str()));
    }

    // Dynamic code construction and system primitives.
    let denied_calls = [
        "eval(", "exec(", "compile(", "open(", "input(", "globals(", "locals(", "vars(",
        "getattr(", "setattr(", "delattr(", "breakpoint(",
    ];
    for needle in denied_calls {
        if code.contains(needle) {
            return Err(format!(
                "call to '{}' is not allowed",
                needle.trim_end_matches('(')
            ));
        }
    }

    let denied_modules = ["os.", "sys.", "subprocess", "socket", "shutil", "pathlib", "ctypes"];
    for needle in denied_modules {
        if code.contains(needle) {
            return Err(format!(
                "reference to '{}' is not allowed",
                needle.trim_end_matches('.')
            ));
        }
    }

    Ok(())
}
