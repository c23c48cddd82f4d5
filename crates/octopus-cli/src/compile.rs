//! Invocation of the external compiler to produce IR JSON.

use std::path::Path;
use std::process::Command;

use tracing::{error, info};

use crate::AppError;

const COMPILER: &str = "p4c-graphs";

/// Compile a source parser file to IR JSON via `p4c-graphs`, returning the
/// JSON text. The compiler writes into a scratch directory that is removed
/// when this function returns.
pub fn compile_to_ir_json(file: &Path) -> Result<String, AppError> {
    let scratch = tempfile::tempdir()
        .map_err(|e| AppError::Input(format!("cannot create scratch directory: {e}")))?;
    let ir_path = scratch.path().join("IR.json");

    let output = Command::new(COMPILER)
        .arg("--toJSON")
        .arg(&ir_path)
        .arg("--graphs-dir")
        .arg(scratch.path())
        .arg(file)
        .output()
        .map_err(|e| {
            AppError::Input(format!(
                "Required tool '{COMPILER}' not found in PATH. Please ensure it is \
                 installed and available in your system PATH ({e})"
            ))
        })?;

    if !output.status.success() {
        error!(
            stdout = %String::from_utf8_lossy(&output.stdout),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "{COMPILER} failed"
        );
        return Err(AppError::Input(format!(
            "{COMPILER} failed with exit code {}",
            output.status.code().unwrap_or(-1)
        )));
    }
    info!(file = %file.display(), "converted to IR JSON format");

    std::fs::read_to_string(&ir_path).map_err(|e| {
        AppError::Input(format!(
            "{COMPILER} produced no readable IR JSON for '{}': {e}",
            file.display()
        ))
    })
}
