pub mod pipeline;
pub mod version;

pub use pipeline::{CiArgs, GenerateArgs, LintArgs};
pub use version::VersionCommand;

use anyhow::Result;
use serde::Serialize;
use std::process::ExitCode;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(pipeline_core::Error::SerializationError)?;
    println!("{text}");
    Ok(())
}

/// Operation-level failures as `{"error": {"kind", "message"}}` on stdout.
pub fn print_error_json(err: &anyhow::Error) {
    let kind = err
        .downcast_ref::<pipeline_core::Error>()
        .map_or("error", pipeline_core::Error::kind_label);
    let body = serde_json::json!({
        "error": {
            "kind": kind,
            "message": format!("{err:#}"),
        }
    });
    println!("{body:#}");
}

pub fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
