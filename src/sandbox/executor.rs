use anyhow::{Context, Result};
use std::process::Stdio;
use tracing::info;

use super::LaunchDescriptor;

/// Start the isolation engine described by `descriptor`.
///
/// The engine runs detached: stdio is not inherited and the call returns as
/// soon as the process exists. Returns the engine's process id.
pub fn launch(descriptor: &LaunchDescriptor) -> Result<u32> {
    let child = tokio::process::Command::new(&descriptor.command)
        .args(&descriptor.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to start {}", descriptor.command))?;

    let pid = child.id().unwrap_or_default();
    info!("Started {} (pid {})", descriptor.command_line(), pid);

    // Dropping the handle leaves the engine running.
    drop(child);
    Ok(pid)
}
