use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// What the host offers for running sandboxes.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    /// Command as configured.
    pub command: String,

    /// Executable the command resolves to, if any.
    pub resolved: Option<PathBuf>,

    /// Whether the host tools directory exists.
    pub tools_dir_present: bool,
}

/// Probe the current system for the isolation engine.
pub fn detect_engine(command: &str, tools_dir: &Path) -> EngineStatus {
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    EngineStatus {
        command: command.to_string(),
        resolved: resolve_command(command, &path_var),
        tools_dir_present: tools_dir.is_dir(),
    }
}

/// Resolve `command` as an explicit path or by searching `path_var`.
pub fn resolve_command(command: &str, path_var: &OsStr) -> Option<PathBuf> {
    if command.is_empty() {
        return None;
    }

    let as_path = Path::new(command);
    if as_path.components().count() > 1 || as_path.is_absolute() {
        return as_path.is_file().then(|| as_path.to_path_buf());
    }

    for segment in std::env::split_paths(path_var) {
        for name in candidate_names(command) {
            let candidate = segment.join(&name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    None
}

#[cfg(windows)]
fn candidate_names(command: &str) -> Vec<String> {
    if Path::new(command).extension().is_some() {
        vec![command.to_string()]
    } else {
        vec![command.to_string(), format!("{}.exe", command)]
    }
}

#[cfg(not(windows))]
fn candidate_names(command: &str) -> Vec<String> {
    vec![command.to_string()]
}

impl EngineStatus {
    pub fn is_available(&self) -> bool {
        self.resolved.is_some()
    }

    /// Human-readable status lines for `status` command.
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();

        match &self.resolved {
            Some(path) => lines.push(format!(
                "  Engine:    {:<24} ok ({})",
                self.command,
                path.display()
            )),
            None => lines.push(format!("  Engine:    {:<24} --", self.command)),
        }

        if self.tools_dir_present {
            lines.push("  Tools dir: present                  ok".to_string());
        } else {
            lines.push("  Tools dir: missing                  --".to_string());
        }

        lines
    }
}
