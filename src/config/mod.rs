use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::certs::{ScanOptions, TieBreakPolicy};
use crate::paths::Paths;
use crate::spec::SpecLayout;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Resolved XDG-compliant paths (not serialized)
    #[serde(skip)]
    pub paths: Paths,

    /// File this config was loaded from when not the default location
    #[serde(skip)]
    pub source: Option<PathBuf>,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub sandbox: SandboxSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Catalog file. Empty means data_dir/catalog.toml
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Directories searched for certificates, in order
    #[serde(default = "default_scan_roots")]
    pub roots: Vec<String>,

    /// Maximum directory depth below each root (unset = unlimited)
    #[serde(default)]
    pub max_depth: Option<usize>,

    #[serde(default)]
    pub follow_symlinks: bool,

    /// Files larger than this are not inspected
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// "latest-expiry" | "earliest-expiry" | "first-found"
    #[serde(default)]
    pub tie_break: TieBreakPolicy,

    /// Abort the scan after this many seconds (unset = no limit)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Isolation engine executable (name on PATH or absolute path)
    #[serde(default = "default_engine_command")]
    pub command: String,

    /// Arguments; `{config}` and `{sandbox}` are substituted
    #[serde(default = "default_engine_args")]
    pub args: Vec<String>,

    /// Where rendered configurations are written. Empty means state_dir/sandboxes
    #[serde(default)]
    pub output_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Sandbox-side folder for exposed certificates
    #[serde(default = "default_certificate_root")]
    pub certificate_root: String,

    /// Sandbox-side folder for staged companion packages
    #[serde(default = "default_tools_root")]
    pub tools_root: String,

    /// Host folder holding companion packages. Empty means data_dir/tools
    #[serde(default)]
    pub tools_dir: String,

    /// Browser command run inside the sandbox
    #[serde(default = "default_browser")]
    pub browser: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_scan_roots() -> Vec<String> {
    vec!["~/NPKI".to_string()]
}
fn default_max_file_size() -> u64 {
    64 * 1024
}
fn default_engine_command() -> String {
    "sandbox-engine".to_string()
}
fn default_engine_args() -> Vec<String> {
    vec![
        "--config".to_string(),
        "{config}".to_string(),
        "--box".to_string(),
        "{sandbox}".to_string(),
    ]
}
fn default_name_prefix() -> String {
    "certbox".to_string()
}
fn default_certificate_root() -> String {
    "NPKI".to_string()
}
fn default_tools_root() -> String {
    "Tools".to_string()
}
fn default_browser() -> String {
    "firefox".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: default_scan_roots(),
            max_depth: None,
            follow_symlinks: false,
            max_file_size: default_max_file_size(),
            tie_break: TieBreakPolicy::default(),
            timeout_secs: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            args: default_engine_args(),
            output_dir: String::new(),
        }
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            certificate_root: default_certificate_root(),
            tools_root: default_tools_root(),
            tools_dir: String::new(),
            browser: default_browser(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from `explicit`, or from the default location when `None`.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let paths = Paths::resolve()?;
        paths.ensure_dirs()?;
        Self::load_with_paths(paths, explicit)
    }

    /// Load using already-resolved paths. A missing default config file is
    /// created from the template; a missing explicit one is an error.
    pub fn load_with_paths(paths: Paths, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => {
                anyhow::ensure!(p.exists(), "Config file not found: {}", p.display());
                p.to_path_buf()
            }
            None => paths.config_file(),
        };

        if !path.exists() {
            // Create default config file on first run
            let config = Config {
                paths,
                ..Config::default()
            };
            config.save_with_template()?;
            return Ok(config);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.paths = paths;
        config.source = explicit.map(Path::to_path_buf);

        Ok(config)
    }

    /// File `save` writes to.
    pub fn file_path(&self) -> PathBuf {
        self.source
            .clone()
            .unwrap_or_else(|| self.paths.config_file())
    }

    pub fn save(&self) -> Result<()> {
        let path = self.file_path();

        // Create parent directories
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;

        Ok(())
    }

    /// Save config with a helpful template (for first-time setup)
    pub fn save_with_template(&self) -> Result<()> {
        let path = self.paths.config_file();

        // Create parent directories
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        eprintln!("Created default config at {}", path.display());

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let paths = Paths::resolve()?;
        Ok(paths.config_file())
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["catalog", "path"] => Ok(self.catalog.path.clone()),
            ["scan", "roots"] => Ok(self.scan.roots.join(",")),
            ["scan", "max_depth"] => Ok(optional(self.scan.max_depth)),
            ["scan", "follow_symlinks"] => Ok(self.scan.follow_symlinks.to_string()),
            ["scan", "max_file_size"] => Ok(self.scan.max_file_size.to_string()),
            ["scan", "tie_break"] => Ok(self.scan.tie_break.to_string()),
            ["scan", "timeout_secs"] => Ok(optional(self.scan.timeout_secs)),
            ["engine", "command"] => Ok(self.engine.command.clone()),
            ["engine", "args"] => Ok(self.engine.args.join(" ")),
            ["engine", "output_dir"] => Ok(self.engine.output_dir.clone()),
            ["sandbox", "name_prefix"] => Ok(self.sandbox.name_prefix.clone()),
            ["sandbox", "certificate_root"] => Ok(self.sandbox.certificate_root.clone()),
            ["sandbox", "tools_root"] => Ok(self.sandbox.tools_root.clone()),
            ["sandbox", "tools_dir"] => Ok(self.sandbox.tools_dir.clone()),
            ["sandbox", "browser"] => Ok(self.sandbox.browser.clone()),
            ["logging", "level"] => Ok(self.logging.level.clone()),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["catalog", "path"] => self.catalog.path = value.to_string(),
            ["scan", "roots"] => {
                self.scan.roots = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            }
            ["scan", "max_depth"] => self.scan.max_depth = parse_optional(value)?,
            ["scan", "follow_symlinks"] => self.scan.follow_symlinks = value.parse()?,
            ["scan", "max_file_size"] => self.scan.max_file_size = value.parse()?,
            ["scan", "tie_break"] => {
                self.scan.tie_break = value.parse().map_err(anyhow::Error::msg)?
            }
            ["scan", "timeout_secs"] => self.scan.timeout_secs = parse_optional(value)?,
            ["engine", "command"] => self.engine.command = value.to_string(),
            ["engine", "args"] => {
                self.engine.args = value.split_whitespace().map(String::from).collect()
            }
            ["engine", "output_dir"] => self.engine.output_dir = value.to_string(),
            ["sandbox", "name_prefix"] => self.sandbox.name_prefix = value.to_string(),
            ["sandbox", "certificate_root"] => self.sandbox.certificate_root = value.to_string(),
            ["sandbox", "tools_root"] => self.sandbox.tools_root = value.to_string(),
            ["sandbox", "tools_dir"] => self.sandbox.tools_dir = value.to_string(),
            ["sandbox", "browser"] => self.sandbox.browser = value.to_string(),
            ["logging", "level"] => self.logging.level = value.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        }

        Ok(())
    }

    // ── Resolved values ──

    pub fn catalog_path(&self) -> PathBuf {
        expand_or(&self.catalog.path, || self.paths.catalog_file())
    }

    pub fn scan_roots(&self) -> Vec<PathBuf> {
        self.scan.roots.iter().map(|r| expand_path(r)).collect()
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            max_depth: self.scan.max_depth,
            follow_symlinks: self.scan.follow_symlinks,
            max_file_size: self.scan.max_file_size,
            tie_break: self.scan.tie_break,
        }
    }

    pub fn scan_timeout(&self) -> Option<Duration> {
        self.scan.timeout_secs.map(Duration::from_secs)
    }

    pub fn output_dir(&self) -> PathBuf {
        expand_or(&self.engine.output_dir, || self.paths.sandboxes_dir())
    }

    pub fn tools_dir(&self) -> PathBuf {
        expand_or(&self.sandbox.tools_dir, || self.paths.tools_dir())
    }

    pub fn spec_layout(&self) -> SpecLayout {
        SpecLayout {
            name_prefix: self.sandbox.name_prefix.clone(),
            certificate_root: self.sandbox.certificate_root.clone(),
            tools_root: self.sandbox.tools_root.clone(),
            tools_dir: self.tools_dir(),
            browser: self.sandbox.browser.clone(),
        }
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn parse_optional<T>(value: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "none" {
        Ok(None)
    } else {
        Ok(Some(trimmed.parse()?))
    }
}

fn expand_path(value: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(value.trim()).to_string())
}

fn expand_or(value: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    if value.trim().is_empty() {
        default()
    } else {
        expand_path(value)
    }
}

/// Default config template with helpful comments (used for first-time setup)
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# certbox Configuration
# Auto-created on first run. Edit as needed.

[catalog]
# Service catalog (TOML, schema_version 1 or 2)
# Default: XDG data dir (~/.local/share/certbox/catalog.toml)
# path = "~/catalogs/services.toml"

[scan]
# Directories searched for personal certificates, in order
roots = ["~/NPKI"]
# max_depth = 8                         # default: unlimited
follow_symlinks = false
max_file_size = 65536                   # bytes; larger files are skipped
# When several certificates fit one key:
#   latest-expiry | earliest-expiry | first-found
tie_break = "latest-expiry"
# timeout_secs = 30                     # default: no limit

[engine]
# Isolation engine that consumes the rendered configuration
command = "sandbox-engine"
args = ["--config", "{config}", "--box", "{sandbox}"]
# Default: XDG state dir (~/.local/state/certbox/sandboxes)
# output_dir = "~/sandboxes"

[sandbox]
name_prefix = "certbox"
certificate_root = "NPKI"
tools_root = "Tools"
# Host folder with companion packages
# Default: XDG data dir (~/.local/share/certbox/tools)
# tools_dir = "~/Downloads/certbox-tools"
browser = "firefox"

[logging]
level = "info"
"#;
