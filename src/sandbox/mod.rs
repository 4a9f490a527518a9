//! Sandbox creation: the pipeline from catalog entry to a configuration file
//! the isolation engine can start.
//!
//! [`SandboxBuilder`] looks up the service, scans for certificates when the
//! service needs one, builds and renders the spec, writes it under the output
//! directory and hands back a [`LaunchDescriptor`]. The engine itself is an
//! external program; [`executor::launch`] only starts it.
//!
//! Every component is passed in explicitly. [`SandboxBuilder::new`] wires the
//! default implementations from a [`Config`]; [`SandboxBuilder::with_components`]
//! accepts any others.

pub mod detect;
pub mod executor;

pub use detect::{EngineStatus, detect_engine};
pub use executor::launch;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{
    CatalogDeserializer, CatalogDocument, CatalogFormatError, CatalogService, TomlCatalog,
};
use crate::certs::{CertPair, CertPairScanner, FsScanner, ScanError, ScanReport, ScanWarning};
use crate::config::Config;
use crate::spec::{
    BuildError, IniRenderer, MappingOrigin, SandboxSpec, SandboxSpecBuilder, SandboxSpecSerializer,
    SerializationError, SpecAssembler, UserSelections,
};

/// Command and arguments that start the isolation engine on a rendered
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchDescriptor {
    pub command: String,
    pub args: Vec<String>,
}

impl LaunchDescriptor {
    /// Substitute `{config}` and `{sandbox}` in `args`.
    pub fn from_template(command: &str, args: &[String], config: &Path, sandbox: &str) -> Self {
        let config = config.to_string_lossy();
        Self {
            command: command.to_string(),
            args: args
                .iter()
                .map(|a| a.replace("{config}", &config).replace("{sandbox}", sandbox))
                .collect(),
        }
    }

    /// Shell-style rendering for display.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.command)
            .chain(&self.args)
            .map(|part| shell_quote(part))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for LaunchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_.:/%+=,@{}".contains(ch))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\"'\"'"))
    }
}

/// Everything a successful sandbox request produced.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub descriptor: LaunchDescriptor,
    /// Where the rendered configuration was written.
    pub config_path: PathBuf,
    pub spec: SandboxSpec,
    /// Non-fatal scan problems.
    pub warnings: Vec<ScanWarning>,
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error(transparent)]
    CatalogFormat(#[from] CatalogFormatError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("service `{0}` is not in the catalog")]
    NotFound(String),

    #[error("internal error while rendering the sandbox configuration: {0}")]
    Serialization(#[from] SerializationError),

    #[error("companion `{id}` is missing: expected package at {}", .path.display())]
    CompanionMissing { id: String, path: PathBuf },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl SandboxError {
    /// Short category shown ahead of the message.
    pub fn category(&self) -> &'static str {
        match self {
            SandboxError::CatalogFormat(_) => "invalid catalog",
            SandboxError::Scan(ScanError::Cancelled) => "cancelled",
            SandboxError::Scan(_) => "certificate search failed",
            SandboxError::Build(BuildError::SelectionRequired { .. }) => "certificate choice needed",
            SandboxError::Build(BuildError::NoCertificateAvailable(_)) => "no certificate",
            SandboxError::Build(BuildError::InvalidSelection { .. }) => "invalid selection",
            SandboxError::Build(BuildError::DuplicateMappingTarget(_)) => "conflicting files",
            SandboxError::NotFound(_) => "unknown service",
            SandboxError::Serialization(_) => "internal error",
            SandboxError::CompanionMissing { .. } => "missing companion tool",
            SandboxError::Io { .. } => "file access",
        }
    }

    fn io(context: impl Into<String>, source: io::Error) -> Self {
        SandboxError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Surfaces results to the operator and collects choices.
pub trait ResultPresenter: Send + Sync {
    /// Pick one of `available` for `service`; `None` declines.
    fn choose_certificate(&self, service: &CatalogService, available: &[CertPair])
    -> Option<usize>;

    fn show_warnings(&self, warnings: &[ScanWarning]);

    fn show_error(&self, category: &str, message: &str);
}

/// Drives catalog lookup, certificate scan, spec building and rendering.
pub struct SandboxBuilder {
    catalog_reader: Box<dyn CatalogDeserializer>,
    scanner: Arc<dyn CertPairScanner>,
    spec_builder: Box<dyn SandboxSpecBuilder>,
    serializer: Box<dyn SandboxSpecSerializer>,
    presenter: Option<Arc<dyn ResultPresenter>>,
    engine_command: String,
    engine_args: Vec<String>,
    output_dir: PathBuf,
    scan_timeout: Option<Duration>,
}

impl SandboxBuilder {
    pub fn new(config: &Config) -> Self {
        Self::with_components(
            Box::new(TomlCatalog),
            Arc::new(FsScanner::new(config.scan_options())),
            Box::new(SpecAssembler::new(config.spec_layout())),
            Box::new(IniRenderer),
        )
        .with_engine(&config.engine.command, &config.engine.args)
        .with_output_dir(config.output_dir())
        .with_scan_timeout(config.scan_timeout())
    }

    pub fn with_components(
        catalog_reader: Box<dyn CatalogDeserializer>,
        scanner: Arc<dyn CertPairScanner>,
        spec_builder: Box<dyn SandboxSpecBuilder>,
        serializer: Box<dyn SandboxSpecSerializer>,
    ) -> Self {
        Self {
            catalog_reader,
            scanner,
            spec_builder,
            serializer,
            presenter: None,
            engine_command: String::new(),
            engine_args: Vec::new(),
            output_dir: PathBuf::from("."),
            scan_timeout: None,
        }
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn ResultPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn with_engine(mut self, command: &str, args: &[String]) -> Self {
        self.engine_command = command.to_string();
        self.engine_args = args.to_vec();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Read and parse a catalog file.
    pub async fn load_catalog(&self, path: &Path) -> Result<CatalogDocument, SandboxError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| SandboxError::io(format!("Failed to read {}", path.display()), e))?;
        let catalog = self.catalog_reader.deserialize(&raw)?;
        debug!(
            "Loaded catalog {} with {} services",
            path.display(),
            catalog.services.len()
        );
        Ok(catalog)
    }

    /// Scan `roots`, honouring the configured timeout.
    ///
    /// A timeout cancels the walk through a child of `cancel`.
    pub async fn scan(
        &self,
        roots: &[PathBuf],
        cancel: CancellationToken,
    ) -> Result<ScanReport, SandboxError> {
        let token = cancel.child_token();
        let scan = self.scanner.scan(roots, token.clone());

        let report = match self.scan_timeout {
            Some(limit) => match tokio::time::timeout(limit, scan).await {
                Ok(result) => result?,
                Err(_) => {
                    token.cancel();
                    return Err(ScanError::TimedOut(limit).into());
                }
            },
            None => scan.await?,
        };

        for warning in &report.warnings {
            debug!("Scan warning: {}", warning);
        }
        Ok(report)
    }

    pub async fn create_sandbox(
        &self,
        catalog: &CatalogDocument,
        service_id: &str,
        roots: &[PathBuf],
        selections: UserSelections,
        cancel: CancellationToken,
    ) -> Result<SandboxOutcome, SandboxError> {
        let service = catalog
            .service(service_id)
            .ok_or_else(|| SandboxError::NotFound(service_id.to_string()))?;

        // The builder only runs on a complete pair set.
        let report = if service.requires_certificate {
            self.scan(roots, cancel).await?
        } else {
            debug!("Service {} needs no certificate; skipping scan", service.id);
            ScanReport::default()
        };

        let spec = self.build_spec(service, &report.pairs, selections).await?;

        for mapping in spec.tool_mappings() {
            if !mapping.host.is_file() {
                let id = match &mapping.origin {
                    MappingOrigin::Tool { id } => id.clone(),
                    MappingOrigin::Certificate { .. } => String::new(),
                };
                return Err(SandboxError::CompanionMissing {
                    id,
                    path: mapping.host.clone(),
                });
            }
        }

        let text = self.serializer.serialize(&spec)?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| {
                SandboxError::io(
                    format!("Failed to create {}", self.output_dir.display()),
                    e,
                )
            })?;
        let config_path = self.output_dir.join(format!(
            "{}.{}",
            spec.box_name,
            self.serializer.extension()
        ));
        tokio::fs::write(&config_path, text)
            .await
            .map_err(|e| SandboxError::io(format!("Failed to write {}", config_path.display()), e))?;

        let descriptor = LaunchDescriptor::from_template(
            &self.engine_command,
            &self.engine_args,
            &config_path,
            &spec.box_name,
        );
        info!(
            "Wrote sandbox configuration {} for service {}",
            config_path.display(),
            service.id
        );

        Ok(SandboxOutcome {
            descriptor,
            config_path,
            spec,
            warnings: report.warnings,
        })
    }

    async fn build_spec(
        &self,
        service: &CatalogService,
        pairs: &[CertPair],
        selections: UserSelections,
    ) -> Result<SandboxSpec, SandboxError> {
        match self.spec_builder.build(service, pairs, &selections) {
            Err(BuildError::SelectionRequired { service: id, available }) => {
                let Some(presenter) = self.presenter.clone() else {
                    return Err(BuildError::SelectionRequired {
                        service: id,
                        available,
                    }
                    .into());
                };

                // The presenter may block on terminal input.
                let prompt_service = service.clone();
                let (choice, available) = tokio::task::spawn_blocking(move || {
                    let choice = presenter.choose_certificate(&prompt_service, &available);
                    (choice, available)
                })
                .await
                .map_err(|e| SandboxError::io("Certificate prompt failed", io::Error::other(e)))?;

                let Some(index) = choice.filter(|&i| i < available.len()) else {
                    warn!("No certificate chosen for {}", id);
                    return Err(BuildError::SelectionRequired {
                        service: id,
                        available,
                    }
                    .into());
                };

                let chosen = UserSelections {
                    certificates: vec![available[index].fingerprint.clone()],
                    companions: selections.companions,
                };
                Ok(self.spec_builder.build(service, pairs, &chosen)?)
            }
            other => Ok(other?),
        }
    }
}
