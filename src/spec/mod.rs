//! The resolved description of one sandbox and how it is put together.
//!
//! [`builder`] turns a catalog service, discovered certificate pairs and the
//! operator's selections into a [`SandboxSpec`]; [`serializer`] renders it
//! into the isolation engine's configuration syntax.

pub mod builder;
pub mod serializer;

pub use builder::{SandboxSpecBuilder, SpecAssembler};
pub use serializer::{IniRenderer, SandboxSpecSerializer, SerializationError};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogService, CompanionTool};
use crate::certs::CertPair;

/// Fully resolved contents and startup behaviour of one sandbox.
///
/// Every mapping target is unique, and every tool launch entry points at a
/// staged companion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    /// Human-readable name shown by the engine.
    pub name: String,
    /// Engine section identifier, `[A-Za-z0-9_]` only.
    pub box_name: String,
    pub service: CatalogService,
    /// Exposed certificates in selection order.
    pub certificates: Vec<CertPair>,
    /// Staged companions in catalog order.
    pub companions: Vec<CompanionTool>,
    pub mappings: Vec<Mapping>,
    pub launch: Vec<LaunchEntry>,
}

impl SandboxSpec {
    pub fn certificate_mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings
            .iter()
            .filter(|m| matches!(m.origin, MappingOrigin::Certificate { .. }))
    }

    pub fn tool_mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings
            .iter()
            .filter(|m| matches!(m.origin, MappingOrigin::Tool { .. }))
    }
}

/// Host file exposed inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub host: PathBuf,
    /// Relative to the engine's sandbox root, `/`-separated.
    pub sandbox: String,
    pub read_only: bool,
    pub origin: MappingOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingOrigin {
    /// 1-based position in [`SandboxSpec::certificates`].
    Certificate { index: usize },
    /// Companion id.
    Tool { id: String },
}

/// Process started when the sandbox comes up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchEntry {
    pub command: String,
    pub args: Vec<String>,
    pub target: LaunchTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// A staged companion, by id.
    Tool { id: String },
    /// The engine-provided browser opening the service URLs.
    Browser,
}

/// Choices made by the operator for one sandbox request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSelections {
    /// Fingerprint prefixes (at least 8 hex characters) or exact public
    /// certificate paths.
    #[serde(default)]
    pub certificates: Vec<String>,
    /// Ids of optional companions to stage.
    #[serde(default)]
    pub companions: Vec<String>,
}

impl UserSelections {
    pub fn with_certificate(mut self, selector: impl Into<String>) -> Self {
        self.certificates.push(selector.into());
        self
    }

    pub fn with_companion(mut self, id: impl Into<String>) -> Self {
        self.companions.push(id.into());
        self
    }
}

/// Sandbox-side layout and host locations used while building a spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecLayout {
    /// Prefix of the engine section name.
    pub name_prefix: String,
    /// Sandbox directory holding one numbered folder per certificate.
    pub certificate_root: String,
    /// Sandbox directory holding staged companion packages.
    pub tools_root: String,
    /// Host directory holding downloaded companion packages.
    pub tools_dir: PathBuf,
    /// Browser command run inside the sandbox.
    pub browser: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("service `{service}` needs a certificate choice among {} candidates", .available.len())]
    SelectionRequired {
        service: String,
        available: Vec<CertPair>,
    },

    #[error("service `{0}` requires a personal certificate but none was found")]
    NoCertificateAvailable(String),

    #[error("invalid selection `{selector}`: {reason}")]
    InvalidSelection { selector: String, reason: String },

    #[error("two mappings target `{0}` inside the sandbox")]
    DuplicateMappingTarget(String),
}
