//! On-disk catalog layouts, one struct family per schema version.
//!
//! These mirror the TOML document exactly and carry no invariants of their
//! own. [`super::TomlCatalog`] validates them and lowers both versions into
//! the shared [`CatalogDocument`](super::CatalogDocument) model.

use serde::{Deserialize, Serialize};

/// Key holding the document schema version.
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Version written by [`super::to_document_string`].
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Every version the deserializer knows how to lower.
pub const SUPPORTED_SCHEMA_VERSIONS: &[u32] = &[1, 2];

// ── Version 2 ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentV2 {
    pub schema_version: u32,

    #[serde(default)]
    pub services: Vec<ServiceV2>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceV2 {
    pub id: String,

    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    pub urls: Vec<String>,

    #[serde(default)]
    pub requires_certificate: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub companions: Vec<CompanionV2>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionV2 {
    pub id: String,

    pub name: String,

    pub package: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    #[serde(default)]
    pub arguments: Vec<String>,

    #[serde(default = "default_true")]
    pub run_on_start: bool,

    #[serde(default)]
    pub optional: bool,
}

// ── Version 1 (legacy) ──

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentV1 {
    #[allow(dead_code)]
    pub schema_version: u32,

    #[serde(default)]
    pub services: Vec<ServiceV1>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceV1 {
    pub id: String,

    pub display_name: String,

    #[serde(default)]
    pub category: Option<String>,

    pub url: String,

    #[serde(default)]
    pub requires_certificate: bool,

    #[serde(default)]
    pub packages: Vec<PackageV1>,
}

/// v1 packages are always required and always run at sandbox start.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageV1 {
    pub name: String,

    pub package: String,

    #[serde(default)]
    pub arguments: Vec<String>,
}

fn default_true() -> bool {
    true
}
