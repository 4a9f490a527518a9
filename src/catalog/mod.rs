//! Service catalog: the declarative list of target web services and what each
//! one needs inside its sandbox.
//!
//! The catalog is a versioned TOML document (see [`schema`]). Parsing is a
//! pure transformation: no filesystem or network access happens here.

pub mod schema;

use std::collections::HashSet;

use tracing::debug;
use url::Url;

use schema::{
    CURRENT_SCHEMA_VERSION, CompanionV2, DocumentV1, DocumentV2, SCHEMA_VERSION_KEY,
    SUPPORTED_SCHEMA_VERSIONS, ServiceV2,
};

/// Parsed catalog. Services keep their source order, which is also the
/// default display and selection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDocument {
    pub schema_version: u32,
    pub services: Vec<CatalogService>,
}

/// One target web service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogService {
    /// Unique within the document.
    pub id: String,
    pub display_name: String,
    pub category: Option<String>,
    /// At least one; the first is the landing page.
    pub urls: Vec<Url>,
    pub requires_certificate: bool,
    pub notes: Option<String>,
    /// Companion tools in catalog-declared order.
    pub companions: Vec<CompanionTool>,
}

/// An installer or plugin that has to be staged inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionTool {
    /// Unique within its service.
    pub id: String,
    pub name: String,
    /// Bare file name of the package inside the host tools directory.
    pub package: String,
    pub source_url: Option<Url>,
    pub arguments: Vec<String>,
    pub run_on_start: bool,
    pub optional: bool,
}

impl CatalogDocument {
    /// Look up a service by identifier.
    pub fn service(&self, id: &str) -> Option<&CatalogService> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Distinct categories in first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.services
            .iter()
            .filter_map(|s| s.category.as_deref())
            .filter(|c| seen.insert(*c))
            .collect()
    }
}

impl CatalogService {
    /// The URL the sandboxed browser opens first.
    pub fn primary_url(&self) -> &Url {
        // Validation guarantees at least one URL.
        &self.urls[0]
    }
}

/// Malformed, unrecognized, or structurally invalid catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogFormatError {
    #[error("catalog is not valid UTF-8")]
    NotUtf8,

    #[error("catalog is not valid TOML: {0}")]
    Syntax(String),

    #[error("catalog has no `schema_version` key")]
    MissingVersion,

    #[error("catalog `schema_version` must be an integer")]
    InvalidVersion,

    #[error("unsupported catalog schema version {found} (supported: {:?})", SUPPORTED_SCHEMA_VERSIONS)]
    UnsupportedVersion { found: i64 },

    #[error("catalog structure is invalid: {0}")]
    Structure(String),

    #[error("service #{index} has an empty `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("duplicate service id `{0}`")]
    DuplicateServiceId(String),

    #[error("service id `{0}` may only contain ASCII letters, digits, `-` and `_`")]
    InvalidServiceId(String),

    #[error("service `{0}` lists no URLs")]
    NoUrls(String),

    #[error("service `{service}` has malformed URL `{url}`: {reason}")]
    MalformedUrl {
        service: String,
        url: String,
        reason: String,
    },

    #[error("service `{service}` has a companion with an empty `{field}`")]
    MissingCompanionField {
        service: String,
        field: &'static str,
    },

    #[error("service `{service}` has duplicate companion id `{companion}`")]
    DuplicateCompanionId { service: String, companion: String },

    #[error("companion `{companion}` of service `{service}` has invalid package name `{package}`")]
    InvalidPackage {
        service: String,
        companion: String,
        package: String,
    },
}

/// Turns a raw catalog blob into a [`CatalogDocument`].
pub trait CatalogDeserializer: Send + Sync {
    fn deserialize(&self, raw: &[u8]) -> Result<CatalogDocument, CatalogFormatError>;
}

/// TOML catalog reader for schema versions 1 and 2.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlCatalog;

impl CatalogDeserializer for TomlCatalog {
    fn deserialize(&self, raw: &[u8]) -> Result<CatalogDocument, CatalogFormatError> {
        let text = std::str::from_utf8(raw).map_err(|_| CatalogFormatError::NotUtf8)?;

        let table: toml::Table =
            toml::from_str(text).map_err(|e| CatalogFormatError::Syntax(e.message().to_string()))?;
        let version = match table.get(SCHEMA_VERSION_KEY) {
            None => return Err(CatalogFormatError::MissingVersion),
            Some(toml::Value::Integer(v)) => *v,
            Some(_) => return Err(CatalogFormatError::InvalidVersion),
        };

        let services = match version {
            1 => {
                let doc: DocumentV1 = toml::from_str(text)
                    .map_err(|e| CatalogFormatError::Structure(e.message().to_string()))?;
                doc.services.into_iter().map(lower_v1).collect()
            }
            2 => {
                let doc: DocumentV2 = toml::from_str(text)
                    .map_err(|e| CatalogFormatError::Structure(e.message().to_string()))?;
                doc.services
            }
            found => return Err(CatalogFormatError::UnsupportedVersion { found }),
        };

        let document = CatalogDocument {
            schema_version: version as u32,
            services: validate_services(services)?,
        };

        debug!(
            "Parsed catalog v{} with {} services",
            document.schema_version,
            document.services.len()
        );
        Ok(document)
    }
}

/// Render a document back into the current (v2) on-disk structure.
pub fn to_document_string(document: &CatalogDocument) -> Result<String, toml::ser::Error> {
    let doc = DocumentV2 {
        schema_version: CURRENT_SCHEMA_VERSION,
        services: document
            .services
            .iter()
            .map(|s| ServiceV2 {
                id: s.id.clone(),
                display_name: s.display_name.clone(),
                category: s.category.clone(),
                urls: s.urls.iter().map(|u| u.to_string()).collect(),
                requires_certificate: s.requires_certificate,
                notes: s.notes.clone(),
                companions: s
                    .companions
                    .iter()
                    .map(|c| CompanionV2 {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        package: c.package.clone(),
                        source_url: c.source_url.as_ref().map(|u| u.to_string()),
                        arguments: c.arguments.clone(),
                        run_on_start: c.run_on_start,
                        optional: c.optional,
                    })
                    .collect(),
            })
            .collect(),
    };
    toml::to_string_pretty(&doc)
}

fn lower_v1(service: schema::ServiceV1) -> ServiceV2 {
    ServiceV2 {
        id: service.id,
        display_name: service.display_name,
        category: service.category,
        urls: vec![service.url],
        requires_certificate: service.requires_certificate,
        notes: None,
        companions: service
            .packages
            .into_iter()
            .map(|p| CompanionV2 {
                id: p.name.clone(),
                name: p.name,
                package: p.package,
                source_url: None,
                arguments: p.arguments,
                run_on_start: true,
                optional: false,
            })
            .collect(),
    }
}

fn validate_services(raw: Vec<ServiceV2>) -> Result<Vec<CatalogService>, CatalogFormatError> {
    let mut seen = HashSet::new();
    let mut services = Vec::with_capacity(raw.len());

    for (index, service) in raw.into_iter().enumerate() {
        let id = service.id.trim().to_string();
        if id.is_empty() {
            return Err(CatalogFormatError::MissingField { index, field: "id" });
        }
        if service.display_name.trim().is_empty() {
            return Err(CatalogFormatError::MissingField {
                index,
                field: "display_name",
            });
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CatalogFormatError::InvalidServiceId(id));
        }
        // `kb-star` and `kb_star` would share a sandbox name.
        if !seen.insert(id.replace('-', "_")) {
            return Err(CatalogFormatError::DuplicateServiceId(id));
        }

        if service.urls.is_empty() {
            return Err(CatalogFormatError::NoUrls(id));
        }
        let urls = service
            .urls
            .iter()
            .map(|u| parse_web_url(&id, u))
            .collect::<Result<Vec<_>, _>>()?;

        let companions = validate_companions(&id, service.companions)?;

        services.push(CatalogService {
            id,
            display_name: service.display_name.trim().to_string(),
            category: service.category.filter(|c| !c.trim().is_empty()),
            urls,
            requires_certificate: service.requires_certificate,
            notes: service.notes,
            companions,
        });
    }

    Ok(services)
}

fn validate_companions(
    service: &str,
    raw: Vec<CompanionV2>,
) -> Result<Vec<CompanionTool>, CatalogFormatError> {
    let mut seen = HashSet::new();
    let mut companions = Vec::with_capacity(raw.len());

    for companion in raw {
        let id = companion.id.trim().to_string();
        if id.is_empty() {
            return Err(CatalogFormatError::MissingCompanionField {
                service: service.to_string(),
                field: "id",
            });
        }
        if companion.name.trim().is_empty() {
            return Err(CatalogFormatError::MissingCompanionField {
                service: service.to_string(),
                field: "name",
            });
        }
        if !seen.insert(id.clone()) {
            return Err(CatalogFormatError::DuplicateCompanionId {
                service: service.to_string(),
                companion: id,
            });
        }
        if !is_bare_file_name(&companion.package) {
            return Err(CatalogFormatError::InvalidPackage {
                service: service.to_string(),
                companion: id,
                package: companion.package,
            });
        }
        let source_url = companion
            .source_url
            .as_deref()
            .map(|u| parse_web_url(service, u))
            .transpose()?;

        companions.push(CompanionTool {
            id,
            name: companion.name.trim().to_string(),
            package: companion.package,
            source_url,
            arguments: companion.arguments,
            run_on_start: companion.run_on_start,
            optional: companion.optional,
        });
    }

    Ok(companions)
}

fn parse_web_url(service: &str, raw: &str) -> Result<Url, CatalogFormatError> {
    let malformed = |reason: String| CatalogFormatError::MalformedUrl {
        service: service.to_string(),
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw.trim()).map_err(|e| malformed(e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "http" | "https" => Err(malformed("missing host".to_string())),
        other => Err(malformed(format!("unsupported scheme `{}`", other))),
    }
}

fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', ':'])
        && !name.chars().any(|c| c.is_control())
}
