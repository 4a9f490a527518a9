//! Personal certificate discovery.
//!
//! Walks operator-designated search roots, classifies every small file by
//! content (never by name alone), and pairs public certificates with their
//! private keys.
//!
//! Pairing runs in two phases:
//! 1. **Key material**: a certificate and a key whose public key matches
//!    (RSA modulus or EC point) are paired directly.
//! 2. **Co-location**: encrypted keys carry no usable identity, so the
//!    remaining certificates and opaque keys are paired per directory. A
//!    file-stem affinity (`signCert` / `signPri`) settles one-to-one matches
//!    and the configured [`TieBreakPolicy`] decides the rest.
//!
//! Artifacts with no counterpart are dropped: a lone certificate or key on
//! disk is normal, not an error.

mod classify;
mod scanner;

pub use scanner::FsScanner;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// How sure the scanner is that the two artifacts belong together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PairConfidence {
    /// One certificate matched one key with no alternatives.
    Exact,
    /// The tie-break policy chose among several candidates.
    BestEffort,
}

impl fmt::Display for PairConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairConfidence::Exact => f.write_str("exact"),
            PairConfidence::BestEffort => f.write_str("best-effort"),
        }
    }
}

/// A public certificate matched with its private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertPair {
    pub subject: String,
    pub issuer: String,
    /// Colon-separated hex serial number.
    pub serial: String,
    pub not_after: DateTime<Utc>,
    pub public_path: PathBuf,
    pub private_path: PathBuf,
    pub confidence: PairConfidence,
    /// Lowercase hex SHA-256 of the certificate DER.
    pub fingerprint: String,
}

impl CertPair {
    /// First 16 hex characters of the fingerprint, for display and selection.
    pub fn short_fingerprint(&self) -> &str {
        let end = self.fingerprint.len().min(16);
        &self.fingerprint[..end]
    }

    /// Identity used to group and order pairs.
    pub fn pairing_key(&self) -> (&str, &str, &str) {
        (&self.subject, &self.issuer, &self.serial)
    }
}

/// A non-fatal problem with one file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanWarning {
    pub path: PathBuf,
    pub message: String,
}

impl ScanWarning {
    pub fn new(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Result of a completed scan: pairs in pairing-key order plus the warnings
/// collected along the way.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub pairs: Vec<CertPair>,
    pub warnings: Vec<ScanWarning>,
}

impl IntoIterator for ScanReport {
    type Item = CertPair;
    type IntoIter = std::vec::IntoIter<CertPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.into_iter()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("no certificate search roots configured")]
    NoSearchRoots,

    #[error("none of the certificate search roots is accessible: {}", display_paths(.roots))]
    AllRootsInaccessible { roots: Vec<PathBuf> },

    #[error("certificate scan was cancelled")]
    Cancelled,

    #[error("certificate scan timed out after {0:?}")]
    TimedOut(Duration),

    #[error("certificate scan worker failed: {0}")]
    Worker(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rule for choosing among several candidates that match the same artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreakPolicy {
    /// Furthest not-after wins.
    #[default]
    LatestExpiry,
    /// Nearest not-after wins.
    EarliestExpiry,
    /// First candidate in discovery order wins.
    FirstFound,
}

impl fmt::Display for TieBreakPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TieBreakPolicy::LatestExpiry => "latest-expiry",
            TieBreakPolicy::EarliestExpiry => "earliest-expiry",
            TieBreakPolicy::FirstFound => "first-found",
        })
    }
}

impl FromStr for TieBreakPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "latest-expiry" => Ok(TieBreakPolicy::LatestExpiry),
            "earliest-expiry" => Ok(TieBreakPolicy::EarliestExpiry),
            "first-found" => Ok(TieBreakPolicy::FirstFound),
            other => Err(format!(
                "unknown tie-break policy `{}` (expected latest-expiry, earliest-expiry or first-found)",
                other
            )),
        }
    }
}

/// Walk tuning for [`FsScanner`].
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_depth: Option<usize>,
    pub follow_symlinks: bool,
    /// Larger files are skipped without a warning.
    pub max_file_size: u64,
    pub tie_break: TieBreakPolicy,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_depth: None,
            follow_symlinks: false,
            max_file_size: 64 * 1024,
            tie_break: TieBreakPolicy::default(),
        }
    }
}

/// Finds certificate/key pairs under a set of search roots.
///
/// A cancelled scan returns [`ScanError::Cancelled`], never a partial report.
#[async_trait]
pub trait CertPairScanner: Send + Sync {
    async fn scan(
        &self,
        roots: &[PathBuf],
        cancel: CancellationToken,
    ) -> Result<ScanReport, ScanError>;
}
