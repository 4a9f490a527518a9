use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::classify::{CertificateCandidate, KeyCandidate, classify};
use super::{
    CertPair, CertPairScanner, PairConfidence, ScanError, ScanOptions, ScanReport, ScanWarning,
    TieBreakPolicy,
};

/// Filesystem scanner. Each search root is walked on its own blocking task;
/// results are merged in root order so the output never depends on which
/// walk finishes first.
#[derive(Debug, Clone, Default)]
pub struct FsScanner {
    options: ScanOptions,
}

impl FsScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl CertPairScanner for FsScanner {
    async fn scan(
        &self,
        roots: &[PathBuf],
        cancel: CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        if roots.is_empty() {
            return Err(ScanError::NoSearchRoots);
        }

        let walks = roots.iter().cloned().map(|root| {
            let options = self.options.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || walk_root(&root, &options, &cancel))
        });

        let results = tokio::select! {
            results = join_all(walks) => results,
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
        };

        let mut walked = Vec::with_capacity(results.len());
        for result in results {
            walked.push(result.map_err(|e| ScanError::Worker(e.to_string()))??);
        }
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        if walked.iter().all(|w| !w.accessible) {
            return Err(ScanError::AllRootsInaccessible {
                roots: roots.to_vec(),
            });
        }

        let mut seen = HashSet::new();
        let mut certificates = Vec::new();
        let mut keys = Vec::new();
        let mut warnings = Vec::new();
        for walk in walked {
            warnings.extend(walk.warnings);
            for found in walk.files {
                // Overlapping roots reach the same file twice.
                if !seen.insert(found.canonical) {
                    continue;
                }
                certificates.extend(found.certificate);
                keys.extend(found.key);
            }
        }

        debug!(
            "Found {} certificate and {} key candidates",
            certificates.len(),
            keys.len()
        );

        let pairs = pair_candidates(certificates, keys, self.options.tie_break);
        info!(
            "Scanned {} search roots: {} certificate pairs, {} warnings",
            roots.len(),
            pairs.len(),
            warnings.len()
        );

        Ok(ScanReport { pairs, warnings })
    }
}

struct FoundFile {
    canonical: PathBuf,
    certificate: Option<CertificateCandidate>,
    key: Option<KeyCandidate>,
}

struct RootWalk {
    accessible: bool,
    files: Vec<FoundFile>,
    warnings: Vec<ScanWarning>,
}

fn walk_root(
    root: &Path,
    options: &ScanOptions,
    cancel: &CancellationToken,
) -> Result<RootWalk, ScanError> {
    let mut walk = RootWalk {
        accessible: true,
        files: Vec::new(),
        warnings: Vec::new(),
    };

    if let Err(e) = probe_root(root) {
        warn!("Search root {} is not accessible: {}", root.display(), e);
        walk.accessible = false;
        walk.warnings.push(ScanWarning::new(
            root,
            format!("search root is not accessible: {}", e),
        ));
        return Ok(walk);
    }

    let mut walker = WalkDir::new(root)
        .follow_links(options.follow_symlinks)
        .sort_by_file_name();
    if let Some(depth) = options.max_depth {
        walker = walker.max_depth(depth);
    }

    for entry in walker {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                warn!("Skipping {}: {}", path.display(), e);
                walk.warnings.push(ScanWarning::new(path, e.to_string()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                walk.warnings.push(ScanWarning::new(path, e.to_string()));
                continue;
            }
        };
        if size == 0 || size > options.max_file_size {
            continue;
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Skipping unreadable {}: {}", path.display(), e);
                walk.warnings
                    .push(ScanWarning::new(path, format!("unreadable: {}", e)));
                continue;
            }
        };

        match classify(path, &bytes) {
            Ok(classified) if classified.is_empty() => {}
            Ok(classified) => walk.files.push(FoundFile {
                canonical: fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()),
                certificate: classified.certificate,
                key: classified.key,
            }),
            Err(message) => {
                warn!("Skipping {}: {}", path.display(), message);
                walk.warnings.push(ScanWarning::new(path, message));
            }
        }
    }

    Ok(walk)
}

fn probe_root(root: &Path) -> std::io::Result<()> {
    if fs::metadata(root)?.is_dir() {
        fs::read_dir(root).map(|_| ())
    } else {
        fs::File::open(root).map(|_| ())
    }
}

/// Pair certificates with keys, then collapse duplicate identities and order
/// by pairing key.
pub(crate) fn pair_candidates(
    certificates: Vec<CertificateCandidate>,
    keys: Vec<KeyCandidate>,
    policy: TieBreakPolicy,
) -> Vec<CertPair> {
    let mut cert_used = vec![false; certificates.len()];
    let mut key_used = vec![false; keys.len()];
    let mut pairs = Vec::new();

    // Phase 1: matching public key material.
    let mut by_key_id: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (ki, key) in keys.iter().enumerate() {
        if let Some(id) = key.key_id.as_deref() {
            by_key_id.entry(id).or_default().push(ki);
        }
    }
    for (id, key_indices) in &by_key_id {
        let candidates: Vec<usize> = certificates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.key_id.as_deref() == Some(*id))
            .map(|(ci, _)| ci)
            .collect();
        let Some(ci) = choose(&certificates, &candidates, policy) else {
            continue;
        };

        let confidence = if candidates.len() == 1 && key_indices.len() == 1 {
            PairConfidence::Exact
        } else {
            PairConfidence::BestEffort
        };
        pairs.push(make_pair(&certificates[ci], &keys[key_indices[0]], confidence));

        for &k in key_indices {
            key_used[k] = true;
        }
        // Certificates sharing this key must not fall through to co-location.
        for &c in &candidates {
            cert_used[c] = true;
        }
    }

    // Phase 2: co-location of the remaining certificates with opaque keys.
    let mut by_dir: BTreeMap<&Path, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
    for (ci, cert) in certificates.iter().enumerate() {
        if !cert_used[ci] {
            by_dir.entry(parent_of(&cert.path)).or_default().0.push(ci);
        }
    }
    // Keys with known public material already had their only chance above.
    for (ki, key) in keys.iter().enumerate() {
        if !key_used[ki] && key.key_id.is_none() {
            by_dir.entry(parent_of(&key.path)).or_default().1.push(ki);
        }
    }

    for (dir, (mut certs, mut dir_keys)) in by_dir {
        if certs.is_empty() || dir_keys.is_empty() {
            continue;
        }

        if certs.len() == 1 && dir_keys.len() == 1 {
            pairs.push(make_pair(
                &certificates[certs[0]],
                &keys[dir_keys[0]],
                PairConfidence::Exact,
            ));
            continue;
        }

        // File-stem affinity settles unambiguous one-to-one matches.
        let mut k = 0;
        while k < dir_keys.len() {
            let ki = dir_keys[k];
            let role = stem_role(&keys[ki].path);
            let same_role_keys = dir_keys
                .iter()
                .filter(|&&other| stem_role(&keys[other].path) == role)
                .count();
            let matching: Vec<usize> = certs
                .iter()
                .copied()
                .filter(|&ci| role.is_some() && stem_role(&certificates[ci].path) == role)
                .collect();

            if same_role_keys == 1 && matching.len() == 1 {
                let ci = matching[0];
                pairs.push(make_pair(&certificates[ci], &keys[ki], PairConfidence::Exact));
                certs.retain(|&c| c != ci);
                dir_keys.remove(k);
            } else {
                k += 1;
            }
        }

        for ki in dir_keys {
            let Some(ci) = choose(&certificates, &certs, policy) else {
                break;
            };
            debug!(
                "Tie-break in {} paired {} with {}",
                dir.display(),
                certificates[ci].path.display(),
                keys[ki].path.display()
            );
            pairs.push(make_pair(
                &certificates[ci],
                &keys[ki],
                PairConfidence::BestEffort,
            ));
            certs.retain(|&c| c != ci);
        }
    }

    // One pair per identity, emitted in pairing-key order.
    let mut by_identity: BTreeMap<(String, String, String), CertPair> = BTreeMap::new();
    for pair in pairs {
        let identity = (
            pair.subject.clone(),
            pair.issuer.clone(),
            pair.serial.clone(),
        );
        match by_identity.get(&identity) {
            Some(existing) if !prefer(&pair, existing) => {}
            _ => {
                by_identity.insert(identity, pair);
            }
        }
    }
    by_identity.into_values().collect()
}

/// Whether `candidate` should replace `existing` for the same identity.
fn prefer(candidate: &CertPair, existing: &CertPair) -> bool {
    match (candidate.confidence, existing.confidence) {
        (PairConfidence::Exact, PairConfidence::BestEffort) => true,
        (PairConfidence::BestEffort, PairConfidence::Exact) => false,
        _ => candidate.public_path < existing.public_path,
    }
}

fn choose(
    certificates: &[CertificateCandidate],
    candidates: &[usize],
    policy: TieBreakPolicy,
) -> Option<usize> {
    let mut best = *candidates.first()?;
    for &ci in &candidates[1..] {
        let better = match policy {
            TieBreakPolicy::LatestExpiry => {
                certificates[ci].not_after > certificates[best].not_after
            }
            TieBreakPolicy::EarliestExpiry => {
                certificates[ci].not_after < certificates[best].not_after
            }
            TieBreakPolicy::FirstFound => false,
        };
        if better {
            best = ci;
        }
    }
    Some(best)
}

fn make_pair(
    cert: &CertificateCandidate,
    key: &KeyCandidate,
    confidence: PairConfidence,
) -> CertPair {
    CertPair {
        subject: cert.subject.clone(),
        issuer: cert.issuer.clone(),
        serial: cert.serial.clone(),
        not_after: cert.not_after,
        public_path: cert.path.clone(),
        private_path: key.path.clone(),
        confidence,
        fingerprint: cert.fingerprint.clone(),
    }
}

fn parent_of(path: &Path) -> &Path {
    path.parent().unwrap_or(Path::new(""))
}

/// File stem with the artifact-kind suffix removed, lowercased:
/// `signCert.der` and `signPri.key` both yield `sign`.
fn stem_role(path: &Path) -> Option<String> {
    const SUFFIXES: &[&str] = &[
        "certificate",
        "private",
        "cert",
        "priv",
        "pri",
        "crt",
        "pub",
        "key",
    ];

    let stem = path.file_stem()?.to_str()?.to_lowercase();
    let mut role = stem.as_str();
    for suffix in SUFFIXES {
        if let Some(stripped) = role.strip_suffix(suffix) {
            role = stripped;
            break;
        }
    }
    let role = role.trim_end_matches(['_', '-', '.', ' ']);
    (!role.is_empty()).then(|| role.to_string())
}
