use std::collections::HashSet;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::serializer::MAX_SECTION_LEN;
use super::{
    BuildError, LaunchEntry, LaunchTarget, Mapping, MappingOrigin, SandboxSpec, SpecLayout,
    UserSelections,
};
use crate::catalog::{CatalogService, CompanionTool};
use crate::certs::CertPair;

/// Shortest fingerprint prefix accepted as a certificate selector.
pub const MIN_FINGERPRINT_PREFIX: usize = 8;

/// Hex digits of the id digest appended to shortened box names.
const BOX_NAME_DIGEST_LEN: usize = 8;

/// Combines a catalog service, discovered pairs and user choices into a spec.
pub trait SandboxSpecBuilder: Send + Sync {
    fn build(
        &self,
        service: &CatalogService,
        pairs: &[CertPair],
        selections: &UserSelections,
    ) -> Result<SandboxSpec, BuildError>;
}

/// Default builder. Output order follows catalog order, then certificate
/// selection order; nothing depends on hash iteration.
#[derive(Debug, Clone)]
pub struct SpecAssembler {
    layout: SpecLayout,
}

impl SpecAssembler {
    pub fn new(layout: SpecLayout) -> Self {
        Self { layout }
    }

    fn select_certificates(
        &self,
        service: &CatalogService,
        pairs: &[CertPair],
        selections: &UserSelections,
    ) -> Result<Vec<CertPair>, BuildError> {
        if !service.requires_certificate {
            if !selections.certificates.is_empty() {
                debug!(
                    "Service {} needs no certificate; ignoring {} selections",
                    service.id,
                    selections.certificates.len()
                );
            }
            return Ok(Vec::new());
        }

        if pairs.is_empty() {
            return Err(BuildError::NoCertificateAvailable(service.id.clone()));
        }

        if selections.certificates.is_empty() {
            return match pairs {
                [only] => Ok(vec![only.clone()]),
                _ => Err(BuildError::SelectionRequired {
                    service: service.id.clone(),
                    available: pairs.to_vec(),
                }),
            };
        }

        let mut chosen: Vec<usize> = Vec::new();
        for selector in &selections.certificates {
            let index = resolve_certificate(selector, pairs)?;
            if !chosen.contains(&index) {
                chosen.push(index);
            }
        }
        Ok(chosen.into_iter().map(|i| pairs[i].clone()).collect())
    }

    fn certificate_mappings(&self, certificates: &[CertPair]) -> Vec<Mapping> {
        let mut mappings = Vec::new();
        for (i, pair) in certificates.iter().enumerate() {
            let index = i + 1;
            let folder = join_sandbox(&self.layout.certificate_root, &index.to_string());
            let mut push = |host: &Path, name: String| {
                mappings.push(Mapping {
                    host: host.to_path_buf(),
                    sandbox: join_sandbox(&folder, &name),
                    read_only: true,
                    origin: MappingOrigin::Certificate { index },
                });
            };

            let public_name = file_name(&pair.public_path);
            push(&pair.public_path, public_name.clone());
            // Combined PEM files hold both halves.
            if pair.private_path != pair.public_path {
                let mut private_name = file_name(&pair.private_path);
                if private_name == public_name {
                    private_name = key_file_name(&private_name);
                }
                push(&pair.private_path, private_name);
            }
        }
        mappings
    }

    fn tool_sandbox_path(&self, tool: &CompanionTool) -> String {
        join_sandbox(&self.layout.tools_root, &tool.package)
    }

    /// Engine section id. Ids that do not survive sanitizing unchanged, or
    /// that overflow the section limit, get a digest suffix so distinct
    /// services never share a name.
    fn box_name(&self, service: &CatalogService) -> String {
        let raw = if self.layout.name_prefix.is_empty() {
            service.id.clone()
        } else {
            format!("{}_{}", self.layout.name_prefix, service.id)
        };
        let name: String = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();

        let lossless = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if lossless && name.len() <= MAX_SECTION_LEN {
            return name;
        }

        let digest = format!("{:x}", Sha256::digest(raw.as_bytes()));
        let suffix = &digest[..BOX_NAME_DIGEST_LEN];
        let keep = MAX_SECTION_LEN - BOX_NAME_DIGEST_LEN - 1;
        let head = name.get(..keep).unwrap_or(&name).trim_end_matches('_');
        format!("{}_{}", head, suffix)
    }
}

impl SandboxSpecBuilder for SpecAssembler {
    fn build(
        &self,
        service: &CatalogService,
        pairs: &[CertPair],
        selections: &UserSelections,
    ) -> Result<SandboxSpec, BuildError> {
        let certificates = self.select_certificates(service, pairs, selections)?;
        let companions = stage_companions(service, selections)?;

        let mut mappings = self.certificate_mappings(&certificates);
        for tool in &companions {
            mappings.push(Mapping {
                host: self.layout.tools_dir.join(&tool.package),
                sandbox: self.tool_sandbox_path(tool),
                read_only: true,
                origin: MappingOrigin::Tool {
                    id: tool.id.clone(),
                },
            });
        }

        let mut targets = HashSet::new();
        for mapping in &mappings {
            if !targets.insert(mapping.sandbox.as_str()) {
                return Err(BuildError::DuplicateMappingTarget(mapping.sandbox.clone()));
            }
        }

        let mut launch: Vec<LaunchEntry> = companions
            .iter()
            .filter(|tool| tool.run_on_start)
            .map(|tool| LaunchEntry {
                command: self.tool_sandbox_path(tool),
                args: tool.arguments.clone(),
                target: LaunchTarget::Tool {
                    id: tool.id.clone(),
                },
            })
            .collect();
        launch.push(LaunchEntry {
            command: self.layout.browser.clone(),
            args: service.urls.iter().map(|u| u.to_string()).collect(),
            target: LaunchTarget::Browser,
        });

        let spec = SandboxSpec {
            name: format!("{} (certbox)", service.display_name),
            box_name: self.box_name(service),
            service: service.clone(),
            certificates,
            companions,
            mappings,
            launch,
        };
        debug!(
            "Built spec {}: {} certificates, {} companions, {} mappings",
            spec.box_name,
            spec.certificates.len(),
            spec.companions.len(),
            spec.mappings.len()
        );
        Ok(spec)
    }
}

fn resolve_certificate(selector: &str, pairs: &[CertPair]) -> Result<usize, BuildError> {
    let invalid = |reason: &str| BuildError::InvalidSelection {
        selector: selector.to_string(),
        reason: reason.to_string(),
    };

    if let Some(index) = pairs
        .iter()
        .position(|p| p.public_path.to_str() == Some(selector))
    {
        return Ok(index);
    }

    if selector.len() < MIN_FINGERPRINT_PREFIX || !selector.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(invalid(
            "expected a certificate path or a fingerprint prefix of at least 8 hex characters",
        ));
    }

    let prefix = selector.to_ascii_lowercase();
    let matches: Vec<usize> = pairs
        .iter()
        .enumerate()
        .filter(|(_, p)| p.fingerprint.starts_with(&prefix))
        .map(|(i, _)| i)
        .collect();
    match matches.as_slice() {
        [index] => Ok(*index),
        [] => Err(invalid("matches no discovered certificate")),
        _ => Err(invalid("matches more than one certificate")),
    }
}

fn stage_companions(
    service: &CatalogService,
    selections: &UserSelections,
) -> Result<Vec<CompanionTool>, BuildError> {
    for id in &selections.companions {
        if !service.companions.iter().any(|c| &c.id == id) {
            return Err(BuildError::InvalidSelection {
                selector: id.clone(),
                reason: format!("service `{}` has no such companion", service.id),
            });
        }
    }

    Ok(service
        .companions
        .iter()
        .filter(|c| !c.optional || selections.companions.contains(&c.id))
        .cloned()
        .collect())
}

fn join_sandbox(root: &str, name: &str) -> String {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", root, name)
    }
}

/// `user.pem` -> `user-key.pem`, for a private half named like its certificate.
fn key_file_name(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-key.{}", stem, ext),
        _ => format!("{}-key", name),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::certs::PairConfidence;
    use crate::spec::{IniRenderer, SandboxSpecSerializer};
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;
    use url::Url;

    pub(crate) fn layout() -> SpecLayout {
        SpecLayout {
            name_prefix: "certbox".to_string(),
            certificate_root: "NPKI".to_string(),
            tools_root: "Tools".to_string(),
            tools_dir: PathBuf::from("/srv/tools"),
            browser: "firefox".to_string(),
        }
    }

    pub(crate) fn companion(id: &str, optional: bool, run_on_start: bool) -> CompanionTool {
        CompanionTool {
            id: id.to_string(),
            name: format!("{} installer", id),
            package: format!("{}.exe", id),
            source_url: None,
            arguments: vec!["/silent".to_string()],
            run_on_start,
            optional,
        }
    }

    pub(crate) fn service(requires_certificate: bool) -> CatalogService {
        CatalogService {
            id: "kb-star".to_string(),
            display_name: "KB Kookmin Bank".to_string(),
            category: Some("banking".to_string()),
            urls: vec![
                Url::parse("https://obank.kbstar.com/").unwrap(),
                Url::parse("https://www.kbstar.com/").unwrap(),
            ],
            requires_certificate,
            notes: None,
            companions: vec![
                companion("astx", false, true),
                companion("veraport", true, true),
                companion("delfino", false, false),
            ],
        }
    }

    pub(crate) fn pair(name: &str, fingerprint: &str) -> CertPair {
        let dir = PathBuf::from(format!("/home/user/NPKI/yessign/USER/{}", name));
        CertPair {
            subject: format!("CN={}", name),
            issuer: "CN=yessignCA".to_string(),
            serial: "01".to_string(),
            not_after: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            public_path: dir.join("signCert.der"),
            private_path: dir.join("signPri.key"),
            confidence: PairConfidence::Exact,
            fingerprint: fingerprint.to_string(),
        }
    }

    fn assembler() -> SpecAssembler {
        SpecAssembler::new(layout())
    }

    #[test]
    fn test_single_pair_is_selected_automatically() {
        let pairs = vec![pair("alice", "aaaaaaaa11111111")];
        let spec = assembler()
            .build(&service(true), &pairs, &UserSelections::default())
            .unwrap();

        assert_eq!(spec.certificates, pairs);
        let targets: Vec<_> = spec.certificate_mappings().map(|m| m.sandbox.as_str()).collect();
        assert_eq!(targets, ["NPKI/1/signCert.der", "NPKI/1/signPri.key"]);
        assert!(spec.certificate_mappings().all(|m| m.read_only));
    }

    #[test]
    fn test_several_pairs_without_choice_need_selection() {
        let pairs = vec![pair("alice", "aaaaaaaa"), pair("bob", "bbbbbbbb")];
        let err = assembler()
            .build(&service(true), &pairs, &UserSelections::default())
            .unwrap_err();
        match err {
            BuildError::SelectionRequired { service, available } => {
                assert_eq!(service, "kb-star");
                assert_eq!(available.len(), 2);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_no_certificate_service_ignores_pairs_and_selections() {
        let pairs = vec![
            pair("alice", "aaaaaaaa"),
            pair("bob", "bbbbbbbb"),
            pair("carol", "cccccccc"),
        ];
        let selections = UserSelections::default().with_certificate("bbbbbbbb");
        let spec = assembler()
            .build(&service(false), &pairs, &selections)
            .unwrap();

        assert!(spec.certificates.is_empty());
        assert_eq!(spec.certificate_mappings().count(), 0);
    }

    #[test]
    fn test_required_certificate_with_nothing_found() {
        let err = assembler()
            .build(&service(true), &[], &UserSelections::default())
            .unwrap_err();
        assert!(matches!(err, BuildError::NoCertificateAvailable(id) if id == "kb-star"));
    }

    #[test]
    fn test_selection_by_fingerprint_prefix_and_path() {
        let pairs = vec![
            pair("alice", "aaaaaaaa11111111"),
            pair("bob", "bbbbbbbb22222222"),
        ];
        let selections = UserSelections::default()
            .with_certificate("BBBBBBBB")
            .with_certificate("/home/user/NPKI/yessign/USER/alice/signCert.der")
            .with_certificate("bbbbbbbb2222");
        let spec = assembler()
            .build(&service(true), &pairs, &selections)
            .unwrap();

        // Selection order, duplicates collapsed.
        assert_eq!(spec.certificates.len(), 2);
        assert_eq!(spec.certificates[0].subject, "CN=bob");
        assert_eq!(spec.certificates[1].subject, "CN=alice");
        let bob = &spec.mappings[0];
        assert_eq!(bob.sandbox, "NPKI/1/signCert.der");
        assert_eq!(bob.origin, MappingOrigin::Certificate { index: 1 });
        assert_eq!(spec.mappings[2].sandbox, "NPKI/2/signCert.der");
    }

    #[test]
    fn test_invalid_certificate_selectors() {
        let pairs = vec![pair("alice", "abcdef0011"), pair("bob", "abcdef0022")];
        for input in ["abc", "zzzzzzzzzz", "abcdef00", "ffffffff"] {
            let selections = UserSelections::default().with_certificate(input);
            let err = assembler()
                .build(&service(true), &pairs, &selections)
                .unwrap_err();
            assert!(
                matches!(err, BuildError::InvalidSelection { ref selector, .. } if selector == input),
                "selector {} gave {}",
                input,
                err
            );
        }
    }

    #[test]
    fn test_optional_companions_only_when_selected() {
        let spec = assembler()
            .build(&service(false), &[], &UserSelections::default())
            .unwrap();
        let ids: Vec<_> = spec.companions.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["astx", "delfino"]);
        assert!(!spec.mappings.iter().any(|m| m.sandbox.contains("veraport")));

        let selections = UserSelections::default().with_companion("veraport");
        let spec = assembler()
            .build(&service(false), &[], &selections)
            .unwrap();
        let ids: Vec<_> = spec.companions.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["astx", "veraport", "delfino"]);

        let selections = UserSelections::default().with_companion("nprotect");
        let err = assembler()
            .build(&service(false), &[], &selections)
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidSelection { .. }));
    }

    #[test]
    fn test_launch_entries_follow_catalog_order_then_browser() {
        let selections = UserSelections::default().with_companion("veraport");
        let spec = assembler()
            .build(&service(false), &[], &selections)
            .unwrap();

        let commands: Vec<_> = spec.launch.iter().map(|l| l.command.as_str()).collect();
        // delfino is staged but not run on start.
        assert_eq!(commands, ["Tools/astx.exe", "Tools/veraport.exe", "firefox"]);
        let browser = spec.launch.last().unwrap();
        assert_eq!(browser.target, LaunchTarget::Browser);
        assert_eq!(
            browser.args,
            ["https://obank.kbstar.com/", "https://www.kbstar.com/"]
        );

        let staged: Vec<_> = spec.tool_mappings().map(|m| m.sandbox.as_str()).collect();
        for entry in &spec.launch {
            if let LaunchTarget::Tool { .. } = entry.target {
                assert!(staged.contains(&entry.command.as_str()));
            }
        }
        let astx = spec.tool_mappings().next().unwrap();
        assert_eq!(astx.host, PathBuf::from("/srv/tools/astx.exe"));
    }

    #[test]
    fn test_names() {
        let spec = assembler()
            .build(&service(false), &[], &UserSelections::default())
            .unwrap();
        assert_eq!(spec.box_name, "certbox_kb_star");
        assert_eq!(spec.name, "KB Kookmin Bank (certbox)");
    }

    #[test]
    fn test_duplicate_package_is_rejected() {
        let mut svc = service(false);
        svc.companions[2].package = "astx.exe".to_string();
        let err = assembler()
            .build(&svc, &[], &UserSelections::default())
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateMappingTarget(t) if t == "Tools/astx.exe"));
    }

    #[test]
    fn test_combined_pem_maps_once() {
        let mut combined = pair("erin", "eeeeeeee");
        combined.public_path = PathBuf::from("/certs/erin.pem");
        combined.private_path = PathBuf::from("/certs/erin.pem");
        let spec = assembler()
            .build(&service(true), &[combined], &UserSelections::default())
            .unwrap();
        assert_eq!(spec.certificate_mappings().count(), 1);
    }

    #[test]
    fn test_same_file_name_in_two_directories() {
        let mut split = pair("dave", "dddddddd");
        split.public_path = PathBuf::from("/etc/ssl/certs/user.pem");
        split.private_path = PathBuf::from("/etc/ssl/private/user.pem");
        let spec = assembler()
            .build(&service(true), &[split], &UserSelections::default())
            .unwrap();

        let mapped: Vec<_> = spec
            .certificate_mappings()
            .map(|m| (m.host.to_str().unwrap(), m.sandbox.as_str()))
            .collect();
        assert_eq!(
            mapped,
            [
                ("/etc/ssl/certs/user.pem", "NPKI/1/user.pem"),
                ("/etc/ssl/private/user.pem", "NPKI/1/user-key.pem"),
            ]
        );
        assert_eq!(key_file_name("signPri"), "signPri-key");
    }

    #[test]
    fn test_long_ids_are_shortened_with_digest() {
        let mut svc = service(false);
        svc.id = "korea-development-bank-online".to_string();
        let spec = assembler()
            .build(&svc, &[], &UserSelections::default())
            .unwrap();

        assert_eq!(spec.box_name.len(), MAX_SECTION_LEN);
        assert!(spec.box_name.starts_with("certbox_korea_developm"));
        let again = assembler()
            .build(&svc, &[], &UserSelections::default())
            .unwrap();
        assert_eq!(spec.box_name, again.box_name);
        assert!(IniRenderer.serialize(&spec).is_ok());
    }

    #[test]
    fn test_lossy_ids_keep_distinct_names() {
        let names: Vec<String> = ["국민", "신한"]
            .iter()
            .map(|id| {
                let mut svc = service(false);
                svc.id = id.to_string();
                assembler()
                    .build(&svc, &[], &UserSelections::default())
                    .unwrap()
                    .box_name
            })
            .collect();

        assert_ne!(names[0], names[1]);
        for name in &names {
            assert!(name.starts_with("certbox_"));
            assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let pairs = vec![pair("alice", "aaaaaaaa"), pair("bob", "bbbbbbbb")];
        let selections = UserSelections::default()
            .with_certificate("bbbbbbbb")
            .with_certificate("aaaaaaaa")
            .with_companion("veraport");
        let first = assembler().build(&service(true), &pairs, &selections).unwrap();
        let second = assembler().build(&service(true), &pairs, &selections).unwrap();
        assert_eq!(first, second);
    }
}
