//! End-to-end: catalog file, real certificate scan, rendered configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use certbox::Config;
use certbox::catalog::CatalogService;
use certbox::certs::{CertPair, ScanError, ScanWarning};
use certbox::paths::Paths;
use certbox::sandbox::{ResultPresenter, SandboxBuilder, SandboxError};
use certbox::spec::{BuildError, UserSelections};
use tokio_util::sync::CancellationToken;

const ALICE_CRT: &[u8] = include_bytes!("fixtures/alice.crt");
const ALICE_KEY: &[u8] = include_bytes!("fixtures/alice.key");
const BOB_SIGN_CERT: &[u8] = include_bytes!("fixtures/bob_signCert.der");
const BOB_SIGN_PRI: &[u8] = include_bytes!("fixtures/bob_signPri.key");
const BOB_KM_CERT: &[u8] = include_bytes!("fixtures/bob_kmCert.der");
const BOB_KM_PRI: &[u8] = include_bytes!("fixtures/bob_kmPri.key");
const CAROL_CRT: &[u8] = include_bytes!("fixtures/carol.crt");

const CATALOG: &str = r#"
schema_version = 2

[[services]]
id = "kbstar"
display_name = "KB Kookmin Bank"
category = "banking"
urls = ["https://obank.kbstar.com/quics?page=C025255"]
requires_certificate = true

[[services.companions]]
id = "astx"
name = "AhnLab Safe Transaction"
package = "astxdn.exe"
arguments = ["/silent"]

[[services.companions]]
id = "veraport"
name = "Veraport"
package = "veraport-g3.exe"
optional = true

[[services]]
id = "hometax"
display_name = "Hometax"
category = "government"
urls = ["https://www.hometax.go.kr/"]
"#;

struct Workspace {
    _tmp: tempfile::TempDir,
    root: PathBuf,
    config: Config,
}

impl Workspace {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();

        let mut config = Config {
            paths: Paths::under(&root),
            ..Config::default()
        };
        config.scan.roots = vec![root.join("home/NPKI").to_string_lossy().into_owned()];

        fs::create_dir_all(config.paths.data_dir.clone()).unwrap();
        fs::write(config.catalog_path(), CATALOG).unwrap();

        let tools = config.tools_dir();
        fs::create_dir_all(&tools).unwrap();
        fs::write(tools.join("astxdn.exe"), b"MZ").unwrap();
        fs::write(tools.join("veraport-g3.exe"), b"MZ").unwrap();

        let npki = root.join("home/NPKI");
        write(&npki.join("yessign/USER/bob"), "signCert.der", BOB_SIGN_CERT);
        write(&npki.join("yessign/USER/bob"), "signPri.key", BOB_SIGN_PRI);
        write(&npki.join("yessign/USER/bob"), "kmCert.der", BOB_KM_CERT);
        write(&npki.join("yessign/USER/bob"), "kmPri.key", BOB_KM_PRI);
        write(&npki.join("alice"), "alice.crt", ALICE_CRT);
        write(&npki.join("alice"), "alice.key", ALICE_KEY);
        write(&npki.join("carol"), "carol.crt", CAROL_CRT);

        Self {
            _tmp: tmp,
            root,
            config,
        }
    }

    fn builder(&self) -> SandboxBuilder {
        SandboxBuilder::new(&self.config)
    }
}

fn write(dir: &Path, name: &str, bytes: &[u8]) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), bytes).unwrap();
}

struct PickByFile(&'static str);

impl ResultPresenter for PickByFile {
    fn choose_certificate(&self, _service: &CatalogService, available: &[CertPair]) -> Option<usize> {
        available
            .iter()
            .position(|p| p.public_path.ends_with(self.0))
    }

    fn show_warnings(&self, _warnings: &[ScanWarning]) {}

    fn show_error(&self, _category: &str, _message: &str) {}
}

#[tokio::test]
async fn test_scan_finds_three_pairs() {
    let ws = Workspace::new();
    let report = ws
        .builder()
        .scan(&ws.config.scan_roots(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.pairs.len(), 3);
    assert!(report.warnings.is_empty());
    assert!(!report.pairs.iter().any(|p| p.subject.contains("Carol")));
}

#[tokio::test]
async fn test_ambiguous_certificate_needs_a_choice() {
    let ws = Workspace::new();
    let builder = ws.builder();
    let catalog = builder.load_catalog(&ws.config.catalog_path()).await.unwrap();

    let err = builder
        .create_sandbox(
            &catalog,
            "kbstar",
            &ws.config.scan_roots(),
            UserSelections::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    match err {
        SandboxError::Build(BuildError::SelectionRequired { available, .. }) => {
            assert_eq!(available.len(), 3)
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_create_with_fingerprint_selection() {
    let ws = Workspace::new();
    let builder = ws.builder();
    let roots = ws.config.scan_roots();
    let catalog = builder.load_catalog(&ws.config.catalog_path()).await.unwrap();

    let report = builder.scan(&roots, CancellationToken::new()).await.unwrap();
    let alice = report
        .pairs
        .iter()
        .find(|p| p.public_path.ends_with("alice.crt"))
        .unwrap();

    let selections = UserSelections::default()
        .with_certificate(&alice.fingerprint[..12])
        .with_companion("veraport");
    let outcome = builder
        .create_sandbox(&catalog, "kbstar", &roots, selections, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.config_path,
        ws.config.paths.sandboxes_dir().join("certbox_kbstar.ini")
    );
    let text = fs::read_to_string(&outcome.config_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines[0], "; certbox sandbox configuration");
    assert_eq!(lines[1], "[certbox_kbstar]");
    assert_eq!(lines[2], "DisplayName=KB Kookmin Bank (certbox)");
    assert_eq!(lines[3], "Service=kbstar");
    // The query string carries `=`.
    assert_eq!(
        lines[4],
        "Url=\"https://obank.kbstar.com/quics?page=C025255\""
    );
    assert!(lines[5].starts_with("Certificate=\"1|"));
    assert!(lines[5].ends_with("|exact\""));

    let alice_dir = ws.root.join("home/NPKI/alice");
    assert_eq!(
        lines[6],
        format!("MappedFile={}|NPKI/1/alice.crt|ro", alice_dir.join("alice.crt").display())
    );
    assert_eq!(
        lines[7],
        format!("MappedFile={}|NPKI/1/alice.key|ro", alice_dir.join("alice.key").display())
    );
    assert!(lines[8].ends_with("|Tools/astxdn.exe|ro"));
    assert!(lines[9].ends_with("|Tools/veraport-g3.exe|ro"));
    assert_eq!(lines[10], "Launch=Tools/astxdn.exe|/silent");
    assert_eq!(lines[11], "Launch=Tools/veraport-g3.exe");
    assert_eq!(
        lines[12],
        "Launch=\"firefox|https://obank.kbstar.com/quics?page=C025255\""
    );
    assert_eq!(lines[13], "");

    assert_eq!(outcome.descriptor.command, "sandbox-engine");
    assert_eq!(
        outcome.descriptor.args,
        [
            "--config".to_string(),
            outcome.config_path.to_string_lossy().into_owned(),
            "--box".to_string(),
            "certbox_kbstar".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_presenter_choice_and_stable_output() {
    let ws = Workspace::new();
    let builder = ws
        .builder()
        .with_presenter(Arc::new(PickByFile("kmCert.der")));
    let roots = ws.config.scan_roots();
    let catalog = builder.load_catalog(&ws.config.catalog_path()).await.unwrap();

    let first = builder
        .create_sandbox(
            &catalog,
            "kbstar",
            &roots,
            UserSelections::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(first.spec.certificates[0].public_path.ends_with("kmCert.der"));
    assert!(first.spec.certificates[0].private_path.ends_with("kmPri.key"));
    let first_text = fs::read_to_string(&first.config_path).unwrap();

    let second = builder
        .create_sandbox(
            &catalog,
            "kbstar",
            &roots,
            UserSelections::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(first.spec, second.spec);
    assert_eq!(first_text, fs::read_to_string(&second.config_path).unwrap());
}

#[tokio::test]
async fn test_service_without_certificate_ignores_missing_roots() {
    let mut ws = Workspace::new();
    ws.config.scan.roots = vec!["/certbox/does/not/exist".to_string()];
    let builder = ws.builder();
    let catalog = builder.load_catalog(&ws.config.catalog_path()).await.unwrap();

    let outcome = builder
        .create_sandbox(
            &catalog,
            "hometax",
            &ws.config.scan_roots(),
            UserSelections::default().with_certificate("ffffffff"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(outcome.spec.certificates.is_empty());
    assert_eq!(outcome.spec.mappings.len(), 0);

    let err = builder
        .create_sandbox(
            &catalog,
            "kbstar",
            &ws.config.scan_roots(),
            UserSelections::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SandboxError::Scan(ScanError::AllRootsInaccessible { .. })
    ));
}

#[tokio::test]
async fn test_duplicate_service_ids_are_rejected() {
    let ws = Workspace::new();
    let path = ws.root.join("dup.toml");
    fs::write(
        &path,
        r#"
schema_version = 2

[[services]]
id = "kbstar"
display_name = "A"
urls = ["https://a.example/"]

[[services]]
id = "kbstar"
display_name = "B"
urls = ["https://b.example/"]
"#,
    )
    .unwrap();

    let err = ws.builder().load_catalog(&path).await.unwrap_err();
    assert!(matches!(err, SandboxError::CatalogFormat(_)));
}
