#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use atlas_installer::{
    DiskSpaceChecker, ExternalTools, FailureKind, InstallEvent, InstallManifest, InstallOutcome,
    InstallPipeline, InstallRequest, InstallState, ShortcutOptions, ShortcutRegistrar,
};
use tempfile::TempDir;
use url::Url;

const GIB: u64 = 1024 * 1024 * 1024;
const ZEROS_1K_SHA256: &str = "5f70bf18a086007016e948b04aed3b82103a36bea41755b6cddfaf10ace3c6ef";

/// Shell prologue that finds the output file in both wget (`-O`) and curl (`--output`) style arguments.
const FIND_DEST: &str = r#"prev=""
for a in "$@"; do
  if [ "$prev" = "-O" ] || [ "$prev" = "--output" ]; then dest="$a"; fi
  prev="$a"
done"#;

struct FakeDisk(u64);

impl DiskSpaceChecker for FakeDisk {
    fn available_space(&self, _path: &Path) -> anyhow::Result<u64> {
        Ok(self.0)
    }
}

#[derive(Default, Clone)]
struct RecordingRegistrar {
    calls: Arc<Mutex<Vec<(PathBuf, ShortcutOptions)>>>,
}

impl ShortcutRegistrar for RecordingRegistrar {
    fn register(&self, install_dir: &Path, options: ShortcutOptions) -> anyhow::Result<Vec<PathBuf>> {
        self.calls
            .lock()
            .unwrap()
            .push((install_dir.to_path_buf(), options));
        Ok(vec![install_dir.join("atlas-interactivo.desktop")])
    }
}

struct Sandbox {
    root: TempDir,
    registrar: RecordingRegistrar,
}

impl Sandbox {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("bin")).unwrap();
        std::fs::create_dir_all(root.path().join("tmp")).unwrap();
        Self {
            root,
            registrar: RecordingRegistrar::default(),
        }
    }

    fn install_dir(&self) -> PathBuf {
        self.root.path().join("fakehome").join("Atlas")
    }

    fn temp_root(&self) -> PathBuf {
        self.root.path().join("tmp")
    }

    fn marker(&self, name: &str) -> PathBuf {
        self.root.path().join(format!("{name}.called"))
    }

    /// Write an executable stub that touches a marker file, then runs `body`.
    fn stub(&self, name: &str, body: &str) -> PathBuf {
        let path = self.root.path().join("bin").join(name);
        let script = format!(
            "#!/bin/sh\ntouch '{}'\n{FIND_DEST}\n{body}\n",
            self.marker(name).display()
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn tools(&self, primary: &str, fallback: &str, archiver: &str) -> ExternalTools {
        self.prefixed_tools("", primary, fallback, archiver)
    }

    /// Like [`tools`](Self::tools), but with separate stub files so that they can run
    /// next to another set of stubs.
    fn prefixed_tools(&self, prefix: &str, primary: &str, fallback: &str, archiver: &str) -> ExternalTools {
        ExternalTools {
            primary_transfer: self.stub(&format!("{prefix}wget"), primary).into(),
            fallback_transfer: self.stub(&format!("{prefix}curl"), fallback).into(),
            archiver: self.stub(&format!("{prefix}tar"), archiver).into(),
            sync: None,
        }
    }

    fn pipeline(&self, request: InstallRequest, tools: ExternalTools) -> InstallPipeline {
        InstallPipeline::new(request)
            .tools(tools)
            .disk_checker(FakeDisk(100 * GIB))
            .shortcut_registrar(Arc::new(self.registrar.clone()))
            .temp_root(Some(self.temp_root()))
            .base_url(Url::parse("http://127.0.0.1:9/uc").unwrap())
            .transfer_timeout(Duration::from_secs(60))
            .extract_timeout(Duration::from_secs(60))
    }

    fn request(&self) -> InstallRequest {
        InstallRequest::new(self.install_dir())
            .desktop_shortcut(false)
            .menu_entry(false)
    }

    fn temp_files_left(&self) -> usize {
        std::fs::read_dir(self.temp_root()).unwrap().count()
    }
}

async fn run_collecting(mut pipeline: InstallPipeline) -> (InstallOutcome, Vec<InstallEvent>) {
    let mut rx = pipeline.subscribe();
    let outcome = pipeline.run().await;
    let mut events = vec![];
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    (outcome, events)
}

fn percents(events: &[InstallEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|ev| match ev {
            InstallEvent::Progress(p) => Some(p.percent),
            _ => None,
        })
        .collect()
}

fn assert_single_finish_at_end(events: &[InstallEvent]) {
    let finished = events
        .iter()
        .filter(|ev| matches!(ev, InstallEvent::Finished(_)))
        .count();
    assert_eq!(finished, 1);
    assert!(matches!(events.last(), Some(InstallEvent::Finished(_))));
}

const WRITE_1K: &str = r#"head -c 1024 /dev/zero > "$dest""#;
const WRITE_EMPTY: &str = r#": > "$dest""#;
const UNPACK_ONE: &str = "echo '#!/bin/sh' > Atlas_Interactivo";

#[tokio::test]
async fn fallback_tool_completes_installation() {
    let sandbox = Sandbox::new();
    let tools = sandbox.tools("exit 1", WRITE_1K, UNPACK_ONE);
    let (outcome, events) = run_collecting(sandbox.pipeline(sandbox.request(), tools)).await;

    assert_eq!(outcome.state, InstallState::Completed, "{}", outcome.message);
    assert!(outcome.success);
    assert!(sandbox.marker("wget").exists());
    assert!(sandbox.marker("curl").exists());

    let manifest_path = sandbox.install_dir().join(".atlas_version.json");
    assert!(manifest_path.is_file());
    let manifest = InstallManifest::load_from_dir(&sandbox.install_dir())
        .unwrap()
        .unwrap();
    assert!(manifest.installed);
    assert_eq!(manifest.download_size, "1024");

    let exe = sandbox.install_dir().join("Atlas_Interactivo");
    let mode = std::fs::metadata(exe).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);

    assert!(sandbox.registrar.calls.lock().unwrap().is_empty());
    assert_eq!(sandbox.temp_files_left(), 0);

    let progress = percents(&events);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100));
    assert_single_finish_at_end(&events);
}

#[tokio::test]
async fn empty_download_fails_without_manifest() {
    let sandbox = Sandbox::new();
    let tools = sandbox.tools("exit 1", WRITE_EMPTY, UNPACK_ONE);
    let (outcome, events) = run_collecting(sandbox.pipeline(sandbox.request(), tools)).await;

    assert_eq!(outcome.state, InstallState::Failed(FailureKind::TransferFailed));
    assert!(!outcome.success);
    assert!(!sandbox.install_dir().join(".atlas_version.json").exists());
    assert!(!sandbox.marker("tar").exists());
    assert_eq!(sandbox.temp_files_left(), 0);
    assert_single_finish_at_end(&events);
}

#[tokio::test]
async fn both_transfer_tools_failing() {
    let sandbox = Sandbox::new();
    let tools = sandbox.tools("exit 4", "exit 6", UNPACK_ONE);
    let (outcome, _) = run_collecting(sandbox.pipeline(sandbox.request(), tools)).await;

    assert_eq!(outcome.state, InstallState::Failed(FailureKind::TransferFailed));
    assert_eq!(sandbox.temp_files_left(), 0);
}

#[tokio::test]
async fn unavailable_primary_is_transparent() {
    let sandbox = Sandbox::new();
    let mut tools = sandbox.tools("exit 1", WRITE_1K, UNPACK_ONE);
    tools.primary_transfer = sandbox.root.path().join("bin").join("no-such-wget").into();
    let (outcome, _) = run_collecting(sandbox.pipeline(sandbox.request(), tools)).await;

    assert_eq!(outcome.state, InstallState::Completed, "{}", outcome.message);
}

#[tokio::test]
async fn insufficient_space_stops_before_download() {
    let sandbox = Sandbox::new();
    let tools = sandbox.tools(WRITE_1K, WRITE_1K, UNPACK_ONE);
    let pipeline = sandbox
        .pipeline(sandbox.request(), tools)
        .disk_checker(FakeDisk(14 * GIB));
    let (outcome, _) = run_collecting(pipeline).await;

    assert_eq!(outcome.state, InstallState::Failed(FailureKind::InsufficientSpace));
    assert!(!sandbox.marker("wget").exists());
    assert!(!sandbox.marker("curl").exists());
    assert_eq!(sandbox.temp_files_left(), 0);
}

#[tokio::test]
async fn missing_archiver_stops_before_download() {
    let sandbox = Sandbox::new();
    let mut tools = sandbox.tools(WRITE_1K, WRITE_1K, UNPACK_ONE);
    tools.archiver = sandbox.root.path().join("bin").join("no-such-tar").into();
    let (outcome, _) = run_collecting(sandbox.pipeline(sandbox.request(), tools)).await;

    assert_eq!(outcome.state, InstallState::Failed(FailureKind::ToolUnavailable));
    assert!(!sandbox.marker("wget").exists());
}

#[tokio::test]
async fn extraction_without_files_fails() {
    let sandbox = Sandbox::new();
    let tools = sandbox.tools(WRITE_1K, WRITE_1K, "exit 0");
    let (outcome, _) = run_collecting(sandbox.pipeline(sandbox.request(), tools)).await;

    assert_eq!(outcome.state, InstallState::Failed(FailureKind::ExtractionFailed));
    assert!(!sandbox.install_dir().join(".atlas_version.json").exists());
    assert_eq!(sandbox.temp_files_left(), 0);
}

#[tokio::test]
async fn reinstall_without_extracted_files_fails() {
    let sandbox = Sandbox::new();
    std::fs::create_dir_all(sandbox.install_dir()).unwrap();
    std::fs::write(sandbox.install_dir().join(".atlas_version.json"), "{}").unwrap();
    let tools = sandbox.tools(WRITE_1K, WRITE_1K, "exit 0");
    let (outcome, _) = run_collecting(sandbox.pipeline(sandbox.request(), tools)).await;

    assert_eq!(outcome.state, InstallState::Failed(FailureKind::ExtractionFailed));
    assert_eq!(
        std::fs::read_to_string(sandbox.install_dir().join(".atlas_version.json")).unwrap(),
        "{}"
    );
    assert_eq!(sandbox.temp_files_left(), 0);
}

#[tokio::test]
async fn timed_out_primary_falls_back() {
    let sandbox = Sandbox::new();
    let tools = sandbox.tools("sleep 30", WRITE_1K, UNPACK_ONE);
    let pipeline = sandbox
        .pipeline(sandbox.request(), tools)
        .transfer_timeout(Duration::from_secs(1));
    let (outcome, _) = tokio::time::timeout(Duration::from_secs(20), run_collecting(pipeline))
        .await
        .unwrap();

    assert_eq!(outcome.state, InstallState::Completed, "{}", outcome.message);
    assert!(sandbox.marker("curl").exists());
    assert!(sandbox.install_dir().join(".atlas_version.json").is_file());
}

#[tokio::test]
async fn extraction_tool_error_fails() {
    let sandbox = Sandbox::new();
    let tools = sandbox.tools(WRITE_1K, WRITE_1K, "echo 'broken archive' >&2; exit 2");
    let (outcome, events) = run_collecting(sandbox.pipeline(sandbox.request(), tools)).await;

    assert_eq!(outcome.state, InstallState::Failed(FailureKind::ExtractionFailed));
    assert!(outcome.message.contains("broken archive"));
    assert!(events
        .iter()
        .any(|ev| matches!(ev, InstallEvent::Log(line) if line.text.contains("broken archive"))));
}

#[tokio::test]
async fn shortcuts_are_requested_when_enabled() {
    let sandbox = Sandbox::new();
    let tools = sandbox.tools(WRITE_1K, WRITE_1K, UNPACK_ONE);
    let request = sandbox.request().desktop_shortcut(true).menu_entry(true);
    let (outcome, _) = run_collecting(sandbox.pipeline(request, tools)).await;

    assert_eq!(outcome.state, InstallState::Completed, "{}", outcome.message);
    let calls = sandbox.registrar.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, sandbox.install_dir());
    assert_eq!(calls[0].1, ShortcutOptions::default());
}

struct FailingRegistrar;

impl ShortcutRegistrar for FailingRegistrar {
    fn register(&self, _dir: &Path, _options: ShortcutOptions) -> anyhow::Result<Vec<PathBuf>> {
        anyhow::bail!("no desktop here")
    }
}

#[tokio::test]
async fn shortcut_failure_does_not_fail_install() {
    let sandbox = Sandbox::new();
    let tools = sandbox.tools(WRITE_1K, WRITE_1K, UNPACK_ONE);
    let request = sandbox.request().menu_entry(true);
    let pipeline = sandbox
        .pipeline(request, tools)
        .shortcut_registrar(Arc::new(FailingRegistrar));
    let (outcome, _) = run_collecting(pipeline).await;

    assert_eq!(outcome.state, InstallState::Completed, "{}", outcome.message);
}

#[tokio::test]
async fn checksum_is_verified() {
    let sandbox = Sandbox::new();
    let tools = sandbox.tools(WRITE_1K, WRITE_1K, UNPACK_ONE);
    let request = sandbox
        .request()
        .expected_sha256(Some(ZEROS_1K_SHA256.to_string()));
    let (outcome, _) = run_collecting(sandbox.pipeline(request, tools)).await;
    assert_eq!(outcome.state, InstallState::Completed, "{}", outcome.message);

    let sandbox = Sandbox::new();
    let tools = sandbox.tools(WRITE_1K, WRITE_1K, UNPACK_ONE);
    let request = sandbox.request().expected_sha256(Some("00".to_string()));
    let (outcome, _) = run_collecting(sandbox.pipeline(request, tools)).await;
    assert_eq!(outcome.state, InstallState::Failed(FailureKind::ChecksumMismatch));
    assert!(!sandbox.marker("tar").exists());
    assert_eq!(sandbox.temp_files_left(), 0);
}

/// Wait until the pipeline reports that it entered `state`.
async fn wait_for_stage(events: &mut tokio::sync::mpsc::UnboundedReceiver<InstallEvent>, state: InstallState) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while let Some(ev) = events.recv().await {
            if matches!(ev, InstallEvent::Stage(s) if s == state) {
                return;
            }
        }
        panic!("pipeline ended before reaching {state}");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn cancel_during_download() {
    let sandbox = Sandbox::new();
    let tools = sandbox.tools(r#"head -c 512 /dev/zero > "$dest"; sleep 30"#, WRITE_1K, UNPACK_ONE);
    let mut handle = sandbox.pipeline(sandbox.request(), tools).spawn();

    wait_for_stage(&mut handle.events, InstallState::Downloading).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.cancel();

    let mut rest = vec![];
    while let Some(ev) = handle.events.recv().await {
        rest.push(ev);
    }
    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.state, InstallState::Canceled);
    assert!(!outcome.success);
    assert!(!sandbox.marker("curl").exists());
    assert!(!sandbox.marker("tar").exists());
    assert_eq!(sandbox.temp_files_left(), 0);
    assert!(percents(&rest).iter().all(|p| *p <= 50));
    assert_single_finish_at_end(&rest);
}

#[tokio::test]
async fn second_run_on_same_dir_is_busy() {
    let sandbox = Sandbox::new();
    let slow = sandbox.tools("sleep 30", WRITE_1K, UNPACK_ONE);
    let mut first = sandbox.pipeline(sandbox.request(), slow).spawn();
    wait_for_stage(&mut first.events, InstallState::Downloading).await;

    let tools = sandbox.prefixed_tools("second-", WRITE_1K, WRITE_1K, UNPACK_ONE);
    let (outcome, _) = run_collecting(sandbox.pipeline(sandbox.request(), tools)).await;
    assert_eq!(outcome.state, InstallState::Failed(FailureKind::Busy));
    assert!(!sandbox.marker("second-wget").exists());

    first.cancel();
    let outcome = first.wait().await.unwrap();
    assert_eq!(outcome.state, InstallState::Canceled);
}

#[tokio::test]
async fn dir_locked_by_another_installer_is_busy() {
    let sandbox = Sandbox::new();
    let lock_path = sandbox.root.path().join("fakehome").join(".Atlas.install.lock");
    std::fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
    let held = std::fs::File::create(&lock_path).unwrap();
    held.try_lock().unwrap();

    let tools = sandbox.tools(WRITE_1K, WRITE_1K, UNPACK_ONE);
    let (outcome, _) = run_collecting(sandbox.pipeline(sandbox.request(), tools)).await;
    assert_eq!(outcome.state, InstallState::Failed(FailureKind::Busy));
    assert!(!sandbox.marker("wget").exists());

    held.unlock().unwrap();
    drop(held);
    let tools = sandbox.prefixed_tools("again-", WRITE_1K, WRITE_1K, UNPACK_ONE);
    let (outcome, _) = run_collecting(sandbox.pipeline(sandbox.request(), tools)).await;
    assert_eq!(outcome.state, InstallState::Completed, "{}", outcome.message);
    assert!(!lock_path.exists());
}
