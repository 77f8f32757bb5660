use manisync_core::config::{DigestAlgorithm, EngineConfig};
use manisync_core::error::{Result, SyncError};
use manisync_core::hasher::{ContentHasher, FileHasher};
use manisync_core::{EngineState, ManifestService, SyncEngine};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn sha(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn setup() -> (tempfile::TempDir, EngineConfig) {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("files");
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("a.txt"), b"abcd").unwrap();
    fs::write(root.join("sub/b.txt"), vec![7u8; 10_000]).unwrap();
    let cfg = EngineConfig::new(&root, td.path().join("data"), "http://cdn.test");
    (td, cfg)
}

#[test]
fn cold_start_scans_once_and_persists() {
    let (_td, cfg) = setup();
    let engine = SyncEngine::new(cfg.clone()).unwrap();
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert!(engine.store().get().is_none());

    let first = engine.ensure_exists().unwrap();
    let second = engine.ensure_exists().unwrap();
    assert_eq!(engine.scan_count(), 1);
    assert_eq!(first.files, second.files);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(engine.state(), EngineState::Ready);

    assert_eq!(first.version, "1.0");
    assert_eq!(first.files.len(), 2);
    assert_eq!(first.files[0].path, "a.txt");
    assert_eq!(first.files[0].size, 4);
    assert_eq!(first.files[0].hash, sha(b"abcd"));
    assert_eq!(first.files[0].url, "http://cdn.test/a.txt");
    assert_eq!(first.files[1].path, "sub/b.txt");
    assert_eq!(first.files[1].size, 10_000);
    assert_eq!(first.files[1].hash, sha(&[7u8; 10_000]));
    assert_eq!(first.files[1].url, "http://cdn.test/sub/b.txt");

    assert!(cfg.manifest_path().is_file());
    let on_disk = engine.store().read_persisted().unwrap().unwrap();
    assert_eq!(on_disk.files, first.files);
}

#[test]
fn concurrent_first_reads_share_one_scan() {
    let (_td, cfg) = setup();
    let engine = SyncEngine::new(cfg).unwrap();
    let n = 16;
    let barrier = Arc::new(Barrier::new(n));
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let (engine, barrier) = (engine.clone(), barrier.clone());
            std::thread::spawn(move || {
                barrier.wait();
                engine.ensure_exists().unwrap()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(engine.scan_count(), 1);
    for m in &results {
        assert!(Arc::ptr_eq(m, &results[0]));
    }
}

#[test]
fn persisted_manifest_is_reused_without_scanning() {
    let (_td, cfg) = setup();
    SyncEngine::new(cfg.clone()).unwrap().set_version("7.2").unwrap();

    let fresh = SyncEngine::new(cfg).unwrap();
    let m = fresh.ensure_exists().unwrap();
    assert_eq!(fresh.scan_count(), 0);
    assert_eq!(m.version, "7.2");
    assert_eq!(m.files.len(), 2);
}

#[cfg(unix)]
#[test]
fn odd_file_names_do_not_spoil_the_persisted_manifest() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    let (_td, cfg) = setup();
    fs::write(cfg.content_root.join(OsStr::from_bytes(b"\xff.bin")), b"x").unwrap();
    fs::write(cfg.content_root.join(OsStr::from_bytes(b"\xfe.bin")), b"y").unwrap();

    let first = SyncEngine::new(cfg.clone()).unwrap().ensure_exists().unwrap();
    assert_eq!(first.files.len(), 2);
    assert_eq!(first.duplicate_path(), None);

    let fresh = SyncEngine::new(cfg).unwrap();
    assert!(fresh.store().read_persisted().unwrap().is_some());
    let m = fresh.ensure_exists().unwrap();
    assert_eq!(fresh.scan_count(), 0);
    assert_eq!(m.files, first.files);
}

#[test]
fn malformed_persisted_manifest_triggers_rescan() {
    let (_td, cfg) = setup();
    fs::create_dir_all(&cfg.data_dir).unwrap();
    fs::write(cfg.manifest_path(), "{ this is not json").unwrap();
    let engine = SyncEngine::new(cfg.clone()).unwrap();
    assert!(matches!(engine.store().read_persisted(), Err(SyncError::Load { .. })));
    let m = engine.ensure_exists().unwrap();
    assert_eq!(engine.scan_count(), 1);
    assert_eq!(m.files.len(), 2);
    assert!(engine.store().read_persisted().unwrap().is_some());
}

#[test]
fn refresh_keeps_version_and_picks_up_changes() {
    let (_td, cfg) = setup();
    let engine = SyncEngine::new(cfg.clone()).unwrap();
    engine.ensure_exists().unwrap();
    let labelled = engine.set_version("3.1").unwrap();

    fs::remove_file(cfg.content_root.join("a.txt")).unwrap();
    fs::write(cfg.content_root.join("c.txt"), b"new").unwrap();
    let m = engine.refresh().unwrap();
    assert_eq!(m.version, "3.1");
    assert!(m.generated_at >= labelled.generated_at);
    let paths: Vec<_> = m.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, ["c.txt", "sub/b.txt"]);
    assert_eq!(engine.scan_count(), 2);
}

#[test]
fn refresh_before_first_read_uses_persisted_version() {
    let (_td, cfg) = setup();
    SyncEngine::new(cfg.clone()).unwrap().set_version("9").unwrap();
    let engine = SyncEngine::new(cfg).unwrap();
    assert_eq!(engine.refresh().unwrap().version, "9");
}

#[test]
fn failed_refresh_keeps_previous_manifest() {
    let (_td, cfg) = setup();
    let engine = SyncEngine::new(cfg.clone()).unwrap();
    let before = engine.ensure_exists().unwrap();
    fs::remove_dir_all(&cfg.content_root).unwrap();

    let err = engine.refresh().unwrap_err();
    assert!(matches!(err, SyncError::Scan { .. }));
    assert!(Arc::ptr_eq(&engine.store().get().unwrap(), &before));
    assert_eq!(engine.state(), EngineState::Ready);
    assert!(Arc::ptr_eq(&engine.ensure_exists().unwrap(), &before));
}

#[test]
fn unreachable_root_without_manifest_fails_reads() {
    let td = tempfile::tempdir().unwrap();
    let cfg = EngineConfig::new(td.path().join("missing"), td.path().join("data"), "http://x");
    let engine = SyncEngine::new(cfg).unwrap();
    assert!(matches!(engine.ensure_exists(), Err(SyncError::Scan { .. })));
    assert_eq!(engine.state(), EngineState::Uninitialized);
}

#[test]
fn persist_failure_keeps_new_manifest_published() {
    let (td, mut cfg) = setup();
    // A regular file where the storage directory should be.
    let blocker = td.path().join("blocker");
    fs::write(&blocker, b"x").unwrap();
    cfg.data_dir = blocker.join("data");
    let engine = SyncEngine::new(cfg.clone()).unwrap();

    let m = engine.ensure_exists().unwrap();
    assert_eq!(m.files.len(), 2);

    fs::write(cfg.content_root.join("c.txt"), b"c").unwrap();
    let err = engine.refresh().unwrap_err();
    assert!(matches!(err, SyncError::Persist { .. }));
    assert_eq!(engine.store().get().unwrap().files.len(), 3);
}

/// Succeeds after a pause so rebuilds overlap with readers.
struct Slow(ContentHasher);

impl FileHasher for Slow {
    fn hash(&self, path: &Path) -> Result<String> {
        std::thread::sleep(Duration::from_millis(15));
        self.0.hash(path)
    }
}

#[test]
fn readers_never_see_an_older_manifest() {
    let (_td, cfg) = setup();
    let engine =
        SyncEngine::with_hasher(cfg.clone(), Arc::new(Slow(ContentHasher::new(DigestAlgorithm::Sha256, 2))))
            .unwrap();
    engine.ensure_exists().unwrap();

    let reader = {
        let engine = engine.clone();
        std::thread::spawn(move || {
            let mut last_gen = 0;
            let mut last_time = None;
            for _ in 0..400 {
                let (gen, m) = engine.store().snapshot().unwrap();
                assert!(gen >= last_gen);
                if let Some(t) = last_time {
                    assert!(m.generated_at >= t);
                }
                last_gen = gen;
                last_time = Some(m.generated_at);
                std::thread::sleep(Duration::from_millis(1));
            }
            last_gen
        })
    };
    let writers: Vec<_> = (0..3)
        .map(|i| {
            let engine = engine.clone();
            let root = cfg.content_root.clone();
            std::thread::spawn(move || {
                fs::write(root.join(format!("r{i}.txt")), b"r").unwrap();
                engine.refresh().unwrap();
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }
    reader.join().unwrap();
    assert_eq!(engine.store().generation(), 4);
    assert_eq!(engine.scan_count(), 4);
}

#[test]
fn service_projects_metadata_and_reports_cancellation() {
    let (_td, cfg) = setup();
    let slow = SyncEngine::with_hasher(
        cfg.clone(),
        Arc::new(Slow(ContentHasher::new(DigestAlgorithm::Sha256, 1))),
    )
    .unwrap();
    let impatient = ManifestService::new(slow.clone()).with_timeout(Duration::from_millis(1));
    let err = impatient.info().unwrap_err();
    assert!(err.is_cancelled());

    // The abandoned build still completes and is served afterwards.
    let svc = ManifestService::new(slow.clone());
    let info = svc.info().unwrap();
    let full = svc.manifest().unwrap();
    assert_eq!(info, full.info());
    assert_eq!(slow.scan_count(), 1);
}
