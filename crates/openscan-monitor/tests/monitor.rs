use async_trait::async_trait;
use openscan_core::{
    AdfState, DeliveryConfig, DeviceState, FolderWatchConfig, MonitorConfig, OutputConfig,
    PaperlessConfig, Protocol, ScanRequest, ScanResult, ScanSource, ScannerDescriptor,
    ScannerStatus,
};
use openscan_driver::{
    DriverCapabilities, DriverError, DriverHandle, FolderWatchDriver, ScannerDriver,
};
use openscan_monitor::{AdfMonitor, FolderWatchTask, MonitorState, TickOutcome};
use openscan_output::{OutputRouter, ScanHistory};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Replays scripted statuses; the last one repeats forever.
struct ScriptedScanner {
    descriptor: ScannerDescriptor,
    statuses: Mutex<VecDeque<Option<ScannerStatus>>>,
    scan_delay: Duration,
    fail_scans: bool,
    scans: AtomicUsize,
}

impl ScriptedScanner {
    fn new(script: &[Option<AdfState>]) -> Self {
        Self {
            descriptor: ScannerDescriptor::new("192.168.1.50", 80, Protocol::Escl)
                .with_sources([ScanSource::Platen, ScanSource::Feeder]),
            statuses: Mutex::new(
                script
                    .iter()
                    .map(|adf| {
                        adf.map(|adf_state| ScannerStatus {
                            state: DeviceState::Idle,
                            adf_state,
                        })
                    })
                    .collect(),
            ),
            scan_delay: Duration::ZERO,
            fail_scans: false,
            scans: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ScannerDriver for ScriptedScanner {
    fn descriptor(&self) -> &ScannerDescriptor {
        &self.descriptor
    }

    async fn capabilities(&self) -> openscan_driver::Result<DriverCapabilities> {
        Ok(DriverCapabilities::platen_only("Scripted", "Scripted"))
    }

    async fn status(&self) -> openscan_driver::Result<ScannerStatus> {
        let mut statuses = self.statuses.lock().unwrap();
        let next = if statuses.len() > 1 {
            statuses.pop_front().flatten()
        } else {
            statuses.front().copied().flatten()
        };
        next.ok_or_else(|| DriverError::Network {
            target: "escl://192.168.1.50:80".to_string(),
            message: "connection refused".to_string(),
        })
    }

    async fn scan(&self, request: ScanRequest) -> openscan_driver::Result<ScanResult> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.scan_delay).await;
        if self.fail_scans {
            return Err(DriverError::Protocol {
                target: "escl://192.168.1.50:80".to_string(),
                message: "job aborted".to_string(),
            });
        }
        Ok(ScanResult::new(
            "scan.pdf",
            "application/pdf",
            request.source,
            request.auto,
            b"%PDF-auto".to_vec(),
        ))
    }
}

fn router(out: &Path) -> Arc<OutputRouter> {
    let output = OutputConfig {
        folder: out.display().to_string(),
        filename_pattern: "auto_{n}".to_string(),
    };
    Arc::new(
        OutputRouter::new(
            &output,
            &PaperlessConfig::default(),
            &DeliveryConfig::default(),
            Arc::new(ScanHistory::new(10)),
        )
        .expect("router"),
    )
}

fn monitor_config() -> MonitorConfig {
    MonitorConfig {
        enabled: true,
        interval_seconds: 2.0,
        settle_seconds: 1.0,
    }
}

const E: Option<AdfState> = Some(AdfState::Empty);
const L: Option<AdfState> = Some(AdfState::Loaded);
const DOWN: Option<AdfState> = None;

#[tokio::test(start_paused = true)]
async fn test_one_scan_per_loaded_sheet() {
    let out = TempDir::new().unwrap();
    // Each trigger consumes two statuses: the poll and the settle re-check
    let scanner = Arc::new(ScriptedScanner::new(&[E, L, L, L, E, L, L, E]));
    let router = router(out.path());
    let mut monitor = AdfMonitor::new(DriverHandle::new(scanner.clone()), router.clone(), monitor_config());

    let outcomes = [
        monitor.tick().await,
        monitor.tick().await,
        monitor.tick().await,
        monitor.tick().await,
        monitor.tick().await,
        monitor.tick().await,
    ];

    assert_eq!(
        outcomes,
        [
            TickOutcome::Waiting,
            TickOutcome::Scanned,
            TickOutcome::Debounced,
            TickOutcome::Waiting,
            TickOutcome::Scanned,
            TickOutcome::Waiting,
        ]
    );
    assert_eq!(scanner.scans.load(Ordering::SeqCst), 2);

    let history = router.history().recent(10);
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.auto && r.source_used == ScanSource::Feeder));
}

#[tokio::test(start_paused = true)]
async fn test_status_failure_skips_cycle() {
    let out = TempDir::new().unwrap();
    let scanner = Arc::new(ScriptedScanner::new(&[DOWN, DOWN, L, L, L]));
    let mut monitor = AdfMonitor::new(DriverHandle::new(scanner.clone()), router(out.path()), monitor_config());

    assert_eq!(monitor.tick().await, TickOutcome::Offline);
    assert_eq!(monitor.tick().await, TickOutcome::Offline);
    assert_eq!(monitor.tick().await, TickOutcome::Scanned);
    assert_eq!(scanner.scans.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_paper_removed_while_settling() {
    let out = TempDir::new().unwrap();
    let scanner = Arc::new(ScriptedScanner::new(&[L, E, E]));
    let mut monitor = AdfMonitor::new(DriverHandle::new(scanner.clone()), router(out.path()), monitor_config());

    assert_eq!(monitor.tick().await, TickOutcome::Unsettled);
    assert_eq!(monitor.state(), MonitorState::Waiting);
    assert_eq!(scanner.scans.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_scan_is_not_retried_for_same_sheet() {
    let out = TempDir::new().unwrap();
    let scanner = Arc::new(ScriptedScanner {
        fail_scans: true,
        ..ScriptedScanner::new(&[L, L, L, L])
    });
    let mut monitor = AdfMonitor::new(DriverHandle::new(scanner.clone()), router(out.path()), monitor_config());

    assert_eq!(monitor.tick().await, TickOutcome::Failed);
    assert_eq!(monitor.tick().await, TickOutcome::Debounced);
    assert_eq!(scanner.scans.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_busy_driver_does_not_consume_trigger() {
    let out = TempDir::new().unwrap();
    let scanner = Arc::new(ScriptedScanner {
        scan_delay: Duration::from_secs(30),
        ..ScriptedScanner::new(&[L])
    });
    let handle = DriverHandle::new(scanner.clone());
    let manual = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.scan(ScanRequest::new(ScanSource::Platen)).await })
    };
    while !handle.is_scanning() {
        tokio::task::yield_now().await;
    }

    let mut monitor = AdfMonitor::new(handle.clone(), router(out.path()), monitor_config());
    assert_eq!(monitor.tick().await, TickOutcome::Busy);
    assert_eq!(monitor.state(), MonitorState::Waiting);

    manual.await.unwrap().expect("manual scan");
    assert_eq!(monitor.tick().await, TickOutcome::Scanned);
    assert_eq!(scanner.scans.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_monitor_keeps_polling_until_stopped() {
    let out = TempDir::new().unwrap();
    let scanner = Arc::new(ScriptedScanner::new(&[DOWN, E, L, L]));
    let handle = AdfMonitor::new(DriverHandle::new(scanner.clone()), router(out.path()), monitor_config()).spawn();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(handle.is_running());
    handle.stop().await;

    assert_eq!(scanner.scans.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 1);
}

#[test]
fn test_should_run() {
    let feeder = ScannerDescriptor::new("10.0.0.2", 80, Protocol::Wsd)
        .with_sources([ScanSource::Platen, ScanSource::Feeder]);
    let platen = ScannerDescriptor::new("10.0.0.3", 80, Protocol::Escl);
    let folder = ScannerDescriptor::folder("/srv/scans").with_sources([ScanSource::Feeder]);
    let enabled = monitor_config();
    let disabled = MonitorConfig::default();

    assert!(AdfMonitor::should_run(&feeder, &enabled));
    assert!(!AdfMonitor::should_run(&feeder, &disabled));
    assert!(!AdfMonitor::should_run(&platen, &enabled));
    assert!(!AdfMonitor::should_run(&folder, &enabled));
}

#[tokio::test]
async fn test_folder_watch_delivers_stable_file_once() {
    let watch = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    std::fs::write(watch.path().join("old.pdf"), b"already here").unwrap();

    let config = FolderWatchConfig {
        enabled: true,
        watch_folder: watch.path().display().to_string(),
        ..FolderWatchConfig::default()
    };
    let driver = Arc::new(FolderWatchDriver::from_config(&config, Duration::from_secs(5)));
    let router = router(out.path());
    let task = FolderWatchTask::new(driver, router.clone());

    assert_eq!(task.tick().await, 0, "baseline");
    std::fs::write(watch.path().join("invoice.pdf"), b"%PDF-1.4 invoice").unwrap();
    assert_eq!(task.tick().await, 0, "size seen once");
    assert_eq!(task.tick().await, 1, "size stable");
    assert_eq!(task.tick().await, 0, "not delivered twice");

    assert!(!watch.path().join("invoice.pdf").exists());
    assert!(watch.path().join("old.pdf").exists());
    let history = router.history().recent(5);
    assert_eq!(history.len(), 1);
    assert!(history[0].auto);
    assert_eq!(history[0].size_bytes, 16);
}

#[tokio::test]
async fn test_folder_watch_retries_file_after_failed_save() {
    let watch = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let target = out.path().join("scans");
    std::fs::write(&target, b"not a directory").unwrap();

    let config = FolderWatchConfig {
        enabled: true,
        watch_folder: watch.path().display().to_string(),
        ..FolderWatchConfig::default()
    };
    let driver = Arc::new(FolderWatchDriver::from_config(&config, Duration::from_secs(5)));
    let router = router(&target);
    let task = FolderWatchTask::new(driver, router.clone());

    assert_eq!(task.tick().await, 0, "baseline");
    std::fs::write(watch.path().join("receipt.pdf"), b"%PDF-1.4 receipt").unwrap();
    assert_eq!(task.tick().await, 0, "size seen once");
    assert_eq!(task.tick().await, 0, "output folder blocked");
    assert!(watch.path().join("receipt.pdf").exists());
    assert!(router.history().recent(5).is_empty());

    std::fs::remove_file(&target).unwrap();
    assert_eq!(task.tick().await, 1, "retried once the folder is writable");
    assert!(!watch.path().join("receipt.pdf").exists());
    assert!(target.join("auto_001.pdf").exists());
    assert_eq!(router.history().recent(5).len(), 1);
}
