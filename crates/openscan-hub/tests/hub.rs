use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use openscan_core::{
    AppConfig, DeviceState, ErrorKind, FolderWatchConfig, FtpReceiveConfig, JobConfig,
    MonitorConfig, Protocol, RetryPolicy, ScanSource, ScannerDescriptor,
};
use openscan_hub::{HubError, Reconfiguration, ScanHub};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const CAPABILITIES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<scan:ScannerCapabilities xmlns:scan="http://schemas.hp.com/imaging/escl/2011/05/03" xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm">
  <pwg:Version>2.63</pwg:Version>
  <pwg:MakeAndModel>Hub Test MFP</pwg:MakeAndModel>
  <scan:Platen><scan:PlatenInputCaps/></scan:Platen>
  <scan:Adf><scan:AdfSimplexInputCaps/></scan:Adf>
</scan:ScannerCapabilities>"#;

const STATUS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<scan:ScannerStatus xmlns:scan="http://schemas.hp.com/imaging/escl/2011/05/03" xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm">
  <pwg:Version>2.63</pwg:Version>
  <pwg:State>Idle</pwg:State>
  <scan:AdfState>ScannerAdfEmpty</scan:AdfState>
</scan:ScannerStatus>"#;

/// One page per job, feeder kept empty so the monitor never fires.
#[derive(Default)]
struct FakeMfp {
    jobs: AtomicUsize,
    served: Mutex<HashSet<String>>,
}

async fn capabilities() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/xml")], CAPABILITIES)
}

async fn status() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/xml")], STATUS)
}

async fn create_job(State(fake): State<Arc<FakeMfp>>) -> Response {
    let n = fake.jobs.fetch_add(1, Ordering::SeqCst) + 1;
    (
        StatusCode::CREATED,
        [(header::LOCATION, format!("/eSCL/ScanJobs/job-{n}"))],
    )
        .into_response()
}

async fn next_document(State(fake): State<Arc<FakeMfp>>, Path(job): Path<String>) -> Response {
    if fake.served.lock().unwrap().insert(job) {
        ([(header::CONTENT_TYPE, "application/pdf")], b"%PDF-1.7 hub page".to_vec()).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn delete_job() -> StatusCode {
    StatusCode::OK
}

async fn spawn_fake(fake: Arc<FakeMfp>) -> SocketAddr {
    let app = Router::new()
        .route("/eSCL/ScannerCapabilities", get(capabilities))
        .route("/eSCL/ScannerStatus", get(status))
        .route("/eSCL/ScanJobs", post(create_job))
        .route("/eSCL/ScanJobs/{job}/NextDocument", get(next_document))
        .route("/eSCL/ScanJobs/{job}", delete(delete_job))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake scanner");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve fake scanner");
    });
    addr
}

fn config(out: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.output.folder = out.display().to_string();
    config.output.filename_pattern = "hub_{n}".to_string();
    config.jobs = JobConfig {
        poll_interval_ms: 10,
        timeout_seconds: 5,
        request_timeout_seconds: 5,
        retry: RetryPolicy::default().with_initial_backoff(Duration::from_millis(10)),
    };
    config
}

fn descriptor(addr: SocketAddr) -> ScannerDescriptor {
    ScannerDescriptor::new(addr.ip().to_string(), addr.port(), Protocol::Escl)
        .with_sources([ScanSource::Platen, ScanSource::Feeder])
}

async fn hub_with_scanner(out: &std::path::Path, addr: SocketAddr) -> ScanHub {
    let config = config(out);
    let hub = ScanHub::new(&config).expect("hub");
    hub.reconfigure(Reconfiguration {
        scanner: Some(descriptor(addr)),
        output: config.output.clone(),
        ..Reconfiguration::default()
    })
    .await
    .expect("reconfigure");
    hub
}

#[tokio::test]
async fn test_manual_feeder_scan_is_saved_and_recorded() {
    let addr = spawn_fake(Arc::new(FakeMfp::default())).await;
    let out = TempDir::new().unwrap();
    let hub = hub_with_scanner(out.path(), addr).await;

    let outcome = hub.scan(ScanSource::Feeder).await.expect("scan");

    assert_eq!(outcome.result.source_used, ScanSource::Feeder);
    assert!(!outcome.result.auto);
    assert!(outcome.result.size_bytes > 0);
    assert_eq!(outcome.report.filename, "hub_001.pdf");
    assert_eq!(
        std::fs::read(&outcome.report.saved_path).unwrap(),
        b"%PDF-1.7 hub page"
    );

    let history = hub.history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].filename, "hub_001.pdf");
    assert!(!history[0].auto);
    assert!(history[0].delivery_error.is_none());
}

#[tokio::test]
async fn test_status_of_active_scanner() {
    let addr = spawn_fake(Arc::new(FakeMfp::default())).await;
    let out = TempDir::new().unwrap();
    let hub = hub_with_scanner(out.path(), addr).await;

    let status = hub.status().await;
    assert_eq!(status.state, DeviceState::Idle);
    assert!(status.is_online());
}

#[tokio::test]
async fn test_test_scan_bypasses_output() {
    let fake = Arc::new(FakeMfp::default());
    let addr = spawn_fake(fake.clone()).await;
    let out = TempDir::new().unwrap();
    let folder = out.path().join("scans");
    let hub = ScanHub::new(&config(&folder)).expect("hub");

    let result = hub
        .test_scan(&descriptor(addr), ScanSource::Platen)
        .await
        .expect("test scan");

    assert_eq!(result.source_used, ScanSource::Platen);
    assert_eq!(fake.jobs.load(Ordering::SeqCst), 1);
    assert!(!folder.exists());
    assert!(hub.history(10).is_empty());
    assert!(hub.active_descriptor().is_none());
}

#[tokio::test]
async fn test_probe_identifies_escl_host() {
    let addr = spawn_fake(Arc::new(FakeMfp::default())).await;
    let out = TempDir::new().unwrap();
    let hub = ScanHub::new(&config(out.path())).expect("hub");

    let found = hub
        .probe(&addr.ip().to_string(), addr.port(), None)
        .await
        .expect("probe answers");
    assert_eq!(found.protocol, Protocol::Escl);
    assert!(found.has_feeder());

    assert!(hub.test_connection(&found).await.expect("driver"));
}

#[tokio::test]
async fn test_reconfigure_starts_and_stops_monitor() {
    let addr = spawn_fake(Arc::new(FakeMfp::default())).await;
    let out = TempDir::new().unwrap();
    let config = config(out.path());
    let hub = ScanHub::new(&config).expect("hub");
    let monitor = MonitorConfig {
        enabled: true,
        ..MonitorConfig::default()
    };

    hub.reconfigure(Reconfiguration {
        scanner: Some(descriptor(addr)),
        output: config.output.clone(),
        monitor: monitor.clone(),
        ..Reconfiguration::default()
    })
    .await
    .expect("activate");
    assert!(hub.monitor_running().await);

    // Platen-only scanner: no monitor
    hub.reconfigure(Reconfiguration {
        scanner: Some(ScannerDescriptor::new(addr.ip().to_string(), addr.port(), Protocol::Escl)),
        output: config.output.clone(),
        monitor: monitor.clone(),
        ..Reconfiguration::default()
    })
    .await
    .expect("swap");
    assert!(!hub.monitor_running().await);
    assert!(!hub.active_descriptor().unwrap().has_feeder());

    hub.reconfigure(Reconfiguration {
        scanner: None,
        output: config.output.clone(),
        monitor,
        ..Reconfiguration::default()
    })
    .await
    .expect("clear");
    assert!(hub.active_descriptor().is_none());
    assert!(!hub.status().await.is_online());
    let err = hub.scan(ScanSource::Platen).await.unwrap_err();
    assert!(matches!(err, HubError::NoActiveScanner));
}

#[tokio::test]
async fn test_unreachable_scanner_scan_fails_with_cause() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let out = TempDir::new().unwrap();
    let hub = hub_with_scanner(out.path(), addr).await;

    let err = hub.scan(ScanSource::Platen).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NetworkError);
    assert!(!err.to_string().is_empty());
    assert!(hub.history(10).is_empty());
}

#[tokio::test]
async fn test_folder_watch_follows_config() {
    let watch = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let hub = ScanHub::new(&config(out.path())).expect("hub");
    assert!(!hub.folder_watch_running().await);

    hub.reconfigure_folder_watch(FolderWatchConfig {
        enabled: true,
        watch_folder: watch.path().display().to_string(),
        poll_interval_seconds: 0.05,
        ..FolderWatchConfig::default()
    })
    .await;
    assert!(hub.folder_watch_running().await);
    // Let the first poll take its snapshot of the empty folder
    tokio::time::sleep(Duration::from_millis(300)).await;

    std::fs::write(watch.path().join("dropped.pdf"), b"%PDF dropped").unwrap();
    let mut waited = Duration::ZERO;
    while hub.history(1).is_empty() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    let history = hub.history(1);
    assert_eq!(history.len(), 1);
    assert!(history[0].auto);

    hub.shutdown().await;
    assert!(!hub.folder_watch_running().await);
}

async fn ftp_reply<R>(reader: &mut R) -> String
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    reader.read_line(&mut line).await.expect("read reply");
    line
}

/// Log in and push one file over a passive data connection.
async fn ftp_upload(addr: SocketAddr, name: &str, bytes: &[u8]) {
    let stream = TcpStream::connect(("127.0.0.1", addr.port()))
        .await
        .expect("connect control");
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    assert!(ftp_reply(&mut reader).await.starts_with("220"));

    for (command, code) in [("USER scan", "331"), ("PASS scan", "230"), ("TYPE I", "200")] {
        write.write_all(format!("{command}\r\n").as_bytes()).await.unwrap();
        let reply = ftp_reply(&mut reader).await;
        assert!(reply.starts_with(code), "{command}: {reply}");
    }

    write.write_all(b"EPSV\r\n").await.unwrap();
    let reply = ftp_reply(&mut reader).await;
    let port: u16 = reply
        .split("(|||")
        .nth(1)
        .and_then(|rest| rest.split('|').next())
        .and_then(|port| port.parse().ok())
        .unwrap_or_else(|| panic!("no port in {reply}"));

    write.write_all(format!("STOR {name}\r\n").as_bytes()).await.unwrap();
    let mut data = TcpStream::connect(("127.0.0.1", port)).await.expect("data");
    assert!(ftp_reply(&mut reader).await.starts_with("150"));
    data.write_all(bytes).await.unwrap();
    data.shutdown().await.unwrap();
    drop(data);
    let reply = ftp_reply(&mut reader).await;
    assert!(reply.starts_with("226"), "{reply}");

    write.write_all(b"QUIT\r\n").await.unwrap();
}

#[tokio::test]
async fn test_ftp_upload_is_routed() {
    let staging = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let hub = ScanHub::new(&config(out.path())).expect("hub");
    assert!(hub.ftp_receive_addr().await.is_none());

    hub.reconfigure_ftp_receive(FtpReceiveConfig {
        enabled: true,
        port: 0,
        staging_dir: staging.path().display().to_string(),
        passive_port_start: 0,
        passive_port_end: 0,
        ..FtpReceiveConfig::default()
    })
    .await
    .expect("start receiver");
    let addr = hub.ftp_receive_addr().await.expect("receiver running");

    ftp_upload(addr, "scan0001.pdf", b"%PDF-1.7 pushed").await;

    let mut waited = Duration::ZERO;
    while hub.history(1).is_empty() && waited < Duration::from_secs(10) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += Duration::from_millis(100);
    }
    let history = hub.history(1);
    assert_eq!(history.len(), 1);
    assert!(history[0].auto);
    assert_eq!(
        std::fs::read(out.path().join(&history[0].filename)).unwrap(),
        b"%PDF-1.7 pushed"
    );
    // Delete after routing is the default
    let staged = staging.path().join("scan0001.pdf");
    let mut waited = Duration::ZERO;
    while staged.exists() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    assert!(!staged.exists());

    hub.shutdown().await;
    assert!(hub.ftp_receive_addr().await.is_none());
}

#[tokio::test]
async fn test_ftp_receive_bind_failure_is_reported() {
    let taken = std::net::TcpListener::bind("0.0.0.0:0").expect("bind");
    let port = taken.local_addr().unwrap().port();
    let staging = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let hub = ScanHub::new(&config(out.path())).expect("hub");

    let err = hub
        .reconfigure_ftp_receive(FtpReceiveConfig {
            enabled: true,
            port,
            staging_dir: staging.path().display().to_string(),
            ..FtpReceiveConfig::default()
        })
        .await
        .unwrap_err();
    assert!(!err.to_string().is_empty());
    assert!(hub.ftp_receive_addr().await.is_none());
}
