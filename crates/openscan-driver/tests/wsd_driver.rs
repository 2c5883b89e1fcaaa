use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use openscan_core::{
    AdfState, DeviceState, JobConfig, Protocol, RetryPolicy, ScanRequest, ScanSource,
    ScannerDescriptor,
};
use openscan_driver::{DriverError, ScannerDriver, WsdDriver};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ELEMENTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" xmlns:wscn="http://schemas.microsoft.com/windows/2006/08/wdp/scan">
  <soap:Body>
    <wscn:GetScannerElementsResponse><wscn:ScannerElements>
      <wscn:ElementData Name="wscn:ScannerDescription" Valid="true">
        <wscn:ScannerDescription><wscn:ScannerName>Fake WorkCentre</wscn:ScannerName></wscn:ScannerDescription>
      </wscn:ElementData>
      <wscn:ElementData Name="wscn:ScannerConfiguration" Valid="true">
        <wscn:ScannerConfiguration><wscn:Platen/><wscn:ADF><wscn:ADFSupportsDuplex>false</wscn:ADFSupportsDuplex></wscn:ADF></wscn:ScannerConfiguration>
      </wscn:ElementData>
      <wscn:ElementData Name="wscn:ScannerStatus" Valid="true">
        <wscn:ScannerStatus><wscn:ScannerState>Idle</wscn:ScannerState><wscn:AdfState>Empty</wscn:AdfState></wscn:ScannerStatus>
      </wscn:ElementData>
    </wscn:ScannerElements></wscn:GetScannerElementsResponse>
  </soap:Body>
</soap:Envelope>"#;

const JOB_CREATED: &str = r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" xmlns:wscn="http://schemas.microsoft.com/windows/2006/08/wdp/scan"><soap:Body>
  <wscn:CreateScanJobResponse><wscn:JobId>17</wscn:JobId><wscn:JobToken>token-17</wscn:JobToken></wscn:CreateScanJobResponse>
</soap:Body></soap:Envelope>"#;

const BOUNDARY: &str = "uuid:0d1c2b3a";

fn job_elements(state: &str) -> String {
    format!(
        r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" xmlns:wscn="http://schemas.microsoft.com/windows/2006/08/wdp/scan"><soap:Body>
  <wscn:GetJobElementsResponse><wscn:JobElements><wscn:ElementData Name="wscn:JobStatus" Valid="true">
    <wscn:JobStatus><wscn:JobId>17</wscn:JobId><wscn:JobState>{state}</wscn:JobState></wscn:JobStatus>
  </wscn:ElementData></wscn:JobElements></wscn:GetJobElementsResponse>
</soap:Body></soap:Envelope>"#
    )
}

fn fault(subcode: &str) -> String {
    format!(
        r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" xmlns:wscn="http://schemas.microsoft.com/windows/2006/08/wdp/scan"><soap:Body><soap:Fault>
  <soap:Code><soap:Value>soap:Sender</soap:Value><soap:Subcode><soap:Value>wscn:{subcode}</soap:Value></soap:Subcode></soap:Code>
  <soap:Reason><soap:Text xml:lang="en">{subcode}</soap:Text></soap:Reason>
</soap:Fault></soap:Body></soap:Envelope>"#
    )
}

fn mtom(image: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\nContent-Type: application/xop+xml; charset=UTF-8; type=\"application/soap+xml\"\r\n\r\n").as_bytes());
    body.extend_from_slice(b"<soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\"><soap:Body><wscn:RetrieveImageResponse xmlns:wscn=\"http://schemas.microsoft.com/windows/2006/08/wdp/scan\"/></soap:Body></soap:Envelope>\r\n");
    body.extend_from_slice(format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Transfer-Encoding: binary\r\nContent-ID: <image0>\r\n\r\n").as_bytes());
    body.extend_from_slice(image);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

struct FakeWsd {
    images: Vec<Vec<u8>>,
    pending_polls: AtomicUsize,
    job_state: &'static str,
    retrieved: AtomicUsize,
    jobs: AtomicUsize,
}

impl FakeWsd {
    fn new(images: &[&[u8]]) -> Self {
        Self {
            images: images.iter().map(|i| i.to_vec()).collect(),
            pending_polls: AtomicUsize::new(0),
            job_state: "Processing",
            retrieved: AtomicUsize::new(0),
            jobs: AtomicUsize::new(0),
        }
    }
}

fn soap_xml(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/soap+xml; charset=utf-8")],
        body,
    )
        .into_response()
}

async fn endpoint(State(fake): State<Arc<FakeWsd>>, body: String) -> Response {
    if body.contains("GetScannerElements") {
        return soap_xml(StatusCode::OK, ELEMENTS.to_string());
    }
    if body.contains("CreateScanJob") {
        fake.jobs.fetch_add(1, Ordering::SeqCst);
        return soap_xml(StatusCode::OK, JOB_CREATED.to_string());
    }
    if body.contains("GetJobElements") {
        let pending = fake
            .pending_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let state = if pending { "Pending" } else { fake.job_state };
        return soap_xml(StatusCode::OK, job_elements(state));
    }
    if body.contains("RetrieveImage") {
        let index = fake.retrieved.fetch_add(1, Ordering::SeqCst);
        return match fake.images.get(index) {
            Some(image) => (
                StatusCode::OK,
                [(
                    header::CONTENT_TYPE,
                    format!("multipart/related; type=\"application/xop+xml\"; boundary=\"{BOUNDARY}\"; start-info=\"application/soap+xml\""),
                )],
                mtom(image),
            )
                .into_response(),
            None => soap_xml(
                StatusCode::INTERNAL_SERVER_ERROR,
                fault("ClientErrorNoImagesAvailable"),
            ),
        };
    }
    soap_xml(StatusCode::BAD_REQUEST, fault("InvalidAction"))
}

async fn spawn_fake(fake: Arc<FakeWsd>) -> SocketAddr {
    let app = Router::new()
        .route("/wsd/scan", post(endpoint))
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

fn driver_for(addr: SocketAddr) -> WsdDriver {
    let jobs = JobConfig {
        poll_interval_ms: 10,
        timeout_seconds: 5,
        request_timeout_seconds: 5,
        retry: RetryPolicy::default().with_initial_backoff(Duration::from_millis(10)),
    };
    let descriptor = ScannerDescriptor::new(addr.ip().to_string(), addr.port(), Protocol::Wsd)
        .with_service_path("/wsd/scan");
    WsdDriver::new(descriptor, &jobs).expect("create driver")
}

#[tokio::test]
async fn test_feeder_scan_until_no_images() {
    let fake = Arc::new(FakeWsd {
        pending_polls: AtomicUsize::new(2),
        ..FakeWsd::new(&[b"\xFF\xD8first", b"\xFF\xD8second"])
    });
    let addr = spawn_fake(fake.clone()).await;
    let driver = driver_for(addr);

    let result = driver
        .scan(ScanRequest::new(ScanSource::Feeder))
        .await
        .expect("scan succeeds");

    assert_eq!(result.source_used, ScanSource::Feeder);
    assert!(!result.auto);
    assert_eq!(result.content_type, "image/jpeg");
    assert_eq!(result.filename, "scan.jpg");
    assert_eq!(result.bytes, b"\xFF\xD8first\xFF\xD8second");
    assert_eq!(fake.jobs.load(Ordering::SeqCst), 1);
    assert_eq!(fake.retrieved.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_platen_scan_retrieves_once() {
    let fake = Arc::new(FakeWsd::new(&[b"one", b"two"]));
    let addr = spawn_fake(fake.clone()).await;
    let driver = driver_for(addr);

    let result = driver
        .scan(ScanRequest::new(ScanSource::Platen))
        .await
        .expect("scan succeeds");
    assert_eq!(result.bytes, b"one");
    assert_eq!(fake.retrieved.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_aborted_job_is_protocol_error() {
    let fake = Arc::new(FakeWsd {
        job_state: "Aborted",
        ..FakeWsd::new(&[b"never"])
    });
    let addr = spawn_fake(fake).await;
    let driver = driver_for(addr);

    let err = driver
        .scan(ScanRequest::new(ScanSource::Platen))
        .await
        .expect_err("aborted job fails");
    assert!(matches!(err, DriverError::Protocol { .. }), "got {err}");
}

#[tokio::test]
async fn test_no_images_at_all_times_out() {
    let fake = Arc::new(FakeWsd::new(&[]));
    let addr = spawn_fake(fake).await;
    let jobs = JobConfig {
        poll_interval_ms: 20,
        timeout_seconds: 1,
        request_timeout_seconds: 1,
        retry: RetryPolicy::default().with_initial_backoff(Duration::from_millis(10)),
    };
    let descriptor = ScannerDescriptor::new(addr.ip().to_string(), addr.port(), Protocol::Wsd)
        .with_service_path("/wsd/scan");
    let driver = WsdDriver::new(descriptor, &jobs).expect("create driver");

    let err = driver
        .scan(ScanRequest::new(ScanSource::Feeder))
        .await
        .expect_err("no image ever arrives");
    assert!(matches!(err, DriverError::JobTimeout { .. }), "got {err}");
}

#[tokio::test]
async fn test_capabilities_and_status() {
    let fake = Arc::new(FakeWsd::new(&[]));
    let addr = spawn_fake(fake).await;
    let driver = driver_for(addr);

    let caps = driver.capabilities().await.expect("capabilities");
    assert_eq!(caps.model, "Fake WorkCentre");
    assert!(caps.has_feeder());
    assert!(!caps.duplex);

    let status = driver.status().await.expect("status");
    assert_eq!(status.state, DeviceState::Idle);
    assert_eq!(status.adf_state, AdfState::Empty);
}

#[tokio::test]
async fn test_unreachable_device_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let driver = driver_for(addr);

    assert!(matches!(driver.status().await, Err(DriverError::Network { .. })));
    assert!(matches!(
        driver.capabilities().await,
        Err(DriverError::Unavailable { .. })
    ));
}
