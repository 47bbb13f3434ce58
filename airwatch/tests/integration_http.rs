//! Integration tests for the HTTP data source against an in-process server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use airwatch::config::ClientConfig;
use airwatch::error::{AirwatchError, TransportError};
use airwatch::fanout::fetch_all;
use airwatch::http::HttpSource;
use airwatch::reading::{DeviceId, TimeWindow};
use airwatch::source::DataSource;
use chrono::TimeZone;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A request as the server saw it.
#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    headers: HashMap<String, String>,
}

type Routes = HashMap<&'static str, (u16, &'static str)>;

/// Serves canned responses by path until the test ends. Unknown paths get 404.
async fn serve(routes: Routes) -> (String, Arc<Mutex<Vec<Recorded>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let recorded = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&recorded);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let routes = routes.clone();
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let text = String::from_utf8_lossy(&request).to_string();
                let mut lines = text.split("\r\n");
                let path = lines
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                    .unwrap_or("/")
                    .to_string();
                let headers = lines
                    .take_while(|line| !line.is_empty())
                    .filter_map(|line| line.split_once(':'))
                    .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
                    .collect();

                let (status, body) = routes.get(path.as_str()).copied().unwrap_or((404, ""));
                log.lock().unwrap().push(Recorded { path, headers });

                let reason = match status {
                    200 => "OK",
                    404 => "Not Found",
                    _ => "Internal Server Error",
                };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (base_url, recorded)
}

fn window() -> TimeWindow {
    let start = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let end = chrono::Utc.with_ymd_and_hms(2024, 5, 8, 12, 30, 0).unwrap();
    TimeWindow::new(start, end).unwrap()
}

fn source(base_url: &str) -> HttpSource {
    HttpSource::new(&ClientConfig::new(base_url)).unwrap()
}

#[tokio::test]
async fn test_list_devices() {
    let (base_url, _) = serve(HashMap::from([(
        "/devices",
        (200, r#"{"devices": ["wall-e-1", "wall-e-2"]}"#),
    )]))
    .await;

    let devices = source(&base_url).list_devices().await.unwrap();
    assert_eq!(
        devices,
        vec![DeviceId::from("wall-e-1"), DeviceId::from("wall-e-2")]
    );
}

#[tokio::test]
async fn test_fetch_series_sends_window_headers() {
    let (base_url, recorded) = serve(HashMap::from([(
        "/devices/wall-e-1/data",
        (
            200,
            r#"{"data": [
                {"DeviceID": "wall-e-1", "Timestamp": "2024-05-01T10:00:00Z", "PM10": "12.5", "PM25": "7.25"},
                {"DeviceID": "wall-e-1", "Timestamp": "2024-05-01T10:05:00Z", "PM10": 13, "PM25": 8.5}
            ]}"#,
        ),
    )]))
    .await;

    let device = DeviceId::from("wall-e-1");
    let readings = source(&base_url)
        .fetch_series(&device, &window())
        .await
        .unwrap();

    assert_eq!(readings.len(), 2);
    assert_eq!(readings[0].device_id, device);
    assert_eq!(readings[0].timestamp, "2024-05-01T10:00:00Z");
    assert_eq!(readings[0].pm10, "12.5");
    assert_eq!(readings[0].pm25, "7.25");
    assert_eq!(readings[1].pm10, "13");
    assert_eq!(readings[1].pm25, "8.5");

    let recorded = recorded.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].path, "/devices/wall-e-1/data");
    assert_eq!(
        recorded[0].headers.get("start_date").map(String::as_str),
        Some("2024-05-01T00:00:00.000Z")
    );
    assert_eq!(
        recorded[0].headers.get("end_date").map(String::as_str),
        Some("2024-05-08T12:30:00.000Z")
    );
}

#[tokio::test]
async fn test_fetch_series_no_data_is_empty() {
    let (base_url, _) = serve(HashMap::from([(
        "/devices/quiet/data",
        (404, r#"{"message": "No data found for device quiet"}"#),
    )]))
    .await;

    let readings = source(&base_url)
        .fetch_series(&DeviceId::from("quiet"), &window())
        .await
        .unwrap();
    assert!(readings.is_empty());
}

#[tokio::test]
async fn test_fetch_series_unknown_route_is_http_status() {
    // Nothing is routed, as with a base URL pointing at the wrong path.
    let (base_url, _) = serve(HashMap::new()).await;

    let err = source(&base_url)
        .fetch_series(&DeviceId::from("quiet"), &window())
        .await
        .unwrap_err();
    match err {
        TransportError::HttpStatus { status, url, .. } => {
            assert_eq!(status, 404);
            assert!(url.ends_with("/devices/quiet/data"));
        }
        other => panic!("Expected HttpStatus, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_http_status() {
    let (base_url, _) = serve(HashMap::from([("/devices", (500, "database unavailable"))])).await;

    let err = source(&base_url).list_devices().await.unwrap_err();
    match err {
        TransportError::HttpStatus { status, body, url } => {
            assert_eq!(status, 500);
            assert_eq!(body, "database unavailable");
            assert!(url.ends_with("/devices"));
        }
        other => panic!("Expected HttpStatus, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_unexpected_shape_is_decode_error() {
    let (base_url, _) = serve(HashMap::from([
        ("/devices", (200, r#"{"items": []}"#)),
        ("/devices/A/data", (200, r#"{"data": [{"Timestamp": "t"}]}"#)),
    ]))
    .await;
    let source = source(&base_url);

    assert!(matches!(
        source.list_devices().await,
        Err(TransportError::Decode { .. })
    ));
    assert!(matches!(
        source.fetch_series(&DeviceId::from("A"), &window()).await,
        Err(TransportError::Decode { .. })
    ));
}

#[tokio::test]
async fn test_fanout_over_http() {
    let (base_url, recorded) = serve(HashMap::from([
        ("/devices", (200, r#"{"devices": ["A", "B", "C"]}"#)),
        (
            "/devices/A/data",
            (200, r#"{"data": [{"Timestamp": "2024-05-01T00:00:00Z", "PM10": "1", "PM25": "2"}]}"#),
        ),
        (
            "/devices/B/data",
            (200, r#"{"data": [{"Timestamp": "2024-05-01T00:00:00Z", "PM10": "3", "PM25": "4"}]}"#),
        ),
        (
            "/devices/C/data",
            (404, r#"{"message": "No data found for device C"}"#),
        ),
    ]))
    .await;

    // C has no data and answers 404.
    let merged = fetch_all(&source(&base_url), &window(), &[]).await.unwrap();
    assert_eq!(merged.len(), 2);
    assert_eq!(recorded.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_fanout_over_http_names_failing_device() {
    let (base_url, _) = serve(HashMap::from([
        (
            "/devices/A/data",
            (200, r#"{"data": [{"Timestamp": "2024-05-01T00:00:00Z", "PM10": "1", "PM25": "2"}]}"#),
        ),
        ("/devices/B/data", (500, "boom")),
    ]))
    .await;

    let devices = [DeviceId::from("A"), DeviceId::from("B")];
    let err = fetch_all(&source(&base_url), &window(), &devices)
        .await
        .unwrap_err();
    assert!(matches!(err, AirwatchError::AggregateFetch(_)));
    assert_eq!(err.failed_devices().unwrap(), vec![&DeviceId::from("B")]);
}

#[tokio::test]
async fn test_connection_refused_is_request_failed() {
    // Bind and drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = source(&base_url).list_devices().await.unwrap_err();
    assert!(matches!(err, TransportError::RequestFailed { .. }));
}
