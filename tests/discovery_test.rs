mod common;

use common::{DESTINATION, SECRET, serve_http, spsp_body};
use spsp_pay::domain::ports::Discovery;
use spsp_pay::error::PayError;
use spsp_pay::infrastructure::spsp::SpspClient;

#[tokio::test]
async fn test_query_returns_credentials_and_content_type() {
    let (base, requests) = serve_http("200 OK", "application/spsp4+json", &spsp_body());
    let client = SpspClient::new().unwrap();

    let creds = client.query(&format!("{base}/alice")).await.unwrap();

    assert_eq!(creds.destination_account, DESTINATION);
    assert_eq!(creds.shared_secret, SECRET);
    assert_eq!(creds.content_type, "application/spsp4+json");
    assert!(creds.supports_stream());

    let head = requests.recv().unwrap().to_lowercase();
    assert!(head.starts_with("get /alice "));
    assert!(head.contains("accept: application/spsp4+json, application/spsp+json"));
}

#[tokio::test]
async fn test_bare_host_uses_well_known_path() {
    let (base, requests) = serve_http("200 OK", "application/spsp4+json", &spsp_body());
    let client = SpspClient::new().unwrap();

    client.query(&base).await.unwrap();

    let head = requests.recv().unwrap();
    assert!(head.starts_with("GET /.well-known/pay "));
}

#[tokio::test]
async fn test_error_status_is_reported_with_body() {
    let (base, _requests) = serve_http("404 Not Found", "text/plain", "no such user");
    let client = SpspClient::new().unwrap();

    let result = client.query(&format!("{base}/nobody")).await;

    let Err(PayError::Discovery {
        status,
        endpoint,
        body,
    }) = result
    else {
        panic!("expected discovery error, got {result:?}");
    };
    assert_eq!(status, 404);
    assert_eq!(endpoint, format!("{base}/nobody"));
    assert_eq!(body, "no such user");
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let (base, _requests) = serve_http("200 OK", "application/spsp4+json", "{\"nope\":1}");
    let client = SpspClient::new().unwrap();

    let result = client.query(&format!("{base}/alice")).await;
    assert!(matches!(
        result,
        Err(PayError::InvalidDiscoveryResponse { .. })
    ));
}
