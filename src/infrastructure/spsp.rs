use crate::domain::credentials::Credentials;
use crate::domain::crypto::SHARED_SECRET_LENGTH;
use crate::domain::ports::Discovery;
use crate::error::{PayError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

const ACCEPT_SPSP: &str = "application/spsp4+json, application/spsp+json";
const WELL_KNOWN_PATH: &str = "/.well-known/pay";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct SpspResponse {
    destination_account: String,
    shared_secret: String,
    #[serde(default)]
    balance: Option<Value>,
    #[serde(default)]
    ledger_info: Option<Value>,
    #[serde(default)]
    receiver_info: Option<Value>,
}

/// Turns a payment pointer (`$host/path`) or plain URL into the endpoint to
/// query. A bare host is served from the well-known path.
pub fn resolve_endpoint(receiver: &str) -> Result<Url> {
    let raw = match receiver.strip_prefix('$') {
        Some(pointer) => format!("https://{pointer}"),
        None => receiver.to_string(),
    };
    let mut url = Url::parse(&raw).map_err(|e| PayError::InvalidDiscoveryResponse {
        endpoint: receiver.to_string(),
        reason: format!("not a payment pointer or URL: {e}"),
    })?;
    if url.path() == "/" {
        url.set_path(WELL_KNOWN_PATH);
    }
    Ok(url)
}

/// Parses an SPSP response body into [`Credentials`].
pub fn parse_credentials(endpoint: &str, body: &str, content_type: &str) -> Result<Credentials> {
    let invalid = |reason: String| PayError::InvalidDiscoveryResponse {
        endpoint: endpoint.to_string(),
        reason,
    };
    let response: SpspResponse =
        serde_json::from_str(body).map_err(|e| invalid(format!("malformed JSON: {e}")))?;
    let secret = STANDARD
        .decode(response.shared_secret.trim())
        .map_err(|e| invalid(format!("shared_secret is not base64: {e}")))?;
    let shared_secret: [u8; SHARED_SECRET_LENGTH] = secret.try_into().map_err(|bytes: Vec<u8>| {
        invalid(format!(
            "shared_secret must be {SHARED_SECRET_LENGTH} bytes, got {}",
            bytes.len()
        ))
    })?;

    let mut credentials =
        Credentials::new(response.destination_account, shared_secret, content_type);
    credentials.balance = response.balance;
    credentials.ledger_info = response.ledger_info;
    credentials.receiver_info = response.receiver_info;
    Ok(credentials)
}

/// SPSP client resolving payment pointers over HTTPS.
pub struct SpspClient {
    client: Client,
}

impl SpspClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Discovery for SpspClient {
    async fn query(&self, receiver: &str) -> Result<Credentials> {
        let endpoint = resolve_endpoint(receiver)?;
        debug!(%endpoint, "querying SPSP endpoint");

        let response = self
            .client
            .get(endpoint.clone())
            .header(ACCEPT, ACCEPT_SPSP)
            .send()
            .await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(PayError::Discovery {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
                body,
            });
        }
        parse_credentials(endpoint.as_str(), &body, &content_type)
    }
}
