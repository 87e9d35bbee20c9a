use crate::domain::packet::{Prepare, Reply};
use crate::domain::ports::Transport;
use crate::error::{PayError, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const OCTET_STREAM: &str = "application/octet-stream";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Sends ILP packets to a connector as HTTP POST bodies.
pub struct IlpOverHttp {
    client: Client,
    url: Url,
    auth_token: Option<String>,
    connected: AtomicBool,
}

impl IlpOverHttp {
    pub fn new(url: &str, auth_token: Option<String>) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| PayError::Connection(format!("invalid connector URL {url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PayError::Connection(format!(
                "connector URL must be http or https, got {}",
                url.scheme()
            )));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url,
            auth_token,
            connected: AtomicBool::new(false),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for IlpOverHttp {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::Release);
        info!(url = %self.url, "transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn send_data(&self, prepare: Prepare) -> Result<Reply> {
        if !self.is_connected() {
            return Err(PayError::Connection("transport is not connected".to_string()));
        }

        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(prepare.encode());
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PayError::Connection(format!("connector unreachable: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PayError::Connection(format!(
                "connector answered {status}: {body}"
            )));
        }
        let body = response.bytes().await?;
        let reply = Reply::decode(&body)?;
        debug!(amount = prepare.amount, fulfilled = matches!(reply, Reply::Fulfill(_)), "packet answered");
        Ok(reply)
    }
}
