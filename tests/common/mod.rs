#![allow(dead_code)]

use async_trait::async_trait;
use spsp_pay::domain::credentials::{Credentials, STREAM_CONTENT_TYPE};
use spsp_pay::domain::payment::PaymentEvent;
use spsp_pay::domain::ports::{Discovery, PaymentObserver};
use spsp_pay::error::{PayError, Result};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

pub const SECRET: [u8; 32] = [42u8; 32];
pub const DESTINATION: &str = "g.test.alice";

/// Discovery stub answering every query with the same outcome.
pub struct StaticDiscovery {
    content_type: String,
    fail_with: Option<u16>,
    queries: Arc<AtomicU32>,
}

impl StaticDiscovery {
    pub fn stream() -> Self {
        Self::with_content_type(STREAM_CONTENT_TYPE)
    }

    pub fn with_content_type(content_type: &str) -> Self {
        Self {
            content_type: content_type.to_string(),
            fail_with: None,
            queries: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            fail_with: Some(status),
            ..Self::stream()
        }
    }

    pub fn queries(&self) -> Arc<AtomicU32> {
        self.queries.clone()
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn query(&self, receiver: &str) -> Result<Credentials> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match self.fail_with {
            Some(status) => Err(PayError::Discovery {
                status,
                endpoint: receiver.to_string(),
                body: "not found".to_string(),
            }),
            None => Ok(Credentials::new(DESTINATION, SECRET, &self.content_type)),
        }
    }
}

/// Observer that keeps every event for later inspection.
#[derive(Default)]
pub struct EventLog(Mutex<Vec<PaymentEvent>>);

impl EventLog {
    pub fn events(&self) -> Vec<PaymentEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl PaymentObserver for EventLog {
    fn on_event(&self, event: &PaymentEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

/// Serves the same canned HTTP response to every request on a local port.
///
/// Returns the base URL and a channel receiving each request's head.
pub fn serve_http(status: &str, content_type: &str, body: &str) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                    break;
                }
                head.push_str(&line);
            }
            let _ = tx.send(head);
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
        }
    });

    (format!("http://{addr}"), rx)
}

/// A well-formed SPSP body for [`DESTINATION`] and [`SECRET`].
pub fn spsp_body() -> String {
    use base64::Engine;
    let secret = base64::engine::general_purpose::STANDARD.encode(SECRET);
    format!(r#"{{"destination_account":"{DESTINATION}","shared_secret":"{secret}"}}"#)
}
