use super::credentials::Credentials;
use super::packet::{Prepare, Reply};
use super::payment::PaymentEvent;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Packet-switched link to the ledger network.
///
/// `send_data` may be called concurrently; replies come back in whatever
/// order the network produces them.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn send_data(&self, prepare: Prepare) -> Result<Reply>;
}

/// Resolves a payment pointer to connection credentials.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn query(&self, receiver: &str) -> Result<Credentials>;
}

pub trait PaymentObserver: Send + Sync {
    fn on_event(&self, event: &PaymentEvent);
}

pub type TransportBox = Arc<dyn Transport>;
pub type DiscoveryBox = Box<dyn Discovery>;
pub type ObserverBox = Arc<dyn PaymentObserver>;
