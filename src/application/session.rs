use super::stream::MoneyStream;
use crate::config::PaymentConfig;
use crate::domain::credentials::Credentials;
use crate::domain::crypto::{StreamKeys, random_condition};
use crate::domain::frame::{CloseCode, Frame, IlpPacketType, StreamPacket};
use crate::domain::packet::{Prepare, Reply};
use crate::domain::ports::TransportBox;
use crate::error::{PayError, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

const MAX_STREAM_ID: u64 = 20;

/// Asset the receiver reported during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDetails {
    pub code: String,
    pub scale: u8,
}

/// Connection state shared between a session and its money streams.
pub(crate) struct SessionShared {
    pub(crate) transport: TransportBox,
    destination_account: String,
    keys: StreamKeys,
    next_sequence: AtomicU64,
    delivered: watch::Sender<u64>,
    pub(crate) open_streams: Mutex<HashSet<u64>>,
    packet_expiry: Duration,
}

impl SessionShared {
    pub(crate) fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Wraps a STREAM packet in an ILP Prepare. Frame-only packets get a
    /// random condition so the receiver has to reject them.
    pub(crate) fn prepare(
        &self,
        packet: &StreamPacket,
        amount: u64,
        fulfillable: bool,
    ) -> Result<Prepare> {
        let data = self.keys.encrypt(&packet.encode())?;
        let execution_condition = if fulfillable {
            self.keys.condition(&data)
        } else {
            random_condition()
        };
        let expiry = chrono::Duration::from_std(self.packet_expiry)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        Ok(Prepare {
            amount,
            expires_at: Utc::now() + expiry,
            execution_condition,
            destination: self.destination_account.clone(),
            data: data.into(),
        })
    }

    /// The receiver's STREAM reply for `sequence`, if `data` carries one.
    pub(crate) fn read_reply(&self, data: &[u8], sequence: u64) -> Option<StreamPacket> {
        if data.is_empty() {
            return None;
        }
        let plaintext = self.keys.decrypt(data).ok()?;
        let packet = StreamPacket::decode(&plaintext).ok()?;
        (packet.sequence == sequence).then_some(packet)
    }

    /// Sends frames in an unfulfillable packet and returns the receiver's
    /// authenticated reply.
    pub(crate) async fn send_control(&self, frames: Vec<Frame>) -> Result<StreamPacket> {
        let sequence = self.next_sequence();
        let packet = StreamPacket::new(sequence, IlpPacketType::Prepare, 0).with_frames(frames);
        let prepare = self.prepare(&packet, 0, false)?;
        match self.transport.send_data(prepare).await? {
            Reply::Reject(reject) => self.read_reply(&reject.data, sequence).ok_or_else(|| {
                PayError::Connection(format!(
                    "packet {sequence} rejected by {} without a STREAM reply: {} {}",
                    reject.triggered_by, reject.code, reject.message
                ))
            }),
            Reply::Fulfill(_) => Err(PayError::Connection(format!(
                "unfulfillable packet {sequence} was fulfilled"
            ))),
        }
    }

    pub(crate) fn add_delivered(&self, amount: u64) {
        self.delivered
            .send_modify(|total| *total = total.saturating_add(amount));
    }

    pub(crate) fn total_delivered(&self) -> u64 {
        *self.delivered.borrow()
    }
}

/// One encrypted STREAM connection to a receiver.
pub struct StreamSession {
    shared: Arc<SessionShared>,
    config: PaymentConfig,
    next_stream_id: u64,
    streams: Vec<MoneyStream>,
    asset: Option<AssetDetails>,
    closed: bool,
}

impl StreamSession {
    /// Performs the STREAM handshake over an already connected transport.
    pub async fn open(
        transport: TransportBox,
        credentials: &Credentials,
        config: &PaymentConfig,
    ) -> Result<Self> {
        let (delivered, _) = watch::channel(0);
        let shared = Arc::new(SessionShared {
            transport,
            destination_account: credentials.destination_account.clone(),
            keys: StreamKeys::derive(&credentials.shared_secret),
            next_sequence: AtomicU64::new(1),
            delivered,
            open_streams: Mutex::new(HashSet::new()),
            packet_expiry: config.packet_expiry,
        });

        debug!(destination = %credentials.destination_account, "starting STREAM handshake");
        let reply = shared
            .send_control(vec![Frame::ConnectionMaxStreamId {
                max_stream_id: MAX_STREAM_ID,
            }])
            .await
            .map_err(|e| match e {
                PayError::Connection(_) => e,
                other => PayError::Connection(format!("handshake failed: {other}")),
            })?;
        if reply.has_close_frame() {
            return Err(PayError::Connection(
                "receiver closed the connection during the handshake".to_string(),
            ));
        }

        let asset = reply.frames.iter().find_map(|frame| match frame {
            Frame::ConnectionAssetDetails {
                asset_code,
                asset_scale,
            } => Some(AssetDetails {
                code: asset_code.clone(),
                scale: *asset_scale,
            }),
            _ => None,
        });
        info!(
            destination = %credentials.destination_account,
            asset = ?asset,
            "STREAM connection established"
        );

        Ok(Self {
            shared,
            config: config.clone(),
            next_stream_id: 1,
            streams: Vec::new(),
            asset,
            closed: false,
        })
    }

    /// Opens a new money stream with a send max of zero.
    pub async fn create_money_stream(&mut self) -> MoneyStream {
        // Streams opened by the client use odd ids.
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        self.shared.open_streams.lock().await.insert(id);
        let stream = MoneyStream::spawn(id, self.shared.clone(), &self.config);
        self.streams.push(stream.clone());
        stream
    }

    pub fn destination_account(&self) -> &str {
        &self.shared.destination_account
    }

    pub fn asset_details(&self) -> Option<&AssetDetails> {
        self.asset.as_ref()
    }

    /// Amount the receiver has acknowledged so far, across all streams.
    pub fn total_delivered(&self) -> u64 {
        self.shared.total_delivered()
    }

    pub fn delivered_updates(&self) -> watch::Receiver<u64> {
        self.shared.delivered.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes every stream still open and then the connection itself.
    ///
    /// The session counts as closed afterwards even when the receiver never
    /// acknowledged the close.
    pub async fn end(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Stop every engine first so nothing else goes on the wire.
        for stream in self.streams.drain(..) {
            stream.destroy().await;
        }

        let mut frames: Vec<Frame> = self
            .shared
            .open_streams
            .lock()
            .await
            .drain()
            .map(|stream_id| Frame::StreamClose {
                stream_id,
                code: CloseCode::NoError,
                message: String::new(),
            })
            .collect();
        frames.push(Frame::ConnectionClose {
            code: CloseCode::NoError,
            message: String::new(),
        });

        let timeout = self.config.close_timeout;
        match tokio::time::timeout(timeout, self.shared.send_control(frames)).await {
            Ok(Ok(_)) => {
                info!("STREAM connection closed");
                Ok(())
            }
            Ok(Err(e)) => Err(PayError::Close(format!("close was not acknowledged: {e}"))),
            Err(_) => Err(PayError::Close(format!(
                "close was not acknowledged within {timeout:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credentials::STREAM_CONTENT_TYPE;
    use crate::domain::money::StreamState;
    use crate::domain::ports::Transport;
    use crate::infrastructure::in_memory::{InMemoryReceiver, ReceiverBehavior};

    const SECRET: [u8; 32] = [5u8; 32];

    fn credentials() -> Credentials {
        Credentials::new("g.test.receiver", SECRET, STREAM_CONTENT_TYPE)
    }

    async fn connected(behavior: ReceiverBehavior) -> Arc<InMemoryReceiver> {
        let receiver = Arc::new(InMemoryReceiver::with_behavior(
            "g.test.receiver",
            SECRET,
            behavior,
        ));
        receiver.connect().await.unwrap();
        receiver
    }

    #[tokio::test]
    async fn test_handshake_reads_asset_details() {
        let receiver = connected(ReceiverBehavior {
            asset: Some(("XRP".to_string(), 6)),
            ..Default::default()
        })
        .await;

        let session = StreamSession::open(receiver, &credentials(), &PaymentConfig::default())
            .await
            .unwrap();
        assert_eq!(
            session.asset_details(),
            Some(&AssetDetails {
                code: "XRP".to_string(),
                scale: 6
            })
        );
        assert_eq!(session.total_delivered(), 0);
    }

    #[tokio::test]
    async fn test_handshake_with_wrong_secret_fails() {
        let receiver = connected(ReceiverBehavior::default()).await;
        let wrong = Credentials::new("g.test.receiver", [6u8; 32], STREAM_CONTENT_TYPE);

        let result = StreamSession::open(receiver, &wrong, &PaymentConfig::default()).await;
        assert!(matches!(result, Err(PayError::Connection(_))));
    }

    #[tokio::test]
    async fn test_handshake_on_disconnected_transport_fails() {
        let receiver = Arc::new(InMemoryReceiver::new("g.test.receiver", SECRET));
        let result =
            StreamSession::open(receiver, &credentials(), &PaymentConfig::default()).await;
        assert!(matches!(result, Err(PayError::Connection(_))));
    }

    #[tokio::test]
    async fn test_stream_ids_are_odd_and_closed_on_end() {
        let receiver = connected(ReceiverBehavior::default()).await;
        let mut session = StreamSession::open(
            receiver.clone(),
            &credentials(),
            &PaymentConfig::default(),
        )
        .await
        .unwrap();

        let first = session.create_money_stream().await;
        let second = session.create_money_stream().await;
        assert_eq!((first.id(), second.id()), (1, 3));

        session.end().await.unwrap();
        assert!(session.is_closed());
        assert!(receiver.connection_closed().await);
        assert_eq!(receiver.closed_streams().await, vec![1, 3]);

        // Ending twice is a no-op.
        session.end().await.unwrap();
    }

    #[tokio::test]
    async fn test_end_closes_local_streams() {
        let receiver = connected(ReceiverBehavior::default()).await;
        let mut session = StreamSession::open(
            receiver.clone(),
            &credentials(),
            &PaymentConfig::default(),
        )
        .await
        .unwrap();
        let stream = session.create_money_stream().await;

        session.end().await.unwrap();
        assert_eq!(stream.snapshot().state, StreamState::Closed);
        let seen = receiver.packets_seen().await;

        let result = stream.set_send_max(100).await;
        assert!(matches!(result, Err(PayError::InvalidTarget(_))));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(receiver.packets_seen().await, seen);
        assert_eq!(receiver.total_received().await, 0);
    }

    #[tokio::test]
    async fn test_end_times_out_when_close_is_never_answered() {
        let receiver = connected(ReceiverBehavior {
            stall_close: true,
            ..Default::default()
        })
        .await;
        let config = PaymentConfig {
            close_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let mut session = StreamSession::open(receiver, &credentials(), &config)
            .await
            .unwrap();

        let result = session.end().await;
        assert!(matches!(result, Err(PayError::Close(_))));
        assert!(session.is_closed());
    }
}
