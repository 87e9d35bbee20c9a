use crate::domain::crypto::{StreamKeys, hash_fulfillment, SHARED_SECRET_LENGTH};
use crate::domain::frame::{CloseCode, Frame, IlpPacketType, StreamPacket};
use crate::domain::packet::{AmountTooLarge, ErrorCode, Fulfill, Prepare, Reject, Reply};
use crate::domain::ports::Transport;
use crate::error::{PayError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::Mutex;

/// Knobs for shaping how an [`InMemoryReceiver`] answers.
#[derive(Debug, Clone, Default)]
pub struct ReceiverBehavior {
    /// Packets above this amount are rejected with `F08`.
    pub max_packet_amount: Option<u64>,
    /// Once accepting another packet would exceed this total, the receiver
    /// closes the stream instead.
    pub close_after: Option<u64>,
    /// Number of money packets answered with `T04` before any is accepted.
    pub temporary_failures: u32,
    /// After this many fulfilled money packets, further money packets fail
    /// in the transport itself.
    pub fail_after: Option<u64>,
    /// After this many fulfilled money packets, further money packets are
    /// rejected with `F02` and no STREAM data.
    pub unreachable_after: Option<u64>,
    /// Reply delays, cycled per packet, to make replies overtake each other.
    pub reply_delays: Vec<Duration>,
    pub refuse_connect: bool,
    pub refuse_handshake: bool,
    /// Never answer the packet that closes the connection.
    pub stall_close: bool,
    /// Asset code and scale to advertise during the handshake.
    pub asset: Option<(String, u8)>,
}

#[derive(Debug, Default)]
struct ReceiverState {
    connected: bool,
    connect_calls: u32,
    disconnect_calls: u32,
    packets_seen: usize,
    money_packets: u64,
    total_received: u64,
    temporary_sent: u32,
    closed_streams: BTreeSet<u64>,
    connection_closed: bool,
}

/// A STREAM receiver living behind the [`Transport`] port.
///
/// It decrypts every packet with the shared secret, fulfills money packets
/// and answers frame-only packets with authenticated rejects, the same way a
/// real receiver on the far side of a connector would.
pub struct InMemoryReceiver {
    address: String,
    keys: StreamKeys,
    behavior: ReceiverBehavior,
    state: Mutex<ReceiverState>,
}

impl InMemoryReceiver {
    pub fn new(address: impl Into<String>, shared_secret: [u8; SHARED_SECRET_LENGTH]) -> Self {
        Self::with_behavior(address, shared_secret, ReceiverBehavior::default())
    }

    pub fn with_behavior(
        address: impl Into<String>,
        shared_secret: [u8; SHARED_SECRET_LENGTH],
        behavior: ReceiverBehavior,
    ) -> Self {
        Self {
            address: address.into(),
            keys: StreamKeys::derive(&shared_secret),
            behavior,
            state: Mutex::new(ReceiverState::default()),
        }
    }

    pub async fn total_received(&self) -> u64 {
        self.state.lock().await.total_received
    }

    /// Money packets that were fulfilled.
    pub async fn money_packets(&self) -> u64 {
        self.state.lock().await.money_packets
    }

    /// Every packet that reached the receiver, including control packets.
    pub async fn packets_seen(&self) -> usize {
        self.state.lock().await.packets_seen
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    pub async fn connect_calls(&self) -> u32 {
        self.state.lock().await.connect_calls
    }

    pub async fn disconnect_calls(&self) -> u32 {
        self.state.lock().await.disconnect_calls
    }

    pub async fn connection_closed(&self) -> bool {
        self.state.lock().await.connection_closed
    }

    pub async fn closed_streams(&self) -> Vec<u64> {
        self.state.lock().await.closed_streams.iter().copied().collect()
    }

    fn reject(&self, code: ErrorCode, message: &str, data: Bytes) -> Reply {
        Reply::Reject(Reject {
            code,
            triggered_by: self.address.clone(),
            message: message.to_string(),
            data,
        })
    }

    fn seal(&self, packet: &StreamPacket) -> Bytes {
        self.keys
            .encrypt(&packet.encode())
            .map(Bytes::from)
            .unwrap_or_default()
    }

    fn stream_reject(&self, sequence: u64, received: u64, frames: Vec<Frame>) -> Reply {
        let reply = StreamPacket::new(sequence, IlpPacketType::Reject, received).with_frames(frames);
        self.reject(ErrorCode::F99_APPLICATION_ERROR, "", self.seal(&reply))
    }

    async fn answer(&self, prepare: Prepare) -> Reply {
        let fulfilled = self.state.lock().await.money_packets;
        let unreachable = prepare.amount > 0
            && self
                .behavior
                .unreachable_after
                .is_some_and(|limit| fulfilled >= limit);
        if prepare.destination != self.address || unreachable {
            return self.reject(ErrorCode::F02_UNREACHABLE, "no such account", Bytes::new());
        }
        if let Some(max) = self.behavior.max_packet_amount
            && prepare.amount > max
        {
            let data = AmountTooLarge {
                received_amount: prepare.amount,
                maximum_amount: max,
            }
            .encode();
            return self.reject(ErrorCode::F08_AMOUNT_TOO_LARGE, "amount too large", data);
        }
        let Some(packet) = self
            .keys
            .decrypt(&prepare.data)
            .ok()
            .and_then(|plaintext| StreamPacket::decode(&plaintext).ok())
        else {
            return self.reject(
                ErrorCode::F06_UNEXPECTED_PAYMENT,
                "cannot decrypt STREAM packet",
                Bytes::new(),
            );
        };
        let sequence = packet.sequence;

        let mut state = self.state.lock().await;
        for frame in &packet.frames {
            if let Frame::StreamClose { stream_id, .. } = frame {
                state.closed_streams.insert(*stream_id);
            }
        }
        if packet
            .frames
            .iter()
            .any(|frame| matches!(frame, Frame::ConnectionClose { .. }))
        {
            state.connection_closed = true;
            if self.behavior.stall_close {
                drop(state);
                std::future::pending::<()>().await;
            }
            return self.stream_reject(sequence, 0, Vec::new());
        }

        let is_handshake = packet
            .frames
            .iter()
            .any(|frame| matches!(frame, Frame::ConnectionMaxStreamId { .. }));
        if is_handshake && self.behavior.refuse_handshake {
            return self.reject(ErrorCode::F02_UNREACHABLE, "not accepting connections", Bytes::new());
        }

        let fulfillment = self.keys.fulfillment(&prepare.data);
        if prepare.amount == 0 || hash_fulfillment(&fulfillment) != prepare.execution_condition {
            let mut frames = Vec::new();
            if is_handshake && let Some((code, scale)) = &self.behavior.asset {
                frames.push(Frame::ConnectionAssetDetails {
                    asset_code: code.clone(),
                    asset_scale: *scale,
                });
            }
            return self.stream_reject(sequence, prepare.amount, frames);
        }

        if state.temporary_sent < self.behavior.temporary_failures {
            state.temporary_sent += 1;
            return self.reject(
                ErrorCode::T04_INSUFFICIENT_LIQUIDITY,
                "insufficient liquidity",
                Bytes::new(),
            );
        }

        let stream_ids: Vec<u64> = packet
            .frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::StreamMoney { stream_id, .. } => Some(*stream_id),
                _ => None,
            })
            .collect();
        let over_limit = self
            .behavior
            .close_after
            .is_some_and(|limit| state.total_received + prepare.amount > limit);
        if over_limit || stream_ids.iter().any(|id| state.closed_streams.contains(id)) {
            let frames = stream_ids
                .iter()
                .map(|&stream_id| Frame::StreamClose {
                    stream_id,
                    code: CloseCode::ApplicationError,
                    message: "receive limit reached".to_string(),
                })
                .collect();
            state.closed_streams.extend(stream_ids.iter().copied());
            return self.stream_reject(sequence, prepare.amount, frames);
        }

        state.total_received += prepare.amount;
        state.money_packets += 1;
        let frames = stream_ids.iter().map(|&stream_id| Frame::StreamMaxMoney {
            stream_id,
            receive_max: self.behavior.close_after.unwrap_or(u64::MAX),
            total_received: state.total_received,
        });
        let reply = StreamPacket::new(sequence, IlpPacketType::Fulfill, prepare.amount)
            .with_frames(frames.collect::<Vec<_>>());
        Reply::Fulfill(Fulfill {
            fulfillment,
            data: self.seal(&reply),
        })
    }
}

#[async_trait]
impl Transport for InMemoryReceiver {
    async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.connect_calls += 1;
        if self.behavior.refuse_connect {
            return Err(PayError::Connection("connection refused".to_string()));
        }
        // A new connection starts without any closed streams.
        state.connected = true;
        state.connection_closed = false;
        state.closed_streams.clear();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.disconnect_calls += 1;
        state.connected = false;
        Ok(())
    }

    async fn send_data(&self, prepare: Prepare) -> Result<Reply> {
        let delay = {
            let mut state = self.state.lock().await;
            if !state.connected {
                return Err(PayError::Connection("transport is not connected".to_string()));
            }
            let index = state.packets_seen;
            state.packets_seen += 1;
            if prepare.amount > 0
                && self
                    .behavior
                    .fail_after
                    .is_some_and(|limit| state.money_packets >= limit)
            {
                return Err(PayError::Connection("connector went away".to_string()));
            }
            match self.behavior.reply_delays.len() {
                0 => None,
                n => Some(self.behavior.reply_delays[index % n]),
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.answer(prepare).await)
    }
}
