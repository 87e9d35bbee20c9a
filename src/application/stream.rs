use super::session::SessionShared;
use crate::config::PaymentConfig;
use crate::domain::congestion::CongestionController;
use crate::domain::crypto::hash_fulfillment;
use crate::domain::frame::{CloseCode, Frame, IlpPacketType, StreamPacket};
use crate::domain::money::{MoneyStreamState, StreamSnapshot, StreamState};
use crate::domain::packet::{ErrorClass, ErrorCode, Reply};
use crate::error::{PayError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 1024;

/// Notifications published by a money stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A packet was handed to the transport. Not yet delivered.
    OutgoingMoney { sequence: u64, amount: u64 },
    /// The send max was reached and the stream closed cleanly.
    End,
    /// The stream failed and closed.
    Error(String),
}

enum Command {
    SetSendMax {
        amount: u64,
        reply: oneshot::Sender<Result<()>>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
}

/// Reply for one packet, matched back to it by sequence number.
struct Ack {
    sequence: u64,
    result: Result<Reply>,
}

struct InFlight {
    amount: u64,
    condition: [u8; 32],
}

/// Handle to a money stream whose engine runs in its own task.
#[derive(Clone)]
pub struct MoneyStream {
    id: u64,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<StreamSnapshot>,
    events: broadcast::Sender<StreamEvent>,
    shared: Arc<SessionShared>,
}

impl MoneyStream {
    pub(crate) fn spawn(id: u64, shared: Arc<SessionShared>, config: &PaymentConfig) -> Self {
        let state = MoneyStreamState::new(id);
        let (commands, command_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshots) = watch::channel(state.snapshot(None));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let engine = StreamEngine {
            state,
            shared: shared.clone(),
            congestion: CongestionController::new(
                config.initial_max_in_flight,
                config.max_packet_amount,
            ),
            pending: HashMap::new(),
            failure: None,
            consecutive_temporary: 0,
            max_temporary_failures: config.max_temporary_failures,
            max_packets_in_flight: config.max_packets_in_flight.max(1),
            close_timeout: config.close_timeout,
            snapshots: snapshot_tx,
            events: events.clone(),
        };
        tokio::spawn(engine.run(command_rx));

        Self {
            id,
            commands,
            snapshots,
            events,
            shared,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Moves the stream's target and lets the engine start sending toward it.
    pub async fn set_send_max(&self, amount: u64) -> Result<()> {
        let closed = || PayError::InvalidTarget(format!("stream {} is closed", self.id));
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::SetSendMax { amount, reply })
            .await
            .map_err(|_| closed())?;
        response.await.unwrap_or_else(|_| Err(closed()))
    }

    /// Waits until the stream is closed. Fails if it closed because of an
    /// error rather than by reaching its send max.
    pub async fn closed(&self) -> Result<()> {
        let mut snapshots = self.snapshots.clone();
        let failure = match snapshots.wait_for(|s| s.state == StreamState::Closed).await {
            Ok(snapshot) => snapshot.failure.clone(),
            Err(_) => Some("stream engine stopped unexpectedly".to_string()),
        };
        match failure {
            Some(message) => Err(PayError::stream(message, self.shared.total_delivered())),
            None => Ok(()),
        }
    }

    /// Forces the stream closed. Safe to call any number of times, including
    /// after it already ended.
    pub async fn destroy(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Destroy { reply }).await.is_ok() {
            let _ = done.await;
        }
    }
}

struct StreamEngine {
    state: MoneyStreamState,
    shared: Arc<SessionShared>,
    congestion: CongestionController,
    pending: HashMap<u64, InFlight>,
    failure: Option<String>,
    consecutive_temporary: u32,
    max_temporary_failures: u32,
    max_packets_in_flight: usize,
    close_timeout: Duration,
    snapshots: watch::Sender<StreamSnapshot>,
    events: broadcast::Sender<StreamEvent>,
}

impl StreamEngine {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let (ack_tx, mut acks) = mpsc::unbounded_channel();
        loop {
            if let Err(e) = self.fill_window(&ack_tx) {
                self.fail(e.to_string());
                break;
            }
            if self.state.is_complete() {
                self.finish().await;
                break;
            }
            if self.pending.is_empty()
                && self.state.remaining() > 0
                && self.congestion.max_amount(0) == 0
            {
                self.fail("path cannot carry any amount".to_string());
                break;
            }

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::SetSendMax { amount, reply }) => {
                        let result = self.state.set_send_max(amount);
                        if result.is_ok() {
                            debug!(stream_id = self.state.id(), send_max = amount, "send max updated");
                            self.publish();
                        }
                        let _ = reply.send(result);
                    }
                    Some(Command::Destroy { reply }) => {
                        self.destroy();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.destroy();
                        break;
                    }
                },
                Some(ack) = acks.recv(), if !self.pending.is_empty() => {
                    if let Err(message) = self.handle_ack(ack) {
                        self.fail(message);
                        break;
                    }
                }
            }
        }
    }

    fn publish(&self) {
        self.snapshots
            .send_replace(self.state.snapshot(self.failure.clone()));
    }

    /// Puts as many packets on the wire as the target, the congestion window
    /// and the in-flight cap allow.
    fn fill_window(&mut self, acks: &mpsc::UnboundedSender<Ack>) -> Result<()> {
        while self.pending.len() < self.max_packets_in_flight {
            let limit = self.congestion.max_amount(self.state.in_flight());
            let Some(amount) = self.state.next_amount(limit) else {
                break;
            };

            let sequence = self.shared.next_sequence();
            let packet = StreamPacket::new(sequence, IlpPacketType::Prepare, 0).with_frames([
                Frame::StreamMoney {
                    stream_id: self.state.id(),
                    shares: 1,
                },
            ]);
            let prepare = self.shared.prepare(&packet, amount, true)?;
            self.pending.insert(
                sequence,
                InFlight {
                    amount,
                    condition: prepare.execution_condition,
                },
            );
            self.state.on_sent(amount);

            let transport = self.shared.transport.clone();
            let acks = acks.clone();
            tokio::spawn(async move {
                let result = transport.send_data(prepare).await;
                let _ = acks.send(Ack { sequence, result });
            });

            debug!(stream_id = self.state.id(), sequence, amount, "sending money packet");
            let _ = self
                .events
                .send(StreamEvent::OutgoingMoney { sequence, amount });
            self.publish();
        }
        Ok(())
    }

    fn handle_ack(&mut self, ack: Ack) -> std::result::Result<(), String> {
        let Some(in_flight) = self.pending.remove(&ack.sequence) else {
            warn!(sequence = ack.sequence, "reply for unknown packet");
            return Ok(());
        };
        let sequence = ack.sequence;
        let amount = in_flight.amount;

        let reply = match ack.result {
            Ok(reply) => reply,
            Err(e) => {
                self.state.on_rejected(amount);
                self.publish();
                return Err(format!("transport failed to send packet {sequence}: {e}"));
            }
        };

        match reply {
            Reply::Fulfill(fulfill) => {
                if hash_fulfillment(&fulfill.fulfillment) != in_flight.condition {
                    self.state.on_rejected(amount);
                    self.publish();
                    return Err(format!("packet {sequence} was fulfilled with an invalid fulfillment"));
                }
                // Trust the receiver's own count when it tells us.
                let delivered = self
                    .shared
                    .read_reply(&fulfill.data, sequence)
                    .map(|reply| reply.prepare_amount)
                    .unwrap_or(amount);
                self.state.on_fulfilled(amount);
                self.congestion.on_fulfill(amount);
                self.consecutive_temporary = 0;
                self.shared.add_delivered(delivered);
                debug!(sequence, amount, delivered, "packet fulfilled");
                self.publish();
                Ok(())
            }
            Reply::Reject(reject) => {
                self.state.on_rejected(amount);
                self.congestion.on_reject(amount, reject.code, &reject.data);
                self.publish();
                debug!(sequence, amount, code = %reject.code, "packet rejected");

                let stream_reply = self.shared.read_reply(&reject.data, sequence);
                if stream_reply.is_some_and(|reply| reply.closes_stream(self.state.id())) {
                    return Err(format!(
                        "receiver closed the stream ({}: {})",
                        reject.code, reject.message
                    ));
                }
                match reject.code.class() {
                    ErrorClass::Final if reject.code == ErrorCode::F08_AMOUNT_TOO_LARGE => Ok(()),
                    ErrorClass::Final => Err(format!(
                        "packet rejected by {}: {} {}",
                        reject.triggered_by, reject.code, reject.message
                    )),
                    ErrorClass::Temporary | ErrorClass::Relative => {
                        self.consecutive_temporary += 1;
                        if self.consecutive_temporary > self.max_temporary_failures {
                            return Err(format!(
                                "gave up after {} temporary rejects, last {} {}",
                                self.consecutive_temporary, reject.code, reject.message
                            ));
                        }
                        Ok(())
                    }
                }
            }
        }
    }

    async fn finish(&mut self) {
        let stream_id = self.state.id();
        self.state.begin_ending();
        self.publish();
        info!(stream_id, sent = self.state.sent_so_far(), "send max reached, closing stream");

        let close = self.shared.send_control(vec![Frame::StreamClose {
            stream_id,
            code: CloseCode::NoError,
            message: String::new(),
        }]);
        match tokio::time::timeout(self.close_timeout, close).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(stream_id, error = %e, "stream close was not acknowledged"),
            Err(_) => warn!(stream_id, "stream close timed out"),
        }
        self.shared.open_streams.lock().await.remove(&stream_id);

        self.state.close();
        let _ = self.events.send(StreamEvent::End);
        self.publish();
    }

    fn fail(&mut self, message: String) {
        warn!(stream_id = self.state.id(), error = %message, "stream failed");
        self.state.close();
        self.failure = Some(message.clone());
        let _ = self.events.send(StreamEvent::Error(message));
        self.publish();
    }

    fn destroy(&mut self) {
        if self.state.state() != StreamState::Closed {
            debug!(stream_id = self.state.id(), "stream destroyed");
            self.state.close();
            self.publish();
        }
    }
}
