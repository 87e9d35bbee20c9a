use super::session::StreamSession;
use super::stream::StreamEvent;
use crate::config::PaymentConfig;
use crate::domain::credentials::Credentials;
use crate::domain::payment::{PaymentEvent, Receipt};
use crate::domain::ports::{DiscoveryBox, ObserverBox, TransportBox};
use crate::error::{PayError, Result};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Drives a single payment from payment pointer to receipt.
///
/// The orchestrator owns its transport; `pay` takes `&mut self` so two
/// payments can never share a connection.
pub struct PaymentOrchestrator {
    discovery: DiscoveryBox,
    transport: TransportBox,
    observer: ObserverBox,
    config: PaymentConfig,
}

impl PaymentOrchestrator {
    /// Creates a new `PaymentOrchestrator`.
    ///
    /// # Arguments
    ///
    /// * `discovery` - Resolves payment pointers to credentials.
    /// * `transport` - Packet link used for the STREAM connection.
    /// * `observer` - Receives progress events.
    /// * `config` - Timing and congestion tunables.
    pub fn new(
        discovery: DiscoveryBox,
        transport: TransportBox,
        observer: ObserverBox,
        config: PaymentConfig,
    ) -> Self {
        Self {
            discovery,
            transport,
            observer,
            config,
        }
    }

    /// Pays `amount` to `receiver` and returns what was delivered.
    ///
    /// Discovery happens before the transport is connected, so a receiver
    /// that cannot be resolved never causes a connection attempt.
    pub async fn pay(&mut self, receiver: &str, amount: u64) -> Result<Receipt> {
        if amount == 0 {
            return Err(PayError::InvalidTarget(
                "amount must be greater than zero".to_string(),
            ));
        }

        self.observer.on_event(&PaymentEvent::Resolving {
            receiver: receiver.to_string(),
            amount,
        });
        let credentials = self.discovery.query(receiver).await?;
        self.observer.on_event(&PaymentEvent::Resolved {
            destination_account: credentials.destination_account.clone(),
        });

        if !credentials.supports_stream() {
            return Err(PayError::UnsupportedProtocol {
                receiver: receiver.to_string(),
                content_type: credentials.content_type.clone(),
            });
        }

        self.observer.on_event(&PaymentEvent::Connecting);
        self.transport.connect().await.map_err(|e| match e {
            PayError::Connection(_) => e,
            other => PayError::Connection(other.to_string()),
        })?;

        let result = self.stream_payment(&credentials, amount).await;

        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "failed to disconnect transport");
        }
        result
    }

    async fn stream_payment(&self, credentials: &Credentials, amount: u64) -> Result<Receipt> {
        let mut session =
            StreamSession::open(self.transport.clone(), credentials, &self.config).await?;
        let stream = session.create_money_stream().await;

        let (stop, stopped) = oneshot::channel();
        let progress = tokio::spawn(report_progress(
            stream.subscribe(),
            session.delivered_updates(),
            self.observer.clone(),
            self.config.poll_interval,
            stopped,
        ));

        info!(amount, destination = %credentials.destination_account, "sending payment");
        let outcome = match stream.set_send_max(amount).await {
            Ok(()) => stream.closed().await,
            Err(e) => Err(e),
        };

        // The reporter must be gone before the session is torn down.
        let _ = stop.send(());
        if let Err(e) = progress.await {
            warn!(error = %e, "progress reporter panicked");
        }

        stream.destroy().await;
        if let Err(e) = session.end().await {
            warn!(error = %e, "session did not close cleanly");
        }

        let delivered = session.total_delivered();
        match outcome {
            Ok(()) => Ok(Receipt {
                amount_delivered: delivered,
                destination: credentials.destination_account.clone(),
                packet_count: stream.snapshot().packets_sent,
            }),
            Err(PayError::Stream { message, .. }) => Err(PayError::Stream { message, delivered }),
            Err(e) => Err(e),
        }
    }
}

fn report_delivered(delivered: &watch::Receiver<u64>, last: &mut u64, observer: &ObserverBox) {
    let total = *delivered.borrow();
    if total > *last {
        *last = total;
        observer.on_event(&PaymentEvent::Delivered { total });
    }
}

/// Forwards outgoing packets as they happen and polls the delivered total on
/// a timer until told to stop. Reports one last time on the way out.
async fn report_progress(
    mut events: broadcast::Receiver<StreamEvent>,
    delivered: watch::Receiver<u64>,
    observer: ObserverBox,
    poll_interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = 0;
    let mut events_open = true;

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => report_delivered(&delivered, &mut last, &observer),
            event = events.recv(), if events_open => match event {
                Ok(StreamEvent::OutgoingMoney { amount, .. }) => {
                    observer.on_event(&PaymentEvent::Sending { amount });
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "progress reporter fell behind"),
                Err(RecvError::Closed) => events_open = false,
            },
        }
    }
    report_delivered(&delivered, &mut last, &observer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credentials::STREAM_CONTENT_TYPE;
    use crate::domain::ports::{Discovery, PaymentObserver};
    use crate::infrastructure::in_memory::InMemoryReceiver;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct FixedDiscovery(Credentials);

    #[async_trait]
    impl Discovery for FixedDiscovery {
        async fn query(&self, _receiver: &str) -> Result<Credentials> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<PaymentEvent>>);

    impl PaymentObserver for Recorder {
        fn on_event(&self, event: &PaymentEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_total() {
        let secret = [1u8; 32];
        let receiver = Arc::new(InMemoryReceiver::new("g.test.carol", secret));
        let recorder = Arc::new(Recorder::default());
        let mut orchestrator = PaymentOrchestrator::new(
            Box::new(FixedDiscovery(Credentials::new(
                "g.test.carol",
                secret,
                STREAM_CONTENT_TYPE,
            ))),
            receiver,
            recorder.clone(),
            PaymentConfig {
                poll_interval: Duration::from_millis(5),
                max_packet_amount: Some(10),
                ..Default::default()
            },
        );

        let receipt = orchestrator.pay("$carol.example", 100).await.unwrap();
        assert_eq!(receipt.amount_delivered, 100);
        assert_eq!(receipt.packet_count, 10);

        let events = recorder.0.lock().unwrap();
        let totals: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                PaymentEvent::Delivered { total } => Some(*total),
                _ => None,
            })
            .collect();
        assert!(totals.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(totals.last(), Some(&100));
        assert_eq!(events[0], PaymentEvent::Resolving {
            receiver: "$carol.example".to_string(),
            amount: 100
        });
    }

    #[tokio::test]
    async fn test_zero_amount_is_rejected_before_discovery() {
        let receiver = Arc::new(InMemoryReceiver::new("g.test.carol", [1u8; 32]));
        let recorder = Arc::new(Recorder::default());
        let mut orchestrator = PaymentOrchestrator::new(
            Box::new(FixedDiscovery(Credentials::new(
                "g.test.carol",
                [1u8; 32],
                STREAM_CONTENT_TYPE,
            ))),
            receiver.clone(),
            recorder.clone(),
            PaymentConfig::default(),
        );

        let result = orchestrator.pay("$carol.example", 0).await;
        assert!(matches!(result, Err(PayError::InvalidTarget(_))));
        assert!(recorder.0.lock().unwrap().is_empty());
        assert_eq!(receiver.connect_calls().await, 0);
    }
}
