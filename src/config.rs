use std::time::Duration;

/// Tunables for one payment run.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// How often delivered-amount progress is checked.
    pub poll_interval: Duration,
    /// Upper bound on waiting for the receiver to acknowledge a close.
    pub close_timeout: Duration,
    /// Lifetime of each ILP Prepare.
    pub packet_expiry: Duration,
    /// Known maximum packet amount for the path, if any. Otherwise it is
    /// learned from `F08` rejects.
    pub max_packet_amount: Option<u64>,
    pub initial_max_in_flight: u64,
    pub max_packets_in_flight: usize,
    /// Consecutive temporary rejects tolerated before the stream fails.
    pub max_temporary_failures: u32,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            close_timeout: Duration::from_secs(5),
            packet_expiry: Duration::from_secs(30),
            max_packet_amount: None,
            initial_max_in_flight: u64::MAX,
            max_packets_in_flight: 20,
            max_temporary_failures: 20,
        }
    }
}
