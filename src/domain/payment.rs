use serde::Serialize;

/// Result of one completed payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub amount_delivered: u64,
    pub destination: String,
    pub packet_count: u64,
}

/// Progress notifications emitted while a payment runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    Resolving { receiver: String, amount: u64 },
    Resolved { destination_account: String },
    Connecting,
    Sending { amount: u64 },
    Delivered { total: u64 },
}
