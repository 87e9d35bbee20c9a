use super::packet::{AmountTooLarge, ErrorClass, ErrorCode};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SlowStart,
    AvoidCongestion,
}

/// Decides how much money may be put on the wire next.
///
/// The window grows by the fulfilled amount during slow start and by a fixed
/// step afterwards; any temporary reject halves it. `F08` rejects lower the
/// path's maximum packet amount.
#[derive(Debug, Clone)]
pub struct CongestionController {
    phase: Phase,
    max_in_flight: u64,
    max_packet_amount: Option<u64>,
    increase_amount: u64,
}

impl CongestionController {
    pub fn new(initial_max_in_flight: u64, max_packet_amount: Option<u64>) -> Self {
        Self {
            phase: Phase::SlowStart,
            max_in_flight: initial_max_in_flight.max(1),
            max_packet_amount,
            increase_amount: 1000,
        }
    }

    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight
    }

    pub fn max_packet_amount(&self) -> Option<u64> {
        self.max_packet_amount
    }

    /// Largest amount the next packet may carry given what is already in flight.
    pub fn max_amount(&self, amount_in_flight: u64) -> u64 {
        let window = self.max_in_flight.saturating_sub(amount_in_flight);
        match self.max_packet_amount {
            Some(max_packet) => window.min(max_packet),
            None => window,
        }
    }

    pub fn on_fulfill(&mut self, amount: u64) {
        self.max_in_flight = match self.phase {
            Phase::SlowStart => self.max_in_flight.saturating_add(amount),
            Phase::AvoidCongestion => self.max_in_flight.saturating_add(self.increase_amount),
        };
    }

    pub fn on_reject(&mut self, amount: u64, code: ErrorCode, data: &[u8]) {
        if code == ErrorCode::F08_AMOUNT_TOO_LARGE {
            self.shrink_max_packet(amount, data);
            return;
        }
        if matches!(code.class(), ErrorClass::Temporary | ErrorClass::Relative) {
            self.phase = Phase::AvoidCongestion;
            self.max_in_flight = (self.max_in_flight / 2).max(1);
            debug!(code = %code, max_in_flight = self.max_in_flight, "backing off");
        }
    }

    fn shrink_max_packet(&mut self, amount: u64, data: &[u8]) {
        let new_max = match AmountTooLarge::decode(data) {
            // The reported amounts may be in the next hop's units, so scale
            // the maximum back into ours.
            Ok(info) if info.received_amount > 0 => {
                ((amount as u128 * info.maximum_amount as u128) / info.received_amount as u128)
                    as u64
            }
            _ => amount.saturating_sub(1),
        };
        // The limit must shrink, or the same packet is retried forever.
        let new_max = new_max.min(amount.saturating_sub(1));
        let new_max = match self.max_packet_amount {
            Some(current) => current.min(new_max),
            None => new_max,
        };
        debug!(max_packet_amount = new_max, "lowering max packet amount");
        self.max_packet_amount = Some(new_max);
    }
}
