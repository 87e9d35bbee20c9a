use crate::error::{PayError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Ending,
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamState::Open => "open",
            StreamState::Ending => "ending",
            StreamState::Closed => "closed",
        })
    }
}

/// Accounting for one money stream.
///
/// `sent_so_far + in_flight <= send_max` holds after every operation; the
/// engine only ever asks for amounts through [`MoneyStreamState::next_amount`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoneyStreamState {
    id: u64,
    send_max: u64,
    sent_so_far: u64,
    in_flight: u64,
    packets_sent: u64,
    state: StreamState,
}

/// Read-only view published to stream observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSnapshot {
    pub id: u64,
    pub state: StreamState,
    pub send_max: u64,
    pub sent_so_far: u64,
    pub in_flight: u64,
    pub packets_sent: u64,
    /// Set when the stream closed because of a failure.
    pub failure: Option<String>,
}

impl MoneyStreamState {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            send_max: 0,
            sent_so_far: 0,
            in_flight: 0,
            packets_sent: 0,
            state: StreamState::Open,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn send_max(&self) -> u64 {
        self.send_max
    }

    pub fn sent_so_far(&self) -> u64 {
        self.sent_so_far
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Moves the target. Money already fulfilled or on the wire cannot be
    /// taken back, so the target may not drop below it.
    pub fn set_send_max(&mut self, amount: u64) -> Result<()> {
        if self.state != StreamState::Open {
            return Err(PayError::InvalidTarget(format!(
                "stream {} is {}",
                self.id, self.state
            )));
        }
        let committed = self.sent_so_far + self.in_flight;
        if amount < committed {
            return Err(PayError::InvalidTarget(format!(
                "send max {amount} is below the {committed} already sent on stream {}",
                self.id
            )));
        }
        self.send_max = amount;
        Ok(())
    }

    pub fn remaining(&self) -> u64 {
        self.send_max - self.sent_so_far - self.in_flight
    }

    /// Amount for the next packet, capped by `limit`, or `None` when nothing
    /// may be sent right now.
    pub fn next_amount(&self, limit: u64) -> Option<u64> {
        if self.state != StreamState::Open {
            return None;
        }
        let amount = self.remaining().min(limit);
        (amount > 0).then_some(amount)
    }

    pub fn on_sent(&mut self, amount: u64) {
        debug_assert!(amount <= self.remaining());
        self.in_flight += amount;
        self.packets_sent += 1;
    }

    pub fn on_fulfilled(&mut self, amount: u64) {
        self.in_flight -= amount;
        self.sent_so_far += amount;
    }

    /// A rejected packet's amount goes back to the unsent pool.
    pub fn on_rejected(&mut self, amount: u64) {
        self.in_flight -= amount;
    }

    pub fn is_complete(&self) -> bool {
        self.state == StreamState::Open
            && self.send_max > 0
            && self.sent_so_far == self.send_max
            && self.in_flight == 0
    }

    pub fn begin_ending(&mut self) {
        if self.state == StreamState::Open {
            self.state = StreamState::Ending;
        }
    }

    pub fn close(&mut self) {
        self.state = StreamState::Closed;
    }

    pub fn snapshot(&self, failure: Option<String>) -> StreamSnapshot {
        StreamSnapshot {
            id: self.id,
            state: self.state,
            send_max: self.send_max,
            sent_so_far: self.sent_so_far,
            in_flight: self.in_flight,
            packets_sent: self.packets_sent,
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowering_below_sent_fails_without_mutation() {
        let mut stream = MoneyStreamState::new(1);
        stream.set_send_max(1000).unwrap();
        stream.on_sent(600);
        stream.on_fulfilled(600);

        let before = stream.clone();
        let result = stream.set_send_max(599);
        assert!(matches!(result, Err(PayError::InvalidTarget(_))));
        assert_eq!(stream, before);

        // Dropping to exactly what was sent is allowed.
        stream.set_send_max(600).unwrap();
        assert!(stream.is_complete());
    }

    #[test]
    fn test_in_flight_counts_as_committed() {
        let mut stream = MoneyStreamState::new(1);
        stream.set_send_max(100).unwrap();
        stream.on_sent(80);
        assert!(stream.set_send_max(79).is_err());
        assert_eq!(stream.next_amount(u64::MAX), Some(20));
    }

    #[test]
    fn test_next_amount_never_exceeds_target() {
        let mut stream = MoneyStreamState::new(1);
        stream.set_send_max(250).unwrap();
        let mut packets = 0;
        while let Some(amount) = stream.next_amount(100) {
            stream.on_sent(amount);
            packets += 1;
            assert!(stream.sent_so_far() + stream.in_flight() <= stream.send_max());
        }
        assert_eq!(packets, 3);
        assert_eq!(stream.in_flight(), 250);
    }

    #[test]
    fn test_out_of_order_acknowledgments_complete() {
        let mut stream = MoneyStreamState::new(1);
        stream.set_send_max(300).unwrap();
        for _ in 0..3 {
            stream.on_sent(100);
        }
        stream.on_fulfilled(100);
        stream.on_rejected(100);
        assert!(!stream.is_complete());
        assert_eq!(stream.next_amount(u64::MAX), Some(100));
        stream.on_sent(100);
        stream.on_fulfilled(100);
        stream.on_fulfilled(100);
        assert!(stream.is_complete());
        assert_eq!(stream.packets_sent(), 4);
    }

    #[test]
    fn test_not_open_rejects_changes() {
        let mut stream = MoneyStreamState::new(3);
        assert!(!stream.is_complete());
        stream.begin_ending();
        assert!(stream.set_send_max(10).is_err());
        assert_eq!(stream.next_amount(10), None);
        stream.close();
        stream.begin_ending();
        assert_eq!(stream.state(), StreamState::Closed);
    }
}
