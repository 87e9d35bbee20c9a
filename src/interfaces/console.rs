use crate::domain::payment::{PaymentEvent, Receipt};
use crate::domain::ports::PaymentObserver;
use std::io::{self, Stdout, Write};
use std::sync::Mutex;
use tracing::warn;

/// Prints payment progress as human readable lines.
///
/// Wraps any `Write` sink so tests can capture the output in a `Vec<u8>`.
pub struct ConsoleReporter<W: Write + Send> {
    out: Mutex<W>,
}

impl ConsoleReporter<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Writes the closing summary line.
    pub fn write_receipt(&self, receipt: &Receipt) -> io::Result<()> {
        let mut out = self.lock();
        writeln!(
            out,
            "\n:D Sent {} to {} in {} packets",
            receipt.amount_delivered, receipt.destination, receipt.packet_count
        )?;
        out.flush()
    }

    /// Writes the receipt as a single JSON object.
    pub fn write_receipt_json(&self, receipt: &Receipt) -> io::Result<()> {
        let mut out = self.lock();
        serde_json::to_writer(&mut *out, receipt)?;
        writeln!(out)?;
        out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, W> {
        self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn render(event: &PaymentEvent) -> String {
    match event {
        PaymentEvent::Resolving { receiver, amount } => {
            format!("Sending payment. Paying {amount} to \"{receiver}\"\n")
        }
        PaymentEvent::Resolved {
            destination_account,
        } => format!("  - Fetching ILP payment pointer details\n    -> ILP address {destination_account}"),
        PaymentEvent::Connecting => "  - Connecting transport".to_string(),
        PaymentEvent::Sending { amount } => format!("  > $ Sending {amount}..."),
        PaymentEvent::Delivered { total } => format!("  < $ Delivered {total}"),
    }
}

impl<W: Write + Send> PaymentObserver for ConsoleReporter<W> {
    fn on_event(&self, event: &PaymentEvent) {
        let mut out = self.lock();
        if let Err(e) = writeln!(out, "{}", render(event)).and_then(|_| out.flush()) {
            warn!(error = %e, "failed to write progress");
        }
    }
}
