//! Application layer driving a payment over STREAM.
//!
//! `PaymentOrchestrator` is the entry point. Each money stream runs as an
//! actor: a `tokio` task owns the stream state and talks to its handle and to
//! in-flight packet sends through channels.

pub mod payment;
pub mod session;
pub mod stream;
