//! Protocol types and the ports the payment flow talks through.
//!
//! Nothing in here performs I/O; adapters live in `infrastructure`.

pub mod congestion;
pub mod credentials;
pub mod crypto;
pub mod frame;
pub mod money;
pub(crate) mod oer;
pub mod packet;
pub mod payment;
pub mod ports;
