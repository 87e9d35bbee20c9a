//! Adapters behind the domain ports.

pub mod ilp_over_http;
pub mod in_memory;
pub mod spsp;
