use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum PayError {
    #[error(
        "got error response from SPSP receiver. endpoint=\"{endpoint}\" status={status} message=\"{body}\""
    )]
    #[diagnostic(code(spsp::discovery))]
    Discovery {
        status: u16,
        endpoint: String,
        body: String,
    },

    #[error("invalid SPSP response from {endpoint}: {reason}")]
    #[diagnostic(code(spsp::invalid_response))]
    InvalidDiscoveryResponse { endpoint: String, reason: String },

    #[error("no application/spsp4+json content-type received from payment pointer {receiver} (got \"{content_type}\")")]
    #[diagnostic(
        code(spsp::unsupported_protocol),
        help("the receiver must support the STREAM protocol")
    )]
    UnsupportedProtocol {
        receiver: String,
        content_type: String,
    },

    #[error("connection error: {0}")]
    #[diagnostic(code(stream::connection))]
    Connection(String),

    #[error("invalid send target: {0}")]
    #[diagnostic(code(stream::invalid_target))]
    InvalidTarget(String),

    #[error("stream error: {message} (delivered {delivered} before failing)")]
    #[diagnostic(code(stream::failed))]
    Stream { message: String, delivered: u64 },

    #[error("close error: {0}")]
    #[diagnostic(code(stream::close))]
    Close(String),

    #[error("codec error: {0}")]
    #[diagnostic(code(packet::codec))]
    Codec(String),

    #[error("crypto error: {0}")]
    #[diagnostic(code(stream::crypto))]
    Crypto(String),

    #[error("HTTP error: {0}")]
    #[diagnostic(code(http))]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PayError>;

impl PayError {
    pub(crate) fn stream(message: impl Into<String>, delivered: u64) -> Self {
        Self::Stream {
            message: message.into(),
            delivered,
        }
    }
}
