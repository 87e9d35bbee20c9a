use super::crypto::SHARED_SECRET_LENGTH;
use serde_json::Value;
use std::fmt;

/// Media type a receiver advertises when it speaks STREAM.
pub const STREAM_CONTENT_TYPE: &str = "application/spsp4+json";

/// Everything discovery tells us about a receiver.
#[derive(Clone)]
pub struct Credentials {
    pub destination_account: String,
    pub shared_secret: [u8; SHARED_SECRET_LENGTH],
    pub content_type: String,
    pub balance: Option<Value>,
    pub ledger_info: Option<Value>,
    pub receiver_info: Option<Value>,
}

impl Credentials {
    pub fn new(
        destination_account: impl Into<String>,
        shared_secret: [u8; SHARED_SECRET_LENGTH],
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            destination_account: destination_account.into(),
            shared_secret,
            content_type: content_type.into(),
            balance: None,
            ledger_info: None,
            receiver_info: None,
        }
    }

    pub fn supports_stream(&self) -> bool {
        self.content_type.contains(STREAM_CONTENT_TYPE)
    }
}

// Keep the secret out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("destination_account", &self.destination_account)
            .field("shared_secret", &"<redacted>")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_stream_with_charset() {
        let creds = Credentials::new("g.alice", [0u8; 32], "application/spsp4+json; charset=utf-8");
        assert!(creds.supports_stream());

        let legacy = Credentials::new("g.alice", [0u8; 32], "application/spsp+json");
        assert!(!legacy.supports_stream());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("g.alice", [42u8; 32], STREAM_CONTENT_TYPE);
        let printed = format!("{creds:?}");
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("42"));
    }
}
