//! Request signing.
//!
//! Every request carries a `timestamp` header and a `signature` header
//! holding `md5(path + secret + timestamp)` as lowercase hex. The endpoint
//! recomputes the digest to authenticate the caller.

use chrono::Utc;

/// Compute the request signature.
pub fn sign(path: &str, secret: &str, timestamp: &str) -> String {
    let mut input = String::with_capacity(path.len() + secret.len() + timestamp.len());
    input.push_str(path);
    input.push_str(secret);
    input.push_str(timestamp);

    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Timestamp/signature pair sent with one attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestAuth {
    pub timestamp: String,
    pub signature: String,
}

impl std::fmt::Debug for RequestAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestAuth")
            .field("timestamp", &self.timestamp)
            .field("signature", &"<redacted>")
            .finish()
    }
}

/// Signs requests for one endpoint path with one shared secret.
#[derive(Clone)]
pub struct Signer {
    path: String,
    secret: String,
}

impl Signer {
    pub fn new(path: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            secret: secret.into(),
        }
    }

    /// Sign with an explicit timestamp.
    pub fn sign_at(&self, timestamp: &str) -> RequestAuth {
        RequestAuth {
            timestamp: timestamp.to_string(),
            signature: sign(&self.path, &self.secret, timestamp),
        }
    }

    /// Sign with the current time in epoch milliseconds.
    ///
    /// Called once per attempt; signatures are never reused across retries.
    pub fn sign_now(&self) -> RequestAuth {
        self.sign_at(&Utc::now().timestamp_millis().to_string())
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("path", &self.path)
            .field("secret", &"<redacted>")
            .finish()
    }
}
