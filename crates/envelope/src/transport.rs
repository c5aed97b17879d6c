//! Peer transport seam.
//!
//! Envelopes travel as an HTTP POST of the envelope bytes to a service's
//! canonical URL. Transport faults (unreachable peer, non-200 status,
//! non-UTF8 body, timeout) are network-class errors: the caller cannot know
//! whether the far end observed the request.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{EnvelopeError, Result};

/// Delivers envelope bytes to a peer and returns the response bytes.
pub trait PeerTransport: Send + Sync {
    fn post(&self, url: &str, body: &[u8], timeout: Duration) -> Result<Vec<u8>>;
}

type Handler = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// In-process transport routing URLs to registered handlers. Used by tests
/// and by single-process federations.
#[derive(Default)]
pub struct InMemoryTransport {
    handlers: Mutex<HashMap<String, Handler>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `url` to `handler`. The handler receives the posted envelope
    /// bytes and returns the response envelope bytes.
    pub fn route(&self, url: impl Into<String>, handler: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static) {
        self.handlers
            .lock()
            .expect("transport routes poisoned")
            .insert(url.into(), Box::new(handler));
    }
}

impl PeerTransport for InMemoryTransport {
    fn post(&self, url: &str, body: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        let handlers = self.handlers.lock().expect("transport routes poisoned");
        match handlers.get(url) {
            Some(handler) => Ok(handler(body)),
            None => Err(EnvelopeError::Network {
                url: url.to_string(),
                reason: "no route to peer".to_string(),
            }),
        }
    }
}

/// HTTP transport over a blocking reqwest client.
#[cfg(feature = "http")]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| EnvelopeError::Network {
                url: String::new(),
                reason: format!("client construction failed: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[cfg(feature = "http")]
impl PeerTransport for HttpTransport {
    fn post(&self, url: &str, body: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .body(body.to_vec())
            .send()
            .map_err(|e| EnvelopeError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnvelopeError::Network {
                url: url.to_string(),
                reason: format!("HTTP status {status}"),
            });
        }

        let bytes = response.bytes().map_err(|e| EnvelopeError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        // Envelopes are JSON; a non-UTF8 body cannot be one.
        std::str::from_utf8(&bytes).map_err(|_| EnvelopeError::Network {
            url: url.to_string(),
            reason: "response body is not UTF-8".to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}
