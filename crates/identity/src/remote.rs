//! Remote calls between services, and the serving side.
//!
//! A caller generates an ephemeral response key per call, so replies are
//! never readable by anyone but the caller, and can request that the far end
//! sign its reply with a specific service key. The serving side honors the
//! embedded response key and signing fingerprint, and never lets a failure
//! escape as anything but a fault envelope.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use trustplane_core::context::ProcessContext;
use trustplane_crypto::{EncryptionKeyPair, EncryptionPublicKey, Fingerprint};
use trustplane_envelope::{
    pack, pack_return, unpack_call, unpack_return, EnvelopeError, Fault, FaultRegistry,
    PackRequest, PeerTransport, ReturnOutcome, UnpackConfig,
};

use crate::error::{IdentityError, Result, FAULT_MODULE_IDENTITY};
use crate::service::{KeyMatch, Service, ServiceKeys};

/// Well-known function serving a service's locked identity record.
pub const FN_GET_SERVICE: &str = "get_service";

/// Per-call options.
#[derive(Default)]
pub struct CallOptions<'a> {
    /// Encrypt the request to the peer's current key. Calling an identity
    /// with no known encryption key is a permission error.
    pub encrypt: bool,

    /// Request a reply signed with the peer's current service key and
    /// verify it. Requires a known signing certificate for the peer.
    pub sign_response: bool,

    /// Fault constructors for reconstructing remote failures. `None` uses
    /// the default registry.
    pub registry: Option<&'a FaultRegistry>,
}

type LocalHandler = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Client for calls to peer services over a transport.
pub struct ServiceClient {
    transport: Arc<dyn PeerTransport>,
    timeout: Duration,
    local: Option<(String, LocalHandler)>,
}

impl ServiceClient {
    pub fn new(transport: Arc<dyn PeerTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            local: None,
        }
    }

    /// Serve envelopes addressed to `url` in-process. A call targeting this
    /// node's own canonical URL must not take a network round trip.
    pub fn with_local(
        mut self,
        url: impl Into<String>,
        handler: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        self.local = Some((url.into(), Box::new(handler)));
        self
    }

    fn dispatch(&self, url: &str, bytes: &[u8]) -> std::result::Result<Vec<u8>, EnvelopeError> {
        if let Some((own_url, handler)) = &self.local {
            if own_url == url {
                debug!(url, "call targets own canonical url, serving in-process");
                return Ok(handler(bytes));
            }
        }
        self.transport.post(url, bytes, self.timeout)
    }

    /// Call `function` on `peer` and return the unpacked result.
    ///
    /// A fresh response key pair is generated per call; its public half
    /// rides in the envelope so the peer can seal its reply to us.
    pub fn call(
        &self,
        peer: &Service,
        function: &str,
        payload: Value,
        opts: &CallOptions<'_>,
    ) -> Result<Value> {
        let response_pair = EncryptionKeyPair::generate();

        let encrypt_to = if opts.encrypt {
            Some(peer.encryption_public_key().ok_or_else(|| {
                IdentityError::Permission(format!(
                    "cannot encrypt to '{}': no encryption key is held for it",
                    peer.canonical_url()
                ))
            })?)
        } else {
            None
        };
        let response_sign_cert = if opts.sign_response {
            Some(peer.signing_certificate().ok_or_else(|| {
                IdentityError::Permission(format!(
                    "cannot request a signed reply from '{}': no signing certificate is held",
                    peer.canonical_url()
                ))
            })?)
        } else {
            None
        };

        let bytes = pack(PackRequest {
            function: Some(function),
            payload: Some(payload),
            encrypt_to,
            response_key: Some(response_pair.public()),
            response_sign_cert,
            ..PackRequest::default()
        })?;

        debug!(
            url = peer.canonical_url(),
            function,
            encrypted = encrypt_to.is_some(),
            "calling peer service"
        );
        let reply = self.dispatch(peer.canonical_url(), &bytes)?;

        let mut cfg = UnpackConfig::new(&response_pair);
        cfg.verify_with = response_sign_cert;
        cfg.registry = opts.registry;
        cfg.function = Some(function);
        cfg.service = Some(peer.service_type().as_str());
        Ok(unpack_return(&reply, &cfg)?)
    }

    /// Fetch the peer's current identity record and adopt it into `peer`.
    ///
    /// When a signing certificate for the peer is already held, the reply
    /// must be signed with it, which pins key updates to the previously
    /// trusted identity. The very first fetch has nothing to verify against
    /// and is trust-on-first-use.
    pub fn refresh_from_peer(&self, ctx: &ProcessContext, peer: &mut Service) -> Result<()> {
        let known_cert = peer.signing_certificate().cloned();
        if known_cert.is_none() {
            warn!(
                url = peer.canonical_url(),
                "first fetch of peer record cannot be verified against a known certificate"
            );
        }

        let response_pair = EncryptionKeyPair::generate();
        let bytes = pack(PackRequest {
            function: Some(FN_GET_SERVICE),
            payload: Some(json!({})),
            encrypt_to: peer.encryption_public_key(),
            response_key: Some(response_pair.public()),
            response_sign_cert: known_cert.as_ref(),
            ..PackRequest::default()
        })?;

        let reply = self.dispatch(peer.canonical_url(), &bytes)?;

        let mut cfg = UnpackConfig::new(&response_pair);
        cfg.verify_with = known_cert.as_ref();
        cfg.function = Some(FN_GET_SERVICE);
        cfg.service = Some(peer.service_type().as_str());
        let value = unpack_return(&reply, &cfg)?;

        let record: Service = serde_json::from_value(value.clone())?;
        peer.apply_public_record(&record)?;
        ctx.put_trusted_service(peer.canonical_url(), value);
        debug!(url = peer.canonical_url(), uid = ?peer.uid(), "adopted peer record");
        Ok(())
    }
}

/// Handler invoked with `(function, payload)` for each inbound call.
pub type CallHandler<'a> =
    dyn Fn(Option<&str>, Value) -> std::result::Result<Option<Value>, Fault> + 'a;

/// Serve one inbound envelope. Never fails: every error path degrades to a
/// fault envelope, sealed to the caller's response key when one was given.
pub fn serve_call(
    service: &Service,
    ctx: &ProcessContext,
    bytes: &[u8],
    handler: &CallHandler<'_>,
) -> Vec<u8> {
    let resolver = ServiceKeys { service, ctx };
    let cfg = UnpackConfig::new(&resolver);
    let unpacked = match unpack_call(bytes, &cfg) {
        Ok(unpacked) => unpacked,
        Err(e) => {
            warn!(error = %e, "failed to unpack inbound call");
            return pack_return(None, ReturnOutcome::Fault(Fault::from(&e)), None, None);
        }
    };
    let function = unpacked.function.as_deref();

    let response_key = match unpacked
        .meta
        .get("encryption_public_key")
        .and_then(Value::as_str)
        .map(EncryptionPublicKey::from_hex)
    {
        None => None,
        Some(Ok(key)) => Some(key),
        Some(Err(e)) => {
            return pack_return(function, ReturnOutcome::Fault(Fault::from(&e)), None, None);
        }
    };

    // The caller names the signing key by fingerprint; the pair must be
    // resolved from our own current, last, or archived material.
    let sign_pair = match unpacked
        .meta
        .get("sign_with_service_key")
        .and_then(Value::as_str)
        .map(Fingerprint::from)
    {
        None => None,
        Some(fp) => match service.get_key(ctx, &fp, true) {
            Ok(KeyMatch::Signing(pair)) => Some(pair),
            Ok(_) => {
                let fault = Fault::new(
                    FAULT_MODULE_IDENTITY,
                    "KeyManipulationError",
                    format!("fingerprint {fp} does not name a signing key"),
                );
                return pack_return(
                    function,
                    ReturnOutcome::Fault(fault),
                    response_key.as_ref(),
                    None,
                );
            }
            Err(e) => {
                return pack_return(
                    function,
                    ReturnOutcome::Fault(Fault::from(&e)),
                    response_key.as_ref(),
                    None,
                );
            }
        },
    };

    let outcome = match handler(function, unpacked.payload) {
        Ok(value) => ReturnOutcome::Success(value),
        Err(fault) => ReturnOutcome::Fault(fault),
    };
    pack_return(function, outcome, response_key.as_ref(), sign_pair.as_ref())
}
