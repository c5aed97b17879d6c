//! Safe fault transport across trust boundaries.
//!
//! A [`Fault`] is the serializable form of an error at the point it crosses
//! a process boundary: class, module, message, and a captured backtrace. On
//! the receiving side a [`FaultRegistry`] maps (module, class) back to a
//! constructor for the locally known error type; unknown kinds fall back to
//! [`RemoteFault`] instead of failing, so a malformed or unrecognized fault
//! payload can never crash the unpacking path.

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::error::Error as StdError;

use thiserror::Error;
use tracing::debug;

use crate::error::EnvelopeError;
use crate::wire::WireFault;
use trustplane_crypto::CryptoError;

/// Module namespace for envelope-level fault classes.
pub const FAULT_MODULE_ENVELOPE: &str = "trustplane.envelope";

/// Module namespace for crypto-level fault classes.
pub const FAULT_MODULE_CRYPTO: &str = "trustplane.crypto";

const GENERIC_MODULE: &str = "trustplane.fault";
const GENERIC_CLASS: &str = "GenericFault";

/// A fault captured at a trust boundary, still usable as a local error.
#[derive(Debug, Clone, Error)]
#[error("{module}.{class}: {message}")]
pub struct Fault {
    pub module: String,
    pub class: String,
    pub message: String,
    pub traceback: Option<String>,
}

impl Fault {
    /// Capture a fault with an explicit class, recording the current call
    /// stack as the transportable traceback.
    pub fn new(
        module: impl Into<String>,
        class: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            class: class.into(),
            message: message.into(),
            traceback: Some(Backtrace::force_capture().to_string()),
        }
    }

    /// Wrap something that is not a structured error (free-form text, a
    /// panic payload) as a generic fault.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::new(GENERIC_MODULE, GENERIC_CLASS, message)
    }

    /// Capture an arbitrary error as a generic fault. Errors with a known
    /// class should go through their typed `From<&E>` conversions instead.
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        Self::from_message(err.to_string())
    }

    pub fn to_wire(&self) -> WireFault {
        WireFault {
            class: self.class.clone(),
            module: self.module.clone(),
            error: self.message.clone(),
            traceback: self.traceback.clone(),
        }
    }
}

impl From<&EnvelopeError> for Fault {
    fn from(err: &EnvelopeError) -> Self {
        let class = match err {
            EnvelopeError::Packing(_) => "PackingError",
            EnvelopeError::Unpacking(_) => "UnpackingError",
            EnvelopeError::RemoteCall { .. } | EnvelopeError::Network { .. } => {
                "RemoteFunctionCallError"
            }
        };
        Fault::new(FAULT_MODULE_ENVELOPE, class, err.to_string())
    }
}

impl From<&CryptoError> for Fault {
    fn from(err: &CryptoError) -> Self {
        let class = match err {
            CryptoError::SignatureVerification(_) => "SignatureVerificationError",
            CryptoError::MalformedKey(_) => "MalformedKeyError",
            CryptoError::Encryption(_) => "EncryptionError",
            CryptoError::Decryption(_) => "DecryptionError",
        };
        Fault::new(FAULT_MODULE_CRYPTO, class, err.to_string())
    }
}

/// Fallback for fault kinds with no registered local constructor.
#[derive(Debug, Error)]
#[error("remote fault {module}.{class}: {message}")]
pub struct RemoteFault {
    pub module: String,
    pub class: String,
    pub message: String,
}

/// Stand-in for remote I/O errors. `std::io::Error` wants an `ErrorKind`
/// at construction, which the wire record does not carry.
#[derive(Debug, Error)]
#[error("remote I/O error: {0}")]
pub struct RemoteIoFault(pub String);

/// A fault rebuilt on the receiving side, annotated with where it came from.
#[derive(Debug)]
pub struct ReconstructedFault {
    pub module: String,
    pub class: String,
    pub traceback: Option<String>,
    pub remote_function: Option<String>,
    pub remote_service: Option<String>,
    cause: Box<dyn StdError + Send + Sync>,
}

impl ReconstructedFault {
    /// The reconstructed local error (typed when the kind was registered).
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.cause.as_ref()
    }
}

impl std::fmt::Display for ReconstructedFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cause)?;
        match (&self.remote_function, &self.remote_service) {
            (Some(func), Some(svc)) => write!(f, " (raised by '{func}' on '{svc}')"),
            (Some(func), None) => write!(f, " (raised by '{func}')"),
            (None, Some(svc)) => write!(f, " (raised on '{svc}')"),
            (None, None) => Ok(()),
        }
    }
}

impl StdError for ReconstructedFault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.cause.as_ref())
    }
}

type FaultCtor = fn(String) -> Box<dyn StdError + Send + Sync>;

/// Registry mapping (module, class) to local error constructors.
///
/// Populated at startup for every locally known fault kind; crates layered
/// above the envelope (identity, bootstrap) register their own classes.
pub struct FaultRegistry {
    ctors: HashMap<(String, String), FaultCtor>,
}

impl FaultRegistry {
    pub fn new() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the envelope and crypto fault classes, plus
    /// the legacy I/O special case.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(FAULT_MODULE_ENVELOPE, "PackingError", |m| {
            Box::new(EnvelopeError::Packing(m))
        });
        registry.register(FAULT_MODULE_ENVELOPE, "UnpackingError", |m| {
            Box::new(EnvelopeError::Unpacking(m))
        });
        registry.register(FAULT_MODULE_ENVELOPE, "RemoteFunctionCallError", |m| {
            Box::new(EnvelopeError::RemoteCall {
                status: -1,
                detail: m,
                cause: None,
            })
        });
        registry.register(FAULT_MODULE_CRYPTO, "SignatureVerificationError", |m| {
            Box::new(CryptoError::SignatureVerification(m))
        });
        registry.register(FAULT_MODULE_CRYPTO, "MalformedKeyError", |m| {
            Box::new(CryptoError::MalformedKey(m))
        });
        registry.register(FAULT_MODULE_CRYPTO, "EncryptionError", |m| {
            Box::new(CryptoError::Encryption(m))
        });
        registry.register(FAULT_MODULE_CRYPTO, "DecryptionError", |m| {
            Box::new(CryptoError::Decryption(m))
        });
        // Nonstandard constructor: stand-in instead of std::io::Error.
        registry.register("std.io", "IoError", |m| Box::new(RemoteIoFault(m)));
        registry
    }

    pub fn register(&mut self, module: impl Into<String>, class: impl Into<String>, ctor: FaultCtor) {
        self.ctors.insert((module.into(), class.into()), ctor);
    }

    /// Rebuild a wire fault into a live error.
    ///
    /// Unknown kinds fall back to [`RemoteFault`] annotated with the remote
    /// function and service; this path never fails.
    pub fn reconstruct(
        &self,
        wire: &WireFault,
        function: Option<&str>,
        service: Option<&str>,
    ) -> ReconstructedFault {
        let key = (wire.module.clone(), wire.class.clone());
        let cause: Box<dyn StdError + Send + Sync> = match self.ctors.get(&key) {
            Some(ctor) => ctor(wire.error.clone()),
            None => {
                debug!(
                    module = %wire.module,
                    class = %wire.class,
                    "no local constructor for remote fault, using fallback"
                );
                Box::new(RemoteFault {
                    module: wire.module.clone(),
                    class: wire.class.clone(),
                    message: wire.error.clone(),
                })
            }
        };
        ReconstructedFault {
            module: wire.module.clone(),
            class: wire.class.clone(),
            traceback: wire.traceback.clone(),
            remote_function: function.map(str::to_string),
            remote_service: service.map(str::to_string),
            cause,
        }
    }
}

impl Default for FaultRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
