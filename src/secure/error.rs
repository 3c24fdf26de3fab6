use crate::crypto::{CryptoError, SignatureError};
use crate::dht::{NodeId, ValueError};
use crate::secure::LifecycleState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecureDhtError {
    #[error("Crypto backend unavailable: {0}")]
    CryptoInit(#[from] CryptoError),

    #[error("Value is already encrypted")]
    AlreadyEncrypted,

    #[error("Value is not encrypted")]
    NotEncrypted,

    #[error("Value is not signed")]
    NotSigned,

    #[error("Signing failed: {0}")]
    Signing(#[from] SignatureError),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Value serialization failed: {0}")]
    Serialization(#[from] ValueError),

    #[error("SecureDht is not active (state: {0:?})")]
    NotActive(LifecycleState),

    #[error("Lookup of {0} failed")]
    LookupFailed(NodeId),

    #[error("Put under {0} failed")]
    PutFailed(NodeId),

    #[error("Certificate for {0} not found")]
    CertificateNotFound(NodeId),
}
