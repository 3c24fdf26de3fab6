mod keys;
mod encryption;
mod signing;
mod certificate;
mod context;

pub use keys::{KeyPair, PublicKey, SecretKey, KeyError, PUBLIC_KEY_LEN};
pub use encryption::EncryptionError;
pub use signing::{sign, verify, SignatureError, SIGNATURE_LEN};
pub use certificate::{Certificate, CertificateError, DEFAULT_CERTIFICATE_VALIDITY};
pub use context::{CryptoContext, CryptoError};

/*
 * Cryptography module for SecureDht
 *
 * - Ed25519 signing keys and X25519 sealed encryption
 * - Self-signed peer certificates
 * - Process-wide crypto backend acquisition
 */
