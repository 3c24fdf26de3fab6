//! SecureDht: signed and encrypted value exchange on top of a DHT.
//!
//! Values fetched through [`secure::SecureDht::get`] are delivered only after their
//! signatures have been checked against the signer's certificate, which is resolved
//! from the DHT and cached. Encrypted values addressed to the local node are
//! decrypted first.

pub mod crypto;
pub mod dht;
pub mod identity;
pub mod secure;
pub mod storage;
pub mod utils;

pub use secure::{LifecycleState, SecureDht, SecureDhtConfig, SecureDhtError};
