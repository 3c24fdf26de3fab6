use crate::crypto::{PublicKey, SecretKey};
use ed25519_dalek::Verifier;
use std::convert::TryFrom;
use thiserror::Error;

/// Ed25519 签名长度
pub const SIGNATURE_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),
}

/// 使用私钥签名数据
pub fn sign(secret_key: &SecretKey, message: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let signing_key = secret_key.signing_key();

    let expanded_key = ed25519_dalek::ExpandedSecretKey::from(signing_key);
    let public_key = ed25519_dalek::PublicKey::from(signing_key);

    let signature = expanded_key.sign(message, &public_key).to_bytes().to_vec();

    Ok(signature)
}

/// 使用公钥验证签名
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(SignatureError::VerificationFailed("Invalid signature length".to_string()));
    }

    let sig = ed25519_dalek::Signature::try_from(signature)
        .map_err(|e| SignatureError::VerificationFailed(e.to_string()))?;

    public_key.signing_key().verify(message, &sig)
        .map_err(|e| SignatureError::VerificationFailed(format!("Verification failed: {}", e)))
}
