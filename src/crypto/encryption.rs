use crate::crypto::{PublicKey, SecretKey};
use chacha20poly1305::aead::{Aead, NewAead};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::Rng;
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

const EPHEMERAL_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),
}

/// 为接收者加密数据（匿名封装）
///
/// 每次加密生成一个临时 X25519 密钥，与接收者的加密公钥协商共享密钥。
/// 输出格式: `临时公钥(32) || IV(12) || 密文+认证标签`
pub(crate) fn seal(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let mut ephemeral_bytes = [0u8; EPHEMERAL_KEY_LEN];
    rand::thread_rng().fill(&mut ephemeral_bytes);
    let ephemeral_secret = StaticSecret::from(ephemeral_bytes);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

    let mut iv = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut iv);

    let shared_secret = ephemeral_secret.diffie_hellman(recipient.encryption_key());
    let encryption_key = derive_encryption_key(
        shared_secret.as_bytes(),
        ephemeral_public.as_bytes(),
        recipient.encryption_key().as_bytes(),
    )?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&encryption_key));
    let ciphertext = cipher.encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(EPHEMERAL_KEY_LEN + NONCE_LEN + ciphertext.len());
    result.extend_from_slice(ephemeral_public.as_bytes());
    result.extend_from_slice(&iv);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// 解密封装数据
pub(crate) fn open_sealed(recipient: &SecretKey, sealed: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    if sealed.len() < EPHEMERAL_KEY_LEN + NONCE_LEN + TAG_LEN {
        return Err(EncryptionError::DecryptionFailed("Ciphertext too short".to_string()));
    }

    let mut ephemeral_bytes = [0u8; EPHEMERAL_KEY_LEN];
    ephemeral_bytes.copy_from_slice(&sealed[..EPHEMERAL_KEY_LEN]);
    let ephemeral_public = X25519PublicKey::from(ephemeral_bytes);
    let iv = &sealed[EPHEMERAL_KEY_LEN..EPHEMERAL_KEY_LEN + NONCE_LEN];
    let encrypted = &sealed[EPHEMERAL_KEY_LEN + NONCE_LEN..];

    let local_public = X25519PublicKey::from(recipient.encryption_key());
    let shared_secret = recipient.encryption_key().diffie_hellman(&ephemeral_public);
    let encryption_key = derive_encryption_key(
        shared_secret.as_bytes(),
        ephemeral_public.as_bytes(),
        local_public.as_bytes(),
    )?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&encryption_key));
    cipher.decrypt(Nonce::from_slice(iv), encrypted)
        .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))
}

/// 从ECDH共享密钥派生加密密钥（HKDF-SHA256）
///
/// 两端的公钥都参与派生，绑定本次会话。
fn derive_encryption_key(
    shared_secret: &[u8],
    ephemeral_public: &[u8],
    recipient_public: &[u8],
) -> Result<[u8; 32], EncryptionError> {
    if shared_secret.len() < 32 {
        return Err(EncryptionError::KeyDerivationFailed("Shared secret too short".to_string()));
    }

    let salt = b"SecureDhtSealedValue";

    let extract_key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, salt);
    let mut ctx = ring::hmac::Context::with_key(&extract_key);
    ctx.update(shared_secret);
    let prk = ctx.sign();

    let mut ctx = ring::hmac::Context::with_key(&ring::hmac::Key::new(ring::hmac::HMAC_SHA256, prk.as_ref()));
    ctx.update(b"SecureDht-v1");
    ctx.update(ephemeral_public);
    ctx.update(recipient_public);
    ctx.update(&[1]);
    let okm = ctx.sign();

    let mut key = [0u8; 32];
    key.copy_from_slice(&okm.as_ref()[0..32]);

    Ok(key)
}
