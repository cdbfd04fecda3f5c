//! Session payload encryption.
//!
//! The key exchange itself happens elsewhere; by the time a client is
//! constructed it holds an established session key. This module only
//! defines the encrypt/decrypt seam the channel uses and the AES-CBC
//! implementation of it.

use aes::Aes128;
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::Rng;

use crate::error::ClientError;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const KEY_LEN: usize = 16;
const IV_LEN: usize = 16;

/// Symmetric encryption of encoded wire payloads.
pub trait Crypticle: Send + Sync {
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, ClientError>;
    fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, ClientError>;
}

/// AES-128-CBC with PKCS#7 padding. A fresh random IV is generated per
/// message and prepended to the ciphertext.
pub struct AesCrypticle {
    key: [u8; KEY_LEN],
}

impl AesCrypticle {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    pub fn from_hex(key_hex: &str) -> Result<Self, ClientError> {
        let mut key = [0u8; KEY_LEN];
        hex::decode_to_slice(key_hex, &mut key)
            .map_err(|e| ClientError::Crypto(format!("invalid session key: {e}")))?;
        Ok(Self::new(key))
    }
}

impl Crypticle for AesCrypticle {
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, ClientError> {
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);

        let cipher = Aes128CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|e| ClientError::Crypto(format!("failed to initialize encryptor: {e}")))?;
        let ct = cipher.encrypt_padded_vec_mut::<Pkcs7>(plain);

        let mut out = Vec::with_capacity(IV_LEN + ct.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, ClientError> {
        if data.len() < IV_LEN {
            return Err(ClientError::Crypto(
                "ciphertext shorter than the IV".into(),
            ));
        }
        let (iv, ct) = data.split_at(IV_LEN);
        let cipher = Aes128CbcDec::new_from_slices(&self.key, iv)
            .map_err(|e| ClientError::Crypto(format!("failed to initialize decryptor: {e}")))?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ct)
            .map_err(|e| ClientError::Crypto(format!("decryption failed: {e}")))
    }
}

/// Pass-through crypticle for tests and loopback deployments.
pub struct PlaintextCrypticle;

impl Crypticle for PlaintextCrypticle {
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, ClientError> {
        Ok(plain.to_vec())
    }

    fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>, ClientError> {
        Ok(cipher.to_vec())
    }
}
