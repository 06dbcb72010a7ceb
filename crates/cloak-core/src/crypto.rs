//! AES-256-GCM seal/open with a 16-byte random IV and detached 16-byte tag.
//!
//! The stored corpus was written with 16-byte IVs, so the cipher is
//! instantiated with that nonce size rather than the 12-byte default.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{consts::U16, Aead, KeyInit, OsRng};
use aes_gcm::{aes::Aes256, AesGcm};
use rand::RngCore;

use crate::error::{CloakError, Result};

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

type Cipher = AesGcm<Aes256, U16>;

/// Output of one seal call. Ciphertext and tag are carried separately
/// because the envelope format stores them as distinct fields.
pub struct Sealed {
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

/// Encrypt `plaintext` under a 256-bit key with a fresh random IV.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Sealed> {
    let cipher = Cipher::new(GenericArray::from_slice(key));
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut sealed = cipher
        .encrypt(GenericArray::from_slice(&iv), plaintext)
        .map_err(|_| CloakError::Integrity("AEAD seal failed".into()))?;

    // The aead API appends the tag to the ciphertext; split it back off.
    let boundary = sealed.len() - TAG_LEN;
    let tag_bytes = sealed.split_off(boundary);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&tag_bytes);

    Ok(Sealed {
        iv,
        tag,
        ciphertext: sealed,
    })
}

/// Decrypt and verify. Tag mismatch is `Authentication`, never partial
/// plaintext.
pub fn open(key: &[u8; KEY_LEN], iv: &[u8], tag: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if iv.len() != IV_LEN {
        return Err(CloakError::Integrity(format!(
            "IV must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    if tag.len() != TAG_LEN {
        return Err(CloakError::Integrity(format!(
            "auth tag must be {TAG_LEN} bytes, got {}",
            tag.len()
        )));
    }

    let cipher = Cipher::new(GenericArray::from_slice(key));
    let mut buf = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    buf.extend_from_slice(ciphertext);
    buf.extend_from_slice(tag);

    cipher
        .decrypt(GenericArray::from_slice(iv), buf.as_slice())
        .map_err(|_| CloakError::Authentication)
}
