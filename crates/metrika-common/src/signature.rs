use crate::error::SignatureError;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use sha2::{Digest, Sha256};

/// Header carrying the hex-encoded sealed body on requests and responses.
pub const HASH_HEADER: &str = "HashSHA256";

/// Deterministic keyed integrity tag over a message body.
///
/// The AES-256-GCM key is SHA-256 of the shared secret and the nonce is the
/// last 12 bytes of that derived key, so every message under one secret is
/// sealed with the same nonce. The construction gives no confidentiality and
/// must only be used as a tag: both peers rely on "same key and same bytes
/// give the same tag".
///
/// The header value is the whole sealed output, ciphertext followed by the
/// 16-byte GCM tag, so its hex length is `2 * (body.len() + 16)`.
///
/// # Examples
///
/// ```
/// use metrika_common::signature::Signer;
///
/// let signer = Signer::new("secret").unwrap();
/// let tag = signer.sign(b"payload").unwrap();
/// assert_eq!(tag.len(), 2 * (b"payload".len() + 16));
/// assert!(signer.verify(b"payload", &tag));
/// assert!(!signer.verify(b"tampered", &tag));
/// ```
pub struct Signer {
    key: LessSafeKey,
    nonce: [u8; NONCE_LEN],
}

impl Signer {
    pub fn new(secret: &str) -> Result<Self, SignatureError> {
        let derived: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        let unbound =
            UnboundKey::new(&AES_256_GCM, &derived).map_err(|_| SignatureError::InvalidKey)?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&derived[derived.len() - NONCE_LEN..]);
        Ok(Self {
            key: LessSafeKey::new(unbound),
            nonce,
        })
    }

    /// Hex-encoded `ciphertext || tag` of `body`.
    pub fn sign(&self, body: &[u8]) -> Result<String, SignatureError> {
        let mut in_out = Vec::with_capacity(body.len() + AES_256_GCM.tag_len());
        in_out.extend_from_slice(body);
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(self.nonce),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| SignatureError::Seal)?;
        Ok(hex::encode(in_out))
    }

    /// Reseals `body` and compares it with `tag_hex` in
    /// constant time. Hex case is ignored.
    pub fn verify(&self, body: &[u8], tag_hex: &str) -> bool {
        match self.sign(body) {
            Ok(expected) => constant_time_eq(&expected, &tag_hex.to_ascii_lowercase()),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

/// Compares all bytes regardless of where the first mismatch is.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
