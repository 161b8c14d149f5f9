//! Transaction signatures: ECDSA over P-256 with a SHA-256 digest, raw
//! `r || s` signatures and SPKI-encoded public keys.

use crate::error::Result;
use crate::utils::{
    ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, public_key_from_spki,
};
use log::debug;

/// Check `signature` over `payload` against an SPKI public key.
/// Malformed keys or signatures verify as `false`.
pub fn verify(payload: &[u8], signature: &[u8], spki_public_key: &[u8]) -> bool {
    let point = match public_key_from_spki(spki_public_key) {
        Some(point) => point,
        None => {
            debug!(
                "Rejecting signature: {} byte public key is not a P-256 SPKI",
                spki_public_key.len()
            );
            return false;
        }
    };
    ecdsa_p256_sha256_sign_verify(point, signature, payload)
}

/// Sign `payload` with a PKCS#8 P-256 private key
pub fn sign(pkcs8: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    ecdsa_p256_sha256_sign_digest(pkcs8, payload)
}
