//! Utility functions and helpers
//!
//! Cryptographic primitives (SHA-256, ECDSA P-256, SPKI handling) and the
//! bincode storage encoding used by the ledger.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    current_timestamp, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    new_key_pair, public_key_from_pkcs8, public_key_from_spki, sha256_digest,
    spki_from_public_key,
};

pub use serialization::{deserialize, serialize};
