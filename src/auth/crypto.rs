// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Hashing and signature verification primitives used by the authentication module.

use super::{AuthError, rsa};
use sha2::{Digest, Sha256};

/// A SHA-256 digest.
pub type Sha256Digest = [u8; 32];

/// The cryptographic operations needed to authenticate an image.
///
/// Platforms with a hash or public key accelerator can provide their own implementation.
pub trait CryptoBackend {
    /// Returns the SHA-256 digest of the concatenation of `parts`.
    fn sha256(&self, parts: &[&[u8]]) -> Sha256Digest;

    /// Verifies an RSASSA-PKCS1-v1_5 signature over a SHA-256 digest with the given public key.
    fn verify_rsa_pkcs1_sha256(
        &self,
        digest: &Sha256Digest,
        signature: &[u8],
        modulus: &[u8],
        exponent: &[u8],
    ) -> Result<(), AuthError>;
}

/// Software implementation of [`CryptoBackend`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftwareCrypto;

impl CryptoBackend for SoftwareCrypto {
    fn sha256(&self, parts: &[&[u8]]) -> Sha256Digest {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().into()
    }

    fn verify_rsa_pkcs1_sha256(
        &self,
        digest: &Sha256Digest,
        signature: &[u8],
        modulus: &[u8],
        exponent: &[u8],
    ) -> Result<(), AuthError> {
        rsa::verify_pkcs1_sha256(digest, signature, modulus, exponent)
    }
}
