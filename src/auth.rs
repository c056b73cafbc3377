// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Image authentication.
//!
//! An image is accepted only once its header has been checked, the signing key has been traced
//! back to the root of trust hash in the fuses, and the signature over the header, key table and
//! payload has been verified. The first failed check rejects the image.

pub mod crypto;
pub mod csf;
pub mod rotpk;
pub mod rsa;

use crate::error::ErrorKind;
use thiserror::Error;

/// Reasons for rejecting an image.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum AuthError {
    /// The header is truncated, has the wrong barker code, or has fields out of range.
    #[error("malformed image header")]
    MalformedHeader,
    /// The selected key has been revoked in the fuses.
    #[error("key {0} has been revoked")]
    RevokedKey(u8),
    /// The key table doesn't match the root of trust public key hash.
    #[error("key table doesn't match the root of trust")]
    RotMismatch,
    /// The selected public key can't be a valid RSA key.
    #[error("invalid public key")]
    InvalidKeyMaterial,
    /// The signature doesn't verify.
    #[error("signature mismatch")]
    SignatureMismatch,
}

impl AuthError {
    /// Returns the class of the error.
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::MalformedHeader | Self::InvalidKeyMaterial => ErrorKind::MalformedInput,
            Self::RevokedKey(_) | Self::RotMismatch | Self::SignatureMismatch => {
                ErrorKind::TrustViolation
            }
        }
    }
}

/// Signature schemes, ordered from weakest to strongest.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum SignatureAlgorithm {
    /// RSASSA-PKCS1-v1_5 with a 1024-bit modulus and SHA-256.
    Rsa1024Sha256,
    /// RSASSA-PKCS1-v1_5 with a 2048-bit modulus and SHA-256.
    Rsa2048Sha256,
    /// RSASSA-PKCS1-v1_5 with a 4096-bit modulus and SHA-256.
    Rsa4096Sha256,
}

impl SignatureAlgorithm {
    /// Returns the algorithm for an RSA modulus of the given length in bytes, if supported.
    pub const fn from_modulus_len(len: usize) -> Option<Self> {
        match len {
            128 => Some(Self::Rsa1024Sha256),
            256 => Some(Self::Rsa2048Sha256),
            512 => Some(Self::Rsa4096Sha256),
            _ => None,
        }
    }
}

/// How the signing key of an accepted image was trusted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyTrust {
    /// The key table matched the fused root of trust hash.
    RootOfTrust,
    /// The key table didn't match, but the development bypass was enabled on a non-production
    /// part.
    DevelopmentBypass,
}

/// Authentication policy for a boot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AuthPolicy {
    /// Images signed with a weaker algorithm than this are rejected by the loader.
    pub minimum_algorithm: SignatureAlgorithm,
    /// Accept images whose key table doesn't match the root of trust, with a warning. Only takes
    /// effect if the `dev_rot_bypass` feature is enabled and the part isn't fused for production.
    pub dev_rot_bypass: bool,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            minimum_algorithm: SignatureAlgorithm::Rsa2048Sha256,
            dev_rot_bypass: false,
        }
    }
}

/// The parts of an accepted image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VerifiedImage<'i> {
    /// The signed payload, to be executed or loaded further.
    pub payload: &'i [u8],
    /// The public key which signed the image: modulus followed by exponent.
    pub key: &'i [u8],
    /// The signature.
    pub signature: &'i [u8],
    /// Length of `key` in bytes.
    pub key_len: usize,
    /// Length of `signature` in bytes.
    pub sign_len: usize,
    /// The signature scheme which was verified.
    pub algorithm: SignatureAlgorithm,
    /// How the key was trusted.
    pub trust: KeyTrust,
}

/// Something which can decide whether a loaded image may be used.
pub trait Authenticator {
    /// Returns the policy that accepted images must satisfy.
    fn policy(&self) -> &AuthPolicy;

    /// Checks the loaded image in `image`, returning its verified parts.
    fn authenticate<'i>(&mut self, image: &'i [u8]) -> Result<VerifiedImage<'i>, AuthError>;
}

/// Access to the one-time programmable fuses holding the root of trust.
pub trait Fuses {
    /// Returns the key revocation bitmap. Bit `k - 1` revokes key `k`.
    fn key_revocation_bitmap(&self) -> u32;

    /// Returns the SHA-256 hash of the root of trust public key table.
    fn rotpk_reference_hash(&self) -> [u8; 32];

    /// Returns whether the part has been fused for production.
    fn is_production_part(&self) -> bool;
}

/// Fuse values fixed at build time, for platforms without one-time programmable fuses.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticFuses {
    /// The key revocation bitmap.
    pub revoked: u32,
    /// The SHA-256 hash of the root of trust public key table.
    pub reference_hash: [u8; 32],
    /// Whether this is a production part.
    pub production: bool,
}

impl Fuses for StaticFuses {
    fn key_revocation_bitmap(&self) -> u32 {
        self.revoked
    }

    fn rotpk_reference_hash(&self) -> [u8; 32] {
        self.reference_hash
    }

    fn is_production_part(&self) -> bool {
        self.production
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_order() {
        assert!(SignatureAlgorithm::Rsa1024Sha256 < SignatureAlgorithm::Rsa2048Sha256);
        assert!(SignatureAlgorithm::Rsa2048Sha256 < SignatureAlgorithm::Rsa4096Sha256);
        assert_eq!(
            SignatureAlgorithm::from_modulus_len(256),
            Some(SignatureAlgorithm::Rsa2048Sha256)
        );
        assert_eq!(SignatureAlgorithm::from_modulus_len(192), None);
    }

    #[test]
    fn error_kinds() {
        assert_eq!(AuthError::MalformedHeader.kind(), ErrorKind::MalformedInput);
        assert_eq!(AuthError::InvalidKeyMaterial.kind(), ErrorKind::MalformedInput);
        assert_eq!(AuthError::RevokedKey(1).kind(), ErrorKind::TrustViolation);
        assert_eq!(AuthError::SignatureMismatch.kind(), ErrorKind::TrustViolation);
    }
}
