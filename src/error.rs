// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Error classification shared by the boot path.

use crate::{auth::AuthError, image_load::LoadError, io::IoError};
use thiserror::Error;

/// The broad class of an error, which determines how far its effects propagate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// A fixed-size pool or table is full.
    ResourceExhausted,
    /// Some input was structurally invalid.
    MalformedInput,
    /// A cryptographic or root of trust check failed. This is fatal to the whole boot.
    TrustViolation,
    /// A device didn't respond or reported a fault.
    HardwareTimeout,
    /// A runtime caller asked for something it isn't allowed to do. This only fails the call.
    PolicyViolation,
}

/// An error which stops the boot.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum BootError {
    /// Reading an image failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),
    /// Authenticating an image failed.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    /// The loader found something wrong with an image or with the descriptors.
    #[error("{0}")]
    Load(#[from] LoadError),
    /// Setting up the Granule Protection Table failed.
    #[cfg(feature = "rme")]
    #[error("GPT setup failed: {0}")]
    Gpt(#[from] arm_gpt::GptError),
}

impl BootError {
    /// Returns the class of the underlying error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) => e.kind(),
            Self::Auth(e) => e.kind(),
            Self::Load(e) => e.kind(),
            #[cfg(feature = "rme")]
            Self::Gpt(e) => match e {
                arm_gpt::GptError::OutOfMemory => ErrorKind::ResourceExhausted,
                arm_gpt::GptError::NotPermitted => ErrorKind::PolicyViolation,
                _ => ErrorKind::MalformedInput,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            BootError::from(IoError::ResourcesExhausted).kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            BootError::from(AuthError::RotMismatch).kind(),
            ErrorKind::TrustViolation
        );
        assert_eq!(
            BootError::from(AuthError::MalformedHeader).kind(),
            ErrorKind::MalformedInput
        );
        assert_eq!(
            BootError::from(LoadError::ShortRead { image_id: 3 }).kind(),
            ErrorKind::MalformedInput
        );
    }

    #[test]
    fn display() {
        assert_eq!(
            BootError::from(AuthError::RevokedKey(2)).to_string(),
            "authentication failed: key 2 has been revoked"
        );
    }
}
