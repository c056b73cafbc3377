// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Command Sequence File (CSF) image headers.
//!
//! A signed image starts with a 64 byte header. The header gives the location of a table of Super
//! Root Keys (SRKs), which of them signed the image, and the location of the signature and of the
//! payload. The signature covers the header, the SRK table and the payload.

use super::{
    AuthError, AuthPolicy, Authenticator, Fuses, KeyTrust, SignatureAlgorithm, VerifiedImage,
    crypto::CryptoBackend, rotpk::RotpkTable, rsa,
};
use log::{debug, error, warn};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    little_endian::{U16, U32, U64},
};

/// Barker code at the start of every CSF header.
pub const BARKER: [u8; 4] = [0x12, 0x19, 0x20, 0x01];

/// Maximum number of keys in an SRK table.
pub const MAX_SRK_KEYS: usize = 8;

/// Key number which can't be revoked.
pub const UNREVOCABLE_KEY: u8 = 4;

/// Allowed values of `SrkEntry::key_len`, for 1024, 2048 and 4096-bit RSA keys.
const SUPPORTED_KEY_LENS: [usize; 3] = [256, 512, 1024];

/// The fixed part of a CSF header.
#[derive(Clone, Copy, Debug, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq, Unaligned)]
#[repr(C)]
pub struct CsfHeader {
    /// Must be [`BARKER`].
    pub barker: [u8; 4],
    /// Offset of the SRK table from the start of the image.
    pub srk_table_offset: U32,
    /// Number of entries in the SRK table.
    pub num_srk: u8,
    /// One-based index of the key which signed the image.
    pub srk_sel: u8,
    /// Reserved.
    pub reserved: U16,
    /// Whether the UID fields must match the device.
    pub uid_flag: U32,
    /// Offset of the signature from the start of the image.
    pub signature_offset: U32,
    /// Length of the signature in bytes.
    pub signature_length: U32,
    /// Offset of the payload from the start of the image.
    pub image_offset: U64,
    /// Length of the payload in bytes.
    pub image_size: U32,
    /// Image encryption key selection.
    pub ie_key_sel: U32,
    /// Freescale UID.
    pub fsl_uid: [U32; 2],
    /// OEM UID.
    pub oem_uid: [U32; 4],
}

/// An entry of the SRK table.
#[derive(Clone, Copy, Debug, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq, Unaligned)]
#[repr(C)]
pub struct SrkEntry {
    key_len: U32,
    /// RSA modulus followed by the public exponent, each `key_len / 2` bytes big-endian.
    pkey: [u8; 1024],
}

impl SrkEntry {
    /// Returns the modulus and exponent, after checking that the key length is supported.
    pub fn key_material(&self) -> Result<&[u8], AuthError> {
        let key_len = self.key_len.get() as usize;
        if !SUPPORTED_KEY_LENS.contains(&key_len) {
            return Err(AuthError::MalformedHeader);
        }
        Ok(&self.pkey[..key_len])
    }

    /// Returns the modulus and exponent of the key.
    pub fn public_key(&self) -> Result<(&[u8], &[u8]), AuthError> {
        let material = self.key_material()?;
        Ok(material.split_at(material.len() / 2))
    }
}

/// A CSF image whose header fields have been checked against the image bounds.
#[derive(Clone, Copy, Debug)]
pub struct CsfImage<'i> {
    /// The header.
    pub header: &'i CsfHeader,
    header_bytes: &'i [u8],
    srk_table: &'i [SrkEntry],
    srk_table_bytes: &'i [u8],
    signature: &'i [u8],
    payload: &'i [u8],
}

/// Returns the `length` bytes at `offset` in `image`, if they are all within it.
fn region(image: &[u8], offset: u64, length: u64) -> Result<&[u8], AuthError> {
    let start = usize::try_from(offset).map_err(|_| AuthError::MalformedHeader)?;
    let length = usize::try_from(length).map_err(|_| AuthError::MalformedHeader)?;
    let end = start.checked_add(length).ok_or(AuthError::MalformedHeader)?;
    image.get(start..end).ok_or(AuthError::MalformedHeader)
}

impl<'i> CsfImage<'i> {
    /// Parses the header at the start of `image` and checks that everything it refers to lies
    /// within `image`.
    pub fn parse(image: &'i [u8]) -> Result<Self, AuthError> {
        let (header, _) =
            CsfHeader::ref_from_prefix(image).map_err(|_| AuthError::MalformedHeader)?;
        if header.barker != BARKER {
            return Err(AuthError::MalformedHeader);
        }

        let num_srk = usize::from(header.num_srk);
        let srk_sel = usize::from(header.srk_sel);
        if srk_sel == 0 || srk_sel > num_srk || num_srk > MAX_SRK_KEYS {
            error!(
                "CSF: key {} selected from a table of {}",
                header.srk_sel, header.num_srk
            );
            return Err(AuthError::MalformedHeader);
        }

        let srk_table_bytes = region(
            image,
            header.srk_table_offset.get().into(),
            (num_srk * size_of::<SrkEntry>()) as u64,
        )?;
        let (srk_table, _) = <[SrkEntry]>::ref_from_prefix_with_elems(srk_table_bytes, num_srk)
            .map_err(|_| AuthError::MalformedHeader)?;
        for entry in srk_table {
            entry.key_material()?;
        }

        let signature = region(
            image,
            header.signature_offset.get().into(),
            header.signature_length.get().into(),
        )?;
        let payload = region(
            image,
            header.image_offset.get(),
            header.image_size.get().into(),
        )?;

        Ok(Self {
            header,
            header_bytes: &image[..size_of::<CsfHeader>()],
            srk_table,
            srk_table_bytes,
            signature,
            payload,
        })
    }

    /// Returns the SRK table.
    pub fn srk_table(&self) -> &'i [SrkEntry] {
        self.srk_table
    }

    /// Returns the key which signed the image.
    pub fn selected_key(&self) -> &'i SrkEntry {
        &self.srk_table[usize::from(self.header.srk_sel) - 1]
    }
}

/// Returns whether key number `key` is revoked by the given fuse bitmap.
fn is_revoked(bitmap: u32, key: u8) -> bool {
    key != UNREVOCABLE_KEY && bitmap & (1 << (key - 1)) != 0
}

/// Authenticates CSF images against the root of trust in the fuses.
///
/// This holds the ROTPK cache for the boot, so one instance should be used for every image.
pub struct CsfAuthenticator<'f, F: Fuses, C: CryptoBackend> {
    fuses: &'f F,
    crypto: C,
    policy: AuthPolicy,
    rotpk: RotpkTable,
}

impl<'f, F: Fuses, C: CryptoBackend> CsfAuthenticator<'f, F, C> {
    /// Creates an authenticator with an empty ROTPK cache.
    pub const fn new(fuses: &'f F, crypto: C, policy: AuthPolicy) -> Self {
        Self {
            fuses,
            crypto,
            policy,
            rotpk: RotpkTable::new(),
        }
    }

    /// Returns the ROTPK cache.
    pub fn rotpk(&self) -> &RotpkTable {
        &self.rotpk
    }

    fn dev_bypass_allowed(&self) -> bool {
        cfg!(feature = "dev_rot_bypass")
            && self.policy.dev_rot_bypass
            && !self.fuses.is_production_part()
    }

    /// Traces the selected key back to the root of trust, deploying the ROTPK cache on first use.
    fn establish_trust(&mut self, csf: &CsfImage) -> Result<KeyTrust, AuthError> {
        if !self.rotpk.is_deployed() {
            let reference = self.fuses.rotpk_reference_hash();
            match self.rotpk.deploy(csf.srk_table(), &reference, &self.crypto) {
                Ok(()) => {}
                Err(AuthError::RotMismatch) if self.dev_bypass_allowed() => {
                    warn!("CSF: key table doesn't match the root of trust, continuing anyway");
                    return Ok(KeyTrust::DevelopmentBypass);
                }
                Err(e) => return Err(e),
            }
        }

        let index = usize::from(csf.header.srk_sel) - 1;
        let key_hash = self
            .crypto
            .sha256(&[csf.selected_key().key_material()?]);
        if self.rotpk.key_hash(index) != Some(&key_hash) {
            error!("CSF: key {} isn't in the deployed key table", csf.header.srk_sel);
            return Err(AuthError::RotMismatch);
        }
        Ok(KeyTrust::RootOfTrust)
    }
}

impl<F: Fuses, C: CryptoBackend> Authenticator for CsfAuthenticator<'_, F, C> {
    fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    fn authenticate<'i>(&mut self, image: &'i [u8]) -> Result<VerifiedImage<'i>, AuthError> {
        let csf = CsfImage::parse(image)?;
        let srk_sel = csf.header.srk_sel;
        if is_revoked(self.fuses.key_revocation_bitmap(), srk_sel) {
            error!("CSF: key {srk_sel} has been revoked");
            return Err(AuthError::RevokedKey(srk_sel));
        }

        let trust = self.establish_trust(&csf)?;

        let key = csf.selected_key().key_material()?;
        let (modulus, exponent) = csf.selected_key().public_key()?;
        if modulus[0] & 0x80 == 0 || modulus[modulus.len() - 1] & 1 == 0 {
            return Err(AuthError::InvalidKeyMaterial);
        }
        let algorithm =
            SignatureAlgorithm::from_modulus_len(modulus.len()).ok_or(AuthError::InvalidKeyMaterial)?;

        if csf.signature.len() != modulus.len() {
            return Err(AuthError::MalformedHeader);
        }
        if !rsa::be_less_than(csf.signature, modulus) {
            return Err(AuthError::SignatureMismatch);
        }

        let digest = self
            .crypto
            .sha256(&[csf.header_bytes, csf.srk_table_bytes, csf.payload]);
        self.crypto
            .verify_rsa_pkcs1_sha256(&digest, csf.signature, modulus, exponent)?;

        debug!(
            "CSF: accepted {:#x} byte payload signed by key {srk_sel} ({algorithm:?})",
            csf.payload.len()
        );
        Ok(VerifiedImage {
            payload: csf.payload,
            key,
            signature: csf.signature,
            key_len: key.len(),
            sign_len: csf.signature.len(),
            algorithm,
            trust,
        })
    }
}
