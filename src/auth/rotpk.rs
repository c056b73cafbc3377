// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Cache of the root of trust public key hashes.

use super::{
    AuthError,
    crypto::{CryptoBackend, Sha256Digest},
    csf::{MAX_SRK_KEYS, SrkEntry},
};
use arrayvec::ArrayVec;
use log::{debug, error};

/// The hashes of the keys in a key table which has been checked against the fused root of trust
/// hash.
///
/// Once deployed, the table doesn't change for the rest of the boot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RotpkTable {
    hashes: ArrayVec<Sha256Digest, MAX_SRK_KEYS>,
    deployed: bool,
}

impl RotpkTable {
    /// Returns an empty table which hasn't been deployed yet.
    pub const fn new() -> Self {
        Self {
            hashes: ArrayVec::new_const(),
            deployed: false,
        }
    }

    /// Returns whether a key table has been deployed.
    pub fn is_deployed(&self) -> bool {
        self.deployed
    }

    /// Returns the cached hash of the key at the given zero-based index.
    pub fn key_hash(&self, index: usize) -> Option<&Sha256Digest> {
        self.hashes.get(index)
    }

    /// Checks `srk_table` against the fused `reference` hash and caches its key hashes.
    ///
    /// The reference is the SHA-256 hash of the concatenated SHA-256 hashes of each key. Once a
    /// table has been deployed, deploying the same table again succeeds without changing anything,
    /// and deploying any other table fails.
    pub fn deploy(
        &mut self,
        srk_table: &[SrkEntry],
        reference: &Sha256Digest,
        crypto: &impl CryptoBackend,
    ) -> Result<(), AuthError> {
        if srk_table.is_empty() || srk_table.len() > MAX_SRK_KEYS {
            return Err(AuthError::MalformedHeader);
        }
        let mut hashes = ArrayVec::<Sha256Digest, MAX_SRK_KEYS>::new();
        for entry in srk_table {
            hashes.push(crypto.sha256(&[entry.key_material()?]));
        }

        if self.deployed {
            if hashes != self.hashes {
                error!("ROTPK: key table differs from the one already deployed");
                return Err(AuthError::RotMismatch);
            }
            return Ok(());
        }

        let digest = {
            let parts = hashes
                .iter()
                .map(|hash| hash.as_slice())
                .collect::<ArrayVec<&[u8], MAX_SRK_KEYS>>();
            crypto.sha256(&parts)
        };
        if digest != *reference {
            error!("ROTPK: key table hash doesn't match the fuses");
            return Err(AuthError::RotMismatch);
        }

        debug!("ROTPK: deployed table of {} keys", hashes.len());
        self.hashes = hashes;
        self.deployed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        crypto::SoftwareCrypto,
        csf::tests::{reference_hash, srk_entry},
        rsa::tests::{KEY_A_N, KEY_B_N, KEY_C_N},
    };

    #[test]
    fn mismatch_fails_closed() {
        let table = [srk_entry(&KEY_A_N), srk_entry(&KEY_B_N)];
        let mut rotpk = RotpkTable::new();
        let wrong = reference_hash(&[&KEY_A_N, &KEY_C_N]);

        assert_eq!(
            rotpk.deploy(&table, &wrong, &SoftwareCrypto),
            Err(AuthError::RotMismatch)
        );
        assert!(!rotpk.is_deployed());
        assert_eq!(rotpk.key_hash(0), None);
    }

    #[test]
    fn deploy_is_idempotent() {
        let table = [srk_entry(&KEY_A_N), srk_entry(&KEY_B_N)];
        let reference = reference_hash(&[&KEY_A_N, &KEY_B_N]);
        let mut rotpk = RotpkTable::new();

        rotpk.deploy(&table, &reference, &SoftwareCrypto).unwrap();
        let first = rotpk.clone();
        rotpk.deploy(&table, &reference, &SoftwareCrypto).unwrap();
        assert_eq!(rotpk, first);
        assert_eq!(
            rotpk.key_hash(1),
            Some(&SoftwareCrypto.sha256(&[table[1].key_material().unwrap()]))
        );

        // A different table can't replace the deployed one, even with a matching reference.
        let other = [srk_entry(&KEY_A_N), srk_entry(&KEY_C_N)];
        let other_reference = reference_hash(&[&KEY_A_N, &KEY_C_N]);
        assert_eq!(
            rotpk.deploy(&other, &other_reference, &SoftwareCrypto),
            Err(AuthError::RotMismatch)
        );
        assert_eq!(rotpk, first);
    }

    #[test]
    fn table_size_limits() {
        let mut rotpk = RotpkTable::new();
        let reference = reference_hash(&[]);
        assert_eq!(
            rotpk.deploy(&[], &reference, &SoftwareCrypto),
            Err(AuthError::MalformedHeader)
        );
        let table: Vec<SrkEntry> = (0..=MAX_SRK_KEYS).map(|_| srk_entry(&KEY_A_N)).collect();
        assert_eq!(
            rotpk.deploy(&table, &reference, &SoftwareCrypto),
            Err(AuthError::MalformedHeader)
        );
    }
}
