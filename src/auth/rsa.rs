// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! RSA signature verification with fixed-size Montgomery arithmetic.
//!
//! Numbers are little-endian arrays of 32-bit limbs with room for a 4096-bit modulus. Nothing here
//! allocates, and the exponent is assumed to be public.

use super::AuthError;

/// Largest supported modulus, in bytes.
pub const MAX_MODULUS_BYTES: usize = 512;

const MAX_LIMBS: usize = MAX_MODULUS_BYTES / 4;

/// ASN.1 DER encoding of the `DigestInfo` prefix for SHA-256.
const SHA256_DIGEST_INFO_PREFIX: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];

type Limbs = [u32; MAX_LIMBS];

/// Converts a big-endian byte string of at most `MAX_MODULUS_BYTES` into limbs.
fn from_be_bytes(bytes: &[u8]) -> Limbs {
    let mut limbs = [0; MAX_LIMBS];
    for (i, chunk) in bytes.rchunks(4).enumerate() {
        limbs[i] = chunk
            .iter()
            .fold(0, |limb, &byte| (limb << 8) | u32::from(byte));
    }
    limbs
}

/// Writes the low `out.len()` bytes of `limbs` to `out`, big-endian.
fn to_be_bytes(limbs: &Limbs, out: &mut [u8]) {
    for (i, byte) in out.iter_mut().rev().enumerate() {
        *byte = (limbs[i / 4] >> (8 * (i % 4))) as u8;
    }
}

/// Returns whether `a < b`, comparing the low `s` limbs.
fn less_than(a: &[u32], b: &[u32], s: usize) -> bool {
    for i in (0..s).rev() {
        if a[i] != b[i] {
            return a[i] < b[i];
        }
    }
    false
}

/// Subtracts `b` from `a` in place over the low `s` limbs, discarding the final borrow.
fn sub_assign(a: &mut [u32], b: &[u32], s: usize) {
    let mut borrow = false;
    for i in 0..s {
        let (diff, b1) = a[i].overflowing_sub(b[i]);
        let (diff, b2) = diff.overflowing_sub(u32::from(borrow));
        a[i] = diff;
        borrow = b1 || b2;
    }
}

/// An odd modulus prepared for Montgomery multiplication with `R = 2^(32 * s)`.
struct Modulus {
    n: Limbs,
    s: usize,
    /// `-n^-1 mod 2^32`.
    n0inv: u32,
}

impl Modulus {
    fn new(modulus: &[u8]) -> Result<Self, AuthError> {
        if modulus.is_empty() || modulus.len() > MAX_MODULUS_BYTES {
            return Err(AuthError::InvalidKeyMaterial);
        }
        let n = from_be_bytes(modulus);
        let s = modulus.len().div_ceil(4);
        if n[0] & 1 == 0 || n[..s] == [1][..] || n[s - 1] == 0 {
            return Err(AuthError::InvalidKeyMaterial);
        }

        // Newton iteration doubles the number of correct low bits each time, starting from 3.
        let mut inv = n[0];
        for _ in 0..5 {
            inv = inv.wrapping_mul(2u32.wrapping_sub(n[0].wrapping_mul(inv)));
        }
        Ok(Self {
            n,
            s,
            n0inv: inv.wrapping_neg(),
        })
    }

    /// Returns `a * b / R mod n`, for `a * b < R * n`.
    fn mont_mul(&self, a: &Limbs, b: &Limbs) -> Limbs {
        let s = self.s;
        let n = &self.n;
        let mut t = [0u32; MAX_LIMBS + 2];

        for i in 0..s {
            let mut carry = 0u64;
            for j in 0..s {
                let x = u64::from(t[j]) + u64::from(a[j]) * u64::from(b[i]) + carry;
                t[j] = x as u32;
                carry = x >> 32;
            }
            let x = u64::from(t[s]) + carry;
            t[s] = x as u32;
            t[s + 1] = (x >> 32) as u32;

            let m = t[0].wrapping_mul(self.n0inv);
            let x = u64::from(t[0]) + u64::from(m) * u64::from(n[0]);
            let mut carry = x >> 32;
            for j in 1..s {
                let x = u64::from(t[j]) + u64::from(m) * u64::from(n[j]) + carry;
                t[j - 1] = x as u32;
                carry = x >> 32;
            }
            let x = u64::from(t[s]) + carry;
            t[s - 1] = x as u32;
            t[s] = t[s + 1] + (x >> 32) as u32;
        }

        let mut result = [0; MAX_LIMBS];
        result[..s].copy_from_slice(&t[..s]);
        // The result is less than 2n, so at most one subtraction is needed.
        if t[s] != 0 || !less_than(&result, n, s) {
            sub_assign(&mut result, n, s);
        }
        result
    }

    /// Returns `R^2 mod n`.
    fn r_squared(&self) -> Limbs {
        let s = self.s;
        let mut r = [0; MAX_LIMBS];
        r[0] = 1;
        for _ in 0..64 * s {
            let mut carry = 0;
            for limb in &mut r[..s] {
                let next = *limb >> 31;
                *limb = (*limb << 1) | carry;
                carry = next;
            }
            if carry != 0 || !less_than(&r, &self.n, s) {
                sub_assign(&mut r, &self.n, s);
            }
        }
        r
    }
}

/// Computes `base ^ exponent mod modulus`, writing the result to `out` big-endian.
///
/// All values are big-endian byte strings. `base` and `out` must be no longer than `modulus`, and
/// the modulus must be odd.
pub fn mod_exp(
    base: &[u8],
    exponent: &[u8],
    modulus: &[u8],
    out: &mut [u8],
) -> Result<(), AuthError> {
    let modulus = Modulus::new(modulus)?;
    if base.len() > modulus.s * 4 || out.len() > modulus.s * 4 {
        return Err(AuthError::SignatureMismatch);
    }
    let r2 = modulus.r_squared();
    let mut one = [0; MAX_LIMBS];
    one[0] = 1;

    let base = modulus.mont_mul(&from_be_bytes(base), &r2);
    let mut acc = modulus.mont_mul(&one, &r2);
    let mut started = false;
    for byte in exponent {
        for bit in (0..8).rev() {
            let set = byte >> bit & 1 == 1;
            if started {
                acc = modulus.mont_mul(&acc, &acc);
            }
            if set {
                acc = modulus.mont_mul(&acc, &base);
                started = true;
            }
        }
    }
    to_be_bytes(&modulus.mont_mul(&acc, &one), out);
    Ok(())
}

/// Returns whether `a < b`, both big-endian byte strings of the same length.
pub fn be_less_than(a: &[u8], b: &[u8]) -> bool {
    a < b
}

/// Verifies an RSASSA-PKCS1-v1_5 signature over a SHA-256 digest.
///
/// The expected encoded message is rebuilt from the digest and compared in full with the result of
/// the public key operation.
pub fn verify_pkcs1_sha256(
    digest: &[u8; 32],
    signature: &[u8],
    modulus: &[u8],
    exponent: &[u8],
) -> Result<(), AuthError> {
    let k = modulus.len();
    let t_len = SHA256_DIGEST_INFO_PREFIX.len() + digest.len();
    if k > MAX_MODULUS_BYTES || k < t_len + 11 {
        return Err(AuthError::InvalidKeyMaterial);
    }
    if signature.len() != k || !be_less_than(signature, modulus) {
        return Err(AuthError::SignatureMismatch);
    }

    let mut em = [0; MAX_MODULUS_BYTES];
    let em = &mut em[..k];
    mod_exp(signature, exponent, modulus, em)?;

    let mut expected = [0xff; MAX_MODULUS_BYTES];
    let expected = &mut expected[..k];
    expected[0] = 0x00;
    expected[1] = 0x01;
    expected[k - t_len - 1] = 0x00;
    expected[k - t_len..k - digest.len()].copy_from_slice(&SHA256_DIGEST_INFO_PREFIX);
    expected[k - digest.len()..].copy_from_slice(digest);

    if em == expected {
        Ok(())
    } else {
        Err(AuthError::SignatureMismatch)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hex_literal::hex;
    use sha2::{Digest, Sha256};

    /// Public exponent of the test keys.
    pub(crate) const E_65537: [u8; 3] = [0x01, 0x00, 0x01];

    pub(crate) const KEY_A_N: [u8; 128] = hex!(
        "cdfa9a5922778614d1a0b14ce4cfbc5fc84575f8c868b88b0478bc25b4dfe932"
        "9048879616a51ad573674326612ece2c147d9802086078522e13931b43171796"
        "a85a328783324886f05d9272e3e79a2255613fe9b9c2e4a24178be9b2f5d0aa1"
        "79f75c64b5a9a8890cbba99914604e446a7efd1b0a8699f11c2a8dad03b57b23"
    );
    pub(crate) const KEY_A_D: [u8; 128] = hex!(
        "8b5a09e657cd2927189370a02704ebda99317518b4ed343cc8efadca8cce1784"
        "9fdc91ee56afa8b1d3fb7e908e9b0ddd0097dfa93065a3c1656ed4cd52dc6295"
        "d0b1df9594b9269eecbe320b31255a66103f95e580e9ef72b14773263a7e3c70"
        "ef9b2346a0720f0ca2c861d70d68883801d3a7a83280c05acc9546e4863f1de1"
    );
    pub(crate) const KEY_B_N: [u8; 128] = hex!(
        "c4e1cbe9a34e7856d93eb29866231112b424b1bd6d5314cdebd95afc5c591e2a"
        "3c5d3b3a509b6803901146ae0ebf577d021319d064a29621b1b281cda2bea2fa"
        "03387d97dae246c19fa8b466504c82f5d0c1950531070cf1b4c9717b0bc15334"
        "5aeb018227e20847710d5f861f357480ebf2740722c91ad269e273c3d932f205"
    );
    pub(crate) const KEY_B_D: [u8; 128] = hex!(
        "3a540aed750c526aa88202b753cb1fcbc2c2fc457a961a9bc73be5d0ce2b38dc"
        "9a75a48e6a432055ade0f067b0c6cf4ca1c8b6e51e6b6cbf1ebe1be6a848824f"
        "b9e8170f04df17cfbbd2e0e22baab18398d5a25cff53dd0e07a13889a43a36ed"
        "2b594c932865190d11361279265a2a45b4afb27de7f61e32168057946cf60f01"
    );
    pub(crate) const KEY_C_N: [u8; 256] = hex!(
        "e64d1744db54958875dbdcfd66393bdec88e0ccc81d6ead714221a2763385eea"
        "a8b3bb08f507273ddc71aa6e52d0abc0af9e2920736d3ee353da680d004faefa"
        "575ed031f9d42c01e3bbcc7ff49720033394dd870a6bf224f6f1ab8704c95fb1"
        "ab1dfe4715dbd0b9ea8eacab12ecfcc779eb25cb57cc64589fa3938d04f82b83"
        "485b728d3ac52cd51b8139d4d00fd373e304d34818e644c741f9163b35709e8e"
        "5d969d61cbad70055b46a548dbe1d740fb6e7ef01ecb3ced01ba7faa4f28b36b"
        "25718533e0c2300080b2b8866157fd13e4bef1462e4a0a8905cb3ba72fce52d8"
        "756ab096f11e5b133ee2f6ff6cc07bac937184f4e49d55e7671f6c11862dca7f"
    );
    pub(crate) const KEY_C_D: [u8; 256] = hex!(
        "b0d4c6a61f46de1e4e68c851657952c827f4324da0f0759739a549b1ae94ad04"
        "bf0e69f161bae15db5732d6ad279d936f5619ab089107bf62eff875f5c3ad2de"
        "f3d120490f4be3927bdb4a1581a7bc73d8da5812856507236cdd79580dcbd587"
        "651d7d8df571b7ddd9053dfd8965a05e45f5d12a463af15dbf0de990a11d30c2"
        "82b96ad64eb15a3d4f6453e22caa2d57967954ce18dd0212b34ade23dbe482b8"
        "71da46f6e1e9e7aa64d9845e342269e5ed2cbb62ef52e627653d242b82ae5f45"
        "b05083f0e342ad1c4138a354e8bb5a5b8f65f98294e3677885de2e774c869b85"
        "a71abfce9a2b2539aa2d0c77dea4c1b366ddd9001a9d0d2c9599d5fe4cab38e9"
    );
    const KAT_SIG: [u8; 128] = hex!(
        "1e29d786c392542558119051e7ef3cb4af021902cd6697c4f5a9439fc433cc3c"
        "365f66bda6338e8cda7835890afc446d3119422a42b33f88d82c0274c3b94840"
        "47ceb4f7a734b86097bb4a4238819d1c1c9a8b7d9e8f8f2d27cca1ff32ebbde5"
        "d7bb3c233b02d3346895026855e8fdd8374f5d41396d5109d94caf478b211698"
    );

    /// Signs `message` with the private exponent `d`, returning the signature.
    fn sign(message: &[u8], modulus: &[u8], d: &[u8]) -> Vec<u8> {
        sign_digest(&Sha256::digest(message).into(), modulus, d)
    }

    /// Signs a SHA-256 digest with the private exponent `d`, returning the signature.
    pub(crate) fn sign_digest(digest: &[u8; 32], modulus: &[u8], d: &[u8]) -> Vec<u8> {
        let k = modulus.len();
        let mut em = vec![0xff; k];
        em[0] = 0;
        em[1] = 1;
        em[k - 52] = 0;
        em[k - 51..k - 32].copy_from_slice(&SHA256_DIGEST_INFO_PREFIX);
        em[k - 32..].copy_from_slice(digest);
        let mut signature = vec![0; k];
        mod_exp(&em, d, modulus, &mut signature).unwrap();
        signature
    }

    #[test]
    fn small_mod_exp() {
        let mut out = [0; 2];
        mod_exp(&[4], &[13], &[0x01, 0xf1], &mut out).unwrap();
        assert_eq!(u16::from_be_bytes(out), 445);
        mod_exp(&[4], &[0, 0], &[0x01, 0xf1], &mut out).unwrap();
        assert_eq!(u16::from_be_bytes(out), 1);
    }

    #[test]
    fn known_answer() {
        let message = b"rf-a-bl2 known answer";
        assert_eq!(sign(message, &KEY_A_N, &KEY_A_D), KAT_SIG);
        let digest = Sha256::digest(message).into();
        assert_eq!(
            verify_pkcs1_sha256(&digest, &KAT_SIG, &KEY_A_N, &E_65537),
            Ok(())
        );
    }

    #[test]
    fn reject_wrong_digest_or_key() {
        let digest: [u8; 32] = Sha256::digest(b"rf-a-bl2 known answer!").into();
        assert_eq!(
            verify_pkcs1_sha256(&digest, &KAT_SIG, &KEY_A_N, &E_65537),
            Err(AuthError::SignatureMismatch)
        );
        let digest = Sha256::digest(b"rf-a-bl2 known answer").into();
        assert_eq!(
            verify_pkcs1_sha256(&digest, &KAT_SIG, &KEY_B_N, &E_65537),
            Err(AuthError::SignatureMismatch)
        );
        assert_eq!(
            verify_pkcs1_sha256(&digest, &KAT_SIG[1..], &KEY_A_N, &E_65537),
            Err(AuthError::SignatureMismatch)
        );
    }

    #[test]
    fn rsa_2048() {
        let signature = sign(b"bl31", &KEY_C_N, &KEY_C_D);
        let digest = Sha256::digest(b"bl31").into();
        assert_eq!(
            verify_pkcs1_sha256(&digest, &signature, &KEY_C_N, &E_65537),
            Ok(())
        );
    }

    #[test]
    fn signature_not_below_modulus() {
        let digest = Sha256::digest(b"bl31").into();
        assert_eq!(
            verify_pkcs1_sha256(&digest, &KEY_A_N, &KEY_A_N, &E_65537),
            Err(AuthError::SignatureMismatch)
        );
        let mut above = KEY_A_N;
        above[127] += 2;
        assert_eq!(
            verify_pkcs1_sha256(&digest, &above, &KEY_A_N, &E_65537),
            Err(AuthError::SignatureMismatch)
        );
    }

    #[test]
    fn bad_modulus() {
        let digest = Sha256::digest(b"bl31").into();
        let mut even = KEY_A_N;
        even[127] &= !1;
        let signature = [0; 128];
        assert_eq!(
            verify_pkcs1_sha256(&digest, &signature, &even, &E_65537),
            Err(AuthError::InvalidKeyMaterial)
        );
        assert_eq!(
            verify_pkcs1_sha256(&digest, &signature[..32], &KEY_A_N[..32], &E_65537),
            Err(AuthError::InvalidKeyMaterial)
        );
        let mut out = [0; 4];
        assert_eq!(
            mod_exp(&[1], &[1], &[0, 0, 0, 1], &mut out),
            Err(AuthError::InvalidKeyMaterial)
        );
    }
}
