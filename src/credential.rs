//! Stateless credential wrapping.
//!
//! The device stores nothing per registration. Instead the freshly
//! generated private key is sealed into the credential ID itself and
//! handed to the relying party, which presents it back on every
//! authentication:
//!
//! ```text
//! IV (12) ‖ AES-256-GCM(master key, IV, AAD = RP-ID hash, private key) (32) ‖ TAG (16)
//! ```
//!
//! Using the RP-ID hash as associated data binds the handle to its
//! origin: the same handle under a different RP fails tag verification
//! instead of silently unlocking cross-origin. The envelope layout is
//! part of the external interface and must stay bit-stable so prior
//! registrations survive firmware upgrades.

use crate::crypto::Crypto;

pub const IV_LENGTH: usize = 12;
pub const TAG_LENGTH: usize = 16;
/// IV ‖ encrypted private key ‖ tag.
pub const KEY_HANDLE_LENGTH: usize = 60;

pub type KeyHandle = [u8; KEY_HANDLE_LENGTH];

/// Opaque unwrap failure. A handle wrapped by another device, a handle
/// for a different RP and a corrupted handle are indistinguishable, so
/// a host cannot probe which one it hit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InvalidKeyHandle;

/// Seal `private_key` for `rp_id_hash` under a fresh random IV.
pub fn wrap<C: Crypto>(
    crypto: &mut C,
    master_key: &[u8; 32],
    rp_id_hash: &[u8; 32],
    private_key: &[u8; 32],
) -> crate::crypto::Result<KeyHandle> {
    let mut iv = [0u8; IV_LENGTH];
    crypto.fill_random(&mut iv);

    let mut ciphertext = *private_key;
    let tag = crypto.aes256_gcm_encrypt(master_key, &iv, rp_id_hash, &mut ciphertext)?;

    let mut handle = [0u8; KEY_HANDLE_LENGTH];
    handle[..IV_LENGTH].copy_from_slice(&iv);
    handle[IV_LENGTH..IV_LENGTH + 32].copy_from_slice(&ciphertext);
    handle[IV_LENGTH + 32..].copy_from_slice(&tag);
    Ok(handle)
}

/// Recover the private key sealed in `handle`, provided `rp_id_hash`
/// and the master key match those used at wrap time.
pub fn unwrap<C: Crypto>(
    crypto: &mut C,
    master_key: &[u8; 32],
    rp_id_hash: &[u8; 32],
    handle: &[u8],
) -> core::result::Result<[u8; 32], InvalidKeyHandle> {
    if handle.len() != KEY_HANDLE_LENGTH {
        return Err(InvalidKeyHandle);
    }
    let iv: [u8; IV_LENGTH] = handle[..IV_LENGTH].try_into().unwrap();
    let mut private_key: [u8; 32] = handle[IV_LENGTH..IV_LENGTH + 32].try_into().unwrap();
    let tag: [u8; TAG_LENGTH] = handle[IV_LENGTH + 32..].try_into().unwrap();

    crypto
        .aes256_gcm_decrypt(master_key, &iv, rp_id_hash, &mut private_key, &tag)
        .map_err(|_| InvalidKeyHandle)?;
    Ok(private_key)
}

#[cfg(all(test, feature = "softtoken"))]
mod tests {
    use super::*;
    use crate::softtoken::SoftCrypto;
    use rand::{rngs::StdRng, SeedableRng};

    fn crypto() -> SoftCrypto<StdRng> {
        SoftCrypto::new(StdRng::seed_from_u64(0x6b65795f68616e64))
    }

    const MASTER_KEY: [u8; 32] = [0x42; 32];
    const RP_A: [u8; 32] = [0xa1; 32];
    const RP_B: [u8; 32] = [0xb2; 32];

    #[test]
    fn wrap_then_unwrap_recovers_the_key() {
        let mut crypto = crypto();
        let private_key = [0x17; 32];
        let handle = wrap(&mut crypto, &MASTER_KEY, &RP_A, &private_key).unwrap();
        assert_eq!(handle.len(), KEY_HANDLE_LENGTH);
        assert_eq!(
            unwrap(&mut crypto, &MASTER_KEY, &RP_A, &handle).unwrap(),
            private_key
        );
    }

    #[test]
    fn wrong_rp_fails() {
        let mut crypto = crypto();
        let handle = wrap(&mut crypto, &MASTER_KEY, &RP_A, &[0x17; 32]).unwrap();
        assert_eq!(
            unwrap(&mut crypto, &MASTER_KEY, &RP_B, &handle),
            Err(InvalidKeyHandle)
        );
    }

    #[test]
    fn wrong_master_key_fails() {
        let mut crypto = crypto();
        let handle = wrap(&mut crypto, &MASTER_KEY, &RP_A, &[0x17; 32]).unwrap();
        assert_eq!(
            unwrap(&mut crypto, &[0x43; 32], &RP_A, &handle),
            Err(InvalidKeyHandle)
        );
    }

    #[test]
    fn any_single_bit_flip_fails() {
        let mut crypto = crypto();
        let handle = wrap(&mut crypto, &MASTER_KEY, &RP_A, &[0x17; 32]).unwrap();
        for byte in 0..KEY_HANDLE_LENGTH {
            for bit in 0..8 {
                let mut tampered = handle;
                tampered[byte] ^= 1 << bit;
                assert_eq!(
                    unwrap(&mut crypto, &MASTER_KEY, &RP_A, &tampered),
                    Err(InvalidKeyHandle),
                    "flip of byte {} bit {} was accepted",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn truncated_handles_are_rejected() {
        let mut crypto = crypto();
        let handle = wrap(&mut crypto, &MASTER_KEY, &RP_A, &[0x17; 32]).unwrap();
        assert_eq!(
            unwrap(&mut crypto, &MASTER_KEY, &RP_A, &handle[..59]),
            Err(InvalidKeyHandle)
        );
        assert_eq!(
            unwrap(&mut crypto, &MASTER_KEY, &RP_A, &[]),
            Err(InvalidKeyHandle)
        );
    }
}
