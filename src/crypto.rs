//! Interface to the cryptographic provider.
//!
//! The core never touches curve arithmetic or block ciphers itself; a
//! board crate supplies an implementation of [`Crypto`] (hardware
//! accelerators, a vendor library, or the software token behind the
//! `softtoken` feature).

use heapless_bytes::Bytes;

/// DER-encoded ECDSA P-256 signatures are 70–72 bytes.
pub const ASN1_SIGNATURE_LENGTH: usize = 72;

pub type Signature = Bytes<ASN1_SIGNATURE_LENGTH>;

/// Freshly generated P-256 keypair. The public key is an uncompressed
/// SEC1 point, `0x04 ‖ X ‖ Y`.
#[derive(Clone)]
pub struct Keypair {
    pub private: [u8; 32],
    pub public: [u8; 65],
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// GCM tag verification failed. Carries no further detail: a handle
    /// wrapped for another RP and a corrupted handle must look the same
    /// to the host.
    AuthTagMismatch,
    /// The provider rejected a scalar or point.
    InvalidKey,
}

pub type Result<T> = core::result::Result<T, Error>;

pub trait Crypto {
    /// Fill `buf` from a cryptographically secure generator.
    fn fill_random(&mut self, buf: &mut [u8]);

    fn sha256(&mut self, data: &[u8]) -> [u8; 32];

    fn p256_generate(&mut self) -> Keypair;

    /// ECDSA-sign a precomputed SHA-256 digest, returning the DER encoding.
    fn p256_sign(&mut self, private_key: &[u8; 32], digest: &[u8; 32]) -> Result<Signature>;

    /// AES-256-GCM encrypt `buf` in place; returns the 16-byte tag.
    fn aes256_gcm_encrypt(
        &mut self,
        key: &[u8; 32],
        iv: &[u8; 12],
        aad: &[u8],
        buf: &mut [u8],
    ) -> Result<[u8; 16]>;

    /// AES-256-GCM decrypt `buf` in place after verifying `tag`.
    ///
    /// Fails with [`Error::AuthTagMismatch`]; on failure the buffer
    /// contents are unspecified and must not be used.
    fn aes256_gcm_decrypt(
        &mut self,
        key: &[u8; 32],
        iv: &[u8; 12],
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8; 16],
    ) -> Result<()>;
}
