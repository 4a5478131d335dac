//! Software token: pure-software implementations of the crypto, store
//! and board facades.
//!
//! Lets the complete device run on a host, which is how the integration
//! tests drive it end to end. Real hardware replaces all three with its
//! accelerators, flash and GPIO. Nothing here is hardened; do not ship
//! it as a production authenticator.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, Key, KeyInit};
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use crate::authenticator::Board;
use crate::crypto::{Crypto, Error, Keypair, Result, Signature};
use crate::store::{self, Store};

/// [`Crypto`] on the RustCrypto stack, generic over the RNG so tests
/// can run deterministically seeded.
pub struct SoftCrypto<R> {
    rng: R,
}

impl<R: RngCore + CryptoRng> SoftCrypto<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: RngCore + CryptoRng> Crypto for SoftCrypto<R> {
    fn fill_random(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf);
    }

    fn sha256(&mut self, data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    fn p256_generate(&mut self) -> Keypair {
        let signing_key = SigningKey::random(&mut self.rng);
        let mut private = [0u8; 32];
        private.copy_from_slice(&signing_key.to_bytes());
        let point = signing_key.verifying_key().to_encoded_point(false);
        let mut public = [0u8; 65];
        public.copy_from_slice(point.as_bytes());
        Keypair { private, public }
    }

    fn p256_sign(&mut self, private_key: &[u8; 32], digest: &[u8; 32]) -> Result<Signature> {
        let signing_key = SigningKey::from_slice(private_key).map_err(|_| Error::InvalidKey)?;
        let signature: EcdsaSignature =
            signing_key.sign_prehash(digest).map_err(|_| Error::InvalidKey)?;
        let der = signature.to_der();
        Signature::from_slice(der.as_bytes()).map_err(|_| Error::InvalidKey)
    }

    fn aes256_gcm_encrypt(
        &mut self,
        key: &[u8; 32],
        iv: &[u8; 12],
        aad: &[u8],
        buf: &mut [u8],
    ) -> Result<[u8; 16]> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(iv), aad, buf)
            .map_err(|_| Error::AuthTagMismatch)?;
        Ok(tag.into())
    }

    fn aes256_gcm_decrypt(
        &mut self,
        key: &[u8; 32],
        iv: &[u8; 12],
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8; 16],
    ) -> Result<()> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(iv),
                aad,
                buf,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| Error::AuthTagMismatch)
    }
}

/// Volatile [`Store`]. Contents survive an [`Authenticator`] teardown
/// (the test suite's "reboot") but obviously not a process exit.
///
/// [`Authenticator`]: crate::authenticator::Authenticator
pub struct RamStore {
    entries: heapless::LinearMap<heapless::String<16>, heapless::Vec<u8, 32>, 4>,
}

impl RamStore {
    pub fn new() -> Self {
        Self {
            entries: heapless::LinearMap::new(),
        }
    }
}

impl Default for RamStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for RamStore {
    fn fetch(&mut self, key: &str, buf: &mut [u8]) -> store::Result<Option<usize>> {
        for (name, value) in self.entries.iter() {
            if name.as_str() == key {
                if value.len() > buf.len() {
                    return Err(store::Error::Storage);
                }
                buf[..value.len()].copy_from_slice(value);
                return Ok(Some(value.len()));
            }
        }
        Ok(None)
    }

    fn persist(&mut self, key: &str, value: &[u8]) -> store::Result<()> {
        for (name, slot) in self.entries.iter_mut() {
            if name.as_str() == key {
                slot.clear();
                return slot
                    .extend_from_slice(value)
                    .map_err(|_| store::Error::Storage);
            }
        }

        let mut owned = heapless::String::new();
        owned.push_str(key).map_err(|_| store::Error::Storage)?;
        let mut bytes = heapless::Vec::new();
        bytes
            .extend_from_slice(value)
            .map_err(|_| store::Error::Storage)?;
        self.entries
            .insert(owned, bytes)
            .map_err(|_| store::Error::Storage)?;
        Ok(())
    }
}

/// Scriptable [`Board`]: the clock advances a fixed step per query and
/// the button is a flag.
pub struct SoftBoard {
    now_ms: u32,
    /// Answer served to every user-presence poll.
    pub presence: bool,
    /// How often the host asked us to wink.
    pub winks: u32,
}

/// Simulated milliseconds per clock query.
const TICK_MS: u32 = 25;

impl SoftBoard {
    pub fn new() -> Self {
        Self {
            now_ms: 0,
            presence: false,
            winks: 0,
        }
    }

    /// A board whose button is held down, so every user-presence check
    /// passes immediately.
    pub fn pressed() -> Self {
        Self {
            presence: true,
            ..Self::new()
        }
    }
}

impl Default for SoftBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl Board for SoftBoard {
    fn now_ms(&mut self) -> u32 {
        self.now_ms = self.now_ms.wrapping_add(TICK_MS);
        self.now_ms
    }

    fn user_present(&mut self) -> bool {
        self.presence
    }

    fn wink(&mut self) {
        self.winks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::hazmat::PrehashVerifier;
    use p256::ecdsa::VerifyingKey;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn crypto() -> SoftCrypto<StdRng> {
        SoftCrypto::new(StdRng::seed_from_u64(0x736f6674))
    }

    #[test]
    fn generated_keys_sign_verifiably() {
        let mut crypto = crypto();
        let keypair = crypto.p256_generate();
        assert_eq!(keypair.public[0], 0x04);

        let digest = crypto.sha256(b"sample message");
        let signature = crypto.p256_sign(&keypair.private, &digest).unwrap();

        let signing_key = SigningKey::from_slice(&keypair.private).unwrap();
        let verifying_key = VerifyingKey::from(&signing_key);
        let parsed = EcdsaSignature::from_der(&signature).unwrap();
        verifying_key.verify_prehash(&digest, &parsed).unwrap();
    }

    #[test]
    fn gcm_round_trip_and_tamper_detection() {
        let mut crypto = crypto();
        let key = [0x01; 32];
        let iv = [0x02; 12];
        let aad = [0x03; 32];

        let mut buf = *b"exactly thirty-two bytes of key!";
        let plaintext = buf;
        let tag = crypto.aes256_gcm_encrypt(&key, &iv, &aad, &mut buf).unwrap();
        assert_ne!(buf, plaintext);

        crypto
            .aes256_gcm_decrypt(&key, &iv, &aad, &mut buf, &tag)
            .unwrap();
        assert_eq!(buf, plaintext);

        let mut tampered_tag = tag;
        tampered_tag[0] ^= 1;
        assert_eq!(
            crypto.aes256_gcm_decrypt(&key, &iv, &aad, &mut buf, &tampered_tag),
            Err(Error::AuthTagMismatch)
        );
    }

    #[test]
    fn ram_store_round_trips_and_overwrites() {
        let mut ram = RamStore::new();
        let mut buf = [0u8; 32];
        assert_eq!(ram.fetch("counter", &mut buf), Ok(None));

        ram.persist("counter", &7u32.to_le_bytes()).unwrap();
        assert_eq!(ram.fetch("counter", &mut buf), Ok(Some(4)));
        assert_eq!(u32::from_le_bytes(buf[..4].try_into().unwrap()), 7);

        ram.persist("counter", &8u32.to_le_bytes()).unwrap();
        assert_eq!(ram.fetch("counter", &mut buf), Ok(Some(4)));
        assert_eq!(u32::from_le_bytes(buf[..4].try_into().unwrap()), 8);
    }
}
