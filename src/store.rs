//! Persistent key-value facade and the device state it backs.
//!
//! Exactly two values survive reboots: the device master key and the
//! signature counter. [`DeviceState`] caches both and is the only path
//! through which they are read or written; processors receive it by
//! reference from the request dispatcher.

use crate::crypto::Crypto;

/// Namespace key for the 32-byte device master key.
pub const MASTER_KEY: &str = "master_key";
/// Namespace key for the signature counter, 4 bytes little-endian.
pub const COUNTER: &str = "counter";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// The backing store failed or returned a malformed value.
    Storage,
    /// The signature counter reached its maximum. The device refuses
    /// further assertions rather than letting the counter roll over.
    CounterExhausted,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Opaque durable key-value storage supplied by the board.
///
/// `persist` must be atomic with respect to power loss (store, then
/// commit) and must have completed when it returns.
pub trait Store {
    /// Read the value under `key` into `buf`; `None` when absent.
    fn fetch(&mut self, key: &str, buf: &mut [u8]) -> Result<Option<usize>>;

    /// Durably write `value` under `key`.
    fn persist(&mut self, key: &str, value: &[u8]) -> Result<()>;
}

/// The mutable singleton state of the device.
pub struct DeviceState {
    master_key: [u8; 32],
    counter: u32,
}

impl DeviceState {
    /// Load persisted state, provisioning on first boot: a fresh master
    /// key from the TRNG, and the counter at 1.
    pub fn load<S: Store, C: Crypto>(store: &mut S, crypto: &mut C) -> Result<Self> {
        let mut master_key = [0u8; 32];
        match store.fetch(MASTER_KEY, &mut master_key)? {
            Some(32) => {}
            None => {
                info!("generating device master key");
                crypto.fill_random(&mut master_key);
                store.persist(MASTER_KEY, &master_key)?;
            }
            Some(_) => return Err(Error::Storage),
        }

        let mut bytes = [0u8; 4];
        let counter = match store.fetch(COUNTER, &mut bytes)? {
            Some(4) => u32::from_le_bytes(bytes),
            None => {
                store.persist(COUNTER, &1u32.to_le_bytes())?;
                1
            }
            Some(_) => return Err(Error::Storage),
        };

        Ok(Self {
            master_key,
            counter,
        })
    }

    /// The wrapping key. Generated once, immutable afterwards.
    pub fn master_key(&self) -> &[u8; 32] {
        &self.master_key
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Increment the signature counter and return the new value.
    ///
    /// The durable write completes before the value is released, so a
    /// crash after this point can never surface a signature whose
    /// counter later decreases.
    pub fn increment_counter<S: Store>(&mut self, store: &mut S) -> Result<u32> {
        let next = self
            .counter
            .checked_add(1)
            .ok_or(Error::CounterExhausted)?;
        store.persist(COUNTER, &next.to_le_bytes())?;
        self.counter = next;
        Ok(next)
    }
}
