#![cfg_attr(not(test), no_std)]

//! Firmware core of a USB-attached FIDO2/U2F security key.
//!
//! A host report enters at [`hid::Pipe`], which reassembles the message
//! and dispatches by HID command: U2FHID_MSG payloads go to the CTAP1
//! APDU processor, U2FHID_CBOR payloads to the CTAP2 processor. Both
//! live in [`authenticator::Authenticator`], which seals per-credential
//! private keys into their own credential IDs ([`credential`]) so the
//! device holds no per-registration state at all.
//!
//! Hardware services stay behind traits: [`crypto::Crypto`] for the
//! accelerator, [`store::Store`] for persistence, and
//! [`authenticator::Board`] for button, LED and clock. The `softtoken`
//! feature fills all three with software so the complete device runs on
//! a host, which is how the test suite drives it.

#[macro_use]
extern crate delog;
generate_macros!();

pub use heapless;
pub use heapless_bytes;
pub use heapless_bytes::Bytes;

pub mod authenticator;
pub mod cbor;
pub mod cose;
pub mod credential;
pub mod crypto;
pub mod ctap1;
pub mod ctap2;
pub mod descriptors;
pub mod hid;
#[cfg(feature = "softtoken")]
pub mod softtoken;
pub mod store;

pub use authenticator::{Authenticator, Board};
pub use hid::Pipe;
