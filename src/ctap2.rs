//! CTAP2 protocol: operations, status codes and authenticator data.
//!
//! A CTAP2 request is one command byte followed by a single CBOR map of
//! parameters; the reply is one status byte followed by an optional CBOR
//! map. Parameter maps are decoded with the two-pass scheme described in
//! the submodules so that key order never matters.

use bitflags::bitflags;

use crate::cbor;
use crate::cose::P256PublicKey;
use crate::credential::{KeyHandle, KEY_HANDLE_LENGTH};
use crate::Bytes;

pub mod get_assertion;
pub mod get_info;
pub mod make_credential;

pub type Result<T> = core::result::Result<T, Error>;

/// Authenticator Attestation GUID. All-zero: this reference design does
/// not claim a certified device model.
pub const AAGUID: [u8; 16] = [0; 16];

/// Upper bound on a serialized authenticator-data blob
/// (`32 + 1 + 4` header plus attested credential data and COSE key).
pub const AUTHENTICATOR_DATA_LENGTH: usize = 256;

pub type AuthenticatorData = Bytes<AUTHENTICATOR_DATA_LENGTH>;

/// The authenticator API, consisting of "operations".
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Operation {
    MakeCredential,
    GetAssertion,
    GetNextAssertion,
    GetInfo,
    ClientPin,
    Reset,
}

impl TryFrom<u8> for Operation {
    type Error = ();

    fn try_from(from: u8) -> core::result::Result<Operation, ()> {
        use Operation::*;
        Ok(match from {
            0x01 => MakeCredential,
            0x02 => GetAssertion,
            0x04 => GetInfo,
            0x06 => ClientPin,
            0x07 => Reset,
            0x08 => GetNextAssertion,
            _ => return Err(()),
        })
    }
}

/// CTAP2 status codes surfaced by this device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    InvalidCommand = 0x01,
    InvalidParameter = 0x02,
    InvalidLength = 0x11,
    InvalidCbor = 0x12,
    MissingParameter = 0x14,
    UnsupportedAlgorithm = 0x26,
    OperationDenied = 0x27,
    UnsupportedOption = 0x2B,
    NoCredentials = 0x2E,
    Other = 0x7F,
}

impl From<cbor::Error> for Error {
    fn from(_error: cbor::Error) -> Error {
        Error::InvalidCbor
    }
}

bitflags! {
    pub struct AuthenticatorDataFlags: u8 {
        const USER_PRESENCE = 1 << 0;
        const USER_VERIFIED = 1 << 2;
        const ATTESTED_CREDENTIAL_DATA = 1 << 6;
        const EXTENSION_DATA = 1 << 7;
    }
}

/// Serialize authenticator data. This layout is flat binary, not CBOR,
/// for compatibility with U2F authentication signatures; only the
/// embedded COSE key is CBOR.
pub fn serialize_authenticator_data(
    rp_id_hash: &[u8; 32],
    flags: AuthenticatorDataFlags,
    sign_count: u32,
    attested_credential: Option<(&KeyHandle, &P256PublicKey)>,
) -> Result<AuthenticatorData> {
    let mut bytes = AuthenticatorData::new();

    bytes
        .extend_from_slice(rp_id_hash)
        .map_err(|_| Error::Other)?;
    bytes.push(flags.bits()).map_err(|_| Error::Other)?;
    // signature count as 32-bit unsigned big-endian integer
    bytes
        .extend_from_slice(&sign_count.to_be_bytes())
        .map_err(|_| Error::Other)?;

    if let Some((credential_id, public_key)) = attested_credential {
        bytes.extend_from_slice(&AAGUID).map_err(|_| Error::Other)?;
        bytes
            .extend_from_slice(&(KEY_HANDLE_LENGTH as u16).to_be_bytes())
            .map_err(|_| Error::Other)?;
        bytes
            .extend_from_slice(credential_id)
            .map_err(|_| Error::Other)?;

        let mut cose = [0u8; 96];
        let mut writer = cbor::Writer::new(&mut cose);
        public_key.encode(&mut writer);
        let length = writer.finish().map_err(|_| Error::Other)?;
        bytes
            .extend_from_slice(&cose[..length])
            .map_err(|_| Error::Other)?;
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assertion_authenticator_data_is_minimal() {
        let data = serialize_authenticator_data(
            &[0x11; 32],
            AuthenticatorDataFlags::USER_PRESENCE,
            0x01020304,
            None,
        )
        .unwrap();
        assert_eq!(data.len(), 37);
        assert_eq!(&data[..32], &[0x11; 32]);
        assert_eq!(data[32], 0x01);
        assert_eq!(&data[33..], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn attested_authenticator_data_layout() {
        let key = P256PublicKey {
            x: [0xaa; 32],
            y: [0xbb; 32],
        };
        let credential_id = [0xcc; KEY_HANDLE_LENGTH];
        let data = serialize_authenticator_data(
            &[0x11; 32],
            AuthenticatorDataFlags::USER_PRESENCE
                | AuthenticatorDataFlags::ATTESTED_CREDENTIAL_DATA,
            7,
            Some((&credential_id, &key)),
        )
        .unwrap();

        assert_eq!(data[32], 0x41);
        assert_eq!(&data[37..53], &AAGUID);
        assert_eq!(&data[53..55], &[0x00, 60]);
        assert_eq!(&data[55..115], &credential_id);
        // the rest is the COSE key map
        let mut reader = cbor::Reader::new(&data[115..]);
        assert_eq!(reader.map().unwrap(), 5);
    }
}
