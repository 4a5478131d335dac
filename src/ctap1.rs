//! CTAP1 (U2F) protocol: APDU model and wire mapping.
//!
//! Requests arrive as short-form ISO 7816-4 APDUs inside U2FHID_MSG
//! frames; responses are `DATA ‖ SW1 SW2`.

use crate::crypto::Signature;
use crate::Bytes;

pub const NO_ERROR: u16 = 0x9000;

/// Re-export of the iso7816::Status.
pub use iso7816::Status as Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Largest APDU body the device accepts.
pub const MAX_COMMAND_DATA: usize = 1024;

pub type Command = iso7816::Command<MAX_COMMAND_DATA>;

pub mod register {
    use super::{Bytes, Signature};

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct Request {
        pub challenge: Bytes<32>,
        pub app_id: Bytes<32>,
    }

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct Response {
        pub header_byte: u8,
        pub public_key: Bytes<65>,
        pub key_handle: Bytes<255>,
        pub attestation_certificate: Bytes<1024>,
        pub signature: Signature,
    }

    impl Response {
        pub fn new(
            public_key: &[u8; 65],
            key_handle: &[u8],
            attestation_certificate: &[u8],
            signature: Signature,
        ) -> Self {
            debug_assert!(key_handle.len() <= 255);
            debug_assert!(attestation_certificate.len() <= 1024);

            Self {
                header_byte: 0x05,
                public_key: Bytes::from_slice(public_key).unwrap(),
                key_handle: Bytes::from_slice(key_handle).unwrap(),
                attestation_certificate: Bytes::from_slice(attestation_certificate).unwrap(),
                signature,
            }
        }
    }
}

pub mod authenticate {
    use super::{Bytes, ControlByte, Signature};

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct Request {
        pub control_byte: ControlByte,
        pub challenge: Bytes<32>,
        pub app_id: Bytes<32>,
        pub key_handle: Bytes<255>,
    }

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct Response {
        pub user_presence: u8,
        pub count: u32,
        pub signature: Signature,
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlByte {
    /// Probe whether the handle belongs to this device; never signs.
    CheckOnly = 0x07,
    EnforceUserPresenceAndSign = 0x03,
    DontEnforceUserPresenceAndSign = 0x08,
}

impl TryFrom<u8> for ControlByte {
    type Error = Error;

    fn try_from(byte: u8) -> Result<ControlByte> {
        match byte {
            0x07 => Ok(ControlByte::CheckOnly),
            0x03 => Ok(ControlByte::EnforceUserPresenceAndSign),
            0x08 => Ok(ControlByte::DontEnforceUserPresenceAndSign),
            _ => Err(Error::IncorrectDataParameter),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[allow(clippy::large_enum_variant)]
/// Enum of all CTAP1 requests.
pub enum Request {
    Register(register::Request),
    Authenticate(authenticate::Request),
    Version,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[allow(clippy::large_enum_variant)]
/// Enum of all CTAP1 responses.
pub enum Response {
    Register(register::Response),
    Authenticate(authenticate::Response),
    Version([u8; 6]),
}

pub const VERSION: [u8; 6] = *b"U2F_V2";

impl Response {
    #[allow(clippy::result_unit_err)]
    pub fn serialize<const S: usize>(
        &self,
        buf: &mut iso7816::Data<S>,
    ) -> core::result::Result<(), ()> {
        match self {
            Response::Register(reg) => {
                buf.push(reg.header_byte).map_err(drop)?;
                buf.extend_from_slice(&reg.public_key)?;
                buf.push(reg.key_handle.len() as u8).map_err(drop)?;
                buf.extend_from_slice(&reg.key_handle)?;
                buf.extend_from_slice(&reg.attestation_certificate)?;
                buf.extend_from_slice(&reg.signature)
            }
            Response::Authenticate(auth) => {
                buf.push(auth.user_presence).map_err(drop)?;
                buf.extend_from_slice(&auth.count.to_be_bytes())?;
                buf.extend_from_slice(&auth.signature)
            }
            Response::Version(version) => buf.extend_from_slice(version),
        }
    }
}

impl<const S: usize> TryFrom<&iso7816::Command<S>> for Request {
    type Error = Error;

    fn try_from(apdu: &iso7816::Command<S>) -> Result<Request> {
        let cla = apdu.class().into_inner();
        let ins = match apdu.instruction() {
            iso7816::Instruction::Unknown(ins) => ins,
            _ins => 0,
        };
        let p1 = apdu.p1;

        if cla != 0 {
            return Err(Error::ClassNotSupported);
        }

        if ins == 0x3 {
            // for some weird historical reason, [0, 3, 0, 0, 0, 0, 0, 0, 0]
            // is valid to send here.
            return Ok(Request::Version);
        };

        let request = apdu.data();

        match ins {
            // register
            0x1 => {
                if request.len() != 64 {
                    return Err(Error::WrongLength);
                }
                Ok(Request::Register(register::Request {
                    challenge: Bytes::from_slice(&request[..32]).unwrap(),
                    app_id: Bytes::from_slice(&request[32..]).unwrap(),
                }))
            }

            // authenticate
            0x2 => {
                let control_byte = ControlByte::try_from(p1)?;
                if request.len() < 65 {
                    return Err(Error::WrongLength);
                }
                let key_handle_length = request[64] as usize;
                if request.len() != 65 + key_handle_length {
                    return Err(Error::WrongLength);
                }
                Ok(Request::Authenticate(authenticate::Request {
                    control_byte,
                    challenge: Bytes::from_slice(&request[..32]).unwrap(),
                    app_id: Bytes::from_slice(&request[32..64]).unwrap(),
                    key_handle: Bytes::from_slice(&request[65..]).unwrap(),
                }))
            }

            _ => Err(Error::InstructionNotSupportedOrInvalid),
        }
    }
}
