//! The request engine: CTAP1 and CTAP2 semantics on top of the crypto,
//! store and board facades.
//!
//! [`Authenticator`] owns the [`DeviceState`] singleton and is handed to
//! the HID pipe as its [`App`]. All state mutation (the signature
//! counter) goes through the store facade, and the durable write always
//! completes before a signature leaves the device.

use iso7816::Status;

use crate::cbor;
use crate::cose::P256PublicKey;
use crate::credential;
use crate::crypto::{Crypto, Keypair};
use crate::ctap1;
use crate::ctap2::{
    self, get_assertion, get_info, make_credential, AuthenticatorDataFlags, Operation,
};
use crate::hid::{App, ErrorCode, Reply, KEEPALIVE_INTERVAL_MS};
use crate::store::{self, DeviceState, Store};

/// ECDSA P-256 attestation private key, embedded at build time.
///
/// Shared by every device built from this source, which is acceptable
/// only for a reference design: compromise of one device taints the
/// attestations of all. Production provisions a unique per-device key
/// at manufacture.
pub const ATTESTATION_PRIVATE_KEY: [u8; 32] = [
    0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, //
    0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, //
    0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, //
    0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88,
];

/// Attestation certificate placeholder: an empty DER SEQUENCE. Lenient
/// test clients tolerate it; a deployment embeds a real X.509
/// certificate for [`ATTESTATION_PRIVATE_KEY`] here.
pub const ATTESTATION_CERTIFICATE: &[u8] = &[0x30, 0x00];

/// How long the device waits for the button before giving up on a
/// user-presence check.
pub const USER_PRESENCE_TIMEOUT_MS: u32 = 30_000;

/// Board glue: time, button, LED.
pub trait Board {
    /// Milliseconds since boot. Must be monotonic and advance between
    /// calls, the user-presence wait spins on it.
    fn now_ms(&mut self) -> u32;

    /// Sample the user-presence button. Non-blocking; consuming a press
    /// (so one touch satisfies one request) is the board's business.
    fn user_present(&mut self) -> bool;

    /// The host asked the device to identify itself.
    fn wink(&mut self);
}

pub struct Authenticator<C: Crypto, S: Store, B: Board> {
    crypto: C,
    store: S,
    board: B,
    state: DeviceState,
}

impl<C: Crypto, S: Store, B: Board> Authenticator<C, S, B> {
    /// Load or provision persistent state and build the engine.
    pub fn new(mut crypto: C, mut store: S, board: B) -> store::Result<Self> {
        let state = DeviceState::load(&mut store, &mut crypto)?;
        Ok(Self {
            crypto,
            store,
            board,
            state,
        })
    }

    /// Current signature counter (diagnostics and tests).
    pub fn sign_count(&self) -> u32 {
        self.state.counter()
    }

    /// Mutable access to the board; host-side simulations toggle the
    /// button through this.
    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    /// Tear down into the facades. Host-side simulations use this to
    /// model a reboot: keep the store, rebuild the engine.
    pub fn into_parts(self) -> (C, S, B) {
        (self.crypto, self.store, self.board)
    }

    /// Spin-poll the button up to [`USER_PRESENCE_TIMEOUT_MS`], emitting
    /// a keepalive roughly every 100 ms so the host does not time out.
    fn user_presence(&mut self, keepalive: &mut dyn FnMut()) -> bool {
        let started = self.board.now_ms();
        let mut last_keepalive = None;
        loop {
            if self.board.user_present() {
                return true;
            }
            let now = self.board.now_ms();
            if now.wrapping_sub(started) >= USER_PRESENCE_TIMEOUT_MS {
                return false;
            }
            let due = match last_keepalive {
                None => true,
                Some(at) => now.wrapping_sub(at) >= KEEPALIVE_INTERVAL_MS,
            };
            if due {
                keepalive();
                last_keepalive = Some(now);
            }
        }
    }

    // === CTAP1 ===

    pub fn call_ctap1(
        &mut self,
        request: &ctap1::Request,
        keepalive: &mut dyn FnMut(),
    ) -> ctap1::Result<ctap1::Response> {
        match request {
            ctap1::Request::Version => Ok(ctap1::Response::Version(ctap1::VERSION)),
            ctap1::Request::Register(register) => {
                debug_now!("CTAP1.REG");
                Ok(ctap1::Response::Register(self.register(register, keepalive)?))
            }
            ctap1::Request::Authenticate(authenticate) => {
                debug_now!("CTAP1.AUTH");
                Ok(ctap1::Response::Authenticate(
                    self.authenticate(authenticate, keepalive)?,
                ))
            }
        }
    }

    fn register(
        &mut self,
        request: &ctap1::register::Request,
        keepalive: &mut dyn FnMut(),
    ) -> ctap1::Result<ctap1::register::Response> {
        if !self.user_presence(keepalive) {
            return Err(Status::ConditionsOfUseNotSatisfied);
        }

        let app_id: [u8; 32] = request.app_id[..]
            .try_into()
            .map_err(|_| Status::IncorrectDataParameter)?;

        let Keypair { private, public } = self.crypto.p256_generate();
        let key_handle = credential::wrap(
            &mut self.crypto,
            self.state.master_key(),
            &app_id,
            &private,
        )
        .map_err(|_| Status::UnspecifiedNonpersistentExecutionError)?;

        // Sign(0x00 ‖ appParam ‖ challenge ‖ keyHandle ‖ publicKey)
        let mut preimage = heapless::Vec::<u8, 200>::new();
        preimage.push(0x00).unwrap();
        preimage.extend_from_slice(&app_id).unwrap();
        preimage.extend_from_slice(&request.challenge).unwrap();
        preimage.extend_from_slice(&key_handle).unwrap();
        preimage.extend_from_slice(&public).unwrap();
        let digest = self.crypto.sha256(&preimage);
        let signature = self
            .crypto
            .p256_sign(&ATTESTATION_PRIVATE_KEY, &digest)
            .map_err(|_| Status::UnspecifiedNonpersistentExecutionError)?;

        Ok(ctap1::register::Response::new(
            &public,
            &key_handle,
            ATTESTATION_CERTIFICATE,
            signature,
        ))
    }

    fn authenticate(
        &mut self,
        request: &ctap1::authenticate::Request,
        keepalive: &mut dyn FnMut(),
    ) -> ctap1::Result<ctap1::authenticate::Response> {
        use ctap1::ControlByte;

        let app_id: [u8; 32] = request.app_id[..]
            .try_into()
            .map_err(|_| Status::IncorrectDataParameter)?;

        match request.control_byte {
            ControlByte::CheckOnly => {
                // a valid handle still needs user presence, which this
                // mode never provides
                return match credential::unwrap(
                    &mut self.crypto,
                    self.state.master_key(),
                    &app_id,
                    &request.key_handle,
                ) {
                    Ok(_) => Err(Status::ConditionsOfUseNotSatisfied),
                    Err(_) => Err(Status::IncorrectDataParameter),
                };
            }
            ControlByte::EnforceUserPresenceAndSign => {
                if !self.user_presence(keepalive) {
                    return Err(Status::ConditionsOfUseNotSatisfied);
                }
            }
            ControlByte::DontEnforceUserPresenceAndSign => {}
        }

        let private = credential::unwrap(
            &mut self.crypto,
            self.state.master_key(),
            &app_id,
            &request.key_handle,
        )
        .map_err(|_| Status::IncorrectDataParameter)?;

        let user_presence = match request.control_byte {
            ControlByte::EnforceUserPresenceAndSign => 0x01,
            _ => 0x00,
        };

        // persist the counter, then sign, then reply: a crash after this
        // line can only lose a count, never repeat one
        let count = self
            .state
            .increment_counter(&mut self.store)
            .map_err(|_| Status::UnspecifiedPersistentExecutionError)?;

        // Sign(appParam ‖ UP ‖ counter ‖ challenge)
        let mut preimage = heapless::Vec::<u8, 69>::new();
        preimage.extend_from_slice(&app_id).unwrap();
        preimage.push(user_presence).unwrap();
        preimage.extend_from_slice(&count.to_be_bytes()).unwrap();
        preimage.extend_from_slice(&request.challenge).unwrap();
        let digest = self.crypto.sha256(&preimage);
        let signature = self
            .crypto
            .p256_sign(&private, &digest)
            .map_err(|_| Status::UnspecifiedNonpersistentExecutionError)?;

        Ok(ctap1::authenticate::Response {
            user_presence,
            count,
            signature,
        })
    }

    // === CTAP2 ===

    fn try_cbor(
        &mut self,
        request: &[u8],
        reply: &mut Reply,
        keepalive: &mut dyn FnMut(),
    ) -> ctap2::Result<()> {
        let (&operation, parameters) = request
            .split_first()
            .ok_or(ctap2::Error::InvalidLength)?;
        let operation =
            Operation::try_from(operation).map_err(|()| ctap2::Error::UnsupportedOption)?;

        match operation {
            Operation::GetInfo => {
                debug_now!("CTAP2.GI");
                serialize_response(reply, |writer| {
                    get_info::Response::default().serialize(writer)
                })
            }

            Operation::MakeCredential => {
                debug_now!("CTAP2.MC");
                let request = make_credential::Request::parse(parameters)?;
                let response = self.make_credential(&request, keepalive)?;
                serialize_response(reply, |writer| response.serialize(writer))
            }

            Operation::GetAssertion => {
                debug_now!("CTAP2.GA");
                let request = get_assertion::Request::parse(parameters)?;
                let response = self.get_assertion(&request, keepalive)?;
                serialize_response(reply, |writer| response.serialize(writer))
            }

            // no PIN, no reset, no multi-credential iteration
            Operation::ClientPin | Operation::Reset | Operation::GetNextAssertion => {
                Err(ctap2::Error::UnsupportedOption)
            }
        }
    }

    fn make_credential(
        &mut self,
        request: &make_credential::Request,
        keepalive: &mut dyn FnMut(),
    ) -> ctap2::Result<make_credential::Response> {
        if !self.user_presence(keepalive) {
            return Err(ctap2::Error::OperationDenied);
        }

        let rp_id_hash = self.crypto.sha256(request.rp_id.as_bytes());
        let Keypair { private, public } = self.crypto.p256_generate();
        let key_handle = credential::wrap(
            &mut self.crypto,
            self.state.master_key(),
            &rp_id_hash,
            &private,
        )
        .map_err(|_| ctap2::Error::Other)?;
        let public_key = P256PublicKey::from_uncompressed(&public);

        let auth_data = ctap2::serialize_authenticator_data(
            &rp_id_hash,
            AuthenticatorDataFlags::USER_PRESENCE
                | AuthenticatorDataFlags::ATTESTED_CREDENTIAL_DATA,
            self.state.counter(),
            Some((&key_handle, &public_key)),
        )?;

        // packed attestation over authData ‖ clientDataHash
        let digest = self.attestation_digest(&auth_data, request.client_data_hash)?;
        let signature = self
            .crypto
            .p256_sign(&ATTESTATION_PRIVATE_KEY, &digest)
            .map_err(|_| ctap2::Error::Other)?;

        Ok(make_credential::Response {
            auth_data,
            att_stmt_signature: signature,
        })
    }

    fn get_assertion(
        &mut self,
        request: &get_assertion::Request,
        keepalive: &mut dyn FnMut(),
    ) -> ctap2::Result<get_assertion::Response> {
        let rp_id_hash = self.crypto.sha256(request.rp_id.as_bytes());

        // the first allowList entry that unwraps under this RP is it
        let mut selected = None;
        if let Some(raw) = request.allow_list {
            for id in get_assertion::AllowList::new(raw)? {
                let id = id?;
                if let Ok(private) = credential::unwrap(
                    &mut self.crypto,
                    self.state.master_key(),
                    &rp_id_hash,
                    id,
                ) {
                    let credential_id: credential::KeyHandle =
                        id.try_into().map_err(|_| ctap2::Error::Other)?;
                    selected = Some((credential_id, private));
                    break;
                }
            }
        }
        let (credential_id, private) = selected.ok_or(ctap2::Error::NoCredentials)?;

        if !self.user_presence(keepalive) {
            return Err(ctap2::Error::OperationDenied);
        }

        let count = self
            .state
            .increment_counter(&mut self.store)
            .map_err(|error| match error {
                store::Error::CounterExhausted => ctap2::Error::OperationDenied,
                store::Error::Storage => ctap2::Error::Other,
            })?;

        let auth_data = ctap2::serialize_authenticator_data(
            &rp_id_hash,
            AuthenticatorDataFlags::USER_PRESENCE,
            count,
            None,
        )?;

        let digest = self.attestation_digest(&auth_data, request.client_data_hash)?;
        let signature = self
            .crypto
            .p256_sign(&private, &digest)
            .map_err(|_| ctap2::Error::Other)?;

        Ok(get_assertion::Response {
            credential_id,
            auth_data,
            signature,
        })
    }

    /// SHA-256 over `authData ‖ clientDataHash`, the preimage of both
    /// attestation and assertion signatures.
    fn attestation_digest(
        &mut self,
        auth_data: &[u8],
        client_data_hash: &[u8; 32],
    ) -> ctap2::Result<[u8; 32]> {
        let mut preimage =
            heapless::Vec::<u8, { ctap2::AUTHENTICATOR_DATA_LENGTH + 32 }>::new();
        preimage
            .extend_from_slice(auth_data)
            .map_err(|_| ctap2::Error::Other)?;
        preimage
            .extend_from_slice(client_data_hash)
            .map_err(|_| ctap2::Error::Other)?;
        Ok(self.crypto.sha256(&preimage))
    }
}

/// Status byte, then the CBOR body, then trim to what was written.
fn serialize_response(
    reply: &mut Reply,
    f: impl FnOnce(&mut cbor::Writer),
) -> ctap2::Result<()> {
    reply.push(0).map_err(|_| ctap2::Error::Other)?;
    let capacity = reply.capacity();
    reply
        .resize_default(capacity)
        .map_err(|_| ctap2::Error::Other)?;
    let mut writer = cbor::Writer::new(&mut reply[1..]);
    f(&mut writer);
    match writer.finish() {
        Ok(length) => {
            reply.truncate(1 + length);
            Ok(())
        }
        // encoder overflow is an internal bug, not a protocol status
        Err(_) => Err(ctap2::Error::Other),
    }
}

impl<C: Crypto, S: Store, B: Board> App for Authenticator<C, S, B> {
    fn msg(
        &mut self,
        request: &[u8],
        reply: &mut Reply,
        keepalive: &mut dyn FnMut(),
    ) -> core::result::Result<(), ErrorCode> {
        let response = ctap1::Command::try_from(request)
            .map_err(|_| Status::IncorrectDataParameter)
            .and_then(|command| ctap1::Request::try_from(&command))
            .and_then(|request| self.call_ctap1(&request, keepalive));

        let status: u16 = match response {
            Ok(response) => {
                if response.serialize(reply).is_err() {
                    reply.clear();
                    return Err(ErrorCode::Other);
                }
                ctap1::NO_ERROR
            }
            Err(status) => {
                reply.clear();
                status.into()
            }
        };
        reply
            .extend_from_slice(&status.to_be_bytes())
            .map_err(|_| ErrorCode::Other)?;
        Ok(())
    }

    fn cbor(
        &mut self,
        request: &[u8],
        reply: &mut Reply,
        keepalive: &mut dyn FnMut(),
    ) -> core::result::Result<(), ErrorCode> {
        match self.try_cbor(request, reply, keepalive) {
            Ok(()) => Ok(()),
            // internal failure: escalate to a HID ERROR frame
            Err(ctap2::Error::Other) => Err(ErrorCode::Other),
            Err(error) => {
                reply.clear();
                reply.push(error as u8).map_err(|_| ErrorCode::Other)?;
                Ok(())
            }
        }
    }

    fn wink(&mut self) {
        self.board.wink();
    }
}
