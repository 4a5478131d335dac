//! FIDO HID transport.
//!
//! Every USB report is exactly 64 bytes. A transaction is one request
//! message followed by one response message, each spread over an
//! initialization packet and up to 128 continuation packets:
//!
//! ```text
//! init:         CID(4) ‖ CMD|0x80 (1) ‖ BCNT (2, big-endian) ‖ DATA(57)
//! continuation: CID(4) ‖ SEQ (1, MSB clear) ‖ DATA(59)
//! ```
//!
//! [`pipe::Pipe`] owns the channel state machine and hands reassembled
//! messages to an [`App`].

pub mod pipe;

pub use pipe::Pipe;

pub const PACKET_SIZE: usize = 64;

/// Payload capacity of an initialization packet.
pub const INIT_PAYLOAD_SIZE: usize = PACKET_SIZE - 7;
/// Payload capacity of a continuation packet.
pub const CONT_PAYLOAD_SIZE: usize = PACKET_SIZE - 5;
/// The protocol caps a message at one initialization packet plus 128
/// continuations: 7609 bytes.
pub const MESSAGE_SIZE: usize = INIT_PAYLOAD_SIZE + 128 * CONT_PAYLOAD_SIZE;

pub const BROADCAST_CHANNEL: u32 = 0xffff_ffff;
pub const RESERVED_CHANNEL: u32 = 0;

/// Milliseconds allowed between fragments of one message.
pub const TRANSACTION_TIMEOUT_MS: u32 = 500;
/// Idle channels may be recycled after this much inactivity.
pub const CHANNEL_EXPIRY_MS: u32 = 30_000;
/// Cadence of KEEPALIVE frames while the device waits on the button.
pub const KEEPALIVE_INTERVAL_MS: u32 = 100;

/// KEEPALIVE status: the authenticator is waiting for user presence.
pub const STATUS_UPNEEDED: u8 = 0x02;

/// INIT reply trailer.
pub const PROTOCOL_VERSION: u8 = 2;
pub const DEVICE_VERSION_MAJOR: u8 = 1;
pub const DEVICE_VERSION_MINOR: u8 = 0;
pub const DEVICE_VERSION_BUILD: u8 = 0;
/// Capability flags announced in the INIT reply.
pub const CAPABILITIES: u8 = 0;

pub type Packet = [u8; PACKET_SIZE];

/// Staging buffer for one reply message. Large enough for the biggest
/// reply the processors produce (a REGISTER response with certificate).
pub const REPLY_SIZE: usize = 1200;

pub type Reply = heapless::Vec<u8, REPLY_SIZE>;

/// HID commands, identified by the low seven bits of the command byte
/// (the wire form has the MSB set: PING=0x81, MSG=0x83, …, CBOR=0x90).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    // mandatory for CTAP1
    Ping = 0x01,
    Msg = 0x03,
    Init = 0x06,
    Error = 0x3f,

    // optional
    Lock = 0x04,
    Wink = 0x08,

    // mandatory for CTAP2
    Cbor = 0x10,
    KeepAlive = 0x3b,
}

impl TryFrom<u8> for Command {
    type Error = ();

    fn try_from(from: u8) -> core::result::Result<Command, ()> {
        match from {
            0x01 => Ok(Command::Ping),
            0x03 => Ok(Command::Msg),
            0x04 => Ok(Command::Lock),
            0x06 => Ok(Command::Init),
            0x08 => Ok(Command::Wink),
            0x10 => Ok(Command::Cbor),
            0x3b => Ok(Command::KeepAlive),
            0x3f => Ok(Command::Error),
            _ => Err(()),
        }
    }
}

/// Error codes carried in an ERROR (0xBF) frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    InvalidCommand = 0x01,
    InvalidParameter = 0x02,
    InvalidLength = 0x03,
    InvalidSequence = 0x04,
    MessageTimeout = 0x05,
    ChannelBusy = 0x06,
    InvalidChannel = 0x0b,
    Other = 0x7f,
}

/// Sink for 64-byte IN reports, implemented by the USB driver (or a
/// test harness).
pub trait HidBus {
    fn write_report(&mut self, packet: &Packet);
}

/// The protocol engine behind the transport.
///
/// Replies are written into `reply` and framed by the transport. An
/// `Err` is reserved for internal failures (encoder overflow, corrupted
/// state): it becomes a HID ERROR frame and resets the channel.
/// Protocol-level failures travel inside the reply payload as status
/// words or CTAP2 status bytes.
pub trait App {
    /// U2FHID_MSG: a CTAP1 APDU. The reply includes the status word.
    fn msg(
        &mut self,
        request: &[u8],
        reply: &mut Reply,
        keepalive: &mut dyn FnMut(),
    ) -> core::result::Result<(), ErrorCode>;

    /// U2FHID_CBOR: a CTAP2 command byte plus parameter map. The reply
    /// is one status byte plus an optional CBOR map.
    fn cbor(
        &mut self,
        request: &[u8],
        reply: &mut Reply,
        keepalive: &mut dyn FnMut(),
    ) -> core::result::Result<(), ErrorCode>;

    /// U2FHID_WINK: blink for the user.
    fn wink(&mut self);
}
