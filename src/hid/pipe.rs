//! Channel allocation, packet reassembly and reply fragmentation.
//!
//! One transaction is in flight at a time. The reassembly buffer has an
//! explicit owner channel; initialization packets from other channels
//! are answered with ERR_CHANNEL_BUSY while it is occupied. A CTAPHID
//! INIT on the owning channel aborts the transaction and resynchronizes
//! it; 500 ms of silence between fragments abandons it with
//! ERR_MSG_TIMEOUT.

use super::{
    App, Command, ErrorCode, HidBus, Packet, Reply, BROADCAST_CHANNEL, CAPABILITIES,
    CHANNEL_EXPIRY_MS, CONT_PAYLOAD_SIZE, DEVICE_VERSION_BUILD, DEVICE_VERSION_MAJOR,
    DEVICE_VERSION_MINOR, INIT_PAYLOAD_SIZE, MESSAGE_SIZE, PACKET_SIZE, PROTOCOL_VERSION,
    RESERVED_CHANNEL, STATUS_UPNEEDED, TRANSACTION_TIMEOUT_MS,
};

const MAX_CHANNELS: usize = 8;

/// The header of the message being reassembled; the payload lives in
/// the pipe's buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Request {
    channel: u32,
    command: Command,
    length: u16,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    Idle,
    Receiving {
        request: Request,
        // expected sequence number of the next continuation packet
        expected_sequence: u8,
        // bytes of payload received so far
        received: usize,
        last_fragment_ms: u32,
    },
}

#[derive(Copy, Clone)]
struct Channel {
    id: u32,
    last_seen_ms: u32,
}

/// Allocated channel IDs with their last activity, for expiry-based
/// recycling. IDs are issued monotonically and never collide with the
/// reserved or broadcast values.
struct ChannelTable {
    next_id: u32,
    entries: [Option<Channel>; MAX_CHANNELS],
}

impl ChannelTable {
    const fn new() -> Self {
        Self {
            next_id: 0,
            entries: [None; MAX_CHANNELS],
        }
    }

    fn allocate(&mut self, now_ms: u32) -> u32 {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id != RESERVED_CHANNEL && self.next_id != BROADCAST_CHANNEL {
                break;
            }
        }
        let id = self.next_id;

        let slot = self.free_slot(now_ms).unwrap_or_else(|| self.oldest_slot());
        self.entries[slot] = Some(Channel {
            id,
            last_seen_ms: now_ms,
        });
        id
    }

    fn free_slot(&self, now_ms: u32) -> Option<usize> {
        self.entries.iter().position(|entry| match entry {
            None => true,
            Some(channel) => now_ms.wrapping_sub(channel.last_seen_ms) >= CHANNEL_EXPIRY_MS,
        })
    }

    fn oldest_slot(&self) -> usize {
        let mut slot = 0;
        let mut oldest = u32::MAX;
        for (index, entry) in self.entries.iter().enumerate() {
            if let Some(channel) = entry {
                if channel.last_seen_ms <= oldest {
                    oldest = channel.last_seen_ms;
                    slot = index;
                }
            }
        }
        slot
    }

    /// Record activity on `id`; false if the channel was never issued
    /// (or has been recycled).
    fn touch(&mut self, id: u32, now_ms: u32) -> bool {
        for entry in self.entries.iter_mut().flatten() {
            if entry.id == id {
                entry.last_seen_ms = now_ms;
                return true;
            }
        }
        false
    }
}

pub struct Pipe<A: App> {
    app: A,
    state: State,
    channels: ChannelTable,
    buffer: [u8; MESSAGE_SIZE],
}

impl<A: App> Pipe<A> {
    pub fn new(app: A) -> Self {
        Self {
            app,
            state: State::Idle,
            channels: ChannelTable::new(),
            buffer: [0u8; MESSAGE_SIZE],
        }
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// Drive timeouts. The main loop calls this between reports.
    pub fn poll<B: HidBus>(&mut self, now_ms: u32, bus: &mut B) {
        self.check_timeout(now_ms, bus);
    }

    /// Feed one 64-byte OUT report into the state machine.
    pub fn handle_report<B: HidBus>(&mut self, report: &Packet, now_ms: u32, bus: &mut B) {
        self.check_timeout(now_ms, bus);

        let channel = u32::from_be_bytes(report[..4].try_into().unwrap());
        let is_initialization = (report[4] >> 7) != 0;

        if is_initialization {
            self.handle_initialization(channel, report, now_ms, bus);
        } else {
            self.handle_continuation(channel, report, now_ms, bus);
        }
    }

    fn handle_initialization<B: HidBus>(
        &mut self,
        channel: u32,
        report: &Packet,
        now_ms: u32,
        bus: &mut B,
    ) {
        let command_byte = report[4] & !0x80;
        let length = u16::from_be_bytes([report[5], report[6]]);

        // CTAPHID_INIT has channel-management semantics of its own.
        if command_byte == Command::Init as u8 {
            self.handle_init(channel, report, length, now_ms, bus);
            return;
        }

        if channel == BROADCAST_CHANNEL || channel == RESERVED_CHANNEL {
            send_error(bus, channel, ErrorCode::InvalidChannel);
            return;
        }
        if !self.channels.touch(channel, now_ms) {
            send_error(bus, channel, ErrorCode::InvalidChannel);
            return;
        }

        if let State::Receiving { request, .. } = self.state {
            if request.channel != channel {
                send_error(bus, channel, ErrorCode::ChannelBusy);
                return;
            }
            // an initialization packet on the active channel aborts the
            // transaction in flight and starts over
            self.state = State::Idle;
        }

        let command = match Command::try_from(command_byte) {
            Ok(command) => command,
            Err(()) => {
                send_error(bus, channel, ErrorCode::InvalidCommand);
                return;
            }
        };

        if length as usize > MESSAGE_SIZE {
            send_error(bus, channel, ErrorCode::InvalidLength);
            return;
        }

        let request = Request {
            channel,
            command,
            length,
        };

        if length as usize > INIT_PAYLOAD_SIZE {
            self.buffer[..INIT_PAYLOAD_SIZE].copy_from_slice(&report[7..]);
            self.state = State::Receiving {
                request,
                expected_sequence: 0,
                received: INIT_PAYLOAD_SIZE,
                last_fragment_ms: now_ms,
            };
        } else {
            self.buffer[..length as usize]
                .copy_from_slice(&report[7..7 + length as usize]);
            self.dispatch(request, bus);
        }
    }

    fn handle_continuation<B: HidBus>(
        &mut self,
        channel: u32,
        report: &Packet,
        now_ms: u32,
        bus: &mut B,
    ) {
        let State::Receiving {
            request,
            expected_sequence,
            received,
            ..
        } = self.state
        else {
            // stray continuation packet, nothing to resume
            return;
        };

        if channel != request.channel {
            send_error(bus, channel, ErrorCode::ChannelBusy);
            return;
        }
        self.channels.touch(channel, now_ms);

        let sequence = report[4];
        if sequence != expected_sequence {
            self.state = State::Idle;
            send_error(bus, channel, ErrorCode::InvalidSequence);
            return;
        }

        let total = request.length as usize;
        let missing = total - received;
        if missing > CONT_PAYLOAD_SIZE {
            self.buffer[received..received + CONT_PAYLOAD_SIZE].copy_from_slice(&report[5..]);
            self.state = State::Receiving {
                request,
                expected_sequence: expected_sequence + 1,
                received: received + CONT_PAYLOAD_SIZE,
                last_fragment_ms: now_ms,
            };
        } else {
            self.buffer[received..total].copy_from_slice(&report[5..5 + missing]);
            self.dispatch(request, bus);
        }
    }

    fn handle_init<B: HidBus>(
        &mut self,
        channel: u32,
        report: &Packet,
        length: u16,
        now_ms: u32,
        bus: &mut B,
    ) {
        // the INIT payload is the 8-byte nonce
        if length != 8 {
            send_error(bus, channel, ErrorCode::InvalidLength);
            return;
        }
        let nonce: [u8; 8] = report[7..15].try_into().unwrap();

        let reply_channel = match channel {
            BROADCAST_CHANNEL => self.channels.allocate(now_ms),
            RESERVED_CHANNEL => {
                send_error(bus, channel, ErrorCode::InvalidChannel);
                return;
            }
            _ => {
                if !self.channels.touch(channel, now_ms) {
                    send_error(bus, channel, ErrorCode::InvalidChannel);
                    return;
                }
                // INIT on an active channel aborts its transaction
                if let State::Receiving { request, .. } = self.state {
                    if request.channel == channel {
                        self.state = State::Idle;
                    }
                }
                channel
            }
        };

        let mut payload = [0u8; 17];
        payload[..8].copy_from_slice(&nonce);
        payload[8..12].copy_from_slice(&reply_channel.to_be_bytes());
        payload[12] = PROTOCOL_VERSION;
        payload[13] = DEVICE_VERSION_MAJOR;
        payload[14] = DEVICE_VERSION_MINOR;
        payload[15] = DEVICE_VERSION_BUILD;
        payload[16] = CAPABILITIES;

        // the reply goes out on the channel the request came in on
        send_message(bus, channel, Command::Init, &payload);
    }

    fn dispatch<B: HidBus>(&mut self, request: Request, bus: &mut B) {
        self.state = State::Idle;
        let payload = &self.buffer[..request.length as usize];
        let channel = request.channel;

        match request.command {
            Command::Ping => send_message(bus, channel, Command::Ping, payload),

            Command::Wink => {
                self.app.wink();
                send_message(bus, channel, Command::Wink, &[]);
            }

            Command::Msg | Command::Cbor => {
                let mut reply = Reply::new();
                let app = &mut self.app;
                let result = {
                    let mut keepalive =
                        || send_message(bus, channel, Command::KeepAlive, &[STATUS_UPNEEDED]);
                    match request.command {
                        Command::Msg => app.msg(payload, &mut reply, &mut keepalive),
                        _ => app.cbor(payload, &mut reply, &mut keepalive),
                    }
                };
                match result {
                    Ok(()) => send_message(bus, channel, request.command, &reply),
                    Err(code) => send_error(bus, channel, code),
                }
            }

            // LOCK is optional and not implemented; INIT never reaches
            // dispatch, and ERROR/KEEPALIVE are reply-only commands.
            Command::Lock | Command::Init | Command::Error | Command::KeepAlive => {
                send_error(bus, channel, ErrorCode::InvalidCommand)
            }
        }
    }

    fn check_timeout<B: HidBus>(&mut self, now_ms: u32, bus: &mut B) {
        if let State::Receiving {
            request,
            last_fragment_ms,
            ..
        } = self.state
        {
            if now_ms.wrapping_sub(last_fragment_ms) >= TRANSACTION_TIMEOUT_MS {
                self.state = State::Idle;
                send_error(bus, request.channel, ErrorCode::MessageTimeout);
            }
        }
    }
}

/// Frame `payload` as one initialization packet plus as many
/// continuation packets as needed, sequence numbers 0, 1, 2, …
fn send_message<B: HidBus>(bus: &mut B, channel: u32, command: Command, payload: &[u8]) {
    debug_assert!(payload.len() <= MESSAGE_SIZE);

    let mut packet = [0u8; PACKET_SIZE];
    packet[..4].copy_from_slice(&channel.to_be_bytes());
    packet[4] = command as u8 | 0x80;
    packet[5..7].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    let first = payload.len().min(INIT_PAYLOAD_SIZE);
    packet[7..7 + first].copy_from_slice(&payload[..first]);
    bus.write_report(&packet);

    let mut offset = first;
    let mut sequence = 0u8;
    while offset < payload.len() {
        let mut packet = [0u8; PACKET_SIZE];
        packet[..4].copy_from_slice(&channel.to_be_bytes());
        packet[4] = sequence;
        let chunk = (payload.len() - offset).min(CONT_PAYLOAD_SIZE);
        packet[5..5 + chunk].copy_from_slice(&payload[offset..offset + chunk]);
        bus.write_report(&packet);
        offset += chunk;
        sequence += 1;
    }
}

fn send_error<B: HidBus>(bus: &mut B, channel: u32, code: ErrorCode) {
    debug_now!("hid error {:?} on channel {:x}", code, channel);
    send_message(bus, channel, Command::Error, &[code as u8]);
}
