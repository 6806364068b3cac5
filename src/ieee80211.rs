//! IEEE 802.11 control frames: RTS, CTS and ACK
//!
//! Multi-byte fields are little endian.
//!
//! # References
//!
//! - IEEE 802.11-2016, section 9.3.1

use core::{fmt, ops::Range};

use byteorder::{ByteOrder, LittleEndian as LE};

use crate::{
    buf::Buffer,
    dissect::Dissect,
    error::{Error, Result},
    mac,
    packet::{Context, Layer},
};

/* Frame structure */
const FRAME_CONTROL: usize = 0;
mod protocol_version {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 2;
}
mod type_ {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::protocol_version::OFFSET + super::protocol_version::SIZE;
    pub const SIZE: usize = 2;
}
mod subtype {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::type_::OFFSET + super::type_::SIZE;
    pub const SIZE: usize = 4;
}

const FLAGS: usize = 1;
const DURATION: Range<usize> = 2..4;
const RECEIVER: Range<usize> = 4..10;
const TRANSMITTER: Range<usize> = 10..16;

/// Frame type of control frames
pub const CONTROL: u8 = 1;

/// Size of the ACK and CTS frames (frame check sequence excluded)
pub const SHORT_FRAME_SIZE: usize = RECEIVER.end;

/// Size of the RTS frame (frame check sequence excluded)
pub const RTS_FRAME_SIZE: usize = TRANSMITTER.end;

full_range!(
    u8,
    /// Control frame subtype
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub enum Subtype {
        /// Request To Send
        Rts = 11,
        /// Clear To Send
        Cts = 12,
        /// Acknowledgment
        Ack = 13,
    }
);

/// Subtypes of the control frames this module dissects
pub const SUBTYPES: &[u8] = &[11, 12, 13];

/// Dissects a control frame, picking the frame type from the Frame Control field
pub fn dissect(bytes: Buffer) -> Result<Box<dyn Layer>> {
    let fc = bytes.read_u8(FRAME_CONTROL)?;
    if get!(fc, type_) != CONTROL {
        return Err(Error::malformed("IEEE 802.11", "not a control frame"));
    }

    Ok(match Subtype::from(get!(fc, subtype)) {
        Subtype::Ack => Box::new(Ack::parse(bytes)?),
        Subtype::Cts => Box::new(Cts::parse(bytes)?),
        Subtype::Rts => Box::new(Rts::parse(bytes)?),
        Subtype::Unknown(_) => {
            return Err(Error::malformed(
                "IEEE 802.11",
                "unsupported control frame subtype",
            ))
        }
    })
}

// fields shared by all the control frames
fn frame_control(subtype_: Subtype) -> u8 {
    let mut fc = 0;
    set!(fc, protocol_version, 0);
    set!(fc, type_, CONTROL);
    set!(fc, subtype, u8::from(subtype_));
    fc
}

fn parse_as(bytes: Buffer, expected: Subtype, size: usize) -> Result<Buffer> {
    let fc = bytes.read_u8(FRAME_CONTROL)?;
    if get!(fc, type_) != CONTROL || Subtype::from(get!(fc, subtype)) != expected {
        return Err(Error::malformed("IEEE 802.11", "unexpected frame subtype"));
    }

    bytes.slice(0, size)
}

// rewrites the type and subtype of the frame control
fn finalize_as(header: &mut Buffer, subtype_: Subtype) {
    header.with_mut(|h| {
        set!(h[FRAME_CONTROL], type_, CONTROL);
        set!(h[FRAME_CONTROL], subtype, u8::from(subtype_));
    })
}

macro_rules! control_frame {
    ($Frame:ident, $name:expr, $subtype:expr, $size:expr) => {
        impl $Frame {
            /* Getters */
            /// Returns the Subtype of the Frame Control field
            pub fn get_subtype(&self) -> Subtype {
                self.header.with(|h| get!(h[FRAME_CONTROL], subtype)).into()
            }

            /// Returns the flags byte of the Frame Control field
            pub fn get_flags(&self) -> u8 {
                self.header.with(|h| h[FLAGS])
            }

            /// Returns the Duration field
            pub fn get_duration(&self) -> u16 {
                self.header.with(|h| LE::read_u16(&h[DURATION]))
            }

            /// Returns the Receiver Address field
            pub fn get_receiver(&self) -> mac::Addr {
                let mut addr = [0; 6];
                self.header.with(|h| addr.copy_from_slice(&h[RECEIVER]));
                mac::Addr(addr)
            }

            /* Setters */
            /// Sets the flags byte of the Frame Control field
            pub fn set_flags(&mut self, flags: u8) {
                self.header.with_mut(|h| h[FLAGS] = flags)
            }

            /// Sets the Duration field
            pub fn set_duration(&mut self, duration: u16) {
                self.header
                    .with_mut(|h| LE::write_u16(&mut h[DURATION], duration))
            }

            /// Sets the Receiver Address field
            pub fn set_receiver(&mut self, addr: mac::Addr) {
                self.header
                    .with_mut(|h| h[RECEIVER].copy_from_slice(&addr.0))
            }

            /* Private */
            fn blank() -> Self {
                let mut header = vec![0; $size];
                header[FRAME_CONTROL] = frame_control($subtype);
                $Frame {
                    header: Buffer::from_vec(header),
                }
            }
        }

        impl Dissect for $Frame {
            fn parse(bytes: Buffer) -> Result<Self> {
                Ok($Frame {
                    header: parse_as(bytes, $subtype, $size)?,
                })
            }
        }

        impl Layer for $Frame {
            fn name(&self) -> &'static str {
                $name
            }

            fn header(&self) -> &Buffer {
                &self.header
            }

            fn header_mut(&mut self) -> &mut Buffer {
                &mut self.header
            }

            fn header_len(&self) -> usize {
                $size
            }

            fn finalize(&mut self, _: &Context<'_>) -> Result<()> {
                finalize_as(&mut self.header, $subtype);
                Ok(())
            }
        }
    };
}

/// Acknowledgment frame
pub struct Ack {
    header: Buffer,
}

control_frame!(Ack, "IEEE 802.11 ACK", Subtype::Ack, SHORT_FRAME_SIZE);

impl Ack {
    /// Creates a new ACK frame
    pub fn new(receiver: mac::Addr) -> Self {
        let mut ack = Ack::blank();
        ack.set_receiver(receiver);
        ack
    }
}

/// Clear To Send frame
pub struct Cts {
    header: Buffer,
}

control_frame!(Cts, "IEEE 802.11 CTS", Subtype::Cts, SHORT_FRAME_SIZE);

impl Cts {
    /// Creates a new CTS frame
    pub fn new(receiver: mac::Addr, duration: u16) -> Self {
        let mut cts = Cts::blank();
        cts.set_receiver(receiver);
        cts.set_duration(duration);
        cts
    }
}

/// Request To Send frame
pub struct Rts {
    header: Buffer,
}

control_frame!(Rts, "IEEE 802.11 RTS", Subtype::Rts, RTS_FRAME_SIZE);

impl Rts {
    /// Creates a new RTS frame
    pub fn new(receiver: mac::Addr, transmitter: mac::Addr, duration: u16) -> Self {
        let mut rts = Rts::blank();
        rts.set_receiver(receiver);
        rts.set_transmitter(transmitter);
        rts.set_duration(duration);
        rts
    }

    /// Returns the Transmitter Address field
    pub fn get_transmitter(&self) -> mac::Addr {
        let mut addr = [0; 6];
        self.header
            .with(|h| addr.copy_from_slice(&h[TRANSMITTER]));
        mac::Addr(addr)
    }

    /// Sets the Transmitter Address field
    pub fn set_transmitter(&mut self, addr: mac::Addr) {
        self.header
            .with_mut(|h| h[TRANSMITTER].copy_from_slice(&addr.0))
    }
}

impl fmt::Debug for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ieee80211::Ack")
            .field("flags", &self.get_flags())
            .field("duration", &self.get_duration())
            .field("receiver", &self.get_receiver())
            .finish()
    }
}

impl fmt::Debug for Cts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ieee80211::Cts")
            .field("flags", &self.get_flags())
            .field("duration", &self.get_duration())
            .field("receiver", &self.get_receiver())
            .finish()
    }
}

impl fmt::Debug for Rts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ieee80211::Rts")
            .field("flags", &self.get_flags())
            .field("duration", &self.get_duration())
            .field("receiver", &self.get_receiver())
            .field("transmitter", &self.get_transmitter())
            .finish()
    }
}
