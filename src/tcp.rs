//! TCP: Transmission Control Protocol
//!
//! # References
//!
//! - [RFC 793: Transmission Control Protocol][rfc793]
//! - [RFC 7323: TCP Extensions for High Performance][rfc7323]
//! - [RFC 2018: TCP Selective Acknowledgment Options][rfc2018]
//!
//! [rfc793]: https://tools.ietf.org/html/rfc793
//! [rfc7323]: https://tools.ietf.org/html/rfc7323
//! [rfc2018]: https://tools.ietf.org/html/rfc2018

use core::{fmt, ops::Range};

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::{u8, usize};

use crate::{
    buf::Buffer,
    checksum::Checksum,
    dissect::Dissect,
    error::{Error, Result},
    fmt::Hex,
    ipv4,
    packet::{Context, Layer},
    tlv::{self, Record, TcpOption},
};

/* Segment structure */
const SOURCE: Range<usize> = 0..2;
const DESTINATION: Range<usize> = 2..4;
const SEQUENCE: Range<usize> = 4..8;
const ACKNOWLEDGMENT: Range<usize> = 8..12;

const DATA_OFFSET: usize = 12;
mod data_offset {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 4;
    pub const SIZE: usize = 4;
}

// NS lives in the low bit of the data offset byte; the other 8 flags fill the next byte
const FLAGS: Range<usize> = 12..14;
mod flags {
    pub const MASK: u16 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 9;
}

const WINDOW: Range<usize> = 14..16;
const CHECKSUM: Range<usize> = 16..18;
const URGENT_POINTER: Range<usize> = 18..20;

/// Size of the header without options
pub const MIN_HEADER_SIZE: usize = URGENT_POINTER.end;

/// Maximum size of the options
pub const MAX_OPTIONS_SIZE: usize = 40;

/// Control bits
pub mod flag {
    /// ECN-nonce concealment protection
    pub const NS: u16 = 1 << 8;
    /// Congestion Window Reduced
    pub const CWR: u16 = 1 << 7;
    /// ECN-Echo
    pub const ECE: u16 = 1 << 6;
    /// Urgent pointer field is significant
    pub const URG: u16 = 1 << 5;
    /// Acknowledgment field is significant
    pub const ACK: u16 = 1 << 4;
    /// Push function
    pub const PSH: u16 = 1 << 3;
    /// Reset the connection
    pub const RST: u16 = 1 << 2;
    /// Synchronize sequence numbers
    pub const SYN: u16 = 1 << 1;
    /// No more data from sender
    pub const FIN: u16 = 1 << 0;
}

/// TCP segment
pub struct Segment {
    header: Buffer,
}

impl Segment {
    /* Constructors */
    /// Creates a new TCP segment with no options and no flags set
    ///
    /// Data offset is updated by `set_options`; Checksum is computed when the packet is finalized
    pub fn new(source: u16, destination: u16) -> Self {
        let mut segment = Segment {
            header: Buffer::new(MIN_HEADER_SIZE),
        };

        segment.set_source(source);
        segment.set_destination(destination);
        segment
            .header
            .with_mut(|h| set!(h[DATA_OFFSET], data_offset, (MIN_HEADER_SIZE / 4) as u8));

        segment
    }

    /* Getters */
    /// Returns the Source (port) field
    pub fn get_source(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[SOURCE]))
    }

    /// Returns the Destination (port) field
    pub fn get_destination(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[DESTINATION]))
    }

    /// Returns the Sequence number field
    pub fn get_sequence(&self) -> u32 {
        self.header.with(|h| NE::read_u32(&h[SEQUENCE]))
    }

    /// Returns the Acknowledgment number field
    pub fn get_acknowledgment(&self) -> u32 {
        self.header.with(|h| NE::read_u32(&h[ACKNOWLEDGMENT]))
    }

    /// Returns the Data offset field: the size of the header in 32-bit words
    pub fn get_data_offset(&self) -> u8 {
        self.header.with(|h| get!(h[DATA_OFFSET], data_offset))
    }

    /// Returns the 9 control bits; see the [`flag`] module
    pub fn get_flags(&self) -> u16 {
        self.header.with(|h| get!(NE::read_u16(&h[FLAGS]), flags))
    }

    /// Checks if all the `flags` are set
    pub fn has_flags(&self, flags: u16) -> bool {
        self.get_flags() & flags == flags
    }

    /// Returns the Window field
    pub fn get_window(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[WINDOW]))
    }

    /// Returns the Checksum field
    pub fn get_checksum(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[CHECKSUM]))
    }

    /// Returns the Urgent pointer field
    pub fn get_urgent_pointer(&self) -> u16 {
        self.header.with(|h| NE::read_u16(&h[URGENT_POINTER]))
    }

    /// Decodes the options
    ///
    /// Stops at End Of Option List; what follows it is padding. No-Operation options are
    /// returned as records too.
    pub fn get_options(&self) -> Result<Vec<Record>> {
        let region = self.header.slice_from(MIN_HEADER_SIZE)?;
        Ok(tlv::decode::<TcpOption>(&region)?.records)
    }

    /// Returns the first option of kind `O::KIND`, if any
    pub fn get_option<O>(&self) -> Result<Option<O>>
    where
        O: KnownOption,
    {
        let code = u16::from(u8::from(O::KIND));
        match self.get_options()?.iter().find(|r| r.code() == code) {
            Some(record) => record.value().with(O::from_value).map(Some),
            None => Ok(None),
        }
    }

    /* Setters */
    /// Sets the Source (port) field
    pub fn set_source(&mut self, port: u16) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[SOURCE], port))
    }

    /// Sets the Destination (port) field
    pub fn set_destination(&mut self, port: u16) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[DESTINATION], port))
    }

    /// Sets the Sequence number field
    pub fn set_sequence(&mut self, seq: u32) {
        self.header
            .with_mut(|h| NE::write_u32(&mut h[SEQUENCE], seq))
    }

    /// Sets the Acknowledgment number field
    pub fn set_acknowledgment(&mut self, ack: u32) {
        self.header
            .with_mut(|h| NE::write_u32(&mut h[ACKNOWLEDGMENT], ack))
    }

    /// Sets the 9 control bits; the reserved bits are cleared
    pub fn set_flags(&mut self, value: u16) {
        self.header.with_mut(|h| {
            let mut word = NE::read_u16(&h[FLAGS]) & !(0b111 << flags::SIZE);
            set!(word, flags, value);
            NE::write_u16(&mut h[FLAGS], word);
        })
    }

    /// Sets the Window field
    pub fn set_window(&mut self, window: u16) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[WINDOW], window))
    }

    /// Sets the Urgent pointer field
    pub fn set_urgent_pointer(&mut self, ptr: u16) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[URGENT_POINTER], ptr))
    }

    /// Replaces the options and updates Data offset
    ///
    /// The options are terminated with End Of Option List and zero padded to a multiple of 4
    /// bytes, unless they already end on a 4 byte boundary.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if an option can't be encoded or the options don't fit in 40 bytes
    pub fn set_options(&mut self, options: &[Record]) -> Result<()> {
        let mut encoded = vec![];
        let aligned = tlv::encoded_len::<TcpOption>(options)? % 4 == 0;
        tlv::encode::<TcpOption>(options, !aligned, &mut encoded)?;
        let padded = (encoded.len() + 3) / 4 * 4;
        if padded > MAX_OPTIONS_SIZE {
            return Err(Error::invalid(format!(
                "{} bytes of TCP options don't fit in the header",
                encoded.len()
            )));
        }
        encoded.resize(padded, 0);

        let len = MIN_HEADER_SIZE + padded;
        // new view: the options must not spill over the payload
        let mut header = self.header.read_bytes(0, MIN_HEADER_SIZE)?;
        header.extend_from_slice(&encoded);
        set!(header[DATA_OFFSET], data_offset, u8(len / 4)?);
        self.header = Buffer::from_vec(header);

        Ok(())
    }

    /// Replaces the first option of kind `O::KIND` or appends `option` if there's none
    pub fn set_option<O>(&mut self, option: &O) -> Result<()>
    where
        O: KnownOption,
    {
        let record = option.to_record();
        let mut options = self.get_options()?;
        match options.iter_mut().find(|r| r.code() == record.code()) {
            Some(slot) => *slot = record,
            None => options.push(record),
        }

        self.set_options(&options)
    }

    /* Private */
    fn set_checksum(&mut self, checksum: u16) {
        self.header
            .with_mut(|h| NE::write_u16(&mut h[CHECKSUM], checksum))
    }

    fn sum(&self, pseudo_header: &[u8], payload: &[u8]) -> u16 {
        self.header.with(|h| {
            Checksum::new()
                .add(pseudo_header)
                .add(h)
                .add(payload)
                .finish()
        })
    }
}

impl Dissect for Segment {
    fn parse(bytes: Buffer) -> Result<Self> {
        let doff = get!(bytes.read_u8(DATA_OFFSET)?, data_offset);
        let header_len = usize(doff) * 4;
        if header_len < MIN_HEADER_SIZE {
            return Err(Error::malformed("TCP", "data offset < 5"));
        }

        Ok(Segment {
            header: bytes.slice(0, header_len)?,
        })
    }
}

impl Layer for Segment {
    fn name(&self) -> &'static str {
        "TCP"
    }

    fn header(&self) -> &Buffer {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Buffer {
        &mut self.header
    }

    // the data offset is derived from the length
    fn header_len(&self) -> usize {
        ((self.header.len() + 3) / 4 * 4).max(MIN_HEADER_SIZE)
    }

    fn ip_protocol(&self) -> Option<u8> {
        Some(ipv4::Protocol::Tcp.into())
    }

    fn finalize(&mut self, cx: &Context<'_>) -> Result<()> {
        let doff = u8(self.header.len() / 4)?;
        self.header
            .with_mut(|h| set!(h[DATA_OFFSET], data_offset, doff));
        self.set_checksum(0);

        let len = self.header.len() + cx.payload().len();
        if let Some(ph) = cx
            .parent()
            .and_then(|p| p.pseudo_header(ipv4::Protocol::Tcp.into(), len))
        {
            let checksum = self.sum(&ph, cx.payload());
            self.set_checksum(checksum);
        }

        Ok(())
    }

    fn checksum_valid(&self, cx: &Context<'_>) -> Option<bool> {
        let len = self.header.len() + cx.payload().len();
        let ph = cx
            .parent()
            .and_then(|p| p.pseudo_header(ipv4::Protocol::Tcp.into(), len))?;

        Some(self.sum(&ph, cx.payload()) == 0)
    }
}

/// NOTE excludes the payload
impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("tcp::Segment")
            .field("source", &self.get_source())
            .field("destination", &self.get_destination())
            .field("sequence", &self.get_sequence())
            .field("acknowledgment", &self.get_acknowledgment())
            .field("data_offset", &self.get_data_offset())
            .field("flags", &Hex(self.get_flags()))
            .field("window", &self.get_window())
            .field("checksum", &Hex(self.get_checksum()))
            .field("urgent_pointer", &self.get_urgent_pointer())
            .field("options", &self.get_options())
            .finish()
    }
}

full_range!(
    u8,
    /// Option kind
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub enum OptionKind {
        /// End Of Option List
        Eol = 0,
        /// No-Operation
        Nop = 1,
        /// Maximum Segment Size
        Mss = 2,
        /// Window Scale
        WindowScale = 3,
        /// SACK Permitted
        SackPermitted = 4,
        /// Selective Acknowledgment
        Sack = 5,
        /// Timestamps
        Timestamp = 8,
    }
);

/// An option whose value this crate knows how to interpret
pub trait KnownOption: Sized {
    /// Kind of the option
    const KIND: OptionKind;

    /// Interprets the value of a record of kind `KIND`
    fn from_value(value: &[u8]) -> Result<Self>;

    /// Serializes the value
    fn to_value(&self) -> Vec<u8>;

    /// Builds the record that carries this option
    fn to_record(&self) -> Record {
        Record::new(u16::from(u8::from(Self::KIND)), &self.to_value())
    }
}

fn expect_len(kind: &str, value: &[u8], len: usize) -> Result<()> {
    if value.len() != len {
        return Err(Error::decode(format!(
            "{} option must carry {} bytes, not {}",
            kind,
            len,
            value.len()
        )));
    }

    Ok(())
}

/// Maximum Segment Size
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mss(pub u16);

impl KnownOption for Mss {
    const KIND: OptionKind = OptionKind::Mss;

    fn from_value(value: &[u8]) -> Result<Self> {
        expect_len("MSS", value, 2)?;
        Ok(Mss(NE::read_u16(value)))
    }

    fn to_value(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }
}

/// Window scale shift count
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowScale(pub u8);

impl KnownOption for WindowScale {
    const KIND: OptionKind = OptionKind::WindowScale;

    fn from_value(value: &[u8]) -> Result<Self> {
        expect_len("window scale", value, 1)?;
        Ok(WindowScale(value[0]))
    }

    fn to_value(&self) -> Vec<u8> {
        vec![self.0]
    }
}

/// Selective acknowledgment: blocks of (left edge, right edge) sequence numbers
#[derive(Clone, Debug, PartialEq)]
pub struct Sack(pub Vec<(u32, u32)>);

impl KnownOption for Sack {
    const KIND: OptionKind = OptionKind::Sack;

    fn from_value(value: &[u8]) -> Result<Self> {
        if value.len() % 8 != 0 {
            return Err(Error::decode(format!(
                "SACK option of {} bytes is not made of 8 byte blocks",
                value.len()
            )));
        }

        Ok(Sack(
            value
                .chunks_exact(8)
                .map(|block| (NE::read_u32(&block[..4]), NE::read_u32(&block[4..])))
                .collect(),
        ))
    }

    fn to_value(&self) -> Vec<u8> {
        let mut value = Vec::with_capacity(self.0.len() * 8);
        for (left, right) in &self.0 {
            value.extend_from_slice(&left.to_be_bytes());
            value.extend_from_slice(&right.to_be_bytes());
        }
        value
    }
}

/// Timestamps
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Timestamp {
    /// TSval
    pub value: u32,
    /// TSecr
    pub echo_reply: u32,
}

impl KnownOption for Timestamp {
    const KIND: OptionKind = OptionKind::Timestamp;

    fn from_value(value: &[u8]) -> Result<Self> {
        expect_len("timestamp", value, 8)?;
        Ok(Timestamp {
            value: NE::read_u32(&value[..4]),
            echo_reply: NE::read_u32(&value[4..]),
        })
    }

    fn to_value(&self) -> Vec<u8> {
        let mut value = self.value.to_be_bytes().to_vec();
        value.extend_from_slice(&self.echo_reply.to_be_bytes());
        value
    }
}
