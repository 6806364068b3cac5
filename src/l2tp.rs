//! L2TP: Layer Two Tunneling Protocol (version 2)
//!
//! Most fields are optional; which ones are present is told by the flags in the first byte. The
//! header is rebuilt whenever a setter adds or removes one of them.
//!
//! # References
//!
//! - [RFC 2661: Layer Two Tunneling Protocol "L2TP"][rfc]
//!
//! [rfc]: https://tools.ietf.org/html/rfc2661

use core::fmt;

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::{u16, usize};

use crate::{
    buf::Buffer,
    dissect::{Discriminant, Dissect},
    error::{Error, Result},
    ether,
    fmt::HexBytes,
    packet::{Context, Layer},
};

/// Well known UDP port
pub const PORT: u16 = 1701;

/* Header structure */
const FLAGS: usize = 0;
const VERSION: usize = 1;
mod version {
    pub const MASK: u8 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 4;
}

/// Size of the header when no optional field is present
pub const MIN_HEADER_SIZE: usize = 6;

/// Flag bits of the first byte
pub mod flag {
    /// Type: set for control messages, clear for data messages
    pub const T: u8 = 0x80;
    /// Length field present
    pub const L: u8 = 0x40;
    /// Ns and Nr fields present
    pub const S: u8 = 0x08;
    /// Offset Size field (and padding) present
    pub const O: u8 = 0x02;
    /// Priority
    pub const P: u8 = 0x01;
}

// where the fields that follow the flags start, according to the flags
struct Layout {
    length: Option<usize>,
    tunnel_id: usize,
    sequence: Option<usize>,
    offset: Option<usize>,
}

impl Layout {
    fn new(flags: u8) -> Self {
        let mut at = 2;

        let length = if flags & flag::L != 0 {
            at += 2;
            Some(at - 2)
        } else {
            None
        };

        let tunnel_id = at;
        at += 4;

        let sequence = if flags & flag::S != 0 {
            at += 4;
            Some(at - 4)
        } else {
            None
        };

        let offset = if flags & flag::O != 0 { Some(at) } else { None };

        Layout {
            length,
            tunnel_id,
            sequence,
            offset,
        }
    }

    // size of everything but the offset padding
    fn fixed_len(&self) -> usize {
        self.offset
            .map(|at| at + 2)
            .or_else(|| self.sequence.map(|at| at + 4))
            .unwrap_or(self.tunnel_id + 4)
    }
}

/// L2TP message
pub struct Packet {
    header: Buffer,
}

impl Packet {
    /* Constructors */
    /// Creates a new data message (version 2) with no optional field
    pub fn new(tunnel_id: u16, session_id: u16) -> Self {
        let mut packet = Packet {
            header: Buffer::new(MIN_HEADER_SIZE),
        };

        packet.header.with_mut(|h| set!(h[VERSION], version, 2));
        packet.set_tunnel_id(tunnel_id);
        packet.set_session_id(session_id);

        packet
    }

    /* Getters */
    /// Returns the raw flags byte
    pub fn get_flags(&self) -> u8 {
        self.header.with(|h| h[FLAGS])
    }

    /// Checks if this is a control message
    pub fn is_control(&self) -> bool {
        self.get_flags() & flag::T != 0
    }

    /// Checks if the Length field is present
    pub fn has_length(&self) -> bool {
        self.get_flags() & flag::L != 0
    }

    /// Checks if the Ns and Nr fields are present
    pub fn has_sequence(&self) -> bool {
        self.get_flags() & flag::S != 0
    }

    /// Checks if the Offset Size field is present
    pub fn has_offset(&self) -> bool {
        self.get_flags() & flag::O != 0
    }

    /// Checks if the Priority bit is set
    pub fn is_priority(&self) -> bool {
        self.get_flags() & flag::P != 0
    }

    /// Returns the Version field
    pub fn get_version(&self) -> u8 {
        self.header.with(|h| get!(h[VERSION], version))
    }

    /// Returns the Length field, if present
    pub fn get_length(&self) -> Option<u16> {
        self.layout()
            .length
            .map(|at| self.header.with(|h| NE::read_u16(&h[at..at + 2])))
    }

    /// Returns the Tunnel ID field
    pub fn get_tunnel_id(&self) -> u16 {
        let at = self.layout().tunnel_id;
        self.header.with(|h| NE::read_u16(&h[at..at + 2]))
    }

    /// Returns the Session ID field
    pub fn get_session_id(&self) -> u16 {
        let at = self.layout().tunnel_id + 2;
        self.header.with(|h| NE::read_u16(&h[at..at + 2]))
    }

    /// Returns the Ns and Nr fields, if present
    pub fn get_sequence(&self) -> Option<(u16, u16)> {
        self.layout().sequence.map(|at| {
            self.header.with(|h| {
                (
                    NE::read_u16(&h[at..at + 2]),
                    NE::read_u16(&h[at + 2..at + 4]),
                )
            })
        })
    }

    /// Returns the Offset Size field, if present
    pub fn get_offset_size(&self) -> Option<u16> {
        self.layout()
            .offset
            .map(|at| self.header.with(|h| NE::read_u16(&h[at..at + 2])))
    }

    /* Setters */
    /// Sets the Type bit
    pub fn set_control(&mut self, control: bool) {
        self.set_flag(flag::T, control)
    }

    /// Sets the Priority bit
    pub fn set_priority(&mut self, priority: bool) {
        self.set_flag(flag::P, priority)
    }

    /// Sets the Tunnel ID field
    pub fn set_tunnel_id(&mut self, id: u16) {
        let at = self.layout().tunnel_id;
        self.header
            .with_mut(|h| NE::write_u16(&mut h[at..at + 2], id))
    }

    /// Sets the Session ID field
    pub fn set_session_id(&mut self, id: u16) {
        let at = self.layout().tunnel_id + 2;
        self.header
            .with_mut(|h| NE::write_u16(&mut h[at..at + 2], id))
    }

    /// Adds or removes the Length field
    ///
    /// When present it's computed when the packet is finalized
    pub fn set_has_length(&mut self, present: bool) {
        let fields = Fields {
            length: if present { Some(0) } else { None },
            ..self.fields()
        };
        self.rebuild(fields)
    }

    /// Adds (`Some((ns, nr))`) or removes (`None`) the Ns and Nr fields
    pub fn set_sequence(&mut self, sequence: Option<(u16, u16)>) {
        let fields = Fields {
            sequence,
            ..self.fields()
        };
        self.rebuild(fields)
    }

    /// Adds (`Some(padding)`) or removes (`None`) the Offset Size field and the offset padding
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the padding is longer than 65535 bytes
    pub fn set_offset_padding(&mut self, padding: Option<&[u8]>) -> Result<()> {
        if let Some(padding) = padding {
            u16(padding.len())?;
        }

        let fields = Fields {
            offset_padding: padding.map(|p| p.to_vec()),
            ..self.fields()
        };
        self.rebuild(fields);
        Ok(())
    }

    /* Private */
    fn layout(&self) -> Layout {
        Layout::new(self.get_flags())
    }

    fn set_flag(&mut self, mask: u8, value: bool) {
        self.header.with_mut(|h| {
            if value {
                h[FLAGS] |= mask;
            } else {
                h[FLAGS] &= !mask;
            }
        })
    }

    fn fields(&self) -> Fields {
        let padding = self.layout().offset.map(|at| {
            let start = at + 2;
            self.header.with(|h| h[start.min(h.len())..].to_vec())
        });

        Fields {
            flags: self.get_flags() & (flag::T | flag::P),
            version: self.get_version(),
            length: self.get_length(),
            tunnel_id: self.get_tunnel_id(),
            session_id: self.get_session_id(),
            sequence: self.get_sequence(),
            offset_padding: padding,
        }
    }

    // new view: optional fields must not spill over the payload
    fn rebuild(&mut self, fields: Fields) {
        self.header = Buffer::from_vec(fields.encode());
    }
}

// the decoded header
struct Fields {
    // T and P; the other flags are derived from the optional fields
    flags: u8,
    version: u8,
    length: Option<u16>,
    tunnel_id: u16,
    session_id: u16,
    sequence: Option<(u16, u16)>,
    offset_padding: Option<Vec<u8>>,
}

impl Fields {
    fn encode(&self) -> Vec<u8> {
        let mut flags = self.flags;
        if self.length.is_some() {
            flags |= flag::L;
        }
        if self.sequence.is_some() {
            flags |= flag::S;
        }
        if self.offset_padding.is_some() {
            flags |= flag::O;
        }

        let mut bytes = vec![flags, self.version & version::MASK];
        if let Some(length) = self.length {
            bytes.extend_from_slice(&length.to_be_bytes());
        }
        bytes.extend_from_slice(&self.tunnel_id.to_be_bytes());
        bytes.extend_from_slice(&self.session_id.to_be_bytes());
        if let Some((ns, nr)) = self.sequence {
            bytes.extend_from_slice(&ns.to_be_bytes());
            bytes.extend_from_slice(&nr.to_be_bytes());
        }
        if let Some(ref padding) = self.offset_padding {
            // length checked by `set_offset_padding`
            bytes.extend_from_slice(&(padding.len() as u16).to_be_bytes());
            bytes.extend_from_slice(padding);
        }

        bytes
    }
}

impl Dissect for Packet {
    fn parse(bytes: Buffer) -> Result<Self> {
        let flags = bytes.read_u8(FLAGS)?;
        if get!(bytes.read_u8(VERSION)?, version) != 2 {
            return Err(Error::malformed("L2TP", "version is not 2"));
        }

        let layout = Layout::new(flags);
        let mut len = layout.fixed_len();
        if let Some(at) = layout.offset {
            len += usize(bytes.read_u16::<NE>(at)?);
        }

        let packet = Packet {
            header: bytes.slice(0, len)?,
        };

        if let Some(length) = packet.get_length() {
            if usize(length) < len {
                return Err(Error::malformed("L2TP", "length is smaller than the header"));
            }
        }

        Ok(packet)
    }
}

impl Layer for Packet {
    fn name(&self) -> &'static str {
        "L2TP"
    }

    fn header(&self) -> &Buffer {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Buffer {
        &mut self.header
    }

    fn header_len(&self) -> usize {
        let layout = Layout::new(self.header.read_u8(FLAGS).unwrap_or(0));
        let padding = layout
            .offset
            .and_then(|at| self.header.read_u16::<NE>(at).ok())
            .map_or(0, |size| usize(size));
        layout.fixed_len() + padding
    }

    fn payload_len(&self, available: usize) -> usize {
        match self.get_length() {
            Some(length) => usize(length)
                .saturating_sub(self.header.len())
                .min(available),
            None => available,
        }
    }

    // control messages carry AVPs
    fn next_layer(&self) -> Option<Discriminant> {
        if self.is_control() {
            None
        } else {
            Some(Discriminant::EtherType(ether::Type::Ppp.into()))
        }
    }

    fn finalize(&mut self, cx: &Context<'_>) -> Result<()> {
        if let Some(at) = self.layout().length {
            let len = u16(self.header.len() + cx.payload().len())?;
            self.header
                .with_mut(|h| NE::write_u16(&mut h[at..at + 2], len));
        }

        Ok(())
    }
}

/// NOTE excludes the payload
impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.fields();
        f.debug_struct("l2tp::Packet")
            .field("control", &self.is_control())
            .field("priority", &self.is_priority())
            .field("version", &fields.version)
            .field("length", &fields.length)
            .field("tunnel_id", &fields.tunnel_id)
            .field("session_id", &fields.session_id)
            .field("sequence", &fields.sequence)
            .field(
                "offset_padding",
                &fields.offset_padding.as_ref().map(|p| HexBytes(&p[..])),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        buf::Buffer,
        dissect::{Discriminant, Dissect},
        error::Error,
        l2tp::{self, flag},
        packet::{Layer, Packet},
    };

    const BYTES: &[u8] = &[
        0x4a, // l2tp: flags (L, S, O)
        0x02, // l2tp: version
        0x00, 0x14, // l2tp: length
        0x12, 0x34, // l2tp: tunnel id
        0x56, 0x78, // l2tp: session id
        0x00, 0x01, // l2tp: Ns
        0x00, 0x02, // l2tp: Nr
        0x00, 0x02, // l2tp: offset size
        0xaa, 0xbb, // l2tp: offset padding
        0xff, 0x03, 0x00, 0x21, // payload
    ];

    #[test]
    fn parse() {
        let l2tp = l2tp::Packet::parse(Buffer::from_bytes(BYTES)).unwrap();

        assert!(!l2tp.is_control());
        assert!(l2tp.has_length());
        assert!(l2tp.has_sequence());
        assert!(l2tp.has_offset());
        assert!(!l2tp.is_priority());
        assert_eq!(l2tp.get_version(), 2);
        assert_eq!(l2tp.get_length(), Some(20));
        assert_eq!(l2tp.get_tunnel_id(), 0x1234);
        assert_eq!(l2tp.get_session_id(), 0x5678);
        assert_eq!(l2tp.get_sequence(), Some((1, 2)));
        assert_eq!(l2tp.get_offset_size(), Some(2));

        // 6 + 2 (L) + 4 (S) + 2 + 2 (O)
        assert_eq!(l2tp.header().len(), 16);
        assert_eq!(l2tp.payload_len(100), 4);
        assert_eq!(l2tp.next_layer(), Some(Discriminant::EtherType(0x880b)));
    }

    // the flags live in distinct bits: S, O and P don't imply each other
    #[test]
    fn flags_are_independent() {
        let only_offset = [flag::O, 0x02, 0, 1, 0, 2, 0, 0];
        let l2tp = l2tp::Packet::parse(Buffer::from_bytes(only_offset)).unwrap();
        assert!(l2tp.has_offset());
        assert!(!l2tp.has_sequence());
        assert!(!l2tp.is_priority());
        assert_eq!(l2tp.header().len(), 8);

        let only_sequence = [flag::S, 0x02, 0, 1, 0, 2, 0, 3, 0, 4];
        let l2tp = l2tp::Packet::parse(Buffer::from_bytes(only_sequence)).unwrap();
        assert!(l2tp.has_sequence());
        assert!(!l2tp.has_offset());
        assert!(!l2tp.is_priority());
        assert_eq!(l2tp.get_sequence(), Some((3, 4)));

        let only_priority = [flag::P, 0x02, 0, 1, 0, 2];
        let l2tp = l2tp::Packet::parse(Buffer::from_bytes(only_priority)).unwrap();
        assert!(l2tp.is_priority());
        assert!(!l2tp.has_sequence());
        assert!(!l2tp.has_offset());
        assert_eq!(l2tp.get_tunnel_id(), 1);
        assert_eq!(l2tp.get_session_id(), 2);
    }

    #[test]
    fn construct() {
        let mut l2tp = l2tp::Packet::new(0x1234, 0x5678);
        l2tp.set_has_length(true);
        l2tp.set_sequence(Some((1, 2)));
        l2tp.set_offset_padding(Some(&[0xaa, 0xbb])).unwrap();

        let mut packet = Packet::new(l2tp);
        packet
            .set_payload(packet.root(), &BYTES[16..])
            .unwrap();

        assert_eq!(packet.bytes().unwrap(), BYTES);

        let l2tp = packet.layer_mut::<l2tp::Packet>(packet.root()).unwrap();
        l2tp.set_sequence(None);
        l2tp.set_has_length(false);
        assert_eq!(l2tp.get_tunnel_id(), 0x1234);
        assert_eq!(l2tp.get_offset_size(), Some(2));
        assert_eq!(
            packet.bytes().unwrap(),
            [0x02, 0x02, 0x12, 0x34, 0x56, 0x78, 0x00, 0x02, 0xaa, 0xbb, 0xff, 0x03, 0x00, 0x21]
        );
    }

    #[test]
    fn malformed() {
        let mut bytes = BYTES.to_vec();
        bytes[1] = 0x03;
        match l2tp::Packet::parse(Buffer::from_vec(bytes)) {
            Err(Error::Malformed { layer: "L2TP", .. }) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }

        // offset size runs past the end
        let mut bytes = BYTES.to_vec();
        bytes[13] = 0xff;
        assert!(l2tp::Packet::parse(Buffer::from_vec(bytes)).is_err());
    }
}
