//! LLDP: Link Layer Discovery Protocol
//!
//! An LLDPDU is a list of TLVs terminated by the End Of LLDPDU TLV. The whole list is the header
//! of this layer; whatever follows the End TLV (e.g. Ethernet padding) is its payload.
//!
//! # References
//!
//! - IEEE 802.1AB-2016, section 8

use core::fmt;

use byteorder::{ByteOrder, NetworkEndian as NE};

use crate::{
    buf::Buffer,
    dissect::Dissect,
    error::{Error, Result},
    ether,
    packet::Layer,
    tlv::{self, Lldp, Record},
};

/// LLDP data unit
pub struct Packet {
    header: Buffer,
}

impl Packet {
    /* Constructors */
    /// Creates a new LLDPDU out of `tlvs`; the End Of LLDPDU TLV is appended
    ///
    /// A well formed LLDPDU starts with the Chassis ID, Port ID and Time To Live TLVs, in that
    /// order; this is not enforced
    pub fn new(tlvs: &[Record]) -> Result<Self> {
        let mut packet = Packet {
            header: Buffer::new(0),
        };
        packet.set_tlvs(tlvs)?;
        Ok(packet)
    }

    /* Getters */
    /// Returns the TLVs, End Of LLDPDU excluded
    ///
    /// The values of the records alias the header: writing to them modifies the packet (see
    /// `Packet::invalidate`)
    pub fn tlvs(&self) -> Result<Vec<Record>> {
        Ok(tlv::decode::<Lldp>(&self.header)?.records)
    }

    /// Returns the first TLV of type `type_`
    pub fn get_tlv(&self, type_: TlvType) -> Result<Option<Record>> {
        let code = u16::from(type_);
        Ok(self.tlvs()?.into_iter().find(|tlv| tlv.code() == code))
    }

    /// Returns the Time To Live TLV
    pub fn get_time_to_live(&self) -> Result<Option<TimeToLive>> {
        self.get_tlv(TlvType::TimeToLive)?
            .map(|tlv| TimeToLive::from_record(&tlv))
            .transpose()
    }

    /* Setters */
    /// Replaces all the TLVs; the End Of LLDPDU TLV is appended
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if a type doesn't fit in 7 bits or a value is longer than 511 bytes
    pub fn set_tlvs(&mut self, tlvs: &[Record]) -> Result<()> {
        let mut bytes = vec![];
        tlv::encode::<Lldp>(tlvs, true, &mut bytes)?;
        self.header = Buffer::from_vec(bytes);
        Ok(())
    }

    /// Replaces the Time To Live TLV; it's inserted after the Port ID TLV if there's none
    pub fn set_time_to_live(&mut self, ttl: TimeToLive) -> Result<()> {
        let record = ttl.to_record();
        let mut tlvs = self.tlvs()?;

        if let Some(slot) = tlvs.iter_mut().find(|tlv| tlv.code() == record.code()) {
            *slot = record;
        } else {
            let at = tlvs
                .iter()
                .position(|tlv| tlv.code() == u16::from(TlvType::PortId))
                .map(|i| i + 1)
                .unwrap_or(0);
            tlvs.insert(at, record);
        }

        self.set_tlvs(&tlvs)
    }
}

impl Dissect for Packet {
    fn parse(bytes: Buffer) -> Result<Self> {
        let decoded = tlv::decode::<Lldp>(&bytes)?;
        if !decoded.terminated {
            return Err(Error::malformed("LLDP", "missing End Of LLDPDU TLV"));
        }

        Ok(Packet {
            header: bytes.slice(0, decoded.len)?,
        })
    }
}

impl Layer for Packet {
    fn name(&self) -> &'static str {
        "LLDP"
    }

    fn header(&self) -> &Buffer {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Buffer {
        &mut self.header
    }

    fn ether_type(&self) -> Option<u16> {
        Some(ether::Type::Lldp.into())
    }
}

/// NOTE excludes the payload
impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("lldp::Packet")
            .field("tlvs", &self.tlvs())
            .finish()
    }
}

full_range!(
    u16,
    /// TLV type
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub enum TlvType {
        /// End Of LLDPDU
        End = 0,
        /// Chassis ID
        ChassisId = 1,
        /// Port ID
        PortId = 2,
        /// Time To Live
        TimeToLive = 3,
        /// Port Description
        PortDescription = 4,
        /// System Name
        SystemName = 5,
        /// System Description
        SystemDescription = 6,
        /// System Capabilities
        SystemCapabilities = 7,
        /// Management Address
        ManagementAddress = 8,
        /// Organizationally Specific TLVs
        OrganizationSpecific = 127,
    }
);

/// Time To Live TLV: how long, in seconds, the receiver should keep the information
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeToLive(pub u16);

impl TimeToLive {
    /// Interprets a Time To Live record
    ///
    /// # Errors
    ///
    /// `Decode` if the record is not a Time To Live TLV or its value is not 2 bytes long
    pub fn from_record(record: &Record) -> Result<Self> {
        if record.code() != u16::from(TlvType::TimeToLive) {
            return Err(Error::decode(format!(
                "TLV of type {} is not a Time To Live TLV",
                record.code()
            )));
        }

        record.value().with(|value| {
            if value.len() != 2 {
                return Err(Error::decode(format!(
                    "Time To Live TLV must carry 2 bytes, not {}",
                    value.len()
                )));
            }

            Ok(TimeToLive(NE::read_u16(value)))
        })
    }

    /// Builds the record
    pub fn to_record(self) -> Record {
        Record::new(TlvType::TimeToLive.into(), &self.0.to_be_bytes())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        dissect::{self, Discriminant, LinkType},
        error::Error,
        ether, lldp,
        lldp::{TimeToLive, TlvType},
        packet::{Layer, Packet, PayloadRef},
        tlv::Record,
    };

    const BYTES: &[u8] = &[
        0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e, // ether: destination
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // ether: source
        0x88, 0xcc, // ether: type
        0x02, 0x07, // lldp: chassis ID, 7 bytes
        0x04, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // lldp: MAC address
        0x04, 0x04, // lldp: port ID, 4 bytes
        0x07, b'1', b'/', b'1', // lldp: locally assigned
        0x06, 0x02, // lldp: time to live, 2 bytes
        0x00, 0x78, // lldp: 120 s
        0x0a, 0x03, // lldp: system name, 3 bytes
        b's', b'w', b'1', // lldp: name
        0x00, 0x00, // lldp: end
        0x00, 0x00, 0x00, 0x00, // padding
    ];

    fn tlvs() -> Vec<Record> {
        vec![
            Record::new(
                TlvType::ChassisId.into(),
                &[0x04, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
            ),
            Record::new(TlvType::PortId.into(), b"\x071/1"),
            TimeToLive(120).to_record(),
            Record::new(TlvType::SystemName.into(), b"sw1"),
        ]
    }

    #[test]
    fn parse() {
        let packet = dissect::parse(Discriminant::Link(LinkType::Ethernet), BYTES).unwrap();
        assert_eq!(packet.len(), 2);

        let id = packet.find::<lldp::Packet>(packet.root()).unwrap();
        let lldp = packet.layer::<lldp::Packet>(id).unwrap();
        assert_eq!(lldp.header().len(), 26);
        assert_eq!(lldp.tlvs().unwrap(), tlvs());
        assert_eq!(lldp.get_time_to_live().unwrap(), Some(TimeToLive(120)));
        assert_eq!(
            lldp.get_tlv(TlvType::SystemName).unwrap().unwrap().value_bytes(),
            b"sw1"
        );
        assert!(lldp.get_tlv(TlvType::PortDescription).unwrap().is_none());

        // padding
        match packet.payload(id) {
            Some(PayloadRef::Raw(raw)) => assert_eq!(raw.byte_copy(), [0; 4]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn construct() {
        let mut packet = Packet::new(ether::Frame::new(
            [0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e].into(),
            [0x00, 0x11, 0x22, 0x33, 0x44, 0x55].into(),
        ));
        let id = packet.push(lldp::Packet::new(&tlvs()).unwrap());
        packet.set_payload(id, vec![0u8; 4]).unwrap();

        assert_eq!(packet.bytes().unwrap(), BYTES);
    }

    #[test]
    fn set_time_to_live() {
        let mut lldp = lldp::Packet::new(&tlvs()[..2]).unwrap();
        lldp.set_time_to_live(TimeToLive(0)).unwrap();
        assert_eq!(lldp.tlvs().unwrap()[2], TimeToLive(0).to_record());

        lldp.set_time_to_live(TimeToLive(300)).unwrap();
        assert_eq!(lldp.tlvs().unwrap().len(), 3);
        assert_eq!(lldp.get_time_to_live().unwrap(), Some(TimeToLive(300)));
    }

    #[test]
    fn write_through_value() {
        let mut packet = dissect::parse(Discriminant::Link(LinkType::Ethernet), BYTES).unwrap();
        let id = packet.find::<lldp::Packet>(packet.root()).unwrap();

        let mut ttl = packet
            .layer::<lldp::Packet>(id)
            .unwrap()
            .get_tlv(TlvType::TimeToLive)
            .unwrap()
            .unwrap();
        ttl.value_mut().write_bytes(0, &[0x00, 0x3c]).unwrap();
        packet.invalidate(id).unwrap();

        let bytes = packet.bytes().unwrap();
        assert_eq!(&bytes[31..33], &[0x00, 0x3c]);
        assert_eq!(
            packet.extract::<lldp::Packet>().unwrap().get_time_to_live().unwrap(),
            Some(TimeToLive(60))
        );
    }

    #[test]
    fn missing_end() {
        let mut bytes = BYTES[..BYTES.len() - 6].to_vec();
        bytes.extend_from_slice(&[0x0a, 0x01, 0x00]);

        // no End TLV; the LLDPDU is kept as opaque bytes
        let packet = dissect::parse(Discriminant::Link(LinkType::Ethernet), bytes).unwrap();
        assert_eq!(packet.len(), 1);

        let record = Record::new(TlvType::SystemName.into(), &[0; 512]);
        match lldp::Packet::new(&[record]) {
            Err(Error::InvalidOperation(_)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
