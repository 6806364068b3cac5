//! Dissection dispatch
//!
//! A [`Dissector`] maps a [`Discriminant`] (link type, EtherType, IP protocol number, ...) to the
//! constructor of the layer it identifies. `parse` grows a [`Packet`] from raw bytes by asking
//! each layer what it carries and looking up the constructor for it.
//!
//! Dissecting the root layer must succeed. Dissecting any inner layer is tentative: if the
//! constructor rejects the bytes they are kept as the opaque payload of the last layer that was
//! dissected.

use std::collections::HashMap;

use log::debug;

use crate::{
    arp,
    buf::Buffer,
    error::{Error, Result},
    ether, ieee80211, ipv4, ipv6, l2tp, lldp,
    packet::{Layer, Packet, State},
    ppp, sll, tcp, udp,
};

full_range!(
    u32,
    /// Link layer type of a capture (`LINKTYPE_*` values)
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub enum LinkType {
        /// Ethernet II
        Ethernet = 1,
        /// Raw IPv4 / IPv6; the version nibble tells which
        Raw = 101,
        /// IEEE 802.11 without radio information
        Ieee80211 = 105,
        /// Linux cooked capture
        LinuxSll = 113,
    }
);

/// Selects the next dissection step
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Discriminant {
    /// Link layer of a capture
    Link(LinkType),
    /// EtherType
    EtherType(u16),
    /// IP protocol number / IPv6 next header
    IpProtocol(u8),
    /// Well known UDP port
    UdpPort(u16),
    /// PPP protocol field
    PppProtocol(u16),
    /// IEEE 802.11 control frame subtype
    ControlFrame(u8),
}

/// Builds a layer from the bytes at the start of a buffer
///
/// The header of the returned layer must be a view that starts where the buffer starts.
pub type Constructor = fn(Buffer) -> Result<Box<dyn Layer>>;

/// Registry of layer constructors
#[derive(Clone)]
pub struct Dissector {
    constructors: HashMap<Discriminant, Constructor>,
}

impl Dissector {
    /// Creates a dissector that knows all the protocols in this crate
    pub fn new() -> Self {
        let mut dissector = Dissector::empty();

        dissector
            .register(Discriminant::Link(LinkType::Ethernet), boxed::<ether::Frame>)
            .register(Discriminant::Link(LinkType::Raw), raw_ip)
            .register(Discriminant::Link(LinkType::Ieee80211), ieee80211::dissect)
            .register(Discriminant::Link(LinkType::LinuxSll), boxed::<sll::Header>)
            .register(Discriminant::EtherType(ether::Type::Ipv4.into()), boxed::<ipv4::Packet>)
            .register(Discriminant::EtherType(ether::Type::Arp.into()), boxed::<arp::Packet>)
            .register(Discriminant::EtherType(ether::Type::Ipv6.into()), boxed::<ipv6::Packet>)
            .register(Discriminant::EtherType(ether::Type::Lldp.into()), boxed::<lldp::Packet>)
            .register(Discriminant::EtherType(ether::Type::Ppp.into()), boxed::<ppp::Packet>)
            .register(Discriminant::IpProtocol(ipv4::Protocol::Tcp.into()), boxed::<tcp::Segment>)
            .register(Discriminant::IpProtocol(ipv4::Protocol::Udp.into()), boxed::<udp::Packet>)
            .register(Discriminant::UdpPort(l2tp::PORT), boxed::<l2tp::Packet>)
            .register(Discriminant::PppProtocol(ppp::Protocol::Ipv4.into()), boxed::<ipv4::Packet>)
            .register(Discriminant::PppProtocol(ppp::Protocol::Ipv6.into()), boxed::<ipv6::Packet>);

        for subtype in ieee80211::SUBTYPES {
            dissector.register(Discriminant::ControlFrame(*subtype), ieee80211::dissect);
        }

        dissector
    }

    /// Creates a dissector that knows no protocol
    pub fn empty() -> Self {
        Dissector {
            constructors: HashMap::new(),
        }
    }

    /// Registers (or replaces) the constructor for `disc`
    pub fn register(&mut self, disc: Discriminant, constructor: Constructor) -> &mut Self {
        self.constructors.insert(disc, constructor);
        self
    }

    /// Returns the constructor registered for `disc`
    pub fn lookup(&self, disc: Discriminant) -> Option<Constructor> {
        self.constructors.get(&disc).copied()
    }

    /// Dissects `bytes` starting with the layer identified by `disc`
    ///
    /// The bytes are copied once; every header and the opaque payload are views into that copy.
    ///
    /// # Errors
    ///
    /// Only if `disc` is unknown or the root layer can't be dissected
    pub fn parse<B>(&self, disc: Discriminant, bytes: B) -> Result<Packet>
    where
        B: AsRef<[u8]>,
    {
        let constructor = self
            .lookup(disc)
            .ok_or_else(|| Error::invalid(format!("no dissector for {:?}", disc)))?;

        let mut window = Buffer::from_bytes(bytes);
        let mut packet = Packet::from_boxed(constructor(window.clone())?, State::Dissected);

        loop {
            let layer = packet.innermost();
            let available = window.len().saturating_sub(layer.header().len());
            let mut rest = layer.header().remaining_after();
            rest.truncate(available);
            rest.truncate(layer.payload_len(available));

            if rest.is_empty() {
                break;
            }

            let next = layer
                .next_layers()
                .into_iter()
                .find_map(|disc| self.lookup(disc).map(|constructor| (disc, constructor)));

            let (disc, constructor) = match next {
                Some(next) => next,
                None => {
                    packet.attach_raw(rest);
                    break;
                }
            };

            match constructor(rest.clone()) {
                Ok(layer) => {
                    packet.attach(layer, State::Dissected);
                    window = rest;
                }
                Err(e) => {
                    debug!(
                        "{:?} payload of {} header kept as opaque bytes: {}",
                        disc,
                        layer.name(),
                        e
                    );
                    packet.attach_raw(rest);
                    break;
                }
            }
        }

        Ok(packet)
    }
}

impl Default for Dissector {
    fn default() -> Self {
        Dissector::new()
    }
}

/// Dissects `bytes` using a [`Dissector`] that knows all the protocols in this crate
pub fn parse<B>(disc: Discriminant, bytes: B) -> Result<Packet>
where
    B: AsRef<[u8]>,
{
    Dissector::new().parse(disc, bytes)
}

/// Layers that can be dissected from the start of a buffer
pub trait Dissect: Layer + Sized {
    /// Parses the header at the start of `bytes`
    ///
    /// The header of the returned layer is a view into `bytes`
    fn parse(bytes: Buffer) -> Result<Self>;
}

fn boxed<L>(bytes: Buffer) -> Result<Box<dyn Layer>>
where
    L: Dissect,
{
    Ok(Box::new(L::parse(bytes)?))
}

fn raw_ip(bytes: Buffer) -> Result<Box<dyn Layer>> {
    match bytes.read_u8(0)? >> 4 {
        4 => boxed::<ipv4::Packet>(bytes),
        6 => boxed::<ipv6::Packet>(bytes),
        _ => Err(Error::malformed("IP", "unknown version")),
    }
}

#[cfg(test)]
mod tests {
    use super::{Discriminant, Dissector, LinkType};
    use crate::{buf::Buffer, error::Error, ether, packet::PayloadRef};

    const FRAME: &[u8] = &[
        255, 255, 255, 255, 255, 255, // ether: destination
        1, 1, 1, 1, 1, 1, // ether: source
        0x88, 0xb5, // ether: type (local experimental)
        1, 2, 3, 4, // payload
    ];

    #[test]
    fn unknown_next_layer_is_opaque() {
        let packet = super::parse(Discriminant::Link(LinkType::Ethernet), FRAME).unwrap();

        assert_eq!(packet.len(), 1);
        match packet.payload(packet.root()) {
            Some(PayloadRef::Raw(raw)) => assert_eq!(raw.byte_copy(), [1, 2, 3, 4]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unregistered_root() {
        let dissector = Dissector::empty();
        match dissector.parse(Discriminant::Link(LinkType::Ethernet), FRAME) {
            Err(Error::InvalidOperation(_)) => {}
            other => panic!("unexpected {:?}", other),
        }

        assert!(dissector.lookup(Discriminant::EtherType(0x0800)).is_none());
    }

    #[test]
    fn root_failure_is_surfaced() {
        assert!(super::parse(Discriminant::Link(LinkType::Ethernet), &FRAME[..10]).is_err());
    }

    fn failing(_: Buffer) -> crate::error::Result<Box<dyn crate::packet::Layer>> {
        Err(Error::malformed("test", "always fails"))
    }

    #[test]
    fn custom_constructor() {
        let mut dissector = Dissector::new();
        dissector.register(Discriminant::EtherType(0x88b5), failing);

        let mut packet = dissector
            .parse(Discriminant::Link(LinkType::Ethernet), FRAME)
            .unwrap();
        assert_eq!(packet.len(), 1);
        assert!(packet.extract::<ether::Frame>().is_some());
        assert_eq!(
            packet.raw_payload(packet.root()).unwrap().byte_copy(),
            [1, 2, 3, 4]
        );

        // untouched chains serialize verbatim
        assert_eq!(packet.bytes().unwrap(), FRAME);
    }

    #[test]
    fn link_type() {
        assert_eq!(LinkType::from(113), LinkType::LinuxSll);
        assert_eq!(LinkType::from(228), LinkType::Unknown(228));
        assert_eq!(u32::from(LinkType::Raw), 101);
    }
}
