//! Packet composition
//!
//! A [`Packet`] is a chain of layers: the root (e.g. an Ethernet frame) carries the next layer
//! (e.g. an IPv4 packet) as its payload, which carries the next one and so on. The innermost layer
//! may carry opaque bytes that were not (or could not be) dissected.
//!
//! The chain is stored in an arena. Each node is addressed by a [`NodeId`] and links to its
//! parent by index, never by reference.
//!
//! Fields can be mutated freely; derived fields (lengths, checksums, protocol numbers) are only
//! recomputed by [`Packet::finalize`], which walks the chain from the innermost layer outwards.
//! [`Packet::bytes`] finalizes and then serializes the whole chain.

use core::fmt;

use log::trace;

use crate::{
    buf::Buffer,
    dissect::Discriminant,
    error::{Error, Result},
    traits::AsAny,
};

/// A protocol layer: a header plus the capabilities the framework needs from it
///
/// Every method but `name`, `header` and `header_mut` has a default that suits a layer that
/// carries no derived fields.
pub trait Layer: AsAny + fmt::Debug {
    /// Human readable name of the protocol
    fn name(&self) -> &'static str;

    /// View into the header of this layer
    fn header(&self) -> &Buffer;

    /// Mutable view into the header of this layer
    fn header_mut(&mut self) -> &mut Buffer;

    /// Number of bytes the header needs to hold all its fields
    ///
    /// Finalization regrows a header that was shrunk below this (e.g. through `header_mut`)
    fn header_len(&self) -> usize {
        self.header().len()
    }

    /// Given the number of bytes that follow the header in the dissected buffer, returns how many
    /// of them belong to the payload of this layer
    ///
    /// Layers with a length field use this to leave link layer padding out of their payload.
    fn payload_len(&self, available: usize) -> usize {
        available
    }

    /// Discriminant of the layer this layer carries, if it can tell
    fn next_layer(&self) -> Option<Discriminant> {
        None
    }

    /// Discriminants of the layer this layer carries, most likely first
    ///
    /// The dissector goes with the first one that has a registered constructor
    fn next_layers(&self) -> Vec<Discriminant> {
        self.next_layer().into_iter().collect()
    }

    /// EtherType that identifies this layer when carried by a link layer
    fn ether_type(&self) -> Option<u16> {
        None
    }

    /// IP protocol number that identifies this layer when carried by a network layer
    fn ip_protocol(&self) -> Option<u8> {
        None
    }

    /// Pseudo-header to prepend to the checksum of a transport layer carried by this layer
    fn pseudo_header(&self, _protocol: u8, _len: usize) -> Option<Vec<u8>> {
        None
    }

    /// Recomputes the derived fields of the header
    ///
    /// By the time this is called the payload has already been finalized
    fn finalize(&mut self, _cx: &Context<'_>) -> Result<()> {
        Ok(())
    }

    /// Checks the checksum stored in the header
    ///
    /// Returns `None` if the layer carries no checksum
    fn checksum_valid(&self, _cx: &Context<'_>) -> Option<bool> {
        None
    }
}

/// What a layer can see of its surroundings while being finalized or validated
pub struct Context<'a> {
    payload: &'a [u8],
    payload_layer: Option<&'a dyn Layer>,
    parent: Option<&'a dyn Layer>,
}

impl<'a> Context<'a> {
    /// Creates a new context
    pub fn new(
        payload: &'a [u8],
        payload_layer: Option<&'a dyn Layer>,
        parent: Option<&'a dyn Layer>,
    ) -> Self {
        Context {
            payload,
            payload_layer,
            parent,
        }
    }

    /// Serialized payload of the layer
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// The layer carried as payload, if any
    pub fn payload_layer(&self) -> Option<&'a dyn Layer> {
        self.payload_layer
    }

    /// The layer that carries this one, if any
    pub fn parent(&self) -> Option<&'a dyn Layer> {
        self.parent
    }
}

/// Index of a node in a [`Packet`]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// The root of every packet
    pub const ROOT: NodeId = NodeId(0);

    /// Returns the position of this node in the chain; the root is `0`
    pub fn index(self) -> usize {
        self.0
    }
}

/// Lifecycle of a node
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// Built from field values; derived fields not computed yet
    Constructed,
    /// Wraps a dissected sub-range of a received buffer; untouched since
    Dissected,
    /// A field, the payload or a descendant changed after dissection or finalization
    Modified,
    /// Derived fields are up to date
    Finalized,
}

impl State {
    /// Whether `finalize` needs to recompute the derived fields of the node
    pub fn is_dirty(self) -> bool {
        match self {
            State::Constructed | State::Modified => true,
            State::Dissected | State::Finalized => false,
        }
    }
}

/// New payload for a node
pub enum Payload {
    /// No payload
    Empty,
    /// Opaque bytes
    Raw(Buffer),
    /// Another chain of layers
    Packet(Packet),
}

impl From<Packet> for Payload {
    fn from(packet: Packet) -> Self {
        Payload::Packet(packet)
    }
}

impl From<Buffer> for Payload {
    fn from(buffer: Buffer) -> Self {
        Payload::Raw(buffer)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Raw(Buffer::from_vec(bytes))
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Raw(Buffer::from_bytes(bytes))
    }
}

/// Borrowed view of the payload of a node
#[derive(Clone, Copy, Debug)]
pub enum PayloadRef<'a> {
    /// No payload
    Empty,
    /// Opaque bytes
    Raw(&'a Buffer),
    /// The node that holds the next layer
    Node(NodeId),
}

enum Slot {
    Empty,
    Raw(Buffer),
    Node(NodeId),
}

struct Node {
    layer: Box<dyn Layer>,
    payload: Slot,
    parent: Option<NodeId>,
    state: State,
}

/// A chain of protocol layers
pub struct Packet {
    // invariant: node `i` carries node `i + 1`, its parent is node `i - 1`
    nodes: Vec<Node>,
}

impl Packet {
    /* Constructors */
    /// Creates a packet whose root is `layer`
    pub fn new<L>(layer: L) -> Self
    where
        L: Layer,
    {
        Packet::from_boxed(Box::new(layer), State::Constructed)
    }

    pub(crate) fn from_boxed(layer: Box<dyn Layer>, state: State) -> Self {
        Packet {
            nodes: vec![Node {
                layer,
                payload: Slot::Empty,
                parent: None,
                state,
            }],
        }
    }

    /* Getters */
    /// Returns the id of the root node
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Returns the number of layers in the chain
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Ids of all the nodes, outermost first
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Returns the layer stored at `id`
    pub fn get(&self, id: NodeId) -> Option<&dyn Layer> {
        self.nodes.get(id.0).map(|node| &*node.layer)
    }

    /// Returns the layer stored at `id` if it's a `T`
    pub fn layer<T>(&self, id: NodeId) -> Option<&T>
    where
        T: Layer,
    {
        self.get(id)?.as_any().downcast_ref::<T>()
    }

    /// Returns a mutable reference to the layer stored at `id` if it's a `T`
    ///
    /// The node and all its ancestors are marked as modified. So is the layer it carries, whose
    /// checksum may cover fields of this header through a pseudo-header.
    pub fn layer_mut<T>(&mut self, id: NodeId) -> Option<&mut T>
    where
        T: Layer,
    {
        let is_t = self.layer::<T>(id).is_some();
        if !is_t {
            return None;
        }

        self.touch_carried(id);
        let layer: &mut dyn Layer = &mut *self.nodes.get_mut(id.0)?.layer;
        layer.as_any_mut().downcast_mut::<T>()
    }

    /// Returns the payload of the node `id`
    pub fn payload(&self, id: NodeId) -> Option<PayloadRef<'_>> {
        self.nodes.get(id.0).map(|node| match node.payload {
            Slot::Empty => PayloadRef::Empty,
            Slot::Raw(ref buffer) => PayloadRef::Raw(buffer),
            Slot::Node(id) => PayloadRef::Node(id),
        })
    }

    /// Returns the opaque payload of the node `id`, if that's what it carries
    pub fn raw_payload(&self, id: NodeId) -> Option<&Buffer> {
        match self.nodes.get(id.0)?.payload {
            Slot::Raw(ref buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Returns the node that carries `id`
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0)?.parent
    }

    /// Returns the lifecycle state of the node `id`
    pub fn state(&self, id: NodeId) -> Option<State> {
        self.nodes.get(id.0).map(|node| node.state)
    }

    /// Returns the first layer of type `T`, searching from the root downwards
    pub fn extract<T>(&self) -> Option<&T>
    where
        T: Layer,
    {
        let id = self.find::<T>(NodeId::ROOT)?;
        self.layer(id)
    }

    /// Like `extract` but returns a mutable reference; see `layer_mut`
    pub fn extract_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Layer,
    {
        let id = self.find::<T>(NodeId::ROOT)?;
        self.layer_mut(id)
    }

    /// Returns the id of the first layer of type `T` at or below `from`
    ///
    /// Never looks upwards
    pub fn find<T>(&self, from: NodeId) -> Option<NodeId>
    where
        T: Layer,
    {
        (from.0..self.nodes.len())
            .map(NodeId)
            .find(|id| self.layer::<T>(*id).is_some())
    }

    /// Total length of the chain as it is right now: every header plus the opaque payload at the
    /// end
    ///
    /// Equals `bytes()?.len()` once the packet is finalized
    pub fn total_len(&self) -> usize {
        self.nodes
            .iter()
            .map(|node| {
                node.layer.header().len()
                    + match node.payload {
                        Slot::Raw(ref buffer) => buffer.len(),
                        _ => 0,
                    }
            })
            .sum()
    }

    /// Checks the checksum of the layer at `id` against its current payload
    ///
    /// Returns `None` if the layer carries no checksum, `id` is not part of the packet or some
    /// header was shrunk below the size of its fields. Doesn't finalize: this checks what would go
    /// on the wire if the packet was serialized without recomputing anything.
    pub fn checksum_valid(&self, id: NodeId) -> Option<bool> {
        let node = self.nodes.get(id.0)?;
        if self
            .nodes
            .iter()
            .any(|node| node.layer.header().len() < node.layer.header_len())
        {
            return None;
        }

        let payload = self.serialize_from(id.0 + 1);
        let cx = Context {
            payload: &payload,
            payload_layer: self.get(NodeId(id.0 + 1)),
            parent: node.parent.and_then(|parent| self.get(parent)),
        };

        node.layer.checksum_valid(&cx)
    }

    /* Setters */
    /// Appends `layer` as the payload of the innermost layer
    ///
    /// Any opaque payload the innermost layer carried is dropped
    pub fn push<L>(&mut self, layer: L) -> NodeId
    where
        L: Layer,
    {
        self.attach(Box::new(layer), State::Constructed)
    }

    /// Replaces the payload of the node `id`
    ///
    /// All the descendants of `id` are dropped; their ids become invalid (or refer to the new
    /// descendants). `id` and all its ancestors are marked as modified.
    pub fn set_payload<P>(&mut self, id: NodeId, payload: P) -> Result<()>
    where
        P: Into<Payload>,
    {
        if id.0 >= self.nodes.len() {
            return Err(Error::NoSuchNode);
        }

        self.nodes.truncate(id.0 + 1);
        let slot = match payload.into() {
            Payload::Empty => Slot::Empty,
            Payload::Raw(buffer) => Slot::Raw(buffer),
            Payload::Packet(packet) => Slot::Node(self.graft(id, packet)),
        };
        self.nodes[id.0].payload = slot;
        self.touch(id);

        Ok(())
    }

    /// Marks the node `id`, its ancestors and the layer it carries as modified, like `layer_mut`
    /// does
    ///
    /// Needed after writing to a header through a view that aliases it rather than through
    /// `layer_mut`
    pub fn invalidate(&mut self, id: NodeId) -> Result<()> {
        if id.0 >= self.nodes.len() {
            return Err(Error::NoSuchNode);
        }

        self.touch_carried(id);
        Ok(())
    }

    /* Serialization */
    /// Recomputes the derived fields of every dirty node, innermost first
    ///
    /// Idempotent: finalizing an already finalized packet changes nothing
    pub fn finalize(&mut self) -> Result<()> {
        self.finalize_().map(drop)
    }

    /// Finalizes the packet and returns its wire representation
    pub fn bytes(&mut self) -> Result<Vec<u8>> {
        self.finalize_()
    }

    /* Crate */
    pub(crate) fn attach(&mut self, layer: Box<dyn Layer>, state: State) -> NodeId {
        let parent = NodeId(self.nodes.len() - 1);
        let id = NodeId(self.nodes.len());

        self.nodes[parent.0].payload = Slot::Node(id);
        if state.is_dirty() {
            self.touch(parent);
        }

        self.nodes.push(Node {
            layer,
            payload: Slot::Empty,
            parent: Some(parent),
            state,
        });

        id
    }

    pub(crate) fn attach_raw(&mut self, buffer: Buffer) {
        let last = self.nodes.len() - 1;
        self.nodes[last].payload = Slot::Raw(buffer);
    }

    pub(crate) fn innermost(&self) -> &dyn Layer {
        &*self.nodes[self.nodes.len() - 1].layer
    }

    /* Private */
    fn finalize_(&mut self) -> Result<Vec<u8>> {
        // every header must hold its fields before any of them is derived; an inner layer reads
        // its parent's header to build a pseudo-header
        for i in 0..self.nodes.len() {
            let layer = &mut self.nodes[i].layer;
            let needed = layer.header_len();
            if layer.header().len() < needed {
                trace!(
                    "regrowing {} header from {} to {} bytes",
                    layer.name(),
                    layer.header().len(),
                    needed
                );
                layer.header_mut().resize(needed);
                self.touch(NodeId(i));
            }
        }

        let mut tail = match self.nodes.last() {
            Some(Node {
                payload: Slot::Raw(buffer),
                ..
            }) => buffer.byte_copy(),
            _ => vec![],
        };

        for i in (0..self.nodes.len()).rev() {
            let (outer, rest) = self.nodes.split_at_mut(i);
            if let Some((node, inner)) = rest.split_first_mut() {
                if node.state.is_dirty() {
                    trace!("finalizing {} header ({:?})", node.layer.name(), node.state);

                    let cx = Context {
                        payload: &tail,
                        payload_layer: inner.first().map(|node| &*node.layer),
                        parent: node
                            .parent
                            .and_then(|parent| outer.get(parent.0))
                            .map(|node| &*node.layer),
                    };
                    node.layer.finalize(&cx)?;
                    node.state = State::Finalized;
                }

                let mut bytes = node.layer.header().byte_copy();
                bytes.extend_from_slice(&tail);
                tail = bytes;
            }
        }

        Ok(tail)
    }

    // current bytes of the nodes `from..`, plus the opaque payload; nothing is recomputed
    fn serialize_from(&self, from: usize) -> Vec<u8> {
        let mut bytes = vec![];
        for node in self.nodes.iter().skip(from) {
            node.layer.header().with(|header| bytes.extend_from_slice(header));
        }

        if let Some(Node {
            payload: Slot::Raw(buffer),
            ..
        }) = self.nodes.last()
        {
            buffer.with(|raw| bytes.extend_from_slice(raw));
        }

        bytes
    }

    // the carried layer's checksum may cover fields of this header through a pseudo-header
    fn touch_carried(&mut self, id: NodeId) {
        match self.nodes.get(id.0).map(|node| &node.payload) {
            Some(Slot::Node(child)) => {
                let child = *child;
                self.touch(child)
            }
            _ => self.touch(id),
        }
    }

    fn touch(&mut self, id: NodeId) {
        let mut cursor = Some(id);
        while let Some(id) = cursor {
            match self.nodes.get_mut(id.0) {
                Some(node) => {
                    if !node.state.is_dirty() {
                        node.state = State::Modified;
                    }
                    cursor = node.parent;
                }
                None => break,
            }
        }
    }

    // appends the nodes of `packet` below `parent`; returns the id of the grafted root
    fn graft(&mut self, parent: NodeId, packet: Packet) -> NodeId {
        let base = self.nodes.len();

        for mut node in packet.nodes {
            node.parent = Some(match node.parent {
                Some(id) => NodeId(id.0 + base),
                None => parent,
            });
            if let Slot::Node(id) = node.payload {
                node.payload = Slot::Node(NodeId(id.0 + base));
            }
            self.nodes.push(node);
        }

        // the grafted root now sits under a different parent
        let root = &mut self.nodes[base];
        if !root.state.is_dirty() {
            root.state = State::Modified;
        }

        NodeId(base)
    }
}

/// NOTE excludes the opaque payload
impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().map(|node| &node.layer))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use byteorder::NetworkEndian as NE;

    use super::{Context, Layer, NodeId, Packet, Payload, PayloadRef, State};
    use crate::{buf::Buffer, error::Error, error::Result};

    // 2 byte header that stores the length of its payload
    #[derive(Debug)]
    struct Length {
        header: Buffer,
    }

    impl Length {
        fn new() -> Self {
            Length {
                header: Buffer::new(2),
            }
        }
    }

    impl Layer for Length {
        fn name(&self) -> &'static str {
            "Length"
        }

        fn header(&self) -> &Buffer {
            &self.header
        }

        fn header_mut(&mut self) -> &mut Buffer {
            &mut self.header
        }

        fn finalize(&mut self, cx: &Context<'_>) -> Result<()> {
            let len = cast::u16(cx.payload().len())?;
            self.header.write_u16::<NE>(0, len)
        }
    }

    // 1 byte header that stores a tag
    #[derive(Debug)]
    struct Tag {
        header: Buffer,
    }

    impl Tag {
        fn new(tag: u8) -> Self {
            Tag {
                header: Buffer::from_bytes([tag]),
            }
        }
    }

    impl Layer for Tag {
        fn name(&self) -> &'static str {
            "Tag"
        }

        fn header(&self) -> &Buffer {
            &self.header
        }

        fn header_mut(&mut self) -> &mut Buffer {
            &mut self.header
        }
    }

    #[test]
    fn chain() {
        let mut packet = Packet::new(Length::new());
        let tag = packet.push(Tag::new(7));
        let inner = packet.push(Length::new());
        packet
            .set_payload(inner, &b"hello"[..])
            .unwrap();

        assert_eq!(packet.len(), 3);
        assert_eq!(packet.parent(inner), Some(tag));
        assert_eq!(packet.parent(tag), Some(packet.root()));
        assert_eq!(packet.parent(packet.root()), None);

        assert_eq!(
            packet.bytes().unwrap(),
            [0, 8, 7, 0, 5, b'h', b'e', b'l', b'l', b'o']
        );
        assert_eq!(packet.total_len(), 10);
        assert!(packet.ids().all(|id| packet.state(id) == Some(State::Finalized)));

        // idempotent
        assert_eq!(packet.bytes().unwrap().len(), 10);
    }

    #[test]
    fn extract() {
        let mut packet = Packet::new(Length::new());
        packet.push(Tag::new(1));
        packet.push(Tag::new(2));

        let first = packet.extract::<Tag>().unwrap();
        assert_eq!(first.header().byte_copy(), [1]);

        let second = packet.find::<Tag>(NodeId(2)).unwrap();
        assert_eq!(second.index(), 2);
        assert!(packet.find::<Length>(NodeId(1)).is_none());

        assert!(packet.layer::<Length>(NodeId(1)).is_none());
        assert!(packet.layer::<Tag>(NodeId(3)).is_none());
    }

    #[test]
    fn modification_propagates() {
        let mut packet = Packet::new(Length::new());
        let inner = packet.push(Length::new());
        packet.set_payload(inner, vec![0u8; 3]).unwrap();
        packet.finalize().unwrap();
        assert_eq!(packet.state(NodeId::ROOT), Some(State::Finalized));

        packet.set_payload(inner, vec![0u8; 10]).unwrap();
        assert_eq!(packet.state(NodeId::ROOT), Some(State::Modified));
        assert_eq!(packet.state(inner), Some(State::Modified));

        let bytes = packet.bytes().unwrap();
        assert_eq!(&bytes[..4], &[0, 12, 0, 10]);
    }

    #[test]
    fn set_payload_replaces_descendants() {
        let mut packet = Packet::new(Length::new());
        packet.push(Tag::new(1));
        packet.push(Tag::new(2));

        let mut other = Packet::new(Tag::new(9));
        other.push(Length::new());

        packet.set_payload(NodeId::ROOT, other).unwrap();
        assert_eq!(packet.len(), 3);
        assert_eq!(packet.parent(NodeId(1)), Some(NodeId::ROOT));
        assert_eq!(packet.parent(NodeId(2)), Some(NodeId(1)));
        match packet.payload(NodeId(1)) {
            Some(PayloadRef::Node(id)) => assert_eq!(id, NodeId(2)),
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(packet.bytes().unwrap(), [0, 3, 9, 0, 0]);

        packet.set_payload(NodeId::ROOT, Payload::Empty).unwrap();
        assert_eq!(packet.len(), 1);
        assert_eq!(packet.bytes().unwrap(), [0, 0]);

        assert_eq!(
            packet.set_payload(NodeId(1), Payload::Empty),
            Err(Error::NoSuchNode)
        );
    }

    #[test]
    fn push_drops_raw_payload() {
        let mut packet = Packet::new(Tag::new(1));
        packet.set_payload(NodeId::ROOT, vec![1u8, 2, 3]).unwrap();
        assert_eq!(packet.total_len(), 4);

        packet.push(Tag::new(2));
        assert!(packet.raw_payload(NodeId::ROOT).is_none());
        assert_eq!(packet.bytes().unwrap(), [1, 2]);
    }

    #[test]
    fn invalidate() {
        let mut packet = Packet::new(Length::new());
        let inner = packet.push(Tag::new(1));
        packet.finalize().unwrap();

        // write through an aliasing view
        let mut alias = packet.get(inner).unwrap().header().clone();
        alias.write_u8(0, 2).unwrap();

        assert_eq!(packet.state(inner), Some(State::Finalized));
        packet.invalidate(inner).unwrap();
        assert_eq!(packet.state(NodeId::ROOT), Some(State::Modified));
        assert_eq!(packet.bytes().unwrap(), [0, 1, 2]);

        assert_eq!(packet.invalidate(NodeId(5)), Err(Error::NoSuchNode));
    }

    #[test]
    fn layer_mut_marks_ancestors() {
        let mut packet = Packet::new(Length::new());
        let inner = packet.push(Tag::new(1));
        packet.finalize().unwrap();

        assert!(packet.layer_mut::<Length>(inner).is_none());
        assert_eq!(packet.state(inner), Some(State::Finalized));

        packet
            .layer_mut::<Tag>(inner)
            .unwrap()
            .header_mut()
            .write_u8(0, 5)
            .unwrap();
        assert_eq!(packet.state(NodeId::ROOT), Some(State::Modified));
        assert_eq!(packet.bytes().unwrap(), [0, 1, 5]);
    }
}
