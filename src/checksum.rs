//! Internet checksum
//!
//! # References
//!
//! - [RFC 1071: Computing the Internet Checksum][rfc]
//!
//! [rfc]: https://tools.ietf.org/html/rfc1071

use std::net::{Ipv4Addr, Ipv6Addr};

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::u32;

use crate::traits::UxxExt;

/// One's complement sum of 16-bit big endian words
///
/// The input doesn't need to be contiguous: a pseudo-header and the real bytes of a segment can be
/// fed in separate `add` calls. A trailing odd byte is held until the next call, so the result is
/// the same as if all the bytes had been concatenated.
#[derive(Clone, Copy, Debug, Default)]
pub struct Checksum {
    sum: u32,
    odd: Option<u8>,
}

impl Checksum {
    /// Starts a new sum
    pub fn new() -> Self {
        Checksum::default()
    }

    /// Adds `bytes` to the sum
    pub fn add(&mut self, mut bytes: &[u8]) -> &mut Self {
        if let Some(high) = self.odd.take() {
            match bytes.split_first() {
                Some((&low, rest)) => {
                    self.add_u16(u16::from_be_bytes([high, low]));
                    bytes = rest;
                }
                None => {
                    self.odd = Some(high);
                    return self;
                }
            }
        }

        let mut words = bytes.chunks_exact(2);
        for word in &mut words {
            self.add_u16(NE::read_u16(word));
        }

        if let [last] = words.remainder() {
            self.odd = Some(*last);
        }

        self
    }

    /// Adds a single word to the sum
    pub fn add_u16(&mut self, word: u16) -> &mut Self {
        // end-around carry
        let (sum, carry) = self.sum.overflowing_add(u32(word));
        self.sum = sum + u32::from(carry);
        self
    }

    /// Folds the sum and returns its one's complement
    pub fn finish(&self) -> u16 {
        let mut sum = self.sum;
        if let Some(high) = self.odd {
            // pad with a zero low byte
            let (s, carry) = sum.overflowing_add(u32(high) << 8);
            sum = s + u32::from(carry);
        }

        loop {
            let carry = sum.high();
            if carry == 0 {
                break;
            }
            sum = u32(sum.low()) + u32(carry);
        }

        !sum.low()
    }
}

/// Computes the checksum of `prefix ++ data`
///
/// `data` must have its checksum field zeroed
pub fn compute(prefix: &[u8], data: &[u8]) -> u16 {
    Checksum::new().add(prefix).add(data).finish()
}

/// Verifies the checksum of `prefix ++ data` where `data` contains the stored checksum field
pub fn verify(prefix: &[u8], data: &[u8]) -> bool {
    compute(prefix, data) == 0
}

/// IPv4 pseudo-header used by transport checksums
pub fn ipv4_pseudo_header(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, len: u16) -> [u8; 12] {
    let mut header = [0; 12];
    header[0..4].copy_from_slice(&src.octets());
    header[4..8].copy_from_slice(&dst.octets());
    // header[8] is zero
    header[9] = protocol;
    NE::write_u16(&mut header[10..12], len);
    header
}

/// IPv6 pseudo-header used by transport checksums (RFC 8200, section 8.1)
pub fn ipv6_pseudo_header(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, len: u32) -> [u8; 40] {
    let mut header = [0; 40];
    header[0..16].copy_from_slice(&src.octets());
    header[16..32].copy_from_slice(&dst.octets());
    NE::write_u32(&mut header[32..36], len);
    // header[36..39] is zero
    header[39] = next_header;
    header
}
