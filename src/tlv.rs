//! Type-Length-Value records
//!
//! The record layout (width of the type and length fields, what the length counts, which record
//! terminates a list) is described by a [`Format`]. Decoding and encoding are shared by all the
//! formats.
//!
//! Records with unknown codes are kept verbatim so decoding and then re-encoding a list of records
//! is lossless.

use core::fmt;
use core::marker::PhantomData;

use byteorder::{ByteOrder, NetworkEndian as NE};
use cast::{u16, u8};

use crate::{
    buf::Buffer,
    error::{Error, Result},
};

/// The type and length prefix of a record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Prefix {
    /// Type code
    pub code: u16,
    /// Size of the type and length fields
    pub header_len: usize,
    /// Size of the value
    pub value_len: usize,
}

/// Layout of a family of TLV records
pub trait Format {
    /// Code of the record that terminates a list, if the format has one
    const TERMINATOR: Option<u16>;

    /// Reads the prefix of the record at the start of `bytes`
    ///
    /// `bytes` is never empty
    fn read_prefix(bytes: &[u8]) -> Result<Prefix>;

    /// Appends the prefix of a record with a value of `value_len` bytes to `out`
    fn write_prefix(code: u16, value_len: usize, out: &mut Vec<u8>) -> Result<()>;
}

/// A single record
#[derive(Clone)]
pub struct Record {
    code: u16,
    value: Buffer,
}

impl Record {
    /// Creates a new record; the value is copied into its own buffer
    pub fn new(code: u16, value: &[u8]) -> Self {
        Record {
            code,
            value: Buffer::from_bytes(value),
        }
    }

    /// Creates a record whose value is the given view
    pub fn from_buffer(code: u16, value: Buffer) -> Self {
        Record { code, value }
    }

    /// Returns the type code of this record
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Returns a view into the value of this record
    pub fn value(&self) -> &Buffer {
        &self.value
    }

    /// Returns a mutable view into the value of this record
    pub fn value_mut(&mut self) -> &mut Buffer {
        &mut self.value
    }

    /// Returns a copy of the value of this record
    pub fn value_bytes(&self) -> Vec<u8> {
        self.value.byte_copy()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Record) -> bool {
        self.code == other.code && self.value_bytes() == other.value_bytes()
    }
}

impl Eq for Record {}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("tlv::Record")
            .field("code", &self.code)
            .field("value", &self.value_bytes())
            .finish()
    }
}

/// Result of decoding a region
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    /// The records, terminator excluded
    pub records: Vec<Record>,
    /// Whether a terminator record was found
    pub terminated: bool,
    /// Number of bytes consumed, terminator included
    pub len: usize,
}

/// Iterator over the records of a region
///
/// Stops after the terminator or when the region is exhausted. After yielding an error it yields
/// nothing else.
pub struct Records<F> {
    region: Buffer,
    cursor: usize,
    done: bool,
    terminated: bool,
    _format: PhantomData<F>,
}

impl<F> Records<F>
where
    F: Format,
{
    /// Number of bytes consumed so far
    pub fn consumed(&self) -> usize {
        self.cursor
    }

    /// Whether the terminator record has been consumed
    pub fn terminated(&self) -> bool {
        self.terminated
    }
}

impl<F> Iterator for Records<F>
where
    F: Format,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        if self.done || self.cursor >= self.region.len() {
            return None;
        }

        let remaining = self.region.len() - self.cursor;
        let prefix = match self
            .region
            .slice_from(self.cursor)
            .and_then(|rest| rest.with(F::read_prefix))
        {
            Ok(prefix) => prefix,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let size = prefix.header_len + prefix.value_len;
        if size > remaining {
            self.done = true;
            return Some(Err(Error::decode(format!(
                "record of type {} needs {} bytes but only {} remain",
                prefix.code, size, remaining
            ))));
        }

        let value = self.region.slice(self.cursor + prefix.header_len, prefix.value_len);
        self.cursor += size;

        if F::TERMINATOR == Some(prefix.code) && prefix.value_len == 0 {
            self.done = true;
            self.terminated = true;
            return None;
        }

        Some(value.map(|value| Record::from_buffer(prefix.code, value)))
    }
}

/// Iterates over the records in `region`
pub fn records<F>(region: &Buffer) -> Records<F>
where
    F: Format,
{
    Records {
        region: region.clone(),
        cursor: 0,
        done: false,
        terminated: false,
        _format: PhantomData,
    }
}

/// Decodes all the records in `region`
///
/// The values of the records alias `region`
pub fn decode<F>(region: &Buffer) -> Result<Decoded>
where
    F: Format,
{
    let mut iter = records::<F>(region);
    let records = iter.by_ref().collect::<Result<Vec<_>>>()?;

    Ok(Decoded {
        records,
        terminated: iter.terminated(),
        len: iter.consumed(),
    })
}

/// Encodes `records` into `out`, appending the terminator if `terminate` is set and the format has
/// one
///
/// Lengths are always computed from the values
pub fn encode<F>(records: &[Record], terminate: bool, out: &mut Vec<u8>) -> Result<()>
where
    F: Format,
{
    for record in records {
        F::write_prefix(record.code, record.value.len(), out)?;
        record.value.with(|value| out.extend_from_slice(value));
    }

    if terminate {
        if let Some(code) = F::TERMINATOR {
            F::write_prefix(code, 0, out)?;
        }
    }

    Ok(())
}

/// Returns the encoded size of `records`, terminator excluded
pub fn encoded_len<F>(records: &[Record]) -> Result<usize>
where
    F: Format,
{
    let mut scratch = Vec::new();
    encode::<F>(records, false, &mut scratch)?;
    Ok(scratch.len())
}

/// LLDP TLVs: 7-bit type and 9-bit length packed in a 16-bit word; terminated by the End Of LLDPDU
/// TLV (type 0, length 0)
pub enum Lldp {}

mod lldp_type {
    pub const MASK: u16 = (1 << SIZE) - 1;
    pub const OFFSET: usize = super::lldp_length::SIZE;
    pub const SIZE: usize = 7;
}

mod lldp_length {
    pub const MASK: u16 = (1 << SIZE) - 1;
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 9;
}

impl Format for Lldp {
    const TERMINATOR: Option<u16> = Some(0);

    fn read_prefix(bytes: &[u8]) -> Result<Prefix> {
        if bytes.len() < 2 {
            return Err(Error::decode("truncated LLDP TLV header"));
        }

        let word = NE::read_u16(bytes);
        Ok(Prefix {
            code: get!(word, lldp_type),
            header_len: 2,
            value_len: usize::from(get!(word, lldp_length)),
        })
    }

    fn write_prefix(code: u16, value_len: usize, out: &mut Vec<u8>) -> Result<()> {
        if code > lldp_type::MASK {
            return Err(Error::invalid(format!("LLDP TLV type {} exceeds 7 bits", code)));
        }

        let len = u16(value_len)
            .ok()
            .filter(|len| *len <= lldp_length::MASK)
            .ok_or_else(|| {
                Error::invalid(format!("LLDP TLV value of {} bytes exceeds 511", value_len))
            })?;

        let mut word: u16 = 0;
        set!(word, lldp_type, code);
        set!(word, lldp_length, len);
        out.extend_from_slice(&word.to_be_bytes());
        Ok(())
    }
}

/// TCP options: 1-byte kind; End Of Option List (0) and No-Operation (1) are a single byte, every
/// other kind is followed by a length byte that counts the kind, the length and the value
pub enum TcpOption {}

const TCP_EOL: u16 = 0;
const TCP_NOP: u16 = 1;

impl Format for TcpOption {
    const TERMINATOR: Option<u16> = Some(TCP_EOL);

    fn read_prefix(bytes: &[u8]) -> Result<Prefix> {
        let code = u16::from(bytes[0]);
        if code == TCP_EOL || code == TCP_NOP {
            return Ok(Prefix {
                code,
                header_len: 1,
                value_len: 0,
            });
        }

        let len = *bytes
            .get(1)
            .ok_or_else(|| Error::decode("truncated TCP option"))?;
        if len < 2 {
            return Err(Error::decode(format!(
                "TCP option {} has an invalid length of {}",
                code, len
            )));
        }

        Ok(Prefix {
            code,
            header_len: 2,
            value_len: usize::from(len) - 2,
        })
    }

    fn write_prefix(code: u16, value_len: usize, out: &mut Vec<u8>) -> Result<()> {
        let kind = u8(code)?;
        if code == TCP_EOL || code == TCP_NOP {
            if value_len != 0 {
                return Err(Error::invalid(format!(
                    "TCP option {} can't carry a value",
                    code
                )));
            }

            out.push(kind);
            return Ok(());
        }

        let len = value_len
            .checked_add(2)
            .and_then(|len| u8(len).ok())
            .ok_or_else(|| {
                Error::invalid(format!("TCP option value of {} bytes is too long", value_len))
            })?;
        out.push(kind);
        out.push(len);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Lldp, Record, TcpOption};
    use crate::{buf::Buffer, error::Error};

    #[test]
    fn lldp() {
        let bytes = Buffer::from_bytes([
            0x02, 0x07, 0x04, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // chassis id (type 1, len 7)
            0x06, 0x02, 0x00, 0x78, // ttl (type 3, len 2)
            0xfe, 0x03, 0x00, 0x80, 0xc2, // org specific (type 127, len 3)
            0x00, 0x00, // end
            0xaa, 0xbb, // trailing padding
        ]);

        let decoded = super::decode::<Lldp>(&bytes).unwrap();
        assert!(decoded.terminated);
        assert_eq!(decoded.len, 20);
        assert_eq!(
            decoded.records,
            [
                Record::new(1, &[0x04, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
                Record::new(3, &[0x00, 0x78]),
                Record::new(127, &[0x00, 0x80, 0xc2]),
            ]
        );

        // values are views into the region
        assert!(decoded.records[0].value().aliases(&bytes));

        let mut out = vec![];
        super::encode::<Lldp>(&decoded.records, true, &mut out).unwrap();
        assert_eq!(out, bytes.read_bytes(0, 20).unwrap());
    }

    #[test]
    fn lldp_long_value() {
        let value = [0x5a; 300];
        let mut out = vec![];
        super::encode::<Lldp>(&[Record::new(4, &value)], false, &mut out).unwrap();

        // type 4, length 300 = 0b1_0010_1100
        assert_eq!(&out[..2], &[0x09, 0x2c]);

        let decoded = super::decode::<Lldp>(&Buffer::from_vec(out)).unwrap();
        assert!(!decoded.terminated);
        assert_eq!(decoded.records[0].value_bytes().len(), 300);

        assert!(super::encode::<Lldp>(&[Record::new(128, &[])], false, &mut vec![]).is_err());
        assert!(super::encode::<Lldp>(&[Record::new(1, &[0; 512])], false, &mut vec![]).is_err());
    }

    #[test]
    fn overrun() {
        // claims a 9 byte value, only 2 are there
        let bytes = Buffer::from_bytes([0x02, 0x09, 0x04, 0x00]);
        match super::decode::<Lldp>(&bytes) {
            Err(Error::Decode(_)) => {}
            other => panic!("unexpected {:?}", other),
        }

        let bytes = Buffer::from_bytes([0x05, 0x0a, 0, 0, 0, 1]);
        assert!(super::decode::<TcpOption>(&bytes).is_err());
    }

    #[test]
    fn tcp_options() {
        let bytes = Buffer::from_bytes([
            0x02, 0x04, 0x05, 0xb4, // mss 1460
            0x01, // nop
            0x03, 0x03, 0x07, // window scale 7
            0xfd, 0x04, 0xca, 0xfe, // experimental / unknown
            0x00, // eol
            0x00, 0x00, 0x00, // padding
        ]);

        let decoded = super::decode::<TcpOption>(&bytes).unwrap();
        assert!(decoded.terminated);
        assert_eq!(decoded.len, 13);
        assert_eq!(
            decoded.records,
            [
                Record::new(2, &[0x05, 0xb4]),
                Record::new(1, &[]),
                Record::new(3, &[0x07]),
                Record::new(0xfd, &[0xca, 0xfe]),
            ]
        );

        let mut out = vec![];
        super::encode::<TcpOption>(&decoded.records, true, &mut out).unwrap();
        assert_eq!(out, bytes.read_bytes(0, 13).unwrap());

        assert_eq!(super::encoded_len::<TcpOption>(&decoded.records), Ok(12));
    }

    #[test]
    fn bad_tcp_option_length() {
        let bytes = Buffer::from_bytes([0x02, 0x01, 0x00, 0x00]);
        assert!(super::decode::<TcpOption>(&bytes).is_err());

        assert!(super::encode::<TcpOption>(&[Record::new(1, &[0])], false, &mut vec![]).is_err());
    }
}
