use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::ofp_message::OfpSerializationError;

/// Transaction id carried by every OpenFlow message.
pub type Xid = u32;

pub const OFP_HEADER_LENGTH: usize = 8;

pub const OPENFLOW_0_04_VERSION: u8 = 0x04; // 1.3

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// This is parsed to determine version and length of the remaining message, so that
/// it can be properly handled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OfpHeader {
    version: u8,
    typ: u8,
    length: u16,
    xid: Xid,
}

impl OfpHeader {
    /// Create an `OfpHeader` out of the arguments.
    pub fn new(version: u8, typ: u8, length: u16, xid: Xid) -> OfpHeader {
        OfpHeader {
            version,
            typ,
            length,
            xid,
        }
    }

    /// Return the byte-size of an `OfpHeader`.
    pub fn size() -> usize {
        OFP_HEADER_LENGTH
    }

    /// Fills a message buffer with the header fields of an `OfpHeader`.
    pub fn marshal(bytes: &mut Vec<u8>, header: OfpHeader) -> Result<(), OfpSerializationError> {
        bytes.write_u8(header.version)?;
        bytes.write_u8(header.typ)?;
        bytes.write_u16::<BigEndian>(header.length)?;
        bytes.write_u32::<BigEndian>(header.xid)?;
        Ok(())
    }

    /// Takes a message buffer (at least header sized) and returns an `OfpHeader`.
    pub fn parse(buf: &[u8]) -> Result<Self, OfpSerializationError> {
        if buf.len() < OFP_HEADER_LENGTH {
            return Err(OfpSerializationError::short(
                "header",
                buf.len(),
                OFP_HEADER_LENGTH,
            ));
        }
        let mut bytes = Cursor::new(buf);
        let header = OfpHeader {
            version: bytes.read_u8()?,
            typ: bytes.read_u8()?,
            length: bytes.read_u16::<BigEndian>()?,
            xid: bytes.read_u32::<BigEndian>()?,
        };
        if header.length() < OFP_HEADER_LENGTH {
            return Err(OfpSerializationError::UnexpectedValue {
                value: header.length.to_string(),
                field: "length",
                message: "header",
            });
        }
        Ok(header)
    }

    /// Return the `version` field of a header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Return the raw OpenFlow message type code of a header.
    pub fn type_code(&self) -> u8 {
        self.typ
    }

    /// Return the `length` field of a header. Includes the length of the header itself.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Number of body bytes following the header.
    pub fn body_length(&self) -> usize {
        self.length() - OFP_HEADER_LENGTH
    }

    /// Return the `xid` field of a header, the transaction id associated with this packet.
    ///  Replies use the same id to facilitate pairing.
    pub fn xid(&self) -> Xid {
        self.xid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_marshals_big_endian() {
        let mut bytes = vec![];
        OfpHeader::marshal(&mut bytes, OfpHeader::new(4, 14, 0x0050, 0x0102_0304)).unwrap();
        assert_eq!(bytes, vec![0x04, 0x0e, 0x00, 0x50, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn header_parse_reads_fields() {
        let header = OfpHeader::parse(&[0x04, 0x0a, 0x00, 0x20, 0, 0, 0, 7, 0xff]).unwrap();
        assert_eq!(header.version(), OPENFLOW_0_04_VERSION);
        assert_eq!(header.type_code(), 10);
        assert_eq!(header.length(), 32);
        assert_eq!(header.body_length(), 24);
        assert_eq!(header.xid(), 7);
    }

    #[test]
    fn header_parse_rejects_short_buffer() {
        assert!(OfpHeader::parse(&[0x04, 0x00, 0x00]).is_err());
    }

    #[test]
    fn header_parse_rejects_length_below_header() {
        assert!(OfpHeader::parse(&[0x04, 0x00, 0x00, 0x04, 0, 0, 0, 0]).is_err());
    }
}
