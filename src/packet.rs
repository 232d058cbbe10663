//! Ethernet header decoding for frames carried in packet-in messages.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use byteorder::{BigEndian, ReadBytesExt};

pub const ETHERNET_HDR_SZ: usize = 14;
const VLAN_TAG_SZ: usize = 4;

pub const ETH_TYPE_IP: u16 = 0x0800;
pub const ETH_TYPE_ARP: u16 = 0x0806;
pub const ETH_TYPE_VLAN: u16 = 0x8100;
pub const ETH_TYPE_LLDP: u16 = 0x88cc;

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("not enough data: got {0} bytes, need {1}")]
    NotEnoughData(usize, usize),

    #[error("invalid mac address '{0}'")]
    InvalidMac(String),
}

/// A 48-bit hardware address
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Reads a MAC address from the first six bytes of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut mac = [0u8; 6];
        if bytes.len() < mac.len() {
            return Err(PacketError::NotEnoughData(bytes.len(), mac.len()));
        }
        mac.copy_from_slice(&bytes[..6]);
        Ok(Self(mac))
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mac = [0u8; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');
        for byte in mac.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| PacketError::InvalidMac(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| PacketError::InvalidMac(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(PacketError::InvalidMac(s.to_string()));
        }
        Ok(Self(mac))
    }
}

/// Represents a packet at the ethernet protocol level.
///
/// An 802.1Q tag, if present, is stepped over so `ethertype` always names the
/// encapsulated protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub vlan: Option<u16>,
    pub ethertype: u16,
}

impl EthernetHeader {
    pub fn parse(buf: &[u8]) -> Result<EthernetHeader, PacketError> {
        if buf.len() < ETHERNET_HDR_SZ {
            return Err(PacketError::NotEnoughData(buf.len(), ETHERNET_HDR_SZ));
        }
        let dst = MacAddr::parse(&buf[0..6])?;
        let src = MacAddr::parse(&buf[6..12])?;
        let mut bytes = Cursor::new(&buf[12..]);
        let typ = read_u16(&mut bytes, buf.len())?;
        let (vlan, ethertype) = match typ {
            ETH_TYPE_VLAN => {
                if buf.len() < ETHERNET_HDR_SZ + VLAN_TAG_SZ {
                    return Err(PacketError::NotEnoughData(
                        buf.len(),
                        ETHERNET_HDR_SZ + VLAN_TAG_SZ,
                    ));
                }
                let tci = read_u16(&mut bytes, buf.len())?;
                let inner = read_u16(&mut bytes, buf.len())?;
                (Some(tci & 0xfff), inner)
            }
            _ => (None, typ),
        };
        Ok(EthernetHeader {
            dst,
            src,
            vlan,
            ethertype,
        })
    }

    pub fn is_lldp(&self) -> bool {
        self.ethertype == ETH_TYPE_LLDP
    }
}

fn read_u16(bytes: &mut Cursor<&[u8]>, total: usize) -> Result<u16, PacketError> {
    bytes
        .read_u16::<BigEndian>()
        .map_err(|_| PacketError::NotEnoughData(total, total + 2))
}
