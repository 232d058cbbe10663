use std::fmt;
use std::io;

use crate::ofp_message::OfpSerializationError;
use crate::openflow0x04::{FlowMod, PacketIn, PacketOut, Payload};

/// Datapath id of a connected switch, learned from its features reply.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct DatapathId(pub u64);

impl fmt::Display for DatapathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] OfpSerializationError),

    #[error("channel to switch {connected} cannot reach switch {requested}")]
    WrongSwitch {
        connected: DatapathId,
        requested: DatapathId,
    },
}

/// Outbound half of an OpenFlow session.
///
/// Every submission is fire-and-forget: no reply is awaited and nothing is
/// retried. Failures are returned to whoever drives the session.
pub trait ProtocolChannel {
    /// Submit a flow-table modification to `switch`.
    fn install_rule(&mut self, switch: DatapathId, flow_mod: FlowMod) -> Result<(), ChannelError>;
    /// Ask `switch` to transmit a packet now.
    fn send_packet_out(&mut self, switch: DatapathId, packet_out: PacketOut) -> Result<(), ChannelError>;
}

impl<T: ProtocolChannel + ?Sized> ProtocolChannel for &mut T {
    fn install_rule(&mut self, switch: DatapathId, flow_mod: FlowMod) -> Result<(), ChannelError> {
        (**self).install_rule(switch, flow_mod)
    }

    fn send_packet_out(&mut self, switch: DatapathId, packet_out: PacketOut) -> Result<(), ChannelError> {
        (**self).send_packet_out(switch, packet_out)
    }
}

/// A frame the switch could not match, handed to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketReceived {
    pub switch: DatapathId,
    pub in_port: u32,
    /// Captured frame bytes, with the switch-side buffer id if the switch kept a copy.
    pub payload: Payload,
    /// Length of the whole frame on the wire.
    pub total_len: u16,
}

impl PacketReceived {
    /// Builds the event from a packet-in; None if the switch did not report an ingress port.
    pub fn from_packet_in(switch: DatapathId, pkt: PacketIn) -> Option<PacketReceived> {
        let in_port = pkt.in_port()?;
        Some(PacketReceived {
            switch,
            in_port,
            payload: pkt.input_payload,
            total_len: pkt.total_len,
        })
    }

    pub fn data(&self) -> &[u8] {
        Payload::bytes(&self.payload)
    }

    pub fn is_truncated(&self) -> bool {
        self.data().len() < self.total_len as usize
    }
}

/// OpenFlow Controller
///
/// Version-agnostic API for implementing an OpenFlow controller. The session
/// shell delivers one event at a time per switch, in arrival order.
pub trait OfpController {
    /// A switch finished its handshake and is identified by `switch`.
    fn on_connection_established(
        &self,
        switch: DatapathId,
        channel: &mut dyn ProtocolChannel,
    ) -> Result<(), ChannelError>;

    /// A switch forwarded a frame to the controller.
    fn on_packet_received(
        &self,
        event: PacketReceived,
        channel: &mut dyn ProtocolChannel,
    ) -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openflow0x04::{PacketInReason, Pattern};

    #[test]
    fn packet_in_without_in_port_is_not_an_event() {
        let pkt = PacketIn {
            input_payload: Payload::NotBuffered(vec![0; 14]),
            total_len: 14,
            reason: PacketInReason::NoMatch,
            table_id: 0,
            cookie: 0,
            pattern: Pattern::match_all(),
        };
        assert_eq!(PacketReceived::from_packet_in(DatapathId(1), pkt.clone()), None);

        let mut with_port = pkt;
        with_port.pattern.in_port = Some(3);
        let event = PacketReceived::from_packet_in(DatapathId(1), with_port).unwrap();
        assert_eq!(event.in_port, 3);
        assert!(!event.is_truncated());
    }

    #[test]
    fn datapath_id_displays_as_hex() {
        assert_eq!(DatapathId(0x1f).to_string(), "000000000000001f");
    }
}
