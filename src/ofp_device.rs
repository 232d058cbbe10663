//! Blocking OpenFlow session with one connected switch.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use log::{debug, error, info, warn};

use crate::ofp_controller::{ChannelError, DatapathId, OfpController, PacketReceived, ProtocolChannel};
use crate::ofp_header::{OfpHeader, Xid, OFP_HEADER_LENGTH};
use crate::ofp_message::OfpMessage;
use crate::openflow0x04::message::Message;
use crate::openflow0x04::{FlowMod, PacketOut};

/// Marshals messages onto the switch connection, numbering them with
/// increasing transaction ids.
pub struct MessageWriter<W> {
    writer: W,
    next_xid: Xid,
}

impl<W: Write> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        MessageWriter { writer, next_xid: 1 }
    }

    /// Send `message` under a fresh xid, returning the xid used.
    pub fn send(&mut self, message: Message) -> Result<Xid, ChannelError> {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1);
        self.send_with_xid(xid, message)?;
        Ok(xid)
    }

    /// Send `message` under `xid`, as replies must.
    pub fn send_with_xid(&mut self, xid: Xid, message: Message) -> Result<(), ChannelError> {
        let raw = Message::marshal(xid, message)?;
        self.writer.write_all(&raw)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// `ProtocolChannel` bound to the switch a session has identified.
pub struct DeviceChannel<'a, W> {
    switch: DatapathId,
    writer: &'a mut MessageWriter<W>,
}

impl<'a, W: Write> DeviceChannel<'a, W> {
    pub fn new(switch: DatapathId, writer: &'a mut MessageWriter<W>) -> Self {
        DeviceChannel { switch, writer }
    }

    fn check_switch(&self, requested: DatapathId) -> Result<(), ChannelError> {
        if requested == self.switch {
            Ok(())
        } else {
            Err(ChannelError::WrongSwitch {
                connected: self.switch,
                requested,
            })
        }
    }
}

impl<'a, W: Write> ProtocolChannel for DeviceChannel<'a, W> {
    fn install_rule(&mut self, switch: DatapathId, flow_mod: FlowMod) -> Result<(), ChannelError> {
        self.check_switch(switch)?;
        self.writer.send(Message::FlowMod(flow_mod)).map(|_| ())
    }

    fn send_packet_out(&mut self, switch: DatapathId, packet_out: PacketOut) -> Result<(), ChannelError> {
        self.check_switch(switch)?;
        self.writer.send(Message::PacketOut(packet_out)).map(|_| ())
    }
}

/// Read one framed message: a header, then exactly `length - 8` body bytes.
/// Returns None once the peer has closed the connection.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<(OfpHeader, Vec<u8>)>> {
    let mut head = [0u8; OFP_HEADER_LENGTH];
    match reader.read_exact(&mut head) {
        Ok(()) => {}
        Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let header = OfpHeader::parse(&head).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut body = vec![0u8; header.body_length()];
    reader.read_exact(&mut body)?;
    Ok(Some((header, body)))
}

/// OpenFlow Device
///
/// Drives the handshake with one switch and dispatches its events to a
/// controller, one message at a time.
pub struct Device<R, W> {
    reader: R,
    writer: MessageWriter<W>,
    switch: Option<DatapathId>,
}

impl<R: Read, W: Write> Device<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Device {
            reader,
            writer: MessageWriter::new(writer),
            switch: None,
        }
    }

    /// Datapath id reported by the switch, once its features reply arrived.
    pub fn switch(&self) -> Option<DatapathId> {
        self.switch
    }

    pub fn into_writer(self) -> W {
        self.writer.into_inner()
    }

    /// Runs the session until the switch disconnects or the connection fails.
    pub fn run<C: OfpController + ?Sized>(&mut self, controller: &C) -> Result<(), ChannelError> {
        self.writer.send(Message::Hello)?;
        while let Some((header, body)) = read_frame(&mut self.reader)? {
            match Message::parse(&header, &body) {
                Ok((xid, message)) => self.process_message(xid, message, controller)?,
                Err(e) => warn!(
                    "ignoring message type {} (xid {}): {}",
                    header.type_code(),
                    header.xid(),
                    e
                ),
            }
        }
        match self.switch {
            Some(switch) => info!("switch {} disconnected", switch),
            None => info!("connection closed before handshake completed"),
        }
        Ok(())
    }

    fn process_message<C: OfpController + ?Sized>(
        &mut self,
        xid: Xid,
        message: Message,
        controller: &C,
    ) -> Result<(), ChannelError> {
        match message {
            Message::Hello => {
                debug!("received hello, requesting features");
                self.writer.send(Message::FeaturesReq)?;
            }
            Message::EchoRequest(data) => {
                self.writer.send_with_xid(xid, Message::EchoReply(data))?;
            }
            Message::FeaturesReply(feats) => {
                let switch = DatapathId(feats.datapath_id);
                if let Some(known) = self.switch {
                    warn!("switch {} sent another features reply (datapath id {})", known, switch);
                    return Ok(());
                }
                self.switch = Some(switch);
                let mut channel = DeviceChannel::new(switch, &mut self.writer);
                controller.on_connection_established(switch, &mut channel)?;
            }
            Message::PacketIn(pkt) => {
                let switch = match self.switch {
                    Some(switch) => switch,
                    None => {
                        warn!("packet in before features reply, ignoring");
                        return Ok(());
                    }
                };
                let event = match PacketReceived::from_packet_in(switch, pkt) {
                    Some(event) => event,
                    None => {
                        warn!("[{}] packet in without in_port, ignoring", switch);
                        return Ok(());
                    }
                };
                let mut channel = DeviceChannel::new(switch, &mut self.writer);
                controller.on_packet_received(event, &mut channel)?;
            }
            Message::Error(err) => {
                error!(
                    "switch {:?} reported error type {} code {} (xid {})",
                    self.switch, err.typ, err.code, xid
                );
            }
            Message::EchoReply(_) | Message::BarrierReply => {}
            other => debug!("unhandled {:?}", Message::msg_code_of_message(&other)),
        }
        Ok(())
    }
}

/// Serves one accepted switch connection until it closes.
pub fn handle_client_connected<C: OfpController + ?Sized>(
    stream: TcpStream,
    controller: &C,
) -> Result<(), ChannelError> {
    let reader = stream.try_clone()?;
    Device::new(reader, stream).run(controller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::learning_switch::VlanLearningSwitch;
    use crate::openflow0x04::{Capabilities, PacketIn, PacketInReason, Pattern, Payload, SwitchFeatures};
    use crate::vlan_map::VlanMap;

    fn wire(messages: Vec<(Xid, Message)>) -> Vec<u8> {
        messages
            .into_iter()
            .flat_map(|(xid, msg)| Message::marshal(xid, msg).unwrap())
            .collect()
    }

    fn sent(bytes: &[u8]) -> Vec<(Xid, Message)> {
        let mut cursor = Cursor::new(bytes);
        let mut out = Vec::new();
        while let Some((header, body)) = read_frame(&mut cursor).unwrap() {
            out.push(Message::parse(&header, &body).unwrap());
        }
        out
    }

    fn features(dpid: u64) -> Message {
        Message::FeaturesReply(SwitchFeatures {
            datapath_id: dpid,
            num_buffers: 256,
            num_tables: 254,
            auxiliary_id: 0,
            supported_capabilities: Capabilities::default(),
        })
    }

    fn packet_in(in_port: u32) -> Message {
        let mut frame = vec![0xff; 6];
        frame.extend_from_slice(&[0, 0, 0, 0, 0, 1]);
        frame.extend_from_slice(&[0x08, 0x06]);
        frame.resize(42, 0);
        Message::PacketIn(PacketIn {
            total_len: frame.len() as u16,
            input_payload: Payload::NotBuffered(frame),
            reason: PacketInReason::NoMatch,
            table_id: 0,
            cookie: 0,
            pattern: Pattern {
                in_port: Some(in_port),
                ..Pattern::match_all()
            },
        })
    }

    fn controller() -> VlanLearningSwitch {
        VlanLearningSwitch::new(VlanMap::try_from([(1, 10), (2, 10), (3, 20)]).unwrap())
    }

    #[test]
    fn handshake_installs_miss_rule() {
        let input = wire(vec![(7, Message::Hello), (8, features(0xab))]);
        let mut device = Device::new(Cursor::new(input), Vec::new());
        device.run(&controller()).unwrap();
        assert_eq!(device.switch(), Some(DatapathId(0xab)));

        let out = sent(&device.into_writer());
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].1, Message::Hello);
        assert_eq!(out[1].1, Message::FeaturesReq);
        match out[2].1 {
            Message::FlowMod(ref fm) => assert_eq!(fm.priority, 0),
            ref other => panic!("expected flow mod, got {:?}", other),
        }
        let xids: Vec<Xid> = out.iter().map(|&(xid, _)| xid).collect();
        assert_eq!(xids, vec![1, 2, 3]);
    }

    #[test]
    fn echo_reply_reuses_request_xid() {
        let input = wire(vec![(42, Message::EchoRequest(vec![1, 2, 3]))]);
        let mut device = Device::new(Cursor::new(input), Vec::new());
        device.run(&controller()).unwrap();
        let out = sent(&device.into_writer());
        assert_eq!(out[1], (42, Message::EchoReply(vec![1, 2, 3])));
    }

    #[test]
    fn packet_in_before_features_is_ignored() {
        let input = wire(vec![(5, packet_in(1))]);
        let mut device = Device::new(Cursor::new(input), Vec::new());
        device.run(&controller()).unwrap();
        let out = sent(&device.into_writer());
        assert_eq!(out, vec![(1, Message::Hello)]);
    }

    #[test]
    fn packet_in_floods_within_vlan() {
        let input = wire(vec![(1, features(1)), (2, packet_in(1))]);
        let mut device = Device::new(Cursor::new(input), Vec::new());
        device.run(&controller()).unwrap();
        let out = sent(&device.into_writer());
        match out.last() {
            Some(&(_, Message::PacketOut(ref po))) => {
                assert_eq!(po.port_id, Some(1));
                assert_eq!(po.apply_actions.len(), 1);
            }
            other => panic!("expected packet out, got {:?}", other),
        }
    }

    #[test]
    fn unknown_message_is_skipped() {
        // OFPT_GET_CONFIG_REQUEST, not understood by this controller
        let mut input = vec![0x04, 7, 0, 8, 0, 0, 0, 9];
        input.extend(wire(vec![(10, Message::EchoRequest(vec![]))]));
        let mut device = Device::new(Cursor::new(input), Vec::new());
        device.run(&controller()).unwrap();
        let out = sent(&device.into_writer());
        assert_eq!(out[1], (10, Message::EchoReply(vec![])));
    }

    #[test]
    fn channel_refuses_other_switches() {
        let mut writer = MessageWriter::new(Vec::new());
        let mut channel = DeviceChannel::new(DatapathId(1), &mut writer);
        let po = PacketOut {
            output_payload: crate::openflow0x04::PacketData::Buffered(1),
            port_id: None,
            apply_actions: vec![],
        };
        assert!(matches!(
            channel.send_packet_out(DatapathId(2), po),
            Err(ChannelError::WrongSwitch { .. })
        ));
        assert!(writer.into_inner().is_empty());
    }
}
