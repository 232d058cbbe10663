//! Translation of forwarding decisions into flow-mods and packet-outs.

use log::debug;

use crate::ofp_controller::{ChannelError, DatapathId, ProtocolChannel};
use crate::openflow0x04::message::add_flow;
use crate::openflow0x04::{
    Action, PacketData, PacketOut, Pattern, Payload, PseudoPort, OFPCML_NO_BUFFER,
};
use crate::packet::MacAddr;

/// Priority of the table-miss rule; loses to everything.
pub const MISS_RULE_PRIORITY: u16 = 0;
/// Priority of learned (in_port, eth_dst) rules.
pub const UNICAST_RULE_PRIORITY: u16 = 1;

/// Submits rules and packets for one switch session through a `ProtocolChannel`.
pub struct FlowInstaller<C> {
    channel: C,
}

impl<C: ProtocolChannel> FlowInstaller<C> {
    pub fn new(channel: C) -> Self {
        FlowInstaller { channel }
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Installs the lowest priority, match-all rule sending whole packets to the
    /// controller. Re-installing replaces the same rule.
    pub fn install_miss_rule(&mut self, switch: DatapathId) -> Result<(), ChannelError> {
        let actions = vec![Action::Output(PseudoPort::Controller(OFPCML_NO_BUFFER))];
        debug!("[{}] installing table-miss rule", switch);
        self.channel
            .install_rule(switch, add_flow(MISS_RULE_PRIORITY, Pattern::match_all(), actions))
    }

    /// Installs a rule forwarding traffic from `in_port` to `dst` with `action`.
    ///
    /// A buffered `payload` is released through the new rule itself. Otherwise
    /// the rule goes out unbuffered, followed by a packet-out carrying the raw frame.
    pub fn install_unicast_rule(
        &mut self,
        switch: DatapathId,
        in_port: u32,
        dst: MacAddr,
        action: Action,
        payload: &Payload,
    ) -> Result<(), ChannelError> {
        let pattern = Pattern {
            in_port: Some(in_port),
            eth_dst: Some(dst),
            ..Pattern::match_all()
        };
        let mut flow_mod = add_flow(UNICAST_RULE_PRIORITY, pattern, vec![action]);
        match *payload {
            Payload::Buffered(buffer_id, _) => {
                debug!(
                    "[{}] installing rule in_port={} eth_dst={} -> {:?} (buffer {})",
                    switch, in_port, dst, action, buffer_id
                );
                flow_mod.apply_to_packet = Some(buffer_id);
                self.channel.install_rule(switch, flow_mod)
            }
            Payload::NotBuffered(ref data) => {
                debug!(
                    "[{}] installing rule in_port={} eth_dst={} -> {:?}",
                    switch, in_port, dst, action
                );
                self.channel.install_rule(switch, flow_mod)?;
                self.emit_packet_out(switch, in_port, vec![action], PacketData::Raw(data.clone()))
            }
        }
    }

    /// Sends a packet-out for a frame. An empty `actions` list drops it (and
    /// releases the switch buffer, if any).
    pub fn emit_packet_out(
        &mut self,
        switch: DatapathId,
        in_port: u32,
        actions: Vec<Action>,
        data: PacketData,
    ) -> Result<(), ChannelError> {
        let pkt_out = PacketOut {
            output_payload: data,
            port_id: Some(in_port),
            apply_actions: actions,
        };
        self.channel.send_packet_out(switch, pkt_out)
    }
}
