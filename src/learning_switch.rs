use std::collections::HashMap;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::flow_installer::FlowInstaller;
use crate::forwarding_table::ForwardingTable;
use crate::ofp_controller::{ChannelError, DatapathId, OfpController, PacketReceived, ProtocolChannel};
use crate::openflow0x04::{Action, PacketData, PseudoPort};
use crate::packet::{EthernetHeader, MacAddr, ETH_TYPE_LLDP};
use crate::vlan_map::VlanMap;

/// What to do with one received frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForwardingDecision {
    /// Destination known on a port in the ingress VLAN.
    Unicast(u32),
    /// Copy to each listed port. Empty means the frame goes nowhere.
    Flood(Vec<u32>),
    /// Discard without touching the switch.
    Drop,
}

impl ForwardingDecision {
    /// Output actions realizing this decision.
    pub fn actions(&self) -> Vec<Action> {
        match *self {
            ForwardingDecision::Unicast(port) => vec![Action::Output(PseudoPort::PhysicalPort(port))],
            ForwardingDecision::Flood(ref ports) => ports
                .iter()
                .map(|&p| Action::Output(PseudoPort::PhysicalPort(p)))
                .collect(),
            ForwardingDecision::Drop => vec![],
        }
    }
}

/// MAC learning state for every connected switch, scoped by a shared VLAN map.
pub struct LearningEngine {
    vlans: VlanMap,
    tables: HashMap<DatapathId, ForwardingTable>,
}

impl LearningEngine {
    pub fn new(vlans: VlanMap) -> Self {
        LearningEngine {
            vlans,
            tables: HashMap::new(),
        }
    }

    pub fn vlans(&self) -> &VlanMap {
        &self.vlans
    }

    /// Forwarding table of `switch`, if it has learned anything yet.
    pub fn table(&self, switch: DatapathId) -> Option<&ForwardingTable> {
        self.tables.get(&switch)
    }

    /// Learns `src` on `in_port` and decides where the frame goes.
    ///
    /// LLDP frames and frames from ports outside the VLAN map are dropped
    /// without learning.
    pub fn on_frame(
        &mut self,
        switch: DatapathId,
        in_port: u32,
        src: MacAddr,
        dst: MacAddr,
        ethertype: u16,
    ) -> ForwardingDecision {
        if ethertype == ETH_TYPE_LLDP {
            return ForwardingDecision::Drop;
        }
        let in_vlan = match self.vlans.vlan_of(in_port) {
            Some(vid) => vid,
            None => {
                error!("[{}] port {} has no vlan assignment, dropping frame from {}", switch, in_port, src);
                return ForwardingDecision::Drop;
            }
        };

        let table = self.tables.entry(switch).or_default();
        table.learn(src, in_port);

        match table.port_of(&dst) {
            Some(out_port) if self.vlans.vlan_of(out_port) == Some(in_vlan) => {
                ForwardingDecision::Unicast(out_port)
            }
            Some(out_port) => {
                debug!(
                    "[{}] {} is on port {} outside vlan {} of port {}",
                    switch, dst, out_port, in_vlan, in_port
                );
                ForwardingDecision::Flood(vec![])
            }
            None => {
                let ports = self.vlans.flood_ports(in_port).unwrap_or_default();
                ForwardingDecision::Flood(ports)
            }
        }
    }
}

/// VLAN-aware learning switch.
///
/// One instance serves every switch connection; the engine sits behind a
/// single lock held only while learning and deciding.
pub struct VlanLearningSwitch {
    engine: Mutex<LearningEngine>,
}

impl VlanLearningSwitch {
    pub fn new(vlans: VlanMap) -> Self {
        VlanLearningSwitch {
            engine: Mutex::new(LearningEngine::new(vlans)),
        }
    }

    /// Port `mac` was last seen on at `switch`.
    pub fn learned_port(&self, switch: DatapathId, mac: &MacAddr) -> Option<u32> {
        self.engine.lock().table(switch).and_then(|t| t.port_of(mac))
    }
}

impl OfpController for VlanLearningSwitch {
    fn on_connection_established(
        &self,
        switch: DatapathId,
        channel: &mut dyn ProtocolChannel,
    ) -> Result<(), ChannelError> {
        info!("switch {} connected", switch);
        FlowInstaller::new(channel).install_miss_rule(switch)
    }

    fn on_packet_received(
        &self,
        event: PacketReceived,
        channel: &mut dyn ProtocolChannel,
    ) -> Result<(), ChannelError> {
        if event.is_truncated() {
            debug!(
                "packet truncated: only {} of {} bytes",
                event.data().len(),
                event.total_len
            );
        }
        let eth = match EthernetHeader::parse(event.data()) {
            Ok(eth) => eth,
            Err(e) => {
                warn!("[{}] dropping unparsable frame on port {}: {}", event.switch, event.in_port, e);
                return Ok(());
            }
        };
        if eth.is_lldp() {
            return Ok(());
        }
        info!("packet in {} {} {} {}", event.switch, eth.src, eth.dst, event.in_port);

        let decision = self
            .engine
            .lock()
            .on_frame(event.switch, event.in_port, eth.src, eth.dst, eth.ethertype);
        debug!("[{}] {} -> {}: {:?}", event.switch, eth.src, eth.dst, decision);

        let mut installer = FlowInstaller::new(channel);
        match decision {
            ForwardingDecision::Unicast(out_port) => installer.install_unicast_rule(
                event.switch,
                event.in_port,
                eth.dst,
                Action::Output(PseudoPort::PhysicalPort(out_port)),
                &event.payload,
            ),
            ForwardingDecision::Flood(_) => installer.emit_packet_out(
                event.switch,
                event.in_port,
                decision.actions(),
                PacketData::of_payload(&event.payload),
            ),
            ForwardingDecision::Drop => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::ETH_TYPE_ARP;

    const SW: DatapathId = DatapathId(1);
    const A: MacAddr = MacAddr::new([0, 0, 0, 0, 0, 0xa]);
    const B: MacAddr = MacAddr::new([0, 0, 0, 0, 0, 0xb]);
    const BCAST: MacAddr = MacAddr::new([0xff; 6]);

    fn engine() -> LearningEngine {
        let vlans =
            VlanMap::try_from([(1, 1000), (2, 500), (3, 500), (4, 1000), (5, 500), (6, 1000)]).unwrap();
        LearningEngine::new(vlans)
    }

    #[test]
    fn unknown_destination_floods_ingress_vlan() {
        let mut e = engine();
        assert_eq!(e.on_frame(SW, 1, A, BCAST, ETH_TYPE_ARP), ForwardingDecision::Flood(vec![4, 6]));
        assert_eq!(e.on_frame(SW, 2, B, BCAST, ETH_TYPE_ARP), ForwardingDecision::Flood(vec![3, 5]));
    }

    #[test]
    fn known_destination_in_vlan_is_unicast() {
        let mut e = engine();
        e.on_frame(SW, 4, B, A, ETH_TYPE_ARP);
        assert_eq!(e.on_frame(SW, 1, A, B, ETH_TYPE_ARP), ForwardingDecision::Unicast(4));
    }

    #[test]
    fn known_destination_across_vlans_goes_nowhere() {
        let mut e = engine();
        e.on_frame(SW, 2, B, A, ETH_TYPE_ARP);
        let decision = e.on_frame(SW, 1, A, B, ETH_TYPE_ARP);
        assert_eq!(decision, ForwardingDecision::Flood(vec![]));
        assert!(decision.actions().is_empty());
    }

    #[test]
    fn lldp_is_not_learned() {
        let mut e = engine();
        assert_eq!(e.on_frame(SW, 1, A, BCAST, ETH_TYPE_LLDP), ForwardingDecision::Drop);
        assert!(e.table(SW).is_none());
    }

    #[test]
    fn unmapped_ingress_is_dropped_without_learning() {
        let mut e = engine();
        assert_eq!(e.on_frame(SW, 9, A, BCAST, ETH_TYPE_ARP), ForwardingDecision::Drop);
        assert!(e.table(SW).is_none());
    }

    #[test]
    fn source_moves_to_latest_port() {
        let mut e = engine();
        e.on_frame(SW, 1, A, BCAST, ETH_TYPE_ARP);
        e.on_frame(SW, 1, A, BCAST, ETH_TYPE_ARP);
        assert_eq!(e.table(SW).unwrap().len(), 1);
        e.on_frame(SW, 4, A, BCAST, ETH_TYPE_ARP);
        assert_eq!(e.table(SW).unwrap().port_of(&A), Some(4));
    }

    #[test]
    fn switches_learn_independently() {
        let mut e = engine();
        e.on_frame(SW, 4, B, BCAST, ETH_TYPE_ARP);
        assert_eq!(
            e.on_frame(DatapathId(2), 1, A, B, ETH_TYPE_ARP),
            ForwardingDecision::Flood(vec![4, 6])
        );
        assert_eq!(e.on_frame(SW, 1, A, B, ETH_TYPE_ARP), ForwardingDecision::Unicast(4));
    }

    #[test]
    fn decision_actions() {
        assert_eq!(
            ForwardingDecision::Flood(vec![4, 6]).actions(),
            vec![
                Action::Output(PseudoPort::PhysicalPort(4)),
                Action::Output(PseudoPort::PhysicalPort(6))
            ]
        );
        assert!(ForwardingDecision::Drop.actions().is_empty());
    }
}
