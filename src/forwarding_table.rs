//! Per-switch MAC learning table

use std::collections::HashMap;

use log::trace;

use crate::packet::MacAddr;

/// Map of learned MAC address to the port it was last seen on.
///
/// The most recent observation wins; entries never age out.
#[derive(Debug, Default)]
pub struct ForwardingTable {
    hosts: HashMap<MacAddr, u32>,
}

impl ForwardingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `mac` was seen on `port`, returning the port it was previously mapped to
    ///
    /// ### Arguments
    /// * `mac` - Source MAC address of an observed frame
    /// * `port` - Port the frame arrived on
    pub fn learn(&mut self, mac: MacAddr, port: u32) -> Option<u32> {
        let old = self.hosts.insert(mac, port);
        match old {
            Some(old_port) if old_port == port => { /* no port change */ }
            Some(old_port) => trace!("moving mac ({}) from port {} to port {}", mac, old_port, port),
            None => trace!("associating mac ({}) with port {}", mac, port),
        }
        old
    }

    /// Returns the port associated with a MAC address, or None if it was never seen
    pub fn port_of(&self, mac: &MacAddr) -> Option<u32> {
        self.hosts.get(mac).copied()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: MacAddr = MacAddr::new([0, 0, 0, 0, 0, 0xa]);

    #[test]
    fn last_writer_wins() {
        let mut table = ForwardingTable::new();
        assert_eq!(table.learn(A, 1), None);
        assert_eq!(table.learn(A, 2), Some(1));
        assert_eq!(table.port_of(&A), Some(2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn relearning_same_port_is_idempotent() {
        let mut table = ForwardingTable::new();
        table.learn(A, 3);
        assert_eq!(table.learn(A, 3), Some(3));
        assert_eq!(table.port_of(&A), Some(3));
    }

    #[test]
    fn unknown_mac_has_no_port() {
        let table = ForwardingTable::new();
        assert!(table.is_empty());
        assert_eq!(table.port_of(&A), None);
    }
}
