//! Static port to VLAN assignment

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// VLAN identifier (802.1Q VID)
pub type VlanId = u16;

const MAX_PHYSICAL_PORT: u32 = 0xffff_ff00;
const MAX_VLAN_ID: VlanId = 4094;

/// Read-only mapping of switch port number to VLAN.
///
/// Every port that can carry traffic must appear here exactly once; the map is
/// validated when built and never changes afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "BTreeMap<u32, VlanId>", into = "BTreeMap<u32, VlanId>")]
pub struct VlanMap {
    ports: BTreeMap<u32, VlanId>,
}

impl VlanMap {
    /// Builds a VLAN map, rejecting reserved port numbers and out of range VLAN ids
    ///
    /// ### Arguments
    /// * `ports` - Mapping of switch port number to VLAN id
    pub fn new(ports: BTreeMap<u32, VlanId>) -> Result<Self, ConfigError> {
        if ports.is_empty() {
            return Err(ConfigError::EmptyVlanMap);
        }
        for (&port, &vid) in ports.iter() {
            if port == 0 || port > MAX_PHYSICAL_PORT {
                return Err(ConfigError::ReservedPort(port));
            }
            if vid == 0 || vid > MAX_VLAN_ID {
                return Err(ConfigError::InvalidVlan { port, vid });
            }
        }
        Ok(Self { ports })
    }

    /// Returns the VLAN a port belongs to, or None if the port is not mapped
    pub fn vlan_of(&self, port: u32) -> Option<VlanId> {
        self.ports.get(&port).copied()
    }

    /// Ports sharing `in_port`'s VLAN, `in_port` itself excluded, in ascending order.
    /// None if `in_port` is not mapped.
    pub fn flood_ports(&self, in_port: u32) -> Option<Vec<u32>> {
        let vid = self.vlan_of(in_port)?;
        Some(
            self.ports
                .iter()
                .filter(|&(&port, &v)| v == vid && port != in_port)
                .map(|(&port, _)| port)
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, VlanId)> + '_ {
        self.ports.iter().map(|(&port, &vid)| (port, vid))
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

impl TryFrom<BTreeMap<u32, VlanId>> for VlanMap {
    type Error = ConfigError;

    fn try_from(ports: BTreeMap<u32, VlanId>) -> Result<Self, Self::Error> {
        VlanMap::new(ports)
    }
}

impl From<VlanMap> for BTreeMap<u32, VlanId> {
    fn from(map: VlanMap) -> Self {
        map.ports
    }
}

impl<const N: usize> TryFrom<[(u32, VlanId); N]> for VlanMap {
    type Error = ConfigError;

    fn try_from(ports: [(u32, VlanId); N]) -> Result<Self, Self::Error> {
        VlanMap::new(ports.into_iter().collect())
    }
}
