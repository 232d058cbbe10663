//! OpenFlow 1.3 controller turning each connected switch into a set of
//! port-based VLANs with per-switch MAC learning.

pub mod bits;
pub mod config;
pub mod flow_installer;
pub mod forwarding_table;
pub mod learning_switch;
pub mod ofp_controller;
pub mod ofp_device;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x04;
pub mod packet;
pub mod vlan_map;
