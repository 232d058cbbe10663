//! Configuration file module

use std::{
    fs::File,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::vlan_map::{VlanId, VlanMap};

/// Address the controller listens on when none is configured (IANA OpenFlow port)
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:6653";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("vlan map is empty")]
    EmptyVlanMap,

    #[error("port {0} is reserved and cannot be assigned a vlan")]
    ReservedPort(u32),

    #[error("port {port}: vlan id {vid} outside 1..=4094")]
    InvalidVlan { port: u32, vid: VlanId },
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Address to accept switch connections on
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,

    /// Port to VLAN assignment shared by every connected switch
    pub vlans: VlanMap,
}

fn default_listen_addr() -> SocketAddr {
    DEFAULT_LISTEN_ADDR
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 6653)))
}

impl Config {
    /// Loads a configuration file from disk
    ///
    /// ### Arguments
    /// * `path` - Path to the configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Config = serde_yaml::from_reader(f)?;
        Ok(cfg)
    }

    /// Parses a configuration from a yaml document
    pub fn from_yaml(doc: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(doc)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let cfg = Config::from_yaml(
            "listen: 0.0.0.0:6633\nvlans:\n  1: 1000\n  2: 500\n  4: 1000\n",
        )
        .unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:6633".parse().unwrap());
        assert_eq!(cfg.vlans.flood_ports(1), Some(vec![4]));
    }

    #[test]
    fn listen_defaults_to_openflow_port() {
        let cfg = Config::from_yaml("vlans:\n  1: 10\n").unwrap();
        assert_eq!(cfg.listen, DEFAULT_LISTEN_ADDR.parse().unwrap());
    }

    #[test]
    fn invalid_vlan_map_fails_to_load() {
        assert!(matches!(
            Config::from_yaml("vlans:\n  1: 0\n"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(Config::from_yaml("listen: 127.0.0.1:6653\n").is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Config::load("/nonexistent/controller.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/controller.yaml"));
    }
}
