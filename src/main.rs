use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};

use vlan_ofp::config::Config;
use vlan_ofp::learning_switch::VlanLearningSwitch;
use vlan_ofp::ofp_device::handle_client_connected;

/// Path to the default configuration file
const DEFAULT_CONFIG_FILE: &str = "controller.yaml";

/// Command line options
#[derive(Debug, Parser)]
#[command(version, about)]
struct Opts {
    /// Controls the verbosity/logging level (-v, -vv)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to configuration file
    #[clap(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Address to listen on, overriding the configuration file
    #[clap(short, long)]
    listen: Option<SocketAddr>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    init_logging(opts.verbose);

    let cfg = Config::load(&opts.config)
        .with_context(|| format!("loading {}", opts.config.display()))?;
    let listen = opts.listen.unwrap_or(cfg.listen);
    for (port, vid) in cfg.vlans.iter() {
        info!("port {} -> vlan {}", port, vid);
    }

    let controller = Arc::new(VlanLearningSwitch::new(cfg.vlans));
    let listener = TcpListener::bind(listen).with_context(|| format!("binding {}", listen))?;
    info!("listening for switches on {}", listen);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("failed to accept connection: {}", e);
                continue;
            }
        };
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| String::from("unknown peer"));
        info!("connection from {}", peer);
        let controller = Arc::clone(&controller);
        std::thread::spawn(move || {
            if let Err(e) = handle_client_connected(stream, controller.as_ref()) {
                error!("session with {} ended: {}", peer, e);
            }
        });
    }
    Ok(())
}
