//! Command-line interface definitions and parsing

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use mesh_core::MacAddress;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-AP controller daemon", long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// AL MAC address of the local bridge, e.g. 02:00:00:00:00:01
    #[arg(long)]
    pub bridge_mac: MacAddress,

    /// UDP address to receive broker frames on
    #[arg(long, default_value = "0.0.0.0:7150")]
    pub listen: SocketAddr,

    /// UDP address of the broker
    #[arg(long, default_value = "127.0.0.1:7151")]
    pub broker: SocketAddr,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let cli = Cli::try_parse_from(["mesh-controller", "--bridge-mac", "02:00:00:00:00:01"]).unwrap();
        assert_eq!(cli.bridge_mac, MacAddress::new([0x02, 0, 0, 0, 0, 0x01]));
        assert_eq!(cli.listen.port(), 7150);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_bridge_mac_is_required() {
        assert!(Cli::try_parse_from(["mesh-controller"]).is_err());
        assert!(Cli::try_parse_from(["mesh-controller", "--bridge-mac", "not-a-mac"]).is_err());
    }
}
