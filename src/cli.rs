use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "governor", version, about, long_about = None)]
pub struct Cli {
    /// Node configuration file (JSON)
    #[arg(short, long, value_name = "FILE", env = "GOVERNOR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Verbose mode (-v, -vv, -vvv)
    #[arg(short, action = ArgAction::Count, global = true)]
    pub verbosity: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Starts a node and serves its HTTP API until interrupted
    Run(RunArgs),
    /// Asks a running node for a lease and prints it
    Lease {
        /// Lease duration in seconds
        #[arg(short, long, default_value_t = 60)]
        duration: u64,

        /// HTTP API of the node to ask
        #[arg(long, default_value = "http://127.0.0.1:7000")]
        api: String,
    },
    /// Prints the status of a running node
    Status {
        #[arg(long, default_value = "http://127.0.0.1:7000")]
        api: String,
    },
    /// Prints the resources a node would load from its inventory
    Inventory {
        /// Host address stamped on each resource
        #[arg(long)]
        host: Option<String>,
    },
}

/// Overrides applied on top of the configuration file.
#[derive(Debug, Default, Clone, Args)]
pub struct RunArgs {
    /// Node identity on the leasing network
    #[arg(long)]
    pub node_id: Option<String>,

    /// UDP address for protocol traffic
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Address other nodes know this one by
    #[arg(long)]
    pub advertise: Option<String>,

    /// HTTP API address
    #[arg(long)]
    pub api: Option<SocketAddr>,

    /// UDP address of a peer node; repeat for several
    #[arg(long = "peer", value_name = "ADDR")]
    pub peers: Vec<SocketAddr>,

    /// Device inventory file (JSON)
    #[arg(long, value_name = "FILE")]
    pub inventory: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "governor",
            "-vv",
            "run",
            "--listen",
            "0.0.0.0:4100",
            "--peer",
            "10.0.0.2:4000",
            "--peer",
            "10.0.0.3:4000",
        ])
        .unwrap();

        assert_eq!(cli.verbosity, 2);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.listen, Some("0.0.0.0:4100".parse().unwrap()));
        assert_eq!(args.peers.len(), 2);
        assert!(args.api.is_none());
    }

    #[test]
    fn test_lease_defaults() {
        let cli = Cli::try_parse_from(["governor", "lease"]).unwrap();
        match cli.command {
            Commands::Lease { duration, api } => {
                assert_eq!(duration, 60);
                assert_eq!(api, "http://127.0.0.1:7000");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
