//! staticd - operator-declared SRv6 local SIDs.

mod config;
mod run;

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};

use seglink::behavior::Behavior;

use config::{SidConfig, StaticConfig};

#[derive(Parser)]
#[command(name = "staticd", version, about = "Static SRv6 local-SID daemon")]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "/etc/seglink/staticd.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage declared SIDs.
    Sid(SidCmd),

    /// Run the daemon.
    Run {
        /// Broker socket path.
        #[arg(long, default_value = "/run/seglink/broker.sock")]
        broker: PathBuf,
    },
}

#[derive(Args)]
struct SidCmd {
    #[command(subcommand)]
    action: SidAction,
}

#[derive(Subcommand)]
enum SidAction {
    /// Declare a SID.
    Add {
        /// SID address.
        address: Ipv6Addr,
        /// Behavior (end, end-x, end-dt4, un, ua, ...).
        behavior: String,
    },

    /// Set an attribute on a declared SID.
    Set {
        /// SID address.
        address: Ipv6Addr,
        /// Attached VRF.
        #[arg(long)]
        vrf: Option<String>,
        /// Outgoing interface.
        #[arg(long)]
        dev: Option<String>,
        /// IPv6 adjacency.
        #[arg(long)]
        via: Option<Ipv6Addr>,
        /// IPv4 nexthop (End.DX4).
        #[arg(long)]
        via4: Option<Ipv4Addr>,
    },

    /// Remove a declared SID.
    Del {
        /// SID address.
        address: Ipv6Addr,
    },

    /// Print the declared SIDs in declaration order.
    Show,
}

fn sid_add(config: &mut StaticConfig, address: Ipv6Addr, behavior: &str) -> Result<()> {
    let Some(behavior) = Behavior::from_cli(behavior) else {
        bail!("unknown behavior: {}", behavior);
    };
    if let Some(existing) = config.sids.iter().find(|s| s.address == address) {
        if existing.behavior != behavior {
            bail!(
                "SID {} already declared with behavior {}",
                address,
                existing.behavior
            );
        }
        return Ok(());
    }
    config.sids.push(SidConfig {
        address,
        behavior,
        vrf: None,
        interface: None,
        nexthop: None,
        nexthop4: None,
    });
    Ok(())
}

fn sid_set(
    config: &mut StaticConfig,
    address: Ipv6Addr,
    vrf: Option<String>,
    dev: Option<String>,
    via: Option<Ipv6Addr>,
    via4: Option<Ipv4Addr>,
) -> Result<()> {
    if vrf.is_none() && dev.is_none() && via.is_none() && via4.is_none() {
        bail!("one of --vrf, --dev, --via, --via4 is required");
    }
    let Some(sid) = config.sids.iter_mut().find(|s| s.address == address) else {
        bail!("no SID declared at {}", address);
    };
    if let Some(vrf) = vrf {
        sid.vrf = Some(vrf);
    }
    if let Some(dev) = dev {
        sid.interface = Some(dev);
    }
    if let Some(via) = via {
        sid.nexthop = Some(via);
    }
    if let Some(via4) = via4 {
        sid.nexthop4 = Some(via4);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = StaticConfig::load(&cli.config)?;

    match cli.command {
        Command::Sid(cmd) => {
            match cmd.action {
                SidAction::Add { address, behavior } => {
                    sid_add(&mut config, address, &behavior)?;
                }
                SidAction::Set {
                    address,
                    vrf,
                    dev,
                    via,
                    via4,
                } => {
                    sid_set(&mut config, address, vrf, dev, via, via4)?;
                }
                SidAction::Del { address } => {
                    config.sids.retain(|s| s.address != address);
                }
                SidAction::Show => {
                    for sid in &config.sids {
                        let mut line = format!("{} behavior {}", sid.address, sid.behavior);
                        if let Some(vrf) = &sid.vrf {
                            line.push_str(&format!(" vrf {}", vrf));
                        }
                        if let Some(dev) = &sid.interface {
                            line.push_str(&format!(" dev {}", dev));
                        }
                        if let Some(via) = &sid.nexthop {
                            line.push_str(&format!(" via {}", via));
                        }
                        if let Some(via4) = &sid.nexthop4 {
                            line.push_str(&format!(" via4 {}", via4));
                        }
                        println!("{}", line);
                    }
                    return Ok(());
                }
            }
            // Re-validate the whole file before it is written back.
            config.build_table()?;
            config.save(&cli.config)?;
        }
        Command::Run { broker } => {
            run::run(config, &broker).await?;
        }
    }
    Ok(())
}
