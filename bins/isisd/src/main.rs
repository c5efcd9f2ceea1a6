//! isisd - per-area SRv6 locators and adjacency End.X SIDs.

mod area;
mod config;
mod run;

use std::net::Ipv6Addr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use seglink::locator::LocatorDef;
use seglink::sid::SidStructure;

use config::{AreaConfig, IsisConfig};

#[derive(Parser)]
#[command(name = "isisd", version, about = "IS-IS SRv6 daemon")]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "/etc/seglink/isisd.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage area locators.
    Locator(LocatorCmd),

    /// Run the daemon.
    Run {
        /// Broker socket path.
        #[arg(long, default_value = "/run/seglink/broker.sock")]
        broker: PathBuf,
    },
}

#[derive(Args)]
struct LocatorCmd {
    #[command(subcommand)]
    action: LocatorAction,
}

#[derive(Subcommand)]
enum LocatorAction {
    /// Define a locator in an area.
    Add {
        /// Area tag.
        area: String,
        /// Locator name.
        name: String,
        /// Locator prefix in CIDR form (e.g. 2001:db8::/48).
        prefix: String,
        /// Block length in bits.
        #[arg(long)]
        block: u8,
        /// Node length in bits.
        #[arg(long)]
        node: u8,
        /// Function length in bits.
        #[arg(long, default_value_t = 16)]
        function: u8,
        /// Argument length in bits.
        #[arg(long, default_value_t = 0)]
        argument: u8,
        /// Compressed (uSID) locator.
        #[arg(long)]
        usid: bool,
    },

    /// Remove a locator from an area.
    Del {
        /// Area tag.
        area: String,
        /// Locator name.
        name: String,
    },

    /// Print configured locators.
    Show,
}

fn parse_prefix(raw: &str) -> Result<(Ipv6Addr, u8)> {
    let (addr, len) = raw
        .split_once('/')
        .with_context(|| format!("prefix {} must be addr/len", raw))?;
    let addr: Ipv6Addr = addr.parse().with_context(|| format!("prefix {}", raw))?;
    let len: u8 = len.parse().with_context(|| format!("prefix {}", raw))?;
    if len > 128 {
        bail!("prefix length {} exceeds 128", len);
    }
    Ok((addr, len))
}

fn locator_add(config: &mut IsisConfig, area_tag: String, def: LocatorDef) -> Result<()> {
    let area = match config.area_mut(&area_tag) {
        Some(area) => area,
        None => {
            config.areas.push(AreaConfig {
                tag: area_tag.clone(),
                locators: Vec::new(),
                interfaces: Vec::new(),
            });
            config.areas.last_mut().unwrap()
        }
    };
    if let Some(existing) = area.locators.iter_mut().find(|l| l.name == def.name) {
        *existing = def;
    } else {
        area.locators.push(def);
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
    let mut config = IsisConfig::load(&cli.config)?;

    match cli.command {
        Command::Locator(cmd) => {
            match cmd.action {
                LocatorAction::Add {
                    area,
                    name,
                    prefix,
                    block,
                    node,
                    function,
                    argument,
                    usid,
                } => {
                    let (prefix, prefix_len) = parse_prefix(&prefix)?;
                    let def = LocatorDef {
                        name,
                        prefix,
                        prefix_len,
                        structure: SidStructure::new(block, node, function, argument)?,
                        usid,
                    };
                    locator_add(&mut config, area, def)?;
                }
                LocatorAction::Del { area, name } => {
                    let Some(area) = config.area_mut(&area) else {
                        bail!("unknown area {}", area);
                    };
                    area.locators.retain(|l| l.name != name);
                }
                LocatorAction::Show => {
                    for area in &config.areas {
                        for loc in &area.locators {
                            println!(
                                "area {} locator {} {}/{} block {} node {} function {} argument {}{}",
                                area.tag,
                                loc.name,
                                loc.prefix,
                                loc.prefix_len,
                                loc.structure.block_len,
                                loc.structure.node_len,
                                loc.structure.function_len,
                                loc.structure.argument_len,
                                if loc.usid { " usid" } else { "" },
                            );
                        }
                    }
                    return Ok(());
                }
            }
            // Every area must still build cleanly before the file is
            // written back.
            for area in &config.areas {
                area::Area::from_config(area)?;
            }
            config.save(&cli.config)?;
        }
        Command::Run { broker } => {
            run::run(config, &broker).await?;
        }
    }
    Ok(())
}
