//! The isisd event loop.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{info, warn};

use seglink::broker::{BrokerConnection, BrokerEvent, BrokerRequest};
use seglink::error::Error;
use seglink::install::{InstallController, ResourceEvent, RouteNotify};

use crate::area::Area;
use crate::config::IsisConfig;

/// Delay between reconnection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Run the daemon: build the configured areas, connect to the broker
/// and drive adjacency SIDs from interface events.
pub async fn run(config: IsisConfig, broker_path: &Path) -> Result<()> {
    let mut areas = config
        .areas
        .iter()
        .map(Area::from_config)
        .collect::<Result<Vec<_>>>()?;
    let mut ctl = InstallController::new();
    info!(areas = areas.len(), broker = %broker_path.display(), "isisd starting");

    loop {
        let mut conn = match BrokerConnection::connect(broker_path).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "broker unreachable, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        info!("connected to broker");

        if let Err(e) = serve(&mut conn, &mut ctl, &mut areas).await {
            if e.is_fatal() {
                bail!("{}", e);
            }
            warn!(error = %e, "broker connection lost");
        }

        ctl.mark_disconnected(
            areas
                .iter_mut()
                .flat_map(|a| a.adj_sids.iter_mut().map(|s| &mut s.sid)),
        );
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

fn sync_areas(
    ctl: &mut InstallController,
    areas: &mut [Area],
    conn: &mut BrokerConnection,
) -> Result<(), Error> {
    for area in areas {
        for adj_sid in area.adj_sids.iter_mut() {
            ctl.sync_sid(&mut adj_sid.sid, conn)?;
        }
    }
    Ok(())
}

async fn serve(
    conn: &mut BrokerConnection,
    ctl: &mut InstallController,
    areas: &mut Vec<Area>,
) -> Result<(), Error> {
    sync_areas(ctl, areas, conn)?;
    conn.flush().await?;

    loop {
        match conn.recv().await? {
            BrokerEvent::Resource(event) => {
                ctl.apply_event(&event);
                match &event {
                    ResourceEvent::InterfaceUp { name, ifindex, .. } => {
                        for area in areas.iter_mut() {
                            match area.interface_up(name, *ifindex) {
                                Ok(Some(_)) => {
                                    // Track the neighbor so reachability
                                    // changes re-derive the SID.
                                    if let Some(iface) = area.interface_config(name)
                                        && let Some(neighbor) = iface.neighbor
                                    {
                                        conn.queue(&BrokerRequest::NexthopRegister {
                                            addr: neighbor,
                                        });
                                    }
                                    area.advertisement();
                                }
                                Ok(None) => {}
                                Err(e) => warn!(area = %area.tag, error = %e,
                                                "End.X allocation failed"),
                            }
                        }
                    }
                    ResourceEvent::InterfaceDown { name } => {
                        for area in areas.iter_mut() {
                            for mut adj_sid in area.interface_down(name) {
                                ctl.withdraw(&mut adj_sid.sid, conn)?;
                            }
                            area.advertisement();
                        }
                    }
                    _ => {}
                }
                sync_areas(ctl, areas, conn)?;
                conn.flush().await?;
            }
            BrokerEvent::RouteNotify {
                prefix, outcome, ..
            } => {
                for area in areas.iter_mut() {
                    for adj_sid in area.adj_sids.iter_mut() {
                        if adj_sid.sid.addr == prefix {
                            ctl.handle_route_notify(&mut adj_sid.sid, outcome);
                            if outcome == RouteNotify::Removed {
                                ctl.sync_sid(&mut adj_sid.sid, conn)?;
                            }
                        }
                    }
                }
                conn.flush().await?;
            }
        }
    }
}
