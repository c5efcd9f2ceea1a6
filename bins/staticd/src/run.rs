//! The staticd event loop.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{info, warn};

use seglink::broker::{BrokerConnection, BrokerEvent};
use seglink::error::Error;
use seglink::install::{InstallController, RouteNotify};
use seglink::static_sid::StaticSidTable;

use crate::config::StaticConfig;

/// Delay between reconnection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Run the daemon: connect to the broker, replay the declared SIDs,
/// then track resource events until shutdown.
pub async fn run(config: StaticConfig, broker_path: &Path) -> Result<()> {
    let mut table = config.build_table()?;
    let mut ctl = InstallController::new();
    info!(sids = table.len(), broker = %broker_path.display(), "staticd starting");

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

        if let Err(e) = serve(&mut conn, &mut ctl, &mut table).await {
            if e.is_fatal() {
                bail!("{}", e);
            }
            warn!(error = %e, "broker connection lost");
        }

        // Every SENT flag is stale once the connection drops; the
        // replay after reconnect re-derives all of them.
        ctl.mark_disconnected(table.iter_mut());
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn serve(
    conn: &mut BrokerConnection,
    ctl: &mut InstallController,
    table: &mut StaticSidTable,
) -> Result<(), Error> {
    ctl.sync_table(table, conn)?;
    conn.flush().await?;

    loop {
        match conn.recv().await? {
            BrokerEvent::Resource(event) => {
                ctl.handle_event(&event, table, conn)?;
                conn.flush().await?;
            }
            BrokerEvent::RouteNotify {
                prefix, outcome, ..
            } => {
                if let Some(sid) = table.lookup_mut(prefix) {
                    ctl.handle_route_notify(sid, outcome);
                    // A DEL ack is the gap between the two edges of an
                    // attribute change; a failed install stays down
                    // until the next resource event.
                    if outcome == RouteNotify::Removed {
                        ctl.sync_sid(sid, conn)?;
                        conn.flush().await?;
                    }
                }
            }
        }
    }
}
