//! ribd - routing information broker with an FPM mirror.

mod config;
mod rib;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnixListenerStream;
use tracing::{info, warn};

use seglink::broker::BrokerPeer;

use config::RibConfig;
use rib::Rib;

#[derive(Parser)]
#[command(name = "ribd", version, about = "Routing information broker")]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "/etc/seglink/ribd.json")]
    config: PathBuf,

    /// Broker socket path.
    #[arg(long, default_value = "/run/seglink/broker.sock")]
    socket: PathBuf,

    /// FPM endpoint to mirror routes to (host:port). Mirroring is
    /// disabled when absent or unreachable.
    #[arg(long)]
    fpm: Option<String>,
}

async fn fpm_writer(endpoint: String, mut frames: mpsc::UnboundedReceiver<Vec<u8>>) {
    let mut stream: Option<TcpStream> = None;
    while let Some(frame) = frames.recv().await {
        if stream.is_none() {
            match TcpStream::connect(&endpoint).await {
                Ok(s) => {
                    info!(endpoint = %endpoint, "FPM connected");
                    stream = Some(s);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "FPM unreachable, frame dropped");
                    continue;
                }
            }
        }
        if let Some(s) = stream.as_mut()
            && let Err(e) = s.write_all(&frame).await
        {
            warn!(error = %e, "FPM write failed, reconnecting on next frame");
            stream = None;
        }
    }
}

async fn serve_client(
    stream: UnixStream,
    rib: Rc<RefCell<Rib>>,
    fpm: Option<mpsc::UnboundedSender<Vec<u8>>>,
) {
    let mut peer = BrokerPeer::new(stream);

    // Replay the resource view to the fresh client. The borrow must
    // not be held across the sends: other client tasks share the RIB.
    let replay = rib.borrow().replay();
    for event in replay {
        if let Err(e) = peer.send(&event).await {
            warn!(error = %e, "client replay failed");
            return;
        }
    }

    loop {
        let req = match peer.recv().await {
            Ok(req) => req,
            Err(e) => {
                info!(error = %e, "client disconnected");
                return;
            }
        };
        let reaction = rib.borrow_mut().handle(req);
        for frame in reaction.fpm_frames {
            if let Some(fpm) = &fpm {
                let _ = fpm.send(frame);
            }
        }
        for event in &reaction.replies {
            if let Err(e) = peer.send(event).await {
                warn!(error = %e, "client send failed");
                return;
            }
        }
    }
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
    let config = RibConfig::load(&cli.config)?;
    let rib = Rc::new(RefCell::new(Rib::new(config)));

    if cli.socket.exists() {
        std::fs::remove_file(&cli.socket)
            .with_context(|| format!("removing stale socket {}", cli.socket.display()))?;
    }
    if let Some(parent) = cli.socket.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let listener = UnixListener::bind(&cli.socket)
        .with_context(|| format!("binding {}", cli.socket.display()))?;
    info!(socket = %cli.socket.display(), "ribd listening");

    let local = LocalSet::new();
    let fpm_tx = cli.fpm.map(|endpoint| {
        let (tx, rx) = mpsc::unbounded_channel();
        local.spawn_local(fpm_writer(endpoint, rx));
        tx
    });

    local
        .run_until(async move {
            let mut incoming = UnixListenerStream::new(listener);
            while let Some(stream) = incoming.next().await {
                match stream {
                    Ok(stream) => {
                        info!("daemon connected");
                        tokio::task::spawn_local(serve_client(
                            stream,
                            rib.clone(),
                            fpm_tx.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        })
        .await;
    Ok(())
}
