//! aerolink development bridge
//!
//! Plays the network end of bridge mode: every client that connects gets a
//! simulated product announced to it, followed by heartbeats and, when
//! asked for, a component hot-swap at a fixed interval.

mod product;
mod session;

use clap::Parser;
use product::SimulatedProduct;
use session::ClientSession;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "aerolink-bridge", version, about)]
struct Args {
    /// Address to accept SDK connections on
    #[arg(long, default_value = "0.0.0.0:4030", env = "AEROLINK_BRIDGE_LISTEN")]
    listen: SocketAddr,

    /// Model name the simulated product reports
    #[arg(long, default_value = "Surveyor")]
    model: String,

    /// Identity the simulated product reports
    #[arg(long, default_value = "AC-0001")]
    identity: String,

    /// Mount/unmount the payload gimbal every N seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    swap_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let swap_interval = (args.swap_interval_secs > 0)
        .then(|| Duration::from_secs(args.swap_interval_secs));

    let listener = TcpListener::bind(args.listen).await?;
    info!(
        "[BRIDGE] Listening on {} as {} ({})",
        listener.local_addr()?,
        args.identity,
        args.model
    );

    loop {
        let (socket, addr) = listener.accept().await?;
        socket.set_nodelay(true)?;
        info!("[BRIDGE] Connection from: {}", addr);

        let product = SimulatedProduct::new(args.identity.clone(), args.model.clone());
        tokio::spawn(async move {
            let session = ClientSession::new(socket, addr.to_string(), product, swap_interval);
            if let Err(e) = session.run().await {
                error!("[BRIDGE] Session with {} ended: {}", addr, e);
            }
        });
    }
}
