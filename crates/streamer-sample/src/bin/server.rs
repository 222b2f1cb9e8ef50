//! Sample echo server. Every accepted connection gets its own server channel.

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing::warn;

use streamer::ChannelConfig;
use streamer::ServerChannel;
use streamer_sample::DEFAULT_PORT;
use streamer_sample::EchoHandler;

#[derive(Parser, Debug)]
#[command(name = "streamer-server")]
#[command(about = "Echo server over streamer channels")]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    streamer_sample::init_logging(args.debug);

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("Waiting for clients on {}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Client connected {}", addr);

        let config = ChannelConfig::new().with_peer_name(addr.to_string());
        let channel = ServerChannel::with_config(stream, config);
        channel.bind(EchoHandler)?;

        tokio::spawn(async move {
            if let Err(e) = channel.run().await {
                warn!("Connection {} ended with error: {}", addr, e);
            }
        });
    }
}
