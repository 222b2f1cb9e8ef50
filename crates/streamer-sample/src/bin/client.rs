//! Sample echo client. Sends each line of stdin to the server and prints the
//! echoed value.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::info;

use streamer::ChannelConfig;
use streamer::ClientChannel;
use streamer_sample::DEFAULT_PORT;
use streamer_sample::IEchoHandler;

#[derive(Parser, Debug)]
#[command(name = "streamer-client")]
#[command(about = "Echo client over a streamer channel")]
struct Args {
    /// Host to connect to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to connect to
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

    info!("Connecting to {}:{}...", args.host, args.port);
    let stream = TcpStream::connect((args.host.as_str(), args.port)).await?;
    info!("Connected!");

    let config = ChannelConfig::new().with_peer_name(format!("{}:{}", args.host, args.port));
    let channel = Arc::new(ClientChannel::with_config(stream, config));
    let echo = channel.typed::<IEchoHandler>()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let value = echo.echo_async(line).await?;
        println!("{}", value);
    }

    Ok(())
}
