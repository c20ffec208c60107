/// Chat directory server
use anyhow::Result;
use clap::Parser;
use roomchat_server::{Server, ServerConfig};
use std::{net::SocketAddr, time::Duration};
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind to this addr
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Name the server signs its own packets with
    #[arg(short, long, default_value = "server")]
    name: String,

    /// Milliseconds to wait on any single connect, read or write
    #[arg(short, long, default_value_t = 5000)]
    timeout_ms: u64,
}

impl From<Args> for ServerConfig {
    fn from(value: Args) -> Self {
        let Args {
            addr,
            name,
            timeout_ms,
        } = value;
        Self {
            addr,
            name,
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let server = Server::bind(args.into()).await?;
    info!("listening on {}", server.local_addr()?);
    server.run_until_ctrl_c().await
}
