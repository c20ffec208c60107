use anyhow::{bail, Result};
use clap::Parser;
use roomchat_client::{ClientConfig, ListenPort};
use std::{net::SocketAddr, time::Duration};

mod app;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Nickname to register with the server
    nick: String,

    /// Directory server to connect to
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,

    /// Port to receive pushes on; picked at random from the range when omitted
    #[arg(short, long)]
    port: Option<u16>,

    /// Lowest port of the random range
    #[arg(long, default_value_t = 45679)]
    low_port: u16,

    /// Highest port of the random range (exclusive)
    #[arg(long, default_value_t = 45965)]
    high_port: u16,

    /// Milliseconds to wait on any single connect, read or write
    #[arg(short, long, default_value_t = 5000)]
    timeout_ms: u64,
}

impl Args {
    fn into_config(self) -> Result<ClientConfig> {
        if self.port.is_none() && self.low_port >= self.high_port {
            bail!("--low-port must be below --high-port");
        }
        let mut config = ClientConfig::new(self.nick, self.server);
        config.listen_port = match self.port {
            Some(port) => ListenPort::Fixed(port),
            None => ListenPort::Random(self.low_port..self.high_port),
        };
        config.timeout = Duration::from_millis(self.timeout_ms);
        Ok(config)
    }
}

// Logs go to stderr so they stay out of the chat
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    app::run(args.into_config()?).await?;
    Ok(())
}
