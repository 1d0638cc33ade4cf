use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use clap_derive::Parser;
use rudp_ft::config::{Destination, Environment, RudpFtConfig};
use rudp_ft::send_socket::{LossySendSocket, SendSocket};
use rudp_ft::sender::Sender;
use rudp_ft::util::init_logging;

/// Sends a file to an `rcv` receiver over RUDP-FT
#[derive(Parser)]
struct Args {
    /// percentage of outbound datagrams to drop deliberately
    #[clap(value_parser = clap::value_parser!(u32).range(0..=100))]
    loss_rate: u32,
    /// LAN or WAN
    environment: Environment,
    source: PathBuf,
    /// <dest_name>@<host>:<port>
    destination: Destination,

    /// give up after this many START frames without being admitted
    #[clap(long)]
    max_handshake_attempts: Option<u32>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.very_verbose);

    let mut config = RudpFtConfig::for_environment(args.environment);
    config.max_handshake_attempts = args.max_handshake_attempts;

    let peer = args.destination.resolve().await?;
    let loss_rate = args.loss_rate;
    let sender = Sender::bind(Arc::new(config), peer, |socket| {
        let lossy: Arc<dyn SendSocket> = Arc::new(LossySendSocket::new(socket, loss_rate)?);
        Ok(lossy)
    }).await?;

    sender.send_file(&args.source, &args.destination.name).await?;
    Ok(())
}
