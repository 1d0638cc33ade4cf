use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use clap_derive::Parser;
use rudp_ft::config::{Environment, RudpFtConfig};
use rudp_ft::receiver::Receiver;
use rudp_ft::send_socket::{LossySendSocket, SendSocket};
use rudp_ft::storage::FileSinkFactory;
use rudp_ft::util::init_logging;

/// Receives files from `ncp` senders over RUDP-FT, one transfer at a time
#[derive(Parser)]
struct Args {
    /// percentage of outbound datagrams to drop deliberately
    #[clap(value_parser = clap::value_parser!(u32).range(0..=100))]
    loss_rate: u32,
    port: u16,
    /// LAN or WAN
    environment: Environment,

    /// directory for received files
    #[clap(long, default_value = ".")]
    output_dir: PathBuf,

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
    config.output_dir = args.output_dir;

    let sink_factory = Arc::new(FileSinkFactory::new(config.output_dir.clone()));
    let loss_rate = args.loss_rate;
    let mut receiver = Receiver::bind(Arc::new(config), args.port, sink_factory, |socket| {
        let lossy: Arc<dyn SendSocket> = Arc::new(LossySendSocket::new(socket, loss_rate)?);
        Ok(lossy)
    }).await?;

    receiver.recv_loop().await
}
