use std::net::SocketAddr;
use std::path::PathBuf;
use clap::Parser;
use clap_derive::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use rudp_ft::tcp_baseline::receive_file;
use rudp_ft::util::init_logging;

/// Receives files from `t_ncp` senders over plain TCP, one after the other
#[derive(Parser)]
struct Args {
    port: u16,

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

    let listener = TcpListener::bind(SocketAddr::from(([0u8; 4], args.port))).await?;
    info!("listening on {:?}", listener.local_addr()?);

    loop {
        if let Err(e) = receive_file(&listener, &args.output_dir).await {
            error!("transfer failed: {}", e);
        }
    }
}
