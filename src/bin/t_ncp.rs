use std::path::PathBuf;
use clap::Parser;
use clap_derive::Parser;
use rudp_ft::config::Destination;
use rudp_ft::tcp_baseline::send_file;
use rudp_ft::util::init_logging;

/// Sends a file to a `t_rcv` receiver over plain TCP
#[derive(Parser)]
struct Args {
    source: PathBuf,
    /// <dest_name>@<host>:<port>
    destination: Destination,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.very_verbose);

    let peer = args.destination.resolve().await?;
    send_file(peer, &args.source, &args.destination.name).await?;
    Ok(())
}
