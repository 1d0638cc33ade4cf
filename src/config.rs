use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use std::net::SocketAddr;
use anyhow::{anyhow, bail};
use tokio::net::lookup_host;
use crate::frame::Frame;

/// The environment class selects a static window / timeout preset. There is no congestion
///  control, so these values are all the sender knows about the network.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Environment {
    Lan,
    Wan,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LAN" => Ok(Environment::Lan),
            "WAN" => Ok(Environment::Wan),
            _ => Err(anyhow!("environment must be LAN or WAN, was {:?}", s)),
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Lan => write!(f, "LAN"),
            Environment::Wan => write!(f, "WAN"),
        }
    }
}

/// A sender's target in the form `<dest_name>@<host>:<port>`. The name is everything before the
///  last `@`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Destination {
    pub name: String,
    pub host_port: String,
}

impl FromStr for Destination {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, host_port) = s.rsplit_once('@')
            .ok_or_else(|| anyhow!("expected <dest_name>@<host>:<port>, was {:?}", s))?;
        if name.is_empty() {
            bail!("destination file name is missing in {:?}", s);
        }
        if host_port.rsplit_once(':').map(|(host, port)| host.is_empty() || port.is_empty()).unwrap_or(true) {
            bail!("expected <host>:<port> after '@', was {:?}", host_port);
        }
        Ok(Destination {
            name: name.to_string(),
            host_port: host_port.to_string(),
        })
    }
}

impl Destination {
    /// resolves host and port, preferring an IPv4 address
    pub async fn resolve(&self) -> anyhow::Result<SocketAddr> {
        let candidates = lookup_host(self.host_port.as_str()).await
            .map_err(|e| anyhow!("cannot resolve {:?}: {}", self.host_port, e))?
            .collect::<Vec<_>>();

        candidates.iter()
            .find(|a| a.is_ipv4())
            .or(candidates.first())
            .copied()
            .ok_or_else(|| anyhow!("{:?} does not resolve to any address", self.host_port))
    }
}

#[derive(Debug, Clone)]
pub struct RudpFtConfig {
    pub environment: Environment,

    /// This is the number of file bytes carried by a single DATA frame. Together with the fixed
    ///  frame header, it must fit into a UDP datagram without IP fragmentation on all routes
    ///  between sender and receiver.
    ///
    /// Sender and receiver must agree on this value only insofar as the receiver accepts any
    ///  payload up to [Frame::MAX_PAYLOAD].
    pub max_payload: usize,

    /// This is the maximum number of *segments* (not bytes) that the sender has in flight
    ///  without acknowledgement.
    ///
    /// NB: A window bigger than the receiver's `receive_window_size` still works, but segments
    ///      beyond the receiver's window are dropped and retransmitted on timeout
    pub window_size: u32,
    /// retransmission timeout per segment
    pub rto: Duration,
    /// upper bound for waiting on incoming frames - this is the granularity of all timers
    pub poll_interval: Duration,

    /// time to wait for START_OK / BUSY before re-sending START
    pub handshake_wait: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// `None` means the sender keeps knocking forever - UDP has no 'connection refused'
    pub max_handshake_attempts: Option<u32>,

    pub receive_window_size: u32,
    pub nack_interval: Duration,
    pub idle_timeout: Duration,
    pub progress_log_bytes: u64,
    /// directory in which the receiver creates destination files
    pub output_dir: PathBuf,
}

impl RudpFtConfig {
    pub fn for_environment(environment: Environment) -> RudpFtConfig {
        match environment {
            Environment::Lan => RudpFtConfig {
                environment,
                max_payload: Frame::MAX_PAYLOAD,
                window_size: 128,
                rto: Duration::from_millis(40),
                poll_interval: Duration::from_millis(10),
                handshake_wait: Duration::from_millis(500),
                backoff_initial: Duration::from_millis(100),
                backoff_max: Duration::from_secs(2),
                max_handshake_attempts: None,
                receive_window_size: 4096,
                nack_interval: Duration::from_millis(50),
                idle_timeout: Duration::from_secs(5),
                progress_log_bytes: 10 * 1024 * 1024,
                output_dir: PathBuf::from("."),
            },
            Environment::Wan => RudpFtConfig {
                environment,
                max_payload: Frame::MAX_PAYLOAD,
                window_size: 512,
                rto: Duration::from_millis(250),
                poll_interval: Duration::from_millis(20),
                handshake_wait: Duration::from_secs(1),
                backoff_initial: Duration::from_millis(250),
                backoff_max: Duration::from_secs(5),
                max_handshake_attempts: None,
                receive_window_size: 4096,
                nack_interval: Duration::from_millis(50),
                idle_timeout: Duration::from_secs(5),
                progress_log_bytes: 10 * 1024 * 1024,
                output_dir: PathBuf::from("."),
            },
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_payload == 0 {
            bail!("max payload must not be 0");
        }
        if self.max_payload > Frame::MAX_PAYLOAD {
            bail!("max payload {} exceeds the protocol maximum of {}", self.max_payload, Frame::MAX_PAYLOAD);
        }
        if self.window_size == 0 {
            bail!("send window must hold at least one segment");
        }
        if self.receive_window_size == 0 {
            bail!("receive window must hold at least one segment");
        }
        if self.poll_interval.is_zero() {
            bail!("poll interval must not be 0");
        }
        if self.max_handshake_attempts == Some(0) {
            bail!("a handshake ceiling of 0 attempts would never send START");
        }

        Ok(())
    }
}
