//! The sending side of a transfer: the segment table, the sliding window with selective-repeat
//!  retransmission, and the handshake that gets (and keeps) the sender admitted by the receiver.

pub mod segment_table;
pub mod send_window;
pub mod handshake;
mod transmitter;

use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace};
use crate::config::RudpFtConfig;
use crate::frame::Frame;
use crate::send_socket::{send_frame, SendSocket};
use crate::sender::segment_table::SegmentTable;
use crate::sender::send_window::SendWindow;
use crate::sender::transmitter::Transmitter;
use crate::storage::{open_source, SegmentSource};

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TransferStats {
    pub file_size: u64,
    pub segments: u32,
    /// DATA frames put on the wire, including retransmissions
    pub transmissions: u64,
    pub retransmissions: u64,
    /// the subset of `retransmissions` requested by the receiver through NACK
    pub nack_retransmissions: u64,
    /// how often the receiver dropped the session mid-transfer, forcing a restart from segment 0
    pub rewinds: u32,
    pub elapsed: Duration,
}

impl TransferStats {
    /// payload bytes per second, not counting retransmissions
    pub fn goodput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.file_size as f64 / secs
        }
        else {
            0.0
        }
    }
}

impl Display for TransferStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bytes in {} segments, {:.3}s, {:.2} Mb/s - {} DATA frames sent ({} retransmissions, {} on NACK)",
               self.file_size,
               self.segments,
               self.elapsed.as_secs_f64(),
               self.goodput() * 8.0 / 1_000_000.0,
               self.transmissions,
               self.retransmissions,
               self.nack_retransmissions,
        )
    }
}

/// Transfers a single file to a receiver. Inbound frames are read from `recv_socket`, outbound
///  frames go through `send_socket` - in production both are the same UDP socket, the latter
///  typically wrapped for loss injection.
pub struct Sender {
    config: Arc<RudpFtConfig>,
    recv_socket: Arc<UdpSocket>,
    send_socket: Arc<dyn SendSocket>,
    peer: SocketAddr,
}

impl Sender {
    pub fn new(config: Arc<RudpFtConfig>, recv_socket: Arc<UdpSocket>, send_socket: Arc<dyn SendSocket>, peer: SocketAddr) -> anyhow::Result<Sender> {
        config.validate()?;
        Ok(Sender {
            config,
            recv_socket,
            send_socket,
            peer,
        })
    }

    /// Binds an ephemeral UDP socket of the peer's address family
    pub async fn bind(config: Arc<RudpFtConfig>, peer: SocketAddr, wrap_send_socket: impl FnOnce(Arc<dyn SendSocket>) -> anyhow::Result<Arc<dyn SendSocket>>) -> anyhow::Result<Sender> {
        let local: SocketAddr = if peer.is_ipv4() {
            ([0u8; 4], 0).into()
        }
        else {
            ([0u16; 8], 0).into()
        };

        let socket = Arc::new(UdpSocket::bind(local).await?);
        info!("bound sender socket to {:?}", socket.as_ref().local_addr()?);

        let send_socket = wrap_send_socket(Arc::new(socket.clone()))?;
        Sender::new(config, socket, send_socket, peer)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send_file(&self, source_path: &Path, destination_name: &str) -> anyhow::Result<TransferStats> {
        let (mut source, file_size) = open_source(source_path).await?;
        info!("sending {:?} ({} bytes) to {}@{:?}", source_path, file_size, destination_name, self.peer);
        self.send(&mut source, file_size, destination_name).await
    }

    /// Runs a complete session: handshake, window cycle until everything is acknowledged, FIN
    pub async fn send(&self, source: &mut dyn SegmentSource, file_size: u64, destination_name: &str) -> anyhow::Result<TransferStats> {
        let table = SegmentTable::new(file_size, self.config.max_payload)?;
        let start = Frame::start(destination_name, file_size)?;

        let mut stats = TransferStats {
            file_size,
            segments: table.total_segments(),
            ..Default::default()
        };
        let started_at = Instant::now();

        handshake::await_release(&self.recv_socket, self.send_socket.as_ref(), self.peer, &start, &self.config).await?;

        let mut window = SendWindow::new(table, self.config.window_size, self.config.rto);
        let mut transmitter = Transmitter {
            recv_socket: &self.recv_socket,
            send_socket: self.send_socket.as_ref(),
            peer: self.peer,
            config: &self.config,
            start: &start,
            source,
        };
        transmitter.run(&mut window, &mut stats).await?;

        let fin_seq = stats.segments.saturating_sub(1);
        debug!("all {} segments acknowledged - sending FIN #{}", stats.segments, fin_seq);
        send_frame(self.send_socket.as_ref(), self.peer, &Frame::fin(fin_seq, file_size)).await;

        stats.elapsed = started_at.elapsed();
        info!("transfer complete: {}", stats);
        Ok(stats)
    }
}

/// Waits for the next well-formed frame from `peer`, returning `None` when `deadline` passes
///  first. Frames from other addresses and malformed datagrams are dropped.
pub(crate) async fn recv_from_peer(socket: &UdpSocket, peer: SocketAddr, buf: &mut [u8], deadline: Instant) -> anyhow::Result<Option<Frame>> {
    loop {
        let (len, from) = match timeout_at(deadline, socket.recv_from(buf)).await {
            Err(_) => return Ok(None),
            Ok(result) => result?,
        };

        if from != peer {
            debug!("dropping datagram from {:?} - expecting frames from {:?} only", from, peer);
            continue;
        }

        match Frame::deser(&mut &buf[..len]) {
            Ok(frame) => {
                trace!("received {:?}", frame);
                return Ok(Some(frame));
            }
            Err(e) => debug!("dropping malformed datagram from {:?}: {}", from, e),
        }
    }
}
