use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use crate::config::RudpFtConfig;
use crate::frame::{Frame, FrameKind};
use crate::send_socket::{send_frame, SendSocket};
use crate::sender::handshake::await_release;
use crate::sender::recv_from_peer;
use crate::sender::send_window::SendWindow;
use crate::sender::TransferStats;
use crate::storage::SegmentSource;

/// Everything the window cycle needs for one transfer
pub(crate) struct Transmitter<'a> {
    pub recv_socket: &'a UdpSocket,
    pub send_socket: &'a dyn SendSocket,
    pub peer: SocketAddr,
    pub config: &'a RudpFtConfig,
    pub start: &'a Frame,
    pub source: &'a mut dyn SegmentSource,
}

impl Transmitter<'_> {
    /// Runs the window cycle until every segment is acknowledged:
    ///
    /// 1. fill the window
    /// 2. wait for a control frame, at most `poll_interval`
    /// 3. handle it (ACK, NACK or BUSY)
    /// 4. re-send segments whose retransmission timeout expired
    ///
    /// Timers are checked on every pass rather than scheduled individually, so their precision
    ///  is bounded by the poll interval.
    pub async fn run(&mut self, window: &mut SendWindow, stats: &mut TransferStats) -> anyhow::Result<()> {
        let mut buf = vec![0u8; Frame::MAX_DATAGRAM_LEN + 1];

        while !window.is_complete() {
            for seq in window.fill(Instant::now()) {
                self.send_segment(window, seq).await?;
                stats.transmissions += 1;
            }

            let deadline = Instant::now() + self.config.poll_interval;
            if let Some(frame) = recv_from_peer(self.recv_socket, self.peer, &mut buf, deadline).await? {
                match frame.kind {
                    FrameKind::Ack => {
                        if window.on_ack(frame.sequence) {
                            trace!("ACK #{} - window base is now {}", frame.sequence, window.send_base());
                        }
                    }
                    FrameKind::Nack => {
                        if window.on_nack(frame.sequence, Instant::now()) {
                            debug!("NACK #{} - fast retransmit", frame.sequence);
                            self.send_segment(window, frame.sequence).await?;
                            stats.transmissions += 1;
                            stats.retransmissions += 1;
                            stats.nack_retransmissions += 1;
                        }
                    }
                    FrameKind::Busy => {
                        warn!("receiver {:?} reports BUSY in the middle of the transfer - it dropped our session", self.peer);
                        await_release(self.recv_socket, self.send_socket, self.peer, self.start, self.config).await?;
                        window.rewind();
                        stats.rewinds += 1;
                        continue;
                    }
                    _ => {
                        trace!("ignoring {:?} during transfer", frame);
                    }
                }
            }

            for seq in window.timed_out(Instant::now()) {
                trace!("retransmission timeout for segment #{}", seq);
                self.send_segment(window, seq).await?;
                stats.transmissions += 1;
                stats.retransmissions += 1;
            }
        }
        Ok(())
    }

    async fn send_segment(&mut self, window: &SendWindow, seq: u32) -> anyhow::Result<()> {
        let table = window.table();
        let payload = table.read_payload(seq, &mut *self.source).await?;
        let frame = Frame::data(seq, table.file_size(), payload);
        send_frame(self.send_socket, self.peer, &frame).await;
        Ok(())
    }
}
