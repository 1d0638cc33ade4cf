//! The receiving side: a single-session admission gate in front of the reorder buffer and the
//!  acknowledgement logic, driven by one receive loop on one socket.

pub mod admission;
pub mod session;
pub mod reorder_buffer;
pub mod ack_generator;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace};
use crate::config::RudpFtConfig;
use crate::frame::Frame;
use crate::receiver::admission::AdmissionController;
use crate::send_socket::{send_frame, SendSocket};
use crate::storage::SinkFactory;

pub struct Receiver {
    config: Arc<RudpFtConfig>,
    recv_socket: Arc<UdpSocket>,
    send_socket: Arc<dyn SendSocket>,
    admission: AdmissionController,
    buf: Vec<u8>,
}

impl Receiver {
    pub fn new(config: Arc<RudpFtConfig>, recv_socket: Arc<UdpSocket>, send_socket: Arc<dyn SendSocket>, sink_factory: Arc<dyn SinkFactory>) -> anyhow::Result<Receiver> {
        config.validate()?;
        Ok(Receiver {
            admission: AdmissionController::new(config.clone(), sink_factory),
            config,
            recv_socket,
            send_socket,
            buf: vec![0u8; Frame::MAX_DATAGRAM_LEN + 1],
        })
    }

    /// Binds the receiver's socket on all interfaces. `wrap_send_socket` gets the socket's send
    ///  side for decoration (loss injection in particular).
    pub async fn bind(
        config: Arc<RudpFtConfig>,
        port: u16,
        sink_factory: Arc<dyn SinkFactory>,
        wrap_send_socket: impl FnOnce(Arc<dyn SendSocket>) -> anyhow::Result<Arc<dyn SendSocket>>,
    ) -> anyhow::Result<Receiver> {
        let socket = Arc::new(UdpSocket::bind(SocketAddr::from(([0u8; 4], port))).await?);
        info!("receiver listening on {:?}", socket.as_ref().local_addr()?);

        let send_socket = wrap_send_socket(Arc::new(socket.clone()))?;
        Receiver::new(config, socket, send_socket, sink_factory)
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.recv_socket.as_ref().local_addr()?)
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Waits for a single datagram for at most the poll interval and handles it. The idle check
    ///  runs on every wakeup, with or without a frame.
    pub async fn poll_once(&mut self) -> anyhow::Result<()> {
        let received = timeout(self.config.poll_interval, self.recv_socket.recv_from(&mut self.buf)).await;
        let now = Instant::now();

        let (len, from) = match received {
            Err(_) => {
                self.admission.check_idle(now).await;
                return Ok(());
            }
            Ok(result) => result?,
        };

        let frame = match Frame::deser(&mut &self.buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping malformed datagram from {:?}: {}", from, e);
                self.admission.check_idle(now).await;
                return Ok(());
            }
        };
        trace!("received {:?} from {:?}", frame, from);

        for reply in self.admission.on_frame(from, frame, now).await {
            send_frame(self.send_socket.as_ref(), from, &reply).await;
        }
        Ok(())
    }

    /// Serves senders one after the other, forever. This returns only on socket errors.
    pub async fn recv_loop(&mut self) -> anyhow::Result<()> {
        loop {
            self.poll_once().await?;
        }
    }

    /// Serves senders until `num_sessions` transfers were completed successfully
    pub async fn run_until_sessions_completed(&mut self, num_sessions: usize) -> anyhow::Result<()> {
        while self.admission.num_completed_sessions() < num_sessions {
            self.poll_once().await?;
        }
        Ok(())
    }
}
