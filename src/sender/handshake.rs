use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;
use tokio::net::UdpSocket;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace};
use crate::config::RudpFtConfig;
use crate::frame::{Frame, FrameKind};
use crate::send_socket::{send_frame, SendSocket};
use crate::sender::recv_from_peer;
use crate::util::backoff::ExponentialBackoff;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum HandshakeStep {
    /// START_OK: the session is ours
    Released,
    /// BUSY: wait this long, then knock again
    BackOff(Duration),
    /// anything else is a left-over from earlier traffic
    Ignore,
}

/// Decision logic for getting admitted by the receiver, both initially and after a BUSY in the
///  middle of a transfer
pub struct Handshake {
    backoff: ExponentialBackoff,
    attempts: u32,
    max_attempts: Option<u32>,
}

impl Handshake {
    pub fn new(config: &RudpFtConfig) -> Handshake {
        Handshake {
            backoff: ExponentialBackoff::new(config.backoff_initial, config.backoff_max),
            attempts: 0,
            max_attempts: config.max_handshake_attempts,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// to be called before every START that goes on the wire
    pub fn register_attempt(&mut self) -> anyhow::Result<()> {
        if let Some(max_attempts) = self.max_attempts {
            if self.attempts >= max_attempts {
                bail!("receiver did not admit the transfer after {} START attempts", self.attempts);
            }
        }
        self.attempts += 1;
        Ok(())
    }

    pub fn on_frame(&mut self, frame: &Frame) -> HandshakeStep {
        match frame.kind {
            FrameKind::StartOk => {
                self.backoff.reset();
                HandshakeStep::Released
            }
            FrameKind::Busy => HandshakeStep::BackOff(self.backoff.next_delay()),
            _ => HandshakeStep::Ignore,
        }
    }
}

/// Sends START until the receiver replies START_OK. BUSY replies make the sender back off
///  exponentially before the next START, silence makes it re-send START after
///  `handshake_wait`.
///
/// UDP has no 'connection refused', so without a configured `max_handshake_attempts` this
///  keeps trying for as long as it takes.
pub async fn await_release(
    recv_socket: &UdpSocket,
    send_socket: &dyn SendSocket,
    peer: SocketAddr,
    start: &Frame,
    config: &RudpFtConfig,
) -> anyhow::Result<()> {
    let mut handshake = Handshake::new(config);
    let mut buf = vec![0u8; Frame::MAX_DATAGRAM_LEN + 1];

    loop {
        handshake.register_attempt()?;
        debug!("sending START #{} to {:?}", handshake.attempts(), peer);
        send_frame(send_socket, peer, start).await;

        let deadline = Instant::now() + config.handshake_wait;
        loop {
            let frame = match recv_from_peer(recv_socket, peer, &mut buf, deadline).await? {
                Some(frame) => frame,
                None => {
                    debug!("no reply to START within {:?}", config.handshake_wait);
                    break;
                }
            };

            match handshake.on_frame(&frame) {
                HandshakeStep::Released => {
                    info!("receiver {:?} admitted the transfer after {} START attempt(s)", peer, handshake.attempts());
                    return Ok(());
                }
                HandshakeStep::BackOff(delay) => {
                    info!("receiver {:?} is busy - retrying in {:?}", peer, delay);
                    sleep(delay).await;
                    break;
                }
                HandshakeStep::Ignore => {
                    trace!("ignoring {:?} during handshake", frame);
                }
            }
        }
    }
}
