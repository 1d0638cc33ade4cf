use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::bail;
use tokio::net::UdpSocket;
use tracing::{error, trace};
use crate::frame::Frame;
use crate::util::random::{Random, RngRandom};

/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate mocking
///  the I/O part away for testing and to inject datagram loss
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]);

    fn local_addr(&self) -> SocketAddr;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        trace!("UDP socket: sending packet to {:?}", to);

        if let Err(e) = self.send_to(packet_buf, to).await {
            error!("error sending UDP packet to {:?}: {}", to, e);
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.as_ref().local_addr()
            .expect("UdpSocket should have an initialized local addr")
    }
}

/// Convenience for the common case of serializing a frame and sending it
pub async fn send_frame(socket: &dyn SendSocket, to: SocketAddr, frame: &Frame) {
    trace!("sending {:?} to {:?}", frame, to);
    socket.do_send_packet(to, &frame.to_bytes()).await;
}


/// Decorates a [SendSocket], dropping outbound datagrams pseudo-randomly at a configured rate.
///  Apart from that, it behaves like the socket it wraps. Loss is applied to all frame kinds
///  alike.
pub struct LossySendSocket<R: Random = RngRandom> {
    inner: Arc<dyn SendSocket>,
    /// percent, 0..=100
    loss_rate: u32,
    _random: PhantomData<fn() -> R>,
}

impl LossySendSocket<RngRandom> {
    pub fn new(inner: Arc<dyn SendSocket>, loss_rate: u32) -> anyhow::Result<LossySendSocket<RngRandom>> {
        Self::with_random(inner, loss_rate)
    }
}

impl<R: Random> LossySendSocket<R> {
    pub fn with_random(inner: Arc<dyn SendSocket>, loss_rate: u32) -> anyhow::Result<LossySendSocket<R>> {
        if loss_rate > 100 {
            bail!("loss rate must be a percentage between 0 and 100, was {}", loss_rate);
        }
        Ok(LossySendSocket {
            inner,
            loss_rate,
            _random: PhantomData,
        })
    }

    fn should_drop(&self) -> bool {
        match self.loss_rate {
            0 => false,
            100 => true,
            rate => R::gen_u32_range(0..100) < rate,
        }
    }
}

#[async_trait]
impl<R: Random + 'static> SendSocket for LossySendSocket<R> {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        if self.should_drop() {
            trace!("loss injection: dropping packet to {:?}", to);
            return;
        }
        self.inner.do_send_packet(to, packet_buf).await;
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;
    use rstest::rstest;
    use tokio::runtime::Builder;
    use crate::util::random::{MockRandom, MOCK_RANDOM_MUTEX};
    use super::*;

    #[rstest]
    #[case::no_loss_low_draw(0, 0, true)]
    #[case::no_loss_high_draw(0, 99, true)]
    #[case::below_rate(20, 19, false)]
    #[case::at_rate(20, 20, true)]
    #[case::above_rate(20, 73, true)]
    #[case::half_low(50, 3, false)]
    #[case::half_high(50, 50, true)]
    #[case::total_loss(100, 99, false)]
    fn test_loss_decision(#[case] loss_rate: u32, #[case] draw: u32, #[case] expected_sent: bool) {
        let _lock = MOCK_RANDOM_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let ctx = MockRandom::gen_u32_range_context();
        ctx.expect()
            .return_const(draw);

        let mut inner = MockSendSocket::new();
        inner.expect_do_send_packet()
            .with(eq(SocketAddr::from(([1,2,3,4], 9))), eq(vec![1u8, 2, 3]))
            .times(if expected_sent { 1 } else { 0 })
            .return_const(());

        let lossy = LossySendSocket::<MockRandom>::with_random(Arc::new(inner), loss_rate).unwrap();

        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            lossy.do_send_packet(SocketAddr::from(([1,2,3,4], 9)), &[1, 2, 3]).await;
        });
    }

    #[test]
    fn test_rejects_invalid_loss_rate() {
        assert!(LossySendSocket::new(Arc::new(MockSendSocket::new()), 101).is_err());
        assert!(LossySendSocket::new(Arc::new(MockSendSocket::new()), 100).is_ok());
    }

    #[test]
    fn test_local_addr_is_delegated() {
        let mut inner = MockSendSocket::new();
        inner.expect_local_addr()
            .return_const(SocketAddr::from(([127,0,0,1], 4711)));
        let lossy = LossySendSocket::new(Arc::new(inner), 10).unwrap();
        assert_eq!(lossy.local_addr(), SocketAddr::from(([127,0,0,1], 4711)));
    }

    #[test]
    fn test_send_frame_serializes() {
        let mut socket = MockSendSocket::new();
        socket.expect_do_send_packet()
            .once()
            .withf(|addr, buf|
                addr == &SocketAddr::from(([1,2,3,4], 9)) &&
                    buf == [4, 0,0,0,5, 0,0,0,0, 0,0,0,0,0,0,0,0].as_slice()
            )
            .returning(|_, _| ());

        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            send_frame(&socket, SocketAddr::from(([1,2,3,4], 9)), &Frame::ack(5)).await;
        });
    }
}
