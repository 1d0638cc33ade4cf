use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use crate::frame::{Frame, FrameKind};
use crate::send_socket::SendSocket;

/// Forwards everything to the wrapped socket, keeping a copy of every frame that was sent
pub struct TrackingSendSocket {
    inner: Arc<dyn SendSocket>,
    tracker: Arc<RwLock<Vec<(SocketAddr, Frame)>>>,
}

impl TrackingSendSocket {
    pub fn new(inner: Arc<dyn SendSocket>) -> TrackingSendSocket {
        TrackingSendSocket {
            inner,
            tracker: Default::default(),
        }
    }

    /// returns sent frames, clearing the internal buffer
    pub async fn sent_frames(&self) -> Vec<(SocketAddr, Frame)> {
        let mut lock = self.tracker.write().await;
        std::mem::take(&mut *lock)
    }

    /// the kinds of frames sent so far, without clearing the buffer
    pub async fn sent_kinds(&self) -> Vec<FrameKind> {
        self.tracker.read().await
            .iter()
            .map(|(_, f)| f.kind)
            .collect()
    }
}

#[async_trait]
impl SendSocket for TrackingSendSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        if let Ok(frame) = Frame::deser(&mut &packet_buf[..]) {
            self.tracker.write().await.push((to, frame));
        }
        self.inner.do_send_packet(to, packet_buf).await;
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}

/// Drops the first frame that matches a predicate, and forwards everything else
pub struct DropOnceSendSocket {
    inner: Arc<dyn SendSocket>,
    predicate: Box<dyn Fn(&Frame) -> bool + Send + Sync>,
    has_dropped: AtomicBool,
}

impl DropOnceSendSocket {
    pub fn new(inner: Arc<dyn SendSocket>, predicate: impl Fn(&Frame) -> bool + Send + Sync + 'static) -> DropOnceSendSocket {
        DropOnceSendSocket {
            inner,
            predicate: Box::new(predicate),
            has_dropped: AtomicBool::new(false),
        }
    }

    /// drops the first DATA frame for segment `sequence`
    pub fn data(inner: Arc<dyn SendSocket>, sequence: u32) -> DropOnceSendSocket {
        Self::new(inner, move |f| f.kind == FrameKind::Data && f.sequence == sequence)
    }

    pub fn has_dropped(&self) -> bool {
        self.has_dropped.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SendSocket for DropOnceSendSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        if !self.has_dropped() {
            if let Ok(frame) = Frame::deser(&mut &packet_buf[..]) {
                if (self.predicate)(&frame) && !self.has_dropped.swap(true, Ordering::AcqRel) {
                    debug!("dropping {:?} to {:?} once", frame, to);
                    return;
                }
            }
        }
        self.inner.do_send_packet(to, packet_buf).await;
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}

/// Forwards the first `num_data` DATA frames, then drops everything for `duration` before
///  forwarding again. This simulates an outage long enough for the receiver to reclaim the
///  session.
pub struct BlackoutSendSocket {
    inner: Arc<dyn SendSocket>,
    num_data: usize,
    duration: Duration,
    data_sent: AtomicUsize,
    blackout_start: RwLock<Option<Instant>>,
}

impl BlackoutSendSocket {
    pub fn after_data(inner: Arc<dyn SendSocket>, num_data: usize, duration: Duration) -> BlackoutSendSocket {
        BlackoutSendSocket {
            inner,
            num_data,
            duration,
            data_sent: AtomicUsize::new(0),
            blackout_start: RwLock::new(None),
        }
    }

    pub async fn has_blacked_out(&self) -> bool {
        self.blackout_start.read().await.is_some()
    }
}

#[async_trait]
impl SendSocket for BlackoutSendSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        let now = Instant::now();
        {
            let mut blackout_start = self.blackout_start.write().await;
            match *blackout_start {
                Some(start) if now.saturating_duration_since(start) < self.duration => {
                    debug!("blackout - dropping datagram to {:?}", to);
                    return;
                }
                Some(_) => {}
                None => {
                    if self.data_sent.load(Ordering::Acquire) >= self.num_data {
                        debug!("blackout for {:?} starts", self.duration);
                        *blackout_start = Some(now);
                        return;
                    }
                    if matches!(Frame::deser(&mut &packet_buf[..]), Ok(f) if f.kind == FrameKind::Data) {
                        self.data_sent.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
        }
        self.inner.do_send_packet(to, packet_buf).await;
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }
}

/// A [SendSocket] that goes nowhere - combine with [TrackingSendSocket] to capture replies
pub struct NullSendSocket {
    pub local_addr: SocketAddr,
}

#[async_trait]
impl SendSocket for NullSendSocket {
    async fn do_send_packet(&self, _to: SocketAddr, _packet_buf: &[u8]) {
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
