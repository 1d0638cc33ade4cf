use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio::runtime::Builder;
use tokio::time::timeout;
use tracing::Level;
use rudp_ft::config::{Environment, RudpFtConfig};
use rudp_ft::frame::FrameKind;
use rudp_ft::receiver::Receiver;
use rudp_ft::send_socket::{LossySendSocket, SendSocket};
use rudp_ft::sender::{Sender, TransferStats};
use rudp_ft::storage::FileSinkFactory;
use rudp_ft::test_util::socket::{BlackoutSendSocket, DropOnceSendSocket, TrackingSendSocket};

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init()
        .ok();
}

const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

fn test_config() -> RudpFtConfig {
    let mut config = RudpFtConfig::for_environment(Environment::Lan);
    config.handshake_wait = Duration::from_millis(100);
    config.backoff_initial = Duration::from_millis(20);
    config.backoff_max = Duration::from_millis(200);
    config.idle_timeout = Duration::from_millis(500);
    config
}

fn test_data(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i * 31 + i / 1360) as u8)
        .collect()
}

async fn bind_loopback() -> Arc<UdpSocket> {
    Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
}

fn plain(socket: &Arc<UdpSocket>) -> Arc<dyn SendSocket> {
    Arc::new(socket.clone())
}

struct Harness {
    config: Arc<RudpFtConfig>,
    dir: TempDir,
    receiver_socket: Arc<UdpSocket>,
}

impl Harness {
    async fn new(config: RudpFtConfig) -> Harness {
        Harness {
            config: Arc::new(config),
            dir: tempfile::tempdir().unwrap(),
            receiver_socket: bind_loopback().await,
        }
    }

    fn receiver(&self, send_socket: Arc<dyn SendSocket>) -> Receiver {
        let sink_factory = Arc::new(FileSinkFactory::new(self.dir.path()));
        Receiver::new(self.config.clone(), self.receiver_socket.clone(), send_socket, sink_factory).unwrap()
    }

    fn sender(&self, socket: Arc<UdpSocket>, send_socket: Arc<dyn SendSocket>) -> Sender {
        Sender::new(self.config.clone(), socket, send_socket, self.receiver_socket.as_ref().local_addr().unwrap()).unwrap()
    }

    fn assert_received(&self, name: &str, expected: &[u8]) {
        let actual = std::fs::read(self.dir.path().join(name)).unwrap();
        assert_eq!(actual.len(), expected.len());
        assert!(actual == expected, "{} differs from the source", name);
    }

    /// runs a single transfer to completion on both sides
    async fn transfer(&self, data: &[u8], name: &str, sender_socket: Arc<UdpSocket>, sender_send: Arc<dyn SendSocket>, receiver_send: Arc<dyn SendSocket>) -> TransferStats {
        let mut receiver = self.receiver(receiver_send);
        let sender = self.sender(sender_socket, sender_send);
        let mut source = Bytes::copy_from_slice(data);

        let (received, sent) = timeout(TRANSFER_TIMEOUT, async {
            tokio::join!(
                receiver.run_until_sessions_completed(1),
                sender.send(&mut source, data.len() as u64, name),
            )
        }).await.expect("transfer did not complete in time");

        received.unwrap();
        let stats = sent.unwrap();
        self.assert_received(name, data);
        stats
    }
}

#[test]
fn test_bind_on_ephemeral_ports() {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
        let config = Arc::new(test_config());
        let dir = tempfile::tempdir().unwrap();
        let sink_factory = Arc::new(FileSinkFactory::new(dir.path()));

        let receiver = Receiver::bind(config.clone(), 0, sink_factory, Ok).await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap();
        assert_ne!(receiver_addr.port(), 0);

        let peer = SocketAddr::from(([127, 0, 0, 1], receiver_addr.port()));
        let sender = Sender::bind(config, peer, Ok).await.unwrap();
        assert_eq!(sender.peer(), peer);
    });
}

#[test]
fn test_lossless_transfer() {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
        let mut config = test_config();
        config.rto = Duration::from_secs(10);
        let harness = Harness::new(config).await;

        let sender_socket = bind_loopback().await;
        let sender_tracking = Arc::new(TrackingSendSocket::new(plain(&sender_socket)));
        let receiver_tracking = Arc::new(TrackingSendSocket::new(plain(&harness.receiver_socket)));

        let data = test_data(5000);
        let stats = harness.transfer(&data, "five_thousand.bin", sender_socket, sender_tracking.clone(), receiver_tracking.clone()).await;

        assert_eq!(stats.segments, 4);
        assert_eq!(stats.transmissions, 4);
        assert_eq!(stats.retransmissions, 0);

        assert_eq!(sender_tracking.sent_kinds().await, vec![
            FrameKind::Start,
            FrameKind::Data,
            FrameKind::Data,
            FrameKind::Data,
            FrameKind::Data,
            FrameKind::Fin,
        ]);
        let fin = sender_tracking.sent_frames().await.pop().unwrap().1;
        assert_eq!(fin.sequence, 3);
        assert_eq!(fin.file_size, 5000);

        assert_eq!(receiver_tracking.sent_kinds().await, vec![
            FrameKind::StartOk,
            FrameKind::Ack,
            FrameKind::Ack,
            FrameKind::Ack,
            FrameKind::Ack,
        ]);
    });
}

#[test]
fn test_lost_segment_is_recovered_through_nack() {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
        let mut config = test_config();
        // only a NACK can trigger the retransmission in time
        config.rto = Duration::from_secs(30);
        let harness = Harness::new(config).await;

        let sender_socket = bind_loopback().await;
        let dropping = Arc::new(DropOnceSendSocket::data(plain(&sender_socket), 2));
        let receiver_tracking = Arc::new(TrackingSendSocket::new(plain(&harness.receiver_socket)));

        let data = test_data(10 * 1360 - 17);
        let stats = harness.transfer(&data, "ten.bin", sender_socket, dropping.clone(), receiver_tracking.clone()).await;

        assert!(dropping.has_dropped());
        assert_eq!(stats.segments, 10);
        assert!(stats.nack_retransmissions >= 1);
        assert_eq!(stats.retransmissions, stats.nack_retransmissions);

        let replies = receiver_tracking.sent_frames().await;
        assert!(replies.iter().any(|(_, f)| f.kind == FrameKind::Nack && f.sequence == 2));
        let last_ack = replies.iter()
            .filter(|(_, f)| f.kind == FrameKind::Ack)
            .map(|(_, f)| f.sequence)
            .max();
        assert_eq!(last_ack, Some(9));
    });
}

#[test]
fn test_transfer_with_random_loss() {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
        let harness = Harness::new(test_config()).await;

        let sender_socket = bind_loopback().await;
        let sender_lossy = Arc::new(LossySendSocket::new(plain(&sender_socket), 20).unwrap());
        let receiver_lossy = Arc::new(LossySendSocket::new(plain(&harness.receiver_socket), 20).unwrap());

        let data = test_data(200 * 1360 + 99);
        let stats = harness.transfer(&data, "lossy.bin", sender_socket, sender_lossy, receiver_lossy).await;

        assert_eq!(stats.segments, 201);
        assert!(stats.transmissions >= 201);
    });
}

#[test]
fn test_resume_after_session_was_reclaimed() {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
        let mut config = test_config();
        config.idle_timeout = Duration::from_millis(300);
        let harness = Harness::new(config).await;

        let sender_socket = bind_loopback().await;
        let blackout = Arc::new(BlackoutSendSocket::after_data(plain(&sender_socket), 5, Duration::from_millis(800)));
        let receiver_tracking = Arc::new(TrackingSendSocket::new(plain(&harness.receiver_socket)));

        let data = test_data(30_000);
        let stats = harness.transfer(&data, "resumed.bin", sender_socket, blackout.clone(), receiver_tracking.clone()).await;

        assert!(blackout.has_blacked_out().await);
        assert_eq!(stats.rewinds, 1);
        assert!(stats.retransmissions > 0);

        let kinds = receiver_tracking.sent_kinds().await;
        assert!(kinds.contains(&FrameKind::Busy));
        assert!(kinds.iter().filter(|k| **k == FrameKind::StartOk).count() >= 2);
    });
}

#[test]
fn test_small_window_and_payload() {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
        let mut config = test_config();
        config.window_size = 3;
        config.max_payload = 100;
        config.receive_window_size = 2;
        let harness = Harness::new(config).await;

        let sender_socket = bind_loopback().await;
        let sender_lossy = Arc::new(LossySendSocket::new(plain(&sender_socket), 10).unwrap());

        let data = test_data(5_000);
        let stats = harness.transfer(&data, "small.bin", sender_socket, sender_lossy, plain(&harness.receiver_socket)).await;
        assert_eq!(stats.segments, 50);
    });
}

#[test]
fn test_empty_file() {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
        let harness = Harness::new(test_config()).await;

        let sender_socket = bind_loopback().await;
        let sender_tracking = Arc::new(TrackingSendSocket::new(plain(&sender_socket)));

        let stats = harness.transfer(&[], "empty.bin", sender_socket, sender_tracking.clone(), plain(&harness.receiver_socket)).await;
        assert_eq!(stats.segments, 0);
        assert_eq!(stats.transmissions, 0);

        let frames = sender_tracking.sent_frames().await;
        let kinds = frames.iter().map(|(_, f)| f.kind).collect::<Vec<_>>();
        assert_eq!(kinds, vec![FrameKind::Start, FrameKind::Fin]);
        assert_eq!(frames[1].1.sequence, 0);
        assert_eq!(frames[1].1.file_size, 0);
    });
}

#[test]
fn test_send_file_from_disk() {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
        let harness = Harness::new(test_config()).await;

        let source_dir = tempfile::tempdir().unwrap();
        let source_path = source_dir.path().join("source.bin");
        let data = test_data(100_000);
        std::fs::write(&source_path, &data).unwrap();

        let sender_socket = bind_loopback().await;
        let mut receiver = harness.receiver(plain(&harness.receiver_socket));
        let sender = harness.sender(sender_socket.clone(), plain(&sender_socket));

        let (received, sent) = timeout(TRANSFER_TIMEOUT, async {
            tokio::join!(
                receiver.run_until_sessions_completed(1),
                sender.send_file(&source_path, "../../escaped.bin"),
            )
        }).await.unwrap();
        received.unwrap();
        assert_eq!(sent.unwrap().file_size, 100_000);

        // only the file name is used on the receiving side
        harness.assert_received("escaped.bin", &data);
    });
}

#[test]
fn test_second_sender_waits_for_first() {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    rt.block_on(async {
        let harness = Harness::new(test_config()).await;
        let receiver_tracking = Arc::new(TrackingSendSocket::new(plain(&harness.receiver_socket)));
        let mut receiver = harness.receiver(receiver_tracking.clone());

        let socket_a = bind_loopback().await;
        let socket_b = bind_loopback().await;
        let sender_a = harness.sender(socket_a.clone(), plain(&socket_a));
        let sender_b = harness.sender(socket_b.clone(), plain(&socket_b));

        let data_a = test_data(2_000_000);
        let data_b = test_data(300_000);
        let mut source_a = Bytes::copy_from_slice(&data_a);
        let mut source_b = Bytes::copy_from_slice(&data_b);

        let (received, sent_a, sent_b) = timeout(TRANSFER_TIMEOUT, async {
            tokio::join!(
                receiver.run_until_sessions_completed(2),
                sender_a.send(&mut source_a, data_a.len() as u64, "a.bin"),
                async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    sender_b.send(&mut source_b, data_b.len() as u64, "b.bin").await
                },
            )
        }).await.expect("transfers did not complete in time");

        received.unwrap();
        sent_a.unwrap();
        sent_b.unwrap();

        harness.assert_received("a.bin", &data_a);
        harness.assert_received("b.bin", &data_b);

        let start_oks = receiver_tracking.sent_frames().await
            .into_iter()
            .filter(|(_, f)| f.kind == FrameKind::StartOk)
            .map(|(to, _)| to)
            .collect::<Vec<_>>();
        assert!(start_oks.contains(&socket_a.as_ref().local_addr().unwrap()));
        assert!(start_oks.contains(&socket_b.as_ref().local_addr().unwrap()));
    });
}
