use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use crate::config::RudpFtConfig;
use crate::frame::Frame;
use crate::receiver::ack_generator::AckGenerator;
use crate::receiver::reorder_buffer::{InsertOutcome, ReorderBuffer};
use crate::storage::DestinationSink;

/// Logs a throughput sample whenever another `sample_bytes` were written in order
pub struct ThroughputMeter {
    sample_bytes: u64,
    sample_start: Instant,
    bytes_in_sample: u64,
}

impl ThroughputMeter {
    pub fn new(sample_bytes: u64, now: Instant) -> ThroughputMeter {
        ThroughputMeter {
            sample_bytes,
            sample_start: now,
            bytes_in_sample: 0,
        }
    }

    /// returns the sample's rate in bytes per second when a sample was completed
    pub fn record(&mut self, num_bytes: u64, total_bytes: u64, now: Instant) -> Option<f64> {
        if self.sample_bytes == 0 {
            return None;
        }

        self.bytes_in_sample += num_bytes;
        if self.bytes_in_sample < self.sample_bytes {
            return None;
        }

        let secs = now.saturating_duration_since(self.sample_start).as_secs_f64();
        let rate = if secs > 0.0 { self.sample_bytes as f64 / secs } else { 0.0 };
        info!("received {:.1} MiB - {:.2} Mb/s", total_bytes as f64 / (1024.0 * 1024.0), rate * 8.0 / 1_000_000.0);

        // the overshoot counts towards the next sample, keeping marks at multiples of sample_bytes
        self.sample_start = now;
        self.bytes_in_sample -= self.sample_bytes;
        Some(rate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub peer: SocketAddr,
    pub destination_name: String,
    pub bytes_committed: u64,
    pub complete: bool,
    pub elapsed: Duration,
}

/// The state of the one transfer a receiver serves at a time. It is created on START and
///  consumed by [ReceiverSession::finish] or [ReceiverSession::abandon].
pub struct ReceiverSession {
    peer: SocketAddr,
    destination_name: String,
    sink: Box<dyn DestinationSink>,
    file_size: u64,

    buffer: ReorderBuffer,
    acks: AckGenerator,
    bytes_committed: u64,

    fin_received: bool,
    fin_seq: u32,

    started_at: Instant,
    last_activity: Instant,
    meter: ThroughputMeter,
}

impl ReceiverSession {
    pub fn new(
        peer: SocketAddr,
        destination_name: String,
        file_size: u64,
        sink: Box<dyn DestinationSink>,
        config: &RudpFtConfig,
        now: Instant,
    ) -> anyhow::Result<ReceiverSession> {
        Ok(ReceiverSession {
            peer,
            destination_name,
            sink,
            file_size,
            buffer: ReorderBuffer::new(config.receive_window_size)?,
            acks: AckGenerator::new(config.nack_interval),
            bytes_committed: 0,
            fin_received: false,
            fin_seq: 0,
            started_at: now,
            last_activity: now,
            meter: ThroughputMeter::new(config.progress_log_bytes, now),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn destination_name(&self) -> &str {
        &self.destination_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn bytes_committed(&self) -> u64 {
        self.bytes_committed
    }

    pub fn next_write_seq(&self) -> u32 {
        self.buffer.next_seq()
    }

    pub fn fin_received(&self) -> bool {
        self.fin_received
    }

    pub fn fin_seq(&self) -> u32 {
        self.fin_seq
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_committed == self.file_size
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > idle_timeout
    }

    /// Stages a DATA frame, writes everything that is now contiguous and returns the control
    ///  frames to send back
    pub async fn on_data(&mut self, frame: Frame, now: Instant) -> anyhow::Result<Vec<Frame>> {
        self.touch(now);

        if frame.length as usize != frame.payload.len() {
            warn!("dropping DATA #{} with length field {} and {} payload bytes", frame.sequence, frame.length, frame.payload.len());
            return Ok(vec![]);
        }
        if frame.sequence >= self.buffer.next_seq() && frame.payload.len() as u64 > self.file_size.saturating_sub(self.bytes_committed) {
            warn!("dropping DATA #{}: {} bytes would exceed the announced file size of {}", frame.sequence, frame.payload.len(), self.file_size);
            return Ok(vec![]);
        }

        let sequence = frame.sequence;
        match self.buffer.insert(sequence, frame.payload) {
            InsertOutcome::Stored => trace!("staged DATA #{}", sequence),
            outcome => debug!("DATA #{} not staged: {:?}", sequence, outcome),
        }

        let mut written = 0u64;
        while let Some(data) = self.buffer.pop_front() {
            self.sink.write_segment(&data).await?;
            self.bytes_committed += data.len() as u64;
            written += data.len() as u64;
        }
        if written > 0 {
            self.meter.record(written, self.bytes_committed, now);
        }

        Ok(self.acks.on_data(&self.buffer, now))
    }

    /// Records a FIN. It is remembered even if the file is not complete yet.
    pub fn on_fin(&mut self, frame: &Frame, now: Instant) {
        self.touch(now);
        if frame.file_size != self.file_size {
            warn!("FIN announces {} bytes, START announced {} - using the FIN's value", frame.file_size, self.file_size);
            self.file_size = frame.file_size;
        }
        self.fin_received = true;
        self.fin_seq = frame.sequence;
    }

    /// closes the destination file and logs a summary
    pub async fn finish(mut self, now: Instant) -> anyhow::Result<SessionSummary> {
        self.sink.finish().await?;

        let summary = self.summary(now);
        let secs = summary.elapsed.as_secs_f64();
        let mib = summary.bytes_committed as f64 / (1024.0 * 1024.0);
        let rate = if secs > 0.0 { summary.bytes_committed as f64 * 8.0 / secs / 1_000_000.0 } else { 0.0 };
        info!("received {:?} from {:?}: {:.2} MiB in {:.3}s, {:.2} Mb/s", self.destination_name, self.peer, mib, secs, rate);
        Ok(summary)
    }

    /// drops the session, leaving the partial file behind
    pub fn abandon(self, now: Instant) -> SessionSummary {
        warn!("abandoning transfer of {:?} from {:?} after {} of {} bytes", self.destination_name, self.peer, self.bytes_committed, self.file_size);
        self.summary(now)
    }

    fn summary(&self, now: Instant) -> SessionSummary {
        SessionSummary {
            peer: self.peer,
            destination_name: self.destination_name.clone(),
            bytes_committed: self.bytes_committed,
            complete: self.is_complete(),
            elapsed: now.saturating_duration_since(self.started_at),
        }
    }
}
